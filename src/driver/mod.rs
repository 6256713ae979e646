//! Browser automation seam
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  BrowserDriver (async trait)                                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────────┐   ┌───────────────────────────┐  │
//! │  │  WebDriverClient       │   │  FakeBrowser              │  │
//! │  │  W3C wire protocol     │   │  in-memory page model     │  │
//! │  │  over reqwest          │   │  (test-support feature)   │  │
//! │  └────────────────────────┘   └───────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Element handles are opaque [`ElementRef`] tokens owned by the session that
//! produced them. Any handle may go stale after a navigation or DOM update;
//! drivers report that as [`DriverError::StaleElement`].

#[cfg(any(test, feature = "test-support"))]
pub mod fake;
pub mod webdriver;

use async_trait::async_trait;
use std::sync::Arc;

use crate::selectors::Selector;
pub use crate::utils::error::DriverError;

#[cfg(any(test, feature = "test-support"))]
pub use fake::{ClickAction, FakeBrowser, FakeElement, FakePage};
pub use webdriver::{DriverConfig, WebDriverClient, WebDriverFactory};

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Opaque handle to a DOM element in the current session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One live browser session
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Load a URL in the top-level browsing context
    async fn navigate(&self, url: &str) -> DriverResult<()>;

    async fn current_url(&self) -> DriverResult<String>;

    async fn page_source(&self) -> DriverResult<String>;

    /// All elements matching `selector` in the current context, in document order
    async fn find_elements(&self, selector: &Selector) -> DriverResult<Vec<ElementRef>>;

    /// Elements matching `selector` below `parent`
    async fn find_child_elements(
        &self,
        parent: &ElementRef,
        selector: &Selector,
    ) -> DriverResult<Vec<ElementRef>>;

    /// Enter the frame represented by an `<iframe>` element
    async fn switch_to_frame(&self, frame: &ElementRef) -> DriverResult<()>;

    /// Return to the top-level document
    async fn switch_to_default(&self) -> DriverResult<()>;

    async fn is_displayed(&self, element: &ElementRef) -> DriverResult<bool>;

    async fn is_enabled(&self, element: &ElementRef) -> DriverResult<bool>;

    async fn is_selected(&self, element: &ElementRef) -> DriverResult<bool>;

    async fn text(&self, element: &ElementRef) -> DriverResult<String>;

    async fn attribute(&self, element: &ElementRef, name: &str) -> DriverResult<Option<String>>;

    async fn tag_name(&self, element: &ElementRef) -> DriverResult<String>;

    async fn css_value(&self, element: &ElementRef, property: &str) -> DriverResult<String>;

    async fn click(&self, element: &ElementRef) -> DriverResult<()>;

    async fn clear(&self, element: &ElementRef) -> DriverResult<()>;

    async fn send_keys(&self, element: &ElementRef, text: &str) -> DriverResult<()>;

    /// Run a synchronous script; `args` are exposed as `arguments[n]`
    async fn execute_script(
        &self,
        script: &str,
        args: &[ElementRef],
    ) -> DriverResult<serde_json::Value>;

    /// PNG bytes of the current viewport
    async fn screenshot_png(&self) -> DriverResult<Vec<u8>>;

    /// End the session; further calls fail with `SessionLost`
    async fn quit(&self) -> DriverResult<()>;

    /// `document.readyState` of the current page
    async fn ready_state(&self) -> DriverResult<String> {
        let value = self
            .execute_script("return document.readyState", &[])
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Click through JavaScript, bypassing overlays and interactability checks
    async fn scripted_click(&self, element: &ElementRef) -> DriverResult<()> {
        self.execute_script("arguments[0].click();", std::slice::from_ref(element))
            .await
            .map(|_| ())
    }

    async fn scroll_into_view(&self, element: &ElementRef) -> DriverResult<()> {
        self.execute_script(
            "arguments[0].scrollIntoView({block: 'center', inline: 'center'});",
            std::slice::from_ref(element),
        )
        .await
        .map(|_| ())
    }
}

/// Creates browser sessions; the orchestrator calls it again after every reset
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn create(&self) -> DriverResult<Arc<dyn BrowserDriver>>;
}
