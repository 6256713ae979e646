//! Location dropdown handling
//!
//! The consular location control is either a native `<select>` or a custom
//! ARIA listbox, depending on the site build. [`dropdown_for`] inspects the
//! tag once and returns the matching strategy; callers only see [`Dropdown`].

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::driver::{BrowserDriver, DriverResult, ElementRef};
use crate::selectors::Selector;
use crate::utils::normalize_whitespace;

/// Selection capability shared by both dropdown flavours
#[async_trait]
pub trait Dropdown: Send + Sync {
    async fn is_selectable(&self) -> DriverResult<bool>;

    /// Visible, non-empty option labels in display order
    async fn option_texts(&self) -> DriverResult<Vec<String>>;

    async fn selected_text(&self) -> DriverResult<Option<String>>;

    /// Select the option whose label equals `text`; false when there is none
    async fn select_by_text(&self, text: &str) -> DriverResult<bool>;

    /// Select the first option that contains, or is contained in, `target`
    /// (case-insensitive); returns the chosen label
    async fn select_by_fuzzy_match(&self, target: &str) -> DriverResult<Option<String>> {
        let wanted = target.trim().to_lowercase();
        if wanted.is_empty() {
            return Ok(None);
        }
        for option in self.option_texts().await? {
            let label = option.to_lowercase();
            if (label.contains(&wanted) || wanted.contains(&label))
                && self.select_by_text(&option).await?
            {
                return Ok(Some(option));
            }
        }
        Ok(None)
    }
}

/// Result of [`ensure_location_selected`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationSelection {
    AlreadySelected(String),
    Exact(String),
    Fuzzy(String),
    /// Nothing matched; `current` is whatever was selected before
    Unmatched { current: Option<String> },
}

impl LocationSelection {
    pub fn is_selected(&self) -> bool {
        !matches!(self, Self::Unmatched { .. })
    }
}

async fn option_label(driver: &dyn BrowserDriver, option: &ElementRef) -> DriverResult<String> {
    Ok(normalize_whitespace(&driver.text(option).await?))
}

async fn click_option(driver: &dyn BrowserDriver, option: &ElementRef) -> DriverResult<()> {
    match driver.click(option).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            debug!(error = %e, "Option click failed; attempting scripted click");
            driver.scripted_click(option).await
        }
    }
}

/// A native `<select>` element
pub struct NativeSelect {
    driver: Arc<dyn BrowserDriver>,
    element: ElementRef,
}

impl NativeSelect {
    pub fn new(driver: Arc<dyn BrowserDriver>, element: ElementRef) -> Self {
        Self { driver, element }
    }

    async fn options(&self) -> DriverResult<Vec<ElementRef>> {
        self.driver
            .find_child_elements(&self.element, &Selector::tag("option"))
            .await
    }
}

#[async_trait]
impl Dropdown for NativeSelect {
    async fn is_selectable(&self) -> DriverResult<bool> {
        self.driver.is_enabled(&self.element).await
    }

    async fn option_texts(&self) -> DriverResult<Vec<String>> {
        let mut labels = Vec::new();
        for option in self.options().await? {
            let label = option_label(self.driver.as_ref(), &option).await?;
            if !label.is_empty() {
                labels.push(label);
            }
        }
        Ok(labels)
    }

    async fn selected_text(&self) -> DriverResult<Option<String>> {
        for option in self.options().await? {
            if self.driver.is_selected(&option).await? {
                return Ok(Some(option_label(self.driver.as_ref(), &option).await?));
            }
        }
        Ok(None)
    }

    async fn select_by_text(&self, text: &str) -> DriverResult<bool> {
        let wanted = normalize_whitespace(text);
        for option in self.options().await? {
            if option_label(self.driver.as_ref(), &option).await? == wanted {
                click_option(self.driver.as_ref(), &option).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// A custom widget exposing `role="option"` children with `aria-selected`
pub struct CustomListbox {
    driver: Arc<dyn BrowserDriver>,
    element: ElementRef,
}

impl CustomListbox {
    pub fn new(driver: Arc<dyn BrowserDriver>, element: ElementRef) -> Self {
        Self { driver, element }
    }

    async fn options(&self) -> DriverResult<Vec<ElementRef>> {
        self.driver
            .find_child_elements(&self.element, &Selector::css("[role='option']"))
            .await
    }
}

#[async_trait]
impl Dropdown for CustomListbox {
    async fn is_selectable(&self) -> DriverResult<bool> {
        let disabled = self.driver.attribute(&self.element, "aria-disabled").await?;
        Ok(disabled.as_deref() != Some("true") && self.driver.is_displayed(&self.element).await?)
    }

    async fn option_texts(&self) -> DriverResult<Vec<String>> {
        let mut labels = Vec::new();
        for option in self.options().await? {
            let label = option_label(self.driver.as_ref(), &option).await?;
            if !label.is_empty() {
                labels.push(label);
            }
        }
        Ok(labels)
    }

    async fn selected_text(&self) -> DriverResult<Option<String>> {
        for option in self.options().await? {
            let selected = self.driver.attribute(&option, "aria-selected").await?;
            if selected.as_deref() == Some("true") {
                return Ok(Some(option_label(self.driver.as_ref(), &option).await?));
            }
        }
        Ok(None)
    }

    async fn select_by_text(&self, text: &str) -> DriverResult<bool> {
        let wanted = normalize_whitespace(text);
        // Opening the list is best effort; some builds render options inline
        if let Err(e) = self.driver.click(&self.element).await {
            if e.is_fatal() {
                return Err(e);
            }
        }
        for option in self.options().await? {
            if option_label(self.driver.as_ref(), &option).await? == wanted {
                click_option(self.driver.as_ref(), &option).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Pick the dropdown strategy for `element` by its tag name
pub async fn dropdown_for(
    driver: Arc<dyn BrowserDriver>,
    element: ElementRef,
) -> DriverResult<Box<dyn Dropdown>> {
    let tag = driver.tag_name(&element).await?;
    if tag.eq_ignore_ascii_case("select") {
        Ok(Box::new(NativeSelect::new(driver, element)))
    } else {
        debug!(tag = %tag, "Location control is not a native select; using listbox strategy");
        Ok(Box::new(CustomListbox::new(driver, element)))
    }
}

/// Make sure `target` is the selected location
///
/// Tries, in order: already selected, exact label, fuzzy label.
pub async fn ensure_location_selected(
    dropdown: &dyn Dropdown,
    target: &str,
) -> DriverResult<LocationSelection> {
    let current = dropdown.selected_text().await?;
    let wanted = target.trim();

    if let Some(selected) = &current {
        if selected.eq_ignore_ascii_case(wanted) {
            info!(location = %selected, "Target consular location already selected");
            return Ok(LocationSelection::AlreadySelected(selected.clone()));
        }
    }

    if !dropdown.is_selectable().await? {
        warn!(location = wanted, "Location control is not selectable");
        return Ok(LocationSelection::Unmatched { current });
    }

    if dropdown.select_by_text(wanted).await? {
        info!(location = wanted, "Selected consular location by exact match");
        return Ok(LocationSelection::Exact(wanted.to_string()));
    }

    if let Some(label) = dropdown.select_by_fuzzy_match(wanted).await? {
        info!(location = %label, "Selected consular location using fuzzy match");
        return Ok(LocationSelection::Fuzzy(label));
    }

    warn!(
        location = wanted,
        current = current.as_deref().unwrap_or(""),
        "Unable to match configured location to the available dropdown options"
    );
    Ok(LocationSelection::Unmatched { current })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{FakeBrowser, FakeElement, FakePage};

    const URL: &str = "https://site.test/appointment";

    async fn native(selected: Option<usize>) -> (FakeBrowser, Box<dyn Dropdown>) {
        let labels = ["", "Calgary", "Ottawa", "Toronto"];
        let mut select = FakeElement::new("loc", "select").attr("id", "location");
        for (index, label) in labels.iter().enumerate() {
            let mut option = FakeElement::new(format!("opt-{index}"), "option").text(*label);
            if selected == Some(index) {
                option = option.selected();
            }
            select = select.child(option);
        }
        let browser = FakeBrowser::new();
        browser.add_page(FakePage::new(URL).element(select));
        browser.navigate(URL).await.unwrap();

        let found = browser.find_elements(&Selector::id("location")).await.unwrap();
        let dropdown = dropdown_for(Arc::new(browser.clone()), found[0].clone())
            .await
            .unwrap();
        (browser, dropdown)
    }

    #[tokio::test]
    async fn test_already_selected_is_left_alone() {
        let (browser, dropdown) = native(Some(2)).await;
        let outcome = ensure_location_selected(dropdown.as_ref(), " ottawa ").await.unwrap();
        assert_eq!(outcome, LocationSelection::AlreadySelected("Ottawa".into()));
        assert!(browser.clicks().is_empty());
    }

    #[tokio::test]
    async fn test_exact_match_selects_option() {
        let (browser, dropdown) = native(Some(1)).await;
        let outcome = ensure_location_selected(dropdown.as_ref(), "Toronto").await.unwrap();
        assert_eq!(outcome, LocationSelection::Exact("Toronto".into()));
        assert!(browser.is_selected_now("opt-3"));
        assert!(!browser.is_selected_now("opt-1"));
    }

    #[tokio::test]
    async fn test_fuzzy_match_falls_back_to_substring() {
        let (browser, dropdown) = native(None).await;
        let outcome = ensure_location_selected(dropdown.as_ref(), "toronto, ontario").await.unwrap();
        // "toronto" is contained in the target
        assert_eq!(outcome, LocationSelection::Fuzzy("Toronto".into()));
        assert!(browser.is_selected_now("opt-3"));
    }

    #[tokio::test]
    async fn test_unmatched_location_reports_current() {
        let (_browser, dropdown) = native(Some(1)).await;
        let outcome = ensure_location_selected(dropdown.as_ref(), "Vancouver").await.unwrap();
        assert_eq!(
            outcome,
            LocationSelection::Unmatched {
                current: Some("Calgary".into())
            }
        );
        assert!(!outcome.is_selected());
    }

    #[tokio::test]
    async fn test_custom_listbox_strategy() {
        let option = |key: &str, label: &str, selected: bool| {
            FakeElement::new(key, "li")
                .attr("role", "option")
                .attr("aria-selected", if selected { "true" } else { "false" })
                .matches(Selector::css("[role='option']"))
                .text(label)
        };
        let browser = FakeBrowser::new();
        browser.add_page(
            FakePage::new(URL).element(
                FakeElement::new("list", "div")
                    .attr("id", "location")
                    .attr("role", "listbox")
                    .child(option("li-a", "Montreal", true))
                    .child(option("li-b", "Vancouver", false)),
            ),
        );
        browser.navigate(URL).await.unwrap();
        let found = browser.find_elements(&Selector::id("location")).await.unwrap();
        let dropdown = dropdown_for(Arc::new(browser.clone()), found[0].clone())
            .await
            .unwrap();

        assert_eq!(dropdown.selected_text().await.unwrap().as_deref(), Some("Montreal"));
        let outcome = ensure_location_selected(dropdown.as_ref(), "Vancouver").await.unwrap();
        assert_eq!(outcome, LocationSelection::Exact("Vancouver".into()));
        assert_eq!(dropdown.selected_text().await.unwrap().as_deref(), Some("Vancouver"));
    }
}
