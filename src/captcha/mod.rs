//! Human-verification challenge detection
//!
//! Detection is a three-way OR over the current page:
//!
//! 1. a displayed `<iframe>` whose `src` points at a challenge provider or whose
//!    `title` mentions a captcha
//! 2. a displayed challenge widget (`.g-recaptcha`, `.h-captcha`, ...)
//! 3. challenge phrasing anywhere in the page source
//!
//! A hit is never solved. [`CaptchaGuard::check`] captures an artifact and
//! returns [`CheckError::Blocked`]; the orchestrator decides on the backoff.

use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::driver::{BrowserDriver, DriverResult, ElementRef};
use crate::selectors::{Selector, SelectorSet};
use crate::storage::ArtifactStore;
use crate::utils::error::CheckError;

const FRAME_SOURCES: &[&str] = &["hcaptcha.com", "recaptcha", "turnstile"];

const CHALLENGE_PHRASES: &[&str] = &[
    "verify you are human",
    "i am not a robot",
    "please select all",
    "captcha challenge",
    "complete the security check",
];

/// What gave the challenge away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptchaSignal {
    Frame(String),
    Widget(String),
    Phrase(&'static str),
}

impl fmt::Display for CaptchaSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame(src) => write!(f, "challenge frame ({src})"),
            Self::Widget(selector) => write!(f, "challenge widget ({selector})"),
            Self::Phrase(phrase) => write!(f, "challenge text \"{phrase}\""),
        }
    }
}

pub struct CaptchaGuard {
    widgets: SelectorSet,
    abort_on_captcha: bool,
    artifacts: Arc<ArtifactStore>,
}

impl CaptchaGuard {
    pub fn new(widgets: SelectorSet, abort_on_captcha: bool, artifacts: Arc<ArtifactStore>) -> Self {
        Self {
            widgets,
            abort_on_captcha,
            artifacts,
        }
    }

    /// Look for a challenge on the current page
    ///
    /// Element-level driver errors count as "not there"; session faults propagate.
    pub async fn detect(&self, driver: &dyn BrowserDriver) -> DriverResult<Option<CaptchaSignal>> {
        driver.switch_to_default().await?;

        for frame in driver.find_elements(&Selector::tag("iframe")).await? {
            match frame_signal(driver, &frame).await {
                Ok(Some(signal)) => return Ok(Some(signal)),
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => {}
            }
        }

        for selector in &self.widgets {
            let found = match driver.find_elements(selector).await {
                Ok(found) => found,
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => continue,
            };
            for widget in found {
                match driver.is_displayed(&widget).await {
                    Ok(true) => return Ok(Some(CaptchaSignal::Widget(selector.target.clone()))),
                    Ok(false) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(_) => {}
                }
            }
        }

        let source = match driver.page_source().await {
            Ok(source) => source.to_lowercase(),
            Err(e) if e.is_fatal() => return Err(e),
            Err(_) => String::new(),
        };
        Ok(CHALLENGE_PHRASES
            .iter()
            .copied()
            .find(|phrase| source.contains(phrase))
            .map(CaptchaSignal::Phrase))
    }

    /// Fail with `Blocked` when a challenge is present
    pub async fn check(&self, driver: &dyn BrowserDriver) -> Result<(), CheckError> {
        let Some(signal) = self.detect(driver).await? else {
            return Ok(());
        };

        warn!(signal = %signal, "Captcha challenge detected on page; automation paused");
        self.artifacts
            .capture_best_effort(driver, "captcha_detected")
            .await;

        let reason = if self.abort_on_captcha {
            format!("{signal} - manual solve required")
        } else {
            format!("{signal} - retry will be attempted after backoff")
        };
        Err(CheckError::Blocked {
            reason,
            terminal: self.abort_on_captcha,
        })
    }
}

async fn frame_signal(
    driver: &dyn BrowserDriver,
    frame: &ElementRef,
) -> DriverResult<Option<CaptchaSignal>> {
    let src = driver
        .attribute(frame, "src")
        .await?
        .unwrap_or_default()
        .to_lowercase();
    let title = driver
        .attribute(frame, "title")
        .await?
        .unwrap_or_default()
        .to_lowercase();
    if src.is_empty() && title.is_empty() {
        return Ok(None);
    }

    let suspicious =
        FRAME_SOURCES.iter().any(|provider| src.contains(provider)) || title.contains("captcha");
    if suspicious && driver.is_displayed(frame).await? {
        let label = if src.is_empty() { title } else { src };
        return Ok(Some(CaptchaSignal::Frame(label)));
    }
    Ok(None)
}
