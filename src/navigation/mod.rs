//! Session navigation state machine
//!
//! Drives one browser session from wherever it happens to be to the consular
//! appointment form:
//!
//! ```text
//!   Unknown / LoginRequired ──login──▶ Dashboard ─┐
//!                                                 ├─ candidate URLs ─▶ AppointmentForm
//!                     Dashboard / SchedulePage ───┘        │
//!                                                          └─ sign-in redirect ─▶ re-login, next candidate
//! ```
//!
//! The state is re-derived from the URL and page markers at the start of every
//! cycle; nothing about it is persisted. Page loads go through
//! [`Navigator::safe_get`], which retries with a linear backoff and waits for
//! `document.readyState == "complete"`.

mod dropdown;
mod login;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

pub use dropdown::{
    dropdown_for, ensure_location_selected, CustomListbox, Dropdown, LocationSelection,
    NativeSelect,
};

use crate::captcha::CaptchaGuard;
use crate::driver::{BrowserDriver, DriverError, ElementRef};
use crate::resolver::{ElementResolver, DEFAULT_POLL_INTERVAL};
use crate::selectors::{ElementKey, SelectorRegistry};
use crate::storage::ArtifactStore;
use crate::utils::error::CheckError;
use crate::utils::mask;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Markup present on the appointment form regardless of layout
const FORM_MARKER: &str = "appointments_consulate_appointment";

/// Where the session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageState {
    Unknown,
    LoginRequired,
    Dashboard,
    SchedulePage,
    AppointmentForm,
}

impl PageState {
    /// Classify a page from its URL and whether form markers were found
    pub fn classify(url: &str, has_form_marker: bool) -> Self {
        let url = url.to_lowercase();
        if url.contains("appointment") && has_form_marker {
            Self::AppointmentForm
        } else if url.contains("schedule") {
            Self::SchedulePage
        } else if url.contains("groups") {
            Self::Dashboard
        } else if url.contains("sign_in") {
            Self::LoginRequired
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::LoginRequired => "login_required",
            Self::Dashboard => "dashboard",
            Self::SchedulePage => "schedule_page",
            Self::AppointmentForm => "appointment_form",
        }
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed URLs of the booking site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteUrls {
    pub sign_in: String,
    /// Authenticated endpoint used for the cheap session check
    pub session_check: String,
    /// Tried in order until one leads to the appointment form
    pub schedule_candidates: Vec<String>,
}

impl SiteUrls {
    /// URLs for `https://host/<locale>/niv/...`
    pub fn for_locale(base_url: &str, locale: &str) -> Self {
        let root = format!("{}/{}/niv", base_url.trim_end_matches('/'), locale.trim_matches('/'));
        Self {
            sign_in: format!("{root}/users/sign_in"),
            session_check: format!("{root}/groups"),
            schedule_candidates: vec![
                format!("{root}/schedule/"),
                format!("{root}/appointment"),
                format!("{root}/"),
            ],
        }
    }
}

impl Default for SiteUrls {
    fn default() -> Self {
        Self::for_locale("https://ais.usvisa-info.com", "en-ca")
    }
}

/// Account login
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &mask(&self.email))
            .field("password", &mask(&self.password))
            .finish()
    }
}

/// Upper bounds for the individual waits in a navigation pass
#[derive(Debug, Clone)]
pub struct Waits {
    pub email_field: Duration,
    pub password_field: Duration,
    pub sign_in_button: Duration,
    pub login_transition: Duration,
    pub privacy_checkbox: Duration,
    pub privacy_label: Duration,
    pub page_ready: Duration,
    pub group_continue: Duration,
    pub reschedule_toggle: Duration,
    pub reschedule_button: Duration,
    pub appointment_form: Duration,
    pub location: Duration,
    /// Pause after clicks that animate the page
    pub settle: Duration,
    pub session_ttl: Duration,
    pub poll: Duration,
}

impl Default for Waits {
    fn default() -> Self {
        Self {
            email_field: Duration::from_secs(20),
            password_field: Duration::from_secs(15),
            sign_in_button: Duration::from_secs(15),
            login_transition: Duration::from_secs(40),
            privacy_checkbox: Duration::from_secs(5),
            privacy_label: Duration::from_secs(3),
            page_ready: Duration::from_secs(30),
            group_continue: Duration::from_secs(5),
            reschedule_toggle: Duration::from_secs(10),
            reschedule_button: Duration::from_secs(20),
            appointment_form: Duration::from_secs(12),
            location: Duration::from_secs(20),
            settle: Duration::from_millis(500),
            session_ttl: Duration::from_secs(5 * 60),
            poll: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Everything the navigator needs besides the session itself
#[derive(Debug, Clone)]
pub struct NavigationConfig {
    pub urls: SiteUrls,
    pub credentials: Credentials,
    pub location: String,
    /// Page-load retries: `max_retry_attempts - 1` retries, linear backoff
    pub retry: RetryConfig,
    pub waits: Waits,
}

impl NavigationConfig {
    pub fn page_load_retry(max_retry_attempts: u32, retry_backoff: Duration) -> RetryConfig {
        RetryConfig::linear(max_retry_attempts.max(1) - 1, retry_backoff)
    }
}

/// Absolute appointment base (`.../schedule/<id>/`) derived from a group "continue" href
pub fn appointment_base(current_url: &str, href: &str) -> Option<String> {
    let absolute = Url::parse(current_url).ok()?.join(href).ok()?;
    let trimmed = absolute.as_str().trim_end_matches('/');
    let base = trimmed
        .strip_suffix("continue_actions")
        .unwrap_or(trimmed)
        .trim_end_matches('/');
    if base.is_empty() {
        return None;
    }
    Some(format!("{base}/"))
}

/// Navigation state for one browser session
pub struct Navigator {
    driver: Arc<dyn BrowserDriver>,
    resolver: ElementResolver,
    selectors: Arc<SelectorRegistry>,
    guard: Arc<CaptchaGuard>,
    artifacts: Arc<ArtifactStore>,
    config: Arc<NavigationConfig>,
    last_session_validation: Option<Instant>,
    appointment_base_url: Option<String>,
}

impl Navigator {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        selectors: Arc<SelectorRegistry>,
        guard: Arc<CaptchaGuard>,
        artifacts: Arc<ArtifactStore>,
        config: Arc<NavigationConfig>,
    ) -> Self {
        let resolver = ElementResolver::new(driver.clone()).with_poll_interval(config.waits.poll);
        Self {
            driver,
            resolver,
            selectors,
            guard,
            artifacts,
            config,
            last_session_validation: None,
            appointment_base_url: None,
        }
    }

    pub fn resolver(&self) -> &ElementResolver {
        &self.resolver
    }

    pub fn appointment_base_url(&self) -> Option<&str> {
        self.appointment_base_url.as_deref()
    }

    /// Bring the session to the appointment form; returns the state it started in
    pub async fn reach_appointment_form(&mut self) -> Result<PageState, CheckError> {
        let state = self.page_state().await?;
        debug!(state = %state, "Current page state");

        match state {
            PageState::AppointmentForm => {
                info!("Already on appointment form, skipping navigation");
            }
            PageState::Dashboard | PageState::SchedulePage => {
                self.navigate_to_schedule().await?;
            }
            PageState::Unknown | PageState::LoginRequired => {
                self.navigate_to_login().await?;
                if self.on_sign_in().await? {
                    self.complete_login().await?;
                } else {
                    info!("Session already authenticated; skipping login form");
                }
                self.navigate_to_schedule().await?;
            }
        }
        Ok(state)
    }

    pub async fn page_state(&self) -> Result<PageState, CheckError> {
        let url = self.driver.current_url().await?;
        let has_marker = if url.to_lowercase().contains("appointment") {
            self.form_marker_present().await?
        } else {
            false
        };
        Ok(PageState::classify(&url, has_marker))
    }

    async fn form_marker_present(&self) -> Result<bool, CheckError> {
        let source = self.driver.page_source().await?;
        if source.to_lowercase().contains(FORM_MARKER) {
            return Ok(true);
        }
        let form = self.selectors.get(ElementKey::AppointmentForm);
        Ok(self.resolver.first_visible(form).await?.is_some())
    }

    /// Cheap check that the existing session is still signed in
    ///
    /// Never validated → false. Validated within the TTL → true without a
    /// page load. Otherwise loads the authenticated endpoint.
    async fn session_is_valid(&mut self) -> Result<bool, CheckError> {
        let Some(last) = self.last_session_validation else {
            return Ok(false);
        };
        if last.elapsed() < self.config.waits.session_ttl {
            return Ok(true);
        }

        let endpoint = self.config.urls.session_check.clone();
        if let Err(e) = self.driver.navigate(&endpoint).await {
            if e.is_fatal() {
                return Err(e.into());
            }
            debug!(url = %endpoint, error = %e, "Session check load failed");
            return Ok(false);
        }

        let valid = !self.on_sign_in().await?;
        if valid {
            self.last_session_validation = Some(Instant::now());
            info!("Existing session validated successfully");
        }
        Ok(valid)
    }

    async fn navigate_to_login(&mut self) -> Result<(), CheckError> {
        if self.session_is_valid().await? {
            info!("Valid session detected, skipping login workflow");
            return Ok(());
        }

        let login = self.config.urls.sign_in.clone();
        info!(url = %login, "Navigating to login page");
        self.safe_get(&login, true).await?;
        self.dismiss_overlays().await?;

        let current = self.driver.current_url().await?.to_lowercase();
        let authenticated = ["dashboard", "groups", "schedule"]
            .iter()
            .any(|marker| current.contains(marker));
        if authenticated && !current.contains("sign_in") {
            info!("Already authenticated, skipping login form");
            self.last_session_validation = Some(Instant::now());
        }
        Ok(())
    }

    async fn navigate_to_schedule(&mut self) -> Result<Option<LocationSelection>, CheckError> {
        self.group_continue().await?;

        let candidates = self.config.urls.schedule_candidates.clone();
        let mut reached = false;
        for url in &candidates {
            info!(url = %url, "Navigating to scheduling page candidate");
            match self.try_candidate(url).await {
                Ok(true) => {
                    reached = true;
                    break;
                }
                Ok(false) => {}
                Err(e @ CheckError::Navigation { .. }) => {
                    warn!(url = %url, error = %e, "Scheduling candidate failed; trying next");
                }
                Err(CheckError::Transport(e)) if !e.is_fatal() => {
                    warn!(url = %url, error = %e, "Browser navigation error; trying next");
                }
                Err(e) => return Err(e),
            }
        }

        if !reached {
            let current = self.current_url_or_blank().await;
            self.artifacts
                .capture_best_effort(self.driver.as_ref(), "navigation_failure")
                .await;
            return Err(CheckError::navigation(
                "schedule",
                current,
                "no candidate URL reached the appointment form",
            ));
        }

        self.select_location().await
    }

    async fn try_candidate(&mut self, url: &str) -> Result<bool, CheckError> {
        self.safe_get(url, false).await?;
        self.dismiss_overlays().await?;

        if self.on_sign_in().await? {
            info!("Session expired while navigating; re-authenticating");
            self.complete_login().await?;
            return Ok(false);
        }

        self.group_continue().await?;
        let current = self.driver.current_url().await?;
        let lower = current.to_lowercase();
        if lower.contains("schedule") || lower.contains("appointment") {
            info!(url = %current, "Reached scheduling page");
            return self.open_reschedule_flow().await;
        }
        Ok(false)
    }

    /// Click through the group "continue" interstitial if it is shown
    ///
    /// The link's href is kept as the appointment base URL.
    async fn group_continue(&mut self) -> Result<bool, CheckError> {
        let set = self.selectors.get(ElementKey::GroupContinue);
        let Some(button) = self
            .resolver
            .resolve(set, self.config.waits.group_continue, true)
            .await?
        else {
            return Ok(false);
        };

        let href = match self.driver.attribute(&button, "href").await {
            Ok(href) => href.unwrap_or_default(),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                debug!(error = %e, "Could not read continue href; continuing without base URL");
                String::new()
            }
        };

        self.scroll_into_view(&button).await?;
        self.click_with_fallback(&button, "group continue").await?;
        info!("Clicked group continue button");

        if !href.is_empty() {
            let current = self.current_url_or_blank().await;
            if let Some(base) = appointment_base(&current, &href) {
                debug!(base = %base, "Captured appointment base URL");
                self.appointment_base_url = Some(base);
            }
        }

        self.wait_until_ready().await?;
        self.dismiss_overlays().await?;
        Ok(true)
    }

    /// Expand the reschedule section and follow it to the form
    async fn open_reschedule_flow(&mut self) -> Result<bool, CheckError> {
        let current = self.driver.current_url().await?.to_lowercase();
        if current.contains("/appointment")
            && !current.contains("reschedule")
            && self.ensure_on_form().await?
        {
            return Ok(true);
        }

        if current.contains("continue_actions") {
            info!("On continue actions page; expanding reschedule section");
        }
        let toggle_set = self.selectors.get(ElementKey::RescheduleToggle);
        match self
            .resolver
            .resolve(toggle_set, self.config.waits.reschedule_toggle, true)
            .await?
        {
            Some(toggle) => {
                self.scroll_into_view(&toggle).await?;
                self.click_with_fallback(&toggle, "reschedule toggle").await?;
                tokio::time::sleep(self.config.waits.settle).await;
            }
            None => debug!("Reschedule accordion toggle not found; looking for the button directly"),
        }

        if self.ensure_on_form().await? {
            return Ok(true);
        }

        if let Some(appointment_url) = self
            .appointment_base_url
            .as_deref()
            .and_then(|base| Url::parse(base).ok()?.join("appointment").ok())
        {
            let target = appointment_url.to_string();
            if !self.driver.current_url().await?.starts_with(&target) {
                info!(url = %target, "Loading appointment page directly via stored URL");
                self.safe_get(&target, false).await?;
                self.dismiss_overlays().await?;
            }
            if self.ensure_on_form().await? {
                return Ok(true);
            }
        }

        let button_set = self.selectors.get(ElementKey::RescheduleButton);
        if let Some(button) = self
            .resolver
            .resolve(button_set, self.config.waits.reschedule_button, false)
            .await?
        {
            let href = match self.driver.attribute(&button, "href").await {
                Ok(href) => href.unwrap_or_default(),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(_) => String::new(),
            };
            if !href.is_empty() {
                info!(url = %href, "Navigating directly to reschedule link");
                self.safe_get(&href, false).await?;
            } else {
                debug!("Reschedule anchor has no href; clicking it");
                self.scroll_into_view(&button).await?;
                self.click_with_fallback(&button, "reschedule button").await?;
                self.wait_until_ready().await?;
            }
            self.dismiss_overlays().await?;
            if self.ensure_on_form().await? {
                return Ok(true);
            }
        }

        let current = self.current_url_or_blank().await;
        warn!(url = %current, "Unable to open reschedule appointment workflow automatically");
        self.artifacts
            .capture_best_effort(self.driver.as_ref(), "reschedule_navigation_failed")
            .await;
        Ok(false)
    }

    async fn ensure_on_form(&self) -> Result<bool, CheckError> {
        let set = self.selectors.get(ElementKey::AppointmentForm);
        let found = self
            .resolver
            .resolve(set, self.config.waits.appointment_form, false)
            .await?
            .is_some();
        if found {
            let url = self.current_url_or_blank().await;
            info!(url = %url, "Appointment form detected");
        }
        Ok(found)
    }

    async fn select_location(&self) -> Result<Option<LocationSelection>, CheckError> {
        let set = self.selectors.get(ElementKey::Location);
        let Some(control) = self
            .resolver
            .resolve_cached(ElementKey::Location, set, self.config.waits.location, false)
            .await?
        else {
            info!("Location selector not found; page layout may have changed or location already locked");
            self.artifacts
                .capture_best_effort(self.driver.as_ref(), "missing_location_selector")
                .await;
            return Ok(None);
        };

        let dropdown = dropdown_for(self.driver.clone(), control).await?;
        let selection = ensure_location_selected(dropdown.as_ref(), &self.config.location).await?;
        Ok(Some(selection))
    }

    /// Load `url` with linear-backoff retries, optionally checking for a challenge
    ///
    /// A detected challenge is never retried. Any other final failure leaves a
    /// `navigation_failure` artifact behind.
    pub async fn safe_get(&self, url: &str, detect_captcha: bool) -> Result<(), CheckError> {
        let result = with_retry_if(
            &self.config.retry,
            || self.load_once(url, detect_captcha),
            |e: &CheckError| matches!(e, CheckError::Navigation { .. }),
        )
        .await;

        match &result {
            Err(e) if e.is_blocked() => {
                warn!(url = %url, error = %e, "Captcha encountered while loading page");
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Page load failed after retries");
                self.artifacts
                    .capture_best_effort(self.driver.as_ref(), "navigation_failure")
                    .await;
            }
            Ok(()) => {}
        }
        result
    }

    async fn load_once(&self, url: &str, detect_captcha: bool) -> Result<(), CheckError> {
        self.driver
            .navigate(url)
            .await
            .map_err(|e| page_load_error(url, e))?;
        self.wait_until_ready().await?;
        if detect_captcha {
            self.guard.check(self.driver.as_ref()).await?;
        }
        Ok(())
    }

    async fn wait_until_ready(&self) -> Result<(), CheckError> {
        let deadline = Instant::now() + self.config.waits.page_ready;
        loop {
            match self.driver.ready_state().await {
                Ok(state) if state == "complete" => return Ok(()),
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => debug!(error = %e, "readyState probe failed"),
            }
            if Instant::now() >= deadline {
                let url = self.current_url_or_blank().await;
                return Err(CheckError::navigation(
                    "page_ready",
                    url,
                    format!(
                        "document did not finish loading within {}s",
                        self.config.waits.page_ready.as_secs()
                    ),
                ));
            }
            tokio::time::sleep(self.config.waits.poll).await;
        }
    }

    /// Click the first usable cookie/consent button, if any
    pub async fn dismiss_overlays(&self) -> Result<bool, CheckError> {
        self.driver.switch_to_default().await?;
        for selector in self.selectors.get(ElementKey::CookieConsent) {
            let found = match self.driver.find_elements(selector).await {
                Ok(found) => found,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(_) => continue,
            };
            for element in found {
                match self.try_dismiss(&element).await {
                    Ok(true) => {
                        info!(selector = %selector, "Dismissed overlay");
                        tokio::time::sleep(self.config.waits.settle).await;
                        return Ok(true);
                    }
                    Ok(false) => {}
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => debug!(selector = %selector, error = %e, "Failed to dismiss overlay"),
                }
            }
        }
        Ok(false)
    }

    async fn try_dismiss(&self, element: &ElementRef) -> Result<bool, DriverError> {
        if !self.driver.is_enabled(element).await? || !self.driver.is_displayed(element).await? {
            return Ok(false);
        }
        self.driver.scroll_into_view(element).await?;
        self.driver.click(element).await?;
        Ok(true)
    }

    async fn on_sign_in(&self) -> Result<bool, CheckError> {
        Ok(self
            .driver
            .current_url()
            .await?
            .to_lowercase()
            .contains("sign_in"))
    }

    async fn current_url_or_blank(&self) -> String {
        self.driver.current_url().await.unwrap_or_default()
    }

    async fn scroll_into_view(&self, element: &ElementRef) -> Result<(), CheckError> {
        match self.driver.scroll_into_view(element).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                debug!(error = %e, "Unable to scroll element into view; continuing anyway");
                Ok(())
            }
        }
    }

    /// Direct click, then a scripted click; element-level failures of the
    /// fallback are logged since the page may already have moved on
    async fn click_with_fallback(&self, element: &ElementRef, what: &str) -> Result<(), CheckError> {
        match self.driver.click(element).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => debug!(element = what, error = %e, "Direct click failed; attempting scripted click"),
        }
        match self.driver.scripted_click(element).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                debug!(element = what, error = %e, "Scripted click also failed");
                Ok(())
            }
        }
    }
}

/// Fatal driver faults stay transport errors; everything else is a retryable load failure
fn page_load_error(url: &str, error: DriverError) -> CheckError {
    if error.is_fatal() {
        CheckError::Transport(error)
    } else {
        CheckError::navigation("page_load", url, error.to_string())
    }
}
