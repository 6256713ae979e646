//! Sign-in form handling

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::Navigator;
use crate::driver::ElementRef;
use crate::selectors::ElementKey;
use crate::utils::error::{AuthFailure, CheckError};
use crate::utils::normalize_whitespace;

/// URL fragments that mean the sign-in went through
const SIGNED_IN_MARKERS: &[&str] = &["dashboard", "schedule", "groups"];

impl Navigator {
    /// Fill and submit the sign-in form, then wait for the redirect
    pub(super) async fn complete_login(&self) -> Result<(), CheckError> {
        info!("Attempting to complete login workflow");
        let waits = &self.config.waits;

        let email = self.require(ElementKey::Email, waits.email_field, false).await?;
        self.enter_text(&email, &self.config.credentials.email).await?;
        info!("Entered email address");

        let password = self
            .require(ElementKey::Password, waits.password_field, false)
            .await?;
        self.enter_text(&password, &self.config.credentials.password)
            .await?;
        info!("Entered password");

        let sign_in = self
            .require(ElementKey::SignIn, waits.sign_in_button, true)
            .await?;
        self.accept_privacy_policy().await?;

        info!("Clicking sign in button");
        if let Err(e) = self.driver.click(&sign_in).await {
            if e.is_fatal() {
                return Err(e.into());
            }
            debug!(error = %e, "Sign-in click failed; attempting scripted click");
            self.driver.scripted_click(&sign_in).await?;
        }

        self.guard.check(self.driver.as_ref()).await?;
        self.await_login_transition().await
    }

    /// Resolve a control or fail the cycle with `ElementMissing`
    async fn require(
        &self,
        key: ElementKey,
        wait: std::time::Duration,
        clickable: bool,
    ) -> Result<ElementRef, CheckError> {
        let set = self.selectors.get(key);
        match self.resolver.resolve(set, wait, clickable).await? {
            Some(element) => {
                self.scroll_into_view(&element).await?;
                Ok(element)
            }
            None => {
                let url = self.current_url_or_blank().await;
                Err(CheckError::element_missing(key.description(), url))
            }
        }
    }

    async fn enter_text(&self, element: &ElementRef, value: &str) -> Result<(), CheckError> {
        if let Err(e) = self.driver.clear(element).await {
            if e.is_fatal() {
                return Err(e.into());
            }
        }
        self.driver.send_keys(element, value).await?;
        Ok(())
    }

    /// Tick the privacy-policy checkbox, falling back to its label
    async fn accept_privacy_policy(&self) -> Result<(), CheckError> {
        let waits = &self.config.waits;
        let checkbox_set = self.selectors.get(ElementKey::PrivacyCheckbox);

        let Some(checkbox) = self
            .resolver
            .resolve(checkbox_set, waits.privacy_checkbox, false)
            .await?
        else {
            let label_set = self.selectors.get(ElementKey::PrivacyLabel);
            let Some(label) = self
                .resolver
                .resolve(label_set, waits.privacy_label, false)
                .await?
            else {
                debug!("Privacy policy checkbox not found; continuing without explicit confirmation");
                return Ok(());
            };
            self.scroll_into_view(&label).await?;
            self.click_with_fallback(&label, "privacy label").await?;
            info!("Accepted privacy policy via label click");
            return Ok(());
        };

        if self.driver.is_selected(&checkbox).await? {
            debug!("Privacy policy checkbox already selected");
            return Ok(());
        }

        self.scroll_into_view(&checkbox).await?;
        self.click_with_fallback(&checkbox, "privacy checkbox").await?;
        info!("Privacy policy checkbox selected");
        Ok(())
    }

    /// Poll until the browser leaves the sign-in page or an alert shows up
    async fn await_login_transition(&self) -> Result<(), CheckError> {
        let deadline = Instant::now() + self.config.waits.login_transition;
        loop {
            let url = self.driver.current_url().await?.to_lowercase();
            if SIGNED_IN_MARKERS.iter().any(|marker| url.contains(marker)) || !url.contains("sign_in") {
                break;
            }
            if !self.visible_alerts().await?.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                warn!("Login transition timed out; continuing with best effort");
                break;
            }
            tokio::time::sleep(self.config.waits.poll).await;
        }

        if self.on_sign_in().await? {
            let alerts = self.visible_alerts().await?;
            for alert in &alerts {
                error!(alert = %alert, "Page alert");
            }
            let failure = AuthFailure::from_alerts(alerts.join(" | "));
            if matches!(failure, AuthFailure::RateLimited { .. }) {
                warn!("Sign-in page reports rate limiting or a session conflict");
            }
            return Err(CheckError::Auth(failure));
        }

        let url = self.current_url_or_blank().await;
        info!(url = %url, "Login flow appears successful");
        Ok(())
    }

    /// Text of every displayed, non-empty alert on the page
    async fn visible_alerts(&self) -> Result<Vec<String>, CheckError> {
        self.driver.switch_to_default().await?;
        let mut alerts = Vec::new();
        for selector in self.selectors.get(ElementKey::Alert) {
            let found = match self.driver.find_elements(selector).await {
                Ok(found) => found,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(_) => continue,
            };
            for alert in found {
                let text = match self.driver.is_displayed(&alert).await {
                    Ok(true) => self.driver.text(&alert).await,
                    Ok(false) => continue,
                    Err(e) => Err(e),
                };
                match text {
                    Ok(text) => {
                        let text = normalize_whitespace(&text);
                        if !text.is_empty() && !alerts.contains(&text) {
                            alerts.push(text);
                        }
                    }
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(_) => {}
                }
            }
        }
        Ok(alerts)
    }
}
