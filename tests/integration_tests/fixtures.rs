//! Test fixtures for integration tests
//!
//! A scripted consulate site on top of [`FakeBrowser`], validated settings
//! pointing at it, and a notification channel that records what it was given.

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};

use slotwatch::config::{Config, Settings};
use slotwatch::driver::{ClickAction, FakeBrowser, FakeElement, FakePage};
use slotwatch::notifications::{
    Channel, ChannelResult, DeliveryStatus, Notification, NotificationKind, Notifier,
};
use slotwatch::orchestrator::CheckOrchestrator;
use slotwatch::selectors::{ElementKey, Selector, SelectorRegistry};

pub const ROOT: &str = "https://visa.test/en-ca/niv";

/// Held appointment is 2026-12-15, window 2026-10-01..=2026-12-31
const SETTINGS_TOML: &str = r#"
[account]
email = "applicant@example.com"
password = "hunter22"

[search]
current_appointment = "2026-12-15"
location = "Toronto"
start_date = "2026-10-01"
end_date = "2026-12-31"
busy_recheck_secs = 0

[schedule]
frequency_minutes = 5
jitter_seconds = 0
driver_restart_checks = 50

[retry]
max_attempts = 2
backoff_seconds = 1

[site]
base_url = "https://visa.test"
locale = "en-ca"
"#;

pub fn url(path: &str) -> String {
    format!("{ROOT}/{path}")
}

fn first(key: ElementKey) -> Selector {
    SelectorRegistry::default().get(key).first().clone()
}

/// Settings for the fake site, with every file written under `dir`
pub fn settings(dir: &Path) -> Settings {
    settings_with(dir, |_| {})
}

pub fn settings_with(dir: &Path, adjust: impl FnOnce(&mut Config)) -> Settings {
    let mut config: Config = toml::from_str(SETTINGS_TOML).unwrap();
    config.storage.artifacts_dir = dir.join("artifacts");
    config.storage.heartbeat_path = Some(dir.join("heartbeat.json"));
    config.storage.pattern_log_path = dir.join("patterns.jsonl");
    adjust(&mut config);
    config.validate().unwrap()
}

// ============================================================================
// Notifications
// ============================================================================

/// Channel that keeps every notification it receives
#[derive(Clone, Default)]
pub struct Recorder {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl Recorder {
    pub fn notifier(&self) -> Notifier {
        let mut notifier = Notifier::new();
        notifier.add_channel(Box::new(self.clone()));
        notifier
    }

    pub fn of_kind(&self, kind: NotificationKind) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Channel for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn send(&self, notification: &Notification) -> ChannelResult<DeliveryStatus> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(DeliveryStatus::success("recorder"))
    }
}

// ============================================================================
// Fake consulate site
// ============================================================================

pub fn sign_in_page(on_submit: ClickAction) -> FakePage {
    FakePage::new(url("users/sign_in"))
        .redirect_when_signed_in(url("groups/42"))
        .element(FakeElement::new("email", "input").attr("id", "user_email"))
        .element(
            FakeElement::new("password", "input")
                .attr("id", "user_password")
                .attr("type", "password"),
        )
        .element(
            FakeElement::new("policy", "input")
                .attr("id", "policy_confirmed")
                .attr("type", "checkbox"),
        )
        .element(
            FakeElement::new("submit", "input")
                .attr("name", "commit")
                .on_click(on_submit),
        )
}

/// Sign-in page whose submit shows `alert_text` instead of signing in
pub fn rejecting_sign_in_page(alert_text: &str) -> FakePage {
    sign_in_page(ClickAction::Show("alert".into())).element(
        FakeElement::new("alert", "div")
            .matches(Selector::css(".alert"))
            .text(alert_text)
            .hidden(),
    )
}

/// Date input, a one-month datepicker holding `days` and the time select
pub fn calendar(month: &str, days: &[&str]) -> Vec<FakeElement> {
    let mut picker = FakeElement::new("picker", "div")
        .attr("id", "ui-datepicker-div")
        .child(
            FakeElement::new("title", "div")
                .matches(first(ElementKey::DatepickerTitle))
                .text(month),
        )
        .hidden();
    for day in days {
        picker = picker.child(
            FakeElement::new(format!("day-{day}"), "a")
                .matches(first(ElementKey::DatepickerDay))
                .text(*day),
        );
    }

    vec![
        FakeElement::new("date", "input")
            .attr("id", "appointments_consulate_appointment_date")
            .attr("value", "2026-12-15")
            .on_click(ClickAction::Show("picker".into())),
        picker,
        FakeElement::new("time", "select")
            .attr("id", "appointments_consulate_appointment_time")
            .child(FakeElement::new("t0", "option").text(""))
            .child(FakeElement::new("t1", "option").attr("value", "08:15").text("08:15")),
    ]
}

pub fn busy_banner() -> FakeElement {
    FakeElement::new("busy", "div")
        .attr("id", "consulate_date_time_not_available")
        .text("System is busy. Please try again later.")
}

/// The appointment form with the location dropdown plus `widgets`
pub fn appointment_page(widgets: Vec<FakeElement>) -> FakePage {
    let mut page = FakePage::new(url("schedule/77/appointment"))
        .requires_auth()
        .element(
            FakeElement::new("form", "form")
                .attr("id", "appointment-form")
                .child(
                    FakeElement::new("location", "select")
                        .attr("id", "appointments_consulate_appointment_facility_id")
                        .child(FakeElement::new("loc-calgary", "option").text("Calgary").selected())
                        .child(FakeElement::new("loc-toronto", "option").text("Toronto")),
                ),
        );
    for widget in widgets {
        page = page.element(widget);
    }
    page
}

/// Sign-in → groups → continue_actions → appointment form
pub fn consulate_site(appointment: FakePage) -> FakeBrowser {
    let browser = FakeBrowser::new();
    browser.set_login_url(url("users/sign_in"));
    browser.add_page(sign_in_page(ClickAction::SignIn(url("groups/42"))));
    browser.add_page(
        FakePage::new(url("groups/42")).requires_auth().element(
            FakeElement::new("continue", "a")
                .attr("href", "/en-ca/niv/schedule/77/continue_actions")
                .matches(first(ElementKey::GroupContinue))
                .on_click(ClickAction::Navigate(url("schedule/77/continue_actions"))),
        ),
    );
    browser.add_page(
        FakePage::new(url("schedule"))
            .requires_auth()
            .redirect_when_signed_in(url("schedule/77/continue_actions")),
    );
    browser.add_page(
        FakePage::new(url("schedule/77/continue_actions"))
            .requires_auth()
            .element(
                FakeElement::new("toggle", "a")
                    .matches(first(ElementKey::RescheduleToggle))
                    .on_click(ClickAction::Show("reschedule".into())),
            )
            .element(
                FakeElement::new("reschedule", "a")
                    .attr("href", url("schedule/77/appointment"))
                    .matches(first(ElementKey::RescheduleButton))
                    .hidden(),
            ),
    );
    browser.add_page(appointment);
    browser
}

pub fn orchestrator(settings: &Settings, browser: &FakeBrowser, recorder: &Recorder) -> CheckOrchestrator {
    CheckOrchestrator::new(settings, Arc::new(browser.clone()), recorder.notifier())
        .unwrap()
        .with_seed(7)
}

/// File names in `dir` ending with `suffix`
pub fn files_ending_with(dir: &Path, suffix: &str) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(suffix))
                .collect()
        })
        .unwrap_or_default()
}
