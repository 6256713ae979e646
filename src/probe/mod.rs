//! Availability probe for the consular appointment form
//!
//! Runs once the navigator reports the appointment form:
//!
//! 1. wait for either the busy banner or the date input
//! 2. busy banner shown (and still shown after the re-check window) → `Busy`
//! 3. otherwise open the datepicker and page through up to
//!    `max_calendar_months` months collecting open days
//! 4. parse the labels and sort them against the held appointment and the
//!    target window
//!
//! The probe only reads the page. Busy streaks, backoff and notifications are
//! the orchestrator's business.

mod dates;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub use dates::{
    evaluate_slots, parse_calendar_date, AvailabilitySlot, DateWindow, SlotEvaluation,
    DATE_FORMATS,
};

use crate::driver::ElementRef;
use crate::resolver::ElementResolver;
use crate::selectors::{ElementKey, Selector, SelectorRegistry};
use crate::storage::ArtifactStore;
use crate::utils::error::CheckError;
use crate::utils::normalize_whitespace;

const DEFAULT_BUSY_MESSAGE: &str = "System is busy. Please try again later.";

/// Probe tuning
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub current_appointment: NaiveDate,
    pub window: DateWindow,
    pub max_calendar_months: u32,
    /// Second look at the busy banner before trusting it; zero disables
    pub busy_recheck: Duration,
    pub widget_wait: Duration,
    pub date_input_wait: Duration,
    pub time_select_wait: Duration,
    pub settle: Duration,
}

impl ProbeConfig {
    pub fn new(current_appointment: NaiveDate, window: DateWindow) -> Self {
        Self {
            current_appointment,
            window,
            max_calendar_months: 3,
            busy_recheck: Duration::from_secs(2),
            widget_wait: Duration::from_secs(20),
            date_input_wait: Duration::from_secs(5),
            time_select_wait: Duration::from_secs(3),
            settle: Duration::from_millis(500),
        }
    }
}

/// What the calendar showed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub date_input_found: bool,
    /// Value already in the date input when the form loaded
    pub prefilled: Option<String>,
    pub slots: Vec<AvailabilitySlot>,
    pub evaluation: SlotEvaluation,
    /// Appointment-time options for the selected date, if loaded
    pub times: Vec<String>,
}

impl ProbeReport {
    /// Sorted dates that beat the held appointment inside the window
    pub fn earlier_dates(&self) -> &[NaiveDate] {
        &self.evaluation.earlier
    }
}

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Neither the busy banner nor the date input appeared
    Inconclusive { reason: String },
    /// The consulate calendar reported itself busy
    Busy { message: String },
    /// The calendar was reachable (it may still have no open days)
    Open(ProbeReport),
}

impl ProbeOutcome {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Inconclusive { .. } => "inconclusive",
            Self::Busy { .. } => "busy",
            Self::Open(report) if report.evaluation.has_earlier() => "available",
            Self::Open(_) => "no_slots",
        }
    }
}

pub struct AvailabilityProbe {
    selectors: Arc<SelectorRegistry>,
    artifacts: Arc<ArtifactStore>,
    config: ProbeConfig,
}

impl AvailabilityProbe {
    pub fn new(
        selectors: Arc<SelectorRegistry>,
        artifacts: Arc<ArtifactStore>,
        config: ProbeConfig,
    ) -> Self {
        Self {
            selectors,
            artifacts,
            config,
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub async fn probe(&self, resolver: &ElementResolver) -> Result<ProbeOutcome, CheckError> {
        let driver = resolver.driver().clone();
        let busy_set = self.selectors.get(ElementKey::ConsulateBusy);
        let input_set = self.selectors.get(ElementKey::ConsulateDateInput);

        if resolver
            .wait_for_any(&[busy_set, input_set], self.config.widget_wait)
            .await?
            .is_none()
        {
            let reason = "Consular appointment widgets did not load within the expected time window";
            info!(reason, "Probe inconclusive");
            return Ok(ProbeOutcome::Inconclusive {
                reason: reason.to_string(),
            });
        }

        if let Some(message) = self.busy_message(resolver).await? {
            info!(message = %message, "Consular calendar message");
            self.artifacts
                .capture_best_effort(driver.as_ref(), "consulate_busy")
                .await;
            return Ok(ProbeOutcome::Busy { message });
        }

        let mut report = ProbeReport::default();
        let Some(date_input) = resolver
            .resolve(input_set, self.config.date_input_wait, false)
            .await?
        else {
            info!("Consular date input field not found; cannot probe availability");
            return Ok(ProbeOutcome::Open(report));
        };
        report.date_input_found = true;

        driver.scroll_into_view(&date_input).await.ok();
        report.prefilled = driver
            .attribute(&date_input, "value")
            .await?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        if let Some(value) = &report.prefilled {
            info!(date = %value, "Current appointment date pre-filled on form");
        }

        self.open_datepicker(resolver, &date_input).await?;
        tokio::time::sleep(self.config.settle).await;

        report.slots = self
            .collect_open_days(resolver)
            .await?
            .into_iter()
            .map(AvailabilitySlot::from_label)
            .collect();
        if report.slots.is_empty() {
            info!("No selectable appointment dates found in the scanned calendar window");
        } else {
            let labels: Vec<&str> = report.slots.iter().map(|s| s.label.as_str()).collect();
            info!(dates = %labels.join(", "), "Discovered available appointment dates");
        }

        report.evaluation = evaluate_slots(
            &report.slots,
            self.config.current_appointment,
            self.config.window,
        );
        log_evaluation(&report.evaluation);

        report.times = self.appointment_times(resolver).await?;
        if !report.times.is_empty() {
            info!(times = %report.times.join(", "), "Available appointment times for selected date");
        }

        Ok(ProbeOutcome::Open(report))
    }

    /// Banner text when the busy indicator is shown, confirmed after the re-check window
    async fn busy_message(&self, resolver: &ElementResolver) -> Result<Option<String>, CheckError> {
        if self.visible_busy_banner(resolver).await?.is_none() {
            return Ok(None);
        }
        if !self.config.busy_recheck.is_zero() {
            tokio::time::sleep(self.config.busy_recheck).await;
        }
        let Some(banner) = self.visible_busy_banner(resolver).await? else {
            info!("Busy banner cleared on re-check; continuing with calendar");
            return Ok(None);
        };

        let text = normalize_whitespace(&resolver.driver().text(&banner).await?);
        Ok(Some(if text.is_empty() {
            DEFAULT_BUSY_MESSAGE.to_string()
        } else {
            text
        }))
    }

    async fn visible_busy_banner(
        &self,
        resolver: &ElementResolver,
    ) -> Result<Option<ElementRef>, CheckError> {
        let set = self.selectors.get(ElementKey::ConsulateBusy);
        let Some(banner) = resolver.first_visible(set).await? else {
            return Ok(None);
        };
        let display = resolver.driver().css_value(&banner, "display").await?;
        Ok((display.trim() != "none").then_some(banner))
    }

    /// Direct click, then the calendar icon, then a scripted click
    async fn open_datepicker(
        &self,
        resolver: &ElementResolver,
        date_input: &ElementRef,
    ) -> Result<(), CheckError> {
        let driver = resolver.driver();
        match driver.click(date_input).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => debug!(error = %e, "Date input click failed; trying calendar icon"),
        }

        let icon_set = self.selectors.get(ElementKey::ConsulateDateIcon);
        if let Some(icon) = resolver.first_visible(icon_set).await? {
            match driver.click(&icon).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => debug!(error = %e, "Calendar icon click failed"),
            }
        }

        match driver.scripted_click(date_input).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                debug!(error = %e, "Scripted date input click failed");
                Ok(())
            }
        }
    }

    /// `"<month title> <day>"` labels for every enabled day, paging forward
    async fn collect_open_days(&self, resolver: &ElementResolver) -> Result<Vec<String>, CheckError> {
        let driver = resolver.driver();
        let container_set = self.selectors.get(ElementKey::DatepickerContainer);
        let title_set = self.selectors.get(ElementKey::DatepickerTitle);
        let day_set = self.selectors.get(ElementKey::DatepickerDay);
        let next_set = self.selectors.get(ElementKey::DatepickerNext);

        let mut labels = Vec::new();
        let Some(mut calendar) = resolver.first_visible(container_set).await? else {
            info!("Calendar widget did not open; assuming no selectable dates available");
            return Ok(labels);
        };

        let months = self.config.max_calendar_months.max(1);
        for month_index in 0..months {
            if !driver.is_displayed(&calendar).await? {
                break;
            }

            let month_label = match resolver.children(&calendar, title_set).await?.first() {
                Some(title) => normalize_whitespace(&driver.text(title).await?),
                None => format!("Month {}", month_index + 1),
            };

            for day in resolver.children(&calendar, day_set).await? {
                let day_text = normalize_whitespace(&driver.text(&day).await?);
                if !day_text.is_empty() {
                    labels.push(format!("{month_label} {day_text}"));
                }
            }

            let next = resolver.children(&calendar, next_set).await?;
            let Some(next) = next.first() else {
                break;
            };
            if month_index + 1 == months {
                break;
            }
            if let Err(e) = driver.click(next).await {
                if e.is_fatal() {
                    return Err(e.into());
                }
                debug!(error = %e, "Failed to advance to next month in calendar");
                break;
            }

            tokio::time::sleep(self.config.settle).await;
            match resolver.first_visible(container_set).await? {
                Some(refreshed) => calendar = refreshed,
                None => break,
            }
        }
        Ok(labels)
    }

    /// Labels of time options that carry a value
    async fn appointment_times(&self, resolver: &ElementResolver) -> Result<Vec<String>, CheckError> {
        let driver = resolver.driver();
        let set = self.selectors.get(ElementKey::ConsulateTime);
        let Some(select) = resolver
            .resolve(set, self.config.time_select_wait, false)
            .await?
        else {
            return Ok(Vec::new());
        };

        let mut times = Vec::new();
        for option in driver
            .find_child_elements(&select, &Selector::tag("option"))
            .await?
        {
            let has_value = driver
                .attribute(&option, "value")
                .await?
                .is_some_and(|v| !v.trim().is_empty());
            if has_value {
                let label = normalize_whitespace(&driver.text(&option).await?);
                if !label.is_empty() {
                    times.push(label);
                }
            }
        }
        if times.is_empty() {
            debug!("No appointment times loaded yet");
        }
        Ok(times)
    }
}

fn log_evaluation(evaluation: &SlotEvaluation) {
    let join = |dates: &[NaiveDate]| {
        dates
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    if evaluation.has_earlier() {
        info!(dates = %join(&evaluation.earlier), "Earlier appointment dates inside the target window");
    }
    if !evaluation.in_window_not_earlier.is_empty() {
        info!(
            dates = %join(&evaluation.in_window_not_earlier),
            "Open dates inside the window but not earlier than the current appointment"
        );
    }
    if !evaluation.outside_window.is_empty() {
        debug!(dates = %join(&evaluation.outside_window), "Open dates outside the target window");
    }
    if !evaluation.unparseable.is_empty() {
        debug!(labels = ?evaluation.unparseable, "Skipped unparseable calendar labels");
    }
}
