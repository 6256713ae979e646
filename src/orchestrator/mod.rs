//! One check cycle, end to end
//!
//! ```text
//!  run_one_cycle()
//!     │
//!     ├─ SessionHandle::ensure ── new session? ── fresh Navigator
//!     ├─ Navigator::reach_appointment_form ─┐
//!     ├─ AvailabilityProbe::probe ──────────┤ CheckError
//!     │        │                            ▼
//!     │        │                     handle_error
//!     │        ▼                       artifact, backoff, deduped notice,
//!     │   handle_outcome               session reset
//!     │     busy → scheduler.record_busy
//!     │     open → scheduler.record_available, availability notice
//!     │
//!     └─ post_check
//!          heartbeat, success history, backoff clear, artifact pruning,
//!          scheduled restart, pattern log, metrics, stats
//! ```
//!
//! Every per-cycle failure is absorbed here. Only a terminal failure (a
//! challenge page with `abort_on_captcha`) comes back as `Err`.

mod session;
mod status;

pub use session::SessionHandle;
pub use status::{CheckerStats, SharedStats, StatusReporter, RECENT_OUTCOMES};

use chrono::{Local, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::captcha::CaptchaGuard;
use crate::config::Settings;
use crate::driver::DriverFactory;
use crate::error::Error;
use crate::metrics;
use crate::navigation::{NavigationConfig, Navigator};
use crate::notifications::{AvailabilityGate, ErrorGate, Notification, Notifier};
use crate::probe::{AvailabilityProbe, ProbeOutcome};
use crate::scheduler::{AdaptiveScheduler, SleepPlan};
use crate::selectors::{ElementKey, SelectorRegistry};
use crate::storage::{ArtifactStore, Heartbeat, HeartbeatStatus, PatternEvent, PatternKind, PatternLog};
use crate::utils::error::CheckError;

/// Artifacts are pruned every this many cycles
pub const ARTIFACT_PRUNE_INTERVAL: u64 = 10;

/// Rate-limited sign-ins back off at least this long, in minutes
pub const RATE_LIMIT_BACKOFF_MINUTES: u64 = 15;

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Earlier dates inside the window were found
    Available { earliest: NaiveDate, count: usize },
    /// The calendar loaded but nothing beats the held appointment
    NoSlots,
    Busy,
    Inconclusive,
    /// A challenge page stopped the cycle
    Blocked,
    Failed,
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Available { .. } => "available",
            Self::NoSlots => "no_slots",
            Self::Busy => "busy",
            Self::Inconclusive => "inconclusive",
            Self::Blocked => "captcha",
            Self::Failed => "error",
        }
    }

    /// The calendar answered without a busy banner
    pub fn reached_calendar(&self) -> bool {
        matches!(self, Self::Available { .. } | Self::NoSlots)
    }

    fn pattern_kind(&self) -> PatternKind {
        match self {
            Self::Available { .. } => PatternKind::Available,
            Self::NoSlots => PatternKind::NoSlots,
            Self::Busy => PatternKind::Busy,
            Self::Inconclusive => PatternKind::Inconclusive,
            Self::Blocked => PatternKind::Captcha,
            Self::Failed => PatternKind::Error,
        }
    }
}

/// Summary of one cycle, fed to the scheduler and the stats
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    /// The cycle completed without a [`CheckError`]
    pub success: bool,
    pub captcha_blocked: bool,
    /// `{Kind}:{message}` of the failure, used for notification dedup
    pub error_signature: Option<String>,
    pub outcome: CycleOutcome,
    /// A notification went out during this cycle
    pub notified: bool,
}

impl CheckResult {
    fn completed(outcome: CycleOutcome, notified: bool) -> Self {
        Self {
            success: true,
            captcha_blocked: false,
            error_signature: None,
            outcome,
            notified,
        }
    }
}

/// Drives navigation, probing, scheduling and notifications for one account
pub struct CheckOrchestrator {
    session: SessionHandle,
    navigator: Option<Navigator>,
    navigation: Arc<NavigationConfig>,
    selectors: Arc<SelectorRegistry>,
    guard: Arc<CaptchaGuard>,
    artifacts: Arc<ArtifactStore>,
    probe: AvailabilityProbe,
    scheduler: AdaptiveScheduler,
    notifier: Notifier,
    error_gate: ErrorGate,
    availability_gate: AvailabilityGate,
    heartbeat: Option<Heartbeat>,
    patterns: Option<PatternLog>,
    stats: SharedStats,
    rng: StdRng,
    /// Cycles run over the whole process; session resets do not touch it
    cycles: u64,
    restart_threshold: u32,
    auto_book: bool,
}

impl CheckOrchestrator {
    pub fn new(
        settings: &Settings,
        factory: Arc<dyn DriverFactory>,
        notifier: Notifier,
    ) -> Result<Self, Error> {
        let selectors = Arc::new(SelectorRegistry::load(settings.selectors_path.as_deref())?);
        let artifacts = Arc::new(ArtifactStore::new(
            settings.artifacts_dir.clone(),
            settings.artifact_retention,
        ));
        let guard = Arc::new(CaptchaGuard::new(
            selectors.get(ElementKey::CaptchaWidget).clone(),
            settings.abort_on_captcha,
            artifacts.clone(),
        ));
        let probe =
            AvailabilityProbe::new(selectors.clone(), artifacts.clone(), settings.probe_config());

        Ok(Self {
            session: SessionHandle::new(factory),
            navigator: None,
            navigation: Arc::new(settings.navigation_config()),
            selectors,
            guard,
            artifacts,
            probe,
            scheduler: AdaptiveScheduler::new(settings.scheduler_config()),
            notifier,
            error_gate: ErrorGate::default(),
            availability_gate: AvailabilityGate::default(),
            heartbeat: settings.heartbeat_path.clone().map(Heartbeat::new),
            patterns: settings
                .pattern_learning
                .then(|| PatternLog::new(settings.pattern_log_path.clone(), settings.pattern_max_events)),
            stats: Arc::new(RwLock::new(CheckerStats::default())),
            rng: StdRng::from_entropy(),
            cycles: 0,
            restart_threshold: settings.driver_restart_checks.max(1),
            auto_book: settings.auto_book,
        })
    }

    /// Deterministic random draws for backoff windows and jitter
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn scheduler(&self) -> &AdaptiveScheduler {
        &self.scheduler
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn stats(&self) -> SharedStats {
        self.stats.clone()
    }

    /// Run navigation and the probe once, then do the bookkeeping
    pub async fn run_one_cycle(&mut self) -> Result<CheckResult, Error> {
        let started = Instant::now();

        let (result, terminal) = match self.attempt_check().await {
            Ok(outcome) => (self.handle_outcome(outcome).await, None),
            Err(error) => {
                let result = self.handle_error(&error).await;
                (result, error.is_terminal().then_some(error))
            }
        };

        self.post_check(&result).await;
        metrics::record_cycle(result.outcome.label(), started.elapsed().as_secs_f64());

        match terminal {
            Some(error) => Err(error.into()),
            None => Ok(result),
        }
    }

    /// Sleep before the next cycle, drawn with the orchestrator's jitter source
    pub fn next_sleep(&mut self) -> SleepPlan {
        self.scheduler
            .next_sleep(Local::now().naive_local(), &mut self.rng)
    }

    /// Close the browser session
    pub async fn shutdown(&mut self) {
        self.navigator = None;
        self.session.quit().await;
    }

    async fn attempt_check(&mut self) -> Result<ProbeOutcome, CheckError> {
        let (driver, fresh) = self.session.ensure().await?;

        // A new session starts with an empty validation cache
        let mut navigator = match self.navigator.take() {
            Some(navigator) if !fresh => navigator,
            _ => Navigator::new(
                driver,
                self.selectors.clone(),
                self.guard.clone(),
                self.artifacts.clone(),
                self.navigation.clone(),
            ),
        };

        let result = match navigator.reach_appointment_form().await {
            Ok(state) => {
                debug!(started_in = %state, "On appointment form");
                self.probe.probe(navigator.resolver()).await
            }
            Err(e) => Err(e),
        };
        self.navigator = Some(navigator);
        result
    }

    async fn handle_outcome(&mut self, outcome: ProbeOutcome) -> CheckResult {
        let now = Local::now().naive_local();

        match outcome {
            ProbeOutcome::Busy { message } => {
                let backoff = self.scheduler.record_busy(now, &mut self.rng);
                warn!(
                    message = %message,
                    streak = self.scheduler.busy_streak(),
                    backoff_minutes = backoff.delay_minutes,
                    "Consulate calendar is busy"
                );
                CheckResult::completed(CycleOutcome::Busy, false)
            }
            ProbeOutcome::Inconclusive { reason } => {
                warn!(reason = %reason, "Availability check inconclusive");
                CheckResult::completed(CycleOutcome::Inconclusive, false)
            }
            ProbeOutcome::Open(report) => {
                self.scheduler.record_available();
                let earlier = report.earlier_dates();
                metrics::record_earlier_dates(earlier.len());

                let notification = Notification::availability(
                    earlier,
                    self.probe.config().current_appointment,
                    &self.navigation.location,
                );
                let (Some(&earliest), Some(notification)) = (earlier.first(), notification) else {
                    self.availability_gate.clear();
                    info!("No earlier appointment dates in the requested window");
                    return CheckResult::completed(CycleOutcome::NoSlots, false);
                };

                info!(
                    earliest = %earliest,
                    count = earlier.len(),
                    "Earlier appointment dates available"
                );
                let notified = self
                    .availability_gate
                    .notify(&self.notifier, earlier, &notification)
                    .await;
                if self.auto_book {
                    warn!("Auto-book is enabled but booking is never automated; reschedule manually");
                }
                CheckResult::completed(
                    CycleOutcome::Available {
                        earliest,
                        count: earlier.len(),
                    },
                    notified,
                )
            }
        }
    }

    async fn handle_error(&mut self, error: &CheckError) -> CheckResult {
        let signature = error.signature();
        let now = Local::now().naive_local();
        warn!(kind = error.kind(), error = %error, "Check failed");

        // The guard already saved the challenge page
        let attachment = match (error.is_blocked(), self.session.driver().cloned()) {
            (false, Some(driver)) => {
                let label = format!("error_{}", error.kind().to_lowercase());
                self.artifacts
                    .capture_best_effort(driver.as_ref(), &label)
                    .await
                    .and_then(|paths| paths.png)
            }
            _ => None,
        };

        if error.is_blocked() {
            self.scheduler.schedule_busy_backoff(now, &mut self.rng);
        } else if error.is_rate_limited() {
            let minutes = ((self.scheduler.base_frequency() * 3.0) as u64)
                .max(RATE_LIMIT_BACKOFF_MINUTES);
            let until = self.scheduler.extend_backoff(now, minutes);
            warn!(
                minutes,
                until = %until.format("%H:%M:%S"),
                "Login rate limiting detected, scheduling backoff"
            );
        }

        let mut notification = Notification::error(error.to_string());
        if let Some(png) = attachment {
            notification = notification.with_attachment(png);
        }
        let notified = self
            .error_gate
            .notify(&self.notifier, &signature, &notification, Utc::now())
            .await;

        self.reset_session("error").await;

        CheckResult {
            success: false,
            captcha_blocked: error.is_blocked(),
            error_signature: Some(signature),
            outcome: if error.is_blocked() {
                CycleOutcome::Blocked
            } else {
                CycleOutcome::Failed
            },
            notified,
        }
    }

    async fn post_check(&mut self, result: &CheckResult) {
        self.cycles += 1;
        let checks = self.session.record_check();

        if let Some(heartbeat) = &self.heartbeat {
            let status = if result.success {
                HeartbeatStatus::Success
            } else {
                HeartbeatStatus::Failure
            };
            if let Err(e) = heartbeat.write(status).await {
                warn!(path = %heartbeat.path().display(), error = %e, "Failed to write heartbeat");
            }
        }

        self.scheduler.record_result(result.success);
        if result.outcome.reached_calendar() {
            self.scheduler.clear_backoff();
        }

        if self.cycles % ARTIFACT_PRUNE_INTERVAL == 0 {
            match self.artifacts.prune() {
                Ok(removed) if removed > 0 => debug!(removed, "Pruned old artifacts"),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Artifact cleanup failed"),
            }
        }

        if checks >= self.restart_threshold {
            info!(
                checks,
                "Restarting browser session to mitigate resource usage"
            );
            self.reset_session("scheduled").await;
        }

        if let Some(patterns) = &self.patterns {
            let event = PatternEvent::at(Local::now(), result.outcome.pattern_kind());
            if let Err(e) = patterns.record(&event) {
                debug!(error = %e, "Failed to record pattern event");
            }
        }

        let now = Local::now().naive_local();
        metrics::update_scheduler_state(
            self.scheduler.busy_streak(),
            self.scheduler.adaptive_frequency(),
            self.scheduler.backoff().is_active(now),
        );

        let mut stats = self.stats.write().await;
        stats.checks += 1;
        if result.success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
        match result.outcome {
            CycleOutcome::Busy => stats.busy += 1,
            CycleOutcome::Blocked => stats.captcha_blocks += 1,
            _ => {}
        }
        if result.notified {
            if result.outcome.reached_calendar() {
                stats.availability_notifications += 1;
            } else {
                stats.error_notifications += 1;
            }
        }
        stats.last_check = Some(Utc::now());
        let line = format!(
            "#{} {} {}{}",
            stats.checks,
            Local::now().format("%H:%M:%S"),
            result.outcome.label(),
            result
                .error_signature
                .as_deref()
                .map(|s| format!(" ({s})"))
                .unwrap_or_default()
        );
        stats.push_recent(line);
    }

    async fn reset_session(&mut self, reason: &str) {
        self.navigator = None;
        if self.session.is_active() {
            self.stats.write().await.session_restarts += 1;
        }
        self.session.reset(reason).await;
    }
}
