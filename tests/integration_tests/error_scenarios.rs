//! Error scenario integration tests
//!
//! Failure modes of a check cycle and how the checker recovers:
//! 1. Rejected credentials and error notification dedup
//! 2. Rate-limited sign-in
//! 3. Challenge pages, with and without abort
//! 4. Unreachable appointment form
//! 5. A crashed browser session

use chrono::Local;
use slotwatch::driver::{ClickAction, FakeElement, FakePage};
use slotwatch::notifications::NotificationKind;
use slotwatch::orchestrator::CycleOutcome;
use slotwatch::scheduler::SleepSource;
use slotwatch::selectors::Selector;
use slotwatch::storage::{Heartbeat, HeartbeatStatus};
use tempfile::TempDir;

use super::fixtures::{
    appointment_page, calendar, consulate_site, files_ending_with, orchestrator,
    rejecting_sign_in_page, settings, settings_with, sign_in_page, url, Recorder,
};

// ============================================================================
// Sign-in failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_identical_login_failures_notify_once() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let browser = consulate_site(appointment_page(calendar("November 2026", &["20"])));
    browser.add_page(rejecting_sign_in_page("Invalid email or password."));
    let recorder = Recorder::default();
    let mut checker = orchestrator(&settings, &browser, &recorder);

    let first = checker.run_one_cycle().await.unwrap();
    assert!(!first.success);
    assert!(first.notified);
    assert_eq!(first.outcome, CycleOutcome::Failed);
    let signature = first.error_signature.clone().unwrap();
    assert!(signature.starts_with("LoginFailed:"), "{signature}");
    assert!(signature.contains("Invalid email or password."));

    // The failed session was thrown away
    assert!(!checker.session().is_active());
    assert_eq!(browser.quits(), 1);

    let second = checker.run_one_cycle().await.unwrap();
    assert_eq!(second.error_signature.as_deref(), Some(signature.as_str()));
    assert!(!second.notified);
    assert_eq!(browser.sessions_created(), 2);

    let errors = recorder.of_kind(NotificationKind::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].body.contains("Invalid email or password."));

    // Bad credentials are not rate limiting; no backoff
    assert!(!checker
        .scheduler()
        .backoff()
        .is_active(Local::now().naive_local()));

    let artifacts = dir.path().join("artifacts");
    assert!(!files_ending_with(&artifacts, "_error_loginfailed.html").is_empty());

    let heartbeat = Heartbeat::new(dir.path().join("heartbeat.json")).read().unwrap();
    assert_eq!(heartbeat.status, HeartbeatStatus::Failure);

    let stats = checker.stats();
    let stats = stats.read().await;
    assert_eq!(stats.failures, 2);
    assert_eq!(stats.error_notifications, 1);
    assert_eq!(stats.session_restarts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_login_backs_off() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let browser = consulate_site(appointment_page(calendar("November 2026", &["20"])));
    browser.add_page(rejecting_sign_in_page(
        "You need to sign in or sign up before continuing.",
    ));
    let recorder = Recorder::default();
    let mut checker = orchestrator(&settings, &browser, &recorder);

    let result = checker.run_one_cycle().await.unwrap();
    assert!(!result.success);
    assert!(result
        .error_signature
        .as_deref()
        .is_some_and(|s| s.starts_with("LoginBlocked:")));

    // max(15, 3 × 5) minutes
    let now = Local::now().naive_local();
    let deadline = checker.scheduler().backoff().deadline().unwrap();
    assert!(deadline - now >= chrono::Duration::minutes(14));
    assert!(deadline - now <= chrono::Duration::minutes(15));

    let plan = checker.next_sleep();
    assert_eq!(plan.source, SleepSource::Backoff);
    assert!(plan.duration.as_secs() >= 14 * 60);
}

#[tokio::test(start_paused = true)]
async fn test_artifacts_pruned_while_every_cycle_fails() {
    let dir = TempDir::new().unwrap();
    let settings = settings_with(dir.path(), |config| {
        config.storage.artifact_retention = 2;
    });
    let browser = consulate_site(appointment_page(calendar("November 2026", &["20"])));
    browser.add_page(rejecting_sign_in_page("Invalid email or password."));
    let recorder = Recorder::default();
    let mut checker = orchestrator(&settings, &browser, &recorder);
    let artifacts = dir.path().join("artifacts");

    for _ in 0..9 {
        assert!(!checker.run_one_cycle().await.unwrap().success);
    }
    // Every failure left a snapshot and restarted the session count
    assert!(files_ending_with(&artifacts, ".html").len() >= 9);
    assert_eq!(checker.session().checks_since_restart(), 1);

    // The tenth cycle prunes despite the resets
    checker.run_one_cycle().await.unwrap();
    assert_eq!(files_ending_with(&artifacts, ".html").len(), 2);
    assert!(files_ending_with(&artifacts, ".png").len() <= 2);
}

// ============================================================================
// Challenge pages
// ============================================================================

fn challenged_sign_in() -> FakePage {
    sign_in_page(ClickAction::SignIn(url("groups/42")))
        .element(FakeElement::new("widget", "div").matches(Selector::css(".g-recaptcha")))
}

#[tokio::test(start_paused = true)]
async fn test_captcha_backs_off_and_keeps_running() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let browser = consulate_site(appointment_page(calendar("November 2026", &["20"])));
    browser.add_page(challenged_sign_in());
    let recorder = Recorder::default();
    let mut checker = orchestrator(&settings, &browser, &recorder);

    let result = checker.run_one_cycle().await.unwrap();
    assert!(!result.success);
    assert!(result.captcha_blocked);
    assert_eq!(result.outcome, CycleOutcome::Blocked);
    assert_eq!(result.outcome.label(), "captcha");
    assert!(result.notified);

    // Never typed into a challenged page
    assert!(browser.typed("email").is_none());

    let scheduler = checker.scheduler();
    assert!(scheduler.backoff().is_active(Local::now().naive_local()));
    // Backs off like a busy calendar without counting as one
    assert_eq!(scheduler.busy_streak(), 0);

    let artifacts = dir.path().join("artifacts");
    assert!(!files_ending_with(&artifacts, "_captcha_detected.html").is_empty());
    assert!(files_ending_with(&artifacts, "_error_blocked.html").is_empty());

    assert_eq!(checker.stats().read().await.captcha_blocks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_captcha_with_abort_is_terminal() {
    let dir = TempDir::new().unwrap();
    let settings = settings_with(dir.path(), |config| {
        config.browser.abort_on_captcha = true;
    });
    let browser = consulate_site(appointment_page(calendar("November 2026", &["20"])));
    browser.add_page(challenged_sign_in());
    let recorder = Recorder::default();
    let mut checker = orchestrator(&settings, &browser, &recorder);

    let err = checker.run_one_cycle().await.unwrap_err();
    assert!(err.is_terminal());
    assert!(err.to_string().contains("manual solve required"));

    // Bookkeeping still ran for the failed cycle
    assert_eq!(checker.stats().read().await.checks, 1);
    assert_eq!(recorder.of_kind(NotificationKind::Error).len(), 1);
    assert_eq!(browser.quits(), 1);
}

// ============================================================================
// Navigation and driver failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unreachable_form_fails_cycle() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let browser = consulate_site(appointment_page(calendar("November 2026", &["20"])));
    for path in ["schedule", "appointment", "", "schedule/77/appointment"] {
        browser.fail_loads(&url(path), 100);
    }
    let recorder = Recorder::default();
    let mut checker = orchestrator(&settings, &browser, &recorder);

    let result = checker.run_one_cycle().await.unwrap();
    assert!(!result.success);
    assert!(result
        .error_signature
        .as_deref()
        .is_some_and(|s| s.starts_with("NavigationError:")));
    assert!(result.notified);

    let artifacts = dir.path().join("artifacts");
    assert!(!files_ending_with(&artifacts, "_navigation_failure.html").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_crashed_session_is_replaced() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let browser = consulate_site(appointment_page(calendar("November 2026", &["20"])));
    let recorder = Recorder::default();
    let mut checker = orchestrator(&settings, &browser, &recorder);

    assert!(checker.run_one_cycle().await.unwrap().success);

    browser.kill_session();
    let crashed = checker.run_one_cycle().await.unwrap();
    assert!(!crashed.success);
    assert!(crashed
        .error_signature
        .as_deref()
        .is_some_and(|s| s.starts_with("DriverError:")));
    assert!(!checker.session().is_active());

    let recovered = checker.run_one_cycle().await.unwrap();
    assert!(recovered.success);
    assert_eq!(browser.sessions_created(), 2);
}
