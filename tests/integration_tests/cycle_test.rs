//! Check cycles against the fake consulate site
//!
//! Covers the paths where the calendar is reached:
//! 1. Earlier date found and announced once
//! 2. Busy calendar escalating the backoff
//! 3. Session expiry handled inside the same browser session
//! 4. Scheduled browser restarts

use chrono::{Local, NaiveDate};
use slotwatch::driver::BrowserDriver;
use slotwatch::notifications::NotificationKind;
use slotwatch::orchestrator::CycleOutcome;
use slotwatch::scheduler::SleepSource;
use slotwatch::storage::{Heartbeat, HeartbeatStatus};
use tempfile::TempDir;

use super::fixtures::{
    appointment_page, busy_banner, calendar, consulate_site, orchestrator, settings, settings_with,
    url, Recorder,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ============================================================================
// Availability
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_earlier_date_is_announced_once() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let browser = consulate_site(appointment_page(calendar("November 2026", &["20"])));
    let recorder = Recorder::default();
    let mut checker = orchestrator(&settings, &browser, &recorder);

    let first = checker.run_one_cycle().await.unwrap();
    assert!(first.success);
    assert!(first.notified);
    assert_eq!(
        first.outcome,
        CycleOutcome::Available {
            earliest: date(2026, 11, 20),
            count: 1
        }
    );
    assert!(browser.is_selected_now("loc-toronto"));

    let sent = recorder.of_kind(NotificationKind::Availability);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("2026-11-20"));
    assert!(sent[0].body.contains("Toronto"));

    // Same dates on the next cycle stay quiet
    let second = checker.run_one_cycle().await.unwrap();
    assert!(!second.notified);
    assert_eq!(second.outcome.label(), "available");
    assert_eq!(recorder.of_kind(NotificationKind::Availability).len(), 1);
    assert!(recorder.of_kind(NotificationKind::Error).is_empty());

    // The second cycle started on the form and reused the session
    assert_eq!(browser.sessions_created(), 1);
    assert_eq!(browser.clicks().iter().filter(|k| *k == "submit").count(), 1);

    let scheduler = checker.scheduler();
    assert_eq!(scheduler.busy_streak(), 0);
    assert_eq!(scheduler.adaptive_frequency(), 5.0);
    assert!(!scheduler.backoff().is_active(Local::now().naive_local()));

    let heartbeat = Heartbeat::new(dir.path().join("heartbeat.json")).read().unwrap();
    assert_eq!(heartbeat.status, HeartbeatStatus::Success);

    let stats = checker.stats();
    let stats = stats.read().await;
    assert_eq!(stats.checks, 2);
    assert_eq!(stats.successes, 2);
    assert_eq!(stats.availability_notifications, 1);
}

#[tokio::test(start_paused = true)]
async fn test_later_dates_are_no_slots() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    // Both days are inside the window but after the held appointment
    let browser = consulate_site(appointment_page(calendar("December 2026", &["20", "28"])));
    let recorder = Recorder::default();
    let mut checker = orchestrator(&settings, &browser, &recorder);

    let result = checker.run_one_cycle().await.unwrap();
    assert!(result.success);
    assert_eq!(result.outcome, CycleOutcome::NoSlots);
    assert!(!result.notified);
    assert!(recorder.of_kind(NotificationKind::Availability).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_next_sleep_follows_base_frequency() {
    let dir = TempDir::new().unwrap();
    // No prime-time windows, so the plan is the plain dynamic frequency
    let settings = settings_with(dir.path(), |config| {
        config.schedule.prime_time_hours.clear();
    });
    let browser = consulate_site(appointment_page(calendar("November 2026", &["20"])));
    let recorder = Recorder::default();
    let mut checker = orchestrator(&settings, &browser, &recorder);

    checker.run_one_cycle().await.unwrap();
    let plan = checker.next_sleep();
    assert_eq!(plan.source, SleepSource::Dynamic);
    assert_eq!(plan.duration.as_secs(), 5 * 60);
    assert!(!plan.prime_time);
}

// ============================================================================
// Busy calendar
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_busy_streak_escalates_then_recovers() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let mut widgets = calendar("November 2026", &["20"]);
    widgets.push(busy_banner());
    let browser = consulate_site(appointment_page(widgets));
    let recorder = Recorder::default();
    let mut checker = orchestrator(&settings, &browser, &recorder);

    for streak in 1..=3 {
        let result = checker.run_one_cycle().await.unwrap();
        assert_eq!(result.outcome, CycleOutcome::Busy);
        // A busy answer is still a working cycle
        assert!(result.success);
        assert_eq!(checker.scheduler().busy_streak(), streak);
    }

    let now = Local::now().naive_local();
    let scheduler = checker.scheduler();
    assert!((scheduler.adaptive_frequency() - 6.0).abs() < 1e-9);
    assert!(scheduler.backoff().is_active(now));
    // The backoff deadline is at least the configured minimum away
    let deadline = scheduler.backoff().deadline().unwrap();
    assert!(deadline - now >= chrono::Duration::minutes(9));
    assert!(recorder.of_kind(NotificationKind::Error).is_empty());

    let plan = checker.next_sleep();
    assert_eq!(plan.source, SleepSource::Backoff);
    assert!(plan.duration.as_secs() >= 9 * 60);

    // The banner goes away and the calendar answers again
    browser.update_element("busy", |banner| banner.displayed = false);
    let result = checker.run_one_cycle().await.unwrap();
    assert_eq!(result.outcome.label(), "available");

    let scheduler = checker.scheduler();
    assert_eq!(scheduler.busy_streak(), 0);
    assert_eq!(scheduler.adaptive_frequency(), 5.0);
    assert!(scheduler.backoff().deadline().is_none());

    let stats = checker.stats();
    assert_eq!(stats.read().await.busy, 3);
}

// ============================================================================
// Session handling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_expired_session_logs_in_again() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let browser = consulate_site(appointment_page(calendar("November 2026", &["20"])));
    let recorder = Recorder::default();
    let mut checker = orchestrator(&settings, &browser, &recorder);

    checker.run_one_cycle().await.unwrap();

    // The site drops the session and bounces to sign-in
    browser.set_authenticated(false);
    browser.navigate(&url("schedule/77/appointment")).await.unwrap();
    assert_eq!(browser.current_url_now(), url("users/sign_in"));

    let result = checker.run_one_cycle().await.unwrap();
    assert!(result.success);
    assert_eq!(result.outcome.label(), "available");
    assert!(browser.is_authenticated());
    assert_eq!(browser.clicks().iter().filter(|k| *k == "submit").count(), 2);
    assert_eq!(browser.sessions_created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_browser_restarts_after_threshold() {
    let dir = TempDir::new().unwrap();
    let settings = settings_with(dir.path(), |config| {
        config.schedule.driver_restart_checks = 2;
    });
    let browser = consulate_site(appointment_page(calendar("November 2026", &["20"])));
    let recorder = Recorder::default();
    let mut checker = orchestrator(&settings, &browser, &recorder);

    checker.run_one_cycle().await.unwrap();
    assert!(checker.session().is_active());
    assert_eq!(checker.session().checks_since_restart(), 1);

    checker.run_one_cycle().await.unwrap();
    assert!(!checker.session().is_active());
    assert_eq!(checker.session().checks_since_restart(), 0);
    assert_eq!(browser.quits(), 1);

    let result = checker.run_one_cycle().await.unwrap();
    assert!(result.success);
    assert_eq!(browser.sessions_created(), 2);
    assert_eq!(checker.stats().read().await.session_restarts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_quits_browser() {
    let dir = TempDir::new().unwrap();
    let settings = settings(dir.path());
    let browser = consulate_site(appointment_page(calendar("November 2026", &["20"])));
    let recorder = Recorder::default();
    let mut checker = orchestrator(&settings, &browser, &recorder);

    checker.run_one_cycle().await.unwrap();
    checker.shutdown().await;
    assert!(!checker.session().is_active());
    assert_eq!(browser.quits(), 1);

    // Shutting down twice is harmless
    checker.shutdown().await;
    assert_eq!(browser.quits(), 1);
}
