//! Adaptive check scheduling
//!
//! Decides how long the main loop sleeps between cycles.
//!
//! ```text
//!            ┌──────────────┐   busy / available   ┌─────────────────────┐
//!  probe ───▶│ busy streak  │─────────────────────▶│ adaptive frequency  │
//!            └──────┬───────┘                      └──────────┬──────────┘
//!                   │ busy                                    │
//!                   ▼                                         ▼
//!            ┌──────────────┐                      ┌─────────────────────┐
//!            │ BackoffState │◀── captcha, login ───│  success-rate x1-3  │
//!            └──────┬───────┘       rate limit     └──────────┬──────────┘
//!                   │                                         │
//!                   └──────────────┐     ┌────────────────────┘
//!                                  ▼     ▼
//!                            ┌─────────────────┐
//!                            │  compute_sleep  │◀── prime time, jitter
//!                            └─────────────────┘
//! ```
//!
//! Every operation takes the local wall-clock time as an argument and the
//! random draws come from a caller-supplied [`Rng`], so identical inputs give
//! identical sleeps.

mod backoff;
mod prime_time;

pub use backoff::{deadline_after, BackoffState, BusyWindow};
pub use prime_time::{HourWindow, PrimeTime};

use chrono::NaiveDateTime;
use rand::Rng;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Results kept for the success-rate multiplier
pub const RECENT_RESULTS: usize = 10;

/// Minimum sleep in seconds inside a prime-time window
pub const PRIME_TIME_FLOOR_SECS: u64 = 15;

/// Minimum sleep in seconds outside prime time
pub const OFF_PEAK_FLOOR_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Configured check frequency in minutes, at least 1
    pub base_frequency: f64,
    /// Ceiling for the busy-driven adaptive frequency
    pub max_frequency: f64,
    /// Busy responses in a row before the frequency starts growing
    pub busy_streak_threshold: u32,
    /// Growth factor applied per busy response past the threshold
    pub growth: f64,
    /// Symmetric jitter bound in seconds
    pub jitter_seconds: u64,
    pub prime_time: PrimeTime,
    /// Lower bounds (min, max) in minutes for the busy backoff window
    pub busy_backoff_floor: (u64, u64),
}

impl SchedulerConfig {
    pub fn new(base_frequency: f64) -> Self {
        Self {
            base_frequency: base_frequency.max(1.0),
            max_frequency: 60.0,
            busy_streak_threshold: 3,
            growth: 1.2,
            jitter_seconds: 0,
            prime_time: PrimeTime::default(),
            busy_backoff_floor: (0, 0),
        }
    }
}

/// Which rule produced a sleep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepSource {
    PrimeTime,
    Dynamic,
    Backoff,
}

impl fmt::Display for SleepSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PrimeTime => "prime_time",
            Self::Dynamic => "dynamic",
            Self::Backoff => "backoff",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepPlan {
    pub duration: Duration,
    pub prime_time: bool,
    pub source: SleepSource,
}

/// Backoff scheduled for a busy calendar
#[derive(Debug, Clone, PartialEq)]
pub struct BusyBackoff {
    pub delay_minutes: u64,
    pub deadline: NaiveDateTime,
    pub reason: String,
}

/// Busy-streak, frequency and backoff bookkeeping for one checker
#[derive(Debug, Clone)]
pub struct AdaptiveScheduler {
    config: SchedulerConfig,
    adaptive_frequency: f64,
    busy_streak: u32,
    recent_results: VecDeque<bool>,
    backoff: BackoffState,
}

impl AdaptiveScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            adaptive_frequency: config.base_frequency,
            config,
            busy_streak: 0,
            recent_results: VecDeque::with_capacity(RECENT_RESULTS),
            backoff: BackoffState::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn base_frequency(&self) -> f64 {
        self.config.base_frequency
    }

    pub fn adaptive_frequency(&self) -> f64 {
        self.adaptive_frequency
    }

    pub fn busy_streak(&self) -> u32 {
        self.busy_streak
    }

    pub fn backoff(&self) -> &BackoffState {
        &self.backoff
    }

    /// Record a busy calendar and schedule the busy backoff
    pub fn record_busy<R: Rng + ?Sized>(&mut self, now: NaiveDateTime, rng: &mut R) -> BusyBackoff {
        self.busy_streak += 1;
        if self.busy_streak >= self.config.busy_streak_threshold {
            let previous = self.adaptive_frequency;
            self.adaptive_frequency =
                (self.adaptive_frequency * self.config.growth).min(self.config.max_frequency);
            if self.adaptive_frequency != previous {
                info!(
                    frequency = %format!("{:.1}", self.adaptive_frequency),
                    streak = self.busy_streak,
                    "Adaptive frequency increased due to persistent busy status"
                );
            }
        }
        self.schedule_busy_backoff(now, rng)
    }

    /// Backoff drawn from the busy window without touching the streak
    ///
    /// Used for challenge pages, which should back off like a busy calendar.
    pub fn schedule_busy_backoff<R: Rng + ?Sized>(
        &mut self,
        now: NaiveDateTime,
        rng: &mut R,
    ) -> BusyBackoff {
        let window = BusyWindow::compute(
            self.adaptive_frequency,
            self.busy_streak,
            self.config.busy_backoff_floor,
        );
        let delay_minutes = window.draw(rng);
        let deadline = self.backoff.extend(deadline_after(now, delay_minutes));
        info!(
            minutes = delay_minutes,
            reason = %window.reason,
            until = %deadline.format("%H:%M:%S"),
            "Backoff scheduled for busy calendar response"
        );
        BusyBackoff {
            delay_minutes,
            deadline,
            reason: window.reason,
        }
    }

    /// The calendar answered; drop any busy streak and restore the base frequency
    pub fn record_available(&mut self) {
        if self.busy_streak > 0 {
            info!(
                attempts = self.busy_streak,
                "Calendar accessible again after busy attempts"
            );
        }
        self.busy_streak = 0;
        self.adaptive_frequency = self.config.base_frequency;
    }

    /// Append a cycle result to the success-rate history
    pub fn record_result(&mut self, success: bool) {
        if self.recent_results.len() == RECENT_RESULTS {
            self.recent_results.pop_front();
        }
        self.recent_results.push_back(success);
    }

    /// Push the backoff deadline out by `minutes` from `now`
    pub fn extend_backoff(&mut self, now: NaiveDateTime, minutes: u64) -> NaiveDateTime {
        self.backoff.extend(deadline_after(now, minutes))
    }

    pub fn clear_backoff(&mut self) {
        if self.backoff.deadline().is_some() {
            debug!("Clearing backoff after successful check");
        }
        self.backoff.clear();
    }

    /// Share of successful cycles among the last [`RECENT_RESULTS`]; 1.0 until three are known
    pub fn success_rate(&self) -> f64 {
        if self.recent_results.len() < 3 {
            return 1.0;
        }
        let successes = self.recent_results.iter().filter(|ok| **ok).count();
        successes as f64 / self.recent_results.len() as f64
    }

    /// Adaptive frequency scaled by recent reliability, in whole minutes
    pub fn dynamic_backoff_minutes(&self) -> u64 {
        let rate = self.success_rate();
        let multiplier = if rate < 0.5 {
            3.0
        } else if rate < 0.8 {
            2.0
        } else {
            1.0
        };
        let minutes = (self.adaptive_frequency * multiplier) as u64;
        debug!(
            base = %format!("{:.1}", self.adaptive_frequency),
            success_rate = %format!("{rate:.2}"),
            multiplier,
            minutes,
            "Dynamic backoff"
        );
        minutes
    }

    /// Sleep before the next cycle with an explicit jitter offset in seconds
    pub fn compute_sleep(&mut self, now: NaiveDateTime, jitter_seconds: i64) -> SleepPlan {
        let prime_time = self.config.prime_time.is_prime_time(now);
        let optimal = self
            .config
            .prime_time
            .optimal_frequency(self.config.base_frequency, now);

        let (minutes, mut source) = if optimal < self.config.base_frequency {
            debug!(
                minutes = %format!("{optimal:.1}"),
                prime_time, "Using optimized frequency"
            );
            (optimal, SleepSource::PrimeTime)
        } else {
            (self.dynamic_backoff_minutes() as f64, SleepSource::Dynamic)
        };

        let base_seconds = (minutes.max(1.0) * 60.0).round() as i64;
        let floor = if prime_time {
            PRIME_TIME_FLOOR_SECS
        } else {
            OFF_PEAK_FLOOR_SECS
        };
        let mut seconds = u64::try_from(base_seconds.saturating_add(jitter_seconds))
            .unwrap_or(0)
            .max(floor);

        if let Some(remaining) = self.backoff.remaining(now) {
            let backoff_seconds = remaining.as_secs();
            debug!(seconds = backoff_seconds, "Applying scheduled backoff");
            if backoff_seconds > seconds {
                seconds = backoff_seconds;
                source = SleepSource::Backoff;
            }
        }

        SleepPlan {
            duration: Duration::from_secs(seconds),
            prime_time,
            source,
        }
    }

    /// [`compute_sleep`](Self::compute_sleep) with jitter drawn from `rng`
    pub fn next_sleep<R: Rng + ?Sized>(&mut self, now: NaiveDateTime, rng: &mut R) -> SleepPlan {
        let bound = i64::try_from(self.config.jitter_seconds).unwrap_or(i64::MAX);
        let jitter = if bound == 0 {
            0
        } else {
            rng.gen_range(-bound..=bound)
        };
        self.compute_sleep(now, jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Monday 12:00, outside the default prime windows
    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn scheduler(base: f64) -> AdaptiveScheduler {
        AdaptiveScheduler::new(SchedulerConfig::new(base))
    }

    #[test]
    fn test_base_frequency_sleep() {
        let mut s = scheduler(5.0);
        let plan = s.compute_sleep(noon(), 0);
        assert_eq!(plan.duration, Duration::from_secs(300));
        assert_eq!(plan.source, SleepSource::Dynamic);
        assert!(!plan.prime_time);
    }

    #[test]
    fn test_identical_inputs_give_identical_sleep() {
        let mut s = scheduler(7.0);
        s.record_result(true);
        s.record_result(false);
        s.record_result(true);
        let first = s.compute_sleep(noon(), 0);
        let second = s.compute_sleep(noon(), 0);
        assert_eq!(first, second);

        let mut a = StdRng::seed_from_u64(11);
        let mut b = StdRng::seed_from_u64(11);
        let mut jittered = scheduler(7.0);
        jittered.config.jitter_seconds = 45;
        let mut twin = jittered.clone();
        assert_eq!(jittered.next_sleep(noon(), &mut a), twin.next_sleep(noon(), &mut b));
    }

    #[test]
    fn test_prime_time_halves_frequency() {
        let mut s = scheduler(10.0);
        let morning = noon().date().and_hms_opt(8, 0, 0).unwrap();
        let plan = s.compute_sleep(morning, 0);
        assert_eq!(plan.duration, Duration::from_secs(300));
        assert_eq!(plan.source, SleepSource::PrimeTime);
        assert!(plan.prime_time);
    }

    #[test]
    fn test_floors_apply_after_jitter() {
        let mut s = scheduler(1.0);
        assert_eq!(s.compute_sleep(noon(), -50).duration, Duration::from_secs(30));

        let late = noon().date().and_hms_opt(23, 0, 0).unwrap();
        // Prime-time minutes are still rounded up to one minute before jitter
        assert_eq!(s.compute_sleep(late, -20).duration, Duration::from_secs(40));
        assert_eq!(s.compute_sleep(late, -50).duration, Duration::from_secs(15));
    }

    #[test]
    fn test_success_rate_multiplier() {
        let mut s = scheduler(4.0);
        assert_eq!(s.dynamic_backoff_minutes(), 4);

        for ok in [true, true, false, false, true] {
            s.record_result(ok);
        }
        // 3/5 = 0.6
        assert_eq!(s.dynamic_backoff_minutes(), 8);

        for _ in 0..RECENT_RESULTS {
            s.record_result(false);
        }
        assert_eq!(s.success_rate(), 0.0);
        assert_eq!(s.dynamic_backoff_minutes(), 12);

        for _ in 0..RECENT_RESULTS {
            s.record_result(true);
        }
        assert_eq!(s.success_rate(), 1.0);
    }

    #[test]
    fn test_busy_streak_escalates_and_resets() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut s = scheduler(5.0);

        s.record_busy(noon(), &mut rng);
        s.record_busy(noon(), &mut rng);
        assert_eq!(s.adaptive_frequency(), 5.0);

        let mut previous = s.adaptive_frequency();
        for _ in 0..3 {
            s.record_busy(noon(), &mut rng);
            assert!(s.adaptive_frequency() > previous);
            previous = s.adaptive_frequency();
        }
        assert_eq!(s.busy_streak(), 5);

        s.record_available();
        assert_eq!(s.busy_streak(), 0);
        assert_eq!(s.adaptive_frequency(), 5.0);
    }

    #[test]
    fn test_adaptive_frequency_capped() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut s = scheduler(50.0);
        for _ in 0..10 {
            s.record_busy(noon(), &mut rng);
        }
        assert_eq!(s.adaptive_frequency(), 60.0);
    }

    #[test]
    fn test_busy_backoff_sets_deadline_inside_window() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut s = scheduler(10.0);
        let busy = s.record_busy(noon(), &mut rng);
        let window = BusyWindow::compute(10.0, 1, (0, 0));
        assert!((window.min_minutes..=window.max_minutes).contains(&busy.delay_minutes));
        assert_eq!(s.backoff().deadline(), Some(busy.deadline));
    }

    #[test]
    fn test_backoff_deadline_wins_when_later() {
        let mut s = scheduler(5.0);
        s.extend_backoff(noon(), 40);
        let plan = s.compute_sleep(noon(), 0);
        assert_eq!(plan.duration, Duration::from_secs(40 * 60));
        assert_eq!(plan.source, SleepSource::Backoff);

        // Deadline closer than the adaptive sleep: adaptive value stands
        let later = noon() + chrono::Duration::minutes(38);
        let plan = s.compute_sleep(later, 0);
        assert_eq!(plan.duration, Duration::from_secs(300));
        assert_eq!(plan.source, SleepSource::Dynamic);
    }

    #[test]
    fn test_expired_backoff_clears() {
        let mut s = scheduler(5.0);
        s.extend_backoff(noon(), 10);
        let after = noon() + chrono::Duration::minutes(11);
        s.compute_sleep(after, 0);
        assert_eq!(s.backoff().deadline(), None);
    }

    #[test]
    fn test_clear_backoff() {
        let mut s = scheduler(5.0);
        s.extend_backoff(noon(), 30);
        s.clear_backoff();
        assert_eq!(s.compute_sleep(noon(), 0).source, SleepSource::Dynamic);
    }

    proptest! {
        #[test]
        fn prop_deadline_is_monotonic(extensions in proptest::collection::vec(0u64..500, 1..20)) {
            let mut s = scheduler(5.0);
            let mut last = None;
            for minutes in extensions {
                let deadline = s.extend_backoff(noon(), minutes);
                if let Some(previous) = last {
                    prop_assert!(deadline >= previous);
                }
                last = Some(deadline);
            }
        }

        #[test]
        fn prop_sleep_respects_floor(base in 1.0f64..90.0, jitter in -7200i64..7200, hour in 0u32..24) {
            let mut s = scheduler(base);
            let now = noon().date().and_hms_opt(hour, 0, 0).unwrap();
            let plan = s.compute_sleep(now, jitter);
            let floor = if plan.prime_time { PRIME_TIME_FLOOR_SECS } else { OFF_PEAK_FLOOR_SECS };
            prop_assert!(plan.duration.as_secs() >= floor);
        }
    }
}
