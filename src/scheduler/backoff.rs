//! Backoff deadline and the busy-calendar backoff window

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use rand::Rng;
use std::time::Duration;

/// Optional "do not check before" deadline
///
/// The deadline only ever moves forward until [`clear`](Self::clear) is
/// called after a successful check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    deadline: Option<NaiveDateTime>,
}

impl BackoffState {
    pub fn deadline(&self) -> Option<NaiveDateTime> {
        self.deadline
    }

    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        self.deadline.is_some_and(|deadline| now < deadline)
    }

    /// Push the deadline out to `candidate`; an earlier candidate is ignored
    ///
    /// Returns the deadline now in effect.
    pub fn extend(&mut self, candidate: NaiveDateTime) -> NaiveDateTime {
        let deadline = match self.deadline {
            Some(current) if current >= candidate => current,
            _ => candidate,
        };
        self.deadline = Some(deadline);
        deadline
    }

    pub fn clear(&mut self) {
        self.deadline = None;
    }

    /// Time left until the deadline; clears the state once it has passed
    pub fn remaining(&mut self, now: NaiveDateTime) -> Option<Duration> {
        let deadline = self.deadline?;
        if now < deadline {
            (deadline - now).to_std().ok()
        } else {
            self.deadline = None;
            None
        }
    }
}

/// Minute range a busy-calendar backoff is drawn from
#[derive(Debug, Clone, PartialEq)]
pub struct BusyWindow {
    pub min_minutes: u64,
    pub max_minutes: u64,
    pub reason: String,
}

impl BusyWindow {
    /// Compute the window for the current adaptive frequency and busy streak
    ///
    /// Frequent checkers (< 5 min) get a long window, moderate ones (5-30 min)
    /// a medium one and infrequent ones a short one; every busy response in
    /// the streak widens it by 20%. `floor` raises the bounds to at least the
    /// configured minimum and maximum.
    pub fn compute(frequency_minutes: f64, busy_streak: u32, floor: (u64, u64)) -> Self {
        let f = frequency_minutes.max(0.0);
        let multiplier = 1.0 + f64::from(busy_streak) * 0.2;

        let (min, max) = if f < 5.0 {
            ((f * 3.0 * multiplier).max(10.0), (f * 5.0 * multiplier).max(20.0))
        } else if f <= 30.0 {
            (f.max(8.0 * multiplier), (f * 2.0).max(15.0 * multiplier))
        } else {
            ((f / 2.0).floor() * multiplier, f * multiplier)
        };
        let min = if f > 30.0 { min.max(5.0) } else { min };
        let max = if f > 30.0 { max.max(10.0) } else { max };

        let min_minutes = (min as u64).max(floor.0);
        let max_minutes = (max as u64).max(floor.1).max(min_minutes);

        let reason = if busy_streak > 0 {
            format!("persistent busy status (streak: {busy_streak}, freq: {f:.1}m)")
        } else if f < 5.0 {
            format!("frequent checking (every {f:.1}m)")
        } else if f <= 15.0 {
            format!("moderate checking frequency ({f:.1}m)")
        } else {
            format!("current check interval ({f:.1}m)")
        };

        Self {
            min_minutes,
            max_minutes,
            reason,
        }
    }

    /// Uniform draw from the inclusive window
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        rng.gen_range(self.min_minutes..=self.max_minutes)
    }
}

/// `now + minutes`, saturating instead of overflowing
pub fn deadline_after(now: NaiveDateTime, minutes: u64) -> NaiveDateTime {
    i64::try_from(minutes)
        .ok()
        .and_then(ChronoDuration::try_minutes)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(NaiveDateTime::MAX)
}
