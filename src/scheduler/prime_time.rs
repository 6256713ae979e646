//! Prime-time hour windows
//!
//! A window `[start, end)` is given in local hours. `start > end` wraps past
//! midnight, so `[22, 2]` covers 22:00 through 01:59.

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[u32; 2]", into = "[u32; 2]")]
pub struct HourWindow {
    start: u32,
    end: u32,
}

impl HourWindow {
    /// `None` unless both hours are in `0..24`
    pub fn new(start: u32, end: u32) -> Option<Self> {
        (start < 24 && end < 24).then_some(Self { start, end })
    }

    pub fn contains(&self, hour: u32) -> bool {
        match self.start.cmp(&self.end) {
            std::cmp::Ordering::Less => self.start <= hour && hour < self.end,
            std::cmp::Ordering::Greater => hour >= self.start || hour < self.end,
            // A zero-length window never matches
            std::cmp::Ordering::Equal => false,
        }
    }
}

impl TryFrom<[u32; 2]> for HourWindow {
    type Error = String;

    fn try_from([start, end]: [u32; 2]) -> Result<Self, Self::Error> {
        Self::new(start, end).ok_or_else(|| format!("hour window [{start}, {end}] must use hours 0-23"))
    }
}

impl From<HourWindow> for [u32; 2] {
    fn from(window: HourWindow) -> Self {
        [window.start, window.end]
    }
}

/// When polling should speed up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimeTime {
    pub windows: Vec<HourWindow>,
    /// Frequency multiplier inside a window (below 1.0 polls faster)
    pub factor: f64,
    /// Frequency multiplier on Saturday and Sunday
    pub weekend_multiplier: f64,
}

impl Default for PrimeTime {
    fn default() -> Self {
        Self {
            windows: vec![HourWindow { start: 7, end: 9 }, HourWindow { start: 22, end: 2 }],
            factor: 0.5,
            weekend_multiplier: 1.0,
        }
    }
}

impl PrimeTime {
    pub fn is_prime_time(&self, now: NaiveDateTime) -> bool {
        let hour = now.hour();
        self.windows.iter().any(|w| w.contains(hour))
    }

    pub fn is_weekend(now: NaiveDateTime) -> bool {
        matches!(now.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// `base` adjusted for the hour and day of `now`
    pub fn optimal_frequency(&self, base_minutes: f64, now: NaiveDateTime) -> f64 {
        let mut minutes = base_minutes;
        if self.is_prime_time(now) {
            minutes *= self.factor;
        }
        if Self::is_weekend(now) {
            minutes *= self.weekend_multiplier;
        }
        minutes
    }
}
