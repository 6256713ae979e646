//! Calendar label parsing and slot evaluation

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::utils::normalize_whitespace;

/// Accepted label layouts, tried in order
pub const DATE_FORMATS: &[&str] = &[
    "%B %Y %d",
    "%b %Y %d",
    "%B %d %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%Y-%m-%d",
];

/// Parse a datepicker label such as `"January 2025 15"`
pub fn parse_calendar_date(label: &str) -> Option<NaiveDate> {
    let cleaned = normalize_whitespace(label);
    if cleaned.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&cleaned, format).ok())
}

/// Inclusive date range the user is willing to take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// `None` when `start > end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// One open day read from the calendar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub label: String,
    pub date: Option<NaiveDate>,
}

impl AvailabilitySlot {
    pub fn from_label(label: impl Into<String>) -> Self {
        let label = label.into();
        let date = parse_calendar_date(&label);
        Self { label, date }
    }
}

/// Slots sorted against the held appointment and the target window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotEvaluation {
    /// In the window and strictly before the held appointment
    pub earlier: Vec<NaiveDate>,
    /// In the window but not an improvement
    pub in_window_not_earlier: Vec<NaiveDate>,
    pub outside_window: Vec<NaiveDate>,
    pub unparseable: Vec<String>,
}

impl SlotEvaluation {
    pub fn earliest(&self) -> Option<NaiveDate> {
        self.earlier.first().copied()
    }

    pub fn has_earlier(&self) -> bool {
        !self.earlier.is_empty()
    }
}

pub fn evaluate_slots(
    slots: &[AvailabilitySlot],
    current_appointment: NaiveDate,
    window: DateWindow,
) -> SlotEvaluation {
    let mut evaluation = SlotEvaluation::default();
    for slot in slots {
        let Some(date) = slot.date else {
            evaluation.unparseable.push(slot.label.clone());
            continue;
        };
        if !window.contains(date) {
            evaluation.outside_window.push(date);
        } else if date < current_appointment {
            evaluation.earlier.push(date);
        } else {
            evaluation.in_window_not_earlier.push(date);
        }
    }
    for dates in [
        &mut evaluation.earlier,
        &mut evaluation.in_window_not_earlier,
        &mut evaluation.outside_window,
    ] {
        dates.sort_unstable();
        dates.dedup();
    }
    evaluation
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_supported_formats() {
        assert_eq!(parse_calendar_date("January 2025 15"), Some(date(2025, 1, 15)));
        assert_eq!(parse_calendar_date("2025-09-25"), Some(date(2025, 9, 25)));
        assert_eq!(parse_calendar_date("15 January 2025"), Some(date(2025, 1, 15)));
        assert_eq!(parse_calendar_date("Jan 2025 15"), Some(date(2025, 1, 15)));
        assert_eq!(parse_calendar_date("January 15, 2025"), Some(date(2025, 1, 15)));
        assert_eq!(parse_calendar_date("  November\n2026   20 "), Some(date(2026, 11, 20)));
    }

    #[test]
    fn test_unsupported_strings() {
        assert_eq!(parse_calendar_date("not-a-date"), None);
        assert_eq!(parse_calendar_date(""), None);
        assert_eq!(parse_calendar_date("February 2025 30"), None);
    }

    #[test]
    fn test_window_rejects_inverted_range() {
        assert!(DateWindow::new(date(2026, 12, 31), date(2026, 10, 1)).is_none());
        let window = DateWindow::new(date(2026, 10, 1), date(2026, 10, 1)).unwrap();
        assert!(window.contains(date(2026, 10, 1)));
    }

    #[test]
    fn test_evaluate_slots_classification() {
        let window = DateWindow::new(date(2026, 10, 1), date(2026, 12, 31)).unwrap();
        let slots = vec![
            AvailabilitySlot::from_label("December 2026 20"),
            AvailabilitySlot::from_label("November 2026 20"),
            AvailabilitySlot::from_label("January 2027 5"),
            AvailabilitySlot::from_label("Month 3 7"),
        ];

        let evaluation = evaluate_slots(&slots, date(2026, 12, 15), window);
        assert_eq!(evaluation.earlier, vec![date(2026, 11, 20)]);
        assert_eq!(evaluation.in_window_not_earlier, vec![date(2026, 12, 20)]);
        assert_eq!(evaluation.outside_window, vec![date(2027, 1, 5)]);
        assert_eq!(evaluation.unparseable, vec!["Month 3 7".to_string()]);
        assert_eq!(evaluation.earliest(), Some(date(2026, 11, 20)));
    }

    #[test]
    fn test_same_day_is_not_earlier() {
        let window = DateWindow::new(date(2026, 1, 1), date(2026, 12, 31)).unwrap();
        let slots = vec![AvailabilitySlot::from_label("2026-06-01")];
        let evaluation = evaluate_slots(&slots, date(2026, 6, 1), window);
        assert!(!evaluation.has_earlier());
        assert_eq!(evaluation.in_window_not_earlier, vec![date(2026, 6, 1)]);
    }

    proptest! {
        #[test]
        fn prop_label_layouts_agree(days in 0i64..20_000) {
            let d = date(1990, 1, 1) + chrono::Duration::days(days);
            let month_year_day = d.format("%B %Y %d").to_string();
            let iso = d.format("%Y-%m-%d").to_string();
            let day_month_year = d.format("%d %B %Y").to_string();
            prop_assert_eq!(parse_calendar_date(&month_year_day), Some(d));
            prop_assert_eq!(parse_calendar_date(&iso), Some(d));
            prop_assert_eq!(parse_calendar_date(&day_month_year), Some(d));
        }

        #[test]
        fn prop_earlier_dates_are_in_window_and_before_current(
            offsets in proptest::collection::vec(0i64..400, 0..30),
            current_offset in 0i64..400,
        ) {
            let base = date(2026, 1, 1);
            let window = DateWindow::new(base + chrono::Duration::days(30), base + chrono::Duration::days(300)).unwrap();
            let current = base + chrono::Duration::days(current_offset);
            let slots: Vec<AvailabilitySlot> = offsets
                .iter()
                .map(|o| AvailabilitySlot::from_label((base + chrono::Duration::days(*o)).format("%Y-%m-%d").to_string()))
                .collect();

            let evaluation = evaluate_slots(&slots, current, window);
            for d in &evaluation.earlier {
                prop_assert!(window.contains(*d));
                prop_assert!(*d < current);
            }
            prop_assert!(evaluation.earlier.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
