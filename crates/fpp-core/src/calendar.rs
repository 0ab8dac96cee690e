//! Business-day arithmetic for the default D-1 run window.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, Weekday};

/// Weekend plus configured-holiday calendar.
#[derive(Debug, Clone, Default)]
pub struct BusinessCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl BusinessCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> BusinessCalendar {
        BusinessCalendar {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn is_business_day(&self, day: NaiveDate) -> bool {
        !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&day)
    }

    /// Closest business day strictly before `day`.
    pub fn prior_business_day(&self, day: NaiveDate) -> NaiveDate {
        let mut cursor = day.pred_opt().unwrap_or(day);
        while !self.is_business_day(cursor) {
            cursor = match cursor.pred_opt() {
                Some(prev) => prev,
                None => return cursor,
            };
        }
        cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn prior_business_day_skips_weekend() {
        let cal = BusinessCalendar::default();
        // 2025-06-09 is a Monday.
        assert_eq!(cal.prior_business_day(d(2025, 6, 9)), d(2025, 6, 6));
    }

    #[test]
    fn prior_business_day_skips_holidays() {
        // 2025-04-21 (Tiradentes) falls on a Monday.
        let cal = BusinessCalendar::new([d(2025, 4, 21)]);
        assert_eq!(cal.prior_business_day(d(2025, 4, 22)), d(2025, 4, 18));
    }

    #[test]
    fn midweek_is_plain_yesterday() {
        let cal = BusinessCalendar::default();
        assert_eq!(cal.prior_business_day(d(2025, 6, 12)), d(2025, 6, 11));
    }
}
