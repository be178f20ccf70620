use chrono::{Datelike, NaiveDate};

use super::model::{HolidayDate, HolidayRule};

impl HolidayDate {
    pub fn matches(&self, date: NaiveDate) -> bool {
        match *self {
            HolidayDate::Specific { day, month, year } => {
                date.day() == day && date.month() == month && date.year() == year
            }
            HolidayDate::Recurring { day, month } => date.day() == day && date.month() == month,
            HolidayDate::Range {
                start_date,
                end_date,
            } => start_date <= date && date <= end_date,
        }
    }
}

impl HolidayRule {
    /// A location-bound rule only applies to courses held at that exact location.
    pub fn applies_to(&self, course_location: Option<&str>) -> bool {
        match self.location.as_deref() {
            None => true,
            Some(loc) => course_location == Some(loc),
        }
    }
}

/// True when any rule excludes `date` for a course held at `course_location`.
/// Incomplete rules never match.
pub fn is_excluded(date: NaiveDate, rules: &[HolidayRule], course_location: Option<&str>) -> bool {
    rules.iter().any(|rule| {
        rule.applies_to(course_location) && rule.date.is_some_and(|d| d.matches(date))
    })
}
