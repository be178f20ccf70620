use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("course {field} is not a valid date: {value:?}")]
    MalformedCourseWindow { field: &'static str, value: String },
}

pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

pub fn format_iso_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Accepts `HH:MM` and tolerates a trailing `:SS`.
pub fn parse_wall_time(raw: &str) -> Option<NaiveTime> {
    let t = raw.trim();
    NaiveTime::parse_from_str(t, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M:%S"))
        .ok()
}

pub fn format_wall_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub fn parse_weekday(raw: &str) -> Option<Weekday> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Weekday number with Sunday as 0 through Saturday as 6.
pub fn weekday_number(day: Weekday) -> u32 {
    day.num_days_from_sunday()
}

pub fn session_id(course_id: &str, date: NaiveDate) -> String {
    format!("{}-{}", course_id, format_iso_date(date))
}

pub fn attendance_id(student_id: &str, session_id: &str) -> String {
    format!("{}-{}", student_id, session_id)
}

mod wall_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_wall_time(*t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_wall_time(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time {:?}", raw)))
    }
}

mod weekday_symbol {
    use chrono::Weekday;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Weekday, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(super::weekday_name(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Weekday, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_weekday(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid weekday {:?}", raw)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSlot {
    pub id: String,
    #[serde(with = "weekday_symbol")]
    pub weekday: Weekday,
    #[serde(with = "wall_time")]
    pub start_time: NaiveTime,
    #[serde(with = "wall_time")]
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HolidayDate {
    Specific { day: u32, month: u32, year: i32 },
    Recurring { day: u32, month: u32 },
    #[serde(rename_all = "camelCase")]
    Range { start_date: NaiveDate, end_date: NaiveDate },
}

impl HolidayDate {
    /// Builds a date spec from loosely-typed storage columns. Returns `None`
    /// when the fields required by `kind` are missing or unparsable.
    pub fn from_parts(
        kind: &str,
        day: Option<u32>,
        month: Option<u32>,
        year: Option<i32>,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Option<Self> {
        match kind {
            "specific" => Some(Self::Specific {
                day: day?,
                month: month?,
                year: year?,
            }),
            "recurring" => Some(Self::Recurring {
                day: day?,
                month: month?,
            }),
            "range" => Some(Self::Range {
                start_date: parse_iso_date(start_date?)?,
                end_date: parse_iso_date(end_date?)?,
            }),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Specific { .. } => "specific",
            Self::Recurring { .. } => "recurring",
            Self::Range { .. } => "range",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolidayRule {
    pub id: String,
    pub name: String,
    /// `None` applies everywhere.
    pub location: Option<String>,
    /// `None` when the stored rule is incomplete; such rules never match.
    pub date: Option<HolidayDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    pub id: String,
    pub name: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseWindow {
    pub course_id: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Slot ids in assignment order; later entries win on a shared weekday.
    pub schedule_ids: Vec<String>,
    pub classroom_id: Option<String>,
    pub teacher_id: Option<String>,
}

impl CourseWindow {
    /// Converts raw course columns at the storage boundary. Blank dates become
    /// `None`; anything else must be `YYYY-MM-DD`.
    pub fn parse(
        course_id: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
        schedule_ids: Vec<String>,
        classroom_id: Option<String>,
        teacher_id: Option<String>,
    ) -> Result<Self, ScheduleError> {
        Ok(Self {
            course_id: course_id.to_string(),
            start_date: parse_window_date("startDate", start_date)?,
            end_date: parse_window_date("endDate", end_date)?,
            schedule_ids,
            classroom_id,
            teacher_id,
        })
    }
}

fn parse_window_date(
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<NaiveDate>, ScheduleError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    parse_iso_date(raw)
        .map(Some)
        .ok_or_else(|| ScheduleError::MalformedCourseWindow {
            field,
            value: raw.to_string(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Done,
    Cancelled,
}

impl SessionStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "done" => Some(Self::Done),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSession {
    pub id: String,
    pub course_id: String,
    pub date: NaiveDate,
    #[serde(with = "wall_time")]
    pub start_time: NaiveTime,
    #[serde(with = "wall_time")]
    pub end_time: NaiveTime,
    pub teacher_id: Option<String>,
    pub is_substitution: bool,
    pub status: SessionStatus,
    pub comment: String,
    /// Set once default attendance has been created for this session.
    pub attendance_initialized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentWindow {
    pub student_id: String,
    pub course_id: String,
    pub enrollment_date: NaiveDate,
    pub cancellation_date: Option<NaiveDate>,
    pub active: bool,
}

impl EnrollmentWindow {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.active
            && self.enrollment_date <= date
            && self.cancellation_date.map_or(true, |c| date <= c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lateness {
    No,
    Late,
    VeryLate,
}

impl Lateness {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "No" | "no" => Some(Self::No),
            "Late" | "late" => Some(Self::Late),
            "VeryLate" | "veryLate" | "very_late" => Some(Self::VeryLate),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::No => "No",
            Self::Late => "Late",
            Self::VeryLate => "VeryLate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Pending,
    Completed,
    Annulled,
}

impl AttendanceStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "annulled" => Some(Self::Annulled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Annulled => "annulled",
        }
    }
}

impl From<SessionStatus> for AttendanceStatus {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Pending => Self::Pending,
            SessionStatus::Done => Self::Completed,
            SessionStatus::Cancelled => Self::Annulled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub session_id: String,
    pub attended: bool,
    pub late: Lateness,
    pub absence_justified: bool,
    pub homework_done: bool,
    pub comment: String,
    pub status: AttendanceStatus,
}
