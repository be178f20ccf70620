use std::collections::HashMap;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::Serialize;

use super::holidays::is_excluded;
use super::model::{
    session_id, weekday_name, ClassSession, Classroom, CourseWindow, HolidayRule, ScheduleSlot,
    SessionStatus,
};

/// Non-fatal configuration problems found while generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ValidationWarning {
    /// Two assigned slots share a weekday; only `kept_slot_id` produces sessions.
    #[serde(rename_all = "camelCase")]
    DuplicateWeekday {
        weekday: String,
        kept_slot_id: String,
        dropped_slot_id: String,
    },
    #[serde(rename_all = "camelCase")]
    UnknownSlot { slot_id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeneratedSessions {
    pub sessions: Vec<ClassSession>,
    pub warnings: Vec<ValidationWarning>,
}

#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    /// Sessions strictly before this date are emitted as done.
    pub today: NaiveDate,
    pub past_sessions_done: bool,
}

impl GenerateOptions {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            past_sessions_done: true,
        }
    }
}

/// Expands a course's weekly slots into concrete sessions between its start
/// and end dates (inclusive), skipping holidays. Output is ordered by date.
///
/// A course with no start date, no end date, or no slots yields no sessions.
pub fn generate_sessions(
    course: &CourseWindow,
    slots: &[ScheduleSlot],
    holidays: &[HolidayRule],
    classrooms: &[Classroom],
    options: GenerateOptions,
) -> GeneratedSessions {
    let (Some(start), Some(end)) = (course.start_date, course.end_date) else {
        return GeneratedSessions::default();
    };
    if course.schedule_ids.is_empty() {
        return GeneratedSessions::default();
    }

    let mut warnings = Vec::new();
    let by_weekday = slots_by_weekday(course, slots, &mut warnings);

    let location = course
        .classroom_id
        .as_deref()
        .and_then(|cid| classrooms.iter().find(|c| c.id == cid))
        .and_then(|c| c.location.as_deref());

    let mut sessions = Vec::new();
    let mut date = start;
    while date <= end {
        if let Some(slot) = by_weekday.get(&date.weekday()) {
            if !is_excluded(date, holidays, location) {
                sessions.push(build_session(course, slot, date, options));
            }
        }
        let Some(next) = date.checked_add_days(Days::new(1)) else {
            break;
        };
        date = next;
    }

    tracing::debug!(
        course_id = %course.course_id,
        sessions = sessions.len(),
        warnings = warnings.len(),
        "generated course sessions"
    );
    GeneratedSessions { sessions, warnings }
}

fn slots_by_weekday<'a>(
    course: &CourseWindow,
    slots: &'a [ScheduleSlot],
    warnings: &mut Vec<ValidationWarning>,
) -> HashMap<Weekday, &'a ScheduleSlot> {
    let mut by_weekday: HashMap<Weekday, &ScheduleSlot> = HashMap::new();
    for slot_id in &course.schedule_ids {
        let Some(slot) = slots.iter().find(|s| &s.id == slot_id) else {
            tracing::warn!(course_id = %course.course_id, %slot_id, "course references unknown schedule slot");
            warnings.push(ValidationWarning::UnknownSlot {
                slot_id: slot_id.clone(),
            });
            continue;
        };
        if let Some(previous) = by_weekday.insert(slot.weekday, slot) {
            tracing::warn!(
                course_id = %course.course_id,
                weekday = weekday_name(slot.weekday),
                kept = %slot.id,
                dropped = %previous.id,
                "two schedule slots share a weekday; keeping the later one"
            );
            warnings.push(ValidationWarning::DuplicateWeekday {
                weekday: weekday_name(slot.weekday).to_string(),
                kept_slot_id: slot.id.clone(),
                dropped_slot_id: previous.id.clone(),
            });
        }
    }
    by_weekday
}

fn build_session(
    course: &CourseWindow,
    slot: &ScheduleSlot,
    date: NaiveDate,
    options: GenerateOptions,
) -> ClassSession {
    let status = if options.past_sessions_done && date < options.today {
        SessionStatus::Done
    } else {
        SessionStatus::Pending
    };
    ClassSession {
        id: session_id(&course.course_id, date),
        course_id: course.course_id.clone(),
        date,
        start_time: slot.start_time,
        end_time: slot.end_time,
        teacher_id: course.teacher_id.clone(),
        is_substitution: false,
        status,
        comment: String::new(),
        attendance_initialized: false,
    }
}
