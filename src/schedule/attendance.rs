use std::collections::HashSet;

use serde::Serialize;

use super::model::{
    attendance_id, AttendanceRecord, AttendanceStatus, ClassSession, EnrollmentWindow, Lateness,
    SessionStatus,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceChanges {
    pub to_create: Vec<AttendanceRecord>,
    pub to_update: Vec<AttendanceRecord>,
    /// Caller must persist the session's attendance-initialized flag when set.
    pub mark_initialized: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PlaceholderDefaults {
    pub attended: bool,
    pub late: Lateness,
}

impl Default for PlaceholderDefaults {
    fn default() -> Self {
        Self {
            attended: true,
            late: Lateness::No,
        }
    }
}

/// Runs after a session's status field was edited.
///
/// Existing records always follow the session's status. The first time a
/// session becomes done, every student enrolled on that date who has no
/// record yet gets one, marked present; teachers then record absences by
/// hand. The initialized flag is never cleared, so a session that is
/// reopened and completed again does not get a second round of defaults.
pub fn on_session_status_change(
    session: &ClassSession,
    enrollments: &[EnrollmentWindow],
    existing: &[AttendanceRecord],
    defaults: PlaceholderDefaults,
) -> AttendanceChanges {
    let status = AttendanceStatus::from(session.status);

    let to_update: Vec<AttendanceRecord> = existing
        .iter()
        .map(|r| AttendanceRecord {
            status,
            ..r.clone()
        })
        .collect();

    if session.status != SessionStatus::Done || session.attendance_initialized {
        return AttendanceChanges {
            to_create: Vec::new(),
            to_update,
            mark_initialized: false,
        };
    }

    let mut seen: HashSet<&str> = existing.iter().map(|r| r.student_id.as_str()).collect();
    let mut to_create = Vec::new();
    for enrollment in enrollments {
        if enrollment.course_id != session.course_id || !enrollment.covers(session.date) {
            continue;
        }
        if !seen.insert(enrollment.student_id.as_str()) {
            continue;
        }
        to_create.push(AttendanceRecord {
            id: attendance_id(&enrollment.student_id, &session.id),
            student_id: enrollment.student_id.clone(),
            session_id: session.id.clone(),
            attended: defaults.attended,
            late: defaults.late,
            absence_justified: false,
            homework_done: false,
            comment: String::new(),
            status: AttendanceStatus::Completed,
        });
    }

    AttendanceChanges {
        to_create,
        to_update,
        mark_initialized: true,
    }
}

#[cfg(test)]
mod tests {
    use super::super::model::{parse_iso_date, parse_wall_time};
    use super::*;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        parse_iso_date(s).expect("date")
    }

    fn session(status: SessionStatus, initialized: bool) -> ClassSession {
        ClassSession {
            id: "c1-2024-10-14".into(),
            course_id: "c1".into(),
            date: d("2024-10-14"),
            start_time: parse_wall_time("16:00").expect("time"),
            end_time: parse_wall_time("17:30").expect("time"),
            teacher_id: Some("t1".into()),
            is_substitution: false,
            status,
            comment: String::new(),
            attendance_initialized: initialized,
        }
    }

    fn enrollment(student: &str, course: &str, from: &str) -> EnrollmentWindow {
        EnrollmentWindow {
            student_id: student.into(),
            course_id: course.into(),
            enrollment_date: d(from),
            cancellation_date: None,
            active: true,
        }
    }

    fn record(student: &str, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            id: attendance_id(student, "c1-2024-10-14"),
            student_id: student.into(),
            session_id: "c1-2024-10-14".into(),
            attended: false,
            late: Lateness::Late,
            absence_justified: true,
            homework_done: true,
            comment: "note".into(),
            status,
        }
    }

    #[test]
    fn first_completion_creates_present_placeholders_for_eligible_students() {
        let mut cancelled = enrollment("s4", "c1", "2024-09-01");
        cancelled.cancellation_date = Some(d("2024-10-01"));
        let mut inactive = enrollment("s5", "c1", "2024-09-01");
        inactive.active = false;
        let enrollments = vec![
            enrollment("s1", "c1", "2024-09-01"),
            enrollment("s2", "c1", "2024-10-14"),
            enrollment("s3", "c1", "2024-10-15"),
            cancelled,
            inactive,
            enrollment("s6", "other", "2024-09-01"),
        ];

        let out = on_session_status_change(
            &session(SessionStatus::Done, false),
            &enrollments,
            &[],
            PlaceholderDefaults::default(),
        );
        let students: Vec<&str> = out.to_create.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(students, vec!["s1", "s2"]);
        assert!(out.mark_initialized);
        let r = &out.to_create[0];
        assert_eq!(r.id, "s1-c1-2024-10-14");
        assert!(r.attended);
        assert_eq!(r.late, Lateness::No);
        assert!(!r.absence_justified);
        assert!(!r.homework_done);
        assert_eq!(r.status, AttendanceStatus::Completed);
    }

    #[test]
    fn existing_records_follow_status_without_losing_fields() {
        let existing = [record("s1", AttendanceStatus::Completed)];
        let out = on_session_status_change(
            &session(SessionStatus::Cancelled, true),
            &[enrollment("s1", "c1", "2024-09-01")],
            &existing,
            PlaceholderDefaults::default(),
        );
        assert!(out.to_create.is_empty());
        assert!(!out.mark_initialized);
        assert_eq!(out.to_update.len(), 1);
        let r = &out.to_update[0];
        assert_eq!(r.status, AttendanceStatus::Annulled);
        assert!(!r.attended);
        assert_eq!(r.late, Lateness::Late);
        assert_eq!(r.comment, "note");
    }

    #[test]
    fn students_with_records_are_not_duplicated() {
        let existing = [record("s1", AttendanceStatus::Pending)];
        let enrollments = [
            enrollment("s1", "c1", "2024-09-01"),
            enrollment("s2", "c1", "2024-09-01"),
            enrollment("s2", "c1", "2024-09-15"),
        ];
        let out = on_session_status_change(
            &session(SessionStatus::Done, false),
            &enrollments,
            &existing,
            PlaceholderDefaults::default(),
        );
        let students: Vec<&str> = out.to_create.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(students, vec!["s2"]);
        assert_eq!(out.to_update[0].status, AttendanceStatus::Completed);
    }

    #[test]
    fn initialized_session_only_updates() {
        let out = on_session_status_change(
            &session(SessionStatus::Done, true),
            &[enrollment("s1", "c1", "2024-09-01")],
            &[],
            PlaceholderDefaults::default(),
        );
        assert!(out.to_create.is_empty());
        assert!(out.to_update.is_empty());
        assert!(!out.mark_initialized);
    }

    #[test]
    fn pending_status_never_creates() {
        let out = on_session_status_change(
            &session(SessionStatus::Pending, false),
            &[enrollment("s1", "c1", "2024-09-01")],
            &[],
            PlaceholderDefaults::default(),
        );
        assert!(out.to_create.is_empty());
        assert!(!out.mark_initialized);
    }

    #[test]
    fn configured_defaults_apply_to_placeholders() {
        let out = on_session_status_change(
            &session(SessionStatus::Done, false),
            &[enrollment("s1", "c1", "2024-09-01")],
            &[],
            PlaceholderDefaults {
                attended: false,
                late: Lateness::No,
            },
        );
        assert!(!out.to_create[0].attended);
    }
}
