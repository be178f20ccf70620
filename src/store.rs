use crate::schedule::{
    format_iso_date, format_wall_time, parse_iso_date, parse_wall_time, parse_weekday,
    AttendanceChanges, AttendanceRecord, AttendanceStatus, ClassSession, Classroom, CourseWindow,
    EnrollmentWindow, HolidayDate, HolidayRule, Lateness, ScheduleError, ScheduleSlot,
    SessionDiff, SessionStatus,
};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Schedule(ScheduleError::MalformedCourseWindow { .. }) => {
                "malformed_course_window"
            }
            Self::Db(_) => "db_query_failed",
        }
    }
}

fn conversion_err(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn date_col(r: &Row<'_>, idx: usize) -> rusqlite::Result<chrono::NaiveDate> {
    let raw: String = r.get(idx)?;
    parse_iso_date(&raw).ok_or_else(|| conversion_err(idx, format!("invalid date {:?}", raw)))
}

fn opt_date_col(r: &Row<'_>, idx: usize) -> rusqlite::Result<Option<chrono::NaiveDate>> {
    let raw: Option<String> = r.get(idx)?;
    raw.map(|raw| {
        parse_iso_date(&raw).ok_or_else(|| conversion_err(idx, format!("invalid date {:?}", raw)))
    })
    .transpose()
}

fn time_col(r: &Row<'_>, idx: usize) -> rusqlite::Result<chrono::NaiveTime> {
    let raw: String = r.get(idx)?;
    parse_wall_time(&raw).ok_or_else(|| conversion_err(idx, format!("invalid time {:?}", raw)))
}

pub fn load_classrooms(conn: &Connection) -> rusqlite::Result<Vec<Classroom>> {
    let mut stmt = conn.prepare("SELECT id, name, location FROM classrooms ORDER BY name")?;
    let rows = stmt.query_map([], |r| {
        Ok(Classroom {
            id: r.get(0)?,
            name: r.get(1)?,
            location: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

/// Slots whose stored weekday or times no longer parse are skipped with a
/// warning; courses referencing them then report an unknown slot.
pub fn load_schedule_slots(conn: &Connection) -> rusqlite::Result<Vec<ScheduleSlot>> {
    let mut stmt = conn.prepare(
        "SELECT id, weekday, start_time, end_time FROM schedules ORDER BY weekday, start_time",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, weekday, start, end) in rows {
        match (
            parse_weekday(&weekday),
            parse_wall_time(&start),
            parse_wall_time(&end),
        ) {
            (Some(weekday), Some(start_time), Some(end_time)) => out.push(ScheduleSlot {
                id,
                weekday,
                start_time,
                end_time,
            }),
            _ => tracing::warn!(slot_id = %id, %weekday, %start, %end, "skipping malformed schedule slot"),
        }
    }
    Ok(out)
}

/// Any value that is not an integer reads as absent, leaving the rule
/// incomplete instead of failing the whole load.
fn int_part(r: &Row<'_>, idx: usize) -> Option<i64> {
    match r.get_ref(idx) {
        Ok(ValueRef::Integer(v)) => Some(v),
        _ => None,
    }
}

pub fn load_holidays(conn: &Connection) -> rusqlite::Result<Vec<HolidayRule>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, location, kind, day, month, year, start_date, end_date
         FROM holidays
         ORDER BY name",
    )?;
    let rows = stmt.query_map([], |r| {
        let id: String = r.get(0)?;
        let kind: String = r.get(3)?;
        let start_date: Option<String> = r.get(7)?;
        let end_date: Option<String> = r.get(8)?;
        let date = HolidayDate::from_parts(
            &kind,
            int_part(r, 4).and_then(|v| u32::try_from(v).ok()),
            int_part(r, 5).and_then(|v| u32::try_from(v).ok()),
            int_part(r, 6).and_then(|v| i32::try_from(v).ok()),
            start_date.as_deref(),
            end_date.as_deref(),
        );
        if date.is_none() {
            tracing::warn!(holiday_id = %id, %kind, "holiday rule is incomplete and will never match");
        }
        Ok(HolidayRule {
            id,
            name: r.get(1)?,
            location: r.get(2)?,
            date,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

pub fn course_schedule_ids(conn: &Connection, course_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT schedule_id FROM course_schedules WHERE course_id = ? ORDER BY sort_order",
    )?;
    let rows = stmt.query_map([course_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

pub fn load_course_window(conn: &Connection, course_id: &str) -> Result<CourseWindow, StoreError> {
    let row = conn
        .query_row(
            "SELECT start_date, end_date, classroom_id, teacher_id FROM courses WHERE id = ?",
            [course_id],
            |r| {
                Ok((
                    r.get::<_, Option<String>>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .optional()?;
    let Some((start, end, classroom_id, teacher_id)) = row else {
        return Err(StoreError::NotFound("course"));
    };
    let schedule_ids = course_schedule_ids(conn, course_id)?;
    Ok(CourseWindow::parse(
        course_id,
        start.as_deref(),
        end.as_deref(),
        schedule_ids,
        classroom_id,
        teacher_id,
    )?)
}

const SESSION_COLUMNS: &str = "id, course_id, date, start_time, end_time, teacher_id, is_substitution, status, comment, attendance_initialized";

fn session_from_row(r: &Row<'_>) -> rusqlite::Result<ClassSession> {
    let status_raw: String = r.get(7)?;
    let status = SessionStatus::parse(&status_raw)
        .ok_or_else(|| conversion_err(7, format!("invalid session status {:?}", status_raw)))?;
    Ok(ClassSession {
        id: r.get(0)?,
        course_id: r.get(1)?,
        date: date_col(r, 2)?,
        start_time: time_col(r, 3)?,
        end_time: time_col(r, 4)?,
        teacher_id: r.get(5)?,
        is_substitution: r.get::<_, i64>(6)? != 0,
        status,
        comment: r.get(8)?,
        attendance_initialized: r.get::<_, i64>(9)? != 0,
    })
}

pub fn load_sessions_for_course(
    conn: &Connection,
    course_id: &str,
) -> rusqlite::Result<Vec<ClassSession>> {
    let sql = format!(
        "SELECT {} FROM class_sessions WHERE course_id = ? ORDER BY date, start_time",
        SESSION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([course_id], session_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

pub fn load_session(conn: &Connection, session_id: &str) -> Result<ClassSession, StoreError> {
    let sql = format!("SELECT {} FROM class_sessions WHERE id = ?", SESSION_COLUMNS);
    conn.query_row(&sql, [session_id], session_from_row)
        .optional()?
        .ok_or(StoreError::NotFound("session"))
}

pub fn load_enrollments_for_course(
    conn: &Connection,
    course_id: &str,
) -> rusqlite::Result<Vec<EnrollmentWindow>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, course_id, enrollment_date, cancellation_date, active
         FROM enrollments
         WHERE course_id = ?
         ORDER BY enrollment_date, student_id",
    )?;
    let rows = stmt.query_map([course_id], |r| {
        Ok(EnrollmentWindow {
            student_id: r.get(0)?,
            course_id: r.get(1)?,
            enrollment_date: date_col(r, 2)?,
            cancellation_date: opt_date_col(r, 3)?,
            active: r.get::<_, i64>(4)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

fn attendance_from_row(r: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let late_raw: String = r.get(4)?;
    let status_raw: String = r.get(8)?;
    Ok(AttendanceRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        session_id: r.get(2)?,
        attended: r.get::<_, i64>(3)? != 0,
        late: Lateness::parse(&late_raw)
            .ok_or_else(|| conversion_err(4, format!("invalid lateness {:?}", late_raw)))?,
        absence_justified: r.get::<_, i64>(5)? != 0,
        homework_done: r.get::<_, i64>(6)? != 0,
        comment: r.get(7)?,
        status: AttendanceStatus::parse(&status_raw)
            .ok_or_else(|| conversion_err(8, format!("invalid attendance status {:?}", status_raw)))?,
    })
}

const ATTENDANCE_COLUMNS: &str =
    "id, student_id, session_id, attended, late, absence_justified, homework_done, comment, status";

pub fn load_attendance_for_session(
    conn: &Connection,
    session_id: &str,
) -> rusqlite::Result<Vec<AttendanceRecord>> {
    let sql = format!(
        "SELECT {} FROM attendance WHERE session_id = ? ORDER BY student_id",
        ATTENDANCE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([session_id], attendance_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

pub fn load_attendance_record(
    conn: &Connection,
    attendance_id: &str,
) -> Result<AttendanceRecord, StoreError> {
    let sql = format!("SELECT {} FROM attendance WHERE id = ?", ATTENDANCE_COLUMNS);
    conn.query_row(&sql, [attendance_id], attendance_from_row)
        .optional()?
        .ok_or(StoreError::NotFound("attendance record"))
}

pub fn insert_session(conn: &Connection, s: &ClassSession) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO class_sessions(
            id, course_id, date, start_time, end_time, teacher_id, is_substitution, status, comment, attendance_initialized
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            s.id,
            s.course_id,
            format_iso_date(s.date),
            format_wall_time(s.start_time),
            format_wall_time(s.end_time),
            s.teacher_id,
            s.is_substitution as i64,
            s.status.as_str(),
            s.comment,
            s.attendance_initialized as i64,
        ],
    )?;
    Ok(())
}

pub fn update_session(conn: &Connection, s: &ClassSession) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE class_sessions
         SET teacher_id = ?, is_substitution = ?, status = ?, comment = ?, attendance_initialized = ?
         WHERE id = ?",
        params![
            s.teacher_id,
            s.is_substitution as i64,
            s.status.as_str(),
            s.comment,
            s.attendance_initialized as i64,
            s.id,
        ],
    )?;
    Ok(())
}

pub fn upsert_attendance(conn: &Connection, a: &AttendanceRecord) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO attendance(
            id, student_id, session_id, attended, late, absence_justified, homework_done, comment, status
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           attended = excluded.attended,
           late = excluded.late,
           absence_justified = excluded.absence_justified,
           homework_done = excluded.homework_done,
           comment = excluded.comment,
           status = excluded.status",
        params![
            a.id,
            a.student_id,
            a.session_id,
            a.attended as i64,
            a.late.as_str(),
            a.absence_justified as i64,
            a.homework_done as i64,
            a.comment,
            a.status.as_str(),
        ],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffApplied {
    pub deleted: usize,
    pub added: usize,
    pub attendance_deleted: usize,
}

/// Applies a reconciliation diff in one transaction. Attendance rows of
/// removed sessions go with them.
pub fn apply_session_diff(conn: &Connection, diff: &SessionDiff) -> rusqlite::Result<DiffApplied> {
    let mut applied = DiffApplied::default();
    if diff.is_in_sync() {
        return Ok(applied);
    }
    let tx = conn.unchecked_transaction()?;
    for s in &diff.to_delete {
        applied.attendance_deleted +=
            tx.execute("DELETE FROM attendance WHERE session_id = ?", [&s.id])?;
        applied.deleted += tx.execute("DELETE FROM class_sessions WHERE id = ?", [&s.id])?;
    }
    for s in &diff.to_add {
        insert_session(&tx, s)?;
        applied.added += 1;
    }
    tx.commit()?;
    Ok(applied)
}

/// Writes the hook's output. Expected to run inside the caller's transaction
/// together with the session status update.
pub fn apply_attendance_changes(
    conn: &Connection,
    changes: &AttendanceChanges,
) -> rusqlite::Result<()> {
    for r in &changes.to_update {
        conn.execute(
            "UPDATE attendance SET status = ? WHERE id = ?",
            params![r.status.as_str(), r.id],
        )?;
    }
    for r in &changes.to_create {
        upsert_attendance(conn, r)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{session_id, Lateness};

    fn temp_db() -> Connection {
        let dir = std::env::temp_dir().join(format!("academyd-store-{}", uuid::Uuid::new_v4()));
        crate::db::open_db(&dir).expect("open db")
    }

    fn seed_course(conn: &Connection, start: Option<&str>, end: Option<&str>) {
        conn.execute(
            "INSERT INTO courses(id, name, start_date, end_date) VALUES('c1', 'Piano', ?, ?)",
            params![start, end],
        )
        .expect("insert course");
    }

    fn session(date: &str) -> ClassSession {
        let date = parse_iso_date(date).expect("date");
        ClassSession {
            id: session_id("c1", date),
            course_id: "c1".into(),
            date,
            start_time: parse_wall_time("16:00").expect("time"),
            end_time: parse_wall_time("17:30").expect("time"),
            teacher_id: None,
            is_substitution: false,
            status: SessionStatus::Pending,
            comment: String::new(),
            attendance_initialized: false,
        }
    }

    #[test]
    fn malformed_course_dates_surface_as_schedule_error() {
        let conn = temp_db();
        seed_course(&conn, Some("2024-10-01"), Some("not-a-date"));
        let e = load_course_window(&conn, "c1").expect_err("malformed");
        assert_eq!(e.code(), "malformed_course_window");
        assert!(e.to_string().contains("endDate"));
        assert_eq!(
            load_course_window(&conn, "nope").expect_err("missing").code(),
            "not_found"
        );
    }

    #[test]
    fn incomplete_holiday_rows_load_as_never_matching() {
        let conn = temp_db();
        conn.execute(
            "INSERT INTO holidays(id, name, kind, start_date) VALUES('h1', 'Broken', 'range', '2024-10-14')",
            [],
        )
        .expect("insert holiday");
        let rules = load_holidays(&conn).expect("load");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].date, None);
    }

    #[test]
    fn out_of_range_holiday_parts_do_not_block_other_rules() {
        let conn = temp_db();
        conn.execute(
            "INSERT INTO holidays(id, name, kind, start_date, end_date)
             VALUES('h1', 'Autumn break', 'range', '2024-10-14', '2024-10-18')",
            [],
        )
        .expect("insert range holiday");
        conn.execute(
            "INSERT INTO holidays(id, name, kind, day, month) VALUES('h2', 'Negative', 'recurring', -1, 12)",
            [],
        )
        .expect("insert negative day");
        conn.execute(
            "INSERT INTO holidays(id, name, kind, day, month, year)
             VALUES('h3', 'Text year', 'specific', 25, 12, 'soon')",
            [],
        )
        .expect("insert text year");
        conn.execute(
            "INSERT INTO holidays(id, name, kind, day, month, year)
             VALUES('h4', 'Huge year', 'specific', 1, 1, 9999999999)",
            [],
        )
        .expect("insert huge year");

        let rules = load_holidays(&conn).expect("load");
        assert_eq!(rules.len(), 4);
        let by_id = |id: &str| rules.iter().find(|h| h.id == id).expect("rule");
        assert!(by_id("h1").date.is_some());
        assert_eq!(by_id("h2").date, None);
        assert_eq!(by_id("h3").date, None);
        assert_eq!(by_id("h4").date, None);
    }

    #[test]
    fn unparsable_cancellation_date_fails_like_enrollment_date() {
        let conn = temp_db();
        seed_course(&conn, Some("2024-10-01"), Some("2024-10-31"));
        conn.execute(
            "INSERT INTO students(id, last_name, first_name, active) VALUES('s1', 'Ruiz', 'Ana', 1)",
            [],
        )
        .expect("insert student");
        conn.execute(
            "INSERT INTO enrollments(id, student_id, course_id, enrollment_date, cancellation_date)
             VALUES('e1', 's1', 'c1', '2024-09-01', '2024-10-15')",
            [],
        )
        .expect("insert enrollment");
        let loaded = load_enrollments_for_course(&conn, "c1").expect("load");
        assert_eq!(loaded[0].cancellation_date, parse_iso_date("2024-10-15"));

        conn.execute(
            "UPDATE enrollments SET cancellation_date = 'last week' WHERE id = 'e1'",
            [],
        )
        .expect("corrupt cancellation");
        let e = load_enrollments_for_course(&conn, "c1").expect_err("invalid cancellation");
        assert!(e.to_string().contains("last week"));
    }

    #[test]
    fn diff_apply_drops_attendance_of_removed_sessions() {
        let conn = temp_db();
        seed_course(&conn, Some("2024-10-01"), Some("2024-10-31"));
        conn.execute(
            "INSERT INTO students(id, last_name, first_name, active) VALUES('s1', 'Ruiz', 'Ana', 1)",
            [],
        )
        .expect("insert student");

        let first = SessionDiff {
            to_delete: vec![],
            to_add: vec![session("2024-10-07"), session("2024-10-14")],
        };
        assert_eq!(apply_session_diff(&conn, &first).expect("apply").added, 2);
        upsert_attendance(
            &conn,
            &AttendanceRecord {
                id: "s1-c1-2024-10-14".into(),
                student_id: "s1".into(),
                session_id: "c1-2024-10-14".into(),
                attended: true,
                late: Lateness::No,
                absence_justified: false,
                homework_done: false,
                comment: String::new(),
                status: AttendanceStatus::Completed,
            },
        )
        .expect("attendance");

        let second = SessionDiff {
            to_delete: vec![session("2024-10-14")],
            to_add: vec![],
        };
        let applied = apply_session_diff(&conn, &second).expect("apply");
        assert_eq!(applied.deleted, 1);
        assert_eq!(applied.attendance_deleted, 1);
        let left = load_sessions_for_course(&conn, "c1").expect("load");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "c1-2024-10-07");
    }
}
