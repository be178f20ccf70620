use crate::ipc::helpers::{
    db_err, ensure_exists, opt_bool, opt_date, opt_string, required_str, today_utc, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{format_iso_date, parse_iso_date};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

fn enrollments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = opt_string(params, "courseId")?;
    let student_id = opt_string(params, "studentId")?;
    if course_id.is_none() && student_id.is_none() {
        return Err(HandlerErr::bad_params("courseId or studentId is required"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT e.id, e.student_id, e.course_id, e.enrollment_date, e.cancellation_date, e.active,
                    s.last_name, s.first_name, c.name
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             JOIN courses c ON c.id = e.course_id
             WHERE (?1 IS NULL OR e.course_id = ?1)
               AND (?2 IS NULL OR e.student_id = ?2)
             ORDER BY e.enrollment_date, s.last_name, s.first_name",
        )
        .map_err(db_err("db_query_failed"))?;
    let enrollments = stmt
        .query_map((&course_id, &student_id), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "courseId": r.get::<_, String>(2)?,
                "enrollmentDate": r.get::<_, String>(3)?,
                "cancellationDate": r.get::<_, Option<String>>(4)?,
                "active": r.get::<_, i64>(5)? != 0,
                "studentName": format!("{}, {}", r.get::<_, String>(6)?, r.get::<_, String>(7)?),
                "courseName": r.get::<_, String>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "enrollments": enrollments }))
}

fn enrollments_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let course_id = required_str(params, "courseId")?;
    let enrollment_date = opt_date(params, "enrollmentDate")?.unwrap_or_else(today_utc);
    let active = opt_bool(params, "active")?.unwrap_or(true);
    ensure_exists(conn, "students", &student_id, "student")?;
    ensure_exists(conn, "courses", &course_id, "course")?;

    let open: Option<String> = conn
        .query_row(
            "SELECT id FROM enrollments
             WHERE student_id = ? AND course_id = ? AND cancellation_date IS NULL
             LIMIT 1",
            (&student_id, &course_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    if let Some(existing) = open {
        return Err(
            HandlerErr::bad_params("student already has an open enrollment in this course")
                .with_details(json!({ "enrollmentId": existing })),
        );
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO enrollments(id, student_id, course_id, enrollment_date, cancellation_date, active)
         VALUES(?, ?, ?, ?, NULL, ?)",
        (
            &id,
            &student_id,
            &course_id,
            format_iso_date(enrollment_date),
            active as i64,
        ),
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "enrollmentId": id }))
}

/// Ends an enrollment on `cancellationDate` (default today). The student
/// still gets attendance for sessions up to and including that day.
fn enrollments_cancel(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let enrollment_id = required_str(params, "enrollmentId")?;
    let cancellation = opt_date(params, "cancellationDate")?.unwrap_or_else(today_utc);
    let enrolled_on: String = conn
        .query_row(
            "SELECT enrollment_date FROM enrollments WHERE id = ?",
            [&enrollment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("enrollment"))?;
    if parse_iso_date(&enrolled_on).is_some_and(|d| cancellation < d) {
        return Err(HandlerErr::bad_params(
            "cancellationDate must not be before enrollmentDate",
        ));
    }
    let cancellation = format_iso_date(cancellation);
    conn.execute(
        "UPDATE enrollments SET cancellation_date = ? WHERE id = ?",
        (&cancellation, &enrollment_id),
    )
    .map_err(db_err("db_update_failed"))?;
    Ok(json!({ "ok": true, "cancellationDate": cancellation }))
}

/// Removes the enrollment row only; attendance already recorded is history.
fn enrollments_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let enrollment_id = required_str(params, "enrollmentId")?;
    ensure_exists(conn, "enrollments", &enrollment_id, "enrollment")?;
    conn.execute("DELETE FROM enrollments WHERE id = ?", [&enrollment_id])
        .map_err(db_err("db_delete_failed"))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.list" => Some(with_db(state, req, enrollments_list)),
        "enrollments.create" => Some(with_db(state, req, enrollments_create)),
        "enrollments.cancel" => Some(with_db(state, req, enrollments_cancel)),
        "enrollments.delete" => Some(with_db(state, req, enrollments_delete)),
        _ => None,
    }
}
