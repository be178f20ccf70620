use crate::ipc::helpers::{
    db_err, ensure_exists, opt_string, patch_nullable_string, patch_obj, required_str,
    string_array, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::parse_iso_date;
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use uuid::Uuid;

fn check_date(key: &str, raw: &Option<String>) -> Result<(), HandlerErr> {
    match raw {
        Some(s) if parse_iso_date(s).is_none() => {
            Err(HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
        }
        _ => Ok(()),
    }
}

fn check_bounds(start: &Option<String>, end: &Option<String>) -> Result<(), HandlerErr> {
    check_date("startDate", start)?;
    check_date("endDate", end)?;
    if let (Some(s), Some(e)) = (
        start.as_deref().and_then(parse_iso_date),
        end.as_deref().and_then(parse_iso_date),
    ) {
        if e < s {
            return Err(HandlerErr::bad_params("endDate must not be before startDate"));
        }
    }
    Ok(())
}

fn check_classroom(conn: &Connection, classroom_id: &Option<String>) -> Result<(), HandlerErr> {
    if let Some(id) = classroom_id {
        ensure_exists(conn, "classrooms", id, "classroom")?;
    }
    Ok(())
}

fn course_json(conn: &Connection, course_id: &str) -> Result<Value, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT c.name, c.start_date, c.end_date, c.classroom_id, c.teacher_id,
                    (SELECT COUNT(*) FROM class_sessions s WHERE s.course_id = c.id),
                    (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id)
             FROM courses c
             WHERE c.id = ?",
            [course_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, i64>(6)?,
                ))
            },
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    let Some((name, start, end, classroom_id, teacher_id, session_count, enrollment_count)) = row
    else {
        return Err(HandlerErr::not_found("course"));
    };
    let schedule_ids =
        store::course_schedule_ids(conn, course_id).map_err(db_err("db_query_failed"))?;
    Ok(json!({
        "id": course_id,
        "name": name,
        "startDate": start,
        "endDate": end,
        "classroomId": classroom_id,
        "teacherId": teacher_id,
        "scheduleIds": schedule_ids,
        "sessionCount": session_count,
        "enrollmentCount": enrollment_count
    }))
}

fn courses_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id FROM courses ORDER BY name, id")
        .map_err(db_err("db_query_failed"))?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    let mut courses = Vec::with_capacity(ids.len());
    for id in ids {
        courses.push(course_json(conn, &id)?);
    }
    Ok(json!({ "courses": courses }))
}

/// Course header plus the slot and classroom rows it refers to.
fn courses_open(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let course = course_json(conn, &course_id)?;

    let schedule_ids =
        store::course_schedule_ids(conn, &course_id).map_err(db_err("db_query_failed"))?;
    let slots = store::load_schedule_slots(conn).map_err(db_err("db_query_failed"))?;
    let schedules: Vec<_> = schedule_ids
        .iter()
        .filter_map(|id| slots.iter().find(|s| &s.id == id))
        .collect();

    let classroom = match course.get("classroomId").and_then(|v| v.as_str()) {
        Some(id) => store::load_classrooms(conn)
            .map_err(db_err("db_query_failed"))?
            .into_iter()
            .find(|c| c.id == id),
        None => None,
    };

    Ok(json!({
        "course": course,
        "schedules": schedules,
        "classroom": classroom
    }))
}

fn courses_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let start = opt_string(params, "startDate")?;
    let end = opt_string(params, "endDate")?;
    let classroom_id = opt_string(params, "classroomId")?;
    let teacher_id = opt_string(params, "teacherId")?;
    let schedule_ids = match params.get("scheduleIds") {
        None | Some(Value::Null) => Vec::new(),
        Some(_) => string_array(params, "scheduleIds")?,
    };
    check_bounds(&start, &end)?;
    check_classroom(conn, &classroom_id)?;

    let id = Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    tx.execute(
        "INSERT INTO courses(id, name, start_date, end_date, classroom_id, teacher_id)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &name, &start, &end, &classroom_id, &teacher_id),
    )
    .map_err(db_err("db_insert_failed"))?;
    write_schedule_ids(&tx, &id, &schedule_ids)?;
    tx.commit().map_err(db_err("db_commit_failed"))?;
    tracing::info!(course_id = %id, %name, "course created");
    Ok(json!({ "courseId": id }))
}

fn required_patch_name<'a>(patch: &'a Map<String, Value>) -> Result<Option<&'a str>, HandlerErr> {
    match patch.get("name") {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params("patch.name must be a non-empty string")),
    }
}

/// Date edits only change the course row; the session calendar follows on
/// the next preview/apply.
fn courses_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let patch = patch_obj(params)?;
    let (cur_start, cur_end): (Option<String>, Option<String>) = conn
        .query_row(
            "SELECT start_date, end_date FROM courses WHERE id = ?",
            [&course_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("course"))?;

    for k in patch.keys() {
        if !matches!(
            k.as_str(),
            "name" | "startDate" | "endDate" | "classroomId" | "teacherId"
        ) {
            return Err(HandlerErr::bad_params(format!("unknown course field: {}", k)));
        }
    }
    let name = required_patch_name(patch)?;
    let start = patch_nullable_string(patch, "startDate")?;
    let end = patch_nullable_string(patch, "endDate")?;
    let classroom_id = patch_nullable_string(patch, "classroomId")?;
    let teacher_id = patch_nullable_string(patch, "teacherId")?;

    let next_start = start.clone().unwrap_or(cur_start);
    let next_end = end.clone().unwrap_or(cur_end);
    check_bounds(&next_start, &next_end)?;
    if let Some(c) = &classroom_id {
        check_classroom(conn, c)?;
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    if let Some(name) = name {
        tx.execute("UPDATE courses SET name = ? WHERE id = ?", (name, &course_id))
            .map_err(db_err("db_update_failed"))?;
    }
    for (column, value) in [
        ("start_date", start),
        ("end_date", end),
        ("classroom_id", classroom_id),
        ("teacher_id", teacher_id),
    ] {
        let Some(value) = value else {
            continue;
        };
        let sql = format!("UPDATE courses SET {} = ? WHERE id = ?", column);
        tx.execute(&sql, (&value, &course_id))
            .map_err(db_err("db_update_failed"))?;
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;
    Ok(json!({ "ok": true }))
}

fn write_schedule_ids(
    conn: &Connection,
    course_id: &str,
    schedule_ids: &[String],
) -> Result<(), HandlerErr> {
    for sid in schedule_ids {
        ensure_exists(conn, "schedules", sid, "schedule")?;
    }
    conn.execute(
        "DELETE FROM course_schedules WHERE course_id = ?",
        [course_id],
    )
    .map_err(db_err("db_delete_failed"))?;
    for (i, sid) in schedule_ids.iter().enumerate() {
        conn.execute(
            "INSERT INTO course_schedules(course_id, schedule_id, sort_order) VALUES(?, ?, ?)",
            (course_id, sid, i as i64),
        )
        .map_err(db_err("db_insert_failed"))?;
    }
    Ok(())
}

/// Replaces the course's slot assignment. Order matters: on a shared
/// weekday the later slot wins during generation.
fn courses_set_schedules(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let schedule_ids = string_array(params, "scheduleIds")?;
    ensure_exists(conn, "courses", &course_id, "course")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    write_schedule_ids(&tx, &course_id, &schedule_ids)?;
    tx.commit().map_err(db_err("db_commit_failed"))?;
    Ok(json!({ "ok": true, "scheduleIds": schedule_ids }))
}

fn courses_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    ensure_exists(conn, "courses", &course_id, "course")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    tx.execute(
        "DELETE FROM attendance
         WHERE session_id IN (SELECT id FROM class_sessions WHERE course_id = ?)",
        [&course_id],
    )
    .map_err(db_err("db_delete_failed"))?;
    for sql in [
        "DELETE FROM class_sessions WHERE course_id = ?",
        "DELETE FROM enrollments WHERE course_id = ?",
        "DELETE FROM course_schedules WHERE course_id = ?",
        "DELETE FROM courses WHERE id = ?",
    ] {
        tx.execute(sql, [&course_id])
            .map_err(db_err("db_delete_failed"))?;
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;
    tracing::info!(course_id = %course_id, "course deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(with_db(state, req, courses_list)),
        "courses.open" => Some(with_db(state, req, courses_open)),
        "courses.create" => Some(with_db(state, req, courses_create)),
        "courses.update" => Some(with_db(state, req, courses_update)),
        "courses.delete" => Some(with_db(state, req, courses_delete)),
        "courses.setSchedules" => Some(with_db(state, req, courses_set_schedules)),
        _ => None,
    }
}
