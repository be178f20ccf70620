use crate::ipc::helpers::{db_err, ensure_exists, patch_obj, required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{Lateness, SessionStatus};
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;

fn student_names(conn: &Connection) -> Result<HashMap<String, String>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, last_name, first_name FROM students")
        .map_err(db_err("db_query_failed"))?;
    let names = stmt
        .query_map([], |r| {
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            Ok((r.get::<_, String>(0)?, format!("{}, {}", last, first)))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(names)
}

fn attendance_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session_id = required_str(params, "sessionId")?;
    let session = store::load_session(conn, &session_id)?;
    let names = student_names(conn)?;
    let mut records = store::load_attendance_for_session(conn, &session_id)
        .map_err(db_err("db_query_failed"))?;
    records.sort_by(|a, b| {
        let an = names.get(&a.student_id).map(String::as_str).unwrap_or("");
        let bn = names.get(&b.student_id).map(String::as_str).unwrap_or("");
        an.cmp(bn).then_with(|| a.student_id.cmp(&b.student_id))
    });

    let rows: Vec<Value> = records
        .iter()
        .map(|r| {
            let mut v = json!(r);
            if let Some(obj) = v.as_object_mut() {
                obj.insert(
                    "displayName".into(),
                    json!(names.get(&r.student_id).cloned().unwrap_or_default()),
                );
            }
            v
        })
        .collect();
    Ok(json!({ "session": session, "records": rows }))
}

fn patch_flag(v: &Value, key: &str) -> Result<bool, HandlerErr> {
    v.as_bool()
        .ok_or_else(|| HandlerErr::bad_params(format!("patch.{} must be boolean", key)))
}

/// Teacher corrections to a single record. Status stays owned by the session.
fn attendance_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let attendance_id = required_str(params, "attendanceId")?;
    let patch = patch_obj(params)?;
    let mut record = store::load_attendance_record(conn, &attendance_id)?;

    for (k, v) in patch {
        match k.as_str() {
            "attended" => record.attended = patch_flag(v, k)?,
            "absenceJustified" => record.absence_justified = patch_flag(v, k)?,
            "homeworkDone" => record.homework_done = patch_flag(v, k)?,
            "late" => {
                record.late = v.as_str().and_then(Lateness::parse).ok_or_else(|| {
                    HandlerErr::bad_params("patch.late must be one of: No, Late, VeryLate")
                })?;
            }
            "comment" => {
                record.comment = match v {
                    Value::Null => String::new(),
                    Value::String(s) => s.clone(),
                    _ => return Err(HandlerErr::bad_params("patch.comment must be string")),
                };
            }
            _ => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown attendance field: {}",
                    k
                )))
            }
        }
    }
    store::upsert_attendance(conn, &record).map_err(db_err("db_update_failed"))?;
    Ok(json!({ "record": record }))
}

#[derive(Default)]
struct StudentTally {
    present: i64,
    absent: i64,
    justified: i64,
    late: i64,
    homework_done: i64,
}

/// Per-student totals over the course's done sessions.
fn attendance_course_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    ensure_exists(conn, "courses", &course_id, "course")?;

    let sessions =
        store::load_sessions_for_course(conn, &course_id).map_err(db_err("db_query_failed"))?;
    let done: Vec<_> = sessions
        .iter()
        .filter(|s| s.status == SessionStatus::Done)
        .collect();

    let mut tallies: HashMap<String, StudentTally> = HashMap::new();
    for session in &done {
        let records = store::load_attendance_for_session(conn, &session.id)
            .map_err(db_err("db_query_failed"))?;
        for r in records {
            let t = tallies.entry(r.student_id).or_default();
            if r.attended {
                t.present += 1;
            } else {
                t.absent += 1;
                if r.absence_justified {
                    t.justified += 1;
                }
            }
            if r.late != Lateness::No {
                t.late += 1;
            }
            if r.homework_done {
                t.homework_done += 1;
            }
        }
    }

    let names = student_names(conn)?;
    let mut rows: Vec<(String, String, StudentTally)> = tallies
        .into_iter()
        .map(|(id, t)| {
            let name = names.get(&id).cloned().unwrap_or_default();
            (id, name, t)
        })
        .collect();
    rows.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let students: Vec<Value> = rows
        .into_iter()
        .map(|(id, name, t)| {
            json!({
                "studentId": id,
                "displayName": name,
                "present": t.present,
                "absent": t.absent,
                "absentJustified": t.justified,
                "late": t.late,
                "homeworkDone": t.homework_done
            })
        })
        .collect();
    Ok(json!({
        "courseId": course_id,
        "sessionsDone": done.len(),
        "students": students
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.list" => Some(with_db(state, req, attendance_list)),
        "attendance.update" => Some(with_db(state, req, attendance_update)),
        "attendance.courseSummary" => Some(with_db(state, req, attendance_course_summary)),
        _ => None,
    }
}
