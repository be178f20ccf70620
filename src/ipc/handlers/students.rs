use crate::ipc::helpers::{
    db_err, ensure_exists, now_ts, opt_bool, patch_obj, required_str, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn students_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.last_name, s.first_name, s.active, s.updated_at,
                    (SELECT COUNT(*) FROM enrollments e WHERE e.student_id = s.id)
             FROM students s
             ORDER BY s.last_name, s.first_name, s.id",
        )
        .map_err(db_err("db_query_failed"))?;
    let students = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "lastName": r.get::<_, String>(1)?,
                "firstName": r.get::<_, String>(2)?,
                "active": r.get::<_, i64>(3)? != 0,
                "updatedAt": r.get::<_, Option<String>>(4)?,
                "enrollmentCount": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let last_name = required_str(params, "lastName")?;
    let first_name = required_str(params, "firstName")?;
    let active = opt_bool(params, "active")?.unwrap_or(true);
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, last_name, first_name, active, updated_at) VALUES(?, ?, ?, ?, ?)",
        (&id, &last_name, &first_name, active as i64, now_ts()),
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "studentId": id }))
}

fn students_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let patch = patch_obj(params)?;
    ensure_exists(conn, "students", &student_id, "student")?;

    let mut sets: Vec<(&'static str, rusqlite::types::Value)> = Vec::new();
    for (k, v) in patch {
        match k.as_str() {
            "lastName" | "firstName" => {
                let s = v
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        HandlerErr::bad_params(format!("patch.{} must be a non-empty string", k))
                    })?;
                let column = if k == "lastName" { "last_name" } else { "first_name" };
                sets.push((column, s.to_string().into()));
            }
            "active" => {
                let b = v
                    .as_bool()
                    .ok_or_else(|| HandlerErr::bad_params("patch.active must be boolean"))?;
                sets.push(("active", (b as i64).into()));
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown student field: {}", k))),
        }
    }
    if sets.is_empty() {
        return Ok(json!({ "ok": true }));
    }
    sets.push(("updated_at", now_ts().into()));

    let assignments = sets
        .iter()
        .map(|(c, _)| format!("{} = ?", c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("UPDATE students SET {} WHERE id = ?", assignments);
    let mut values: Vec<rusqlite::types::Value> = sets.into_iter().map(|(_, v)| v).collect();
    values.push(student_id.into());
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(db_err("db_update_failed"))?;
    Ok(json!({ "ok": true }))
}

fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    for sql in [
        "DELETE FROM attendance WHERE student_id = ?",
        "DELETE FROM enrollments WHERE student_id = ?",
        "DELETE FROM students WHERE id = ?",
    ] {
        tx.execute(sql, [&student_id])
            .map_err(db_err("db_delete_failed"))?;
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_db(state, req, students_list)),
        "students.create" => Some(with_db(state, req, students_create)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        _ => None,
    }
}
