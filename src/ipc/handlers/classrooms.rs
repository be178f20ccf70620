use crate::ipc::helpers::{
    db_err, ensure_exists, opt_string, patch_nullable_string, patch_obj, required_str, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn classrooms_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let classrooms = store::load_classrooms(conn).map_err(db_err("db_query_failed"))?;
    Ok(json!({ "classrooms": classrooms }))
}

fn classrooms_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let location = opt_string(params, "location")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classrooms(id, name, location) VALUES(?, ?, ?)",
        (&id, &name, &location),
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "classroomId": id }))
}

fn classrooms_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
    let patch = patch_obj(params)?;
    ensure_exists(conn, "classrooms", &classroom_id, "classroom")?;

    if let Some(v) = patch.get("name") {
        let name = v
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::bad_params("patch.name must be a non-empty string"))?;
        conn.execute(
            "UPDATE classrooms SET name = ? WHERE id = ?",
            (name, &classroom_id),
        )
        .map_err(db_err("db_update_failed"))?;
    }
    if let Some(location) = patch_nullable_string(patch, "location")? {
        conn.execute(
            "UPDATE classrooms SET location = ? WHERE id = ?",
            (&location, &classroom_id),
        )
        .map_err(db_err("db_update_failed"))?;
    }
    Ok(json!({ "ok": true }))
}

/// Courses held in the classroom lose their room (and with it their
/// location for holiday matching) rather than blocking the delete.
fn classrooms_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = required_str(params, "classroomId")?;
    ensure_exists(conn, "classrooms", &classroom_id, "classroom")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    let detached = tx
        .execute(
            "UPDATE courses SET classroom_id = NULL WHERE classroom_id = ?",
            [&classroom_id],
        )
        .map_err(db_err("db_update_failed"))?;
    tx.execute("DELETE FROM classrooms WHERE id = ?", [&classroom_id])
        .map_err(db_err("db_delete_failed"))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;
    Ok(json!({ "ok": true, "coursesDetached": detached }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classrooms.list" => Some(with_db(state, req, classrooms_list)),
        "classrooms.create" => Some(with_db(state, req, classrooms_create)),
        "classrooms.update" => Some(with_db(state, req, classrooms_update)),
        "classrooms.delete" => Some(with_db(state, req, classrooms_delete)),
        _ => None,
    }
}
