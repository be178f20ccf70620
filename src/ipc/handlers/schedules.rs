use crate::ipc::helpers::{db_err, ensure_exists, patch_obj, required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{
    format_wall_time, parse_wall_time, parse_weekday, weekday_name, weekday_number, ScheduleSlot,
};
use crate::store;
use chrono::{NaiveTime, Weekday};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn parse_weekday_param(raw: &str) -> Result<Weekday, HandlerErr> {
    parse_weekday(raw).ok_or_else(|| {
        HandlerErr::bad_params(format!("weekday must be a day name, got {:?}", raw))
    })
}

fn parse_time_param(key: &str, raw: &str) -> Result<NaiveTime, HandlerErr> {
    parse_wall_time(raw).ok_or_else(|| HandlerErr::bad_params(format!("{} must be HH:MM", key)))
}

fn check_window(start: NaiveTime, end: NaiveTime) -> Result<(), HandlerErr> {
    if end <= start {
        return Err(HandlerErr::bad_params("endTime must be after startTime"));
    }
    Ok(())
}

fn load_slot(conn: &Connection, schedule_id: &str) -> Result<ScheduleSlot, HandlerErr> {
    ensure_exists(conn, "schedules", schedule_id, "schedule")?;
    let (weekday, start, end): (String, String, String) = conn
        .query_row(
            "SELECT weekday, start_time, end_time FROM schedules WHERE id = ?",
            [schedule_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(db_err("db_query_failed"))?;
    Ok(ScheduleSlot {
        id: schedule_id.to_string(),
        weekday: parse_weekday_param(&weekday)?,
        start_time: parse_time_param("startTime", &start)?,
        end_time: parse_time_param("endTime", &end)?,
    })
}

fn save_slot(conn: &Connection, slot: &ScheduleSlot, insert: bool) -> Result<(), HandlerErr> {
    let weekday = weekday_name(slot.weekday);
    let start = format_wall_time(slot.start_time);
    let end = format_wall_time(slot.end_time);
    if insert {
        conn.execute(
            "INSERT INTO schedules(id, weekday, start_time, end_time) VALUES(?, ?, ?, ?)",
            (&slot.id, weekday, &start, &end),
        )
        .map_err(db_err("db_insert_failed"))?;
    } else {
        conn.execute(
            "UPDATE schedules SET weekday = ?, start_time = ?, end_time = ? WHERE id = ?",
            (weekday, &start, &end, &slot.id),
        )
        .map_err(db_err("db_update_failed"))?;
    }
    Ok(())
}

fn schedules_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let schedules: Vec<Value> = store::load_schedule_slots(conn)
        .map_err(db_err("db_query_failed"))?
        .into_iter()
        .map(|slot| {
            let mut v = json!(slot);
            v["weekdayNumber"] = json!(weekday_number(slot.weekday));
            v
        })
        .collect();
    Ok(json!({ "schedules": schedules }))
}

fn schedules_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let slot = ScheduleSlot {
        id: Uuid::new_v4().to_string(),
        weekday: parse_weekday_param(&required_str(params, "weekday")?)?,
        start_time: parse_time_param("startTime", &required_str(params, "startTime")?)?,
        end_time: parse_time_param("endTime", &required_str(params, "endTime")?)?,
    };
    check_window(slot.start_time, slot.end_time)?;
    save_slot(conn, &slot, true)?;
    Ok(json!({ "scheduleId": slot.id }))
}

fn schedules_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let schedule_id = required_str(params, "scheduleId")?;
    let patch = patch_obj(params)?;
    let mut slot = load_slot(conn, &schedule_id)?;

    for (k, v) in patch {
        let raw = v
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params(format!("patch.{} must be string", k)))?;
        match k.as_str() {
            "weekday" => slot.weekday = parse_weekday_param(raw)?,
            "startTime" => slot.start_time = parse_time_param(k, raw)?,
            "endTime" => slot.end_time = parse_time_param(k, raw)?,
            _ => return Err(HandlerErr::bad_params(format!("unknown schedule field: {}", k))),
        }
    }
    check_window(slot.start_time, slot.end_time)?;
    save_slot(conn, &slot, false)?;
    Ok(json!({ "ok": true, "schedule": slot }))
}

/// Unassigns the slot from every course first. Already generated sessions
/// stay until the next `sessions.apply` for those courses.
fn schedules_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let schedule_id = required_str(params, "scheduleId")?;
    ensure_exists(conn, "schedules", &schedule_id, "schedule")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    let unassigned = tx
        .execute(
            "DELETE FROM course_schedules WHERE schedule_id = ?",
            [&schedule_id],
        )
        .map_err(db_err("db_delete_failed"))?;
    tx.execute("DELETE FROM schedules WHERE id = ?", [&schedule_id])
        .map_err(db_err("db_delete_failed"))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;
    Ok(json!({ "ok": true, "coursesUnassigned": unassigned }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedules.list" => Some(with_db(state, req, schedules_list)),
        "schedules.create" => Some(with_db(state, req, schedules_create)),
        "schedules.update" => Some(with_db(state, req, schedules_update)),
        "schedules.delete" => Some(with_db(state, req, schedules_delete)),
        _ => None,
    }
}
