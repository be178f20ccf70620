use crate::ipc::helpers::{
    db_err, ensure_exists, opt_string, patch_nullable_string, patch_obj, required_str, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{format_iso_date, HolidayDate};
use crate::store;
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde_json::{json, Value};
use uuid::Uuid;

/// Parses and checks a holiday date spec. Stored rows may be incomplete,
/// but anything written through here must form a real calendar date.
fn parse_holiday_date(raw: &Value) -> Result<HolidayDate, HandlerErr> {
    let date: HolidayDate = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid holiday date: {}", e)))?;
    let valid = match date {
        HolidayDate::Specific { day, month, year } => {
            NaiveDate::from_ymd_opt(year, month, day).is_some()
        }
        // Leap year so 29 February is accepted.
        HolidayDate::Recurring { day, month } => NaiveDate::from_ymd_opt(2000, month, day).is_some(),
        HolidayDate::Range {
            start_date,
            end_date,
        } => start_date <= end_date,
    };
    if !valid {
        return Err(HandlerErr::bad_params("holiday date does not form a valid day or range")
            .with_details(raw.clone()));
    }
    Ok(date)
}

type DateColumns = (
    &'static str,
    Option<u32>,
    Option<u32>,
    Option<i32>,
    Option<String>,
    Option<String>,
);

fn date_columns(date: &HolidayDate) -> DateColumns {
    match *date {
        HolidayDate::Specific { day, month, year } => {
            (date.kind(), Some(day), Some(month), Some(year), None, None)
        }
        HolidayDate::Recurring { day, month } => {
            (date.kind(), Some(day), Some(month), None, None, None)
        }
        HolidayDate::Range {
            start_date,
            end_date,
        } => (
            date.kind(),
            None,
            None,
            None,
            Some(format_iso_date(start_date)),
            Some(format_iso_date(end_date)),
        ),
    }
}

fn write_date(conn: &Connection, holiday_id: &str, date: &HolidayDate) -> Result<(), HandlerErr> {
    let (kind, day, month, year, start, end) = date_columns(date);
    conn.execute(
        "UPDATE holidays
         SET kind = ?, day = ?, month = ?, year = ?, start_date = ?, end_date = ?
         WHERE id = ?",
        params![kind, day, month, year, start, end, holiday_id],
    )
    .map_err(db_err("db_update_failed"))?;
    Ok(())
}

fn holidays_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let holidays = store::load_holidays(conn).map_err(db_err("db_query_failed"))?;
    Ok(json!({ "holidays": holidays }))
}

fn holidays_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let location = opt_string(params, "location")?;
    let raw_date = params
        .get("date")
        .ok_or_else(|| HandlerErr::bad_params("missing date"))?;
    let date = parse_holiday_date(raw_date)?;
    let (kind, day, month, year, start, end) = date_columns(&date);
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO holidays(id, name, location, kind, day, month, year, start_date, end_date)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![id, name, location, kind, day, month, year, start, end],
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "holidayId": id }))
}

fn holidays_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let holiday_id = required_str(params, "holidayId")?;
    let patch = patch_obj(params)?;
    ensure_exists(conn, "holidays", &holiday_id, "holiday")?;

    // Validate everything before the first write.
    let name = match patch.get("name") {
        None => None,
        Some(v) => Some(
            v.as_str()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| HandlerErr::bad_params("patch.name must be a non-empty string"))?,
        ),
    };
    let location = patch_nullable_string(patch, "location")?;
    let date = patch.get("date").map(parse_holiday_date).transpose()?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    if let Some(name) = name {
        tx.execute("UPDATE holidays SET name = ? WHERE id = ?", (name, &holiday_id))
            .map_err(db_err("db_update_failed"))?;
    }
    if let Some(location) = location {
        tx.execute(
            "UPDATE holidays SET location = ? WHERE id = ?",
            (&location, &holiday_id),
        )
        .map_err(db_err("db_update_failed"))?;
    }
    if let Some(date) = date {
        write_date(&tx, &holiday_id, &date)?;
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;
    Ok(json!({ "ok": true }))
}

fn holidays_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let holiday_id = required_str(params, "holidayId")?;
    ensure_exists(conn, "holidays", &holiday_id, "holiday")?;
    conn.execute("DELETE FROM holidays WHERE id = ?", [&holiday_id])
        .map_err(db_err("db_delete_failed"))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "holidays.list" => Some(with_db(state, req, holidays_list)),
        "holidays.create" => Some(with_db(state, req, holidays_create)),
        "holidays.update" => Some(with_db(state, req, holidays_update)),
        "holidays.delete" => Some(with_db(state, req, holidays_delete)),
        _ => None,
    }
}
