use crate::db;
use crate::ipc::helpers::{with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{Lateness, PlaceholderDefaults};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Calendar,
    Attendance,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "calendar" => Some(Self::Calendar),
            "attendance" => Some(Self::Attendance),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Calendar => "setup.calendar",
            Self::Attendance => "setup.attendance",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Calendar => json!({
            "pastSessionsDone": true
        }),
        SetupSection::Attendance => json!({
            "autoMarkPresent": true,
            "defaultLate": "No"
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Calendar => match k.as_str() {
                "pastSessionsDone" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown calendar field: {}", k)),
            },
            SetupSection::Attendance => match k.as_str() {
                "autoMarkPresent" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "defaultLate" => {
                    let late = v
                        .as_str()
                        .and_then(Lateness::parse)
                        .ok_or_else(|| "defaultLate must be one of: No, Late, VeryLate".to_string())?;
                    obj.insert(k.clone(), Value::String(late.as_str().to_string()));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a stale stored field must not block the workspace.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

#[derive(Debug, Clone, Copy)]
pub struct CalendarSetup {
    pub past_sessions_done: bool,
}

pub fn load_calendar_setup(conn: &Connection) -> CalendarSetup {
    let section = load_section(conn, SetupSection::Calendar)
        .unwrap_or_else(|_| default_section(SetupSection::Calendar));
    CalendarSetup {
        past_sessions_done: section
            .get("pastSessionsDone")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
    }
}

pub fn load_placeholder_defaults(conn: &Connection) -> PlaceholderDefaults {
    let section = load_section(conn, SetupSection::Attendance)
        .unwrap_or_else(|_| default_section(SetupSection::Attendance));
    let fallback = PlaceholderDefaults::default();
    PlaceholderDefaults {
        attended: section
            .get("autoMarkPresent")
            .and_then(|v| v.as_bool())
            .unwrap_or(fallback.attended),
        late: section
            .get("defaultLate")
            .and_then(|v| v.as_str())
            .and_then(Lateness::parse)
            .unwrap_or(fallback.late),
    }
}

fn setup_get(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let calendar = load_section(conn, SetupSection::Calendar)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let attendance = load_section(conn, SetupSection::Attendance)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({
        "calendar": calendar,
        "attendance": attendance
    }))
}

fn setup_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let Some(section_raw) = params.get("section").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing section"));
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return Err(HandlerErr::bad_params("unknown section"));
    };
    let Some(patch_obj) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut current = load_section(conn, section)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    merge_section_patch(section, &mut current, patch_obj).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &current)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tracing::info!(section = section_raw, "setup section updated");
    Ok(json!({ "ok": true, "section": section_raw, "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(with_db(state, req, setup_get)),
        "setup.update" => Some(with_db(state, req, setup_update)),
        _ => None,
    }
}
