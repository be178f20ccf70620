use crate::ipc::handlers::setup::{load_calendar_setup, load_placeholder_defaults};
use crate::ipc::helpers::{
    db_err, ensure_exists, opt_date, opt_string, patch_nullable_string, patch_obj, required_str,
    today_utc, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::generator::ValidationWarning;
use crate::schedule::{
    generate_sessions, on_session_status_change, reconcile, snapshot_token, ClassSession,
    CourseWindow, GenerateOptions, SessionDiff, SessionStatus,
};
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value};

/// Everything needed to show or apply a course's calendar refresh.
struct SessionPlan {
    course_id: String,
    ideal_count: usize,
    persisted_count: usize,
    diff: SessionDiff,
    warnings: Vec<ValidationWarning>,
    snapshot_token: String,
}

/// Generation on a course without both bounds would plan to delete every
/// stored session, so the refresh is refused and the field named instead.
fn require_bounds(course: &CourseWindow) -> Result<(), HandlerErr> {
    let missing = if course.start_date.is_none() {
        "startDate"
    } else if course.end_date.is_none() {
        "endDate"
    } else {
        return Ok(());
    };
    Err(HandlerErr::new(
        "malformed_course_window",
        format!("course has no {}", missing),
    )
    .with_details(json!({ "courseId": course.course_id, "field": missing })))
}

fn derive_plan(conn: &Connection, params: &Value) -> Result<SessionPlan, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let today = opt_date(params, "today")?.unwrap_or_else(today_utc);

    let course = store::load_course_window(conn, &course_id)?;
    require_bounds(&course)?;
    let slots = store::load_schedule_slots(conn).map_err(db_err("db_query_failed"))?;
    let holidays = store::load_holidays(conn).map_err(db_err("db_query_failed"))?;
    let classrooms = store::load_classrooms(conn).map_err(db_err("db_query_failed"))?;
    let calendar = load_calendar_setup(conn);

    let generated = generate_sessions(
        &course,
        &slots,
        &holidays,
        &classrooms,
        GenerateOptions {
            past_sessions_done: calendar.past_sessions_done,
            ..GenerateOptions::new(today)
        },
    );
    let persisted =
        store::load_sessions_for_course(conn, &course_id).map_err(db_err("db_query_failed"))?;
    let diff = reconcile(&generated.sessions, &persisted);

    Ok(SessionPlan {
        course_id,
        ideal_count: generated.sessions.len(),
        persisted_count: persisted.len(),
        diff,
        warnings: generated.warnings,
        snapshot_token: snapshot_token(&persisted),
    })
}

fn sessions_preview(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan = derive_plan(conn, params)?;
    Ok(json!({
        "courseId": plan.course_id,
        "toAdd": plan.diff.to_add,
        "toDelete": plan.diff.to_delete,
        "warnings": plan.warnings,
        "inSync": plan.diff.is_in_sync(),
        "idealCount": plan.ideal_count,
        "persistedCount": plan.persisted_count,
        "snapshotToken": plan.snapshot_token
    }))
}

fn sessions_apply(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let expected_token = opt_string(params, "snapshotToken")?;
    let plan = derive_plan(conn, params)?;

    if let Some(expected) = expected_token {
        if expected != plan.snapshot_token {
            return Err(HandlerErr::new(
                "stale_snapshot",
                "course sessions changed since the preview; preview again",
            )
            .with_details(json!({
                "courseId": plan.course_id,
                "expected": expected,
                "actual": plan.snapshot_token
            })));
        }
    }

    if plan.diff.is_in_sync() {
        return Ok(json!({
            "courseId": plan.course_id,
            "inSync": true,
            "deleted": 0,
            "added": 0,
            "attendanceDeleted": 0,
            "warnings": plan.warnings
        }));
    }

    let applied = store::apply_session_diff(conn, &plan.diff).map_err(db_err("db_tx_failed"))?;
    tracing::info!(
        course_id = %plan.course_id,
        added = applied.added,
        deleted = applied.deleted,
        attendance_deleted = applied.attendance_deleted,
        "course sessions reconciled"
    );
    Ok(json!({
        "courseId": plan.course_id,
        "inSync": false,
        "deleted": applied.deleted,
        "added": applied.added,
        "attendanceDeleted": applied.attendance_deleted,
        "warnings": plan.warnings
    }))
}

fn sessions_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let course_id = required_str(params, "courseId")?;
    let status = match opt_string(params, "status")? {
        Some(raw) => Some(
            SessionStatus::parse(&raw)
                .ok_or_else(|| HandlerErr::bad_params("status must be pending, done or cancelled"))?,
        ),
        None => None,
    };
    let from = opt_date(params, "from")?;
    let to = opt_date(params, "to")?;
    ensure_exists(conn, "courses", &course_id, "course")?;

    let sessions: Vec<ClassSession> = store::load_sessions_for_course(conn, &course_id)
        .map_err(db_err("db_query_failed"))?
        .into_iter()
        .filter(|s| status.map_or(true, |st| s.status == st))
        .filter(|s| from.map_or(true, |d| s.date >= d))
        .filter(|s| to.map_or(true, |d| s.date <= d))
        .collect();
    Ok(json!({ "sessions": sessions }))
}

fn sessions_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session_id = required_str(params, "sessionId")?;
    let patch = patch_obj(params)?;
    let mut session = store::load_session(conn, &session_id)?;

    let mut status_changed = false;
    for (k, v) in patch {
        match k.as_str() {
            "status" => {
                session.status = v.as_str().and_then(SessionStatus::parse).ok_or_else(|| {
                    HandlerErr::bad_params("patch.status must be pending, done or cancelled")
                })?;
                status_changed = true;
            }
            "comment" => {
                session.comment = match v {
                    Value::Null => String::new(),
                    Value::String(s) => s.clone(),
                    _ => return Err(HandlerErr::bad_params("patch.comment must be string")),
                };
            }
            "teacherId" => {
                if let Some(teacher_id) = patch_nullable_string(patch, "teacherId")? {
                    session.teacher_id = teacher_id;
                }
            }
            "isSubstitution" => {
                session.is_substitution = v
                    .as_bool()
                    .ok_or_else(|| HandlerErr::bad_params("patch.isSubstitution must be boolean"))?;
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown session field: {}", k))),
        }
    }

    if !status_changed {
        store::update_session(conn, &session).map_err(db_err("db_update_failed"))?;
        return Ok(json!({ "session": session, "attendanceCreated": 0, "attendanceUpdated": 0 }));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    let enrollments = store::load_enrollments_for_course(&tx, &session.course_id)
        .map_err(db_err("db_query_failed"))?;
    let existing =
        store::load_attendance_for_session(&tx, &session.id).map_err(db_err("db_query_failed"))?;
    let changes = on_session_status_change(
        &session,
        &enrollments,
        &existing,
        load_placeholder_defaults(&tx),
    );
    if changes.mark_initialized {
        session.attendance_initialized = true;
    }
    store::update_session(&tx, &session).map_err(db_err("db_update_failed"))?;
    store::apply_attendance_changes(&tx, &changes).map_err(db_err("db_update_failed"))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;

    tracing::info!(
        session_id = %session.id,
        status = session.status.as_str(),
        created = changes.to_create.len(),
        updated = changes.to_update.len(),
        "session status changed"
    );
    Ok(json!({
        "session": session,
        "attendanceCreated": changes.to_create.len(),
        "attendanceUpdated": changes.to_update.len()
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.list" => Some(with_db(state, req, sessions_list)),
        "sessions.preview" => Some(with_db(state, req, sessions_preview)),
        "sessions.apply" => Some(with_db(state, req, sessions_apply)),
        "sessions.update" => Some(with_db(state, req, sessions_update)),
        _ => None,
    }
}
