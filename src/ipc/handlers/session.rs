use crate::ipc::helpers::{
    db_query_failed, db_update_failed, get_required_str, require_db, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{self, LoginError, SessionStore, SqliteSessionStore};
use chrono::Utc;
use serde_json::json;

fn session_login(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let username = get_required_str(params, "username")?.trim();
    if username.is_empty() {
        return Err(HandlerErr::new("bad_params", "username must not be empty"));
    }
    let status = params
        .get("status")
        .and_then(|v| v.as_u64())
        .and_then(|s| u16::try_from(s).ok())
        .filter(|s| *s <= 999)
        .ok_or_else(|| HandlerErr::new("bad_params", "status must be an HTTP status code (0 for transport failures)"))?;
    let body = params.get("body").and_then(|v| v.as_str()).unwrap_or("");

    let store = SqliteSessionStore::new(conn);
    match session::apply_login(&store, username, status, body, Utc::now()) {
        Ok(outcome) => serde_json::to_value(outcome)
            .map_err(|e| HandlerErr::new("internal", e.to_string())),
        Err(LoginError::Rejected(failure)) => Err(HandlerErr {
            code: failure.code().to_string(),
            message: failure.message().to_string(),
            details: Some(json!({ "status": status })),
        }),
        Err(LoginError::Store(e)) => Err(db_update_failed(e)),
    }
}

fn session_get(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "loggedIn": false }));
    };
    let Some(snapshot) = SqliteSessionStore::new(conn).load().map_err(db_query_failed)? else {
        return Ok(json!({ "loggedIn": false }));
    };
    let attendance = snapshot
        .payload
        .attendance
        .iter()
        .map(|r| {
            let mut v = serde_json::to_value(r)
                .map_err(|e| HandlerErr::new("internal", e.to_string()))?;
            v["percentage"] = json!(r.percentage());
            Ok(v)
        })
        .collect::<Result<Vec<_>, HandlerErr>>()?;
    Ok(json!({
        "loggedIn": true,
        "snapshotId": snapshot.snapshot_id,
        "username": snapshot.username,
        "fetchedAt": snapshot.fetched_at,
        "payloadSha256": snapshot.payload_sha256,
        "attendance": attendance,
        "todayTimetable": snapshot.payload.today_timetable,
        "datewiseAttendance": snapshot.payload.datewise_attendance,
    }))
}

fn session_logout(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let cleared = session::logout(&SqliteSessionStore::new(conn)).map_err(db_update_failed)?;
    Ok(json!({ "cleared": cleared }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "session.login" => session_login(state, &req.params),
        "session.get" => session_get(state),
        "session.logout" => session_logout(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
