use crate::datewise::{self, DatewiseFilter, PeriodEdit, PeriodMark};
use crate::ipc::handlers::setup::datewise_default_filter;
use crate::ipc::helpers::{db_query_failed, require_db, require_snapshot, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn filter_param(conn: &Connection, params: &Value) -> Result<DatewiseFilter, HandlerErr> {
    match params.get("filter") {
        None | Some(Value::Null) => datewise_default_filter(conn).map_err(db_query_failed),
        Some(v) => v.as_str().and_then(DatewiseFilter::parse).ok_or_else(|| {
            HandlerErr::new(
                "bad_params",
                "filter must be one of: last5, last10, last20, all",
            )
        }),
    }
}

fn parse_edits(params: &Value) -> Result<Vec<PeriodEdit>, HandlerErr> {
    let Some(items) = params.get("edits").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "edits must be an array"));
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let bad = |msg: &str| {
            let mut e = HandlerErr::new("bad_params", format!("edits[{}]: {}", i, msg));
            e.details = Some(json!({ "index": i }));
            e
        };
        let date = item
            .get("date")
            .and_then(|v| v.as_str())
            .ok_or_else(|| bad("missing date"))?;
        let period = item
            .get("period")
            .and_then(|v| v.as_u64())
            .filter(|p| *p >= 1)
            .ok_or_else(|| bad("period must be a 1-based number"))?;
        let mark = item
            .get("mark")
            .and_then(|v| v.as_str())
            .and_then(PeriodMark::parse_strict)
            .ok_or_else(|| bad("mark must be P, A or -"))?;
        out.push(PeriodEdit {
            date: date.to_string(),
            period: period as usize,
            mark,
        });
    }
    Ok(out)
}

fn datewise_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let snapshot = require_snapshot(conn)?;
    let filter = filter_param(conn, params)?;
    let all = &snapshot.payload.datewise_attendance;
    let entries = datewise::apply_filter(all, filter);
    let window = datewise::tally(&entries);
    let overall = datewise::tally(all);
    Ok(json!({
        "filter": filter.key(),
        "entries": entries,
        "tally": window,
        "percentage": window.percentage(),
        "overall": overall,
        "overallPercentage": overall.percentage(),
    }))
}

fn datewise_project(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let snapshot = require_snapshot(conn)?;
    let filter = filter_param(conn, params)?;
    let edits = parse_edits(params)?;
    let all = &snapshot.payload.datewise_attendance;
    let window = datewise::apply_filter(all, filter);
    let projection = datewise::project_edits(all, &window, &edits)?;
    serde_json::to_value(projection).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn datewise_streak(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let snapshot = require_snapshot(conn)?;
    serde_json::to_value(datewise::streak(&snapshot.payload.datewise_attendance))
        .map_err(|e| HandlerErr::new("internal", e.to_string()))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "datewise.list" => datewise_list(state, &req.params),
        "datewise.project" => datewise_project(state, &req.params),
        "datewise.streak" => datewise_streak(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
