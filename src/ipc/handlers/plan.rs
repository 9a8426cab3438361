use crate::datewise;
use crate::ipc::helpers::{date_param, require_db, require_snapshot, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::plan::{self, PeriodChoice, PeriodPlan};
use crate::session::Snapshot;
use chrono::NaiveDate;
use serde_json::{json, Value};

fn day_plan(snapshot: &Snapshot, date: NaiveDate) -> Vec<PeriodPlan> {
    let p = &snapshot.payload;
    let today = datewise::entry_for_date(&p.datewise_attendance, date);
    plan::build_day_plan(&p.attendance, &p.today_timetable, today)
}

fn plan_open(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let snapshot = require_snapshot(conn)?;
    let date = date_param(params)?;
    let periods = day_plan(&snapshot, date);
    let all_locked = !periods.is_empty() && periods.iter().all(|p| p.is_locked);
    Ok(json!({
        "date": date.format("%Y-%m-%d").to_string(),
        "periods": periods,
        "allLocked": all_locked,
    }))
}

fn plan_project(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let snapshot = require_snapshot(conn)?;
    let date = date_param(params)?;
    let choices: Vec<PeriodChoice> = match params.get("choices") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
            HandlerErr::new("bad_params", format!("choices must be [{{period, willAttend}}]: {e}"))
        })?,
    };

    let mut periods = day_plan(&snapshot, date);
    plan::apply_choices(&mut periods, &choices)?;
    let projection = plan::project_day(&snapshot.payload.attendance, &periods);
    let mut out = serde_json::to_value(projection)
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?;
    out["date"] = json!(date.format("%Y-%m-%d").to_string());
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "plan.open" => plan_open(state, &req.params),
        "plan.project" => plan_project(state, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
