use crate::calc::{self, Counts};
use crate::ipc::handlers::setup::calculator_settings;
use crate::ipc::helpers::{db_query_failed, require_db, require_snapshot, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

enum Selection {
    Overall,
    Subject(usize),
}

fn parse_selection(params: &Value) -> Result<Selection, HandlerErr> {
    match params.get("subject") {
        None | Some(Value::Null) => Ok(Selection::Overall),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|i| Selection::Subject(i as usize))
            .ok_or_else(|| HandlerErr::new("bad_params", "subject index must be non-negative")),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("overall") {
                return Ok(Selection::Overall);
            }
            s.parse::<usize>()
                .map(Selection::Subject)
                .map_err(|_| HandlerErr::new("bad_params", "subject must be \"overall\" or an index"))
        }
        Some(_) => Err(HandlerErr::new(
            "bad_params",
            "subject must be \"overall\" or an index",
        )),
    }
}

fn counts_json(counts: Counts) -> Value {
    json!({
        "held": counts.held,
        "attended": counts.attended,
        "percentage": counts.percentage(),
    })
}

fn calc_subjects(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let snapshot = require_snapshot(conn)?;
    let settings = calculator_settings(conn).map_err(db_query_failed)?;
    let records = &snapshot.payload.attendance;
    let overall = calc::overall(records);
    let mut total = counts_json(overall.counts);
    total["source"] = json!(overall.source);
    Ok(json!({
        "subjects": calc::subject_rows(records, settings.bands),
        "total": total,
    }))
}

fn calc_thresholds(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let snapshot = require_snapshot(conn)?;
    let settings = calculator_settings(conn).map_err(db_query_failed)?;
    let records = &snapshot.payload.attendance;

    let (label, counts, server, source) = match parse_selection(params)? {
        Selection::Overall => {
            let overall = calc::overall(records);
            ("Overall".to_string(), overall.counts, None, json!(overall.source))
        }
        Selection::Subject(i) => {
            if !calc::subject_indices(records).contains(&i) {
                return Err(HandlerErr {
                    code: "not_found".into(),
                    message: format!("no subject at index {}", i),
                    details: Some(json!({ "index": i })),
                });
            }
            let r = &records[i];
            (r.subject.clone(), r.counts(), Some(&r.server), json!("subject"))
        }
    };

    Ok(json!({
        "subject": label,
        "counts": counts_json(counts),
        "source": source,
        "rows": calc::threshold_table(counts, server, &settings.targets),
    }))
}

fn calc_overview(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let snapshot = require_snapshot(conn)?;
    let settings = calculator_settings(conn).map_err(db_query_failed)?;
    serde_json::to_value(calc::overview(&snapshot.payload.attendance, settings.bands))
        .map_err(|e| HandlerErr::new("internal", e.to_string()))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "calc.subjects" => calc_subjects(state),
        "calc.thresholds" => calc_thresholds(state, &req.params),
        "calc.overview" => calc_overview(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
