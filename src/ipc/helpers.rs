use crate::calc::CalcError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::AppState;
use crate::session::{SessionStore, Snapshot, SqliteSessionStore};
use chrono::{Local, NaiveDate};
use rusqlite::Connection;

pub struct HandlerErr {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, &self.code, self.message, self.details)
    }
}

impl From<CalcError> for HandlerErr {
    fn from(e: CalcError) -> Self {
        Self {
            code: e.code,
            message: e.message,
            details: e.details,
        }
    }
}

pub fn db_query_failed(e: anyhow::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", format!("{e:#}"))
}

pub fn db_update_failed(e: anyhow::Error) -> HandlerErr {
    HandlerErr::new("db_update_failed", format!("{e:#}"))
}

pub fn respond(id: &str, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_snapshot(conn: &Connection) -> Result<Snapshot, HandlerErr> {
    SqliteSessionStore::new(conn)
        .load()
        .map_err(db_query_failed)?
        .ok_or_else(|| HandlerErr::new("no_session", "log in first"))
}

pub fn get_required_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

/// `params.date` as `YYYY-MM-DD`, defaulting to the local calendar day.
pub fn date_param(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    match params.get("date") {
        None | Some(serde_json::Value::Null) => Ok(Local::now().date_naive()),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| HandlerErr::new("bad_params", "date must be a string"))?;
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|_| HandlerErr::new("bad_params", "date must be YYYY-MM-DD"))
        }
    }
}
