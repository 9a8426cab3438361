use crate::calc;
use crate::db::{self, SnapshotRow};
use crate::payload::{self, LoginFailure, LoginPayload};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// The cached result of the last successful login.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub snapshot_id: String,
    pub username: String,
    pub fetched_at: String,
    pub payload_sha256: String,
    #[serde(flatten)]
    pub payload: LoginPayload,
}

/// Where the login snapshot lives. Replaced wholesale on login, cleared on logout.
pub trait SessionStore {
    fn load(&self) -> anyhow::Result<Option<Snapshot>>;
    fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()>;
    /// Returns whether anything was cleared.
    fn clear(&self) -> anyhow::Result<bool>;
}

pub struct SqliteSessionStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSessionStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn decode_list<T: DeserializeOwned>(raw: &str, column: &str) -> Vec<T> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect(),
        _ => {
            log::warn!("cached {} is not a JSON array; using an empty list", column);
            Vec::new()
        }
    }
}

impl SessionStore for SqliteSessionStore<'_> {
    fn load(&self) -> anyhow::Result<Option<Snapshot>> {
        let Some(row) = db::snapshot_get(self.conn)? else {
            return Ok(None);
        };
        Ok(Some(Snapshot {
            snapshot_id: row.snapshot_id,
            username: row.username,
            fetched_at: row.fetched_at,
            payload_sha256: row.payload_sha256,
            payload: LoginPayload {
                attendance: decode_list(&row.attendance_json, "attendance"),
                today_timetable: decode_list(&row.timetable_json, "timetable"),
                datewise_attendance: decode_list(&row.datewise_json, "datewise attendance"),
            },
        }))
    }

    fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let p = &snapshot.payload;
        let row = SnapshotRow {
            snapshot_id: snapshot.snapshot_id.clone(),
            username: snapshot.username.clone(),
            fetched_at: snapshot.fetched_at.clone(),
            payload_sha256: snapshot.payload_sha256.clone(),
            attendance_json: serde_json::to_string(&p.attendance)?,
            timetable_json: serde_json::to_string(&p.today_timetable)?,
            datewise_json: serde_json::to_string(&p.datewise_attendance)?,
        };
        db::snapshot_put(self.conn, &row).context("failed to store session snapshot")
    }

    fn clear(&self) -> anyhow::Result<bool> {
        Ok(db::snapshot_delete(self.conn)? > 0)
    }
}

#[derive(Debug)]
pub enum LoginError {
    Rejected(LoginFailure),
    Store(anyhow::Error),
}

impl From<anyhow::Error> for LoginError {
    fn from(e: anyhow::Error) -> Self {
        Self::Store(e)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub snapshot_id: String,
    pub username: String,
    pub fetched_at: String,
    pub subject_count: usize,
    pub timetable_count: usize,
    pub datewise_count: usize,
    pub changed: bool,
}

/// Interprets the backend's login response and, on success only, replaces the
/// stored snapshot. A rejected login leaves the store untouched.
pub fn apply_login(
    store: &dyn SessionStore,
    username: &str,
    status: u16,
    body: &str,
    now: DateTime<Utc>,
) -> Result<LoginOutcome, LoginError> {
    let payload = payload::interpret_login_response(status, body).map_err(|f| {
        log::info!("login for {} rejected: {}", username, f.code());
        LoginError::Rejected(f)
    })?;
    let sha = payload::fingerprint(&payload)?;
    let previous = store.load()?;
    let changed = previous
        .as_ref()
        .map(|p| p.payload_sha256 != sha || p.username != username)
        .unwrap_or(true);

    let snapshot = Snapshot {
        snapshot_id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        fetched_at: now.to_rfc3339(),
        payload_sha256: sha,
        payload,
    };
    store.save(&snapshot)?;
    log::info!(
        "stored snapshot {} for {} ({} rows, sha256 {})",
        snapshot.snapshot_id,
        username,
        snapshot.payload.attendance.len(),
        snapshot.payload_sha256
    );

    Ok(LoginOutcome {
        snapshot_id: snapshot.snapshot_id,
        username: snapshot.username,
        fetched_at: snapshot.fetched_at,
        subject_count: calc::subject_indices(&snapshot.payload.attendance).len(),
        timetable_count: snapshot.payload.today_timetable.len(),
        datewise_count: snapshot.payload.datewise_attendance.len(),
        changed,
    })
}

pub fn logout(store: &dyn SessionStore) -> anyhow::Result<bool> {
    let cleared = store.clear()?;
    if cleared {
        log::info!("session snapshot cleared");
    }
    Ok(cleared)
}
