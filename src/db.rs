use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "bunk.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace directory {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    // One row at most: the last successful login replaces it wholesale.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_snapshot(
            id INTEGER PRIMARY KEY CHECK (id = 1),
            snapshot_id TEXT NOT NULL,
            username TEXT NOT NULL,
            fetched_at TEXT NOT NULL,
            payload_sha256 TEXT NOT NULL,
            attendance_json TEXT NOT NULL,
            timetable_json TEXT NOT NULL,
            datewise_json TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("setting {} is not valid JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Row shape of `session_snapshot`; the JSON columns are decoded by the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRow {
    pub snapshot_id: String,
    pub username: String,
    pub fetched_at: String,
    pub payload_sha256: String,
    pub attendance_json: String,
    pub timetable_json: String,
    pub datewise_json: String,
}

pub fn snapshot_get(conn: &Connection) -> anyhow::Result<Option<SnapshotRow>> {
    let row = conn
        .query_row(
            "SELECT snapshot_id, username, fetched_at, payload_sha256,
                    attendance_json, timetable_json, datewise_json
             FROM session_snapshot WHERE id = 1",
            [],
            |r| {
                Ok(SnapshotRow {
                    snapshot_id: r.get(0)?,
                    username: r.get(1)?,
                    fetched_at: r.get(2)?,
                    payload_sha256: r.get(3)?,
                    attendance_json: r.get(4)?,
                    timetable_json: r.get(5)?,
                    datewise_json: r.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn snapshot_put(conn: &Connection, row: &SnapshotRow) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM session_snapshot", [])?;
    tx.execute(
        "INSERT INTO session_snapshot(
            id, snapshot_id, username, fetched_at, payload_sha256,
            attendance_json, timetable_json, datewise_json
         ) VALUES(1, ?, ?, ?, ?, ?, ?, ?)",
        (
            &row.snapshot_id,
            &row.username,
            &row.fetched_at,
            &row.payload_sha256,
            &row.attendance_json,
            &row.timetable_json,
            &row.datewise_json,
        ),
    )?;
    tx.commit()?;
    Ok(())
}

pub fn snapshot_delete(conn: &Connection) -> anyhow::Result<usize> {
    Ok(conn.execute("DELETE FROM session_snapshot", [])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str) -> SnapshotRow {
        SnapshotRow {
            snapshot_id: id.to_string(),
            username: "160121733001".to_string(),
            fetched_at: "2026-10-16T08:00:00+00:00".to_string(),
            payload_sha256: "abc".to_string(),
            attendance_json: "[]".to_string(),
            timetable_json: "[]".to_string(),
            datewise_json: "[]".to_string(),
        }
    }

    #[test]
    fn snapshot_put_replaces_previous_row() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("schema");
        assert_eq!(snapshot_get(&conn).expect("get"), None);

        snapshot_put(&conn, &row("one")).expect("put one");
        snapshot_put(&conn, &row("two")).expect("put two");
        let got = snapshot_get(&conn).expect("get").expect("row");
        assert_eq!(got.snapshot_id, "two");

        assert_eq!(snapshot_delete(&conn).expect("delete"), 1);
        assert_eq!(snapshot_get(&conn).expect("get"), None);
    }

    #[test]
    fn settings_roundtrip_and_overwrite() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("schema");
        assert_eq!(settings_get_json(&conn, "setup.calculator").expect("get"), None);
        settings_set_json(&conn, "setup.calculator", &serde_json::json!({"targets": [80]}))
            .expect("set");
        settings_set_json(&conn, "setup.calculator", &serde_json::json!({"targets": [70]}))
            .expect("set again");
        assert_eq!(
            settings_get_json(&conn, "setup.calculator").expect("get"),
            Some(serde_json::json!({"targets": [70]}))
        );
    }
}
