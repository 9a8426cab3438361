use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn logged_in(state: &AppState) -> Result<bool, String> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(false);
    };
    db::snapshot_get(conn)
        .map(|row| row.is_some())
        .map_err(|e| format!("{e:#}"))
}

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let has_session = match logged_in(state) {
        Ok(v) => v,
        Err(msg) => {
            log::warn!("session lookup failed during health check: {}", msg);
            return err(&req.id, "db_query_failed", msg, None);
        }
    };
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace_path(),
            "loggedIn": has_session,
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            log::info!("workspace opened at {}", path.to_string_lossy());
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn health(state: &mut AppState) -> serde_json::Value {
        let req = Request {
            id: "h".to_string(),
            method: "health".to_string(),
            params: json!({}),
        };
        handle_health(state, &req)
    }

    #[test]
    fn health_reports_session_presence() {
        let mut state = AppState::default();
        assert_eq!(health(&mut state)["result"]["loggedIn"], json!(false));

        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        state.db = Some(conn);
        assert_eq!(health(&mut state)["result"]["loggedIn"], json!(false));
    }

    #[test]
    fn health_surfaces_a_broken_store() {
        // No schema: the snapshot lookup itself fails.
        let mut state = AppState {
            workspace: None,
            db: Some(Connection::open_in_memory().expect("open")),
        };
        let resp = health(&mut state);
        assert_eq!(resp["ok"], json!(false));
        assert_eq!(resp["error"]["code"], json!("db_query_failed"));
    }
}
