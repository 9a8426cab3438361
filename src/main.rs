mod calc;
mod datewise;
mod db;
mod ipc;
mod payload;
mod plan;
mod session;

use std::io::{self, BufRead, Write};

fn main() {
    // stdout carries the protocol; logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("bunkd {} starting", env!("CARGO_PKG_VERSION"));

    let mut state = ipc::AppState::default();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                log::error!("stdin read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to reply to.
                log::warn!("dropping malformed request: {}", e);
                let _ = writeln!(stdout, "{}", ipc::bad_json(e.to_string()));
                let _ = stdout.flush();
                continue;
            }
        };

        log::debug!("request {} {}", req.id, req.method);
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    log::info!("stdin closed, exiting");
}
