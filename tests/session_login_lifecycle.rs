use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_bunkd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn bunkd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(resp: &serde_json::Value) -> String {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

const LOGIN_BODY: &str = r#"{
    "attendance": [
        {"subject": "CS101: Algorithms", "faculty": "Dr. Rao", "held": "20", "attended": "15"},
        {"subject": "MA102: Calculus", "held": 10, "attended": 6, "bunk75": "2"},
        {"subject": "Total", "held": 30, "attended": 21}
    ],
    "todayTimetable": [{"period": "P1", "subject": "CS101"}],
    "datewiseAttendance": [{"date": "10/16/2026 (Fri)", "periods": ["P", "-"]}]
}"#;

#[test]
fn login_failures_are_classified_and_leave_no_session() {
    let workspace = temp_dir("bunkd-login-failures");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let cases = [
        (500, "Python script error: login failed", "invalid_credentials"),
        (500, "boom", "system_error"),
        (400, "No output from Python script", "invalid_credentials"),
        (400, "Invalid data format", "system_error"),
        (400, "whatever", "invalid_request"),
        (503, "", "server_error"),
        (0, "TypeError: Failed to fetch", "unreachable"),
        (0, "", "network_error"),
        (200, r#"{"attendance": []}"#, "no_attendance"),
        (200, "<html>not json</html>", "system_error"),
    ];
    for (i, (status, body, code)) in cases.iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "session.login",
            json!({ "username": "alice", "status": status, "body": body }),
        );
        assert_eq!(resp["ok"], json!(false), "status {} body {:?}", status, body);
        assert_eq!(error_code(&resp), *code, "status {} body {:?}", status, body);
        assert!(resp["error"]["message"].as_str().is_some_and(|m| !m.is_empty()));
    }

    let get = request_ok(&mut stdin, &mut reader, "g", "session.get", json!({}));
    assert_eq!(get["loggedIn"], json!(false));

    let bad = request(
        &mut stdin,
        &mut reader,
        "b",
        "session.login",
        json!({ "username": "  ", "status": 200, "body": LOGIN_BODY }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn login_persists_across_restart_until_logout() {
    let workspace = temp_dir("bunkd-login-lifecycle");

    let first_id = {
        let (mut child, mut stdin, mut reader) = spawn_sidecar();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        let login = request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "session.login",
            json!({ "username": "alice", "status": 200, "body": LOGIN_BODY }),
        );
        assert_eq!(login["username"], json!("alice"));
        assert_eq!(login["subjectCount"], json!(2));
        assert_eq!(login["timetableCount"], json!(1));
        assert_eq!(login["datewiseCount"], json!(1));
        assert_eq!(login["changed"], json!(true));

        let again = request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "session.login",
            json!({ "username": "alice", "status": 200, "body": LOGIN_BODY }),
        );
        assert_eq!(again["changed"], json!(false));
        assert_ne!(again["snapshotId"], login["snapshotId"]);

        // A failed refresh keeps the cached snapshot.
        let failed = request(
            &mut stdin,
            &mut reader,
            "4",
            "session.login",
            json!({ "username": "alice", "status": 500, "body": "boom" }),
        );
        assert_eq!(error_code(&failed), "system_error");

        drop(stdin);
        let _ = child.wait();
        again["snapshotId"].clone()
    };

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let get = request_ok(&mut stdin, &mut reader, "2", "session.get", json!({}));
    assert_eq!(get["loggedIn"], json!(true));
    assert_eq!(get["snapshotId"], first_id);
    assert_eq!(get["username"], json!("alice"));
    assert_eq!(get["attendance"][0]["held"], json!(20));
    assert_eq!(get["attendance"][0]["faculty"], json!("Dr. Rao"));
    assert_eq!(get["attendance"][0]["percentage"], json!(75.0));
    assert_eq!(get["attendance"][1]["bunk75"], json!(2));
    assert_eq!(get["todayTimetable"][0]["period"], json!("P1"));
    assert_eq!(get["datewiseAttendance"][0]["periods"], json!(["P", "-"]));

    let out = request_ok(&mut stdin, &mut reader, "3", "session.logout", json!({}));
    assert_eq!(out["cleared"], json!(true));
    let out = request_ok(&mut stdin, &mut reader, "4", "session.logout", json!({}));
    assert_eq!(out["cleared"], json!(false));

    let get = request_ok(&mut stdin, &mut reader, "5", "session.get", json!({}));
    assert_eq!(get["loggedIn"], json!(false));
    let calc = request(&mut stdin, &mut reader, "6", "calc.subjects", json!({}));
    assert_eq!(error_code(&calc), "no_session");

    drop(stdin);
    let _ = child.wait();
}
