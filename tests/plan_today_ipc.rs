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
    serde_json::from_str(line.trim()).expect("parse response json")
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

fn approx(v: &serde_json::Value, expected: f64) {
    let got = v.as_f64().unwrap_or_else(|| panic!("not a number: {}", v));
    assert!((got - expected).abs() < 1e-9, "expected {}, got {}", expected, got);
}

const LOGIN_BODY: &str = r#"{
    "attendance": [
        {"subject": "CS101: Algorithms", "held": 20, "attended": 15},
        {"subject": "MA102: Calculus", "held": 10, "attended": 6},
        {"subject": "Total", "held": 30, "attended": 21}
    ],
    "todayTimetable": [
        {"period": "P1", "subject": "CS101"},
        {"period": "P2", "subject": "Free"},
        {"period": "P4", "subject": "CS101 (Lab)"},
        {"period": "P3", "subject": "MA102 (Tutorial)"}
    ],
    "datewiseAttendance": [
        {"date": "10/16/2026 (Fri)", "periods": ["P", "-", "-", "-"]},
        {"date": "10/15/2026 (Thu)", "periods": ["P", "P", "-", "P"]},
        {"date": "10/14/2026 (Wed)", "periods": ["A", "P", "P", "P"]}
    ]
}"#;

fn logged_in(prefix: &str) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "login",
        "session.login",
        json!({ "username": "alice", "status": 200, "body": LOGIN_BODY }),
    );
    (child, stdin, reader)
}

#[test]
fn open_orders_periods_and_locks_recorded_slots() {
    let (mut child, mut stdin, mut reader) = logged_in("bunkd-plan-open");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "plan.open",
        json!({ "date": "2026-10-16" }),
    );
    assert_eq!(res["date"], json!("2026-10-16"));
    let periods = res["periods"].as_array().expect("periods");
    let labels: Vec<&str> = periods.iter().filter_map(|p| p["period"].as_str()).collect();
    assert_eq!(labels, vec!["P1", "P3", "P4"]);

    assert_eq!(periods[0]["isLocked"], json!(true));
    assert_eq!(periods[0]["status"], json!("P"));
    assert_eq!(periods[0]["willAttend"], json!(true));
    assert_eq!(periods[1]["subject"], json!("MA102: Calculus"));
    assert_eq!(periods[1]["recordIndex"], json!(1));
    assert_eq!(periods[1]["isLocked"], json!(false));
    assert!(periods[1]["status"].is_null());
    assert_eq!(periods[2]["recordIndex"], json!(0));
    assert_eq!(res["allLocked"], json!(false));

    // P4 is locked by its own slot, not by its position in the timetable.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "plan.open",
        json!({ "date": "2026-10-15" }),
    );
    let locked: Vec<bool> = res["periods"]
        .as_array()
        .expect("periods")
        .iter()
        .map(|p| p["isLocked"].as_bool().unwrap_or(false))
        .collect();
    assert_eq!(locked, vec![true, false, true]);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "plan.open",
        json!({ "date": "2026-10-14" }),
    );
    assert_eq!(res["allLocked"], json!(true));
    assert_eq!(res["periods"][0]["status"], json!("A"));
    assert_eq!(res["periods"][0]["willAttend"], json!(false));

    let bad = request(
        &mut stdin,
        &mut reader,
        "4",
        "plan.open",
        json!({ "date": "16/10/2026" }),
    );
    assert_eq!(bad["error"]["code"], json!("bad_params"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn project_applies_choices_without_touching_locked_periods() {
    let (mut child, mut stdin, mut reader) = logged_in("bunkd-plan-project");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "plan.project",
        json!({
            "date": "2026-10-16",
            "choices": [
                { "period": "P4", "willAttend": true },
                { "period": "P3", "willAttend": false }
            ]
        }),
    );
    let subjects = res["subjects"].as_array().expect("subjects");
    assert_eq!(subjects.len(), 2);
    let cs = &subjects[0];
    assert_eq!(cs["addedHeld"], json!(1));
    assert_eq!(cs["addedAttended"], json!(1));
    approx(&cs["projectedPercentage"], 100.0 * 16.0 / 21.0);
    let ma = &subjects[1];
    assert_eq!(ma["addedHeld"], json!(1));
    assert_eq!(ma["addedAttended"], json!(0));
    approx(&ma["projectedPercentage"], 100.0 * 6.0 / 11.0);

    assert_eq!(res["overallSource"], json!("totalRow"));
    approx(&res["overallBefore"], 70.0);
    approx(&res["overallAfter"], 68.75);
    approx(&res["periods"][0]["change"], 0.0);

    // Stored counters are not mutated by projection.
    let subjects = request_ok(&mut stdin, &mut reader, "2", "calc.subjects", json!({}));
    assert_eq!(subjects["subjects"][0]["held"], json!(20));

    let locked = request(
        &mut stdin,
        &mut reader,
        "3",
        "plan.project",
        json!({ "date": "2026-10-16", "choices": [{ "period": "P1", "willAttend": false }] }),
    );
    assert_eq!(locked["error"]["code"], json!("period_locked"));

    let missing = request(
        &mut stdin,
        &mut reader,
        "4",
        "plan.project",
        json!({ "date": "2026-10-16", "choices": [{ "period": "P9", "willAttend": true }] }),
    );
    assert_eq!(missing["error"]["code"], json!("not_found"));

    let malformed = request(
        &mut stdin,
        &mut reader,
        "5",
        "plan.project",
        json!({ "date": "2026-10-16", "choices": "P1" }),
    );
    assert_eq!(malformed["error"]["code"], json!("bad_params"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn choice_applies_to_every_open_period_of_the_subject() {
    let (mut child, mut stdin, mut reader) = logged_in("bunkd-plan-grouping");

    // No datewise entry for this day, so nothing is locked.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "plan.project",
        json!({ "date": "2026-10-20", "choices": [{ "period": "P1", "willAttend": true }] }),
    );
    assert_eq!(res["allLocked"], json!(false));
    let cs = &res["subjects"][0];
    assert_eq!(cs["addedHeld"], json!(2));
    assert_eq!(cs["addedAttended"], json!(2));
    approx(&cs["projectedPercentage"], 100.0 * 17.0 / 22.0);
    let will: Vec<bool> = res["periods"]
        .as_array()
        .expect("periods")
        .iter()
        .filter(|p| p["recordIndex"] == json!(0))
        .map(|p| p["willAttend"].as_bool().unwrap_or(false))
        .collect();
    assert_eq!(will, vec![true, true]);

    drop(stdin);
    let _ = child.wait();
}
