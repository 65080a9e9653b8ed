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
    let exe = env!("CARGO_BIN_EXE_rollsyncd");
    let mut child = Command::new(exe)
        .env("ROLLSYNC_PAGE_SIZE", "2")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollsyncd");
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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .cloned()
            .unwrap_or_else(|| json!({ "code": "unknown" }))
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("rollsync-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(
        health.get("config").and_then(|c| c.get("pageSize")).and_then(|v| v.as_u64()),
        Some(2)
    );
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    let unknown = request(&mut stdin, &mut reader, "2", "grades.open", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    let missing = request(&mut stdin, &mut reader, "3", "workspace.select", json!({}));
    assert_eq!(error_code(&missing), "bad_params");

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classes.create",
        json!({ "name": "Smoke Class" }),
    )
    .get("classId")
    .and_then(|v| v.as_str())
    .expect("classId")
    .to_string();

    let classes = request_ok(&mut stdin, &mut reader, "6", "classes.list", json!({}));
    assert_eq!(
        classes.get("classes").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    let mut students = Vec::new();
    for (i, (name, points)) in [("Ada", 520), ("Brook", 210), ("Cyd", 10)].iter().enumerate() {
        let sid = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({ "classId": class_id, "displayName": name, "points": points }),
        )
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
        students.push(sid);
    }
    let awarded = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "points.award",
        json!({ "studentId": students[2], "points": 45 }),
    );
    assert_eq!(awarded.get("points").and_then(|v| v.as_i64()), Some(55));

    let board = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "leaderboard.open",
        json!({ "classId": class_id }),
    );
    assert_eq!(board.get("total").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(board.get("visibleCount").and_then(|v| v.as_u64()), Some(2));
    let entries = board.get("entries").and_then(|v| v.as_array()).cloned().expect("entries");
    assert_eq!(entries[0].get("studentName").and_then(|v| v.as_str()), Some("Ada"));
    assert_eq!(entries[0].get("tier").and_then(|v| v.as_str()), Some("gold"));
    assert_eq!(entries[1].get("tier").and_then(|v| v.as_str()), Some("silver"));
    let tiers = board
        .get("aggregate")
        .and_then(|a| a.get("countsByCategory"))
        .cloned()
        .expect("tier counts");
    assert_eq!(tiers.get("bronze").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(tiers.get("unranked").and_then(|v| v.as_u64()), Some(0));

    let more = request_ok(&mut stdin, &mut reader, "9", "leaderboard.more", json!({}));
    assert_eq!(more.get("added").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(more.get("hasMore").and_then(|v| v.as_bool()), Some(false));

    let opened = request_ok(&mut stdin, &mut reader, "10", "attendance.open", json!({}));
    assert_eq!(opened.get("total").and_then(|v| v.as_u64()), Some(0));
    let visible = request_ok(&mut stdin, &mut reader, "11", "attendance.visible", json!({}));
    assert_eq!(visible.get("hasMore").and_then(|v| v.as_bool()), Some(false));

    let bad_date = request(
        &mut stdin,
        &mut reader,
        "12",
        "attendance.open",
        json!({ "date": "02/09/2024" }),
    );
    assert_eq!(error_code(&bad_date), "bad_params");

    let missing_class = request(
        &mut stdin,
        &mut reader,
        "13",
        "leaderboard.open",
        json!({ "classId": "nope" }),
    );
    assert_eq!(error_code(&missing_class), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unparseable_line_gets_bad_json_reply() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&value), "bad_json");

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").is_some());

    drop(stdin);
    let _ = child.wait();
}
