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
    let exe = env!("CARGO_BIN_EXE_registrard");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn registrard");
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn active_count(years: &serde_json::Value) -> usize {
    years["years"]
        .as_array()
        .expect("years array")
        .iter()
        .filter(|y| y["isActive"].as_bool() == Some(true))
        .count()
}

#[test]
fn activating_a_year_deactivates_every_other_one() {
    let workspace = temp_dir("registrar-years-active");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "years.create",
        json!({
            "name": "2024/2025",
            "startDate": "2024-09-01",
            "endDate": "2025-06-30",
            "isActive": true
        }),
    );
    let first_id = first["year"]["id"].as_str().expect("first id").to_string();

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "years.create",
        json!({
            "name": "2025/2026",
            "startDate": "2025-09-01",
            "endDate": "2026-06-30",
            "isActive": true
        }),
    );
    let second_id = second["year"]["id"].as_str().expect("second id").to_string();

    // Creating a second active year demotes the first.
    let years = request_ok(&mut stdin, &mut reader, "4", "years.list", json!({}));
    assert_eq!(active_count(&years), 1);
    let active = request_ok(&mut stdin, &mut reader, "5", "years.active", json!({}));
    assert_eq!(active["year"]["id"].as_str(), Some(second_id.as_str()));

    let first_row = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "years.get",
        json!({ "id": first_id }),
    );
    assert_eq!(first_row["year"]["isActive"].as_bool(), Some(false));

    // Re-activating the first through update flips the active year back.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "years.update",
        json!({
            "id": first_id,
            "name": "2024/2025",
            "startDate": "2024-09-01",
            "endDate": "2025-06-30",
            "isActive": true
        }),
    );
    let years = request_ok(&mut stdin, &mut reader, "8", "years.list", json!({}));
    assert_eq!(active_count(&years), 1);
    let active = request_ok(&mut stdin, &mut reader, "9", "years.active", json!({}));
    assert_eq!(active["year"]["id"].as_str(), Some(first_id.as_str()));

    // Duplicate names are rejected.
    let dup = request(
        &mut stdin,
        &mut reader,
        "10",
        "years.create",
        json!({
            "name": "2024/2025",
            "startDate": "2024-09-01",
            "endDate": "2025-06-30"
        }),
    );
    assert_eq!(dup["ok"].as_bool(), Some(false));
    assert_eq!(dup["error"]["code"].as_str(), Some("conflict"));

    // Deactivating every year leaves none active.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "years.update",
        json!({
            "id": first_id,
            "name": "2024/2025",
            "startDate": "2024-09-01",
            "endDate": "2025-06-30",
            "isActive": false
        }),
    );
    let none = request(&mut stdin, &mut reader, "12", "years.active", json!({}));
    assert_eq!(none["ok"].as_bool(), Some(false));
    assert_eq!(none["error"]["code"].as_str(), Some("not_found"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
