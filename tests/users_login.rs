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

#[test]
fn login_checks_credentials_and_account_status() {
    let workspace = temp_dir("registrar-users-login");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let user = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({
            "fullName": "Selam Worku",
            "email": "Selam@School.Example",
            "password": "correct horse battery",
            "title": "officer",
            "phone": "0911-000000"
        }),
    );
    let user_id = user["user"]["id"].as_str().unwrap().to_string();
    // Emails normalize to lowercase, and the hash never leaves the store.
    assert_eq!(user["user"]["email"].as_str(), Some("selam@school.example"));
    assert!(user["user"].get("passwordHash").is_none());
    assert!(user["user"].get("password").is_none());

    let login = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.login",
        json!({ "email": "selam@school.example", "password": "correct horse battery" }),
    );
    assert_eq!(login["user"]["id"].as_str(), Some(user_id.as_str()));

    let wrong = request(
        &mut stdin,
        &mut reader,
        "4",
        "users.login",
        json!({ "email": "selam@school.example", "password": "wrong password" }),
    );
    assert_eq!(wrong["ok"].as_bool(), Some(false));
    assert_eq!(wrong["error"]["code"].as_str(), Some("bad_params"));

    let unknown = request(
        &mut stdin,
        &mut reader,
        "5",
        "users.login",
        json!({ "email": "nobody@school.example", "password": "whatever" }),
    );
    assert_eq!(unknown["ok"].as_bool(), Some(false));
    assert_eq!(unknown["error"]["code"].as_str(), Some("not_found"));

    // Duplicate email and duplicate full name are both write conflicts.
    let dup_email = request(
        &mut stdin,
        &mut reader,
        "6",
        "users.create",
        json!({
            "fullName": "Another Person",
            "email": "selam@school.example",
            "password": "irrelevant-pass",
            "title": "admin"
        }),
    );
    assert_eq!(dup_email["ok"].as_bool(), Some(false));
    assert_eq!(dup_email["error"]["code"].as_str(), Some("conflict"));

    let dup_name = request(
        &mut stdin,
        &mut reader,
        "7",
        "users.create",
        json!({
            "fullName": "Selam Worku",
            "email": "selam2@school.example",
            "password": "irrelevant-pass",
            "title": "admin"
        }),
    );
    assert_eq!(dup_name["ok"].as_bool(), Some(false));
    assert_eq!(dup_name["error"]["code"].as_str(), Some("conflict"));

    // Deactivated accounts cannot log in even with the right password.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "users.update",
        json!({
            "id": user_id,
            "fullName": "Selam Worku",
            "email": "selam@school.example",
            "title": "officer",
            "status": "inactive"
        }),
    );
    let inactive = request(
        &mut stdin,
        &mut reader,
        "9",
        "users.login",
        json!({ "email": "selam@school.example", "password": "correct horse battery" }),
    );
    assert_eq!(inactive["ok"].as_bool(), Some(false));
    assert_eq!(inactive["error"]["code"].as_str(), Some("bad_params"));

    let bad_title = request(
        &mut stdin,
        &mut reader,
        "10",
        "users.create",
        json!({
            "fullName": "Bad Title",
            "email": "bad-title@school.example",
            "password": "irrelevant-pass",
            "title": "janitor"
        }),
    );
    assert_eq!(bad_title["ok"].as_bool(), Some(false));
    assert_eq!(bad_title["error"]["code"].as_str(), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
