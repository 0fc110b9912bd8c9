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
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
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
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("registrar-router-smoke");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let year = request_ok(
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
    let year_id = year["year"]["id"].as_str().expect("year id").to_string();
    let _ = request_ok(&mut stdin, &mut reader, "4", "years.list", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "5", "years.active", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "years.get",
        json!({ "id": year_id }),
    );

    let faculty = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "faculties.create",
        json!({ "name": "Engineering" }),
    );
    let faculty_id = faculty["faculty"]["id"].as_str().expect("faculty id").to_string();
    let _ = request_ok(&mut stdin, &mut reader, "8", "faculties.list", json!({}));

    let department = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "departments.create",
        json!({ "name": "Computer Science", "facultyId": faculty_id }),
    );
    let department_id = department["department"]["id"]
        .as_str()
        .expect("department id")
        .to_string();
    let _ = request_ok(&mut stdin, &mut reader, "10", "departments.list", json!({}));

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "classes.create",
        json!({
            "semester": 1,
            "classMode": "full time",
            "departmentId": department_id
        }),
    );
    let class_id = class["class"]["id"].as_str().expect("class id").to_string();
    assert_eq!(
        class["class"]["academicYearId"].as_str(),
        Some(year_id.as_str()),
        "new class binds to the active year"
    );
    let _ = request_ok(&mut stdin, &mut reader, "12", "classes.list", json!({}));

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "users.create",
        json!({
            "fullName": "Amina Yusuf",
            "email": "amina@school.example",
            "password": "s3cret-pass",
            "title": "teacher"
        }),
    );
    let teacher_id = teacher["user"]["id"].as_str().expect("teacher id").to_string();
    let _ = request_ok(&mut stdin, &mut reader, "14", "users.list", json!({}));

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "courses.create",
        json!({
            "courseName": "Data Structures",
            "code": "CS201",
            "semester": 1,
            "departmentId": department_id,
            "teacherId": teacher_id
        }),
    );
    let course_id = course["course"]["id"].as_str().expect("course id").to_string();
    let _ = request_ok(&mut stdin, &mut reader, "16", "courses.list", json!({}));

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "students.create",
        json!({
            "name": "Khalid Omar",
            "studentId": 1001,
            "classId": class_id
        }),
    );
    let student_id = student["student"]["id"].as_str().expect("student id").to_string();
    let _ = request_ok(&mut stdin, &mut reader, "18", "students.list", json!({}));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "attendance.create",
        json!({
            "studentId": student_id,
            "classId": class_id,
            "courseId": course_id,
            "date": "2025-09-15",
            "isPresent": true
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "attendance.list",
        json!({ "classId": class_id }),
    );

    let exam_type = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "examTypes.create",
        json!({ "name": "quiz", "marks": 100.0 }),
    );
    let exam_type_id = exam_type["examType"]["id"]
        .as_str()
        .expect("exam type id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "22",
        "exams.create",
        json!({
            "studentId": student_id,
            "examTypeId": exam_type_id,
            "courseId": course_id,
            "marksObtained": 72.0
        }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "23", "exams.list", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "24",
        "exams.upload",
        json!({ "rows": [] }),
    );

    let fee = request_ok(
        &mut stdin,
        &mut reader,
        "25",
        "fees.create",
        json!({
            "studentId": student_id,
            "amount": 500.0,
            "amountPaid": 200.0,
            "financeType": "tuition"
        }),
    );
    assert_eq!(fee["fee"]["status"].as_str(), Some("partial"));
    let _ = request_ok(&mut stdin, &mut reader, "26", "fees.list", json!({}));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "27",
        "reports.classReport",
        json!({ "id": class_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "28",
        "reports.studentReport",
        json!({ "id": 1001 }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "29", "stats.overview", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "30",
        "users.login",
        json!({ "email": "amina@school.example", "password": "s3cret-pass" }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "31",
        "classes.delete",
        json!({ "id": class_id }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
