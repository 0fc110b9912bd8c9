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

fn request_ok(
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn class_report_aggregates_attendance_exams_and_fees() {
    let workspace = temp_dir("registrar-class-report");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let mut seq = 0u32;
    let mut next = || {
        seq += 1;
        seq.to_string()
    };

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "years.create",
        json!({
            "name": "2025/2026",
            "startDate": "2025-09-01",
            "endDate": "2026-06-30",
            "isActive": true
        }),
    );
    let department = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "departments.create",
        json!({ "name": "Mathematics" }),
    );
    let department_id = department["department"]["id"].as_str().unwrap().to_string();
    let class = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "classes.create",
        json!({ "semester": 2, "classMode": "full time", "departmentId": department_id }),
    );
    let class_id = class["class"]["id"].as_str().unwrap().to_string();

    let mut student_ids = Vec::new();
    for (i, name) in ["Hana Ali", "Yonas Bekele", "Sara Tesfaye"].iter().enumerate() {
        let student = request_ok(
            &mut stdin,
            &mut reader,
            &next(),
            "students.create",
            json!({
                "name": name,
                "studentId": 2000 + i as i64,
                "classId": class_id
            }),
        );
        student_ids.push(student["student"]["id"].as_str().unwrap().to_string());
    }

    // 10 attendance rows, 6 present. Past dates keep the today counters at 0.
    let marks_pattern = [
        (0, true),
        (0, true),
        (0, false),
        (1, true),
        (1, false),
        (1, true),
        (1, false),
        (2, true),
        (2, true),
        (2, false),
    ];
    for (day, (who, present)) in marks_pattern.iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &next(),
            "attendance.create",
            json!({
                "studentId": student_ids[*who],
                "classId": class_id,
                "date": format!("2025-10-{:02}", day + 1),
                "isPresent": present
            }),
        );
    }

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "users.create",
        json!({
            "fullName": "Marta Girma",
            "email": "marta@school.example",
            "password": "pass-word-1",
            "title": "teacher"
        }),
    );
    let teacher_id = teacher["user"]["id"].as_str().unwrap().to_string();
    let course = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "courses.create",
        json!({
            "courseName": "Algebra",
            "code": "MATH120",
            "departmentId": department["department"]["id"],
            "teacherId": teacher_id
        }),
    );
    let course_id = course["course"]["id"].as_str().unwrap().to_string();
    let exam_type = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "examTypes.create",
        json!({ "name": "mid term", "marks": 100.0 }),
    );
    let exam_type_id = exam_type["examType"]["id"].as_str().unwrap().to_string();

    for (who, marks) in [(0, 40.0), (1, 60.0), (2, 80.0)] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &next(),
            "exams.create",
            json!({
                "studentId": student_ids[who],
                "examTypeId": exam_type_id,
                "courseId": course_id,
                "marksObtained": marks
            }),
        );
    }

    for (who, amount, paid) in [(0, 100.0, 100.0), (1, 200.0, 50.0), (2, 150.0, 0.0)] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &next(),
            "fees.create",
            json!({
                "studentId": student_ids[who],
                "amount": amount,
                "amountPaid": paid,
                "financeType": "tuition"
            }),
        );
    }

    let report = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "reports.classReport",
        json!({ "id": class_id }),
    );

    assert_eq!(report["studentCount"].as_u64(), Some(3));

    let attendance = &report["attendance"];
    assert_eq!(attendance["totalRecords"].as_u64(), Some(10));
    assert_eq!(attendance["averageAttendance"].as_i64(), Some(60));
    assert_eq!(attendance["presentToday"].as_i64(), Some(0));
    assert_eq!(attendance["absentToday"].as_i64(), Some(0));

    let exams = &report["exams"];
    assert_eq!(exams["averageMarks"].as_i64(), Some(60));
    assert_eq!(exams["highestMarks"].as_f64(), Some(80.0));
    assert_eq!(exams["lowestMarks"].as_f64(), Some(40.0));
    assert_eq!(exams["passRate"].as_i64(), Some(67));

    let fees = &report["fees"];
    assert_eq!(fees["totalFees"].as_f64(), Some(450.0));
    assert_eq!(fees["collectedFees"].as_f64(), Some(150.0));
    assert_eq!(fees["pendingFees"].as_f64(), Some(300.0));
    assert_eq!(fees["defaulters"].as_i64(), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn class_report_on_empty_class_is_all_zero() {
    let workspace = temp_dir("registrar-class-report-empty");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "years.create",
        json!({
            "name": "2025/2026",
            "startDate": "2025-09-01",
            "endDate": "2026-06-30",
            "isActive": true
        }),
    );
    let department = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "departments.create",
        json!({ "name": "History" }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({
            "semester": 1,
            "classMode": "part time",
            "departmentId": department["department"]["id"]
        }),
    );
    let class_id = class["class"]["id"].as_str().unwrap().to_string();

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.classReport",
        json!({ "id": class_id }),
    );
    assert_eq!(report["studentCount"].as_u64(), Some(0));
    assert_eq!(report["attendance"]["averageAttendance"].as_i64(), Some(0));
    assert_eq!(report["exams"]["averageMarks"].as_i64(), Some(0));
    assert_eq!(report["exams"]["passRate"].as_i64(), Some(0));
    assert_eq!(report["fees"]["totalFees"].as_f64(), Some(0.0));
    assert_eq!(report["fees"]["defaulters"].as_i64(), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
