use std::collections::HashSet;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    check_id, commit_err, delete_err, insert_err, parse_params, query_err, require_ref, tx_err,
    update_err, HandlerErr, IdParams,
};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StudentRow {
    id: String,
    name: String,
    gender: Option<String>,
    parent_phone: Option<String>,
    phone: Option<String>,
    // External school-issued number; distinct from the internal key.
    student_id: i64,
    passcode: Option<String>,
    status: String,
    class_id: String,
    class_semester: i64,
    faculty_id: Option<String>,
    faculty_name: Option<String>,
    created_at: String,
}

const SELECT_STUDENT: &str = "SELECT s.id, s.name, s.gender, s.parent_phone, s.phone, s.student_no,
            s.passcode, s.status, s.class_id, c.semester, s.faculty_id, f.name, s.created_at
     FROM students s
     JOIN classes c ON c.id = s.class_id
     LEFT JOIN faculties f ON f.id = s.faculty_id";

fn student_from_row(r: &rusqlite::Row) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        name: r.get(1)?,
        gender: r.get(2)?,
        parent_phone: r.get(3)?,
        phone: r.get(4)?,
        student_id: r.get(5)?,
        passcode: r.get(6)?,
        status: r.get(7)?,
        class_id: r.get(8)?,
        class_semester: r.get(9)?,
        faculty_id: r.get(10)?,
        faculty_name: r.get(11)?,
        created_at: r.get(12)?,
    })
}

fn fetch_student(conn: &Connection, id: &str) -> Result<Option<StudentRow>, HandlerErr> {
    conn.query_row(&format!("{} WHERE s.id = ?", SELECT_STUDENT), [id], student_from_row)
        .optional()
        .map_err(query_err)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentParams {
    name: String,
    gender: Option<String>,
    parent_phone: Option<String>,
    phone: Option<String>,
    #[serde(rename = "studentId")]
    student_no: i64,
    passcode: Option<String>,
    status: Option<String>,
    class_id: String,
    faculty_id: Option<String>,
}

fn validated(conn: &Connection, params: &serde_json::Value) -> Result<StudentParams, HandlerErr> {
    let mut p: StudentParams = parse_params(params)?;
    p.name = p.name.trim().to_string();
    if p.name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    if p.student_no <= 0 {
        return Err(HandlerErr::bad_params("studentId must be a positive number"));
    }
    if let Some(status) = &p.status {
        if !matches!(status.as_str(), "active" | "inactive") {
            return Err(HandlerErr::bad_params(
                "status must be one of: active, inactive",
            ));
        }
    }
    require_ref(conn, "classes", "class", &p.class_id)?;
    if let Some(fid) = &p.faculty_id {
        require_ref(conn, "faculties", "faculty", fid)?;
    }
    Ok(p)
}

fn student_no_taken(
    conn: &Connection,
    student_no: i64,
    exclude_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    let hit = match exclude_id {
        Some(id) => conn
            .query_row(
                "SELECT 1 FROM students WHERE student_no = ? AND id != ?",
                (student_no, id),
                |r| r.get::<_, i64>(0),
            )
            .optional(),
        None => conn
            .query_row(
                "SELECT 1 FROM students WHERE student_no = ?",
                [student_no],
                |r| r.get::<_, i64>(0),
            )
            .optional(),
    }
    .map_err(query_err)?;
    Ok(hit.is_some())
}

fn insert_student(conn: &Connection, p: &StudentParams) -> Result<String, HandlerErr> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, name, gender, parent_phone, phone, student_no,
                              passcode, status, class_id, faculty_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &id,
            &p.name,
            p.gender.as_deref(),
            p.parent_phone.as_deref(),
            p.phone.as_deref(),
            p.student_no,
            p.passcode.as_deref(),
            p.status.as_deref().unwrap_or("active"),
            &p.class_id,
            p.faculty_id.as_deref(),
        ),
    )
    .map_err(|e| insert_err("students", e))?;
    Ok(id)
}

fn list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!("{} ORDER BY s.created_at DESC", SELECT_STUDENT))
        .map_err(query_err)?;
    let students = stmt
        .query_map([], student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "students": students }))
}

fn get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "student")?;
    match fetch_student(conn, &p.id)? {
        Some(s) => Ok(json!({ "student": s })),
        None => Err(HandlerErr::not_found("student not found")),
    }
}

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p = validated(conn, params)?;
    if student_no_taken(conn, p.student_no, None)? {
        return Err(HandlerErr::conflict("studentId is already taken"));
    }
    let id = insert_student(conn, &p)?;
    let student = fetch_student(conn, &id)?
        .ok_or_else(|| HandlerErr::new("internal", "inserted student missing"))?;
    Ok(json!({ "student": student }))
}

fn update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let idp: IdParams = parse_params(params)?;
    check_id(&idp.id, "student")?;
    if fetch_student(conn, &idp.id)?.is_none() {
        return Err(HandlerErr::not_found("student not found"));
    }
    let p = validated(conn, params)?;
    if student_no_taken(conn, p.student_no, Some(&idp.id))? {
        return Err(HandlerErr::conflict("studentId is already taken"));
    }
    conn.execute(
        "UPDATE students SET name = ?, gender = ?, parent_phone = ?, phone = ?, student_no = ?,
                             passcode = ?, status = ?, class_id = ?, faculty_id = ?
         WHERE id = ?",
        (
            &p.name,
            p.gender.as_deref(),
            p.parent_phone.as_deref(),
            p.phone.as_deref(),
            p.student_no,
            p.passcode.as_deref(),
            p.status.as_deref().unwrap_or("active"),
            &p.class_id,
            p.faculty_id.as_deref(),
            &idp.id,
        ),
    )
    .map_err(|e| update_err("students", e))?;
    let student = fetch_student(conn, &idp.id)?
        .ok_or_else(|| HandlerErr::new("internal", "updated student missing"))?;
    Ok(json!({ "student": student }))
}

/// Deleting a student removes their attendance, exam and fee history and
/// unlinks any user account; explicit deletes in dependency order.
fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "student")?;
    if fetch_student(conn, &p.id)?.is_none() {
        return Err(HandlerErr::not_found("student not found"));
    }

    let tx = conn.unchecked_transaction().map_err(tx_err)?;
    tx.execute("DELETE FROM attendance WHERE student_id = ?", [&p.id])
        .map_err(|e| delete_err("attendance", e))?;
    tx.execute("DELETE FROM exams WHERE student_id = ?", [&p.id])
        .map_err(|e| delete_err("exams", e))?;
    tx.execute("DELETE FROM fees WHERE student_id = ?", [&p.id])
        .map_err(|e| delete_err("fees", e))?;
    tx.execute(
        "UPDATE users SET student_id = NULL WHERE student_id = ?",
        [&p.id],
    )
    .map_err(|e| update_err("users", e))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&p.id])
        .map_err(|e| delete_err("students", e))?;
    tx.commit().map_err(commit_err)?;

    Ok(json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    rows: Vec<serde_json::Value>,
}

/// Bulk import: failing rows are collected by index and skipped, valid rows
/// insert as one batch.
fn upload(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let up: UploadParams = parse_params(params)?;

    let mut taken: HashSet<i64> = {
        let mut stmt = conn
            .prepare("SELECT student_no FROM students")
            .map_err(query_err)?;
        stmt.query_map([], |r| r.get::<_, i64>(0))
            .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
            .map_err(query_err)?
    };

    let mut valid: Vec<StudentParams> = Vec::new();
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for (idx, row) in up.rows.iter().enumerate() {
        let p = match validated(conn, row) {
            Ok(p) => p,
            Err(e) => {
                errors.push(json!({ "row": idx, "error": e.message }));
                continue;
            }
        };
        if taken.contains(&p.student_no) {
            errors.push(json!({ "row": idx, "error": "studentId is already taken" }));
            continue;
        }
        taken.insert(p.student_no);
        valid.push(p);
    }

    let tx = conn.unchecked_transaction().map_err(tx_err)?;
    for p in &valid {
        insert_student(&tx, p)?;
    }
    tx.commit().map_err(commit_err)?;

    Ok(json!({
        "insertedCount": valid.len(),
        "errorCount": errors.len(),
        "errors": errors
    }))
}

type Op = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: Op = match req.method.as_str() {
        "students.list" => list,
        "students.get" => get,
        "students.create" => create,
        "students.update" => update,
        "students.delete" => delete,
        "students.upload" => upload,
        _ => return None,
    };
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match op(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
