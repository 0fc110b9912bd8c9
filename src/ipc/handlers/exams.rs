use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    check_id, commit_err, delete_err, insert_err, parse_params, query_err, ref_count, require_day,
    require_ref, tx_err, update_err, HandlerErr, IdParams,
};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExamTypeRow {
    id: String,
    name: String,
    marks: Option<f64>,
    description: Option<String>,
    created_at: String,
}

fn exam_type_from_row(r: &rusqlite::Row) -> rusqlite::Result<ExamTypeRow> {
    Ok(ExamTypeRow {
        id: r.get(0)?,
        name: r.get(1)?,
        marks: r.get(2)?,
        description: r.get(3)?,
        created_at: r.get(4)?,
    })
}

fn fetch_exam_type(conn: &Connection, id: &str) -> Result<Option<ExamTypeRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, name, marks, description, created_at FROM exam_types WHERE id = ?",
        [id],
        exam_type_from_row,
    )
    .optional()
    .map_err(query_err)
}

#[derive(Debug, Deserialize)]
struct ExamTypeParams {
    name: String,
    marks: Option<f64>,
    description: Option<String>,
}

fn validated_exam_type(params: &serde_json::Value) -> Result<ExamTypeParams, HandlerErr> {
    let p: ExamTypeParams = parse_params(params)?;
    if !matches!(p.name.as_str(), "mid term" | "final" | "quiz") {
        return Err(HandlerErr::bad_params(
            "name must be one of: mid term, final, quiz",
        ));
    }
    if let Some(m) = p.marks {
        if m < 0.0 {
            return Err(HandlerErr::bad_params("marks must not be negative"));
        }
    }
    Ok(p)
}

fn types_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, marks, description, created_at FROM exam_types ORDER BY created_at DESC")
        .map_err(query_err)?;
    let exam_types = stmt
        .query_map([], exam_type_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "examTypes": exam_types }))
}

fn types_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "exam type")?;
    match fetch_exam_type(conn, &p.id)? {
        Some(t) => Ok(json!({ "examType": t })),
        None => Err(HandlerErr::not_found("exam type not found")),
    }
}

fn types_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p = validated_exam_type(params)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exam_types(id, name, marks, description, created_at)
         VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&id, &p.name, p.marks, p.description.as_deref()),
    )
    .map_err(|e| insert_err("exam_types", e))?;
    let exam_type = fetch_exam_type(conn, &id)?
        .ok_or_else(|| HandlerErr::new("internal", "inserted exam type missing"))?;
    Ok(json!({ "examType": exam_type }))
}

fn types_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let idp: IdParams = parse_params(params)?;
    check_id(&idp.id, "exam type")?;
    if fetch_exam_type(conn, &idp.id)?.is_none() {
        return Err(HandlerErr::not_found("exam type not found"));
    }
    let p = validated_exam_type(params)?;
    conn.execute(
        "UPDATE exam_types SET name = ?, marks = ?, description = ? WHERE id = ?",
        (&p.name, p.marks, p.description.as_deref(), &idp.id),
    )
    .map_err(|e| update_err("exam_types", e))?;
    let exam_type = fetch_exam_type(conn, &idp.id)?
        .ok_or_else(|| HandlerErr::new("internal", "updated exam type missing"))?;
    Ok(json!({ "examType": exam_type }))
}

fn types_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "exam type")?;
    if fetch_exam_type(conn, &p.id)?.is_none() {
        return Err(HandlerErr::not_found("exam type not found"));
    }
    let exams = ref_count(conn, "exams", "exam_type_id", &p.id)?;
    if exams > 0 {
        return Err(HandlerErr::conflict(format!(
            "exam type is referenced by {} exams",
            exams
        )));
    }
    conn.execute("DELETE FROM exam_types WHERE id = ?", [&p.id])
        .map_err(|e| delete_err("exam_types", e))?;
    Ok(json!({ "ok": true }))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExamRow {
    id: String,
    student_id: String,
    student_name: String,
    exam_type_id: String,
    exam_type_name: String,
    course_id: String,
    course_name: String,
    marks_obtained: f64,
    date: Option<String>,
    created_at: String,
}

const SELECT_EXAM: &str = "SELECT e.id, e.student_id, s.name, e.exam_type_id, t.name, e.course_id, c.course_name,
            e.marks_obtained, e.date, e.created_at
     FROM exams e
     JOIN students s ON s.id = e.student_id
     JOIN exam_types t ON t.id = e.exam_type_id
     JOIN courses c ON c.id = e.course_id";

fn exam_from_row(r: &rusqlite::Row) -> rusqlite::Result<ExamRow> {
    Ok(ExamRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: r.get(2)?,
        exam_type_id: r.get(3)?,
        exam_type_name: r.get(4)?,
        course_id: r.get(5)?,
        course_name: r.get(6)?,
        marks_obtained: r.get(7)?,
        date: r.get(8)?,
        created_at: r.get(9)?,
    })
}

fn fetch_exam(conn: &Connection, id: &str) -> Result<Option<ExamRow>, HandlerErr> {
    conn.query_row(&format!("{} WHERE e.id = ?", SELECT_EXAM), [id], exam_from_row)
        .optional()
        .map_err(query_err)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExamParams {
    student_id: String,
    exam_type_id: String,
    course_id: String,
    marks_obtained: f64,
    date: Option<String>,
}

fn validated_exam(conn: &Connection, params: &serde_json::Value) -> Result<ExamParams, HandlerErr> {
    let p: ExamParams = parse_params(params)?;
    if p.marks_obtained < 0.0 {
        return Err(HandlerErr::bad_params("marksObtained must not be negative"));
    }
    if let Some(d) = &p.date {
        require_day(d, "date")?;
    }
    require_ref(conn, "students", "student", &p.student_id)?;
    require_ref(conn, "exam_types", "exam type", &p.exam_type_id)?;
    require_ref(conn, "courses", "course", &p.course_id)?;
    Ok(p)
}

fn list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!("{} ORDER BY e.created_at DESC", SELECT_EXAM))
        .map_err(query_err)?;
    let exams = stmt
        .query_map([], exam_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "exams": exams }))
}

fn get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "exam")?;
    match fetch_exam(conn, &p.id)? {
        Some(e) => Ok(json!({ "exam": e })),
        None => Err(HandlerErr::not_found("exam not found")),
    }
}

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p = validated_exam(conn, params)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exams(id, student_id, exam_type_id, course_id, marks_obtained, date, created_at)
         VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &id,
            &p.student_id,
            &p.exam_type_id,
            &p.course_id,
            p.marks_obtained,
            p.date.as_deref(),
        ),
    )
    .map_err(|e| insert_err("exams", e))?;
    let exam =
        fetch_exam(conn, &id)?.ok_or_else(|| HandlerErr::new("internal", "inserted exam missing"))?;
    Ok(json!({ "exam": exam }))
}

fn update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let idp: IdParams = parse_params(params)?;
    check_id(&idp.id, "exam")?;
    if fetch_exam(conn, &idp.id)?.is_none() {
        return Err(HandlerErr::not_found("exam not found"));
    }
    let p = validated_exam(conn, params)?;
    conn.execute(
        "UPDATE exams SET student_id = ?, exam_type_id = ?, course_id = ?, marks_obtained = ?, date = ?
         WHERE id = ?",
        (
            &p.student_id,
            &p.exam_type_id,
            &p.course_id,
            p.marks_obtained,
            p.date.as_deref(),
            &idp.id,
        ),
    )
    .map_err(|e| update_err("exams", e))?;
    let exam = fetch_exam(conn, &idp.id)?
        .ok_or_else(|| HandlerErr::new("internal", "updated exam missing"))?;
    Ok(json!({ "exam": exam }))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "exam")?;
    if fetch_exam(conn, &p.id)?.is_none() {
        return Err(HandlerErr::not_found("exam not found"));
    }
    conn.execute("DELETE FROM exams WHERE id = ?", [&p.id])
        .map_err(|e| delete_err("exams", e))?;
    Ok(json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    rows: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExamUploadRow {
    // Rows arrive keyed by the external school-issued student number.
    student_id: i64,
    exam_type_id: String,
    course_id: String,
    marks_obtained: f64,
    date: Option<String>,
}

/// Bulk mark entry. Per-row failures are collected by index and skipped;
/// valid rows insert as one batch.
fn upload(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let up: UploadParams = parse_params(params)?;

    // One lookup map for the whole batch: external number -> internal key.
    let students: HashMap<i64, String> = {
        let mut stmt = conn
            .prepare("SELECT student_no, id FROM students")
            .map_err(query_err)?;
        stmt.query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))
            .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
            .map_err(query_err)?
    };
    let exam_types: HashSet<String> = {
        let mut stmt = conn.prepare("SELECT id FROM exam_types").map_err(query_err)?;
        stmt.query_map([], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
            .map_err(query_err)?
    };
    let courses: HashSet<String> = {
        let mut stmt = conn.prepare("SELECT id FROM courses").map_err(query_err)?;
        stmt.query_map([], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
            .map_err(query_err)?
    };

    let mut valid: Vec<(String, ExamUploadRow)> = Vec::new();
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for (idx, raw) in up.rows.iter().enumerate() {
        let row = match serde_json::from_value::<ExamUploadRow>(raw.clone()) {
            Ok(r) => r,
            Err(e) => {
                errors.push(json!({ "row": idx, "error": e.to_string() }));
                continue;
            }
        };
        let check = || -> Result<String, HandlerErr> {
            let internal = students
                .get(&row.student_id)
                .cloned()
                .ok_or_else(|| HandlerErr::not_found("unknown studentId"))?;
            check_id(&row.exam_type_id, "exam type")?;
            if !exam_types.contains(&row.exam_type_id) {
                return Err(HandlerErr::not_found("exam type not found"));
            }
            check_id(&row.course_id, "course")?;
            if !courses.contains(&row.course_id) {
                return Err(HandlerErr::not_found("course not found"));
            }
            if row.marks_obtained < 0.0 {
                return Err(HandlerErr::bad_params("marksObtained must not be negative"));
            }
            if let Some(d) = &row.date {
                require_day(d, "date")?;
            }
            Ok(internal)
        };
        match check() {
            Ok(internal) => valid.push((internal, row)),
            Err(e) => errors.push(json!({ "row": idx, "error": e.message })),
        }
    }

    let tx = conn.unchecked_transaction().map_err(tx_err)?;
    for (student_id, row) in &valid {
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO exams(id, student_id, exam_type_id, course_id, marks_obtained, date, created_at)
             VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
            (
                &id,
                student_id,
                &row.exam_type_id,
                &row.course_id,
                row.marks_obtained,
                row.date.as_deref(),
            ),
        )
        .map_err(|e| insert_err("exams", e))?;
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
        "examTypes.list" => types_list,
        "examTypes.get" => types_get,
        "examTypes.create" => types_create,
        "examTypes.update" => types_update,
        "examTypes.delete" => types_delete,
        "exams.list" => list,
        "exams.get" => get,
        "exams.create" => create,
        "exams.update" => update,
        "exams.delete" => delete,
        "exams.upload" => upload,
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
