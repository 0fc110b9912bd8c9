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
struct ClassRow {
    id: String,
    semester: i64,
    class_mode: String,
    #[serde(rename = "type")]
    class_type: Option<String>,
    status: String,
    department_id: String,
    department_name: String,
    academic_year_id: String,
    academic_year_name: String,
    faculty_id: Option<String>,
    faculty_name: Option<String>,
    student_count: i64,
    created_at: String,
}

// Correlated subquery for the count to avoid double-counting from joins.
const SELECT_CLASS: &str = "SELECT c.id, c.semester, c.class_mode, c.class_type, c.status,
            c.department_id, d.name, c.academic_year_id, y.name, c.faculty_id, f.name,
            (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id),
            c.created_at
     FROM classes c
     JOIN departments d ON d.id = c.department_id
     JOIN academic_years y ON y.id = c.academic_year_id
     LEFT JOIN faculties f ON f.id = c.faculty_id";

fn class_from_row(r: &rusqlite::Row) -> rusqlite::Result<ClassRow> {
    Ok(ClassRow {
        id: r.get(0)?,
        semester: r.get(1)?,
        class_mode: r.get(2)?,
        class_type: r.get(3)?,
        status: r.get(4)?,
        department_id: r.get(5)?,
        department_name: r.get(6)?,
        academic_year_id: r.get(7)?,
        academic_year_name: r.get(8)?,
        faculty_id: r.get(9)?,
        faculty_name: r.get(10)?,
        student_count: r.get(11)?,
        created_at: r.get(12)?,
    })
}

fn fetch_class(conn: &Connection, id: &str) -> Result<Option<ClassRow>, HandlerErr> {
    conn.query_row(&format!("{} WHERE c.id = ?", SELECT_CLASS), [id], class_from_row)
        .optional()
        .map_err(query_err)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassParams {
    semester: i64,
    class_mode: String,
    #[serde(rename = "type")]
    class_type: Option<String>,
    status: Option<String>,
    department_id: String,
    faculty_id: Option<String>,
}

fn validated(conn: &Connection, params: &serde_json::Value) -> Result<ClassParams, HandlerErr> {
    let p: ClassParams = parse_params(params)?;
    if !(1..=8).contains(&p.semester) {
        return Err(HandlerErr::bad_params("semester must be between 1 and 8"));
    }
    if !matches!(p.class_mode.as_str(), "full time" | "part time") {
        return Err(HandlerErr::bad_params(
            "classMode must be one of: full time, part time",
        ));
    }
    if let Some(status) = &p.status {
        if !matches!(status.as_str(), "active" | "inactive") {
            return Err(HandlerErr::bad_params(
                "status must be one of: active, inactive",
            ));
        }
    }
    require_ref(conn, "departments", "department", &p.department_id)?;
    if let Some(fid) = &p.faculty_id {
        require_ref(conn, "faculties", "faculty", fid)?;
    }
    Ok(p)
}

fn active_year_id(conn: &Connection) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT id FROM academic_years WHERE is_active = 1",
        [],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(query_err)?
    .ok_or_else(|| HandlerErr::conflict("no active academic year"))
}

fn list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!("{} ORDER BY c.created_at DESC", SELECT_CLASS))
        .map_err(query_err)?;
    let classes = stmt
        .query_map([], class_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "classes": classes }))
}

fn get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "class")?;
    match fetch_class(conn, &p.id)? {
        Some(c) => Ok(json!({ "class": c })),
        None => Err(HandlerErr::not_found("class not found")),
    }
}

/// New classes always attach to the currently active academic year; the
/// caller does not pick one.
fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p = validated(conn, params)?;
    let year_id = active_year_id(conn)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, semester, class_mode, class_type, status,
                             department_id, academic_year_id, faculty_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &id,
            p.semester,
            &p.class_mode,
            p.class_type.as_deref(),
            p.status.as_deref().unwrap_or("active"),
            &p.department_id,
            &year_id,
            p.faculty_id.as_deref(),
        ),
    )
    .map_err(|e| insert_err("classes", e))?;
    let class =
        fetch_class(conn, &id)?.ok_or_else(|| HandlerErr::new("internal", "inserted class missing"))?;
    Ok(json!({ "class": class }))
}

fn update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let idp: IdParams = parse_params(params)?;
    check_id(&idp.id, "class")?;
    if fetch_class(conn, &idp.id)?.is_none() {
        return Err(HandlerErr::not_found("class not found"));
    }
    let p = validated(conn, params)?;
    // The academic year binding is fixed at creation time.
    conn.execute(
        "UPDATE classes SET semester = ?, class_mode = ?, class_type = ?, status = ?,
                            department_id = ?, faculty_id = ?
         WHERE id = ?",
        (
            p.semester,
            &p.class_mode,
            p.class_type.as_deref(),
            p.status.as_deref().unwrap_or("active"),
            &p.department_id,
            p.faculty_id.as_deref(),
            &idp.id,
        ),
    )
    .map_err(|e| update_err("classes", e))?;
    let class = fetch_class(conn, &idp.id)?
        .ok_or_else(|| HandlerErr::new("internal", "updated class missing"))?;
    Ok(json!({ "class": class }))
}

/// Deleting a class removes its students and their attendance, exam and fee
/// history. Explicit deletes in dependency order (no ON DELETE CASCADE).
fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "class")?;
    if fetch_class(conn, &p.id)?.is_none() {
        return Err(HandlerErr::not_found("class not found"));
    }

    let tx = conn.unchecked_transaction().map_err(tx_err)?;
    tx.execute(
        "DELETE FROM attendance
         WHERE class_id = ?
            OR student_id IN (SELECT id FROM students WHERE class_id = ?)",
        (&p.id, &p.id),
    )
    .map_err(|e| delete_err("attendance", e))?;
    tx.execute(
        "DELETE FROM exams
         WHERE student_id IN (SELECT id FROM students WHERE class_id = ?)",
        [&p.id],
    )
    .map_err(|e| delete_err("exams", e))?;
    tx.execute(
        "DELETE FROM fees
         WHERE student_id IN (SELECT id FROM students WHERE class_id = ?)",
        [&p.id],
    )
    .map_err(|e| delete_err("fees", e))?;
    tx.execute(
        "UPDATE users SET student_id = NULL
         WHERE student_id IN (SELECT id FROM students WHERE class_id = ?)",
        [&p.id],
    )
    .map_err(|e| update_err("users", e))?;
    tx.execute("DELETE FROM students WHERE class_id = ?", [&p.id])
        .map_err(|e| delete_err("students", e))?;
    tx.execute("DELETE FROM classes WHERE id = ?", [&p.id])
        .map_err(|e| delete_err("classes", e))?;
    tx.commit().map_err(commit_err)?;

    Ok(json!({ "ok": true }))
}

type Op = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: Op = match req.method.as_str() {
        "classes.list" => list,
        "classes.get" => get,
        "classes.create" => create,
        "classes.update" => update,
        "classes.delete" => delete,
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
