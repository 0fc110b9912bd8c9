use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    check_id, delete_err, insert_err, parse_params, query_err, ref_count, require_ref, update_err,
    HandlerErr, IdParams,
};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DepartmentRow {
    id: String,
    name: String,
    faculty_id: Option<String>,
    faculty_name: Option<String>,
    student_count: i64,
    department_mode: Option<String>,
    created_at: String,
}

const SELECT_DEPARTMENT: &str = "SELECT d.id, d.name, d.faculty_id, f.name, d.student_count, d.department_mode, d.created_at
     FROM departments d
     LEFT JOIN faculties f ON f.id = d.faculty_id";

fn department_from_row(r: &rusqlite::Row) -> rusqlite::Result<DepartmentRow> {
    Ok(DepartmentRow {
        id: r.get(0)?,
        name: r.get(1)?,
        faculty_id: r.get(2)?,
        faculty_name: r.get(3)?,
        student_count: r.get(4)?,
        department_mode: r.get(5)?,
        created_at: r.get(6)?,
    })
}

fn fetch_department(conn: &Connection, id: &str) -> Result<Option<DepartmentRow>, HandlerErr> {
    conn.query_row(
        &format!("{} WHERE d.id = ?", SELECT_DEPARTMENT),
        [id],
        department_from_row,
    )
    .optional()
    .map_err(query_err)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepartmentParams {
    name: String,
    faculty_id: Option<String>,
    #[serde(default)]
    student_count: i64,
    department_mode: Option<String>,
}

fn validated(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<DepartmentParams, HandlerErr> {
    let mut p: DepartmentParams = parse_params(params)?;
    p.name = p.name.trim().to_string();
    if p.name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    if p.student_count < 0 {
        return Err(HandlerErr::bad_params("studentCount must not be negative"));
    }
    if let Some(fid) = &p.faculty_id {
        require_ref(conn, "faculties", "faculty", fid)?;
    }
    Ok(p)
}

fn list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!("{} ORDER BY d.created_at DESC", SELECT_DEPARTMENT))
        .map_err(query_err)?;
    let departments = stmt
        .query_map([], department_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "departments": departments }))
}

fn get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "department")?;
    match fetch_department(conn, &p.id)? {
        Some(d) => Ok(json!({ "department": d })),
        None => Err(HandlerErr::not_found("department not found")),
    }
}

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p = validated(conn, params)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO departments(id, name, faculty_id, student_count, department_mode, created_at)
         VALUES(?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &id,
            &p.name,
            p.faculty_id.as_deref(),
            p.student_count,
            p.department_mode.as_deref(),
        ),
    )
    .map_err(|e| insert_err("departments", e))?;
    let department = fetch_department(conn, &id)?
        .ok_or_else(|| HandlerErr::new("internal", "inserted department missing"))?;
    Ok(json!({ "department": department }))
}

fn update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let idp: IdParams = parse_params(params)?;
    check_id(&idp.id, "department")?;
    if fetch_department(conn, &idp.id)?.is_none() {
        return Err(HandlerErr::not_found("department not found"));
    }
    let p = validated(conn, params)?;
    conn.execute(
        "UPDATE departments SET name = ?, faculty_id = ?, student_count = ?, department_mode = ?
         WHERE id = ?",
        (
            &p.name,
            p.faculty_id.as_deref(),
            p.student_count,
            p.department_mode.as_deref(),
            &idp.id,
        ),
    )
    .map_err(|e| update_err("departments", e))?;
    let department = fetch_department(conn, &idp.id)?
        .ok_or_else(|| HandlerErr::new("internal", "updated department missing"))?;
    Ok(json!({ "department": department }))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "department")?;
    if fetch_department(conn, &p.id)?.is_none() {
        return Err(HandlerErr::not_found("department not found"));
    }
    let classes = ref_count(conn, "classes", "department_id", &p.id)?;
    if classes > 0 {
        return Err(HandlerErr::conflict(format!(
            "department is referenced by {} classes",
            classes
        )));
    }
    let courses = ref_count(conn, "courses", "department_id", &p.id)?;
    if courses > 0 {
        return Err(HandlerErr::conflict(format!(
            "department is referenced by {} courses",
            courses
        )));
    }
    conn.execute("DELETE FROM departments WHERE id = ?", [&p.id])
        .map_err(|e| delete_err("departments", e))?;
    Ok(json!({ "ok": true }))
}

type Op = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: Op = match req.method.as_str() {
        "departments.list" => list,
        "departments.get" => get,
        "departments.create" => create,
        "departments.update" => update,
        "departments.delete" => delete,
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
