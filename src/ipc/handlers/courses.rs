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
struct CourseRow {
    id: String,
    course_name: String,
    code: String,
    semester: Option<i64>,
    department_id: String,
    department_name: String,
    teacher_id: String,
    teacher_name: String,
    created_at: String,
}

const SELECT_COURSE: &str = "SELECT c.id, c.course_name, c.code, c.semester,
            c.department_id, d.name, c.teacher_id, u.full_name, c.created_at
     FROM courses c
     JOIN departments d ON d.id = c.department_id
     JOIN users u ON u.id = c.teacher_id";

fn course_from_row(r: &rusqlite::Row) -> rusqlite::Result<CourseRow> {
    Ok(CourseRow {
        id: r.get(0)?,
        course_name: r.get(1)?,
        code: r.get(2)?,
        semester: r.get(3)?,
        department_id: r.get(4)?,
        department_name: r.get(5)?,
        teacher_id: r.get(6)?,
        teacher_name: r.get(7)?,
        created_at: r.get(8)?,
    })
}

fn fetch_course(conn: &Connection, id: &str) -> Result<Option<CourseRow>, HandlerErr> {
    conn.query_row(&format!("{} WHERE c.id = ?", SELECT_COURSE), [id], course_from_row)
        .optional()
        .map_err(query_err)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourseParams {
    course_name: String,
    code: String,
    semester: Option<i64>,
    department_id: String,
    teacher_id: String,
}

fn validated(conn: &Connection, params: &serde_json::Value) -> Result<CourseParams, HandlerErr> {
    let mut p: CourseParams = parse_params(params)?;
    p.course_name = p.course_name.trim().to_string();
    p.code = p.code.trim().to_string();
    if p.course_name.is_empty() || p.code.is_empty() {
        return Err(HandlerErr::bad_params("courseName/code must not be empty"));
    }
    if let Some(s) = p.semester {
        if !(1..=8).contains(&s) {
            return Err(HandlerErr::bad_params("semester must be between 1 and 8"));
        }
    }
    require_ref(conn, "departments", "department", &p.department_id)?;
    require_ref(conn, "users", "teacher", &p.teacher_id)?;
    Ok(p)
}

fn list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!("{} ORDER BY c.created_at DESC", SELECT_COURSE))
        .map_err(query_err)?;
    let courses = stmt
        .query_map([], course_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "courses": courses }))
}

fn get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "course")?;
    match fetch_course(conn, &p.id)? {
        Some(c) => Ok(json!({ "course": c })),
        None => Err(HandlerErr::not_found("course not found")),
    }
}

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p = validated(conn, params)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, course_name, code, semester, department_id, teacher_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &id,
            &p.course_name,
            &p.code,
            p.semester,
            &p.department_id,
            &p.teacher_id,
        ),
    )
    .map_err(|e| insert_err("courses", e))?;
    let course =
        fetch_course(conn, &id)?.ok_or_else(|| HandlerErr::new("internal", "inserted course missing"))?;
    Ok(json!({ "course": course }))
}

fn update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let idp: IdParams = parse_params(params)?;
    check_id(&idp.id, "course")?;
    if fetch_course(conn, &idp.id)?.is_none() {
        return Err(HandlerErr::not_found("course not found"));
    }
    let p = validated(conn, params)?;
    conn.execute(
        "UPDATE courses SET course_name = ?, code = ?, semester = ?, department_id = ?, teacher_id = ?
         WHERE id = ?",
        (
            &p.course_name,
            &p.code,
            p.semester,
            &p.department_id,
            &p.teacher_id,
            &idp.id,
        ),
    )
    .map_err(|e| update_err("courses", e))?;
    let course = fetch_course(conn, &idp.id)?
        .ok_or_else(|| HandlerErr::new("internal", "updated course missing"))?;
    Ok(json!({ "course": course }))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "course")?;
    if fetch_course(conn, &p.id)?.is_none() {
        return Err(HandlerErr::not_found("course not found"));
    }
    let exams = ref_count(conn, "exams", "course_id", &p.id)?;
    if exams > 0 {
        return Err(HandlerErr::conflict(format!(
            "course is referenced by {} exams",
            exams
        )));
    }
    let attendance = ref_count(conn, "attendance", "course_id", &p.id)?;
    if attendance > 0 {
        return Err(HandlerErr::conflict(format!(
            "course is referenced by {} attendance records",
            attendance
        )));
    }
    conn.execute("DELETE FROM courses WHERE id = ?", [&p.id])
        .map_err(|e| delete_err("courses", e))?;
    Ok(json!({ "ok": true }))
}

type Op = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: Op = match req.method.as_str() {
        "courses.list" => list,
        "courses.get" => get,
        "courses.create" => create,
        "courses.update" => update,
        "courses.delete" => delete,
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
