use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    check_id, delete_err, insert_err, parse_params, query_err, require_day, require_ref,
    update_err, HandlerErr, IdParams,
};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttendanceRow {
    id: String,
    student_id: String,
    student_name: String,
    class_id: Option<String>,
    course_id: Option<String>,
    course_name: Option<String>,
    date: String,
    is_present: bool,
    created_at: String,
}

const SELECT_ATTENDANCE: &str = "SELECT a.id, a.student_id, s.name, a.class_id, a.course_id, c.course_name,
            a.date, a.is_present, a.created_at
     FROM attendance a
     JOIN students s ON s.id = a.student_id
     LEFT JOIN courses c ON c.id = a.course_id";

fn attendance_from_row(r: &rusqlite::Row) -> rusqlite::Result<AttendanceRow> {
    Ok(AttendanceRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: r.get(2)?,
        class_id: r.get(3)?,
        course_id: r.get(4)?,
        course_name: r.get(5)?,
        date: r.get(6)?,
        is_present: r.get::<_, i64>(7)? != 0,
        created_at: r.get(8)?,
    })
}

fn fetch_attendance(conn: &Connection, id: &str) -> Result<Option<AttendanceRow>, HandlerErr> {
    conn.query_row(
        &format!("{} WHERE a.id = ?", SELECT_ATTENDANCE),
        [id],
        attendance_from_row,
    )
    .optional()
    .map_err(query_err)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttendanceParams {
    student_id: String,
    class_id: Option<String>,
    course_id: Option<String>,
    date: String,
    is_present: bool,
}

fn validated(conn: &Connection, params: &serde_json::Value) -> Result<AttendanceParams, HandlerErr> {
    let p: AttendanceParams = parse_params(params)?;
    require_day(&p.date, "date")?;
    require_ref(conn, "students", "student", &p.student_id)?;
    if let Some(cid) = &p.class_id {
        require_ref(conn, "classes", "class", cid)?;
    }
    if let Some(cid) = &p.course_id {
        require_ref(conn, "courses", "course", cid)?;
    }
    Ok(p)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    student_id: Option<String>,
    class_id: Option<String>,
}

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: ListParams = parse_params(params)?;
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(sid) = p.student_id {
        clauses.push("a.student_id = ?");
        binds.push(Value::Text(sid));
    }
    if let Some(cid) = p.class_id {
        clauses.push("a.class_id = ?");
        binds.push(Value::Text(cid));
    }
    let mut sql = SELECT_ATTENDANCE.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY a.created_at DESC");

    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let records = stmt
        .query_map(params_from_iter(binds), attendance_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "attendance": records }))
}

fn get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "attendance record")?;
    match fetch_attendance(conn, &p.id)? {
        Some(a) => Ok(json!({ "attendance": a })),
        None => Err(HandlerErr::not_found("attendance record not found")),
    }
}

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p = validated(conn, params)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO attendance(id, student_id, class_id, course_id, date, is_present, created_at)
         VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &id,
            &p.student_id,
            p.class_id.as_deref(),
            p.course_id.as_deref(),
            &p.date,
            p.is_present as i64,
        ),
    )
    .map_err(|e| insert_err("attendance", e))?;
    let record = fetch_attendance(conn, &id)?
        .ok_or_else(|| HandlerErr::new("internal", "inserted attendance record missing"))?;
    Ok(json!({ "attendance": record }))
}

fn update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let idp: IdParams = parse_params(params)?;
    check_id(&idp.id, "attendance record")?;
    if fetch_attendance(conn, &idp.id)?.is_none() {
        return Err(HandlerErr::not_found("attendance record not found"));
    }
    let p = validated(conn, params)?;
    conn.execute(
        "UPDATE attendance SET student_id = ?, class_id = ?, course_id = ?, date = ?, is_present = ?
         WHERE id = ?",
        (
            &p.student_id,
            p.class_id.as_deref(),
            p.course_id.as_deref(),
            &p.date,
            p.is_present as i64,
            &idp.id,
        ),
    )
    .map_err(|e| update_err("attendance", e))?;
    let record = fetch_attendance(conn, &idp.id)?
        .ok_or_else(|| HandlerErr::new("internal", "updated attendance record missing"))?;
    Ok(json!({ "attendance": record }))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "attendance record")?;
    if fetch_attendance(conn, &p.id)?.is_none() {
        return Err(HandlerErr::not_found("attendance record not found"));
    }
    conn.execute("DELETE FROM attendance WHERE id = ?", [&p.id])
        .map_err(|e| delete_err("attendance", e))?;
    Ok(json!({ "ok": true }))
}

type Op = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: Op = match req.method.as_str() {
        "attendance.list" => list,
        "attendance.get" => get,
        "attendance.create" => create,
        "attendance.update" => update,
        "attendance.delete" => delete,
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
