use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    check_id, commit_err, delete_err, insert_err, parse_params, query_err, tx_err, update_err,
    HandlerErr, IdParams,
};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FacultyRow {
    id: String,
    name: String,
    created_at: String,
}

fn faculty_from_row(r: &rusqlite::Row) -> rusqlite::Result<FacultyRow> {
    Ok(FacultyRow {
        id: r.get(0)?,
        name: r.get(1)?,
        created_at: r.get(2)?,
    })
}

fn fetch_faculty(conn: &Connection, id: &str) -> Result<Option<FacultyRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, name, created_at FROM faculties WHERE id = ?",
        [id],
        faculty_from_row,
    )
    .optional()
    .map_err(query_err)
}

#[derive(Debug, Deserialize)]
struct FacultyParams {
    name: String,
}

fn validated_name(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let p: FacultyParams = parse_params(params)?;
    let name = p.name.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    Ok(name)
}

fn list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, created_at FROM faculties ORDER BY created_at DESC")
        .map_err(query_err)?;
    let faculties = stmt
        .query_map([], faculty_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "faculties": faculties }))
}

fn get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "faculty")?;
    match fetch_faculty(conn, &p.id)? {
        Some(f) => Ok(json!({ "faculty": f })),
        None => Err(HandlerErr::not_found("faculty not found")),
    }
}

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = validated_name(params)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO faculties(id, name, created_at)
         VALUES(?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&id, &name),
    )
    .map_err(|e| insert_err("faculties", e))?;
    let faculty =
        fetch_faculty(conn, &id)?.ok_or_else(|| HandlerErr::new("internal", "inserted faculty missing"))?;
    Ok(json!({ "faculty": faculty }))
}

fn update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let idp: IdParams = parse_params(params)?;
    check_id(&idp.id, "faculty")?;
    if fetch_faculty(conn, &idp.id)?.is_none() {
        return Err(HandlerErr::not_found("faculty not found"));
    }
    let name = validated_name(params)?;
    conn.execute("UPDATE faculties SET name = ? WHERE id = ?", (&name, &idp.id))
        .map_err(|e| update_err("faculties", e))?;
    let faculty = fetch_faculty(conn, &idp.id)?
        .ok_or_else(|| HandlerErr::new("internal", "updated faculty missing"))?;
    Ok(json!({ "faculty": faculty }))
}

/// Deleting a faculty keeps its departments, classes and students but clears
/// their pointer, rather than leaving a dangling reference.
fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "faculty")?;
    if fetch_faculty(conn, &p.id)?.is_none() {
        return Err(HandlerErr::not_found("faculty not found"));
    }

    let tx = conn.unchecked_transaction().map_err(tx_err)?;
    tx.execute(
        "UPDATE departments SET faculty_id = NULL WHERE faculty_id = ?",
        [&p.id],
    )
    .map_err(|e| update_err("departments", e))?;
    tx.execute(
        "UPDATE classes SET faculty_id = NULL WHERE faculty_id = ?",
        [&p.id],
    )
    .map_err(|e| update_err("classes", e))?;
    tx.execute(
        "UPDATE students SET faculty_id = NULL WHERE faculty_id = ?",
        [&p.id],
    )
    .map_err(|e| update_err("students", e))?;
    tx.execute("DELETE FROM faculties WHERE id = ?", [&p.id])
        .map_err(|e| delete_err("faculties", e))?;
    tx.commit().map_err(commit_err)?;

    Ok(json!({ "ok": true }))
}

type Op = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: Op = match req.method.as_str() {
        "faculties.list" => list,
        "faculties.get" => get,
        "faculties.create" => create,
        "faculties.update" => update,
        "faculties.delete" => delete,
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
