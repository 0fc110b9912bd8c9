use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    check_id, commit_err, delete_err, insert_err, parse_params, query_err, ref_count, require_day,
    tx_err, update_err, HandlerErr, IdParams,
};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct YearRow {
    id: String,
    name: String,
    start_date: String,
    end_date: String,
    is_active: bool,
    created_at: String,
}

const SELECT_YEAR: &str =
    "SELECT id, name, start_date, end_date, is_active, created_at FROM academic_years";

fn year_from_row(r: &rusqlite::Row) -> rusqlite::Result<YearRow> {
    Ok(YearRow {
        id: r.get(0)?,
        name: r.get(1)?,
        start_date: r.get(2)?,
        end_date: r.get(3)?,
        is_active: r.get::<_, i64>(4)? != 0,
        created_at: r.get(5)?,
    })
}

fn fetch_year(conn: &Connection, id: &str) -> Result<Option<YearRow>, HandlerErr> {
    conn.query_row(&format!("{} WHERE id = ?", SELECT_YEAR), [id], year_from_row)
        .optional()
        .map_err(query_err)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YearParams {
    name: String,
    start_date: String,
    end_date: String,
    #[serde(default)]
    is_active: bool,
}

fn validated(
    conn: &Connection,
    params: &serde_json::Value,
    exclude_id: Option<&str>,
) -> Result<YearParams, HandlerErr> {
    let mut p: YearParams = parse_params(params)?;
    p.name = p.name.trim().to_string();
    if p.name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    require_day(&p.start_date, "startDate")?;
    require_day(&p.end_date, "endDate")?;

    let dup = match exclude_id {
        Some(id) => conn
            .query_row(
                "SELECT 1 FROM academic_years WHERE name = ? AND id != ?",
                (&p.name, id),
                |r| r.get::<_, i64>(0),
            )
            .optional(),
        None => conn
            .query_row(
                "SELECT 1 FROM academic_years WHERE name = ?",
                [&p.name],
                |r| r.get::<_, i64>(0),
            )
            .optional(),
    }
    .map_err(query_err)?;
    if dup.is_some() {
        return Err(HandlerErr::conflict(
            "an academic year with this name already exists",
        ));
    }
    Ok(p)
}

fn list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!("{} ORDER BY created_at DESC", SELECT_YEAR))
        .map_err(query_err)?;
    let years = stmt
        .query_map([], year_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "years": years }))
}

fn get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "academic year")?;
    match fetch_year(conn, &p.id)? {
        Some(y) => Ok(json!({ "year": y })),
        None => Err(HandlerErr::not_found("academic year not found")),
    }
}

fn active(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(&format!("{} WHERE is_active = 1", SELECT_YEAR), [], year_from_row)
        .optional()
        .map_err(query_err)?
        .map(|y| json!({ "year": y }))
        .ok_or_else(|| HandlerErr::not_found("no active academic year"))
}

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p = validated(conn, params, None)?;
    let id = Uuid::new_v4().to_string();

    // Activating a year deactivates every other one in the same transaction,
    // so exactly one year is active after any commit.
    let tx = conn.unchecked_transaction().map_err(tx_err)?;
    if p.is_active {
        tx.execute(
            "UPDATE academic_years SET is_active = 0 WHERE is_active = 1",
            [],
        )
        .map_err(|e| update_err("academic_years", e))?;
    }
    tx.execute(
        "INSERT INTO academic_years(id, name, start_date, end_date, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&id, &p.name, &p.start_date, &p.end_date, p.is_active as i64),
    )
    .map_err(|e| insert_err("academic_years", e))?;
    tx.commit().map_err(commit_err)?;

    let year = fetch_year(conn, &id)?
        .ok_or_else(|| HandlerErr::new("internal", "inserted academic year missing"))?;
    Ok(json!({ "year": year }))
}

fn update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let idp: IdParams = parse_params(params)?;
    check_id(&idp.id, "academic year")?;
    if fetch_year(conn, &idp.id)?.is_none() {
        return Err(HandlerErr::not_found("academic year not found"));
    }
    let p = validated(conn, params, Some(&idp.id))?;

    let tx = conn.unchecked_transaction().map_err(tx_err)?;
    if p.is_active {
        tx.execute(
            "UPDATE academic_years SET is_active = 0 WHERE id != ?",
            [&idp.id],
        )
        .map_err(|e| update_err("academic_years", e))?;
    }
    tx.execute(
        "UPDATE academic_years SET name = ?, start_date = ?, end_date = ?, is_active = ? WHERE id = ?",
        (&p.name, &p.start_date, &p.end_date, p.is_active as i64, &idp.id),
    )
    .map_err(|e| update_err("academic_years", e))?;
    tx.commit().map_err(commit_err)?;

    let year = fetch_year(conn, &idp.id)?
        .ok_or_else(|| HandlerErr::new("internal", "updated academic year missing"))?;
    Ok(json!({ "year": year }))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "academic year")?;
    if fetch_year(conn, &p.id)?.is_none() {
        return Err(HandlerErr::not_found("academic year not found"));
    }
    let classes = ref_count(conn, "classes", "academic_year_id", &p.id)?;
    if classes > 0 {
        return Err(HandlerErr::conflict(format!(
            "academic year is referenced by {} classes",
            classes
        )));
    }
    conn.execute("DELETE FROM academic_years WHERE id = ?", [&p.id])
        .map_err(|e| delete_err("academic_years", e))?;
    Ok(json!({ "ok": true }))
}

type Op = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: Op = match req.method.as_str() {
        "years.list" => list,
        "years.get" => get,
        "years.active" => active,
        "years.create" => create,
        "years.update" => update,
        "years.delete" => delete,
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
