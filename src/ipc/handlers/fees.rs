use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    check_id, delete_err, insert_err, parse_params, query_err, require_day, require_ref,
    update_err, HandlerErr, IdParams,
};
use crate::ipc::types::{AppState, Request};

const FINANCE_TYPES: &[&str] = &[
    "tuition",
    "admission",
    "registration",
    "library",
    "examination",
    "transportation",
    "other",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FeeRow {
    id: String,
    student_id: String,
    student_name: String,
    amount: f64,
    amount_paid: f64,
    balance: f64,
    status: String,
    finance_type: Option<String>,
    date: Option<String>,
    created_at: String,
}

const SELECT_FEE: &str = "SELECT f.id, f.student_id, s.name, f.amount, f.amount_paid, f.balance, f.status,
            f.finance_type, f.date, f.created_at
     FROM fees f
     JOIN students s ON s.id = f.student_id";

fn fee_from_row(r: &rusqlite::Row) -> rusqlite::Result<FeeRow> {
    Ok(FeeRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: r.get(2)?,
        amount: r.get(3)?,
        amount_paid: r.get(4)?,
        balance: r.get(5)?,
        status: r.get(6)?,
        finance_type: r.get(7)?,
        date: r.get(8)?,
        created_at: r.get(9)?,
    })
}

fn fetch_fee(conn: &Connection, id: &str) -> Result<Option<FeeRow>, HandlerErr> {
    conn.query_row(&format!("{} WHERE f.id = ?", SELECT_FEE), [id], fee_from_row)
        .optional()
        .map_err(query_err)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeeParams {
    student_id: String,
    amount: f64,
    #[serde(default)]
    amount_paid: f64,
    finance_type: Option<String>,
    date: Option<String>,
}

fn validated(conn: &Connection, params: &serde_json::Value) -> Result<FeeParams, HandlerErr> {
    let p: FeeParams = parse_params(params)?;
    if p.amount < 0.0 {
        return Err(HandlerErr::bad_params("amount must not be negative"));
    }
    if p.amount_paid < 0.0 {
        return Err(HandlerErr::bad_params("amountPaid must not be negative"));
    }
    if let Some(ft) = &p.finance_type {
        if !FINANCE_TYPES.contains(&ft.as_str()) {
            return Err(HandlerErr::bad_params(format!(
                "financeType must be one of: {}",
                FINANCE_TYPES.join(", ")
            )));
        }
    }
    if let Some(d) = &p.date {
        require_day(d, "date")?;
    }
    require_ref(conn, "students", "student", &p.student_id)?;
    Ok(p)
}

fn list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!("{} ORDER BY f.created_at DESC", SELECT_FEE))
        .map_err(query_err)?;
    let fees = stmt
        .query_map([], fee_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "fees": fees }))
}

fn get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "fee")?;
    match fetch_fee(conn, &p.id)? {
        Some(f) => Ok(json!({ "fee": f })),
        None => Err(HandlerErr::not_found("fee not found")),
    }
}

/// Balance and status are always derived; caller-supplied values are ignored.
fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p = validated(conn, params)?;
    let (balance, status) = calc::compute_fee_status(p.amount, p.amount_paid);
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fees(id, student_id, amount, amount_paid, balance, status, finance_type, date, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &id,
            &p.student_id,
            p.amount,
            p.amount_paid,
            balance,
            status.as_str(),
            p.finance_type.as_deref(),
            p.date.as_deref(),
        ),
    )
    .map_err(|e| insert_err("fees", e))?;
    let fee = fetch_fee(conn, &id)?.ok_or_else(|| HandlerErr::new("internal", "inserted fee missing"))?;
    Ok(json!({ "fee": fee }))
}

fn update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let idp: IdParams = parse_params(params)?;
    check_id(&idp.id, "fee")?;
    if fetch_fee(conn, &idp.id)?.is_none() {
        return Err(HandlerErr::not_found("fee not found"));
    }
    let p = validated(conn, params)?;
    let (balance, status) = calc::compute_fee_status(p.amount, p.amount_paid);
    conn.execute(
        "UPDATE fees SET student_id = ?, amount = ?, amount_paid = ?, balance = ?, status = ?,
                         finance_type = ?, date = ?
         WHERE id = ?",
        (
            &p.student_id,
            p.amount,
            p.amount_paid,
            balance,
            status.as_str(),
            p.finance_type.as_deref(),
            p.date.as_deref(),
            &idp.id,
        ),
    )
    .map_err(|e| update_err("fees", e))?;
    let fee =
        fetch_fee(conn, &idp.id)?.ok_or_else(|| HandlerErr::new("internal", "updated fee missing"))?;
    Ok(json!({ "fee": fee }))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "fee")?;
    if fetch_fee(conn, &p.id)?.is_none() {
        return Err(HandlerErr::not_found("fee not found"));
    }
    conn.execute("DELETE FROM fees WHERE id = ?", [&p.id])
        .map_err(|e| delete_err("fees", e))?;
    Ok(json!({ "ok": true }))
}

type Op = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: Op = match req.method.as_str() {
        "fees.list" => list,
        "fees.get" => get,
        "fees.create" => create,
        "fees.update" => update,
        "fees.delete" => delete,
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
