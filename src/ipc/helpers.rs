use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::err;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn bad_id(what: &str) -> Self {
        Self::new("bad_id", format!("malformed {} id", what))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

#[derive(Debug, Deserialize)]
pub struct IdParams {
    pub id: String,
}

/// Deserialize the request params into a typed per-operation struct before
/// any business logic runs. Omitted params read as an empty object.
pub fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, HandlerErr> {
    let value = if params.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        params.clone()
    };
    serde_json::from_value(value).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

/// Keys are uuid strings; reject malformed ones before any lookup.
pub fn check_id(id: &str, what: &str) -> Result<(), HandlerErr> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| HandlerErr::bad_id(what))
}

pub fn row_exists(conn: &Connection, table: &'static str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(&format!("SELECT 1 FROM {} WHERE id = ?", table), [id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(query_err)
}

/// Referential validation for a foreign-key field: the id must be well-formed
/// and the referenced row must exist.
pub fn require_ref(
    conn: &Connection,
    table: &'static str,
    what: &'static str,
    id: &str,
) -> Result<(), HandlerErr> {
    check_id(id, what)?;
    if !row_exists(conn, table, id)? {
        return Err(HandlerErr::not_found(format!("{} not found", what)));
    }
    Ok(())
}

pub fn query_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

pub fn tx_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_tx_failed", e.to_string())
}

pub fn commit_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_commit_failed", e.to_string())
}

fn is_constraint(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// A unique-index violation surfaces as a conflict, not a storage failure.
fn write_err(code: &'static str, table: &'static str, e: rusqlite::Error) -> HandlerErr {
    if is_constraint(&e) {
        return HandlerErr::conflict(e.to_string());
    }
    HandlerErr {
        code,
        message: e.to_string(),
        details: Some(json!({ "table": table })),
    }
}

pub fn insert_err(table: &'static str, e: rusqlite::Error) -> HandlerErr {
    write_err("db_insert_failed", table, e)
}

pub fn update_err(table: &'static str, e: rusqlite::Error) -> HandlerErr {
    write_err("db_update_failed", table, e)
}

pub fn delete_err(table: &'static str, e: rusqlite::Error) -> HandlerErr {
    write_err("db_delete_failed", table, e)
}

/// Count of rows in `table` whose `column` equals `id`; used by the
/// restrict-delete checks.
pub fn ref_count(
    conn: &Connection,
    table: &'static str,
    column: &'static str,
    id: &str,
) -> Result<i64, HandlerErr> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE {} = ?", table, column),
        [id],
        |r| r.get(0),
    )
    .map_err(query_err)
}

pub fn require_day(s: &str, what: &str) -> Result<(), HandlerErr> {
    if crate::calc::parse_day(s).is_none() {
        return Err(HandlerErr::bad_params(format!(
            "{} must be a YYYY-MM-DD date",
            what
        )));
    }
    Ok(())
}
