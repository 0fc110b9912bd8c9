use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
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

const TITLES: &[&str] = &["parent", "teacher", "officer", "student", "admin"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserRow {
    id: String,
    full_name: String,
    email: String,
    title: String,
    status: String,
    phone: Option<String>,
    student_id: Option<String>,
    student_name: Option<String>,
    created_at: String,
}

// The password hash never leaves the database layer.
const SELECT_USER: &str = "SELECT u.id, u.full_name, u.email, u.title, u.status, u.phone,
            u.student_id, s.name, u.created_at
     FROM users u
     LEFT JOIN students s ON s.id = u.student_id";

fn user_from_row(r: &rusqlite::Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: r.get(0)?,
        full_name: r.get(1)?,
        email: r.get(2)?,
        title: r.get(3)?,
        status: r.get(4)?,
        phone: r.get(5)?,
        student_id: r.get(6)?,
        student_name: r.get(7)?,
        created_at: r.get(8)?,
    })
}

fn fetch_user(conn: &Connection, id: &str) -> Result<Option<UserRow>, HandlerErr> {
    conn.query_row(&format!("{} WHERE u.id = ?", SELECT_USER), [id], user_from_row)
        .optional()
        .map_err(query_err)
}

fn hash_password(password: &str) -> Result<String, HandlerErr> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn verify_password(password: &str, stored: &str) -> bool {
    PasswordHash::new(stored)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserParams {
    full_name: String,
    email: String,
    password: Option<String>,
    title: String,
    status: Option<String>,
    phone: Option<String>,
    student_id: Option<String>,
}

fn validated(conn: &Connection, params: &serde_json::Value) -> Result<UserParams, HandlerErr> {
    let mut p: UserParams = parse_params(params)?;
    p.full_name = p.full_name.trim().to_string();
    p.email = p.email.trim().to_lowercase();
    if p.full_name.is_empty() {
        return Err(HandlerErr::bad_params("fullName must not be empty"));
    }
    if p.email.is_empty() || !p.email.contains('@') {
        return Err(HandlerErr::bad_params("email must be a valid address"));
    }
    if !TITLES.contains(&p.title.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "title must be one of: {}",
            TITLES.join(", ")
        )));
    }
    if let Some(status) = &p.status {
        if !matches!(status.as_str(), "active" | "inactive") {
            return Err(HandlerErr::bad_params(
                "status must be one of: active, inactive",
            ));
        }
    }
    if let Some(sid) = &p.student_id {
        require_ref(conn, "students", "student", sid)?;
    }
    Ok(p)
}

fn identity_taken(
    conn: &Connection,
    email: &str,
    full_name: &str,
    exclude_id: Option<&str>,
) -> Result<Option<&'static str>, HandlerErr> {
    let (email_sql, name_sql) = match exclude_id {
        Some(_) => (
            "SELECT 1 FROM users WHERE email = ? AND id != ?",
            "SELECT 1 FROM users WHERE full_name = ? AND id != ?",
        ),
        None => (
            "SELECT 1 FROM users WHERE email = ?",
            "SELECT 1 FROM users WHERE full_name = ?",
        ),
    };
    let probe = |sql: &str, value: &str| -> Result<bool, HandlerErr> {
        let hit = match exclude_id {
            Some(id) => conn
                .query_row(sql, (value, id), |r| r.get::<_, i64>(0))
                .optional(),
            None => conn.query_row(sql, [value], |r| r.get::<_, i64>(0)).optional(),
        }
        .map_err(query_err)?;
        Ok(hit.is_some())
    };
    if probe(email_sql, email)? {
        return Ok(Some("email is already registered"));
    }
    if probe(name_sql, full_name)? {
        return Ok(Some("fullName is already registered"));
    }
    Ok(None)
}

fn list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!("{} ORDER BY u.created_at DESC", SELECT_USER))
        .map_err(query_err)?;
    let users = stmt
        .query_map([], user_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "users": users }))
}

fn get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "user")?;
    match fetch_user(conn, &p.id)? {
        Some(u) => Ok(json!({ "user": u })),
        None => Err(HandlerErr::not_found("user not found")),
    }
}

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p = validated(conn, params)?;
    let Some(password) = p.password.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return Err(HandlerErr::bad_params("password must not be empty"));
    };
    if let Some(message) = identity_taken(conn, &p.email, &p.full_name, None)? {
        return Err(HandlerErr::conflict(message));
    }
    let password_hash = hash_password(password)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, full_name, email, password_hash, title, status, phone, student_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &id,
            &p.full_name,
            &p.email,
            &password_hash,
            &p.title,
            p.status.as_deref().unwrap_or("active"),
            p.phone.as_deref(),
            p.student_id.as_deref(),
        ),
    )
    .map_err(|e| insert_err("users", e))?;
    let user =
        fetch_user(conn, &id)?.ok_or_else(|| HandlerErr::new("internal", "inserted user missing"))?;
    Ok(json!({ "user": user }))
}

fn update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let idp: IdParams = parse_params(params)?;
    check_id(&idp.id, "user")?;
    if fetch_user(conn, &idp.id)?.is_none() {
        return Err(HandlerErr::not_found("user not found"));
    }
    let p = validated(conn, params)?;
    if let Some(message) = identity_taken(conn, &p.email, &p.full_name, Some(&idp.id))? {
        return Err(HandlerErr::conflict(message));
    }
    conn.execute(
        "UPDATE users SET full_name = ?, email = ?, title = ?, status = ?, phone = ?, student_id = ?
         WHERE id = ?",
        (
            &p.full_name,
            &p.email,
            &p.title,
            p.status.as_deref().unwrap_or("active"),
            p.phone.as_deref(),
            p.student_id.as_deref(),
            &idp.id,
        ),
    )
    .map_err(|e| update_err("users", e))?;
    // The password only changes when the caller sends a new one.
    if let Some(password) = p.password.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let password_hash = hash_password(password)?;
        conn.execute(
            "UPDATE users SET password_hash = ? WHERE id = ?",
            (&password_hash, &idp.id),
        )
        .map_err(|e| update_err("users", e))?;
    }
    let user = fetch_user(conn, &idp.id)?
        .ok_or_else(|| HandlerErr::new("internal", "updated user missing"))?;
    Ok(json!({ "user": user }))
}

fn delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: IdParams = parse_params(params)?;
    check_id(&p.id, "user")?;
    if fetch_user(conn, &p.id)?.is_none() {
        return Err(HandlerErr::not_found("user not found"));
    }
    let courses = ref_count(conn, "courses", "teacher_id", &p.id)?;
    if courses > 0 {
        return Err(HandlerErr::conflict(format!(
            "user is referenced by {} courses",
            courses
        )));
    }
    conn.execute("DELETE FROM users WHERE id = ?", [&p.id])
        .map_err(|e| delete_err("users", e))?;
    Ok(json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct LoginParams {
    email: String,
    password: String,
}

fn login(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let p: LoginParams = parse_params(params)?;
    let email = p.email.trim().to_lowercase();

    let row = conn
        .query_row(
            "SELECT id, password_hash, status FROM users WHERE email = ?",
            [&email],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            },
        )
        .optional()
        .map_err(query_err)?;
    let Some((id, password_hash, status)) = row else {
        return Err(HandlerErr::not_found("user not found"));
    };
    if status != "active" {
        return Err(HandlerErr::bad_params("account is inactive"));
    }
    if !verify_password(&p.password, &password_hash) {
        return Err(HandlerErr::bad_params("invalid credentials"));
    }

    let user =
        fetch_user(conn, &id)?.ok_or_else(|| HandlerErr::new("internal", "logged-in user missing"))?;
    Ok(json!({ "user": user }))
}

type Op = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op: Op = match req.method.as_str() {
        "users.list" => list,
        "users.get" => get,
        "users.create" => create,
        "users.update" => update,
        "users.delete" => delete,
        "users.login" => login,
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
