use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub type HandlerResult = Result<serde_json::Value, HandlerErr>;

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Runs `f` against the open workspace and wraps the outcome in a response.
pub fn run(
    state: &AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> HandlerResult,
) -> serde_json::Value {
    match db_conn(state).and_then(|conn| f(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

/// Like `run`, but answers `{ <key>: [] }` when no workspace is open.
pub fn run_list(
    state: &AppState,
    req: &Request,
    key: &str,
    f: fn(&Connection, &serde_json::Value) -> HandlerResult,
) -> serde_json::Value {
    if state.db.is_none() {
        return ok(&req.id, json!({ key: [] }));
    }
    run(state, req, f)
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let v = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if v.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(v)
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn str_or_empty(params: &serde_json::Value, key: &str) -> String {
    optional_str(params, key).unwrap_or_default()
}

pub fn parse_date(raw: &str, key: &str) -> Result<String, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| {
            HandlerErr::bad_params(format!("{} must be a YYYY-MM-DD date", key))
                .with_details(json!({ key: raw }))
        })
}

pub fn required_date(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    parse_date(&required_str(params, key)?, key)
}

pub fn optional_date(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    optional_str(params, key)
        .map(|s| parse_date(&s, key))
        .transpose()
}

pub fn optional_f64(params: &serde_json::Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    optional_f64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_bool(params: &serde_json::Value, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

/// Upper-cases `value` and checks it against `allowed`.
pub fn one_of(value: &str, allowed: &[&str], key: &str) -> Result<String, HandlerErr> {
    let up = value.trim().to_ascii_uppercase();
    if allowed.contains(&up.as_str()) {
        Ok(up)
    } else {
        Err(
            HandlerErr::bad_params(format!("{} must be one of: {}", key, allowed.join(", ")))
                .with_details(json!({ key: value })),
        )
    }
}

pub fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::query)
}

pub fn ensure_exists(conn: &Connection, table: &str, id: &str, what: &str) -> Result<(), HandlerErr> {
    if row_exists(conn, table, id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found(what).with_details(json!({ "id": id })))
    }
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn collect_rows<T, F>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    f: F,
) -> Result<Vec<T>, HandlerErr>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map(params, f)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query);
    rows
}
