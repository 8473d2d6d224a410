use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    collect_rows, new_id, one_of, optional_str, required_str, run, run_list, str_or_empty,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

pub const CHANNELS: [&str; 2] = ["EMAIL", "SMS"];
const LIST_DEFAULT_LIMIT: i64 = 100;
const LIST_MAX_LIMIT: i64 = 1000;
const SENDER_SETTINGS_KEY: &str = "notifications.sender";
const DEFAULT_FROM_EMAIL: &str = "noreply@localhost";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SenderConfig {
    #[serde(default)]
    from_email: Option<String>,
    #[serde(default = "default_sms_enabled")]
    sms_enabled: bool,
}

fn default_sms_enabled() -> bool {
    true
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            from_email: None,
            sms_enabled: true,
        }
    }
}

fn sender_config(conn: &Connection) -> Result<SenderConfig, HandlerErr> {
    let raw = db::settings_get_json(conn, SENDER_SETTINGS_KEY)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    match raw {
        None => Ok(SenderConfig::default()),
        Some(v) => serde_json::from_value(v).map_err(|e| {
            HandlerErr::new(
                "not_configured",
                format!("{} is malformed: {}", SENDER_SETTINGS_KEY, e),
            )
        }),
    }
}

/// Records an outgoing message. Delivery itself is only logged.
/// Returns `None` when the channel is switched off in `notifications.sender`.
pub fn log_notification(
    conn: &Connection,
    channel: &str,
    to: &str,
    subject: &str,
    body: &str,
    meta: Option<&serde_json::Value>,
) -> Result<Option<String>, HandlerErr> {
    let sender = sender_config(conn)?;
    if channel == "SMS" && !sender.sms_enabled {
        log::info!("sms disabled; message to {} not sent", to);
        return Ok(None);
    }
    let id = new_id();
    let meta_json = meta.map(|m| m.to_string());
    conn.execute(
        "INSERT INTO notification_log(id, channel, recipient, subject, body, created_at, meta_json)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&id, channel, to, subject, body, db::now_rfc3339(), &meta_json),
    )
    .map_err(|e| HandlerErr::insert("notification_log", e))?;
    if channel == "EMAIL" {
        let from = sender.from_email.as_deref().unwrap_or(DEFAULT_FROM_EMAIL);
        log::info!("EMAIL from {} to {}: {}", from, to, subject);
    } else {
        log::info!("{} to {}: {}", channel, to, body);
    }
    Ok(Some(id))
}

fn notifications_send(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let channel = one_of(&required_str(params, "channel")?, &CHANNELS, "channel")?;
    let to = required_str(params, "to")?;
    let body = required_str(params, "body")?;
    let subject = str_or_empty(params, "subject");
    let meta = params.get("meta").filter(|m| !m.is_null());
    let id = log_notification(conn, &channel, &to, &subject, &body, meta)?;
    Ok(json!({ "notificationId": id, "sent": id.is_some() }))
}

fn notifications_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let channel = optional_str(params, "channel")
        .map(|c| one_of(&c, &CHANNELS, "channel"))
        .transpose()?;
    let limit = params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(LIST_DEFAULT_LIMIT)
        .clamp(1, LIST_MAX_LIMIT);
    let entries = collect_rows(
        conn,
        "SELECT id, channel, recipient, subject, body, created_at, meta_json
         FROM notification_log
         WHERE (?1 IS NULL OR channel = ?1)
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2",
        (&channel, limit),
        |r| {
            let meta: Option<String> = r.get(6)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "channel": r.get::<_, String>(1)?,
                "to": r.get::<_, String>(2)?,
                "subject": r.get::<_, String>(3)?,
                "body": r.get::<_, String>(4)?,
                "createdAt": r.get::<_, String>(5)?,
                "meta": meta.and_then(|m| serde_json::from_str::<serde_json::Value>(&m).ok()),
            }))
        },
    )?;
    Ok(json!({ "notifications": entries }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.send" => Some(run(state, req, notifications_send)),
        "notifications.list" => Some(run_list(state, req, "notifications", notifications_list)),
        _ => None,
    }
}
