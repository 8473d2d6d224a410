use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    collect_rows, ensure_exists, new_id, one_of, optional_str, required_str, run, run_list,
    str_or_empty, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::payments::{self, GatewayConfig};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Settled payments keep their gateway ids and signature.
const VERIFIABLE_STATUSES: [&str; 2] = ["PENDING", "FAILED"];

fn gateway_config(conn: &Connection) -> Result<Option<GatewayConfig>, HandlerErr> {
    let raw = db::settings_get_json(conn, payments::GATEWAY_SETTINGS_KEY)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    match raw {
        None => Ok(None),
        Some(v) => serde_json::from_value::<GatewayConfig>(v).map(Some).map_err(|e| {
            HandlerErr::new(
                "not_configured",
                format!("{} is malformed: {}", payments::GATEWAY_SETTINGS_KEY, e),
            )
        }),
    }
}

fn payments_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let payer_name = required_str(params, "payerName")?;
    let category = one_of(&required_str(params, "category")?, &payments::CATEGORIES, "category")?;
    let Some(raw_amount) = params.get("amount") else {
        return Err(HandlerErr::bad_params("missing amount"));
    };
    let amount_minor = payments::parse_amount_minor(raw_amount)
        .map_err(|e| HandlerErr::bad_params(format!("{e:#}")))?;
    let student_id = optional_str(params, "studentId");
    if let Some(sid) = student_id.as_deref() {
        ensure_exists(conn, "students", sid, "student")?;
    }
    let gateway = gateway_config(conn)?;
    let currency = match optional_str(params, "currency") {
        Some(c) => c.to_ascii_uppercase(),
        None => gateway
            .as_ref()
            .and_then(|g| g.currency.clone())
            .unwrap_or_else(|| payments::DEFAULT_CURRENCY.to_string()),
    };

    let id = new_id();
    let now = db::now_rfc3339();
    conn.execute(
        "INSERT INTO payments(
            id, payer_name, student_id, category, amount_minor, currency, status,
            created_at, updated_at, notes
         ) VALUES(?, ?, ?, ?, ?, ?, 'PENDING', ?, ?, ?)",
        (
            &id,
            &payer_name,
            &student_id,
            &category,
            amount_minor,
            &currency,
            &now,
            &now,
            str_or_empty(params, "notes"),
        ),
    )
    .map_err(|e| HandlerErr::insert("payments", e))?;

    Ok(json!({
        "paymentId": id,
        "status": "PENDING",
        "amountMinor": amount_minor,
        "orderRequest": payments::order_request(&id, amount_minor, &currency),
        "keyId": gateway.map(|g| g.key_id),
    }))
}

fn payments_attach_order(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let payment_id = required_str(params, "paymentId")?;
    let order_id = required_str(params, "orderId")?;
    let n = conn
        .execute(
            "UPDATE payments SET gateway_order_id = ?, updated_at = ? WHERE id = ?",
            (&order_id, db::now_rfc3339(), &payment_id),
        )
        .map_err(|e| HandlerErr::update("payments", e))?;
    if n == 0 {
        return Err(HandlerErr::not_found("payment"));
    }
    Ok(json!({ "ok": true }))
}

fn payments_verify(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let payment_id = required_str(params, "paymentId")?;
    let order_id = required_str(params, "orderId")?;
    let gateway_payment_id = required_str(params, "gatewayPaymentId")?;
    let signature = required_str(params, "signature")?;

    let stored: Option<(String, String)> = conn
        .query_row(
            "SELECT gateway_order_id, status FROM payments WHERE id = ?",
            [&payment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((stored_order, current_status)) = stored else {
        return Err(HandlerErr::not_found("payment"));
    };
    if !VERIFIABLE_STATUSES.contains(&current_status.as_str()) {
        return Err(HandlerErr::new(
            "conflict",
            format!("payment is already {}", current_status),
        )
        .with_details(json!({ "paymentId": payment_id, "status": current_status })));
    }
    if !stored_order.is_empty() && stored_order != order_id {
        return Err(HandlerErr::bad_params("orderId does not match the payment")
            .with_details(json!({ "expected": stored_order, "got": order_id })));
    }

    let Some(cfg) = gateway_config(conn)?.filter(|c| !c.key_secret.is_empty()) else {
        return Err(HandlerErr::new(
            "not_configured",
            format!("{} is not set", payments::GATEWAY_SETTINGS_KEY),
        ));
    };
    let valid = payments::verify_signature(&order_id, &gateway_payment_id, &signature, &cfg.key_secret)
        .map_err(|e| HandlerErr::new("not_configured", format!("{e:#}")))?;

    let now = db::now_rfc3339();
    let status = if valid { "SUCCESS" } else { "FAILED" };
    conn.execute(
        "UPDATE payments
         SET status = ?, gateway_order_id = ?, gateway_payment_id = ?, gateway_signature = ?,
             updated_at = ?, verified_at = CASE WHEN ? = 'SUCCESS' THEN ? ELSE verified_at END
         WHERE id = ? AND status IN ('PENDING', 'FAILED')",
        (
            status,
            &order_id,
            &gateway_payment_id,
            &signature,
            &now,
            status,
            &now,
            &payment_id,
        ),
    )
    .map_err(|e| HandlerErr::update("payments", e))?;

    if !valid {
        log::warn!("payment {} failed signature verification", payment_id);
        return Err(HandlerErr::new("signature_invalid", "payment signature did not verify")
            .with_details(json!({ "paymentId": payment_id })));
    }
    log::info!("payment {} verified", payment_id);
    Ok(json!({ "paymentId": payment_id, "status": status, "verifiedAt": now }))
}

fn payments_set_status(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let payment_id = required_str(params, "paymentId")?;
    let status = one_of(&required_str(params, "status")?, &payments::STATUSES, "status")?;
    let verified_by = optional_str(params, "verifiedBy");
    ensure_exists(conn, "payments", &payment_id, "payment")?;

    let now = db::now_rfc3339();
    let verified_at = (status == "SUCCESS").then(|| now.clone());
    conn.execute(
        "UPDATE payments
         SET status = ?, updated_at = ?,
             verified_by = COALESCE(?, verified_by),
             verified_at = COALESCE(?, verified_at)
         WHERE id = ?",
        (&status, &now, &verified_by, &verified_at, &payment_id),
    )
    .map_err(|e| HandlerErr::update("payments", e))?;
    log::info!("payment {} set to {}", payment_id, status);
    Ok(json!({ "paymentId": payment_id, "status": status }))
}

fn payments_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let status = optional_str(params, "status")
        .map(|s| one_of(&s, &payments::STATUSES, "status"))
        .transpose()?;
    let category = optional_str(params, "category")
        .map(|s| one_of(&s, &payments::CATEGORIES, "category"))
        .transpose()?;
    let student_id = optional_str(params, "studentId");
    let list = collect_rows(
        conn,
        "SELECT id, payer_name, student_id, category, amount_minor, currency, status,
                gateway_order_id, gateway_payment_id, created_at, updated_at,
                verified_by, verified_at, notes
         FROM payments
         WHERE (?1 IS NULL OR status = ?1)
           AND (?2 IS NULL OR category = ?2)
           AND (?3 IS NULL OR student_id = ?3)
         ORDER BY created_at DESC, rowid DESC",
        (&status, &category, &student_id),
        |r| {
            let amount_minor: i64 = r.get(4)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "payerName": r.get::<_, String>(1)?,
                "studentId": r.get::<_, Option<String>>(2)?,
                "category": r.get::<_, String>(3)?,
                "amountMinor": amount_minor,
                "amount": payments::format_minor(amount_minor),
                "currency": r.get::<_, String>(5)?,
                "status": r.get::<_, String>(6)?,
                "orderId": r.get::<_, String>(7)?,
                "gatewayPaymentId": r.get::<_, String>(8)?,
                "createdAt": r.get::<_, String>(9)?,
                "updatedAt": r.get::<_, String>(10)?,
                "verifiedBy": r.get::<_, Option<String>>(11)?,
                "verifiedAt": r.get::<_, Option<String>>(12)?,
                "notes": r.get::<_, String>(13)?,
            }))
        },
    )?;
    Ok(json!({ "payments": list }))
}

fn payments_summary(conn: &Connection, _params: &serde_json::Value) -> HandlerResult {
    let rows = collect_rows(
        conn,
        "SELECT category, COUNT(*), COALESCE(SUM(amount_minor), 0)
         FROM payments
         WHERE status = 'SUCCESS'
         GROUP BY category
         ORDER BY category",
        [],
        |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?)),
    )?;
    let count: i64 = rows.iter().map(|(_, n, _)| n).sum();
    let total: i64 = rows.iter().map(|(_, _, t)| t).sum();
    let by_category: Vec<serde_json::Value> = rows
        .iter()
        .map(|(category, n, t)| {
            json!({
                "category": category,
                "count": n,
                "totalMinor": t,
                "total": payments::format_minor(*t),
            })
        })
        .collect();
    Ok(json!({
        "successfulCount": count,
        "totalRevenueMinor": total,
        "totalRevenue": payments::format_minor(total),
        "byCategory": by_category,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "payments.create" => Some(run(state, req, payments_create)),
        "payments.attachOrder" => Some(run(state, req, payments_attach_order)),
        "payments.verify" => Some(run(state, req, payments_verify)),
        "payments.setStatus" => Some(run(state, req, payments_set_status)),
        "payments.list" => Some(run_list(state, req, "payments", payments_list)),
        "payments.summary" => Some(run(state, req, payments_summary)),
        _ => None,
    }
}
