use super::notifications::log_notification;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    collect_rows, ensure_exists, new_id, one_of, optional_date, optional_str, required_date,
    required_str, run, run_list, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::results::display_name;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const STATUSES: [&str; 3] = ["P", "A", "L"];
const ABSENT: &str = "A";

fn absence_message(student_name: &str, date: &str) -> String {
    format!(
        "Alert: Your ward {} was marked ABSENT on {}. Please contact the admin if this is an error.",
        student_name, date
    )
}

/// Logs an SMS to the first linked parent with a phone number.
fn send_absence_alert(
    conn: &Connection,
    student_id: &str,
    date: &str,
) -> Result<Option<String>, HandlerErr> {
    let (first, last): (String, String) = conn
        .query_row(
            "SELECT first_name, last_name FROM students WHERE id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(HandlerErr::query)?;
    let phone: Option<String> = conn
        .query_row(
            "SELECT p.phone
             FROM parents p
             JOIN parent_students ps ON ps.parent_id = p.id
             WHERE ps.student_id = ? AND p.phone <> ''
             ORDER BY ps.linked_at, p.rowid
             LIMIT 1",
            [student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(phone) = phone else {
        log::info!("no parent phone for student {}; absence alert skipped", student_id);
        return Ok(None);
    };

    log_notification(
        conn,
        "SMS",
        &phone,
        "",
        &absence_message(&display_name(&first, &last), date),
        Some(&json!({ "studentId": student_id, "type": "attendance_alert" })),
    )
}

fn attendance_mark(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let date = required_date(params, "date")?;
    let status = one_of(&required_str(params, "status")?, &STATUSES, "status")?;
    let marked_by = optional_str(params, "markedBy");
    ensure_exists(conn, "students", &student_id, "student")?;
    if let Some(staff_id) = marked_by.as_deref() {
        ensure_exists(conn, "staff", staff_id, "staff member")?;
    }

    conn.execute(
        "INSERT INTO attendance_records(id, student_id, date, status, marked_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           status = excluded.status,
           marked_by = excluded.marked_by",
        (
            new_id(),
            &student_id,
            &date,
            &status,
            &marked_by,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::insert("attendance_records", e))?;

    // The record stands even when the alert cannot be sent.
    let (notification_id, alert_error) = if status == ABSENT {
        match send_absence_alert(conn, &student_id, &date) {
            Ok(id) => (id, None),
            Err(e) => {
                log::warn!("absence alert for student {} failed: {}", student_id, e.message);
                (None, Some(json!({ "code": e.code, "message": e.message })))
            }
        }
    } else {
        (None, None)
    };

    Ok(json!({
        "studentId": student_id,
        "date": date,
        "status": status,
        "notificationId": notification_id,
        "alertError": alert_error,
    }))
}

fn attendance_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let records = collect_rows(
        conn,
        "SELECT date, status, marked_by, created_at
         FROM attendance_records
         WHERE student_id = ?
         ORDER BY date DESC",
        [&student_id],
        |r| {
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "status": r.get::<_, String>(1)?,
                "markedBy": r.get::<_, Option<String>>(2)?,
                "createdAt": r.get::<_, String>(3)?,
            }))
        },
    )?;
    Ok(json!({ "records": records }))
}

fn attendance_summary(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let from = optional_date(params, "from")?;
    let to = optional_date(params, "to")?;
    ensure_exists(conn, "students", &student_id, "student")?;

    let counts = collect_rows(
        conn,
        "SELECT status, COUNT(*)
         FROM attendance_records
         WHERE student_id = ?1
           AND (?2 IS NULL OR date >= ?2)
           AND (?3 IS NULL OR date <= ?3)
         GROUP BY status",
        (&student_id, &from, &to),
        |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
    )?;
    let count_of = |code: &str| {
        counts
            .iter()
            .find(|(s, _)| s == code)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };
    let present = count_of("P");
    let absent = count_of("A");
    let leave = count_of("L");
    let total = present + absent + leave;
    let present_percent = if total > 0 {
        crate::results::round_2dp(100.0 * present as f64 / total as f64)
    } else {
        0.0
    };

    Ok(json!({
        "studentId": student_id,
        "from": from,
        "to": to,
        "present": present,
        "absent": absent,
        "leave": leave,
        "total": total,
        "presentPercent": present_percent,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(run(state, req, attendance_mark)),
        "attendance.list" => Some(run_list(state, req, "records", attendance_list)),
        "attendance.summary" => Some(run(state, req, attendance_summary)),
        _ => None,
    }
}
