use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    collect_rows, new_id, optional_str, required_date, required_str, run, run_list, str_or_empty,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn finance_reports_list(conn: &Connection, _params: &serde_json::Value) -> HandlerResult {
    let reports = collect_rows(
        conn,
        "SELECT id, title, period_start, period_end, file_path, uploaded_by, uploaded_at
         FROM finance_reports
         ORDER BY period_end DESC, uploaded_at DESC",
        [],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "periodStart": r.get::<_, String>(2)?,
                "periodEnd": r.get::<_, String>(3)?,
                "filePath": r.get::<_, String>(4)?,
                "uploadedBy": r.get::<_, Option<String>>(5)?,
                "uploadedAt": r.get::<_, String>(6)?,
            }))
        },
    )?;
    Ok(json!({ "financeReports": reports }))
}

fn finance_reports_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let title = required_str(params, "title")?;
    let period_start = required_date(params, "periodStart")?;
    let period_end = required_date(params, "periodEnd")?;
    let file_path = required_str(params, "filePath")?;
    if period_end < period_start {
        return Err(HandlerErr::bad_params("periodEnd must not be before periodStart"));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO finance_reports(id, title, period_start, period_end, file_path, uploaded_by, uploaded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &title,
            &period_start,
            &period_end,
            &file_path,
            optional_str(params, "uploadedBy"),
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::insert("finance_reports", e))?;
    Ok(json!({ "financeReportId": id }))
}

fn projects_list(conn: &Connection, _params: &serde_json::Value) -> HandlerResult {
    let projects = collect_rows(
        conn,
        "SELECT id, name, description, status, last_updated
         FROM project_statuses
         ORDER BY last_updated DESC, name",
        [],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "description": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
                "lastUpdated": r.get::<_, String>(4)?,
            }))
        },
    )?;
    Ok(json!({ "projects": projects }))
}

/// Keyed by project name; an existing project keeps its id.
fn projects_upsert(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let name = required_str(params, "name")?;
    let status = required_str(params, "status")?;
    let description = optional_str(params, "description");
    conn.execute(
        "INSERT INTO project_statuses(id, name, description, status, last_updated)
         VALUES(?, ?, COALESCE(?, ''), ?, ?)
         ON CONFLICT(name) DO UPDATE SET
           status = excluded.status,
           description = CASE WHEN ? IS NULL THEN description ELSE excluded.description END,
           last_updated = excluded.last_updated",
        (
            new_id(),
            &name,
            &description,
            &status,
            db::now_rfc3339(),
            &description,
        ),
    )
    .map_err(|e| HandlerErr::insert("project_statuses", e))?;
    let id: String = conn
        .query_row(
            "SELECT id FROM project_statuses WHERE name = ?",
            [&name],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    Ok(json!({ "projectId": id, "name": name, "status": status }))
}

fn minutes_list(conn: &Connection, _params: &serde_json::Value) -> HandlerResult {
    let minutes = collect_rows(
        conn,
        "SELECT id, title, meeting_date, file_path, created_by, created_at
         FROM meeting_minutes
         ORDER BY meeting_date DESC, created_at DESC",
        [],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "meetingDate": r.get::<_, String>(2)?,
                "filePath": r.get::<_, String>(3)?,
                "createdBy": r.get::<_, Option<String>>(4)?,
                "createdAt": r.get::<_, String>(5)?,
            }))
        },
    )?;
    Ok(json!({ "minutes": minutes }))
}

fn minutes_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let title = required_str(params, "title")?;
    let meeting_date = required_date(params, "meetingDate")?;
    let file_path = str_or_empty(params, "filePath");
    if file_path.is_empty() {
        return Err(HandlerErr::bad_params("missing filePath"));
    }
    let id = new_id();
    conn.execute(
        "INSERT INTO meeting_minutes(id, title, meeting_date, file_path, created_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            &title,
            &meeting_date,
            &file_path,
            optional_str(params, "createdBy"),
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::insert("meeting_minutes", e))?;
    Ok(json!({ "minuteId": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "committee.financeReports.list" => {
            Some(run_list(state, req, "financeReports", finance_reports_list))
        }
        "committee.financeReports.create" => Some(run(state, req, finance_reports_create)),
        "committee.projects.list" => Some(run_list(state, req, "projects", projects_list)),
        "committee.projects.upsert" => Some(run(state, req, projects_upsert)),
        "committee.minutes.list" => Some(run_list(state, req, "minutes", minutes_list)),
        "committee.minutes.create" => Some(run(state, req, minutes_create)),
        _ => None,
    }
}
