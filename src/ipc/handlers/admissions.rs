use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    collect_rows, ensure_exists, new_id, one_of, optional_bool, optional_str, required_date,
    required_str, run, run_list, str_or_empty, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const STATUSES: [&str; 4] = ["SUBMITTED", "UNDER_REVIEW", "APPROVED", "REJECTED"];

fn programmes_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let institution_id = optional_str(params, "institutionId");
    let active_only = optional_bool(params, "activeOnly").unwrap_or(false);
    let programmes = collect_rows(
        conn,
        "SELECT id, institution_id, name, code, description, is_active
         FROM programmes
         WHERE (?1 IS NULL OR institution_id = ?1)
           AND (?2 = 0 OR is_active = 1)
         ORDER BY code",
        (&institution_id, active_only as i64),
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "institutionId": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "code": r.get::<_, String>(3)?,
                "description": r.get::<_, String>(4)?,
                "isActive": r.get::<_, i64>(5)? != 0,
            }))
        },
    )?;
    Ok(json!({ "programmes": programmes }))
}

fn programmes_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let institution_id = required_str(params, "institutionId")?;
    let name = required_str(params, "name")?;
    let code = required_str(params, "code")?;
    ensure_exists(conn, "institutions", &institution_id, "institution")?;

    let id = new_id();
    conn.execute(
        "INSERT INTO programmes(id, institution_id, name, code, description, is_active)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            &institution_id,
            &name,
            &code,
            str_or_empty(params, "description"),
            optional_bool(params, "isActive").unwrap_or(true) as i64,
        ),
    )
    .map_err(|e| HandlerErr::insert("programmes", e))?;
    Ok(json!({ "programmeId": id }))
}

fn admissions_submit(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let academic_year_id = required_str(params, "academicYearId")?;
    let programme_id = required_str(params, "programmeId")?;
    let full_name = required_str(params, "fullName")?;
    let date_of_birth = required_date(params, "dateOfBirth")?;
    let email = required_str(params, "email")?;
    let phone = required_str(params, "phone")?;
    let address = required_str(params, "address")?;
    ensure_exists(conn, "academic_years", &academic_year_id, "academic year")?;

    let programme_active: Option<i64> = conn
        .query_row(
            "SELECT is_active FROM programmes WHERE id = ?",
            [&programme_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    match programme_active {
        None => return Err(HandlerErr::not_found("programme")),
        Some(0) => return Err(HandlerErr::bad_params("programme is not accepting applications")),
        Some(_) => {}
    }

    let id = new_id();
    let submitted_at = db::now_rfc3339();
    conn.execute(
        "INSERT INTO admission_applications(
            id, academic_year_id, programme_id, full_name, date_of_birth, email, phone,
            address, guardian_name, guardian_phone, status, submitted_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'SUBMITTED', ?)",
        (
            &id,
            &academic_year_id,
            &programme_id,
            &full_name,
            &date_of_birth,
            &email,
            &phone,
            &address,
            str_or_empty(params, "guardianName"),
            str_or_empty(params, "guardianPhone"),
            &submitted_at,
        ),
    )
    .map_err(|e| HandlerErr::insert("admission_applications", e))?;
    log::info!("admission application {} submitted", id);
    Ok(json!({ "applicationId": id, "status": "SUBMITTED", "submittedAt": submitted_at }))
}

fn admissions_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let status = optional_str(params, "status")
        .map(|s| one_of(&s, &STATUSES, "status"))
        .transpose()?;
    let applications = collect_rows(
        conn,
        "SELECT a.id, a.full_name, a.email, a.phone, a.status, a.submitted_at,
                a.reviewed_at, a.reviewed_by, a.remarks,
                p.id, p.code, p.name, ay.name
         FROM admission_applications a
         JOIN programmes p ON p.id = a.programme_id
         JOIN academic_years ay ON ay.id = a.academic_year_id
         WHERE (?1 IS NULL OR a.status = ?1)
         ORDER BY a.submitted_at DESC, a.rowid DESC",
        [&status],
        |r| {
            let code: String = r.get(10)?;
            let name: String = r.get(11)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "phone": r.get::<_, String>(3)?,
                "status": r.get::<_, String>(4)?,
                "submittedAt": r.get::<_, String>(5)?,
                "reviewedAt": r.get::<_, Option<String>>(6)?,
                "reviewedBy": r.get::<_, Option<String>>(7)?,
                "remarks": r.get::<_, String>(8)?,
                "programmeId": r.get::<_, String>(9)?,
                "programme": format!("{} - {}", code, name),
                "academicYear": r.get::<_, String>(12)?,
            }))
        },
    )?;
    Ok(json!({ "applications": applications }))
}

fn admissions_review(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let id = required_str(params, "applicationId")?;
    let status = one_of(&required_str(params, "status")?, &STATUSES, "status")?;
    let reviewed_by = optional_str(params, "reviewedBy");
    let remarks = optional_str(params, "remarks");
    ensure_exists(conn, "admission_applications", &id, "application")?;

    let reviewed_at = db::now_rfc3339();
    conn.execute(
        "UPDATE admission_applications
         SET status = ?, reviewed_at = ?, reviewed_by = COALESCE(?, reviewed_by),
             remarks = COALESCE(?, remarks)
         WHERE id = ?",
        (&status, &reviewed_at, &reviewed_by, &remarks, &id),
    )
    .map_err(|e| HandlerErr::update("admission_applications", e))?;
    log::info!("admission application {} set to {}", id, status);
    Ok(json!({ "applicationId": id, "status": status, "reviewedAt": reviewed_at }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "programmes.list" => Some(run_list(state, req, "programmes", programmes_list)),
        "programmes.create" => Some(run(state, req, programmes_create)),
        "admissions.submit" => Some(run(state, req, admissions_submit)),
        "admissions.list" => Some(run_list(state, req, "applications", admissions_list)),
        "admissions.review" => Some(run(state, req, admissions_review)),
        _ => None,
    }
}
