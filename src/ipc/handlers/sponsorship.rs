use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    collect_rows, ensure_exists, new_id, optional_str, required_str, run, run_list, str_or_empty,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::payments;
use crate::results::display_name;
use rusqlite::Connection;
use serde_json::json;

fn sponsors_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let full_name = required_str(params, "fullName")?;
    let id = new_id();
    conn.execute(
        "INSERT INTO sponsors(id, full_name, organization_name, address, phone, email)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            &full_name,
            str_or_empty(params, "organizationName"),
            str_or_empty(params, "address"),
            str_or_empty(params, "phone"),
            str_or_empty(params, "email"),
        ),
    )
    .map_err(|e| HandlerErr::insert("sponsors", e))?;
    Ok(json!({ "sponsorId": id }))
}

fn sponsors_list(conn: &Connection, _params: &serde_json::Value) -> HandlerResult {
    let sponsors = collect_rows(
        conn,
        "SELECT sp.id, sp.full_name, sp.organization_name, sp.phone, sp.email,
                (SELECT COUNT(*) FROM sponsorship_allocations a
                 WHERE a.sponsor_id = sp.id AND a.active = 1),
                (SELECT COALESCE(SUM(a.monthly_amount_minor), 0) FROM sponsorship_allocations a
                 WHERE a.sponsor_id = sp.id AND a.active = 1)
         FROM sponsors sp
         ORDER BY sp.full_name",
        [],
        |r| {
            let monthly: i64 = r.get(6)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
                "organizationName": r.get::<_, String>(2)?,
                "phone": r.get::<_, String>(3)?,
                "email": r.get::<_, String>(4)?,
                "activeAllocations": r.get::<_, i64>(5)?,
                "monthlyCommitmentMinor": monthly,
                "monthlyCommitment": payments::format_minor(monthly),
            }))
        },
    )?;
    Ok(json!({ "sponsors": sponsors }))
}

fn sponsorships_allocate(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let sponsor_id = required_str(params, "sponsorId")?;
    let student_id = required_str(params, "studentId")?;
    let start_year_id = required_str(params, "startYearId")?;
    let end_year_id = optional_str(params, "endYearId");
    let Some(raw_amount) = params.get("monthlyAmount") else {
        return Err(HandlerErr::bad_params("missing monthlyAmount"));
    };
    let monthly_minor = payments::parse_amount_minor(raw_amount)
        .map_err(|e| HandlerErr::bad_params(format!("{e:#}")))?;
    ensure_exists(conn, "sponsors", &sponsor_id, "sponsor")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    ensure_exists(conn, "academic_years", &start_year_id, "academic year")?;
    if let Some(end) = end_year_id.as_deref() {
        ensure_exists(conn, "academic_years", end, "academic year")?;
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO sponsorship_allocations(
            id, sponsor_id, student_id, start_year_id, end_year_id, monthly_amount_minor,
            active, notes
         ) VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &id,
            &sponsor_id,
            &student_id,
            &start_year_id,
            &end_year_id,
            monthly_minor,
            str_or_empty(params, "notes"),
        ),
    )
    .map_err(|e| HandlerErr::insert("sponsorship_allocations", e))?;
    log::info!("sponsor {} allocated to student {}", sponsor_id, student_id);
    Ok(json!({ "allocationId": id }))
}

fn sponsorships_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let sponsor_id = optional_str(params, "sponsorId");
    let student_id = optional_str(params, "studentId");
    let allocations = collect_rows(
        conn,
        "SELECT a.id, a.sponsor_id, sp.full_name, a.student_id, s.first_name, s.last_name,
                sy.name, ey.name, a.monthly_amount_minor, a.active, a.notes
         FROM sponsorship_allocations a
         JOIN sponsors sp ON sp.id = a.sponsor_id
         JOIN students s ON s.id = a.student_id
         JOIN academic_years sy ON sy.id = a.start_year_id
         LEFT JOIN academic_years ey ON ey.id = a.end_year_id
         WHERE (?1 IS NULL OR a.sponsor_id = ?1)
           AND (?2 IS NULL OR a.student_id = ?2)
         ORDER BY a.active DESC, sy.start_date DESC, sp.full_name",
        (&sponsor_id, &student_id),
        |r| {
            let first: String = r.get(4)?;
            let last: String = r.get(5)?;
            let monthly: i64 = r.get(8)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "sponsorId": r.get::<_, String>(1)?,
                "sponsorName": r.get::<_, String>(2)?,
                "studentId": r.get::<_, String>(3)?,
                "studentName": display_name(&first, &last),
                "startYear": r.get::<_, String>(6)?,
                "endYear": r.get::<_, Option<String>>(7)?,
                "monthlyAmountMinor": monthly,
                "monthlyAmount": payments::format_minor(monthly),
                "active": r.get::<_, i64>(9)? != 0,
                "notes": r.get::<_, String>(10)?,
            }))
        },
    )?;
    Ok(json!({ "allocations": allocations }))
}

fn sponsorships_end(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let allocation_id = required_str(params, "allocationId")?;
    let end_year_id = optional_str(params, "endYearId");
    ensure_exists(conn, "sponsorship_allocations", &allocation_id, "allocation")?;
    if let Some(end) = end_year_id.as_deref() {
        ensure_exists(conn, "academic_years", end, "academic year")?;
    }
    conn.execute(
        "UPDATE sponsorship_allocations
         SET active = 0, end_year_id = COALESCE(?, end_year_id)
         WHERE id = ?",
        (&end_year_id, &allocation_id),
    )
    .map_err(|e| HandlerErr::update("sponsorship_allocations", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sponsors.create" => Some(run(state, req, sponsors_create)),
        "sponsors.list" => Some(run_list(state, req, "sponsors", sponsors_list)),
        "sponsorships.allocate" => Some(run(state, req, sponsorships_allocate)),
        "sponsorships.list" => Some(run_list(state, req, "allocations", sponsorships_list)),
        "sponsorships.end" => Some(run(state, req, sponsorships_end)),
        _ => None,
    }
}
