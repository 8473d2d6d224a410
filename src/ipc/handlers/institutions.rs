use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    collect_rows, ensure_exists, new_id, optional_bool, optional_str, required_date, required_str,
    run, run_list, str_or_empty, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn academic_years_list(conn: &Connection, _params: &serde_json::Value) -> HandlerResult {
    let years = collect_rows(
        conn,
        "SELECT id, name, start_date, end_date, is_active
         FROM academic_years
         ORDER BY start_date DESC",
        [],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "startDate": r.get::<_, String>(2)?,
                "endDate": r.get::<_, String>(3)?,
                "isActive": r.get::<_, i64>(4)? != 0,
            }))
        },
    )?;
    Ok(json!({ "academicYears": years }))
}

fn academic_years_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let name = required_str(params, "name")?;
    let start_date = required_date(params, "startDate")?;
    let end_date = required_date(params, "endDate")?;
    if end_date < start_date {
        return Err(HandlerErr::bad_params("endDate must not be before startDate"));
    }
    let is_active = optional_bool(params, "isActive").unwrap_or(false);

    let id = new_id();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    if is_active {
        tx.execute("UPDATE academic_years SET is_active = 0", [])
            .map_err(|e| HandlerErr::update("academic_years", e))?;
    }
    tx.execute(
        "INSERT INTO academic_years(id, name, start_date, end_date, is_active)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &name, &start_date, &end_date, is_active as i64),
    )
    .map_err(|e| HandlerErr::insert("academic_years", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "academicYearId": id, "name": name }))
}

fn academic_years_set_active(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let id = required_str(params, "academicYearId")?;
    ensure_exists(conn, "academic_years", &id, "academic year")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "UPDATE academic_years SET is_active = CASE WHEN id = ? THEN 1 ELSE 0 END",
        [&id],
    )
    .map_err(|e| HandlerErr::update("academic_years", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
}

fn institution_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "code": r.get::<_, String>(2)?,
        "address": r.get::<_, String>(3)?,
        "phone": r.get::<_, String>(4)?,
        "email": r.get::<_, String>(5)?,
        "description": r.get::<_, String>(6)?,
        "isActive": r.get::<_, i64>(7)? != 0,
    }))
}

fn institutions_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let active_only = optional_bool(params, "activeOnly").unwrap_or(false);
    let sql = format!(
        "SELECT id, name, code, address, phone, email, description, is_active
         FROM institutions
         {}
         ORDER BY rowid",
        if active_only { "WHERE is_active = 1" } else { "" }
    );
    let institutions = collect_rows(conn, &sql, [], institution_json)?;
    Ok(json!({ "institutions": institutions }))
}

fn institutions_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let name = required_str(params, "name")?;
    let code = required_str(params, "code")?;
    let id = new_id();
    conn.execute(
        "INSERT INTO institutions(id, name, code, address, phone, email, description, is_active)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &name,
            &code,
            str_or_empty(params, "address"),
            str_or_empty(params, "phone"),
            str_or_empty(params, "email"),
            str_or_empty(params, "description"),
            optional_bool(params, "isActive").unwrap_or(true) as i64,
        ),
    )
    .map_err(|e| HandlerErr::insert("institutions", e))?;
    Ok(json!({ "institutionId": id, "name": name, "code": code }))
}

fn institutions_update(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let id = required_str(params, "institutionId")?;
    ensure_exists(conn, "institutions", &id, "institution")?;
    let Some(patch) = params.get("patch").filter(|p| p.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut changed = 0;
    for (key, column) in [
        ("name", "name"),
        ("code", "code"),
        ("address", "address"),
        ("phone", "phone"),
        ("email", "email"),
        ("description", "description"),
    ] {
        let Some(value) = optional_str(patch, key) else {
            continue;
        };
        let sql = format!("UPDATE institutions SET {} = ? WHERE id = ?", column);
        conn.execute(&sql, (&value, &id))
            .map_err(|e| HandlerErr::update("institutions", e))?;
        changed += 1;
    }
    if let Some(active) = optional_bool(patch, "isActive") {
        conn.execute(
            "UPDATE institutions SET is_active = ? WHERE id = ?",
            (active as i64, &id),
        )
        .map_err(|e| HandlerErr::update("institutions", e))?;
        changed += 1;
    }

    Ok(json!({ "ok": true, "changed": changed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "academicYears.list" => Some(run_list(state, req, "academicYears", academic_years_list)),
        "academicYears.create" => Some(run(state, req, academic_years_create)),
        "academicYears.setActive" => Some(run(state, req, academic_years_set_active)),
        "institutions.list" => Some(run_list(state, req, "institutions", institutions_list)),
        "institutions.create" => Some(run(state, req, institutions_create)),
        "institutions.update" => Some(run(state, req, institutions_update)),
        _ => None,
    }
}
