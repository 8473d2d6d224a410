use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{collect_rows, required_str, run, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::results;
use rusqlite::Connection;
use serde_json::json;

fn to_value<T: serde::Serialize>(v: &T) -> HandlerResult {
    serde_json::to_value(v).map_err(|e| HandlerErr::new("encode_failed", e.to_string()))
}

fn reports_progress(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let report = results::compute_progress_report(conn, &student_id)?;
    to_value(&report)
}

fn reports_class_ranking(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let exam_id = required_str(params, "examId")?;
    let ranking = results::compute_class_ranking(conn, &exam_id)?;
    to_value(&ranking)
}

fn dashboard_admin(conn: &Connection, _params: &serde_json::Value) -> HandlerResult {
    let counts = collect_rows(
        conn,
        "SELECT
           (SELECT COUNT(*) FROM students),
           (SELECT COUNT(*) FROM staff),
           (SELECT COUNT(*) FROM admission_applications WHERE status = 'UNDER_REVIEW'),
           (SELECT COUNT(*) FROM admission_applications),
           (SELECT COUNT(*) FROM payments WHERE status = 'SUCCESS'),
           (SELECT COALESCE(SUM(amount_minor), 0) FROM payments WHERE status = 'SUCCESS'),
           (SELECT COUNT(*) FROM sponsorship_allocations WHERE active = 1)",
        [],
        |r| {
            Ok([
                r.get::<_, i64>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, i64>(5)?,
                r.get::<_, i64>(6)?,
            ])
        },
    )?;
    let [students, staff, pending, applications, payments, revenue, sponsorships] =
        counts.first().copied().unwrap_or_default();
    Ok(json!({
        "totalStudents": students,
        "totalStaff": staff,
        "pendingApplications": pending,
        "totalApplications": applications,
        "totalPayments": payments,
        "totalRevenueMinor": revenue,
        "totalRevenue": crate::payments::format_minor(revenue),
        "activeSponsorships": sponsorships,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.progress" => Some(run(state, req, reports_progress)),
        "reports.classRanking" => Some(run(state, req, reports_class_ranking)),
        "dashboard.admin" => Some(run(state, req, dashboard_admin)),
        _ => None,
    }
}
