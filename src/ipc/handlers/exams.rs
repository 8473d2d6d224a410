use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    collect_rows, ensure_exists, new_id, optional_f64, optional_str, required_date, required_f64,
    required_str, run, run_list, str_or_empty, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::results;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const BULK_UPSERT_MAX_ENTRIES: usize = 5000;

fn exams_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let name = required_str(params, "name")?;
    let classroom_id = required_str(params, "classroomId")?;
    let academic_year_id = required_str(params, "academicYearId")?;
    let date = required_date(params, "date")?;
    ensure_exists(conn, "classrooms", &classroom_id, "classroom")?;
    ensure_exists(conn, "academic_years", &academic_year_id, "academic year")?;

    let id = new_id();
    conn.execute(
        "INSERT INTO exams(id, name, academic_year_id, classroom_id, date) VALUES(?, ?, ?, ?, ?)",
        (&id, &name, &academic_year_id, &classroom_id, &date),
    )
    .map_err(|e| HandlerErr::insert("exams", e))?;
    Ok(json!({ "examId": id }))
}

fn exams_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let classroom_id = optional_str(params, "classroomId");
    let exams = collect_rows(
        conn,
        "SELECT e.id, e.name, e.classroom_id, e.academic_year_id, e.date,
                (SELECT COUNT(DISTINCT er.student_id) FROM exam_results er WHERE er.exam_id = e.id)
         FROM exams e
         WHERE (?1 IS NULL OR e.classroom_id = ?1)
         ORDER BY e.date DESC, e.name",
        [&classroom_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "classroomId": r.get::<_, String>(2)?,
                "academicYearId": r.get::<_, String>(3)?,
                "date": r.get::<_, String>(4)?,
                "studentsWithResults": r.get::<_, i64>(5)?,
            }))
        },
    )?;
    Ok(json!({ "exams": exams }))
}

struct ResultEntry {
    student_id: String,
    subject_id: String,
    marks_obtained: f64,
    max_marks: Option<f64>,
    grade: String,
}

fn parse_entry(params: &serde_json::Value) -> Result<ResultEntry, HandlerErr> {
    Ok(ResultEntry {
        student_id: required_str(params, "studentId")?,
        subject_id: required_str(params, "subjectId")?,
        marks_obtained: required_f64(params, "marksObtained")?,
        max_marks: optional_f64(params, "maxMarks")?,
        grade: str_or_empty(params, "grade"),
    })
}

fn exam_classroom(conn: &Connection, exam_id: &str) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT classroom_id FROM exams WHERE id = ?",
        [exam_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| HandlerErr::not_found("exam").with_details(json!({ "examId": exam_id })))
}

/// Validates one entry against the exam's classroom and writes it.
/// Returns the stored max marks.
fn upsert_entry(
    conn: &Connection,
    exam_id: &str,
    classroom_id: &str,
    entry: &ResultEntry,
) -> Result<f64, HandlerErr> {
    let student_classroom: Option<String> = conn
        .query_row(
            "SELECT classroom_id FROM students WHERE id = ?",
            [&entry.student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    match student_classroom {
        None => {
            return Err(HandlerErr::not_found("student")
                .with_details(json!({ "studentId": entry.student_id })))
        }
        Some(c) if c != classroom_id => {
            return Err(
                HandlerErr::bad_params("student is not in the exam's classroom")
                    .with_details(json!({ "studentId": entry.student_id })),
            )
        }
        Some(_) => {}
    }

    let subject: Option<(String, f64)> = conn
        .query_row(
            "SELECT classroom_id, max_marks FROM subjects WHERE id = ?",
            [&entry.subject_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let default_max = match subject {
        None => {
            return Err(HandlerErr::not_found("subject")
                .with_details(json!({ "subjectId": entry.subject_id })))
        }
        Some((c, _)) if c != classroom_id => {
            return Err(
                HandlerErr::bad_params("subject does not belong to the exam's classroom")
                    .with_details(json!({ "subjectId": entry.subject_id })),
            )
        }
        Some((_, max)) => max,
    };

    let max_marks = entry.max_marks.unwrap_or(default_max);
    if entry.marks_obtained < 0.0 || max_marks < 0.0 {
        return Err(HandlerErr::bad_params("negative marks are not allowed")
            .with_details(json!({ "marksObtained": entry.marks_obtained, "maxMarks": max_marks })));
    }
    if entry.marks_obtained > max_marks {
        return Err(HandlerErr::bad_params("marksObtained must not exceed maxMarks")
            .with_details(json!({
                "studentId": entry.student_id,
                "subjectId": entry.subject_id,
                "marksObtained": entry.marks_obtained,
                "maxMarks": max_marks,
            })));
    }

    conn.execute(
        "INSERT INTO exam_results(id, exam_id, student_id, subject_id, marks_obtained, max_marks, grade)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(exam_id, student_id, subject_id) DO UPDATE SET
           marks_obtained = excluded.marks_obtained,
           max_marks = excluded.max_marks,
           grade = excluded.grade",
        (
            new_id(),
            exam_id,
            &entry.student_id,
            &entry.subject_id,
            entry.marks_obtained,
            max_marks,
            &entry.grade,
        ),
    )
    .map_err(|e| HandlerErr::insert("exam_results", e))?;
    Ok(max_marks)
}

fn results_upsert(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let exam_id = required_str(params, "examId")?;
    let entry = parse_entry(params)?;
    let classroom_id = exam_classroom(conn, &exam_id)?;
    let max_marks = upsert_entry(conn, &exam_id, &classroom_id, &entry)?;
    Ok(json!({
        "examId": exam_id,
        "studentId": entry.student_id,
        "subjectId": entry.subject_id,
        "marksObtained": entry.marks_obtained,
        "maxMarks": max_marks,
    }))
}

fn results_bulk_upsert(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let exam_id = required_str(params, "examId")?;
    let Some(raw_entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("entries must be an array"));
    };
    if raw_entries.len() > BULK_UPSERT_MAX_ENTRIES {
        return Err(HandlerErr::bad_params("too many entries").with_details(json!({
            "count": raw_entries.len(),
            "max": BULK_UPSERT_MAX_ENTRIES,
        })));
    }
    let entries = raw_entries
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            parse_entry(raw).map_err(|e| {
                let msg = format!("entries[{}]: {}", i, e.message);
                HandlerErr::new(e.code, msg)
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let classroom_id = exam_classroom(conn, &exam_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (i, entry) in entries.iter().enumerate() {
        if let Err(e) = upsert_entry(&tx, &exam_id, &classroom_id, entry) {
            let _ = tx.rollback();
            let details = e.details.unwrap_or_else(|| json!({}));
            return Err(HandlerErr::new(e.code, format!("entries[{}]: {}", i, e.message))
                .with_details(details));
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    log::info!("stored {} results for exam {}", entries.len(), exam_id);
    Ok(json!({ "examId": exam_id, "written": entries.len() }))
}

fn results_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let exam_id = required_str(params, "examId")?;
    let student_id = optional_str(params, "studentId");
    let rows = results::load_exam_rows(conn, &exam_id, student_id.as_deref())?;
    Ok(json!({ "results": rows }))
}

fn results_delete(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let exam_id = required_str(params, "examId")?;
    let student_id = required_str(params, "studentId")?;
    let subject_id = required_str(params, "subjectId")?;
    let n = conn
        .execute(
            "DELETE FROM exam_results WHERE exam_id = ? AND student_id = ? AND subject_id = ?",
            (&exam_id, &student_id, &subject_id),
        )
        .map_err(|e| HandlerErr::write("db_delete_failed", "exam_results", e))?;
    if n == 0 {
        return Err(HandlerErr::not_found("result"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.create" => Some(run(state, req, exams_create)),
        "exams.list" => Some(run_list(state, req, "exams", exams_list)),
        "results.upsert" => Some(run(state, req, results_upsert)),
        "results.bulkUpsert" => Some(run(state, req, results_bulk_upsert)),
        "results.list" => Some(run(state, req, results_list)),
        "results.delete" => Some(run(state, req, results_delete)),
        _ => None,
    }
}
