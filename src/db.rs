use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "smartconnect.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!("failed to create workspace {}", workspace.to_string_lossy())
    })?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS institutions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            address TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            institution_id TEXT NOT NULL,
            academic_year_id TEXT NOT NULL,
            standard TEXT NOT NULL,
            division TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(institution_id) REFERENCES institutions(id),
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id),
            UNIQUE(institution_id, academic_year_id, standard, division)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            max_marks REAL NOT NULL DEFAULT 100,
            pass_marks REAL NOT NULL DEFAULT 40,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id) ON DELETE CASCADE,
            UNIQUE(classroom_id, code)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            admission_number TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL DEFAULT '',
            date_of_birth TEXT NOT NULL,
            whatsapp_number TEXT NOT NULL DEFAULT '',
            father_name TEXT NOT NULL DEFAULT '',
            mother_name TEXT NOT NULL DEFAULT '',
            address TEXT NOT NULL DEFAULT '',
            blood_group TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_classroom ON students(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id TEXT PRIMARY KEY,
            institution_id TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL,
            designation TEXT NOT NULL DEFAULT '',
            department TEXT NOT NULL DEFAULT '',
            qualification TEXT NOT NULL DEFAULT '',
            joining_date TEXT,
            mobile_number TEXT NOT NULL DEFAULT '',
            place TEXT NOT NULL DEFAULT '',
            address TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(institution_id) REFERENCES institutions(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parents(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            phone TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS parent_students(
            parent_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            linked_at TEXT NOT NULL,
            PRIMARY KEY(parent_id, student_id),
            FOREIGN KEY(parent_id) REFERENCES parents(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            marked_by TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(marked_by) REFERENCES staff(id) ON DELETE SET NULL,
            UNIQUE(student_id, date)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            academic_year_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            date TEXT NOT NULL,
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_classroom ON exams(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_results(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            marks_obtained REAL NOT NULL,
            max_marks REAL NOT NULL,
            grade TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(exam_id) REFERENCES exams(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(exam_id, student_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_results_exam ON exam_results(exam_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_results_student ON exam_results(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS programmes(
            id TEXT PRIMARY KEY,
            institution_id TEXT NOT NULL,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(institution_id) REFERENCES institutions(id) ON DELETE CASCADE,
            UNIQUE(institution_id, code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS admission_applications(
            id TEXT PRIMARY KEY,
            academic_year_id TEXT NOT NULL,
            programme_id TEXT NOT NULL,
            full_name TEXT NOT NULL,
            date_of_birth TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT NOT NULL,
            address TEXT NOT NULL,
            guardian_name TEXT NOT NULL DEFAULT '',
            guardian_phone TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'SUBMITTED',
            submitted_at TEXT NOT NULL,
            reviewed_at TEXT,
            reviewed_by TEXT,
            remarks TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id),
            FOREIGN KEY(programme_id) REFERENCES programmes(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            payer_name TEXT NOT NULL,
            student_id TEXT,
            category TEXT NOT NULL,
            amount_minor INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'INR',
            gateway_order_id TEXT NOT NULL DEFAULT '',
            gateway_payment_id TEXT NOT NULL DEFAULT '',
            gateway_signature TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'PENDING',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            verified_by TEXT,
            verified_at TEXT,
            notes TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_status ON payments(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sponsors(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            organization_name TEXT NOT NULL DEFAULT '',
            address TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sponsorship_allocations(
            id TEXT PRIMARY KEY,
            sponsor_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            start_year_id TEXT NOT NULL,
            end_year_id TEXT,
            monthly_amount_minor INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            notes TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(sponsor_id) REFERENCES sponsors(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(start_year_id) REFERENCES academic_years(id),
            FOREIGN KEY(end_year_id) REFERENCES academic_years(id),
            UNIQUE(sponsor_id, student_id, start_year_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS finance_reports(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            period_start TEXT NOT NULL,
            period_end TEXT NOT NULL,
            file_path TEXT NOT NULL,
            uploaded_by TEXT,
            uploaded_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS project_statuses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            last_updated TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meeting_minutes(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            meeting_date TEXT NOT NULL,
            file_path TEXT NOT NULL,
            created_by TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_log(
            id TEXT PRIMARY KEY,
            channel TEXT NOT NULL,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            meta_json TEXT
        )",
        [],
    )?;

    // Workspaces created before grades were tracked lack the column.
    ensure_exam_results_grade(&conn)?;

    log::info!("opened workspace database {}", db_path.to_string_lossy());
    Ok(conn)
}

fn ensure_exam_results_grade(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "exam_results", "grade")? {
        return Ok(());
    }
    log::info!("migrating exam_results: adding grade column");
    conn.execute(
        "ALTER TABLE exam_results ADD COLUMN grade TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    Ok(())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => {
            let value = serde_json::from_str(&text)
                .with_context(|| format!("setting {} is not valid JSON", key))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn open_db_is_idempotent() {
        let workspace = temp_dir("smartconnect-db-reopen");
        drop(open_db(&workspace).expect("first open"));
        let conn = open_db(&workspace).expect("second open");
        assert!(table_has_column(&conn, "exam_results", "grade").expect("pragma"));
        assert!(!table_has_column(&conn, "exam_results", "rank").expect("pragma"));
        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn grade_column_is_added_to_old_workspaces() {
        let workspace = temp_dir("smartconnect-db-migrate");
        {
            let conn = Connection::open(workspace.join(DB_FILE_NAME)).expect("open raw");
            conn.execute(
                "CREATE TABLE exam_results(
                    id TEXT PRIMARY KEY,
                    exam_id TEXT NOT NULL,
                    student_id TEXT NOT NULL,
                    subject_id TEXT NOT NULL,
                    marks_obtained REAL NOT NULL,
                    max_marks REAL NOT NULL,
                    UNIQUE(exam_id, student_id, subject_id)
                )",
                [],
            )
            .expect("create legacy table");
        }
        let conn = open_db(&workspace).expect("open with migration");
        assert!(table_has_column(&conn, "exam_results", "grade").expect("pragma"));
        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn settings_roundtrip_and_overwrite() {
        let workspace = temp_dir("smartconnect-db-settings");
        let conn = open_db(&workspace).expect("open");
        assert_eq!(settings_get_json(&conn, "payments.gateway").expect("get"), None);
        settings_set_json(&conn, "payments.gateway", &json!({ "keyId": "a" })).expect("set");
        settings_set_json(&conn, "payments.gateway", &json!({ "keyId": "b" })).expect("set");
        assert_eq!(
            settings_get_json(&conn, "payments.gateway").expect("get"),
            Some(json!({ "keyId": "b" }))
        );
        let _ = std::fs::remove_dir_all(workspace);
    }
}
