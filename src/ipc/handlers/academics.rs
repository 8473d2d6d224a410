use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    collect_rows, ensure_exists, new_id, optional_date, optional_f64, optional_str,
    required_date, required_str, run, run_list, str_or_empty, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::results::display_name;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const BLOOD_GROUPS: [&str; 8] = ["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"];

pub fn classroom_label(standard: &str, division: &str, year: &str) -> String {
    if division.is_empty() {
        format!("{} ({})", standard, year)
    } else {
        format!("{} - {} ({})", standard, division, year)
    }
}

fn classrooms_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let institution_id = optional_str(params, "institutionId");
    let classrooms = collect_rows(
        conn,
        "SELECT
           c.id, c.institution_id, c.academic_year_id, c.standard, c.division, ay.name,
           (SELECT COUNT(*) FROM students s WHERE s.classroom_id = c.id) AS student_count
         FROM classrooms c
         JOIN academic_years ay ON ay.id = c.academic_year_id
         WHERE (?1 IS NULL OR c.institution_id = ?1)
         ORDER BY ay.start_date DESC, c.standard, c.division",
        [&institution_id],
        |r| {
            let standard: String = r.get(3)?;
            let division: String = r.get(4)?;
            let year: String = r.get(5)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "institutionId": r.get::<_, String>(1)?,
                "academicYearId": r.get::<_, String>(2)?,
                "label": classroom_label(&standard, &division, &year),
                "standard": standard,
                "division": division,
                "academicYear": year,
                "studentCount": r.get::<_, i64>(6)?,
            }))
        },
    )?;
    Ok(json!({ "classrooms": classrooms }))
}

fn classrooms_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let institution_id = required_str(params, "institutionId")?;
    let academic_year_id = required_str(params, "academicYearId")?;
    let standard = required_str(params, "standard")?;
    let division = str_or_empty(params, "division");
    ensure_exists(conn, "institutions", &institution_id, "institution")?;
    ensure_exists(conn, "academic_years", &academic_year_id, "academic year")?;

    let id = new_id();
    conn.execute(
        "INSERT INTO classrooms(id, institution_id, academic_year_id, standard, division)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &institution_id, &academic_year_id, &standard, &division),
    )
    .map_err(|e| HandlerErr::insert("classrooms", e))?;
    Ok(json!({ "classroomId": id }))
}

fn student_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let first: String = r.get(3)?;
    let last: String = r.get(4)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "classroomId": r.get::<_, String>(1)?,
        "admissionNumber": r.get::<_, String>(2)?,
        "displayName": display_name(&first, &last),
        "firstName": first,
        "lastName": last,
        "dateOfBirth": r.get::<_, String>(5)?,
        "whatsappNumber": r.get::<_, String>(6)?,
        "fatherName": r.get::<_, String>(7)?,
        "motherName": r.get::<_, String>(8)?,
        "address": r.get::<_, String>(9)?,
        "bloodGroup": r.get::<_, String>(10)?,
    }))
}

const STUDENT_SELECT: &str = "SELECT
       s.id, s.classroom_id, s.admission_number, s.first_name, s.last_name, s.date_of_birth,
       s.whatsapp_number, s.father_name, s.mother_name, s.address, s.blood_group
     FROM students s";

fn classrooms_get(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let id = required_str(params, "classroomId")?;
    let row: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT c.institution_id, c.standard, c.division, ay.name
             FROM classrooms c
             JOIN academic_years ay ON ay.id = c.academic_year_id
             WHERE c.id = ?",
            [&id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((institution_id, standard, division, year)) = row else {
        return Err(HandlerErr::not_found("classroom"));
    };

    let students = collect_rows(
        conn,
        &format!(
            "{} WHERE s.classroom_id = ? ORDER BY s.first_name, s.last_name",
            STUDENT_SELECT
        ),
        [&id],
        student_json,
    )?;
    Ok(json!({
        "classroom": {
            "id": id,
            "institutionId": institution_id,
            "label": classroom_label(&standard, &division, &year),
            "standard": standard,
            "division": division,
            "academicYear": year,
        },
        "students": students,
    }))
}

fn subjects_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let classroom_id = required_str(params, "classroomId")?;
    let subjects = collect_rows(
        conn,
        "SELECT id, name, code, max_marks, pass_marks
         FROM subjects
         WHERE classroom_id = ?
         ORDER BY code",
        [&classroom_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "maxMarks": r.get::<_, f64>(3)?,
                "passMarks": r.get::<_, f64>(4)?,
            }))
        },
    )?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let classroom_id = required_str(params, "classroomId")?;
    let name = required_str(params, "name")?;
    let code = required_str(params, "code")?;
    let max_marks = optional_f64(params, "maxMarks")?.unwrap_or(100.0);
    let pass_marks = optional_f64(params, "passMarks")?.unwrap_or(40.0);
    if max_marks < 0.0 || pass_marks < 0.0 {
        return Err(HandlerErr::bad_params("marks must be >= 0"));
    }
    if pass_marks > max_marks {
        return Err(HandlerErr::bad_params("passMarks must not exceed maxMarks")
            .with_details(json!({ "maxMarks": max_marks, "passMarks": pass_marks })));
    }
    ensure_exists(conn, "classrooms", &classroom_id, "classroom")?;

    let id = new_id();
    conn.execute(
        "INSERT INTO subjects(id, classroom_id, name, code, max_marks, pass_marks)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &classroom_id, &name, &code, max_marks, pass_marks),
    )
    .map_err(|e| HandlerErr::insert("subjects", e))?;
    Ok(json!({ "subjectId": id }))
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let classroom_id = optional_str(params, "classroomId");
    let students = collect_rows(
        conn,
        &format!(
            "{}
             JOIN classrooms c ON c.id = s.classroom_id
             WHERE (?1 IS NULL OR s.classroom_id = ?1)
             ORDER BY c.standard, s.first_name, s.last_name",
            STUDENT_SELECT
        ),
        [&classroom_id],
        student_json,
    )?;
    Ok(json!({ "students": students }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let id = required_str(params, "studentId")?;
    let student = conn
        .query_row(
            &format!("{} WHERE s.id = ?", STUDENT_SELECT),
            [&id],
            student_json,
        )
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("student"))?;
    let parents = collect_rows(
        conn,
        "SELECT p.id, p.full_name, p.phone, p.email
         FROM parents p
         JOIN parent_students ps ON ps.parent_id = p.id
         WHERE ps.student_id = ?
         ORDER BY ps.linked_at, p.full_name",
        [&id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
                "phone": r.get::<_, String>(2)?,
                "email": r.get::<_, String>(3)?,
            }))
        },
    )?;
    Ok(json!({ "student": student, "parents": parents }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let classroom_id = required_str(params, "classroomId")?;
    let admission_number = required_str(params, "admissionNumber")?;
    let first_name = required_str(params, "firstName")?;
    let date_of_birth = required_date(params, "dateOfBirth")?;
    let blood_group = match optional_str(params, "bloodGroup") {
        Some(bg) => {
            let up = bg.to_ascii_uppercase();
            if !BLOOD_GROUPS.contains(&up.as_str()) {
                return Err(HandlerErr::bad_params(format!(
                    "bloodGroup must be one of: {}",
                    BLOOD_GROUPS.join(", ")
                )));
            }
            up
        }
        None => String::new(),
    };
    ensure_exists(conn, "classrooms", &classroom_id, "classroom")?;

    let id = new_id();
    conn.execute(
        "INSERT INTO students(
            id, classroom_id, admission_number, first_name, last_name, date_of_birth,
            whatsapp_number, father_name, mother_name, address, blood_group
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &classroom_id,
            &admission_number,
            &first_name,
            str_or_empty(params, "lastName"),
            &date_of_birth,
            str_or_empty(params, "whatsappNumber"),
            str_or_empty(params, "fatherName"),
            str_or_empty(params, "motherName"),
            str_or_empty(params, "address"),
            &blood_group,
        ),
    )
    .map_err(|e| HandlerErr::insert("students", e))?;
    Ok(json!({ "studentId": id }))
}

fn staff_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let institution_id = optional_str(params, "institutionId");
    let staff = collect_rows(
        conn,
        "SELECT id, institution_id, first_name, last_name, email, designation, department,
                qualification, joining_date, mobile_number, place
         FROM staff
         WHERE (?1 IS NULL OR institution_id = ?1)
         ORDER BY first_name, last_name",
        [&institution_id],
        |r| {
            let first: String = r.get(2)?;
            let last: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "institutionId": r.get::<_, String>(1)?,
                "displayName": display_name(&first, &last),
                "email": r.get::<_, String>(4)?,
                "designation": r.get::<_, String>(5)?,
                "department": r.get::<_, String>(6)?,
                "qualification": r.get::<_, String>(7)?,
                "joiningDate": r.get::<_, Option<String>>(8)?,
                "mobileNumber": r.get::<_, String>(9)?,
                "place": r.get::<_, String>(10)?,
            }))
        },
    )?;
    Ok(json!({ "staff": staff }))
}

fn staff_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let institution_id = required_str(params, "institutionId")?;
    let first_name = required_str(params, "firstName")?;
    let email = required_str(params, "email")?;
    let joining_date = optional_date(params, "joiningDate")?;
    ensure_exists(conn, "institutions", &institution_id, "institution")?;

    let id = new_id();
    conn.execute(
        "INSERT INTO staff(
            id, institution_id, first_name, last_name, email, designation, department,
            qualification, joining_date, mobile_number, place, address
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &institution_id,
            &first_name,
            str_or_empty(params, "lastName"),
            &email,
            str_or_empty(params, "designation"),
            str_or_empty(params, "department"),
            str_or_empty(params, "qualification"),
            &joining_date,
            str_or_empty(params, "mobileNumber"),
            str_or_empty(params, "place"),
            str_or_empty(params, "address"),
        ),
    )
    .map_err(|e| HandlerErr::insert("staff", e))?;
    Ok(json!({ "staffId": id }))
}

fn parents_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let full_name = required_str(params, "fullName")?;
    let id = new_id();
    conn.execute(
        "INSERT INTO parents(id, full_name, phone, email) VALUES(?, ?, ?, ?)",
        (
            &id,
            &full_name,
            str_or_empty(params, "phone"),
            str_or_empty(params, "email"),
        ),
    )
    .map_err(|e| HandlerErr::insert("parents", e))?;
    Ok(json!({ "parentId": id }))
}

fn parents_link_student(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let parent_id = required_str(params, "parentId")?;
    let student_id = required_str(params, "studentId")?;
    ensure_exists(conn, "parents", &parent_id, "parent")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    conn.execute(
        "INSERT INTO parent_students(parent_id, student_id, linked_at) VALUES(?, ?, ?)
         ON CONFLICT(parent_id, student_id) DO NOTHING",
        (&parent_id, &student_id, db::now_rfc3339()),
    )
    .map_err(|e| HandlerErr::insert("parent_students", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classrooms.list" => Some(run_list(state, req, "classrooms", classrooms_list)),
        "classrooms.create" => Some(run(state, req, classrooms_create)),
        "classrooms.get" => Some(run(state, req, classrooms_get)),
        "subjects.list" => Some(run_list(state, req, "subjects", subjects_list)),
        "subjects.create" => Some(run(state, req, subjects_create)),
        "students.list" => Some(run_list(state, req, "students", students_list)),
        "students.get" => Some(run(state, req, students_get)),
        "students.create" => Some(run(state, req, students_create)),
        "staff.list" => Some(run_list(state, req, "staff", staff_list)),
        "staff.create" => Some(run(state, req, staff_create)),
        "parents.create" => Some(run(state, req, parents_create)),
        "parents.linkStudent" => Some(run(state, req, parents_link_student)),
        _ => None,
    }
}
