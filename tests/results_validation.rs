use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_smartconnectd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn smartconnectd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(value["ok"], json!(true), "{} failed: {}", method, value);
    value["result"].clone()
}

fn id_of(v: &serde_json::Value, key: &str) -> String {
    v[key].as_str().expect(key).to_string()
}

struct Setup {
    exam_id: String,
    student_id: String,
    subject_id: String,
    other_student_id: String,
    other_subject_id: String,
}

/// Two classrooms in one year; the exam belongs to the first.
fn setup(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) -> Setup {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let year = id_of(
        &request_ok(
            stdin,
            reader,
            "y",
            "academicYears.create",
            json!({ "name": "2025-26", "startDate": "2025-06-01", "endDate": "2026-03-31" }),
        ),
        "academicYearId",
    );
    let inst = id_of(
        &request_ok(
            stdin,
            reader,
            "i",
            "institutions.create",
            json!({ "name": "Govt HSS", "code": "GHSS" }),
        ),
        "institutionId",
    );

    let mut classes = Vec::new();
    for division in ["A", "B"] {
        let class = id_of(
            &request_ok(
                stdin,
                reader,
                &format!("c{}", division),
                "classrooms.create",
                json!({ "institutionId": inst, "academicYearId": year, "standard": "9", "division": division }),
            ),
            "classroomId",
        );
        let subject = id_of(
            &request_ok(
                stdin,
                reader,
                &format!("sj{}", division),
                "subjects.create",
                json!({ "classroomId": class, "name": "English", "code": "ENG", "maxMarks": 50, "passMarks": 18 }),
            ),
            "subjectId",
        );
        let student = id_of(
            &request_ok(
                stdin,
                reader,
                &format!("st{}", division),
                "students.create",
                json!({
                    "classroomId": class,
                    "admissionNumber": format!("9{}-01", division),
                    "firstName": format!("Student {}", division),
                    "dateOfBirth": "2011-02-02"
                }),
            ),
            "studentId",
        );
        classes.push((class, subject, student));
    }

    let exam_id = id_of(
        &request_ok(
            stdin,
            reader,
            "e",
            "exams.create",
            json!({ "name": "Unit test", "classroomId": classes[0].0, "academicYearId": year, "date": "2025-07-20" }),
        ),
        "examId",
    );
    Setup {
        exam_id,
        student_id: classes[0].2.clone(),
        subject_id: classes[0].1.clone(),
        other_student_id: classes[1].2.clone(),
        other_subject_id: classes[1].1.clone(),
    }
}

fn error_code(v: &serde_json::Value) -> &str {
    v["error"]["code"].as_str().unwrap_or("")
}

#[test]
fn upsert_rejects_marks_outside_the_subject_range() {
    let workspace = temp_dir("smartconnect-results-range");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let s = setup(&mut stdin, &mut reader, &workspace);

    let over = request(
        &mut stdin,
        &mut reader,
        "over",
        "results.upsert",
        json!({ "examId": s.exam_id, "studentId": s.student_id, "subjectId": s.subject_id, "marksObtained": 51 }),
    );
    assert_eq!(error_code(&over), "bad_params");
    assert_eq!(over["error"]["details"]["maxMarks"].as_f64(), Some(50.0));

    let negative = request(
        &mut stdin,
        &mut reader,
        "neg",
        "results.upsert",
        json!({ "examId": s.exam_id, "studentId": s.student_id, "subjectId": s.subject_id, "marksObtained": -1 }),
    );
    assert_eq!(error_code(&negative), "bad_params");

    let missing = request(
        &mut stdin,
        &mut reader,
        "missing",
        "results.upsert",
        json!({ "examId": s.exam_id, "studentId": s.student_id, "subjectId": s.subject_id }),
    );
    assert_eq!(error_code(&missing), "bad_params");

    // An explicit max overrides the subject default.
    let stored = request_ok(
        &mut stdin,
        &mut reader,
        "custom-max",
        "results.upsert",
        json!({
            "examId": s.exam_id,
            "studentId": s.student_id,
            "subjectId": s.subject_id,
            "marksObtained": 75,
            "maxMarks": 80
        }),
    );
    assert_eq!(stored["maxMarks"].as_f64(), Some(80.0));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "results.list",
        json!({ "examId": s.exam_id }),
    );
    let rows = listed["results"].as_array().expect("results");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["marksObtained"].as_f64(), Some(75.0));
    assert_eq!(rows[0]["subjectCode"], json!("ENG"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn upsert_requires_student_and_subject_from_the_exam_classroom() {
    let workspace = temp_dir("smartconnect-results-classroom");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let s = setup(&mut stdin, &mut reader, &workspace);

    let foreign_student = request(
        &mut stdin,
        &mut reader,
        "fs",
        "results.upsert",
        json!({ "examId": s.exam_id, "studentId": s.other_student_id, "subjectId": s.subject_id, "marksObtained": 10 }),
    );
    assert_eq!(error_code(&foreign_student), "bad_params");

    let foreign_subject = request(
        &mut stdin,
        &mut reader,
        "fj",
        "results.upsert",
        json!({ "examId": s.exam_id, "studentId": s.student_id, "subjectId": s.other_subject_id, "marksObtained": 10 }),
    );
    assert_eq!(error_code(&foreign_subject), "bad_params");

    let unknown_exam = request(
        &mut stdin,
        &mut reader,
        "ue",
        "results.upsert",
        json!({ "examId": "nope", "studentId": s.student_id, "subjectId": s.subject_id, "marksObtained": 10 }),
    );
    assert_eq!(error_code(&unknown_exam), "not_found");

    let delete_missing = request(
        &mut stdin,
        &mut reader,
        "dm",
        "results.delete",
        json!({ "examId": s.exam_id, "studentId": s.student_id, "subjectId": s.subject_id }),
    );
    assert_eq!(error_code(&delete_missing), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bulk_upsert_is_all_or_nothing() {
    let workspace = temp_dir("smartconnect-results-bulk");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let s = setup(&mut stdin, &mut reader, &workspace);

    let failed = request(
        &mut stdin,
        &mut reader,
        "bulk",
        "results.bulkUpsert",
        json!({
            "examId": s.exam_id,
            "entries": [
                { "studentId": s.student_id, "subjectId": s.subject_id, "marksObtained": 40 },
                { "studentId": s.other_student_id, "subjectId": s.subject_id, "marksObtained": 20 }
            ]
        }),
    );
    assert_eq!(error_code(&failed), "bad_params");
    let message = failed["error"]["message"].as_str().unwrap_or("");
    assert!(message.starts_with("entries[1]"), "message was {}", message);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "results.list",
        json!({ "examId": s.exam_id }),
    );
    assert_eq!(listed["results"], json!([]));

    let not_array = request(
        &mut stdin,
        &mut reader,
        "bad",
        "results.bulkUpsert",
        json!({ "examId": s.exam_id, "entries": {} }),
    );
    assert_eq!(error_code(&not_array), "bad_params");

    let ok = request_ok(
        &mut stdin,
        &mut reader,
        "bulk-ok",
        "results.bulkUpsert",
        json!({
            "examId": s.exam_id,
            "entries": [
                { "studentId": s.student_id, "subjectId": s.subject_id, "marksObtained": 40, "grade": "A" }
            ]
        }),
    );
    assert_eq!(ok["written"], json!(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
