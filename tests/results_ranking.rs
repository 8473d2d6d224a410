use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
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

struct Fixture {
    year_id: String,
    class_id: String,
    math_id: String,
    science_id: String,
    students: Vec<String>,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &Path) -> Fixture {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let year = request_ok(
        stdin,
        reader,
        "y",
        "academicYears.create",
        json!({ "name": "2025-26", "startDate": "2025-06-01", "endDate": "2026-03-31" }),
    );
    let inst = request_ok(
        stdin,
        reader,
        "i",
        "institutions.create",
        json!({ "name": "St. Mary's", "code": "SMHS" }),
    );
    let year_id = id_of(&year, "academicYearId");
    let class = request_ok(
        stdin,
        reader,
        "c",
        "classrooms.create",
        json!({
            "institutionId": id_of(&inst, "institutionId"),
            "academicYearId": year_id,
            "standard": "10",
            "division": "B"
        }),
    );
    let class_id = id_of(&class, "classroomId");
    let math = request_ok(
        stdin,
        reader,
        "s1",
        "subjects.create",
        json!({ "classroomId": class_id, "name": "Mathematics", "code": "MATH" }),
    );
    let science = request_ok(
        stdin,
        reader,
        "s2",
        "subjects.create",
        json!({ "classroomId": class_id, "name": "Science", "code": "SCI" }),
    );

    let mut students = Vec::new();
    for (i, (first, adm)) in [("Anu", "A1"), ("Bilal", "A2"), ("Chitra", "A3"), ("Dev", "A4")]
        .iter()
        .enumerate()
    {
        let s = request_ok(
            stdin,
            reader,
            &format!("st{}", i),
            "students.create",
            json!({
                "classroomId": class_id,
                "admissionNumber": adm,
                "firstName": first,
                "dateOfBirth": "2010-05-05"
            }),
        );
        students.push(id_of(&s, "studentId"));
    }

    Fixture {
        year_id,
        class_id,
        math_id: id_of(&math, "subjectId"),
        science_id: id_of(&science, "subjectId"),
        students,
    }
}

fn create_exam(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    fx: &Fixture,
    name: &str,
    date: &str,
) -> String {
    let exam = request_ok(
        stdin,
        reader,
        name,
        "exams.create",
        json!({ "name": name, "classroomId": fx.class_id, "academicYearId": fx.year_id, "date": date }),
    );
    id_of(&exam, "examId")
}

#[test]
fn class_ranking_collapses_ties_and_skips_students_without_results() {
    let workspace = temp_dir("smartconnect-ranking");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);
    let exam_id = create_exam(&mut stdin, &mut reader, &fx, "Term 1", "2025-09-15");

    let entry = |student: &String, subject: &String, marks: f64| {
        json!({ "studentId": student, "subjectId": subject, "marksObtained": marks })
    };
    let (anu, bilal, chitra) = (&fx.students[0], &fx.students[1], &fx.students[2]);
    let stored = request_ok(
        &mut stdin,
        &mut reader,
        "bulk",
        "results.bulkUpsert",
        json!({
            "examId": exam_id,
            "entries": [
                entry(anu, &fx.math_id, 80.0),
                entry(anu, &fx.science_id, 70.0),
                entry(bilal, &fx.math_id, 90.0),
                entry(bilal, &fx.science_id, 60.0),
                entry(chitra, &fx.math_id, 50.0),
                entry(chitra, &fx.science_id, 35.0),
            ]
        }),
    );
    assert_eq!(stored["written"], json!(6));

    let ranking = request_ok(
        &mut stdin,
        &mut reader,
        "rank",
        "reports.classRanking",
        json!({ "examId": exam_id }),
    );
    let rows = ranking["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 3, "student without results is not ranked");

    let ranks: Vec<(String, u64, f64)> = rows
        .iter()
        .map(|r| {
            (
                r["displayName"].as_str().unwrap_or("").to_string(),
                r["rank"].as_u64().unwrap_or(0),
                r["totalMarks"].as_f64().unwrap_or(-1.0),
            )
        })
        .collect();
    assert_eq!(
        ranks,
        vec![
            ("Anu".to_string(), 1, 150.0),
            ("Bilal".to_string(), 1, 150.0),
            ("Chitra".to_string(), 3, 85.0),
        ]
    );
    assert_eq!(rows[0]["maxTotal"].as_f64(), Some(200.0));
    assert_eq!(rows[0]["percentage"].as_f64(), Some(75.0));
    assert_eq!(rows[2]["percentage"].as_f64(), Some(42.5));
    assert_eq!(rows[2]["subjectCount"], json!(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn progress_report_groups_exams_with_rank_and_pass_flags() {
    let workspace = temp_dir("smartconnect-progress");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);
    let term1 = create_exam(&mut stdin, &mut reader, &fx, "Term 1", "2025-09-15");
    let term2 = create_exam(&mut stdin, &mut reader, &fx, "Term 2", "2025-12-10");
    let (anu, bilal) = (&fx.students[0], &fx.students[1]);

    for (i, (exam, student, subject, marks)) in [
        (&term2, anu, &fx.math_id, 95.0),
        (&term2, bilal, &fx.math_id, 99.0),
        (&term1, anu, &fx.math_id, 60.0),
        (&term1, anu, &fx.science_id, 30.0),
        (&term1, bilal, &fx.math_id, 40.0),
    ]
    .iter()
    .enumerate()
    {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("r{}", i),
            "results.upsert",
            json!({ "examId": exam, "studentId": student, "subjectId": subject, "marksObtained": marks }),
        );
    }

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "progress",
        "reports.progress",
        json!({ "studentId": anu }),
    );
    assert_eq!(report["displayName"], json!("Anu"));
    let exams = report["exams"].as_array().expect("exams");
    assert_eq!(exams.len(), 2);

    // Oldest exam first.
    assert_eq!(exams[0]["examName"], json!("Term 1"));
    assert_eq!(exams[0]["totalMarks"].as_f64(), Some(90.0));
    assert_eq!(exams[0]["maxTotal"].as_f64(), Some(200.0));
    assert_eq!(exams[0]["percentage"].as_f64(), Some(45.0));
    assert_eq!(exams[0]["rank"], json!(1));
    assert_eq!(exams[0]["rankedCount"], json!(2));
    let lines = exams[0]["results"].as_array().expect("results");
    let passed: Vec<(String, bool)> = lines
        .iter()
        .map(|l| {
            (
                l["subjectCode"].as_str().unwrap_or("").to_string(),
                l["passed"].as_bool().unwrap_or(true),
            )
        })
        .collect();
    assert_eq!(
        passed,
        vec![("MATH".to_string(), true), ("SCI".to_string(), false)]
    );

    assert_eq!(exams[1]["examName"], json!("Term 2"));
    assert_eq!(exams[1]["rank"], json!(2));
    assert_eq!(exams[1]["percentage"].as_f64(), Some(95.0));

    // A re-upsert replaces the mark instead of adding a row.
    request_ok(
        &mut stdin,
        &mut reader,
        "fix",
        "results.upsert",
        json!({ "examId": term2, "studentId": anu, "subjectId": fx.math_id, "marksObtained": 100 }),
    );
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "progress2",
        "reports.progress",
        json!({ "studentId": anu }),
    );
    assert_eq!(report["exams"][1]["results"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(report["exams"][1]["rank"], json!(1));

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "progress3",
        "reports.progress",
        json!({ "studentId": fx.students[3] }),
    );
    assert_eq!(empty["exams"], json!([]));

    let missing = request(
        &mut stdin,
        &mut reader,
        "progress4",
        "reports.progress",
        json!({ "studentId": "nope" }),
    );
    assert_eq!(missing["error"]["code"], json!("not_found"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn fractional_marks_tie_and_short_papers_scale_the_pass_mark() {
    let workspace = temp_dir("smartconnect-fractional");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed(&mut stdin, &mut reader, &workspace);
    let exam_id = create_exam(&mut stdin, &mut reader, &fx, "Unit Test", "2025-08-01");
    let (anu, bilal) = (&fx.students[0], &fx.students[1]);

    request_ok(
        &mut stdin,
        &mut reader,
        "bulk",
        "results.bulkUpsert",
        json!({
            "examId": exam_id,
            "entries": [
                { "studentId": anu, "subjectId": fx.math_id, "marksObtained": 10.1 },
                { "studentId": anu, "subjectId": fx.science_id, "marksObtained": 20.2 },
                { "studentId": bilal, "subjectId": fx.math_id, "marksObtained": 30.3 },
                { "studentId": bilal, "subjectId": fx.science_id, "marksObtained": 0 },
            ]
        }),
    );

    let ranking = request_ok(
        &mut stdin,
        &mut reader,
        "rank",
        "reports.classRanking",
        json!({ "examId": exam_id }),
    );
    let rows = ranking["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    for r in rows {
        assert_eq!(r["rank"], json!(1), "{}", r);
        assert_eq!(r["totalMarks"].as_f64(), Some(30.3), "{}", r);
    }

    // Subject pass mark 40/100 becomes 10/25 on a 25-mark paper.
    let quiz = create_exam(&mut stdin, &mut reader, &fx, "Quiz", "2025-08-20");
    request_ok(
        &mut stdin,
        &mut reader,
        "quiz",
        "results.upsert",
        json!({
            "examId": quiz,
            "studentId": anu,
            "subjectId": fx.math_id,
            "marksObtained": 12,
            "maxMarks": 25
        }),
    );
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "progress",
        "reports.progress",
        json!({ "studentId": anu }),
    );
    let quiz_line = &report["exams"][1]["results"][0];
    assert_eq!(report["exams"][1]["examName"], json!("Quiz"));
    assert_eq!(quiz_line["passMarks"].as_f64(), Some(10.0));
    assert_eq!(quiz_line["passed"], json!(true));
    assert_eq!(report["exams"][1]["percentage"].as_f64(), Some(48.0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
