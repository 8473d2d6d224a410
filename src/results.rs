use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

/// One subject-level score for a student within an exam.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    pub exam_id: String,
    pub exam_name: String,
    pub exam_date: String,
    pub student_id: String,
    pub subject_id: String,
    pub subject_code: String,
    pub subject_name: String,
    pub marks_obtained: f64,
    pub max_marks: f64,
    /// Subject pass mark scaled to this paper's `max_marks`.
    pub pass_marks: f64,
    pub grade: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamAggregate {
    pub exam_id: String,
    pub exam_name: String,
    pub exam_date: String,
    pub results: Vec<ResultRow>,
    pub total_marks: f64,
    pub max_total: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedTotal {
    pub student_id: String,
    pub total_marks: f64,
    pub max_total: f64,
    pub percentage: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultsError {
    pub code: &'static str,
    pub message: String,
}

impl ResultsError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

/// 0 when `max_total` is 0.
pub fn percentage(total: f64, max_total: f64) -> f64 {
    if max_total > 0.0 {
        100.0 * total / max_total
    } else {
        0.0
    }
}

pub fn round_2dp(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Marks carry two decimal places; sums are kept in hundredths so equal
/// totals compare equal.
fn to_hundredths(marks: f64) -> i64 {
    (marks * 100.0).round() as i64
}

fn from_hundredths(h: i64) -> f64 {
    h as f64 / 100.0
}

/// Groups per-subject rows by exam, in first-seen exam order.
pub fn aggregate_by_exam<I>(rows: I) -> Vec<ExamAggregate>
where
    I: IntoIterator<Item = ResultRow>,
{
    let mut out: Vec<ExamAggregate> = Vec::new();
    let mut sums: Vec<(i64, i64)> = Vec::new();
    let mut slot_by_exam: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let slot = match slot_by_exam.get(&row.exam_id) {
            Some(&i) => i,
            None => {
                out.push(ExamAggregate {
                    exam_id: row.exam_id.clone(),
                    exam_name: row.exam_name.clone(),
                    exam_date: row.exam_date.clone(),
                    results: Vec::new(),
                    total_marks: 0.0,
                    max_total: 0.0,
                    percentage: 0.0,
                });
                sums.push((0, 0));
                slot_by_exam.insert(row.exam_id.clone(), out.len() - 1);
                out.len() - 1
            }
        };
        sums[slot].0 += to_hundredths(row.marks_obtained);
        sums[slot].1 += to_hundredths(row.max_marks);
        out[slot].results.push(row);
    }

    for (agg, (total, max_total)) in out.iter_mut().zip(sums) {
        agg.total_marks = from_hundredths(total);
        agg.max_total = from_hundredths(max_total);
        agg.percentage = percentage(agg.total_marks, agg.max_total);
    }
    out
}

/// 1-based position of the first entry equal to `total` in a descending list.
/// Equal totals share the rank of the earliest one.
pub fn rank_of<T: PartialOrd>(total: T, sorted_desc: &[T]) -> usize {
    sorted_desc.partition_point(|t| *t > total) + 1
}

/// Sums marks per student for a single exam and assigns ranks.
/// Output is ordered by rank; equal ranks keep input order.
pub fn rank_by_total<I>(rows: I) -> Vec<RankedTotal>
where
    I: IntoIterator<Item = ResultRow>,
{
    let mut order: Vec<String> = Vec::new();
    let mut sums: HashMap<String, (i64, i64)> = HashMap::new();
    for row in rows {
        let entry = sums.entry(row.student_id.clone()).or_insert_with(|| {
            order.push(row.student_id.clone());
            (0, 0)
        });
        entry.0 += to_hundredths(row.marks_obtained);
        entry.1 += to_hundredths(row.max_marks);
    }

    let mut sorted: Vec<i64> = sums.values().map(|(t, _)| *t).collect();
    sorted.sort_unstable_by(|a, b| b.cmp(a));

    let mut ranked: Vec<RankedTotal> = order
        .into_iter()
        .map(|student_id| {
            let (total, max_total) = sums.get(&student_id).copied().unwrap_or((0, 0));
            let (total_marks, max_total) = (from_hundredths(total), from_hundredths(max_total));
            RankedTotal {
                rank: rank_of(total, &sorted),
                percentage: percentage(total_marks, max_total),
                student_id,
                total_marks,
                max_total,
            }
        })
        .collect();
    ranked.sort_by_key(|r| r.rank);
    ranked
}

const RESULT_ROW_SELECT: &str = "SELECT
       er.exam_id, e.name, e.date, er.student_id,
       er.subject_id, sj.code, sj.name,
       er.marks_obtained, er.max_marks,
       CASE WHEN sj.max_marks > 0 THEN sj.pass_marks * er.max_marks / sj.max_marks
            ELSE sj.pass_marks END,
       er.grade
     FROM exam_results er
     JOIN exams e ON e.id = er.exam_id
     JOIN subjects sj ON sj.id = er.subject_id";

fn map_result_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ResultRow> {
    Ok(ResultRow {
        exam_id: r.get(0)?,
        exam_name: r.get(1)?,
        exam_date: r.get(2)?,
        student_id: r.get(3)?,
        subject_id: r.get(4)?,
        subject_code: r.get(5)?,
        subject_name: r.get(6)?,
        marks_obtained: r.get(7)?,
        max_marks: r.get(8)?,
        pass_marks: round_2dp(r.get(9)?),
        grade: r.get(10)?,
    })
}

pub fn load_student_rows(conn: &Connection, student_id: &str) -> Result<Vec<ResultRow>, ResultsError> {
    let sql = format!(
        "{} WHERE er.student_id = ? ORDER BY e.date, e.name, e.id, sj.code",
        RESULT_ROW_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(ResultsError::query)?;
    stmt.query_map([student_id], map_result_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(ResultsError::query)
}

pub fn load_exam_rows(
    conn: &Connection,
    exam_id: &str,
    student_id: Option<&str>,
) -> Result<Vec<ResultRow>, ResultsError> {
    let rows = match student_id {
        Some(sid) => {
            let sql = format!(
                "{} WHERE er.exam_id = ? AND er.student_id = ? ORDER BY sj.code",
                RESULT_ROW_SELECT
            );
            let mut stmt = conn.prepare(&sql).map_err(ResultsError::query)?;
            let rows = stmt
                .query_map((exam_id, sid), map_result_row)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>());
            rows
        }
        None => {
            let sql = format!(
                "{} WHERE er.exam_id = ? ORDER BY er.student_id, sj.code",
                RESULT_ROW_SELECT
            );
            let mut stmt = conn.prepare(&sql).map_err(ResultsError::query)?;
            let rows = stmt
                .query_map([exam_id], map_result_row)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>());
            rows
        }
    };
    rows.map_err(ResultsError::query)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectLine {
    #[serde(flatten)]
    pub row: ResultRow,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressExam {
    pub exam_id: String,
    pub exam_name: String,
    pub exam_date: String,
    pub results: Vec<SubjectLine>,
    pub total_marks: f64,
    pub max_total: f64,
    pub percentage: f64,
    pub rank: Option<usize>,
    pub ranked_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub student_id: String,
    pub display_name: String,
    pub admission_number: String,
    pub classroom_id: String,
    pub exams: Vec<ProgressExam>,
}

pub fn compute_progress_report(
    conn: &Connection,
    student_id: &str,
) -> Result<ProgressReport, ResultsError> {
    let student: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT first_name, last_name, admission_number, classroom_id
             FROM students WHERE id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(ResultsError::query)?;
    let Some((first, last, admission_number, classroom_id)) = student else {
        return Err(ResultsError::new("not_found", "student not found"));
    };

    let rows = load_student_rows(conn, student_id)?;
    let mut exams = Vec::new();
    for agg in aggregate_by_exam(rows) {
        let ranking = rank_by_total(load_exam_rows(conn, &agg.exam_id, None)?);
        let rank = ranking
            .iter()
            .find(|r| r.student_id == student_id)
            .map(|r| r.rank);
        exams.push(ProgressExam {
            results: agg
                .results
                .into_iter()
                .map(|row| SubjectLine {
                    passed: row.marks_obtained >= row.pass_marks,
                    row,
                })
                .collect(),
            exam_id: agg.exam_id,
            exam_name: agg.exam_name,
            exam_date: agg.exam_date,
            total_marks: agg.total_marks,
            max_total: agg.max_total,
            percentage: round_2dp(agg.percentage),
            rank,
            ranked_count: ranking.len(),
        });
    }

    Ok(ProgressReport {
        student_id: student_id.to_string(),
        display_name: display_name(&first, &last),
        admission_number,
        classroom_id,
        exams,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingRow {
    pub student_id: String,
    pub display_name: String,
    pub admission_number: String,
    pub subject_count: usize,
    pub total_marks: f64,
    pub max_total: f64,
    pub percentage: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRanking {
    pub exam_id: String,
    pub exam_name: String,
    pub classroom_id: String,
    pub rows: Vec<RankingRow>,
}

pub fn compute_class_ranking(conn: &Connection, exam_id: &str) -> Result<ClassRanking, ResultsError> {
    let exam: Option<(String, String)> = conn
        .query_row(
            "SELECT name, classroom_id FROM exams WHERE id = ?",
            [exam_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(ResultsError::query)?;
    let Some((exam_name, classroom_id)) = exam else {
        return Err(ResultsError::new("not_found", "exam not found"));
    };

    let rows = load_exam_rows(conn, exam_id, None)?;
    let mut subject_counts: HashMap<String, usize> = HashMap::new();
    for r in &rows {
        *subject_counts.entry(r.student_id.clone()).or_default() += 1;
    }

    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.first_name, s.last_name, s.admission_number
             FROM students s
             WHERE s.id IN (SELECT DISTINCT student_id FROM exam_results WHERE exam_id = ?)",
        )
        .map_err(ResultsError::query)?;
    let names: HashMap<String, (String, String)> = stmt
        .query_map([exam_id], |r| {
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            Ok((r.get::<_, String>(0)?, (display_name(&first, &last), r.get(3)?)))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(ResultsError::query)?;

    let mut out: Vec<RankingRow> = rank_by_total(rows)
        .into_iter()
        .map(|r| {
            let (display_name, admission_number) =
                names.get(&r.student_id).cloned().unwrap_or_default();
            RankingRow {
                subject_count: subject_counts.get(&r.student_id).copied().unwrap_or(0),
                student_id: r.student_id,
                display_name,
                admission_number,
                total_marks: r.total_marks,
                max_total: r.max_total,
                percentage: round_2dp(r.percentage),
                rank: r.rank,
            }
        })
        .collect();
    out.sort_by(|a, b| {
        a.rank
            .cmp(&b.rank)
            .then_with(|| a.display_name.cmp(&b.display_name))
    });

    Ok(ClassRanking {
        exam_id: exam_id.to_string(),
        exam_name,
        classroom_id,
        rows: out,
    })
}

pub fn display_name(first: &str, last: &str) -> String {
    let last = last.trim();
    if last.is_empty() {
        first.trim().to_string()
    } else {
        format!("{} {}", first.trim(), last)
    }
}
