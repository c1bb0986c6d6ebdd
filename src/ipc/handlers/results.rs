use crate::db;
use crate::format::format_percent;
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    db_err, delete_by_id, fetch_page, non_negative, optional_str, parse_page, required_f64,
    required_str, roll_order, with_conn, Filter, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::metrics::{competition_ranks, mean, summarize_scores, ScoreSummary, ScoredItem};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StudentHeader {
    id: String,
    name: String,
    roll_no: Option<String>,
    class_name: String,
    section: Option<String>,
}

impl StudentHeader {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            name: r.get(1)?,
            roll_no: r.get(2)?,
            class_name: r.get(3)?,
            section: r.get(4)?,
        })
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "name": self.name,
            "rollNo": self.roll_no,
            "className": self.class_name,
            "section": self.section,
        })
    }
}

fn load_student(conn: &Connection, student_id: &str) -> Result<StudentHeader, HandlerErr> {
    conn.query_row(
        "SELECT id, name, roll_no, class_name, section FROM students WHERE id = ?",
        [student_id],
        StudentHeader::from_row,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("student"))
}

fn scored_items(conn: &Connection, student_id: &str, exam: &str) -> Result<Vec<ScoredItem>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT subject, obtained, total FROM exam_results
         WHERE student_id = ? AND exam = ?
         ORDER BY subject",
    )?;
    let items = stmt
        .query_map((student_id, exam), |r| {
            Ok(ScoredItem {
                label: r.get(0)?,
                obtained: r.get(1)?,
                total: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

fn summary_json(summary: &ScoreSummary, pass_percent: f64) -> serde_json::Value {
    let items: Vec<serde_json::Value> = summary
        .items
        .iter()
        .map(|line| {
            json!({
                "subject": line.label,
                "obtained": line.obtained,
                "total": line.total,
                "percentage": line.percentage,
                "grade": line.grade,
                "passed": line.percentage >= pass_percent,
            })
        })
        .collect();
    let agg = &summary.aggregate;
    json!({
        "items": items,
        "obtained": agg.total,
        "total": agg.max_or_base,
        "percentage": agg.percentage,
        "percentageText": format_percent(agg.percentage),
        "grade": agg.category,
        "passed": agg.percentage >= pass_percent,
    })
}

fn results_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let exam = required_str(params, "exam")?;
    let subject = required_str(params, "subject")?;
    let obtained = non_negative("obtained", required_f64(params, "obtained")?)?;
    let total = required_f64(params, "total")?;
    if total <= 0.0 {
        return Err(HandlerErr::bad_params("total must be greater than zero"));
    }
    if obtained > total {
        return Err(HandlerErr::bad_params("obtained must not exceed total")
            .with_details(json!({ "obtained": obtained, "total": total })));
    }
    load_student(conn, &student_id)?;

    let now = db::now_ts();
    conn.execute(
        "INSERT INTO exam_results(id, student_id, exam, subject, obtained, total, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, exam, subject)
         DO UPDATE SET obtained = excluded.obtained, total = excluded.total, updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            &student_id,
            &exam,
            &subject,
            obtained,
            total,
            &now,
            &now,
        ),
    )
    .map_err(db_err("db_insert_failed"))?;

    let id: String = conn.query_row(
        "SELECT id FROM exam_results WHERE student_id = ? AND exam = ? AND subject = ?",
        (&student_id, &exam, &subject),
        |r| r.get(0),
    )?;
    Ok(json!({ "resultId": id }))
}

fn results_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let page = parse_page(params, setup::page_size(conn)?)?;
    let mut filter = Filter::default();
    filter
        .eq("r.student_id", optional_str(params, "studentId")?)
        .eq("r.exam", optional_str(params, "exam")?)
        .eq("r.subject", optional_str(params, "subject")?)
        .eq("s.class_name", optional_str(params, "className")?)
        .search(&["s.name", "s.roll_no"], optional_str(params, "search")?);
    fetch_page(
        conn,
        "exam_results r JOIN students s ON s.id = r.student_id",
        "r.id, r.student_id, s.name, s.class_name, r.exam, r.subject, r.obtained, r.total, r.updated_at",
        "s.class_name, s.name, r.exam, r.subject",
        &filter,
        page,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "className": r.get::<_, String>(3)?,
                "exam": r.get::<_, String>(4)?,
                "subject": r.get::<_, String>(5)?,
                "obtained": r.get::<_, f64>(6)?,
                "total": r.get::<_, f64>(7)?,
                "updatedAt": r.get::<_, String>(8)?,
            }))
        },
    )
}

fn results_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "resultId")?;
    delete_by_id(conn, "exam_results", &id, "result")?;
    Ok(json!({ "deleted": id }))
}

fn results_card(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let exam = required_str(params, "exam")?;
    let student = load_student(conn, &student_id)?;
    let items = scored_items(conn, &student_id, &exam)?;
    let summary = summarize_scores(&items)?;
    let pass_percent = setup::pass_percent(conn)?;

    let mut card = summary_json(&summary, pass_percent);
    card["student"] = student.to_json();
    card["exam"] = json!(exam);
    card["passPercent"] = json!(pass_percent);
    Ok(card)
}

fn results_class_wise(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_name = required_str(params, "className")?;
    let exam = required_str(params, "exam")?;
    let pass_percent = setup::pass_percent(conn)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT id, name, roll_no, class_name, section FROM students
         WHERE class_name = ? AND active = 1
         ORDER BY {}",
        roll_order("")
    ))?;
    let students = stmt
        .query_map([&class_name], StudentHeader::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows: Vec<(StudentHeader, ScoreSummary)> = Vec::new();
    let mut missing = Vec::new();
    for student in students {
        let items = scored_items(conn, &student.id, &exam)?;
        if items.is_empty() {
            missing.push(student.to_json());
            continue;
        }
        let summary = summarize_scores(&items)?;
        rows.push((student, summary));
    }

    let percentages: Vec<f64> = rows.iter().map(|(_, s)| s.aggregate.percentage).collect();
    let ranks = competition_ranks(&percentages);
    let mut ranked: Vec<(usize, serde_json::Value)> = rows
        .iter()
        .zip(ranks)
        .map(|((student, summary), rank)| {
            let agg = &summary.aggregate;
            (
                rank,
                json!({
                    "rank": rank,
                    "student": student.to_json(),
                    "obtained": agg.total,
                    "total": agg.max_or_base,
                    "percentage": agg.percentage,
                    "grade": agg.category,
                    "passed": agg.percentage >= pass_percent,
                }),
            )
        })
        .collect();
    // Stable sort keeps roll order within a tie.
    ranked.sort_by_key(|(rank, _)| *rank);

    let mut by_subject: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (_, summary) in &rows {
        for line in &summary.items {
            by_subject
                .entry(line.label.clone())
                .or_default()
                .push(line.percentage);
        }
    }
    let subjects: Vec<serde_json::Value> = by_subject
        .iter()
        .map(|(subject, pcts)| json!({ "subject": subject, "averagePercentage": mean(pcts) }))
        .collect();

    let pass_count = percentages.iter().filter(|p| **p >= pass_percent).count();
    Ok(json!({
        "className": class_name,
        "exam": exam,
        "rows": ranked.into_iter().map(|(_, v)| v).collect::<Vec<_>>(),
        "classAverage": mean(&percentages),
        "passCount": pass_count,
        "failCount": percentages.len() - pass_count,
        "subjects": subjects,
        "missing": missing,
        "passPercent": pass_percent,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.upsert" => Some(with_conn(state, req, results_upsert)),
        "results.list" => Some(with_conn(state, req, results_list)),
        "results.delete" => Some(with_conn(state, req, results_delete)),
        "results.card" => Some(with_conn(state, req, results_card)),
        "results.classWise" => Some(with_conn(state, req, results_class_wise)),
        _ => None,
    }
}
