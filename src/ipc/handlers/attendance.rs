use crate::db;
use crate::format::format_percent;
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    db_err, fetch_page, optional_date, optional_str, parse_page, required_date, required_str,
    roll_order, with_conn, Filter, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::metrics::{AttendanceTally, ATTENDANCE_BANDS};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Present,
    Absent,
}

impl Status {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "P" | "PRESENT" => Some(Self::Present),
            "A" | "ABSENT" => Some(Self::Absent),
            _ => None,
        }
    }

    fn code(self) -> &'static str {
        match self {
            Self::Present => "P",
            Self::Absent => "A",
        }
    }
}

fn tally_json(tally: &AttendanceTally) -> Result<serde_json::Value, HandlerErr> {
    // A period with no recorded days has no rate; report it as null rather than failing.
    if tally.total() == 0 {
        return Ok(json!({
            "present": 0,
            "absent": 0,
            "total": 0,
            "rate": null,
            "rateText": format_percent(f64::NAN),
            "status": null,
        }));
    }
    let agg = tally.summarize()?;
    Ok(json!({
        "present": tally.present,
        "absent": tally.absent,
        "total": tally.total(),
        "rate": agg.percentage,
        "rateText": format_percent(agg.percentage),
        "status": agg.category,
    }))
}

fn date_range(params: &serde_json::Value) -> Result<(Option<String>, Option<String>), HandlerErr> {
    let from = optional_date(params, "from")?;
    let to = optional_date(params, "to")?;
    if let (Some(f), Some(t)) = (&from, &to) {
        if f > t {
            return Err(HandlerErr::bad_params("from must not be after to"));
        }
    }
    Ok((from, to))
}

fn attendance_mark(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = required_date(params, "date")?;
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("entries must be an array"));
    };
    if entries.is_empty() {
        return Err(HandlerErr::bad_params("entries must not be empty"));
    }

    let mut parsed: Vec<(String, Status)> = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();
    for (i, entry) in entries.iter().enumerate() {
        let student_id = required_str(entry, "studentId")
            .map_err(|e| e.with_details(json!({ "index": i })))?;
        let raw_status = required_str(entry, "status")
            .map_err(|e| e.with_details(json!({ "index": i })))?;
        let Some(status) = Status::parse(&raw_status) else {
            return Err(HandlerErr::bad_params("status must be P or A")
                .with_details(json!({ "index": i, "status": raw_status })));
        };
        if !seen.insert(student_id.clone()) {
            return Err(HandlerErr::bad_params("student listed twice")
                .with_details(json!({ "index": i, "studentId": student_id })));
        }
        parsed.push((student_id, status));
    }

    let tx = conn.unchecked_transaction().map_err(db_err("db_tx_failed"))?;
    let now = db::now_ts();
    let mut present = 0usize;
    for (i, (student_id, status)) in parsed.iter().enumerate() {
        let known: Option<i64> = tx
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| r.get(0))
            .optional()?;
        if known.is_none() {
            return Err(HandlerErr::not_found("student")
                .with_details(json!({ "index": i, "studentId": student_id })));
        }
        tx.execute(
            "INSERT INTO attendance_records(id, student_id, date, status, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, date)
             DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                student_id,
                &date,
                status.code(),
                &now,
                &now,
            ),
        )
        .map_err(db_err("db_insert_failed"))?;
        if *status == Status::Present {
            present += 1;
        }
    }
    tx.commit().map_err(db_err("db_tx_failed"))?;

    tracing::info!(date = %date, marked = parsed.len(), present, "attendance marked");
    Ok(json!({
        "date": date,
        "marked": parsed.len(),
        "present": present,
        "absent": parsed.len() - present,
    }))
}

fn attendance_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let page = parse_page(params, setup::page_size(conn)?)?;
    let (from, to) = date_range(params)?;
    let mut filter = Filter::default();
    filter
        .eq("a.date", optional_date(params, "date")?)
        .cmp("a.date", ">=", from)
        .cmp("a.date", "<=", to)
        .eq("a.student_id", optional_str(params, "studentId")?)
        .eq("s.class_name", optional_str(params, "className")?)
        .eq("s.section", optional_str(params, "section")?);
    fetch_page(
        conn,
        "attendance_records a JOIN students s ON s.id = a.student_id",
        "a.id, a.student_id, s.name, s.roll_no, s.class_name, a.date, a.status",
        &format!("a.date DESC, {}", roll_order("s.")),
        &filter,
        page,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "rollNo": r.get::<_, Option<String>>(3)?,
                "className": r.get::<_, String>(4)?,
                "date": r.get::<_, String>(5)?,
                "status": r.get::<_, String>(6)?,
            }))
        },
    )
}

fn attendance_student_report(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let (from, to) = date_range(params)?;
    let name: String = conn
        .query_row("SELECT name FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("student"))?;

    let mut stmt = conn.prepare(
        "SELECT date, status FROM attendance_records
         WHERE student_id = ?1
           AND (?2 IS NULL OR date >= ?2)
           AND (?3 IS NULL OR date <= ?3)
         ORDER BY date",
    )?;
    let records = stmt
        .query_map((&student_id, &from, &to), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut overall = AttendanceTally::default();
    let mut monthly: BTreeMap<String, AttendanceTally> = BTreeMap::new();
    let mut absent_dates = Vec::new();
    for (date, status) in &records {
        let present = status == "P";
        overall.record(present);
        let month = date.get(..7).unwrap_or(date).to_string();
        monthly.entry(month).or_default().record(present);
        if !present {
            absent_dates.push(date.clone());
        }
    }

    let months = monthly
        .iter()
        .map(|(month, t)| {
            let mut v = tally_json(t)?;
            v["month"] = json!(month);
            Ok(v)
        })
        .collect::<Result<Vec<_>, HandlerErr>>()?;

    Ok(json!({
        "studentId": student_id,
        "studentName": name,
        "from": from,
        "to": to,
        "summary": tally_json(&overall)?,
        "months": months,
        "absentDates": absent_dates,
    }))
}

fn attendance_class_report(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_name = required_str(params, "className")?;
    let section = optional_str(params, "section")?;
    let (from, to) = date_range(params)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT id, name, roll_no FROM students
         WHERE class_name = ?1 AND active = 1 AND (?2 IS NULL OR section = ?2)
         ORDER BY {}",
        roll_order("")
    ))?;
    let students = stmt
        .query_map((&class_name, &section), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT a.student_id, a.status FROM attendance_records a
         JOIN students s ON s.id = a.student_id
         WHERE s.class_name = ?1 AND s.active = 1
           AND (?2 IS NULL OR s.section = ?2)
           AND (?3 IS NULL OR a.date >= ?3)
           AND (?4 IS NULL OR a.date <= ?4)",
    )?;
    let mut tallies: HashMap<String, AttendanceTally> = HashMap::new();
    let records = stmt
        .query_map((&class_name, &section, &from, &to), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (student_id, status) in records {
        tallies.entry(student_id).or_default().record(status == "P");
    }

    let mut overall = AttendanceTally::default();
    let mut band_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut rows = Vec::with_capacity(students.len());
    for (id, name, roll_no) in &students {
        let tally = tallies.get(id).copied().unwrap_or_default();
        overall.present += tally.present;
        overall.absent += tally.absent;
        if tally.total() > 0 {
            let rate = tally.summarize()?.percentage;
            *band_counts.entry(ATTENDANCE_BANDS.classify(rate)).or_default() += 1;
        }
        rows.push(json!({
            "studentId": id,
            "name": name,
            "rollNo": roll_no,
            "attendance": tally_json(&tally)?,
        }));
    }

    Ok(json!({
        "className": class_name,
        "section": section,
        "from": from,
        "to": to,
        "rows": rows,
        "summary": tally_json(&overall)?,
        "statusCounts": band_counts,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "attendance.list" => Some(with_conn(state, req, attendance_list)),
        "attendance.studentReport" => Some(with_conn(state, req, attendance_student_report)),
        "attendance.classReport" => Some(with_conn(state, req, attendance_class_report)),
        _ => None,
    }
}
