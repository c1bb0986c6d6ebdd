use crate::db;
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    db_err, delete_by_id, fetch_page, has, optional_bool, optional_str, parse_page,
    patch_object, required_str, roll_order, text_or_null, with_conn, Filter, HandlerErr, Updates,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use serde_json::json;
use uuid::Uuid;

const COLUMNS: &str =
    "id, name, roll_no, class_name, section, guardian, phone, active, created_at, updated_at";

fn student_json(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "rollNo": r.get::<_, Option<String>>(2)?,
        "className": r.get::<_, String>(3)?,
        "section": r.get::<_, Option<String>>(4)?,
        "guardian": r.get::<_, Option<String>>(5)?,
        "phone": r.get::<_, Option<String>>(6)?,
        "active": r.get::<_, i64>(7)? != 0,
        "createdAt": r.get::<_, String>(8)?,
        "updatedAt": r.get::<_, String>(9)?,
    }))
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let page = parse_page(params, setup::page_size(conn)?)?;
    let mut filter = Filter::default();
    filter
        .search(&["name", "roll_no", "guardian"], optional_str(params, "search")?)
        .eq("class_name", optional_str(params, "className")?)
        .eq("section", optional_str(params, "section")?);
    if let Some(active) = optional_bool(params, "active")? {
        filter.raw("active = ?", vec![Value::Integer(active as i64)]);
    }
    fetch_page(
        conn,
        "students",
        COLUMNS,
        &format!("class_name, section, {}", roll_order("")),
        &filter,
        page,
        student_json,
    )
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let class_name = required_str(params, "className")?;
    let active = optional_bool(params, "active")?.unwrap_or(true);
    let id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO students(id, name, roll_no, class_name, section, guardian, phone, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &name,
            optional_str(params, "rollNo")?,
            &class_name,
            optional_str(params, "section")?,
            optional_str(params, "guardian")?,
            optional_str(params, "phone")?,
            active as i64,
            &now,
            &now,
        ),
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "studentId": id }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "studentId")?;
    let patch = patch_object(params)?;
    let mut updates = Updates::default();
    if has(patch, "name") {
        updates.set("name", Value::Text(required_str(patch, "name")?));
    }
    if has(patch, "className") {
        updates.set("class_name", Value::Text(required_str(patch, "className")?));
    }
    for (key, column) in [
        ("rollNo", "roll_no"),
        ("section", "section"),
        ("guardian", "guardian"),
        ("phone", "phone"),
    ] {
        if has(patch, key) {
            updates.set(column, text_or_null(optional_str(patch, key)?));
        }
    }
    if let Some(active) = optional_bool(patch, "active")? {
        updates.set("active", Value::Integer(active as i64));
    }
    updates.apply(conn, "students", &id, "student")?;
    Ok(json!({ "studentId": id }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "studentId")?;
    let refs: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM exam_results WHERE student_id = ?1)
              + (SELECT COUNT(*) FROM attendance_records WHERE student_id = ?1)",
        [&id],
        |r| r.get(0),
    )?;
    if refs > 0 {
        return Err(HandlerErr::new(
            "in_use",
            "student has results or attendance; mark inactive instead",
        )
        .with_details(json!({ "references": refs })));
    }
    delete_by_id(conn, "students", &id, "student")?;
    Ok(json!({ "deleted": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        _ => None,
    }
}
