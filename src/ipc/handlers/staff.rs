use crate::db;
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    db_err, delete_by_id, fetch_page, has, non_negative, optional_bool, optional_f64,
    optional_str, parse_page, patch_object, required_f64, required_str, text_or_null, with_conn,
    Filter, HandlerErr, Updates,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use serde_json::json;
use uuid::Uuid;

const COLUMNS: &str = "id, name, designation, base_salary, phone, active, created_at, updated_at";

fn staff_json(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "designation": r.get::<_, String>(2)?,
        "baseSalary": r.get::<_, f64>(3)?,
        "phone": r.get::<_, Option<String>>(4)?,
        "active": r.get::<_, i64>(5)? != 0,
        "createdAt": r.get::<_, String>(6)?,
        "updatedAt": r.get::<_, String>(7)?,
    }))
}

fn staff_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let page = parse_page(params, setup::page_size(conn)?)?;
    let mut filter = Filter::default();
    filter
        .search(&["name", "phone"], optional_str(params, "search")?)
        .eq("designation", optional_str(params, "designation")?);
    if let Some(active) = optional_bool(params, "active")? {
        filter.raw("active = ?", vec![Value::Integer(active as i64)]);
    }
    fetch_page(conn, "staff", COLUMNS, "name", &filter, page, staff_json)
}

fn staff_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let designation = required_str(params, "designation")?;
    let base_salary = non_negative("baseSalary", required_f64(params, "baseSalary")?)?;
    let id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO staff(id, name, designation, base_salary, phone, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, 1, ?, ?)",
        (
            &id,
            &name,
            &designation,
            base_salary,
            optional_str(params, "phone")?,
            &now,
            &now,
        ),
    )
    .map_err(db_err("db_insert_failed"))?;
    tracing::info!(staff_id = %id, "staff member created");
    Ok(json!({ "staffId": id }))
}

fn staff_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "staffId")?;
    let patch = patch_object(params)?;
    let mut updates = Updates::default();
    if has(patch, "name") {
        updates.set("name", Value::Text(required_str(patch, "name")?));
    }
    if has(patch, "designation") {
        updates.set("designation", Value::Text(required_str(patch, "designation")?));
    }
    if let Some(v) = optional_f64(patch, "baseSalary")? {
        updates.set("base_salary", Value::Real(non_negative("baseSalary", v)?));
    }
    if has(patch, "phone") {
        updates.set("phone", text_or_null(optional_str(patch, "phone")?));
    }
    if let Some(active) = optional_bool(patch, "active")? {
        updates.set("active", Value::Integer(active as i64));
    }
    updates.apply(conn, "staff", &id, "staff member")?;
    Ok(json!({ "staffId": id }))
}

fn staff_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "staffId")?;
    let payments: i64 = conn.query_row(
        "SELECT COUNT(*) FROM salary_payments WHERE staff_id = ?",
        [&id],
        |r| r.get(0),
    )?;
    if payments > 0 {
        return Err(
            HandlerErr::new("in_use", "staff member has salary payments; mark inactive instead")
                .with_details(json!({ "payments": payments })),
        );
    }
    delete_by_id(conn, "staff", &id, "staff member")?;
    Ok(json!({ "deleted": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "staff.list" => Some(with_conn(state, req, staff_list)),
        "staff.create" => Some(with_conn(state, req, staff_create)),
        "staff.update" => Some(with_conn(state, req, staff_update)),
        "staff.delete" => Some(with_conn(state, req, staff_delete)),
        _ => None,
    }
}
