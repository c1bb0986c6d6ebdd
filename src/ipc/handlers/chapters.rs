use crate::db;
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    db_err, fetch_page, has, optional_i64, optional_str, parse_page, patch_object, required_str,
    with_conn, Filter, HandlerErr, Updates,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use serde_json::json;
use uuid::Uuid;

const COLUMNS: &str = "c.id, c.class_name, c.subject, c.number, c.name, c.created_at, c.updated_at,
     (SELECT COUNT(*) FROM questions q WHERE q.chapter_id = c.id)";

fn chapter_json(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "className": r.get::<_, String>(1)?,
        "subject": r.get::<_, String>(2)?,
        "number": r.get::<_, Option<i64>>(3)?,
        "name": r.get::<_, String>(4)?,
        "createdAt": r.get::<_, String>(5)?,
        "updatedAt": r.get::<_, String>(6)?,
        "questionCount": r.get::<_, i64>(7)?,
    }))
}

fn chapter_number(params: &serde_json::Value) -> Result<Option<i64>, HandlerErr> {
    match optional_i64(params, "number")? {
        Some(n) if n < 1 => Err(HandlerErr::bad_params("number must be >= 1")),
        other => Ok(other),
    }
}

fn chapters_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let page = parse_page(params, setup::page_size(conn)?)?;
    let mut filter = Filter::default();
    filter
        .eq("c.class_name", optional_str(params, "className")?)
        .eq("c.subject", optional_str(params, "subject")?)
        .search(&["c.name"], optional_str(params, "search")?);
    fetch_page(
        conn,
        "chapters c",
        COLUMNS,
        "c.class_name, c.subject, c.number, c.name",
        &filter,
        page,
        chapter_json,
    )
}

fn chapters_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_name = required_str(params, "className")?;
    let subject = required_str(params, "subject")?;
    let name = required_str(params, "name")?;
    let number = chapter_number(params)?;
    let id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO chapters(id, class_name, subject, number, name, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&id, &class_name, &subject, number, &name, &now, &now),
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "chapterId": id }))
}

fn chapters_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "chapterId")?;
    let patch = patch_object(params)?;
    let mut updates = Updates::default();
    for (key, column) in [("className", "class_name"), ("subject", "subject"), ("name", "name")] {
        if has(patch, key) {
            updates.set(column, Value::Text(required_str(patch, key)?));
        }
    }
    if has(patch, "number") {
        updates.set(
            "number",
            chapter_number(patch)?.map(Value::Integer).unwrap_or(Value::Null),
        );
    }
    updates.apply(conn, "chapters", &id, "chapter")?;
    Ok(json!({ "chapterId": id }))
}

/// Questions survive their chapter; they are detached rather than deleted.
fn chapters_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "chapterId")?;
    let tx = conn.unchecked_transaction().map_err(db_err("db_tx_failed"))?;
    let detached = tx
        .execute(
            "UPDATE questions SET chapter_id = NULL, updated_at = ? WHERE chapter_id = ?",
            (db::now_ts(), &id),
        )
        .map_err(db_err("db_update_failed"))?;
    let n = tx
        .execute("DELETE FROM chapters WHERE id = ?", [&id])
        .map_err(db_err("db_delete_failed"))?;
    if n == 0 {
        // Dropping the transaction rolls back.
        return Err(HandlerErr::not_found("chapter"));
    }
    tx.commit().map_err(db_err("db_tx_failed"))?;
    Ok(json!({ "deleted": id, "detachedQuestions": detached }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "chapters.list" => Some(with_conn(state, req, chapters_list)),
        "chapters.create" => Some(with_conn(state, req, chapters_create)),
        "chapters.update" => Some(with_conn(state, req, chapters_update)),
        "chapters.delete" => Some(with_conn(state, req, chapters_delete)),
        _ => None,
    }
}
