use crate::db;
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    db_err, delete_by_id, fetch_page, one_of, optional_bool, optional_str, parse_page,
    required_str, with_conn, Filter, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const AUDIENCES: &[&str] = &["all", "admin", "teacher", "student"];

fn notifications_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let page = parse_page(params, setup::page_size(conn)?)?;
    let mut filter = Filter::default();
    // A role sees notices addressed to it plus broadcasts.
    if let Some(audience) = optional_str(params, "audience")? {
        let audience = one_of("audience", audience, AUDIENCES)?;
        if audience != "all" {
            filter.raw(
                "audience IN ('all', ?)",
                vec![Value::Text(audience)],
            );
        }
    }
    if optional_bool(params, "unreadOnly")?.unwrap_or(false) {
        filter.raw("is_read = 0", Vec::new());
    }
    filter.search(&["title", "message"], optional_str(params, "search")?);
    fetch_page(
        conn,
        "notifications",
        "id, title, message, audience, is_read, created_at",
        "created_at DESC, id",
        &filter,
        page,
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "message": r.get::<_, String>(2)?,
                "audience": r.get::<_, String>(3)?,
                "read": r.get::<_, i64>(4)? != 0,
                "createdAt": r.get::<_, String>(5)?,
            }))
        },
    )
}

fn notifications_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let title = required_str(params, "title")?;
    let message = required_str(params, "message")?;
    let audience = one_of(
        "audience",
        optional_str(params, "audience")?.unwrap_or_else(|| "all".to_string()),
        AUDIENCES,
    )?;
    let id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO notifications(id, title, message, audience, is_read, created_at, updated_at)
         VALUES(?, ?, ?, ?, 0, ?, ?)",
        (&id, &title, &message, &audience, &now, &now),
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "notificationId": id }))
}

fn notifications_mark_read(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "notificationId")?;
    let read = optional_bool(params, "read")?.unwrap_or(true);
    let n = conn
        .execute(
            "UPDATE notifications SET is_read = ?, updated_at = ? WHERE id = ?",
            (read as i64, db::now_ts(), &id),
        )
        .map_err(db_err("db_update_failed"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("notification"));
    }
    Ok(json!({ "notificationId": id, "read": read }))
}

fn notifications_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "notificationId")?;
    delete_by_id(conn, "notifications", &id, "notification")?;
    Ok(json!({ "deleted": id }))
}

pub fn unread_count(conn: &Connection) -> Result<i64, HandlerErr> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE is_read = 0",
        [],
        |r| r.get(0),
    )?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.list" => Some(with_conn(state, req, notifications_list)),
        "notifications.create" => Some(with_conn(state, req, notifications_create)),
        "notifications.markRead" => Some(with_conn(state, req, notifications_mark_read)),
        "notifications.delete" => Some(with_conn(state, req, notifications_delete)),
        _ => None,
    }
}
