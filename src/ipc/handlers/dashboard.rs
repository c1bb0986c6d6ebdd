use crate::format::format_currency;
use crate::ipc::handlers::{notifications, salary, setup, statements};
use crate::ipc::helpers::{optional_month, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn count(conn: &Connection, sql: &str) -> Result<i64, HandlerErr> {
    Ok(conn.query_row(sql, [], |r| r.get(0))?)
}

fn dashboard_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let month = optional_month(params, "month")?
        .unwrap_or_else(|| chrono::Local::now().format("%Y-%m").to_string());
    let balance = statements::balance(conn)?;
    let payroll = salary::month_net_total(conn, &month)?;
    let loc = setup::locale_settings(conn)?;

    Ok(json!({
        "students": count(conn, "SELECT COUNT(*) FROM students WHERE active = 1")?,
        "staff": count(conn, "SELECT COUNT(*) FROM staff WHERE active = 1")?,
        "questions": count(conn, "SELECT COUNT(*) FROM questions")?,
        "chapters": count(conn, "SELECT COUNT(*) FROM chapters")?,
        "unreadNotifications": notifications::unread_count(conn)?,
        "balance": balance,
        "month": month,
        "payroll": payroll,
        "formatted": {
            "balance": format_currency(balance, loc.locale, &loc.currency_symbol),
            "payroll": format_currency(payroll, loc.locale, &loc.currency_symbol),
        }
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.summary" => Some(with_conn(state, req, dashboard_summary)),
        _ => None,
    }
}
