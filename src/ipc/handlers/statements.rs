use crate::db;
use crate::format::format_currency;
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    db_err, delete_by_id, fetch_page, has, non_negative, one_of, optional_date, optional_f64,
    optional_str, parse_page, patch_object, required_date, required_f64, required_str,
    text_or_null, with_conn, Filter, HandlerErr, Updates,
};
use crate::ipc::types::{AppState, Request};
use crate::metrics::round_2dp;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use serde_json::json;
use uuid::Uuid;

pub const KINDS: &[&str] = &["credit", "debit"];
const COLUMNS: &str =
    "id, date, description, category, kind, amount, reference, created_at, updated_at";

fn statement_json(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "date": r.get::<_, String>(1)?,
        "description": r.get::<_, String>(2)?,
        "category": r.get::<_, Option<String>>(3)?,
        "kind": r.get::<_, String>(4)?,
        "amount": r.get::<_, f64>(5)?,
        "reference": r.get::<_, Option<String>>(6)?,
        "createdAt": r.get::<_, String>(7)?,
        "updatedAt": r.get::<_, String>(8)?,
    }))
}

fn positive_amount(v: f64) -> Result<f64, HandlerErr> {
    let v = non_negative("amount", v)?;
    if v == 0.0 {
        return Err(HandlerErr::bad_params("amount must be greater than zero"));
    }
    Ok(round_2dp(v))
}

fn build_filter(params: &serde_json::Value) -> Result<Filter, HandlerErr> {
    let kind = optional_str(params, "kind")?
        .map(|k| one_of("kind", k, KINDS))
        .transpose()?;
    let mut filter = Filter::default();
    filter
        .search(
            &["description", "category", "reference"],
            optional_str(params, "search")?,
        )
        .eq("kind", kind)
        .eq("category", optional_str(params, "category")?)
        .cmp("date", ">=", optional_date(params, "from")?)
        .cmp("date", "<=", optional_date(params, "to")?);
    Ok(filter)
}

/// Credit/debit totals over every row matching `filter`, not just the current page.
fn totals(conn: &Connection, filter: &Filter) -> Result<(f64, f64), HandlerErr> {
    let sql = format!(
        "SELECT
           COALESCE(SUM(CASE WHEN kind = 'credit' THEN amount ELSE 0 END), 0),
           COALESCE(SUM(CASE WHEN kind = 'debit' THEN amount ELSE 0 END), 0)
         FROM account_statements{}",
        filter.where_sql()
    );
    Ok(conn.query_row(&sql, params_from_iter(filter.args().iter()), |r| {
        Ok((r.get::<_, f64>(0)?, r.get::<_, f64>(1)?))
    })?)
}

pub fn balance(conn: &Connection) -> Result<f64, HandlerErr> {
    let (credit, debit) = totals(conn, &Filter::default())?;
    Ok(round_2dp(credit - debit))
}

fn statements_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let page = parse_page(params, setup::page_size(conn)?)?;
    let filter = build_filter(params)?;
    let mut out = fetch_page(
        conn,
        "account_statements",
        COLUMNS,
        "date DESC, created_at DESC",
        &filter,
        page,
        statement_json,
    )?;

    let (credit, debit) = totals(conn, &filter)?;
    let balance = round_2dp(credit - debit);
    let loc = setup::locale_settings(conn)?;
    out["summary"] = json!({
        "totalCredit": round_2dp(credit),
        "totalDebit": round_2dp(debit),
        "balance": balance,
        "formatted": {
            "totalCredit": format_currency(credit, loc.locale, &loc.currency_symbol),
            "totalDebit": format_currency(debit, loc.locale, &loc.currency_symbol),
            "balance": format_currency(balance, loc.locale, &loc.currency_symbol),
        }
    });
    Ok(out)
}

fn statements_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = required_date(params, "date")?;
    let description = required_str(params, "description")?;
    let kind = one_of("kind", required_str(params, "kind")?, KINDS)?;
    let amount = positive_amount(required_f64(params, "amount")?)?;
    let id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO account_statements(id, date, description, category, kind, amount, reference, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &date,
            &description,
            optional_str(params, "category")?,
            &kind,
            amount,
            optional_str(params, "reference")?,
            &now,
            &now,
        ),
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "statementId": id }))
}

fn statements_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "statementId")?;
    let patch = patch_object(params)?;
    let mut updates = Updates::default();
    if has(patch, "date") {
        updates.set("date", Value::Text(required_date(patch, "date")?));
    }
    if has(patch, "description") {
        updates.set("description", Value::Text(required_str(patch, "description")?));
    }
    if has(patch, "kind") {
        updates.set(
            "kind",
            Value::Text(one_of("kind", required_str(patch, "kind")?, KINDS)?),
        );
    }
    if let Some(amount) = optional_f64(patch, "amount")? {
        updates.set("amount", Value::Real(positive_amount(amount)?));
    }
    for key in ["category", "reference"] {
        if has(patch, key) {
            updates.set(key, text_or_null(optional_str(patch, key)?));
        }
    }
    updates.apply(conn, "account_statements", &id, "statement")?;
    Ok(json!({ "statementId": id }))
}

fn statements_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "statementId")?;
    delete_by_id(conn, "account_statements", &id, "statement")?;
    Ok(json!({ "deleted": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "statements.list" => Some(with_conn(state, req, statements_list)),
        "statements.create" => Some(with_conn(state, req, statements_create)),
        "statements.update" => Some(with_conn(state, req, statements_update)),
        "statements.delete" => Some(with_conn(state, req, statements_delete)),
        _ => None,
    }
}
