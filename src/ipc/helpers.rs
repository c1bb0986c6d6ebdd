use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::metrics::MetricsError;
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::json;

pub const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(what: &str) -> Self {
        Self::new("not_found", format!("{} not found", what))
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

impl From<MetricsError> for HandlerErr {
    fn from(e: MetricsError) -> Self {
        let code = match e.code.as_str() {
            "empty_input" => "empty_input",
            "zero_total" => "zero_total",
            _ => "bad_params",
        };
        Self::new(code, e.message)
    }
}

pub fn db_err(code: &'static str) -> impl Fn(rusqlite::Error) -> HandlerErr {
    move |e| HandlerErr::new(code, e.to_string())
}

/// Runs `f` against the open workspace and wraps the outcome in a response envelope.
pub fn with_conn<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => {
            if e.code.starts_with("db_") {
                tracing::warn!(method = %req.method, code = e.code, "{}", e.message);
            } else {
                tracing::debug!(method = %req.method, code = e.code, "{}", e.message);
            }
            e.response(&req.id)
        }
    }
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    optional_str(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Missing, null and blank strings all read as `None`.
pub fn optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn optional_f64(params: &serde_json::Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => match v.as_f64() {
            Some(n) if n.is_finite() => Ok(Some(n)),
            _ => Err(HandlerErr::bad_params(format!("{} must be a number", key))),
        },
    }
}

pub fn required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    optional_f64(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn non_negative(key: &str, value: f64) -> Result<f64, HandlerErr> {
    if value < 0.0 {
        return Err(HandlerErr::bad_params(format!("{} must not be negative", key))
            .with_details(json!({ key: value })));
    }
    Ok(value)
}

pub fn optional_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a boolean", key))),
    }
}

pub fn optional_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn parse_date(key: &str, raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

/// Normalized `YYYY-MM-DD`, or `None` when absent.
pub fn optional_date(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    optional_str(params, key)?
        .map(|s| parse_date(key, &s).map(|d| d.format("%Y-%m-%d").to_string()))
        .transpose()
}

pub fn required_date(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    optional_date(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn parse_month(key: &str, raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM", key)))
}

pub fn optional_month(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    optional_str(params, key)?
        .map(|s| parse_month(key, &s).map(|d| d.format("%Y-%m").to_string()))
        .transpose()
}

pub fn required_month(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    optional_month(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn one_of(key: &str, value: String, allowed: &[&str]) -> Result<String, HandlerErr> {
    if allowed.contains(&value.as_str()) {
        return Ok(value);
    }
    Err(HandlerErr::bad_params(format!(
        "{} must be one of: {}",
        key,
        allowed.join(", ")
    ))
    .with_details(json!({ key: value })))
}

/// The `patch` object of an update request; fields present in it are updated.
pub fn patch_object(params: &serde_json::Value) -> Result<&serde_json::Value, HandlerErr> {
    match params.get("patch") {
        Some(p) if p.is_object() => Ok(p),
        _ => Err(HandlerErr::bad_params("missing patch object")),
    }
}

pub fn has(patch: &serde_json::Value, key: &str) -> bool {
    patch.get(key).is_some()
}

pub fn text_or_null(v: Option<String>) -> Value {
    v.map(Value::Text).unwrap_or(Value::Null)
}

pub fn exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    Ok(conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

pub fn require_exists(
    conn: &Connection,
    table: &str,
    id: &str,
    what: &str,
) -> Result<(), HandlerErr> {
    if exists(conn, table, id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found(what))
    }
}

pub fn delete_by_id(conn: &Connection, table: &str, id: &str, what: &str) -> Result<(), HandlerErr> {
    let sql = format!("DELETE FROM {} WHERE id = ?", table);
    let n = conn.execute(&sql, [id]).map_err(db_err("db_delete_failed"))?;
    if n == 0 {
        return Err(HandlerErr::not_found(what));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: i64,
    pub size: i64,
}

impl Page {
    /// Row offset of the first item, `None` when it does not fit in an `i64`.
    pub fn offset(&self) -> Option<i64> {
        (self.number - 1).checked_mul(self.size)
    }
}

pub fn parse_page(params: &serde_json::Value, default_size: i64) -> Result<Page, HandlerErr> {
    let number = optional_i64(params, "page")?.unwrap_or(1);
    let size = optional_i64(params, "pageSize")?.unwrap_or(default_size);
    if number < 1 {
        return Err(HandlerErr::bad_params("page must be >= 1"));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&size) {
        return Err(HandlerErr::bad_params(format!(
            "pageSize must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    let page = Page { number, size };
    if page.offset().is_none() {
        return Err(HandlerErr::bad_params("page out of range")
            .with_details(json!({ "page": number, "pageSize": size })));
    }
    Ok(page)
}

/// `ORDER BY` fragment for roll numbers: numeric ones by value ("9" before
/// "10"), then the rest as text, then name. `alias` is a table prefix like `"s."`.
pub fn roll_order(alias: &str) -> String {
    format!(
        "CASE WHEN {a}roll_no GLOB '[0-9]*' THEN 0 ELSE 1 END, CAST({a}roll_no AS INTEGER), {a}roll_no, {a}name",
        a = alias
    )
}

/// Accumulates `WHERE` clauses with positional arguments.
#[derive(Debug, Default)]
pub struct Filter {
    clauses: Vec<String>,
    args: Vec<Value>,
}

impl Filter {
    pub fn eq(&mut self, column: &str, value: Option<String>) -> &mut Self {
        if let Some(v) = value {
            self.clauses.push(format!("{} = ?", column));
            self.args.push(Value::Text(v));
        }
        self
    }

    pub fn cmp(&mut self, column: &str, op: &str, value: Option<String>) -> &mut Self {
        if let Some(v) = value {
            self.clauses.push(format!("{} {} ?", column, op));
            self.args.push(Value::Text(v));
        }
        self
    }

    /// Case-insensitive substring match over any of `columns`.
    pub fn search(&mut self, columns: &[&str], term: Option<String>) -> &mut Self {
        let Some(term) = term else { return self };
        let escaped = term
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{}%", escaped);
        let ors: Vec<String> = columns
            .iter()
            .map(|c| format!("{} LIKE ? ESCAPE '\\'", c))
            .collect();
        self.clauses.push(format!("({})", ors.join(" OR ")));
        for _ in columns {
            self.args.push(Value::Text(pattern.clone()));
        }
        self
    }

    pub fn raw(&mut self, clause: &str, args: Vec<Value>) -> &mut Self {
        self.clauses.push(clause.to_string());
        self.args.extend(args);
        self
    }

    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }
}

/// Runs a filtered, paginated query and returns the list envelope
/// `{ data, total, totalPages, currentPage }`.
pub fn fetch_page<F>(
    conn: &Connection,
    from: &str,
    columns: &str,
    order_by: &str,
    filter: &Filter,
    page: Page,
    map: F,
) -> Result<serde_json::Value, HandlerErr>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<serde_json::Value>,
{
    let where_sql = filter.where_sql();
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}{}", from, where_sql),
        params_from_iter(filter.args().iter()),
        |r| r.get(0),
    )?;

    let offset = page
        .offset()
        .ok_or_else(|| HandlerErr::bad_params("page out of range"))?;
    let mut args: Vec<Value> = filter.args().to_vec();
    args.push(Value::Integer(page.size));
    args.push(Value::Integer(offset));
    let sql = format!(
        "SELECT {} FROM {}{} ORDER BY {} LIMIT ? OFFSET ?",
        columns, from, where_sql, order_by
    );
    let mut stmt = conn.prepare(&sql)?;
    let data = stmt
        .query_map(params_from_iter(args.iter()), map)?
        .collect::<Result<Vec<_>, _>>()?;

    let total_pages = (total + page.size - 1) / page.size;
    Ok(json!({
        "data": data,
        "total": total,
        "totalPages": total_pages,
        "currentPage": page.number,
    }))
}

/// Collects `SET` assignments for a partial update.
#[derive(Debug, Default)]
pub struct Updates {
    sets: Vec<String>,
    args: Vec<Value>,
}

impl Updates {
    pub fn set(&mut self, column: &str, value: Value) {
        self.sets.push(format!("{} = ?", column));
        self.args.push(value);
    }

    pub fn apply(
        mut self,
        conn: &Connection,
        table: &str,
        id: &str,
        what: &str,
    ) -> Result<(), HandlerErr> {
        if self.sets.is_empty() {
            return Err(HandlerErr::bad_params("patch has no updatable fields"));
        }
        self.set("updated_at", Value::Text(crate::db::now_ts()));
        self.args.push(Value::Text(id.to_string()));
        let sql = format!("UPDATE {} SET {} WHERE id = ?", table, self.sets.join(", "));
        let n = conn
            .execute(&sql, params_from_iter(self.args.iter()))
            .map_err(db_err("db_update_failed"))?;
        if n == 0 {
            return Err(HandlerErr::not_found(what));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_str_treats_blank_as_absent() {
        let p = json!({ "a": "  ", "b": " x ", "c": 3 });
        assert_eq!(optional_str(&p, "a").expect("a"), None);
        assert_eq!(optional_str(&p, "b").expect("b"), Some("x".to_string()));
        assert_eq!(optional_str(&p, "c").unwrap_err().code, "bad_params");
        assert_eq!(required_str(&p, "missing").unwrap_err().message, "missing missing");
    }

    #[test]
    fn dates_and_months_are_normalized() {
        let p = json!({ "d": " 2024-03-05 ", "m": "2024-03", "bad": "2024-13" });
        assert_eq!(optional_date(&p, "d").expect("d"), Some("2024-03-05".to_string()));
        assert_eq!(required_month(&p, "m").expect("m"), "2024-03");
        assert!(required_month(&p, "bad").is_err());
    }

    #[test]
    fn page_bounds_are_checked() {
        let p = parse_page(&json!({}), 20).expect("defaults");
        assert_eq!(p, Page { number: 1, size: 20 });
        assert!(parse_page(&json!({ "page": 0 }), 20).is_err());
        assert!(parse_page(&json!({ "pageSize": 501 }), 20).is_err());

        let far = parse_page(&json!({ "page": i64::MAX, "pageSize": 20 }), 20).unwrap_err();
        assert_eq!(far.code, "bad_params");
        assert_eq!(far.message, "page out of range");
        // A single-row page can go as far as i64 allows.
        let last = parse_page(&json!({ "page": i64::MAX, "pageSize": 1 }), 20).expect("fits");
        assert_eq!(last.offset(), Some(i64::MAX - 1));
    }

    #[test]
    fn roll_numbers_sort_by_value() {
        let conn = Connection::open_in_memory().expect("db");
        conn.execute_batch(
            "CREATE TABLE students(name TEXT, roll_no TEXT);
             INSERT INTO students VALUES ('Zoya', '10'), ('Amit', '9'), ('Ben', 'B2'), ('Cara', NULL), ('Dan', '2');",
        )
        .expect("seed");
        let sql = format!("SELECT name FROM students ORDER BY {}", roll_order(""));
        let mut stmt = conn.prepare(&sql).expect("prepare");
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("rows");
        assert_eq!(names, vec!["Dan", "Amit", "Zoya", "Cara", "Ben"]);
    }

    #[test]
    fn filter_builds_where_clause() {
        let mut f = Filter::default();
        assert_eq!(f.where_sql(), "");
        f.eq("kind", Some("credit".into()))
            .eq("category", None)
            .search(&["description", "reference"], Some("50%".into()));
        assert_eq!(
            f.where_sql(),
            " WHERE kind = ? AND (description LIKE ? ESCAPE '\\' OR reference LIKE ? ESCAPE '\\')"
        );
        assert_eq!(f.args().len(), 3);
        assert_eq!(f.args()[1], Value::Text("%50\\%%".into()));
    }
}
