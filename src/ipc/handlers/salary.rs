use crate::db;
use crate::format::{format_currency, Locale};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    db_err, delete_by_id, fetch_page, non_negative, optional_date, optional_f64, optional_month,
    optional_str, parse_month, parse_page, require_exists, required_month, required_str,
    with_conn, Filter, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::metrics::{pay_totals, round_2dp, PayComponent, PayTotals};
use chrono::Months;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

const MAX_REPORT_MONTHS: usize = 120;

const COLUMNS: &str = "p.id, p.staff_id, s.name, s.designation, p.month, p.fixed, p.bonus, p.deduction, p.method, p.paid_on, p.note";
const FROM: &str = "salary_payments p JOIN staff s ON s.id = p.staff_id";

#[derive(Debug, Clone)]
struct PaymentRow {
    id: String,
    staff_id: String,
    staff_name: String,
    designation: String,
    month: String,
    pay: PayComponent,
    method: Option<String>,
    paid_on: String,
    note: Option<String>,
}

impl PaymentRow {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            staff_id: r.get(1)?,
            staff_name: r.get(2)?,
            designation: r.get(3)?,
            month: r.get(4)?,
            pay: PayComponent {
                fixed: r.get(5)?,
                bonus: r.get(6)?,
                deduction: r.get(7)?,
            },
            method: r.get(8)?,
            paid_on: r.get(9)?,
            note: r.get(10)?,
        })
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "staffId": self.staff_id,
            "staffName": self.staff_name,
            "designation": self.designation,
            "month": self.month,
            "fixed": self.pay.fixed,
            "bonus": self.pay.bonus,
            "deduction": self.pay.deduction,
            "net": round_2dp(self.pay.net()),
            "method": self.method,
            "paidOn": self.paid_on,
            "note": self.note,
        })
    }
}

fn totals_json(t: &PayTotals, locale: Locale, symbol: &str) -> serde_json::Value {
    json!({
        "count": t.count,
        "fixed": round_2dp(t.fixed),
        "bonus": round_2dp(t.bonus),
        "deduction": round_2dp(t.deduction),
        "net": round_2dp(t.net),
        "formatted": {
            "fixed": format_currency(t.fixed, locale, symbol),
            "bonus": format_currency(t.bonus, locale, symbol),
            "deduction": format_currency(t.deduction, locale, symbol),
            "net": format_currency(t.net, locale, symbol),
        }
    })
}

fn payments_for_month(conn: &Connection, month: &str) -> Result<Vec<PaymentRow>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM {} WHERE p.month = ? ORDER BY s.name",
        COLUMNS, FROM
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([month], PaymentRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Net pay paid out for `month` (YYYY-MM).
pub fn month_net_total(conn: &Connection, month: &str) -> Result<f64, HandlerErr> {
    let rows = payments_for_month(conn, month)?;
    Ok(round_2dp(pay_totals(rows.iter().map(|r| &r.pay)).net))
}

fn salary_pay(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let staff_id = required_str(params, "staffId")?;
    let month = required_month(params, "month")?;

    let base_salary: Option<f64> = conn
        .query_row(
            "SELECT base_salary FROM staff WHERE id = ?",
            [&staff_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(base_salary) = base_salary else {
        return Err(HandlerErr::not_found("staff member"));
    };

    let pay = PayComponent {
        fixed: non_negative("fixed", optional_f64(params, "fixed")?.unwrap_or(base_salary))?,
        bonus: non_negative("bonus", optional_f64(params, "bonus")?.unwrap_or(0.0))?,
        deduction: non_negative("deduction", optional_f64(params, "deduction")?.unwrap_or(0.0))?,
    };
    if pay.net() < 0.0 {
        return Err(HandlerErr::bad_params("deduction exceeds fixed pay plus bonus")
            .with_details(json!({ "net": round_2dp(pay.net()) })));
    }

    let already: Option<String> = conn
        .query_row(
            "SELECT id FROM salary_payments WHERE staff_id = ? AND month = ?",
            (&staff_id, &month),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(existing) = already {
        return Err(HandlerErr::new("duplicate", "salary already paid for this month")
            .with_details(json!({ "paymentId": existing, "month": month })));
    }

    let paid_on = optional_date(params, "paidOn")?
        .unwrap_or_else(|| chrono::Local::now().date_naive().format("%Y-%m-%d").to_string());
    let id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO salary_payments(id, staff_id, month, fixed, bonus, deduction, method, paid_on, note, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &staff_id,
            &month,
            pay.fixed,
            pay.bonus,
            pay.deduction,
            optional_str(params, "method")?,
            &paid_on,
            optional_str(params, "note")?,
            &now,
            &now,
        ),
    )
    .map_err(db_err("db_insert_failed"))?;
    tracing::info!(payment_id = %id, staff_id = %staff_id, month = %month, "salary paid");
    Ok(json!({ "paymentId": id, "net": round_2dp(pay.net()) }))
}

fn salary_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let page = parse_page(params, setup::page_size(conn)?)?;
    let mut filter = Filter::default();
    filter
        .eq("p.month", optional_month(params, "month")?)
        .eq("p.staff_id", optional_str(params, "staffId")?)
        .search(&["s.name"], optional_str(params, "search")?);
    fetch_page(
        conn,
        FROM,
        COLUMNS,
        "p.month DESC, s.name",
        &filter,
        page,
        |r| PaymentRow::from_row(r).map(|p| p.to_json()),
    )
}

fn salary_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "paymentId")?;
    delete_by_id(conn, "salary_payments", &id, "payment")?;
    Ok(json!({ "deleted": id }))
}

fn salary_slip(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "paymentId")?;
    let sql = format!("SELECT {} FROM {} WHERE p.id = ?", COLUMNS, FROM);
    let row = conn
        .query_row(&sql, [&id], PaymentRow::from_row)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("payment"))?;

    let loc = setup::locale_settings(conn)?;
    let fmt = |v: f64| format_currency(v, loc.locale, &loc.currency_symbol);
    let mut slip = row.to_json();
    slip["formatted"] = json!({
        "fixed": fmt(row.pay.fixed),
        "bonus": fmt(row.pay.bonus),
        "deduction": fmt(row.pay.deduction),
        "net": fmt(row.pay.net()),
    });
    slip["locale"] = json!(loc.locale.as_str());
    Ok(slip)
}

fn salary_sheet(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let month = required_month(params, "month")?;
    let rows = payments_for_month(conn, &month)?;
    let totals = pay_totals(rows.iter().map(|r| &r.pay));

    let mut stmt = conn.prepare(
        "SELECT id, name, designation, base_salary FROM staff
         WHERE active = 1
           AND id NOT IN (SELECT staff_id FROM salary_payments WHERE month = ?)
         ORDER BY name",
    )?;
    let unpaid = stmt
        .query_map([&month], |r| {
            Ok(json!({
                "staffId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "designation": r.get::<_, String>(2)?,
                "baseSalary": r.get::<_, f64>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let loc = setup::locale_settings(conn)?;
    Ok(json!({
        "month": month,
        "rows": rows.iter().map(PaymentRow::to_json).collect::<Vec<_>>(),
        "totals": totals_json(&totals, loc.locale, &loc.currency_symbol),
        "unpaid": unpaid,
    }))
}

/// Inclusive list of `YYYY-MM` keys from `from` to `to`.
fn month_range(from: &str, to: &str) -> Result<Vec<String>, HandlerErr> {
    let start = parse_month("from", from)?;
    let end = parse_month("to", to)?;
    if start > end {
        return Err(HandlerErr::bad_params("from must not be after to"));
    }
    let mut months = Vec::new();
    let mut cur = start;
    while cur <= end {
        if months.len() == MAX_REPORT_MONTHS {
            return Err(HandlerErr::bad_params(format!(
                "report range is limited to {} months",
                MAX_REPORT_MONTHS
            )));
        }
        months.push(cur.format("%Y-%m").to_string());
        cur = cur
            .checked_add_months(Months::new(1))
            .ok_or_else(|| HandlerErr::bad_params("month out of range"))?;
    }
    Ok(months)
}

fn salary_report(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let from = required_month(params, "from")?;
    let to = required_month(params, "to")?;
    let months = month_range(&from, &to)?;
    let staff_id = optional_str(params, "staffId")?;
    if let Some(id) = &staff_id {
        require_exists(conn, "staff", id, "staff member")?;
    }

    let mut by_month: BTreeMap<String, Vec<PayComponent>> =
        months.iter().map(|m| (m.clone(), Vec::new())).collect();
    let sql = format!(
        "SELECT {} FROM {} WHERE p.month >= ? AND p.month <= ? AND (?3 IS NULL OR p.staff_id = ?3)",
        COLUMNS, FROM
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((&from, &to, &staff_id), PaymentRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for row in rows {
        if let Some(bucket) = by_month.get_mut(&row.month) {
            bucket.push(row.pay);
        }
    }

    let loc = setup::locale_settings(conn)?;
    let all: Vec<PayComponent> = by_month.values().flatten().copied().collect();
    let per_month: Vec<serde_json::Value> = by_month
        .iter()
        .map(|(month, pays)| {
            let mut t = totals_json(&pay_totals(pays), loc.locale, &loc.currency_symbol);
            t["month"] = json!(month);
            t
        })
        .collect();

    Ok(json!({
        "from": from,
        "to": to,
        "staffId": staff_id,
        "months": per_month,
        "totals": totals_json(&pay_totals(&all), loc.locale, &loc.currency_symbol),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "salary.pay" => Some(with_conn(state, req, salary_pay)),
        "salary.list" => Some(with_conn(state, req, salary_list)),
        "salary.delete" => Some(with_conn(state, req, salary_delete)),
        "salary.slip" => Some(with_conn(state, req, salary_slip)),
        "salary.sheet" => Some(with_conn(state, req, salary_sheet)),
        "salary.report" => Some(with_conn(state, req, salary_report)),
        _ => None,
    }
}
