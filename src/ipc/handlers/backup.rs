use crate::backup;
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::handlers::statements::KINDS;
use crate::ipc::helpers::{
    one_of, optional_date, optional_str, required_month, required_str, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::metrics::PayComponent;
use rusqlite::Connection;
use serde_json::json;
use std::path::{Path, PathBuf};

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn io_failed(e: impl std::fmt::Display, path: &Path) -> HandlerErr {
    HandlerErr::new("io_failed", e.to_string())
        .with_details(json!({ "path": path.to_string_lossy() }))
}

fn current_workspace(state: &AppState) -> Result<PathBuf, HandlerErr> {
    state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn export_bundle(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let out_path = PathBuf::from(required_str(params, "outPath")?);
    let workspace = current_workspace(state)?;

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let export = backup::export_workspace_bundle(&workspace, &out_path)
        .map_err(|e| io_failed(format!("{e:#}"), &out_path))?;
    tracing::info!(path = %out_path.to_string_lossy(), "workspace bundle exported");
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "dbSha256": export.db_sha256,
    }))
}

fn import_bundle(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let in_path = PathBuf::from(required_str(params, "inPath")?);
    let workspace = current_workspace(state)?;
    if !in_path.is_file() {
        return Err(HandlerErr::new("not_found", "bundle file not found")
            .with_details(json!({ "path": in_path.to_string_lossy() })));
    }

    // Release the live handle before the file underneath it is replaced.
    state.db = None;
    let import = backup::import_workspace_bundle(&in_path, &workspace);

    // Reopen whatever is on disk now: the restored file, or the previous one on failure.
    let conn = db::open_db(&workspace)
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;
    state.db = Some(conn);

    let import = import.map_err(|e| io_failed(format!("{e:#}"), &in_path))?;
    tracing::info!(path = %in_path.to_string_lossy(), "workspace bundle imported");
    Ok(json!({
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected,
        "dbSha256": import.db_sha256,
    }))
}

fn export_statements_csv(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let out_path = PathBuf::from(required_str(params, "outPath")?);
    let from = optional_date(params, "from")?;
    let to = optional_date(params, "to")?;
    let kind = optional_str(params, "kind")?
        .map(|k| one_of("kind", k, KINDS))
        .transpose()?;

    let mut stmt = conn.prepare(
        "SELECT date, kind, description, category, amount, reference FROM account_statements
         WHERE (?1 IS NULL OR date >= ?1)
           AND (?2 IS NULL OR date <= ?2)
           AND (?3 IS NULL OR kind = ?3)
         ORDER BY date, created_at",
    )?;
    let rows = stmt
        .query_map((&from, &to, &kind), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, f64>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut csv = String::from("date,kind,category,description,amount,reference,balance\n");
    let mut running = 0.0;
    for (date, kind, description, category, amount, reference) in &rows {
        if kind == "credit" {
            running += amount;
        } else {
            running -= amount;
        }
        csv.push_str(&format!(
            "{},{},{},{},{:.2},{},{:.2}\n",
            date,
            kind,
            csv_quote(category.as_deref().unwrap_or("")),
            csv_quote(description),
            amount,
            csv_quote(reference.as_deref().unwrap_or("")),
            running
        ));
    }

    write_csv(&out_path, csv)?;
    Ok(json!({ "rowsExported": rows.len(), "path": out_path.to_string_lossy() }))
}

fn export_salary_sheet_csv(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let out_path = PathBuf::from(required_str(params, "outPath")?);
    let month = required_month(params, "month")?;

    let mut stmt = conn.prepare(
        "SELECT s.name, s.designation, p.fixed, p.bonus, p.deduction, p.paid_on, p.method
         FROM salary_payments p JOIN staff s ON s.id = p.staff_id
         WHERE p.month = ?
         ORDER BY s.name",
    )?;
    let rows = stmt
        .query_map([&month], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, f64>(3)?,
                r.get::<_, f64>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, Option<String>>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut csv = String::from("name,designation,fixed,bonus,deduction,net,paid_on,method\n");
    for (name, designation, fixed, bonus, deduction, paid_on, method) in &rows {
        let net = PayComponent {
            fixed: *fixed,
            bonus: *bonus,
            deduction: *deduction,
        }
        .net();
        csv.push_str(&format!(
            "{},{},{:.2},{:.2},{:.2},{:.2},{},{}\n",
            csv_quote(name),
            csv_quote(designation),
            fixed,
            bonus,
            deduction,
            net,
            paid_on,
            csv_quote(method.as_deref().unwrap_or(""))
        ));
    }

    write_csv(&out_path, csv)?;
    Ok(json!({ "month": month, "rowsExported": rows.len(), "path": out_path.to_string_lossy() }))
}

fn write_csv(out: &Path, csv: String) -> Result<(), HandlerErr> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_failed(e, out))?;
    }
    std::fs::write(out, csv).map_err(|e| io_failed(e, out))
}

fn respond<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&mut AppState, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    match f(state, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            tracing::warn!(method = %req.method, code = e.code, "{}", e.message);
            e.response(&req.id)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(respond(state, req, export_bundle)),
        "backup.importWorkspaceBundle" => Some(respond(state, req, import_bundle)),
        "exchange.exportStatementsCsv" => Some(with_conn(state, req, export_statements_csv)),
        "exchange.exportSalarySheetCsv" => Some(with_conn(state, req, export_salary_sheet_csv)),
        _ => None,
    }
}
