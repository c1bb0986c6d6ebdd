use crate::db;
use crate::format::Locale;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{HandlerErr, MAX_PAGE_SIZE};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    General,
    Locale,
    Grading,
}

impl SetupSection {
    const ALL: [SetupSection; 3] = [Self::General, Self::Locale, Self::Grading];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "general" => Some(Self::General),
            "locale" => Some(Self::Locale),
            "grading" => Some(Self::Grading),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Locale => "locale",
            Self::Grading => "grading",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::General => "setup.general",
            Self::Locale => "setup.locale",
            Self::Grading => "setup.grading",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::General => json!({
            "schoolName": "",
            "pageSize": 20
        }),
        SetupSection::Locale => json!({
            "locale": "en-IN",
            "currencySymbol": "₹"
        }),
        SetupSection::Grading => json!({
            "passPercent": 40.0
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::General => match k.as_str() {
                "schoolName" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
                }
                "pageSize" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, MAX_PAGE_SIZE)?));
                }
                _ => return Err(format!("unknown general field: {}", k)),
            },
            SetupSection::Locale => match k.as_str() {
                "locale" => {
                    let s = parse_string_max(v, k, 8)?;
                    let Some(locale) = Locale::parse(&s) else {
                        return Err("locale must be one of: en-IN, en-GB, en-US".into());
                    };
                    obj.insert(k.clone(), Value::String(locale.as_str().to_string()));
                }
                "currencySymbol" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 8)?));
                }
                _ => return Err(format!("unknown locale field: {}", k)),
            },
            SetupSection::Grading => match k.as_str() {
                "passPercent" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 100.0)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // A saved section that no longer validates is replaced by the defaults as a whole.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), "ignoring saved setup: {}", msg);
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

fn load(conn: &Connection, section: SetupSection) -> Result<Value, HandlerErr> {
    load_section(conn, section).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

pub fn page_size(conn: &Connection) -> Result<i64, HandlerErr> {
    Ok(load(conn, SetupSection::General)?
        .get("pageSize")
        .and_then(|v| v.as_i64())
        .unwrap_or(20))
}

#[derive(Debug, Clone)]
pub struct LocaleSettings {
    pub locale: Locale,
    pub currency_symbol: String,
}

pub fn locale_settings(conn: &Connection) -> Result<LocaleSettings, HandlerErr> {
    let v = load(conn, SetupSection::Locale)?;
    Ok(LocaleSettings {
        locale: v
            .get("locale")
            .and_then(|s| s.as_str())
            .and_then(Locale::parse)
            .unwrap_or(Locale::EnIn),
        currency_symbol: v
            .get("currencySymbol")
            .and_then(|s| s.as_str())
            .unwrap_or("")
            .to_string(),
    })
}

pub fn pass_percent(conn: &Connection) -> Result<f64, HandlerErr> {
    Ok(load(conn, SetupSection::Grading)?
        .get("passPercent")
        .and_then(|v| v.as_f64())
        .unwrap_or(40.0))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let only = match req.params.get("section").and_then(|v| v.as_str()) {
        Some(raw) => match SetupSection::parse(raw) {
            Some(s) => Some(s),
            None => return err(&req.id, "bad_params", "unknown section", None),
        },
        None => None,
    };

    let mut out = Map::new();
    for section in SetupSection::ALL {
        if only.is_some_and(|s| s.name() != section.name()) {
            continue;
        }
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "setup updated");
    ok(&req.id, json!({ section.name(): current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
