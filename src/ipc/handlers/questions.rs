use crate::db;
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    db_err, delete_by_id, fetch_page, has, non_negative, one_of, optional_f64, optional_str,
    parse_page, patch_object, require_exists, required_str, with_conn, Filter, HandlerErr,
    Updates,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const KINDS: &[&str] = &["mcq", "short", "long", "true_false"];
const DIFFICULTIES: &[&str] = &["easy", "medium", "hard"];
const COLUMNS: &str = "id, chapter_id, class_name, subject, kind, text, options_json, answer, marks, difficulty, created_at, updated_at";

fn question_json(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let options_raw: String = r.get(6)?;
    let options: serde_json::Value =
        serde_json::from_str(&options_raw).unwrap_or_else(|_| json!([]));
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "chapterId": r.get::<_, Option<String>>(1)?,
        "className": r.get::<_, String>(2)?,
        "subject": r.get::<_, String>(3)?,
        "kind": r.get::<_, String>(4)?,
        "text": r.get::<_, String>(5)?,
        "options": options,
        "answer": r.get::<_, Option<String>>(7)?,
        "marks": r.get::<_, f64>(8)?,
        "difficulty": r.get::<_, String>(9)?,
        "createdAt": r.get::<_, String>(10)?,
        "updatedAt": r.get::<_, String>(11)?,
    }))
}

#[derive(Debug, Clone, PartialEq)]
struct QuestionBody {
    kind: String,
    options: Vec<String>,
    answer: Option<String>,
}

fn parse_options(params: &serde_json::Value) -> Result<Vec<String>, HandlerErr> {
    match params.get("options") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| HandlerErr::bad_params("options must be non-empty strings"))
            })
            .collect(),
        Some(_) => Err(HandlerErr::bad_params("options must be an array")),
    }
}

/// Kind-specific shape rules: MCQs need two or more distinct options and an
/// answer drawn from them; true/false answers are normalized; other kinds
/// carry no options.
fn validate_body(body: QuestionBody) -> Result<QuestionBody, HandlerErr> {
    match body.kind.as_str() {
        "mcq" => {
            if body.options.len() < 2 {
                return Err(HandlerErr::bad_params("mcq needs at least 2 options"));
            }
            let mut seen = std::collections::HashSet::new();
            if !body.options.iter().all(|o| seen.insert(o.to_lowercase())) {
                return Err(HandlerErr::bad_params("mcq options must be distinct"));
            }
            match &body.answer {
                Some(a) if body.options.contains(a) => Ok(body),
                _ => Err(HandlerErr::bad_params("mcq answer must be one of the options")
                    .with_details(json!({ "options": body.options }))),
            }
        }
        "true_false" => {
            let answer = match body.answer.as_deref().map(|a| a.to_ascii_lowercase()) {
                Some(a) if a == "true" || a == "false" => a,
                _ => return Err(HandlerErr::bad_params("true_false answer must be true or false")),
            };
            Ok(QuestionBody {
                kind: body.kind,
                options: Vec::new(),
                answer: Some(answer),
            })
        }
        _ => {
            if !body.options.is_empty() {
                return Err(HandlerErr::bad_params(format!(
                    "{} questions take no options",
                    body.kind
                )));
            }
            Ok(body)
        }
    }
}

fn check_chapter(conn: &Connection, chapter_id: &Option<String>) -> Result<(), HandlerErr> {
    match chapter_id {
        Some(id) => require_exists(conn, "chapters", id, "chapter"),
        None => Ok(()),
    }
}

fn questions_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let page = parse_page(params, setup::page_size(conn)?)?;
    let kind = optional_str(params, "kind")?
        .map(|k| one_of("kind", k, KINDS))
        .transpose()?;
    let difficulty = optional_str(params, "difficulty")?
        .map(|d| one_of("difficulty", d, DIFFICULTIES))
        .transpose()?;
    let mut filter = Filter::default();
    filter
        .search(&["text", "answer"], optional_str(params, "search")?)
        .eq("chapter_id", optional_str(params, "chapterId")?)
        .eq("class_name", optional_str(params, "className")?)
        .eq("subject", optional_str(params, "subject")?)
        .eq("kind", kind)
        .eq("difficulty", difficulty);
    fetch_page(
        conn,
        "questions",
        COLUMNS,
        "created_at DESC, id",
        &filter,
        page,
        question_json,
    )
}

fn questions_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let chapter_id = optional_str(params, "chapterId")?;
    check_chapter(conn, &chapter_id)?;
    let class_name = required_str(params, "className")?;
    let subject = required_str(params, "subject")?;
    let text = required_str(params, "text")?;
    let body = validate_body(QuestionBody {
        kind: one_of("kind", required_str(params, "kind")?, KINDS)?,
        options: parse_options(params)?,
        answer: optional_str(params, "answer")?,
    })?;
    let marks = non_negative("marks", optional_f64(params, "marks")?.unwrap_or(1.0))?;
    let difficulty = one_of(
        "difficulty",
        optional_str(params, "difficulty")?.unwrap_or_else(|| "medium".to_string()),
        DIFFICULTIES,
    )?;

    let id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO questions(id, chapter_id, class_name, subject, kind, text, options_json, answer, marks, difficulty, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &chapter_id,
            &class_name,
            &subject,
            &body.kind,
            &text,
            json!(body.options).to_string(),
            &body.answer,
            marks,
            &difficulty,
            &now,
            &now,
        ),
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "questionId": id }))
}

fn questions_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "questionId")?;
    let patch = patch_object(params)?;

    let current: Option<(String, String, Option<String>)> = conn
        .query_row(
            "SELECT kind, options_json, answer FROM questions WHERE id = ?",
            [&id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((kind, options_raw, answer)) = current else {
        return Err(HandlerErr::not_found("question"));
    };

    let mut updates = Updates::default();
    if has(patch, "chapterId") {
        let chapter_id = optional_str(patch, "chapterId")?;
        check_chapter(conn, &chapter_id)?;
        updates.set("chapter_id", chapter_id.map(Value::Text).unwrap_or(Value::Null));
    }
    for (key, column) in [("className", "class_name"), ("subject", "subject"), ("text", "text")] {
        if has(patch, key) {
            updates.set(column, Value::Text(required_str(patch, key)?));
        }
    }
    if let Some(marks) = optional_f64(patch, "marks")? {
        updates.set("marks", Value::Real(non_negative("marks", marks)?));
    }
    if has(patch, "difficulty") {
        let d = one_of("difficulty", required_str(patch, "difficulty")?, DIFFICULTIES)?;
        updates.set("difficulty", Value::Text(d));
    }

    // Kind, options and answer are validated together against the merged record.
    if has(patch, "kind") || has(patch, "options") || has(patch, "answer") {
        let merged = QuestionBody {
            kind: if has(patch, "kind") {
                one_of("kind", required_str(patch, "kind")?, KINDS)?
            } else {
                kind
            },
            options: if has(patch, "options") {
                parse_options(patch)?
            } else {
                serde_json::from_str(&options_raw).unwrap_or_default()
            },
            answer: if has(patch, "answer") {
                optional_str(patch, "answer")?
            } else {
                answer
            },
        };
        let body = validate_body(merged)?;
        updates.set("kind", Value::Text(body.kind));
        updates.set("options_json", Value::Text(json!(body.options).to_string()));
        updates.set("answer", body.answer.map(Value::Text).unwrap_or(Value::Null));
    }

    updates.apply(conn, "questions", &id, "question")?;
    Ok(json!({ "questionId": id }))
}

fn questions_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "questionId")?;
    delete_by_id(conn, "questions", &id, "question")?;
    Ok(json!({ "deleted": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "questions.list" => Some(with_conn(state, req, questions_list)),
        "questions.create" => Some(with_conn(state, req, questions_create)),
        "questions.update" => Some(with_conn(state, req, questions_update)),
        "questions.delete" => Some(with_conn(state, req, questions_delete)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(kind: &str, options: &[&str], answer: Option<&str>) -> QuestionBody {
        QuestionBody {
            kind: kind.to_string(),
            options: options.iter().map(|s| s.to_string()).collect(),
            answer: answer.map(|s| s.to_string()),
        }
    }

    #[test]
    fn mcq_answer_must_be_an_option() {
        assert!(validate_body(body("mcq", &["2", "4"], Some("4"))).is_ok());
        assert!(validate_body(body("mcq", &["2", "4"], Some("5"))).is_err());
        assert!(validate_body(body("mcq", &["4"], Some("4"))).is_err());
        assert!(validate_body(body("mcq", &["Four", "four"], Some("Four"))).is_err());
    }

    #[test]
    fn true_false_answer_is_normalized() {
        let b = validate_body(body("true_false", &[], Some("TRUE"))).expect("valid");
        assert_eq!(b.answer.as_deref(), Some("true"));
        assert!(validate_body(body("true_false", &[], Some("maybe"))).is_err());
    }

    #[test]
    fn written_answers_take_no_options() {
        assert!(validate_body(body("short", &[], None)).is_ok());
        assert!(validate_body(body("long", &["a", "b"], None)).is_err());
    }
}
