use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("SCHOOLD_WORKSPACE")
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[test]
fn student_listing_pages_and_filters() {
    let workspace = temp_dir("schoold-students-paging");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    for i in 0..25 {
        let class_name = if i < 20 { "6" } else { "8" };
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({
                "name": format!("Student {:02}", i),
                "className": class_name,
                "rollNo": format!("{:02}", i)
            }),
        );
    }

    let page3 = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.list",
        json!({ "page": 3, "pageSize": 10 }),
    );
    assert_eq!(page3["total"], 25);
    assert_eq!(page3["totalPages"], 3);
    assert_eq!(page3["currentPage"], 3);
    assert_eq!(page3["data"].as_array().map(|v| v.len()), Some(5));

    let default_size = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    assert_eq!(default_size["data"].as_array().map(|v| v.len()), Some(20));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "general", "patch": { "pageSize": 7 } }),
    );
    let configured = request_ok(&mut stdin, &mut reader, "5", "students.list", json!({}));
    assert_eq!(configured["data"].as_array().map(|v| v.len()), Some(7));
    assert_eq!(configured["totalPages"], 4);

    let eighth = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.list",
        json!({ "className": "8" }),
    );
    assert_eq!(eighth["total"], 5);

    let searched = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.list",
        json!({ "search": "student 1" }),
    );
    assert_eq!(searched["total"], 10);

    let literal = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.list",
        json!({ "search": "%" }),
    );
    assert_eq!(literal["total"], 0);

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "9",
            "students.list",
            json!({ "pageSize": 1000 }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "10",
            "setup.update",
            json!({ "section": "general", "patch": { "pageSize": 0 } }),
        ),
        "bad_params"
    );

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "11",
            "students.list",
            json!({ "page": i64::MAX, "pageSize": 20 }),
        ),
        "bad_params"
    );
    let health = request_ok(&mut stdin, &mut reader, "12", "health", json!({}));
    assert!(health["workspacePath"].is_string());
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "students.list",
        json!({ "page": 1, "pageSize": 5 }),
    );
    assert_eq!(after["currentPage"], 1);
    assert_eq!(after["data"].as_array().map(|v| v.len()), Some(5));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn question_bank_validation_and_chapter_detach() {
    let workspace = temp_dir("schoold-question-bank");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let chapter_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "chapters.create",
        json!({ "className": "9", "subject": "Physics", "number": 1, "name": "Motion" }),
    )["chapterId"]
        .as_str()
        .expect("chapterId")
        .to_string();

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "3",
            "questions.create",
            json!({
                "chapterId": chapter_id,
                "className": "9",
                "subject": "Physics",
                "kind": "mcq",
                "text": "Unit of force?",
                "options": ["Newton"],
                "answer": "Newton"
            }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "4",
            "questions.create",
            json!({
                "chapterId": chapter_id,
                "className": "9",
                "subject": "Physics",
                "kind": "mcq",
                "text": "Unit of force?",
                "options": ["Newton", "Joule"],
                "answer": "Watt"
            }),
        ),
        "bad_params"
    );
    let mcq = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "questions.create",
        json!({
            "chapterId": chapter_id,
            "className": "9",
            "subject": "Physics",
            "kind": "mcq",
            "text": "Unit of force?",
            "options": ["Newton", "Joule"],
            "answer": "Newton",
            "difficulty": "easy"
        }),
    )["questionId"]
        .as_str()
        .expect("questionId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "questions.create",
        json!({
            "chapterId": chapter_id,
            "className": "9",
            "subject": "Physics",
            "kind": "true_false",
            "text": "Speed is a vector.",
            "answer": "FALSE"
        }),
    );

    // Changing only the answer is checked against the stored options.
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "7",
            "questions.update",
            json!({ "questionId": mcq, "patch": { "answer": "Pascal" } }),
        ),
        "bad_params"
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "questions.update",
        json!({ "questionId": mcq, "patch": { "answer": "Joule" } }),
    );

    let chapters = request_ok(&mut stdin, &mut reader, "9", "chapters.list", json!({ "className": "9" }));
    assert_eq!(chapters["data"][0]["questionCount"], 2);

    let easy = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "questions.list",
        json!({ "difficulty": "easy" }),
    );
    assert_eq!(easy["total"], 1);
    assert_eq!(easy["data"][0]["answer"], "Joule");
    assert_eq!(easy["data"][0]["options"], json!(["Newton", "Joule"]));

    let tf = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "questions.list",
        json!({ "kind": "true_false" }),
    );
    assert_eq!(tf["data"][0]["answer"], "false");

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "chapters.delete",
        json!({ "chapterId": chapter_id }),
    );
    assert_eq!(deleted["detachedQuestions"], 2);
    let remaining = request_ok(&mut stdin, &mut reader, "13", "questions.list", json!({}));
    assert_eq!(remaining["total"], 2);
    assert!(remaining["data"][0]["chapterId"].is_null());

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "14",
            "chapters.delete",
            json!({ "chapterId": chapter_id }),
        ),
        "not_found"
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn notifications_by_audience_and_read_state() {
    let workspace = temp_dir("schoold-notifications");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let everyone = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "notifications.create",
        json!({ "title": "Holiday", "message": "Closed on Friday" }),
    )["notificationId"]
        .as_str()
        .expect("notificationId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "notifications.create",
        json!({ "title": "Staff meeting", "message": "Room 4 at 3pm", "audience": "teacher" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "notifications.create",
        json!({ "title": "Exam timetable", "message": "Posted on the board", "audience": "student" }),
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "5",
            "notifications.create",
            json!({ "title": "x", "message": "y", "audience": "parents" }),
        ),
        "bad_params"
    );

    let teachers = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "notifications.list",
        json!({ "audience": "teacher" }),
    );
    assert_eq!(teachers["total"], 2);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "notifications.markRead",
        json!({ "notificationId": everyone }),
    );
    let unread = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "notifications.list",
        json!({ "unreadOnly": true }),
    );
    assert_eq!(unread["total"], 2);

    let dashboard = request_ok(&mut stdin, &mut reader, "9", "dashboard.summary", json!({}));
    assert_eq!(dashboard["unreadNotifications"], 2);
    assert_eq!(dashboard["students"], 0);

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "10",
            "notifications.markRead",
            json!({ "notificationId": "missing" }),
        ),
        "not_found"
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
