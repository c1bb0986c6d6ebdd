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
fn attendance_rate_and_bands_over_two_months() {
    let workspace = temp_dir("schoold-attendance");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let regular = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "name": "Kiran", "className": "4", "rollNo": "1" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let irregular = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "name": "Lata", "className": "4", "rollNo": "2" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let _unmarked = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "name": "Mohan", "className": "4", "rollNo": "3" }),
    );

    // 31 days of March plus 4 of April: Kiran misses two, Lata misses every other day.
    let mut dates: Vec<String> = (1..=31).map(|d| format!("2024-03-{:02}", d)).collect();
    dates.extend((1..=4).map(|d| format!("2024-04-{:02}", d)));
    for (i, date) in dates.iter().enumerate() {
        let kiran = if date == "2024-03-10" || date == "2024-03-20" { "A" } else { "P" };
        let lata = if i % 2 == 0 { "P" } else { "A" };
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("m{}", i),
            "attendance.mark",
            json!({
                "date": date,
                "entries": [
                    { "studentId": regular, "status": kiran },
                    { "studentId": irregular, "status": lata }
                ]
            }),
        );
    }

    // Marking the same day again replaces rather than duplicates.
    let remark = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.mark",
        json!({ "date": "2024-04-04", "entries": [{ "studentId": regular, "status": "present" }] }),
    );
    assert_eq!(remark["marked"], 1);

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.studentReport",
        json!({ "studentId": regular }),
    );
    assert_eq!(report["summary"]["present"], 33);
    assert_eq!(report["summary"]["absent"], 2);
    assert_eq!(report["summary"]["total"], 35);
    assert_eq!(report["summary"]["rate"], json!(94.29));
    assert_eq!(report["summary"]["rateText"], "94.29%");
    assert_eq!(report["summary"]["status"], "Good");
    assert_eq!(report["absentDates"], json!(["2024-03-10", "2024-03-20"]));
    let months = report["months"].as_array().expect("months");
    assert_eq!(months.len(), 2);
    assert_eq!(months[1]["month"], "2024-04");
    assert_eq!(months[1]["rate"], json!(100.0));
    assert_eq!(months[1]["status"], "Excellent");

    let april = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.studentReport",
        json!({ "studentId": regular, "from": "2024-04-01", "to": "2024-04-30" }),
    );
    assert_eq!(april["summary"]["total"], 4);

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.classReport",
        json!({ "className": "4" }),
    );
    let rows = class["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1]["attendance"]["present"], 18);
    assert_eq!(rows[1]["attendance"]["status"], "Poor");
    assert!(rows[2]["attendance"]["rate"].is_null());
    assert_eq!(class["statusCounts"]["Good"], 1);
    assert_eq!(class["statusCounts"]["Poor"], 1);
    assert_eq!(class["summary"]["total"], 70);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.list",
        json!({ "date": "2024-03-10" }),
    );
    assert_eq!(listed["total"], 2);

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "10",
            "attendance.mark",
            json!({ "date": "2024-04-05", "entries": [{ "studentId": "nobody", "status": "P" }] }),
        ),
        "not_found"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "11",
            "attendance.mark",
            json!({ "date": "2024-04-05", "entries": [{ "studentId": regular, "status": "L" }] }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "12",
            "attendance.mark",
            json!({
                "date": "2024-04-05",
                "entries": [
                    { "studentId": regular, "status": "P" },
                    { "studentId": regular, "status": "A" }
                ]
            }),
        ),
        "bad_params"
    );
    // A failed batch leaves no partial writes behind.
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "attendance.list",
        json!({ "date": "2024-04-05" }),
    );
    assert_eq!(after["total"], 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
