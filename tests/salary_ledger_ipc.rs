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
fn salary_pay_slip_and_sheet() {
    let workspace = temp_dir("schoold-salary");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "staff.create",
        json!({ "name": "Meera", "designation": "Teacher", "baseSalary": 20000 }),
    )["staffId"]
        .as_str()
        .expect("staffId")
        .to_string();
    let clerk = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "staff.create",
        json!({ "name": "Ravi", "designation": "Clerk", "baseSalary": 12000 }),
    )["staffId"]
        .as_str()
        .expect("staffId")
        .to_string();

    let paid = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "salary.pay",
        json!({
            "staffId": teacher,
            "month": "2024-04",
            "bonus": 2000,
            "deduction": 500,
            "method": "bank",
            "paidOn": "2024-04-30"
        }),
    );
    assert_eq!(paid["net"], json!(21500.0));
    let payment_id = paid["paymentId"].as_str().expect("paymentId").to_string();

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "5",
            "salary.pay",
            json!({ "staffId": teacher, "month": "2024-04" }),
        ),
        "duplicate"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "6",
            "salary.pay",
            json!({ "staffId": clerk, "month": "2024-04", "deduction": 30000 }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "7",
            "salary.pay",
            json!({ "staffId": clerk, "month": "2024-04", "bonus": -5 }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "8",
            "salary.pay",
            json!({ "staffId": clerk, "month": "April" }),
        ),
        "bad_params"
    );

    let slip = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "salary.slip",
        json!({ "paymentId": payment_id }),
    );
    assert_eq!(slip["staffName"], "Meera");
    assert_eq!(slip["fixed"], json!(20000.0));
    assert_eq!(slip["net"], json!(21500.0));
    assert_eq!(slip["formatted"]["net"], "₹21,500.00");
    assert_eq!(slip["locale"], "en-IN");

    let sheet = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "salary.sheet",
        json!({ "month": "2024-04" }),
    );
    assert_eq!(sheet["rows"].as_array().map(|v| v.len()), Some(1));
    assert_eq!(sheet["totals"]["count"], 1);
    assert_eq!(sheet["totals"]["net"], json!(21500.0));
    assert_eq!(sheet["unpaid"][0]["name"], "Ravi");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "salary.pay",
        json!({ "staffId": clerk, "month": "2024-05" }),
    );
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "salary.report",
        json!({ "from": "2024-03", "to": "2024-05" }),
    );
    let months = report["months"].as_array().expect("months");
    assert_eq!(months.len(), 3);
    assert_eq!(months[0]["month"], "2024-03");
    assert_eq!(months[0]["count"], 0);
    assert_eq!(months[2]["net"], json!(12000.0));
    assert_eq!(report["totals"]["net"], json!(33500.0));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "setup.update",
        json!({ "section": "locale", "patch": { "locale": "en-US", "currencySymbol": "$" } }),
    );
    let slip = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "salary.slip",
        json!({ "paymentId": payment_id }),
    );
    assert_eq!(slip["formatted"]["net"], "$21,500.00");

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "15",
            "staff.delete",
            json!({ "staffId": teacher }),
        ),
        "in_use"
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "salary.delete",
        json!({ "paymentId": payment_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "staff.delete",
        json!({ "staffId": teacher }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn statements_summary_covers_filtered_set() {
    let workspace = temp_dir("schoold-statements");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let entries = [
        ("2024-04-01", "Tuition fees", "Fees", "credit", 1000.0),
        ("2024-04-03", "Chalk and dusters", "Supplies", "debit", 250.5),
        ("2024-05-02", "Donation", "Other", "credit", 300.0),
    ];
    for (i, (date, description, category, kind, amount)) in entries.iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("e{}", i),
            "statements.create",
            json!({
                "date": date,
                "description": description,
                "category": category,
                "kind": kind,
                "amount": amount
            }),
        );
    }

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "statements.list",
        json!({ "pageSize": 1 }),
    );
    assert_eq!(all["total"], 3);
    assert_eq!(all["totalPages"], 3);
    assert_eq!(all["data"].as_array().map(|v| v.len()), Some(1));
    assert_eq!(all["data"][0]["date"], "2024-05-02");
    assert_eq!(all["summary"]["totalCredit"], json!(1300.0));
    assert_eq!(all["summary"]["totalDebit"], json!(250.5));
    assert_eq!(all["summary"]["balance"], json!(1049.5));
    assert_eq!(all["summary"]["formatted"]["balance"], "₹1,049.50");

    let april = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "statements.list",
        json!({ "from": "2024-04-01", "to": "2024-04-30" }),
    );
    assert_eq!(april["total"], 2);
    assert_eq!(april["summary"]["balance"], json!(749.5));

    let supplies = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "statements.list",
        json!({ "search": "chalk" }),
    );
    assert_eq!(supplies["total"], 1);
    assert_eq!(supplies["summary"]["totalCredit"], json!(0.0));

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "5",
            "statements.create",
            json!({ "date": "2024-04-05", "description": "Nothing", "kind": "debit", "amount": 0 }),
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "6",
            "statements.create",
            json!({ "date": "2024-04-05", "description": "Refund", "kind": "transfer", "amount": 10 }),
        ),
        "bad_params"
    );

    let dashboard = request_ok(&mut stdin, &mut reader, "7", "dashboard.summary", json!({}));
    assert_eq!(dashboard["balance"], json!(1049.5));
    assert_eq!(dashboard["formatted"]["balance"], "₹1,049.50");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
