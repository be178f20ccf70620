use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_academyd");
    let mut child = Command::new(exe)
        .env("ACADEMYD_LOG", "warn")
        .env_remove("ACADEMYD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn academyd");
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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("academy-router-smoke");
    let bundle_out = workspace.join("smoke-backup.academy.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let methods = [
        ("health", json!({})),
        ("workspace.select", json!({ "path": workspace.to_string_lossy() })),
        ("setup.get", json!({})),
        ("setup.update", json!({ "section": "calendar", "patch": {} })),
        ("classrooms.list", json!({})),
        ("classrooms.create", json!({})),
        ("classrooms.update", json!({})),
        ("classrooms.delete", json!({})),
        ("schedules.list", json!({})),
        ("schedules.create", json!({})),
        ("schedules.update", json!({})),
        ("schedules.delete", json!({})),
        ("holidays.list", json!({})),
        ("holidays.create", json!({})),
        ("holidays.update", json!({})),
        ("holidays.delete", json!({})),
        ("courses.list", json!({})),
        ("courses.open", json!({})),
        ("courses.create", json!({})),
        ("courses.update", json!({})),
        ("courses.delete", json!({})),
        ("courses.setSchedules", json!({})),
        ("students.list", json!({})),
        ("students.create", json!({})),
        ("students.update", json!({})),
        ("students.delete", json!({})),
        ("enrollments.list", json!({})),
        ("enrollments.create", json!({})),
        ("enrollments.cancel", json!({})),
        ("enrollments.delete", json!({})),
        ("sessions.list", json!({})),
        ("sessions.preview", json!({})),
        ("sessions.apply", json!({})),
        ("sessions.update", json!({})),
        ("attendance.list", json!({})),
        ("attendance.update", json!({})),
        ("attendance.courseSummary", json!({})),
        (
            "backup.exportWorkspaceBundle",
            json!({ "outPath": bundle_out.to_string_lossy() }),
        ),
        ("backup.importWorkspaceBundle", json!({})),
    ];

    for (i, (method, params)) in methods.iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &i.to_string(), method, params.clone());
        assert_ne!(
            error_code(&resp),
            "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }

    let unknown = request(&mut stdin, &mut reader, "x", "grades.open", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    drop(stdin);
    let _ = child.wait();
}
