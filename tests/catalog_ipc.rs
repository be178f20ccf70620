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

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn requests_before_workspace_select_are_rejected() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(&mut stdin, &mut reader, "1", "courses.list", json!({}));
    assert_eq!(error_code(&resp), "no_workspace");
    let health = request_ok(&mut stdin, &mut reader, "2", "health", json!({}));
    assert_eq!(health["workspacePath"], json!(null));
}

#[test]
fn schedules_validate_weekday_and_time_window() {
    let workspace = temp_dir("academy-catalog-schedules");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let bad_day = request(
        &mut stdin,
        &mut reader,
        "2",
        "schedules.create",
        json!({ "weekday": "Funday", "startTime": "16:00", "endTime": "17:00" }),
    );
    assert_eq!(error_code(&bad_day), "bad_params");
    let reversed = request(
        &mut stdin,
        &mut reader,
        "3",
        "schedules.create",
        json!({ "weekday": "tue", "startTime": "18:00", "endTime": "17:00" }),
    );
    assert_eq!(error_code(&reversed), "bad_params");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedules.create",
        json!({ "weekday": "tue", "startTime": "16:00", "endTime": "17:00" }),
    );
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedules.update",
        json!({ "scheduleId": created["scheduleId"], "patch": { "weekday": "Thursday" } }),
    );
    assert_eq!(updated["schedule"]["weekday"], json!("thursday"));

    let listed = request_ok(&mut stdin, &mut reader, "6", "schedules.list", json!({}));
    assert_eq!(listed["schedules"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn holidays_accept_valid_specs_only() {
    let workspace = temp_dir("academy-catalog-holidays");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let missing_end = request(
        &mut stdin,
        &mut reader,
        "2",
        "holidays.create",
        json!({ "name": "Broken", "date": { "type": "range", "startDate": "2024-12-23" } }),
    );
    assert_eq!(error_code(&missing_end), "bad_params");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "holidays.create",
        json!({ "name": "New Year", "date": { "type": "recurring", "day": 1, "month": 1 } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "holidays.update",
        json!({
            "holidayId": created["holidayId"],
            "patch": { "location": "South", "date": { "type": "specific", "day": 2, "month": 1, "year": 2025 } }
        }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "5", "holidays.list", json!({}));
    let holidays = listed["holidays"].as_array().expect("holidays");
    assert_eq!(holidays.len(), 1);
    assert_eq!(holidays[0]["location"], json!("South"));
    assert_eq!(holidays[0]["date"]["type"], json!("specific"));
    assert_eq!(holidays[0]["date"]["year"], json!(2025));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "holidays.delete",
        json!({ "holidayId": created["holidayId"] }),
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "7",
        "holidays.delete",
        json!({ "holidayId": created["holidayId"] }),
    );
    assert_eq!(error_code(&gone), "not_found");
}

#[test]
fn course_lifecycle_and_enrollment_cancel() {
    let workspace = temp_dir("academy-catalog-courses");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let mon = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedules.create",
        json!({ "weekday": "Monday", "startTime": "16:00", "endTime": "17:30" }),
    );
    let wed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedules.create",
        json!({ "weekday": "Wednesday", "startTime": "10:00", "endTime": "11:00" }),
    );
    let bad_dates = request(
        &mut stdin,
        &mut reader,
        "4",
        "courses.create",
        json!({ "name": "Violin", "startDate": "2024-10-31", "endDate": "2024-10-01" }),
    );
    assert_eq!(error_code(&bad_dates), "bad_params");

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "courses.create",
        json!({ "name": "Violin", "startDate": "2024-10-01", "endDate": "2024-10-31" }),
    );
    let course_id = course["courseId"].clone();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "courses.setSchedules",
        json!({ "courseId": course_id, "scheduleIds": [wed["scheduleId"], mon["scheduleId"]] }),
    );
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "courses.open",
        json!({ "courseId": course_id }),
    );
    assert_eq!(
        opened["course"]["scheduleIds"],
        json!([wed["scheduleId"], mon["scheduleId"]])
    );
    assert_eq!(opened["schedules"][0]["weekday"], json!("wednesday"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "courses.update",
        json!({ "courseId": course_id, "patch": { "endDate": null, "teacherId": "t2" } }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "9", "courses.list", json!({}));
    assert_eq!(listed["courses"][0]["endDate"], json!(null));
    assert_eq!(listed["courses"][0]["teacherId"], json!("t2"));

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "students.create",
        json!({ "lastName": "Ruiz", "firstName": "Ana" }),
    );
    let enrollment = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "enrollments.create",
        json!({ "studentId": student["studentId"], "courseId": course_id, "enrollmentDate": "2024-09-15" }),
    );
    let duplicate = request(
        &mut stdin,
        &mut reader,
        "12",
        "enrollments.create",
        json!({ "studentId": student["studentId"], "courseId": course_id }),
    );
    assert_eq!(error_code(&duplicate), "bad_params");

    let too_early = request(
        &mut stdin,
        &mut reader,
        "13",
        "enrollments.cancel",
        json!({ "enrollmentId": enrollment["enrollmentId"], "cancellationDate": "2024-09-01" }),
    );
    assert_eq!(error_code(&too_early), "bad_params");
    let cancelled = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "enrollments.cancel",
        json!({ "enrollmentId": enrollment["enrollmentId"], "cancellationDate": "2024-10-15" }),
    );
    assert_eq!(cancelled["cancellationDate"], json!("2024-10-15"));

    let enrollments = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "enrollments.list",
        json!({ "courseId": course_id }),
    );
    assert_eq!(enrollments["enrollments"][0]["studentName"], json!("Ruiz, Ana"));
    assert_eq!(enrollments["enrollments"][0]["cancellationDate"], json!("2024-10-15"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "courses.delete",
        json!({ "courseId": course_id }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "17", "courses.list", json!({}));
    assert_eq!(listed["courses"], json!([]));
    let students = request_ok(&mut stdin, &mut reader, "18", "students.list", json!({}));
    assert_eq!(students["students"][0]["enrollmentCount"], json!(0));
}

#[test]
fn setup_sections_shape_generation_and_placeholders() {
    let workspace = temp_dir("academy-catalog-setup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let defaults = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(defaults["calendar"]["pastSessionsDone"], json!(true));
    assert_eq!(defaults["attendance"]["autoMarkPresent"], json!(true));
    assert_eq!(defaults["attendance"]["defaultLate"], json!("No"));

    let bad = request(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "attendance", "patch": { "defaultLate": "Sometimes" } }),
    );
    assert_eq!(error_code(&bad), "bad_params");
    let unknown = request(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "calendar", "patch": { "weekStartsOn": 1 } }),
    );
    assert_eq!(error_code(&unknown), "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "calendar", "patch": { "pastSessionsDone": false } }),
    );
    let slot = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "schedules.create",
        json!({ "weekday": "Monday", "startTime": "16:00", "endTime": "17:30" }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "courses.create",
        json!({
            "name": "Piano",
            "startDate": "2024-10-01",
            "endDate": "2024-10-31",
            "scheduleIds": [slot["scheduleId"]]
        }),
    );
    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "sessions.preview",
        json!({ "courseId": course["courseId"], "today": "2024-12-01" }),
    );
    let to_add = preview["toAdd"].as_array().expect("toAdd");
    assert_eq!(to_add.len(), 4);
    assert!(to_add.iter().all(|s| s["status"] == json!("pending")));
}

#[test]
fn importing_a_non_bundle_keeps_the_open_workspace() {
    let workspace = temp_dir("academy-import-keep");
    let text_file = workspace.join("notes.txt");
    std::fs::write(&text_file, "not a bundle").expect("write text file");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "lastName": "Ruiz", "firstName": "Ana" }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "backup.importWorkspaceBundle",
        json!({ "inPath": text_file.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "io_failed");

    let students = request_ok(&mut stdin, &mut reader, "4", "students.list", json!({}));
    let list = students["students"].as_array().expect("students");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["lastName"], json!("Ruiz"));
}
