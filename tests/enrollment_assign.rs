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
    let exe = env!("CARGO_BIN_EXE_sisadmind");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sisadmind");
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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
}

fn error_message(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("")
}

/// Everything an assignment test needs: an admin, a class, and three BSCS
/// first-year students (two in section A, one in section B).
struct Fixture {
    admin: String,
    class_id: String,
    instructor_user_id: String,
}

fn setup_fixture(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Fixture {
    let workspace = temp_dir("sisadmin-enroll");
    let _ = request_ok(
        stdin,
        reader,
        "fx-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let admin = request_ok(
        stdin,
        reader,
        "fx-admin",
        "users.create",
        json!({
            "firstName": "Ada",
            "lastName": "Reyes",
            "email": "ada.reyes@example.edu",
            "role": "admin",
        }),
    )
    .get("userId")
    .and_then(|v| v.as_str())
    .expect("admin userId")
    .to_string();

    let students = [
        ("Maria", "Santos", "maria.santos@example.edu", "A"),
        ("Jose", "Garcia", "jose.garcia@example.edu", "A"),
        ("Lena", "Dizon", "lena.dizon@example.edu", "B"),
    ];
    for (i, (first, last, email, section)) in students.iter().enumerate() {
        let _ = request_ok(
            stdin,
            reader,
            &format!("fx-student-{}", i),
            "users.create",
            json!({
                "actorUserId": admin,
                "firstName": first,
                "lastName": last,
                "email": email,
                "role": "student",
                "program": "BSCS",
                "yearLevel": 1,
                "section": section,
            }),
        );
    }

    let instructor = request_ok(
        stdin,
        reader,
        "fx-instructor",
        "users.create",
        json!({
            "actorUserId": admin,
            "firstName": "Ben",
            "lastName": "Cruz",
            "email": "ben.cruz@example.edu",
            "role": "instructor",
        }),
    );
    let instructor_id = instructor
        .get("profileId")
        .and_then(|v| v.as_str())
        .expect("instructor profileId")
        .to_string();
    let instructor_user_id = instructor
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("instructor userId")
        .to_string();

    let course_id = request_ok(
        stdin,
        reader,
        "fx-course",
        "courses.create",
        json!({
            "actorUserId": admin,
            "courseCode": "CS101",
            "courseName": "Intro to Computing",
            "lectureUnits": 3,
        }),
    )
    .get("courseId")
    .and_then(|v| v.as_str())
    .expect("courseId")
    .to_string();

    let system_id = request_ok(
        stdin,
        reader,
        "fx-system",
        "gradingSystems.create",
        json!({
            "actorUserId": admin,
            "name": "Standard",
            "passingGrade": 60.0,
            "criteria": [
                { "name": "Midterm", "weight": 50.0 },
                { "name": "Final", "weight": 50.0 },
            ],
        }),
    )
    .get("gradingSystemId")
    .and_then(|v| v.as_str())
    .expect("gradingSystemId")
    .to_string();

    let class_id = request_ok(
        stdin,
        reader,
        "fx-class",
        "classes.create",
        json!({
            "actorUserId": admin,
            "courseId": course_id,
            "instructorId": instructor_id,
            "gradingSystemId": system_id,
            "semester": "1st",
            "academicYear": "2026-2027",
        }),
    )
    .get("classId")
    .and_then(|v| v.as_str())
    .expect("classId")
    .to_string();

    Fixture {
        admin,
        class_id,
        instructor_user_id,
    }
}

#[test]
fn block_assignment_is_idempotent() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_fixture(&mut stdin, &mut reader);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "enrollment.assign",
        json!({
            "actorUserId": fx.admin,
            "classId": fx.class_id,
            "mode": "block",
            "program": "BSCS",
            "yearLevel": 1,
        }),
    );
    assert_eq!(first.get("matched").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(first.get("added").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(first.get("skipped").and_then(|v| v.as_i64()), Some(0));

    // Re-running the same assignment adds nobody.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "enrollment.assign",
        json!({
            "actorUserId": fx.admin,
            "classId": fx.class_id,
            "mode": "block",
            "program": "BSCS",
            "yearLevel": 1,
        }),
    );
    assert_eq!(second.get("added").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(second.get("skipped").and_then(|v| v.as_i64()), Some(3));

    let classes = request_ok(&mut stdin, &mut reader, "3", "classes.list", json!({}));
    let list = classes.get("classes").and_then(|v| v.as_array()).expect("classes");
    assert_eq!(list[0].get("enrolledCount").and_then(|v| v.as_i64()), Some(3));
}

#[test]
fn malformed_block_filter_is_an_error_not_an_empty_match() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_fixture(&mut stdin, &mut reader);

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "enrollment.assign",
        json!({
            "actorUserId": fx.admin,
            "classId": fx.class_id,
            "mode": "block",
            "program": "",
            "yearLevel": 1,
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");
    assert_eq!(error_message(&resp), "Select program and year level.");

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "enrollment.assign",
        json!({
            "actorUserId": fx.admin,
            "classId": fx.class_id,
            "mode": "section",
            "section": "  ",
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");
    assert_eq!(error_message(&resp), "Select a section.");

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "enrollment.assign",
        json!({
            "actorUserId": fx.admin,
            "classId": fx.class_id,
            "mode": "name",
            "query": "",
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");
    assert_eq!(error_message(&resp), "Enter a name to search.");
}

#[test]
fn section_mode_targets_only_that_section() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_fixture(&mut stdin, &mut reader);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "enrollment.assign",
        json!({
            "actorUserId": fx.admin,
            "classId": fx.class_id,
            "mode": "section",
            "section": "A",
        }),
    );
    assert_eq!(result.get("matched").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(result.get("added").and_then(|v| v.as_i64()), Some(2));
}

#[test]
fn name_search_matches_case_insensitive_substrings() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_fixture(&mut stdin, &mut reader);

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "enrollment.preview",
        json!({ "mode": "name", "query": "santos" }),
    );
    assert_eq!(preview.get("matched").and_then(|v| v.as_i64()), Some(1));
    let students = preview.get("students").and_then(|v| v.as_array()).expect("students");
    assert_eq!(
        students[0].get("name").and_then(|v| v.as_str()),
        Some("Maria Santos")
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "enrollment.assign",
        json!({
            "actorUserId": fx.admin,
            "classId": fx.class_id,
            "mode": "name",
            "query": "maria santos",
        }),
    );
    assert_eq!(result.get("added").and_then(|v| v.as_i64()), Some(1));
}

#[test]
fn no_match_is_a_quiet_zero_not_an_error() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_fixture(&mut stdin, &mut reader);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "enrollment.assign",
        json!({
            "actorUserId": fx.admin,
            "classId": fx.class_id,
            "mode": "block",
            "program": "BSIT",
            "yearLevel": 4,
        }),
    );
    assert_eq!(result.get("matched").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(result.get("added").and_then(|v| v.as_i64()), Some(0));
}

#[test]
fn assignment_notifies_students_and_summarizes_for_the_instructor() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_fixture(&mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "enrollment.assign",
        json!({
            "actorUserId": fx.admin,
            "classId": fx.class_id,
            "mode": "section",
            "section": "B",
        }),
    );

    // Instructor inbox: one from class creation, one batch summary.
    let inbox = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "notifications.list",
        json!({ "userId": fx.instructor_user_id }),
    );
    let notifications = inbox
        .get("notifications")
        .and_then(|v| v.as_array())
        .expect("notifications");
    assert!(notifications.iter().any(|n| {
        n.get("message")
            .and_then(|m| m.as_str())
            .map(|m| m == "Admin assigned 1 students.")
            .unwrap_or(false)
    }), "missing summary notification: {:?}", notifications);

    // The enrolled student got a per-student notification.
    let users = request_ok(&mut stdin, &mut reader, "3", "users.list", json!({}));
    let lena_id = users
        .get("users")
        .and_then(|v| v.as_array())
        .expect("users")
        .iter()
        .find(|u| u.get("lastName").and_then(|v| v.as_str()) == Some("Dizon"))
        .and_then(|u| u.get("id"))
        .and_then(|v| v.as_str())
        .expect("Lena's user id")
        .to_string();
    let inbox = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "notifications.list",
        json!({ "userId": lena_id, "filter": "unread" }),
    );
    assert_eq!(inbox.get("unreadCount").and_then(|v| v.as_i64()), Some(1));
    let notifications = inbox
        .get("notifications")
        .and_then(|v| v.as_array())
        .expect("notifications");
    assert!(notifications[0]
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .starts_with("Enrolled to CS101"));
}
