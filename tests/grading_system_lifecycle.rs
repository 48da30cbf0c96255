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

/// Selects a fresh workspace and creates the bootstrap admin. Returns the
/// admin's user id for use as actorUserId in subsequent requests.
fn setup_admin(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "setup-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        stdin,
        reader,
        "setup-admin",
        "users.create",
        json!({
            "firstName": "Ada",
            "lastName": "Reyes",
            "email": "ada.reyes@example.edu",
            "role": "admin",
        }),
    );
    created
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("admin userId")
        .to_string()
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

#[test]
fn create_within_guidelines_persists_without_total_check() {
    let workspace = temp_dir("sisadmin-gs-create");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = setup_admin(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "guidelines.applyDefaults",
        json!({ "actorUserId": admin }),
    );

    // Total is 60%, deliberately short of 100%: the create path accepts it
    // as long as every weight sits inside its guideline band.
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "gradingSystems.create",
        json!({
            "actorUserId": admin,
            "name": "Lecture Standard",
            "passingGrade": 60.0,
            "criteria": [
                { "name": "Mid-Term Examinations", "weight": 25.0 },
                { "name": "Final Examinations", "weight": 35.0 },
            ],
        }),
    );
    let system_id = created
        .get("gradingSystemId")
        .and_then(|v| v.as_str())
        .expect("gradingSystemId")
        .to_string();

    let listed = request_ok(&mut stdin, &mut reader, "3", "gradingSystems.list", json!({}));
    let systems = listed.get("systems").and_then(|v| v.as_array()).expect("systems");
    assert_eq!(systems.len(), 1);
    assert_eq!(
        systems[0].get("id").and_then(|v| v.as_str()),
        Some(system_id.as_str())
    );
    assert_eq!(systems[0].get("totalWeight").and_then(|v| v.as_f64()), Some(60.0));
    let criteria = systems[0]
        .get("criteria")
        .and_then(|v| v.as_array())
        .expect("criteria");
    assert_eq!(criteria.len(), 2);
    // Both weights sit inside their guideline bands.
    for c in criteria {
        assert_eq!(c.get("withinGuideline").and_then(|v| v.as_bool()), Some(true));
    }
}

#[test]
fn guideline_violation_rolls_back_the_whole_submission() {
    let workspace = temp_dir("sisadmin-gs-rollback");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = setup_admin(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "guidelines.applyDefaults",
        json!({ "actorUserId": admin }),
    );

    // "Assignments, Short Quizzes" is bounded 5-10% by the defaults.
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "gradingSystems.create",
        json!({
            "actorUserId": admin,
            "name": "Broken Weights",
            "passingGrade": 60.0,
            "criteria": [
                { "name": "Mid-Term Examinations", "weight": 25.0 },
                { "name": "Assignments, Short Quizzes", "weight": 50.0 },
            ],
        }),
    );
    assert_eq!(error_code(&resp), "validation_failed");
    let msg = error_message(&resp);
    assert!(msg.contains("Assignments, Short Quizzes"), "message: {}", msg);
    assert!(msg.contains("between 5% and 10%"), "message: {}", msg);

    // Nothing from the failed submission survives.
    let listed = request_ok(&mut stdin, &mut reader, "3", "gradingSystems.list", json!({}));
    let systems = listed.get("systems").and_then(|v| v.as_array()).expect("systems");
    assert!(systems.is_empty(), "rollback left systems behind: {:?}", systems);
}

#[test]
fn update_enforces_the_total_and_preserves_prior_criteria_on_failure() {
    let workspace = temp_dir("sisadmin-gs-update");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = setup_admin(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "gradingSystems.create",
        json!({
            "actorUserId": admin,
            "name": "Standard",
            "passingGrade": 60.0,
            "criteria": [
                { "name": "Midterm", "weight": 40.0 },
                { "name": "Final", "weight": 60.0 },
            ],
        }),
    );
    let system_id = created
        .get("gradingSystemId")
        .and_then(|v| v.as_str())
        .expect("gradingSystemId")
        .to_string();

    // Update totalling 80% is rejected outright.
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "gradingSystems.update",
        json!({
            "actorUserId": admin,
            "gradingSystemId": system_id,
            "name": "Standard",
            "passingGrade": 60.0,
            "criteria": [
                { "name": "Midterm", "weight": 40.0 },
                { "name": "Final", "weight": 40.0 },
            ],
        }),
    );
    assert_eq!(error_code(&resp), "validation_failed");
    assert!(
        error_message(&resp).contains("Total weights must equal 100%"),
        "message: {}",
        error_message(&resp)
    );

    // The original criteria are untouched.
    let listed = request_ok(&mut stdin, &mut reader, "3", "gradingSystems.list", json!({}));
    let systems = listed.get("systems").and_then(|v| v.as_array()).expect("systems");
    assert_eq!(systems.len(), 1);
    assert_eq!(systems[0].get("totalWeight").and_then(|v| v.as_f64()), Some(100.0));

    // A well-formed update that sums to exactly 100% replaces the set.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "gradingSystems.update",
        json!({
            "actorUserId": admin,
            "gradingSystemId": created.get("gradingSystemId"),
            "name": "Standard v2",
            "passingGrade": 65.0,
            "criteria": [
                { "name": "Midterm", "weight": 30.0 },
                { "name": "Final", "weight": 50.0 },
                { "name": "Quizzes", "weight": 20.0 },
            ],
        }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "5", "gradingSystems.list", json!({}));
    let systems = listed.get("systems").and_then(|v| v.as_array()).expect("systems");
    assert_eq!(systems[0].get("name").and_then(|v| v.as_str()), Some("Standard v2"));
    let criteria = systems[0]
        .get("criteria")
        .and_then(|v| v.as_array())
        .expect("criteria");
    assert_eq!(criteria.len(), 3);
}

#[test]
fn delete_is_blocked_while_a_class_references_the_system() {
    let workspace = temp_dir("sisadmin-gs-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = setup_admin(&mut stdin, &mut reader, &workspace);

    let instructor = request_ok(
        &mut stdin,
        &mut reader,
        "1",
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

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({
            "actorUserId": admin,
            "courseCode": "CS101",
            "courseName": "Intro to Computing",
            "lectureUnits": 3,
        }),
    );
    let course_id = course
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();

    let system = request_ok(
        &mut stdin,
        &mut reader,
        "3",
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
    );
    let system_id = system
        .get("gradingSystemId")
        .and_then(|v| v.as_str())
        .expect("gradingSystemId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({
            "actorUserId": admin,
            "courseId": course_id,
            "instructorId": instructor_id,
            "gradingSystemId": system_id,
            "semester": "1st",
            "academicYear": "2026-2027",
        }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "gradingSystems.delete",
        json!({ "actorUserId": admin, "gradingSystemId": system_id }),
    );
    assert_eq!(error_code(&resp), "in_use");
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("details"))
            .and_then(|d| d.get("count"))
            .and_then(|c| c.as_i64()),
        Some(1)
    );

    // Still listed, criteria intact.
    let listed = request_ok(&mut stdin, &mut reader, "6", "gradingSystems.list", json!({}));
    let systems = listed.get("systems").and_then(|v| v.as_array()).expect("systems");
    assert_eq!(systems.len(), 1);
    assert_eq!(systems[0].get("classCount").and_then(|v| v.as_i64()), Some(1));
}

#[test]
fn non_admin_actor_is_rejected() {
    let workspace = temp_dir("sisadmin-gs-forbidden");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = setup_admin(&mut stdin, &mut reader, &workspace);

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "users.create",
        json!({
            "actorUserId": admin,
            "firstName": "Cora",
            "lastName": "Lim",
            "email": "cora.lim@example.edu",
            "role": "student",
        }),
    );
    let student_user_id = student
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("student userId");

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "gradingSystems.create",
        json!({
            "actorUserId": student_user_id,
            "name": "Nope",
            "passingGrade": 60.0,
            "criteria": [{ "name": "Final", "weight": 100.0 }],
        }),
    );
    assert_eq!(error_code(&resp), "forbidden");
}
