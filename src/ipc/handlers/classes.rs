use crate::enroll;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::enrollment::parse_target_mode;
use crate::ipc::helpers::{opt_str_param, require_admin, str_param, trimmed_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::notify;
use crate::validate::WEIGHT_TOTAL_TOLERANCE;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn no_workspace() -> HandlerErr {
    HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".into(),
        details: None,
    }
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT c.id, c.class_code, c.semester, c.academic_year, c.schedule, c.room,
                c.max_students, c.status,
                co.course_code, co.course_name,
                u.first_name || ' ' || u.last_name AS instructor_name,
                gs.name AS grading_system_name,
                (SELECT COUNT(*) FROM enrollments e WHERE e.class_id = c.id) AS enrolled_count
         FROM classes c
         JOIN courses co ON co.id = c.course_id
         JOIN instructors i ON i.id = c.instructor_id
         JOIN users u ON u.id = i.user_id
         JOIN grading_systems gs ON gs.id = c.grading_system_id
         ORDER BY c.academic_year DESC, c.semester, co.course_code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "classCode": row.get::<_, String>(1)?,
                "semester": row.get::<_, String>(2)?,
                "academicYear": row.get::<_, String>(3)?,
                "schedule": row.get::<_, Option<String>>(4)?,
                "room": row.get::<_, Option<String>>(5)?,
                "maxStudents": row.get::<_, i64>(6)?,
                "status": row.get::<_, String>(7)?,
                "courseCode": row.get::<_, String>(8)?,
                "courseName": row.get::<_, String>(9)?,
                "instructorName": row.get::<_, String>(10)?,
                "gradingSystemName": row.get::<_, String>(11)?,
                "enrolledCount": row.get::<_, i64>(12)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Class creation is where the create-path 100%-total check finally lands:
/// a grading system whose criteria do not sum to 100% cannot be attached.
fn create_class(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let actor = require_admin(conn, req)?;

    let course_id = str_param(req, "courseId")?;
    let instructor_id = str_param(req, "instructorId")?;
    let grading_system_id = str_param(req, "gradingSystemId")?;
    let semester = trimmed_param(req, "semester")?;
    let academic_year = trimmed_param(req, "academicYear")?;
    let schedule = opt_str_param(req, "schedule");
    let room = opt_str_param(req, "room");
    let max_students = req
        .params
        .get("maxStudents")
        .and_then(|v| v.as_i64())
        .unwrap_or(40);
    if max_students <= 0 {
        return Err(HandlerErr::bad_params(
            "Max students must be greater than 0.",
        ));
    }

    let course_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if course_exists.is_none() {
        return Err(HandlerErr::bad_params("Select a course."));
    }

    let instructor_user_id: Option<String> = conn
        .query_row(
            "SELECT user_id FROM instructors WHERE id = ?",
            [&instructor_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some(instructor_user_id) = instructor_user_id else {
        return Err(HandlerErr::bad_params("Select an instructor."));
    };

    let system_exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM grading_systems WHERE id = ?",
            [&grading_system_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if system_exists.is_none() {
        return Err(HandlerErr::bad_params("Select a grading system."));
    }

    let total_weight: f64 = conn
        .query_row(
            "SELECT COALESCE(SUM(weight), 0) FROM grading_criteria WHERE grading_system_id = ?",
            [&grading_system_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if (total_weight - 100.0).abs() > WEIGHT_TOTAL_TOLERANCE {
        return Err(HandlerErr::validation(
            format!(
                "Selected grading system weights must total 100%. Current total: {:.2}%",
                total_weight
            ),
            Some(json!({ "totalWeight": total_weight })),
        ));
    }

    // Validate the optional enrollment block before anything persists so a
    // malformed filter leaves no half-created class behind.
    let enroll_mode = match req.params.get("enroll") {
        Some(block) => Some(parse_target_mode(conn, block)?),
        None => None,
    };

    // Insert with a temporary unique code, then derive the public class code
    // from the insert rowid.
    let class_id = Uuid::new_v4().to_string();
    let temp_code = format!("P{}", &class_id[..8]);
    conn.execute(
        "INSERT INTO classes(id, course_id, instructor_id, grading_system_id, class_code, semester, academic_year, schedule, room, max_students, status)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active')",
        (
            &class_id,
            &course_id,
            &instructor_id,
            &grading_system_id,
            &temp_code,
            &semester,
            &academic_year,
            &schedule,
            &room,
            max_students,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    let class_code = conn.last_insert_rowid().to_string();
    conn.execute(
        "UPDATE classes SET class_code = ? WHERE id = ?",
        (&class_code, &class_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    let title = format!("Assigned to class {}", class_code);
    let msg = format!(
        "You have been assigned to class {} ({} {}).",
        class_code, semester, academic_year
    );
    let _ = notify::create_notification(
        conn,
        &instructor_user_id,
        &title,
        &msg,
        "success",
        Some("class"),
        Some(&class_id),
    );

    let mut enrollment_summary = None;
    if let Some(mode) = enroll_mode {
        let class = enroll::load_class(conn, &class_id)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?
            .ok_or_else(|| HandlerErr::db("db_query_failed", "class vanished after insert"))?;
        let targets = enroll::resolve_target_students(conn, &mode)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        let outcome = enroll::enroll_students(conn, &class, &targets);
        enroll::notify_instructor_summary(conn, &class, outcome);
        enrollment_summary = Some(json!({
            "matched": targets.len(),
            "added": outcome.added,
            "skipped": outcome.skipped,
        }));
    }

    let _ = notify::log_activity(
        conn,
        Some(&actor.user_id),
        "class_created",
        &format!("{} ({} {})", class_code, semester, academic_year),
    );

    Ok(ok(
        &req.id,
        json!({
            "classId": class_id,
            "classCode": class_code,
            "enrollment": enrollment_summary,
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(match create_class(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
