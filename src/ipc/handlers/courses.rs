use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{opt_str_param, require_admin, str_param, trimmed_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::notify;
use serde_json::json;
use uuid::Uuid;

fn no_workspace() -> HandlerErr {
    HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".into(),
        details: None,
    }
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT c.id, c.course_code, c.course_name, c.description, c.units,
                (SELECT COUNT(*) FROM classes cl WHERE cl.course_id = c.id) AS class_count,
                (SELECT COUNT(*) FROM enrollments e
                   JOIN classes cl ON cl.id = e.class_id
                  WHERE cl.course_id = c.id) AS enrollment_count
         FROM courses c
         ORDER BY c.course_code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "courseCode": row.get::<_, String>(1)?,
                "courseName": row.get::<_, String>(2)?,
                "description": row.get::<_, Option<String>>(3)?,
                "units": row.get::<_, i64>(4)?,
                "classCount": row.get::<_, i64>(5)?,
                "enrollmentCount": row.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn create_course(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let actor = require_admin(conn, req)?;

    let course_code = trimmed_param(req, "courseCode")?;
    let course_name = trimmed_param(req, "courseName")?;
    let description = opt_str_param(req, "description");
    let lecture_units = req
        .params
        .get("lectureUnits")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let laboratory_units = req
        .params
        .get("laboratoryUnits")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let units = lecture_units.max(0) + laboratory_units.max(0);

    let course_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, course_code, course_name, description, units) VALUES(?, ?, ?, ?, ?)",
        (&course_id, &course_code, &course_name, &description, units),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    let _ = notify::log_activity(
        conn,
        Some(&actor.user_id),
        "course_created",
        &format!("{} {}", course_code, course_name),
    );

    Ok(ok(&req.id, json!({ "courseId": course_id, "units": units })))
}

fn update_course(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let actor = require_admin(conn, req)?;

    let course_id = str_param(req, "courseId")?;
    let course_code = trimmed_param(req, "courseCode")?;
    let course_name = trimmed_param(req, "courseName")?;
    let description = opt_str_param(req, "description");
    let units = req
        .params
        .get("units")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    let changed = conn
        .execute(
            "UPDATE courses SET course_code = ?, course_name = ?, description = ?, units = ? WHERE id = ?",
            (&course_code, &course_name, &description, units, &course_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("course not found"));
    }

    let _ = notify::log_activity(
        conn,
        Some(&actor.user_id),
        "course_updated",
        &course_code,
    );

    Ok(ok(&req.id, json!({ "courseId": course_id })))
}

fn delete_course(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let actor = require_admin(conn, req)?;

    let course_id = str_param(req, "courseId")?;

    let class_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM classes WHERE course_id = ?",
            [&course_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if class_count > 0 {
        return Err(HandlerErr::in_use(
            "Cannot delete course with existing classes",
            class_count,
        ));
    }

    let changed = conn
        .execute("DELETE FROM courses WHERE id = ?", [&course_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("course not found"));
    }

    let _ = notify::log_activity(conn, Some(&actor.user_id), "course_deleted", &course_id);

    Ok(ok(&req.id, json!({ "ok": true })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.create" => Some(match create_course(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        "courses.update" => Some(match update_course(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        "courses.delete" => Some(match delete_course(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
