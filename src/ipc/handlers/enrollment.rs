use crate::db;
use crate::enroll::{self, TargetMode};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_admin, str_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::notify;
use rusqlite::Connection;
use serde_json::json;

fn no_workspace() -> HandlerErr {
    HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".into(),
        details: None,
    }
}

/// Decodes the targeting mode from a params object. All input rules are
/// applied here, before any query runs: a malformed filter is a bad_params
/// error, never an empty result.
pub fn parse_target_mode(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<TargetMode, HandlerErr> {
    let mode = params
        .get("mode")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing mode"))?;

    match mode {
        "block" => {
            let program = params
                .get("program")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string();
            let year_level = params
                .get("yearLevel")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            if program.is_empty() || year_level < 1 {
                return Err(HandlerErr::bad_params("Select program and year level."));
            }
            Ok(TargetMode::Block {
                program,
                year_level,
            })
        }
        "section" => {
            // Section targeting exists only when the student schema carries a
            // section attribute.
            let has_section = db::table_has_column(conn, "students", "section")
                .map_err(|e| HandlerErr::db("db_query_failed", e))?;
            if !has_section {
                return Err(HandlerErr::bad_params(
                    "Section targeting is not available for this workspace.",
                ));
            }
            let section = params
                .get("section")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string();
            if section.is_empty() {
                return Err(HandlerErr::bad_params("Select a section."));
            }
            Ok(TargetMode::Section { section })
        }
        "name" => {
            let query = params
                .get("query")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string();
            if query.is_empty() {
                return Err(HandlerErr::bad_params("Enter a name to search."));
            }
            Ok(TargetMode::Name { query })
        }
        other => Err(HandlerErr::bad_params(format!("unknown mode: {}", other))),
    }
}

fn handle_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mode = match parse_target_mode(conn, &req.params) {
        Ok(m) => m,
        Err(e) => return e.response(&req.id),
    };
    let targets = match enroll::resolve_target_students(conn, &mode) {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut students = Vec::new();
    for t in &targets {
        let name: Result<String, _> = conn.query_row(
            "SELECT first_name || ' ' || last_name FROM users WHERE id = ?",
            [&t.user_id],
            |r| r.get(0),
        );
        students.push(json!({
            "studentId": t.student_id,
            "userId": t.user_id,
            "name": name.unwrap_or_default(),
        }));
    }

    ok(
        &req.id,
        json!({ "matched": targets.len(), "students": students }),
    )
}

fn assign(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let actor = require_admin(conn, req)?;

    let class_id = str_param(req, "classId")?;
    let class = enroll::load_class(conn, &class_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::bad_params("Invalid class selected."))?;

    let mode = parse_target_mode(conn, &req.params)?;
    let targets = enroll::resolve_target_students(conn, &mode)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let outcome = enroll::enroll_students(conn, &class, &targets);
    enroll::notify_instructor_summary(conn, &class, outcome);

    let _ = notify::log_activity(
        conn,
        Some(&actor.user_id),
        "students_assigned",
        &format!(
            "class {}: {} added, {} skipped",
            class.class_code, outcome.added, outcome.skipped
        ),
    );

    Ok(ok(
        &req.id,
        json!({
            "matched": targets.len(),
            "added": outcome.added,
            "skipped": outcome.skipped,
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollment.preview" => Some(handle_preview(state, req)),
        "enrollment.assign" => Some(match assign(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
