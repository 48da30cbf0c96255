use crate::ipc::error::{err, ok};
use crate::ipc::handlers::grading::load_stored_ranges;
use crate::ipc::helpers::{f64_param, require_admin, str_param, trimmed_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::notify;
use crate::validate::{validate_transmutation_row, PercentRange};
use serde_json::json;
use uuid::Uuid;

fn no_workspace() -> HandlerErr {
    HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".into(),
        details: None,
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, min_percentage, max_percentage, equivalent_grade, descriptive_rating
         FROM grading_transmutation_table ORDER BY min_percentage DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "minPercentage": row.get::<_, f64>(1)?,
                "maxPercentage": row.get::<_, f64>(2)?,
                "equivalentGrade": row.get::<_, f64>(3)?,
                "descriptiveRating": row.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(ranges) => ok(&req.id, json!({ "ranges": ranges })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Create-or-update of a single row; the edit path excludes the row's own id
/// from the overlap check.
fn save_row(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let actor = require_admin(conn, req)?;

    let min = f64_param(req, "minPercentage")?;
    let max = f64_param(req, "maxPercentage")?;
    let equivalent_grade = f64_param(req, "equivalentGrade")?;
    let descriptive_rating = trimmed_param(req, "descriptiveRating")?;

    if min < 0.0 || max > 100.0 {
        return Err(HandlerErr::validation("Invalid percentage range", None));
    }

    let range_id = req
        .params
        .get("rangeId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let candidate = PercentRange { min, max };
    let stored = load_stored_ranges(conn)?;
    if let Err(v) = validate_transmutation_row(candidate, &stored, range_id.as_deref()) {
        return Err(HandlerErr::validation(v.to_string(), None));
    }

    match range_id {
        Some(id) => {
            let changed = conn
                .execute(
                    "UPDATE grading_transmutation_table
                     SET min_percentage = ?, max_percentage = ?, equivalent_grade = ?, descriptive_rating = ?
                     WHERE id = ?",
                    (min, max, equivalent_grade, &descriptive_rating, &id),
                )
                .map_err(|e| HandlerErr::db("db_update_failed", e))?;
            if changed == 0 {
                return Err(HandlerErr::not_found("transmutation row not found"));
            }
            let _ = notify::log_activity(
                conn,
                Some(&actor.user_id),
                "transmutation_updated",
                &format!("{}-{}", min, max),
            );
            Ok(ok(&req.id, json!({ "rangeId": id })))
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO grading_transmutation_table(id, min_percentage, max_percentage, equivalent_grade, descriptive_rating)
                 VALUES(?, ?, ?, ?, ?)",
                (&id, min, max, equivalent_grade, &descriptive_rating),
            )
            .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
            let _ = notify::log_activity(
                conn,
                Some(&actor.user_id),
                "transmutation_created",
                &format!("{}-{}", min, max),
            );
            Ok(ok(&req.id, json!({ "rangeId": id })))
        }
    }
}

fn delete_row(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let actor = require_admin(conn, req)?;

    let range_id = str_param(req, "rangeId")?;
    let changed = conn
        .execute(
            "DELETE FROM grading_transmutation_table WHERE id = ?",
            [&range_id],
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("transmutation row not found"));
    }

    let _ = notify::log_activity(conn, Some(&actor.user_id), "transmutation_deleted", &range_id);

    Ok(ok(&req.id, json!({ "ok": true })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "transmutation.list" => Some(handle_list(state, req)),
        "transmutation.save" => Some(match save_row(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        "transmutation.delete" => Some(match delete_row(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
