use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{f64_param, require_admin, str_param, trimmed_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::notify;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

fn no_workspace() -> HandlerErr {
    HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".into(),
        details: None,
    }
}

/// Institutional default weight guidelines and transmutation scale, applied
/// wholesale by guidelines.applyDefaults.
const DEFAULT_GUIDELINES: &[(&str, f64, f64)] = &[
    ("Mid-Term Examinations", 20.0, 30.0),
    ("Final Examinations", 30.0, 40.0),
    ("Long Exams", 15.0, 30.0),
    ("Assignments, Short Quizzes", 5.0, 10.0),
    ("Performance Tests", 5.0, 20.0),
    ("Projects", 5.0, 10.0),
    ("Recitation/ Class Participation", 5.0, 15.0),
];

const DEFAULT_TRANSMUTATION: &[(f64, f64, f64, &str)] = &[
    (97.0, 100.0, 1.0, "Excellent"),
    (93.0, 96.0, 1.25, "Excellent"),
    (89.0, 92.0, 1.5, "Highly Satisfactory"),
    (85.0, 88.0, 1.75, "Highly Satisfactory"),
    (80.0, 84.0, 2.0, "Satisfactory"),
    (75.0, 79.0, 2.25, "Satisfactory"),
    (70.0, 74.0, 2.5, "Fairly Satisfactory"),
    (65.0, 69.0, 2.75, "Fairly Satisfactory"),
    (60.0, 64.0, 3.0, "Passed"),
    (55.0, 59.0, 4.0, "Condition"),
    (0.0, 0.0, 5.0, "Failed"),
];

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, criteria, min_weight, max_weight, is_active, created_at
         FROM grading_criteria_guidelines ORDER BY criteria",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "criteria": row.get::<_, String>(1)?,
                "minWeight": row.get::<_, f64>(2)?,
                "maxWeight": row.get::<_, f64>(3)?,
                "isActive": row.get::<_, i64>(4)? != 0,
                "createdAt": row.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(guidelines) => {
            // Running min/max totals shown as a sanity check on the settings
            // page: a workable set of guidelines should bracket 100%.
            let (mut sum_min, mut sum_max) = (0.0, 0.0);
            for g in &guidelines {
                sum_min += g["minWeight"].as_f64().unwrap_or(0.0);
                sum_max += g["maxWeight"].as_f64().unwrap_or(0.0);
            }
            ok(
                &req.id,
                json!({ "guidelines": guidelines, "sumMin": sum_min, "sumMax": sum_max }),
            )
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn save_guideline(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let actor = require_admin(conn, req)?;

    let criteria = trimmed_param(req, "criteria")?;
    let min_weight = f64_param(req, "minWeight")?;
    let max_weight = f64_param(req, "maxWeight")?;
    let is_active = req
        .params
        .get("isActive")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    if min_weight < 0.0 || max_weight > 100.0 || min_weight > max_weight {
        return Err(HandlerErr::validation("Invalid weight range", None));
    }

    let guideline_id = req
        .params
        .get("guidelineId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    match guideline_id {
        Some(id) => {
            let changed = conn
                .execute(
                    "UPDATE grading_criteria_guidelines
                     SET criteria = ?, min_weight = ?, max_weight = ?, is_active = ?
                     WHERE id = ?",
                    (&criteria, min_weight, max_weight, is_active as i64, &id),
                )
                .map_err(|e| HandlerErr::db("db_update_failed", e))?;
            if changed == 0 {
                return Err(HandlerErr::not_found("guideline not found"));
            }
            let _ = notify::log_activity(conn, Some(&actor.user_id), "guideline_updated", &criteria);
            Ok(ok(&req.id, json!({ "guidelineId": id })))
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO grading_criteria_guidelines(id, criteria, min_weight, max_weight, is_active, created_at)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &criteria,
                    min_weight,
                    max_weight,
                    is_active as i64,
                    Utc::now().to_rfc3339(),
                ),
            )
            .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
            let _ = notify::log_activity(conn, Some(&actor.user_id), "guideline_created", &criteria);
            Ok(ok(&req.id, json!({ "guidelineId": id })))
        }
    }
}

fn delete_guideline(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let actor = require_admin(conn, req)?;

    let guideline_id = str_param(req, "guidelineId")?;

    // A guideline in use by any grading system's criteria (matched on
    // normalized component name) cannot be removed.
    let used_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM grading_criteria gc
             WHERE LOWER(TRIM(gc.component_name)) =
                   (SELECT LOWER(TRIM(criteria)) FROM grading_criteria_guidelines WHERE id = ?)",
            [&guideline_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if used_count > 0 {
        return Err(HandlerErr::in_use(
            "Cannot delete guideline that is being used by existing grading systems",
            used_count,
        ));
    }

    let changed = conn
        .execute(
            "DELETE FROM grading_criteria_guidelines WHERE id = ?",
            [&guideline_id],
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("guideline not found"));
    }

    let _ = notify::log_activity(conn, Some(&actor.user_id), "guideline_deleted", &guideline_id);

    Ok(ok(&req.id, json!({ "ok": true })))
}

fn apply_defaults(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let actor = require_admin(conn, req)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    tx.execute("DELETE FROM grading_criteria_guidelines", [])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.execute("DELETE FROM grading_transmutation_table", [])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;

    for (criteria, min, max) in DEFAULT_GUIDELINES {
        tx.execute(
            "INSERT INTO grading_criteria_guidelines(id, criteria, min_weight, max_weight, is_active, created_at)
             VALUES(?, ?, ?, ?, 1, ?)",
            (
                Uuid::new_v4().to_string(),
                criteria,
                min,
                max,
                Utc::now().to_rfc3339(),
            ),
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    }
    for (min, max, eq, rating) in DEFAULT_TRANSMUTATION {
        tx.execute(
            "INSERT INTO grading_transmutation_table(id, min_percentage, max_percentage, equivalent_grade, descriptive_rating)
             VALUES(?, ?, ?, ?, ?)",
            (Uuid::new_v4().to_string(), min, max, eq, rating),
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    }

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let _ = notify::log_activity(conn, Some(&actor.user_id), "grading_defaults_applied", "");

    Ok(ok(
        &req.id,
        json!({
            "guidelines": DEFAULT_GUIDELINES.len(),
            "transmutationRows": DEFAULT_TRANSMUTATION.len(),
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "guidelines.list" => Some(handle_list(state, req)),
        "guidelines.save" => Some(match save_guideline(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        "guidelines.delete" => Some(match delete_guideline(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        "guidelines.applyDefaults" => Some(match apply_defaults(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
