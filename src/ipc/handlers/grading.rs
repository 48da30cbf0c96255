use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{f64_param, require_admin, str_param, trimmed_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::notify;
use crate::validate::{
    validate_criteria_weights, validate_transmutation_batch, validate_transmutation_row,
    CriterionInput, GuidelineRange, PercentRange, StoredRange, WeightTotalRule,
};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn no_workspace() -> HandlerErr {
    HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".into(),
        details: None,
    }
}

struct CriterionRow {
    name: String,
    weight: f64,
    description: String,
}

/// Pulls the submitted criteria, dropping rows whose name is empty (the
/// portal's form always posts a fixed number of rows, some blank).
fn parse_criteria(req: &Request) -> Result<Vec<CriterionRow>, HandlerErr> {
    let Some(items) = req.params.get("criteria").and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for item in items {
        let name = item
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        if name.trim().is_empty() {
            continue;
        }
        let weight = item.get("weight").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let description = item
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        out.push(CriterionRow {
            name,
            weight,
            description,
        });
    }
    Ok(out)
}

struct TransmutationRow {
    range: PercentRange,
    equivalent_grade: f64,
    descriptive_rating: String,
}

/// Rows missing either bound are skipped as incomplete, matching the portal.
fn parse_transmutation(req: &Request) -> Vec<TransmutationRow> {
    let Some(items) = req.params.get("transmutation").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for item in items {
        let min = item.get("minPercentage").and_then(|v| v.as_f64());
        let max = item.get("maxPercentage").and_then(|v| v.as_f64());
        let (Some(min), Some(max)) = (min, max) else {
            continue;
        };
        out.push(TransmutationRow {
            range: PercentRange { min, max },
            equivalent_grade: item
                .get("equivalentGrade")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            descriptive_rating: item
                .get("descriptiveRating")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        });
    }
    out
}

pub fn load_active_guidelines(
    conn: &Connection,
) -> Result<HashMap<String, GuidelineRange>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT LOWER(TRIM(criteria)), min_weight, max_weight
             FROM grading_criteria_guidelines WHERE is_active = 1",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let map = stmt
        .query_map([], |row| {
            let key: String = row.get(0)?;
            let min: f64 = row.get(1)?;
            let max: f64 = row.get(2)?;
            Ok((key, GuidelineRange { min, max }))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(map)
}

pub fn load_stored_ranges(conn: &Connection) -> Result<Vec<StoredRange>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, min_percentage, max_percentage FROM grading_transmutation_table")
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(StoredRange {
                id: row.get(0)?,
                range: PercentRange {
                    min: row.get(1)?,
                    max: row.get(2)?,
                },
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(rows)
}

fn insert_criteria_rows(
    conn: &Connection,
    grading_system_id: &str,
    criteria: &[CriterionRow],
) -> Result<(), HandlerErr> {
    for (i, c) in criteria.iter().enumerate() {
        conn.execute(
            "INSERT INTO grading_criteria(id, grading_system_id, component_name, weight, description, sort_order)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                grading_system_id,
                &c.name,
                c.weight,
                &c.description,
                i as i64,
            ),
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    }
    Ok(())
}

/// Create runs Draft -> ValidatingCriteria -> ValidatingTransmutation ->
/// Persisting inside one transaction; any violation rolls the whole
/// submission back. The 100%-total check is deliberately absent here: the
/// portal defers it to class creation on the create path.
fn create_system(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let actor = require_admin(conn, req)?;

    let name = trimmed_param(req, "name")?;
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let passing_grade = f64_param(req, "passingGrade")?;
    if !(0.0..=100.0).contains(&passing_grade) {
        return Err(HandlerErr::bad_params("passingGrade must be within 0..=100"));
    }

    let criteria = parse_criteria(req)?;
    let transmutation = parse_transmutation(req);
    let guidelines = load_active_guidelines(conn)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    let grading_system_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO grading_systems(id, name, description, passing_grade, created_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &grading_system_id,
            &name,
            &description,
            passing_grade,
            &actor.user_id,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    let inputs: Vec<CriterionInput> = criteria
        .iter()
        .map(|c| CriterionInput {
            name: c.name.clone(),
            weight: c.weight,
        })
        .collect();
    if let Err(violations) =
        validate_criteria_weights(&inputs, &guidelines, WeightTotalRule::Deferred)
    {
        let _ = tx.rollback();
        let joined = violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        return Err(HandlerErr::validation(
            joined,
            Some(json!({ "violations": violations.len() })),
        ));
    }

    insert_criteria_rows(&tx, &grading_system_id, &criteria)?;

    if !transmutation.is_empty() {
        let ranges: Vec<PercentRange> = transmutation.iter().map(|t| t.range).collect();
        if let Err(v) = validate_transmutation_batch(&ranges) {
            let _ = tx.rollback();
            return Err(HandlerErr::validation(v.to_string(), None));
        }
        let stored = load_stored_ranges(&tx)?;
        for t in &transmutation {
            if let Err(v) = validate_transmutation_row(t.range, &stored, None) {
                let _ = tx.rollback();
                return Err(HandlerErr::validation(v.to_string(), None));
            }
            tx.execute(
                "INSERT INTO grading_transmutation_table(id, min_percentage, max_percentage, equivalent_grade, descriptive_rating)
                 VALUES(?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    t.range.min,
                    t.range.max,
                    t.equivalent_grade,
                    &t.descriptive_rating,
                ),
            )
            .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
        }
    }

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let _ = notify::log_activity(
        conn,
        Some(&actor.user_id),
        "grading_system_created",
        &name,
    );

    Ok(ok(&req.id, json!({ "gradingSystemId": grading_system_id })))
}

/// Update replaces the criteria set wholesale. Unlike create, the 100%-total
/// rule is enforced here; a violation rolls back and the previous criteria
/// survive untouched.
fn update_system(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let actor = require_admin(conn, req)?;

    let grading_system_id = str_param(req, "gradingSystemId")?;
    let name = trimmed_param(req, "name")?;
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let passing_grade = f64_param(req, "passingGrade")?;
    if !(0.0..=100.0).contains(&passing_grade) {
        return Err(HandlerErr::bad_params("passingGrade must be within 0..=100"));
    }

    let criteria = parse_criteria(req)?;
    let guidelines = load_active_guidelines(conn)?;

    let inputs: Vec<CriterionInput> = criteria
        .iter()
        .map(|c| CriterionInput {
            name: c.name.clone(),
            weight: c.weight,
        })
        .collect();
    if let Err(violations) =
        validate_criteria_weights(&inputs, &guidelines, WeightTotalRule::Enforced)
    {
        let joined = violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        return Err(HandlerErr::validation(
            joined,
            Some(json!({ "violations": violations.len() })),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    let changed = tx
        .execute(
            "UPDATE grading_systems SET name = ?, description = ?, passing_grade = ? WHERE id = ?",
            (&name, &description, passing_grade, &grading_system_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if changed == 0 {
        let _ = tx.rollback();
        return Err(HandlerErr::not_found("grading system not found"));
    }

    tx.execute(
        "DELETE FROM grading_criteria WHERE grading_system_id = ?",
        [&grading_system_id],
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e))?;

    insert_criteria_rows(&tx, &grading_system_id, &criteria)?;

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let _ = notify::log_activity(
        conn,
        Some(&actor.user_id),
        "grading_system_updated",
        &name,
    );

    Ok(ok(&req.id, json!({ "gradingSystemId": grading_system_id })))
}

fn delete_system(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let actor = require_admin(conn, req)?;

    let grading_system_id = str_param(req, "gradingSystemId")?;

    let class_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM classes WHERE grading_system_id = ?",
            [&grading_system_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if class_count > 0 {
        return Err(HandlerErr::in_use(
            "Cannot delete grading system that is in use by classes",
            class_count,
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "DELETE FROM grading_criteria WHERE grading_system_id = ?",
        [&grading_system_id],
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    let changed = tx
        .execute(
            "DELETE FROM grading_systems WHERE id = ?",
            [&grading_system_id],
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if changed == 0 {
        let _ = tx.rollback();
        return Err(HandlerErr::not_found("grading system not found"));
    }
    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let _ = notify::log_activity(
        conn,
        Some(&actor.user_id),
        "grading_system_deleted",
        &grading_system_id,
    );

    Ok(ok(&req.id, json!({ "ok": true })))
}

fn handle_systems_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let guidelines = match load_active_guidelines(conn) {
        Ok(g) => g,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT gs.id, gs.name, gs.description, gs.passing_grade, gs.created_at,
                COALESCE(u.first_name || ' ' || u.last_name, '') AS created_by_name,
                (SELECT COUNT(*) FROM classes c WHERE c.grading_system_id = gs.id) AS class_count
         FROM grading_systems gs
         LEFT JOIN users u ON u.id = gs.created_by
         ORDER BY gs.created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let systems = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let systems = match systems {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut out = Vec::new();
    for (id, name, description, passing_grade, created_at, created_by_name, class_count) in systems
    {
        let mut crit_stmt = match conn.prepare(
            "SELECT id, component_name, weight, description FROM grading_criteria
             WHERE grading_system_id = ? ORDER BY sort_order",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let criteria = crit_stmt
            .query_map([&id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        let criteria = match criteria {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };

        let total_weight: f64 = criteria.iter().map(|c| c.2).sum();
        let criteria_json: Vec<serde_json::Value> = criteria
            .iter()
            .map(|(cid, cname, weight, cdesc)| {
                // null compliance means no guideline covers this component
                let compliance = guidelines
                    .get(&crate::validate::normalize_criterion_name(cname))
                    .map(|g| *weight >= g.min && *weight <= g.max);
                json!({
                    "id": cid,
                    "componentName": cname,
                    "weight": weight,
                    "description": cdesc,
                    "withinGuideline": compliance,
                })
            })
            .collect();

        out.push(json!({
            "id": id,
            "name": name,
            "description": description,
            "passingGrade": passing_grade,
            "createdAt": created_at,
            "createdByName": created_by_name,
            "classCount": class_count,
            "totalWeight": total_weight,
            "criteria": criteria_json,
        }));
    }

    ok(&req.id, json!({ "systems": out }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "gradingSystems.list" => Some(handle_systems_list(state, req)),
        "gradingSystems.create" => Some(match create_system(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        "gradingSystems.update" => Some(match update_system(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        "gradingSystems.delete" => Some(match delete_system(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
