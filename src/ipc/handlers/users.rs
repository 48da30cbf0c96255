use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{opt_str_param, require_admin, str_param, trimmed_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::notify;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT u.id, u.first_name, u.last_name, u.email, u.role, u.status, u.created_at,
                s.student_number, s.program, s.year_level, s.section,
                i.employee_number, i.department
         FROM users u
         LEFT JOIN students s ON s.user_id = u.id
         LEFT JOIN instructors i ON i.user_id = u.id
         ORDER BY u.created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "firstName": row.get::<_, String>(1)?,
                "lastName": row.get::<_, String>(2)?,
                "email": row.get::<_, String>(3)?,
                "role": row.get::<_, String>(4)?,
                "status": row.get::<_, String>(5)?,
                "createdAt": row.get::<_, String>(6)?,
                "studentNumber": row.get::<_, Option<String>>(7)?,
                "program": row.get::<_, Option<String>>(8)?,
                "yearLevel": row.get::<_, Option<i64>>(9)?,
                "section": row.get::<_, Option<String>>(10)?,
                "employeeNumber": row.get::<_, Option<String>>(11)?,
                "department": row.get::<_, Option<String>>(12)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn create_user(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr {
            code: "no_workspace",
            message: "select a workspace first".into(),
            details: None,
        });
    };

    // First-run bootstrap: the very first user may be created without an
    // actor so an initial admin can exist at all.
    let user_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let actor = if user_count > 0 {
        Some(require_admin(conn, req)?)
    } else {
        None
    };

    let first_name = trimmed_param(req, "firstName")?;
    let last_name = trimmed_param(req, "lastName")?;
    let email = trimmed_param(req, "email")?;
    let role = trimmed_param(req, "role")?;
    if !matches!(role.as_str(), "admin" | "instructor" | "student") {
        return Err(HandlerErr::bad_params(
            "role must be admin, instructor, or student",
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;

    let user_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO users(id, first_name, last_name, email, role, status, created_at)
         VALUES(?, ?, ?, ?, ?, 'active', ?)",
        (
            &user_id,
            &first_name,
            &last_name,
            &email,
            &role,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e))?;

    let mut profile_id = None;
    if role == "student" {
        let year_level = req.params.get("yearLevel").and_then(|v| v.as_i64());
        let sid = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO students(id, user_id, student_number, program, year_level, section)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &sid,
                &user_id,
                opt_str_param(req, "studentNumber"),
                opt_str_param(req, "program"),
                year_level,
                opt_str_param(req, "section"),
            ),
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
        profile_id = Some(sid);
    } else if role == "instructor" {
        let iid = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO instructors(id, user_id, employee_number, department) VALUES(?, ?, ?, ?)",
            (
                &iid,
                &user_id,
                opt_str_param(req, "employeeNumber"),
                opt_str_param(req, "department"),
            ),
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
        profile_id = Some(iid);
    }

    tx.commit().map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let actor_id = actor.as_ref().map(|a| a.user_id.as_str());
    let _ = notify::log_activity(
        conn,
        actor_id,
        "user_created",
        &format!("{} {} <{}> as {}", first_name, last_name, email, role),
    );

    Ok(ok(
        &req.id,
        json!({ "userId": user_id, "profileId": profile_id }),
    ))
}

fn set_user_status(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr {
            code: "no_workspace",
            message: "select a workspace first".into(),
            details: None,
        });
    };
    let actor = require_admin(conn, req)?;

    let user_id = str_param(req, "userId")?;
    let status = trimmed_param(req, "status")?;
    if !matches!(status.as_str(), "active" | "inactive") {
        return Err(HandlerErr::bad_params("status must be active or inactive"));
    }

    let changed = conn
        .execute(
            "UPDATE users SET status = ? WHERE id = ?",
            (&status, &user_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("user not found"));
    }

    let _ = notify::log_activity(
        conn,
        Some(&actor.user_id),
        "user_status_changed",
        &format!("{} -> {}", user_id, status),
    );

    Ok(ok(&req.id, json!({ "userId": user_id, "status": status })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(handle_users_list(state, req)),
        "users.create" => Some(match create_user(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        "users.setStatus" => Some(match set_user_status(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
