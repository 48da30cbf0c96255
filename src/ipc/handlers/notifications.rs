use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{str_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::notify;
use serde_json::json;

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

    let user_id = match str_param(req, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let filter = req
        .params
        .get("filter")
        .and_then(|v| v.as_str())
        .unwrap_or("all");

    let sql = match filter {
        "unread" => {
            "SELECT id, title, message, kind, related_type, related_id, is_read, created_at
             FROM notifications WHERE user_id = ? AND is_read = 0 ORDER BY created_at DESC"
        }
        "read" => {
            "SELECT id, title, message, kind, related_type, related_id, is_read, created_at
             FROM notifications WHERE user_id = ? AND is_read = 1 ORDER BY created_at DESC"
        }
        _ => {
            "SELECT id, title, message, kind, related_type, related_id, is_read, created_at
             FROM notifications WHERE user_id = ? ORDER BY created_at DESC"
        }
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&user_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "title": row.get::<_, String>(1)?,
                "message": row.get::<_, String>(2)?,
                "kind": row.get::<_, String>(3)?,
                "relatedType": row.get::<_, Option<String>>(4)?,
                "relatedId": row.get::<_, Option<String>>(5)?,
                "isRead": row.get::<_, i64>(6)? != 0,
                "createdAt": row.get::<_, String>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let notifications = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let total: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ?",
        [&user_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let unread = match notify::unread_count(conn, &user_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "notifications": notifications,
            "totalCount": total,
            "unreadCount": unread,
            "readCount": total - unread,
        }),
    )
}

fn mark_read(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let user_id = str_param(req, "userId")?;
    let notification_id = str_param(req, "notificationId")?;

    // Scoped to the owning user so one user cannot touch another's inbox.
    let changed = conn
        .execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?",
            (&notification_id, &user_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("notification not found"));
    }
    Ok(ok(&req.id, json!({ "ok": true })))
}

fn mark_all_read(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let user_id = str_param(req, "userId")?;
    let changed = conn
        .execute(
            "UPDATE notifications SET is_read = 1 WHERE user_id = ?",
            [&user_id],
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(ok(&req.id, json!({ "updated": changed })))
}

fn delete_notification(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(no_workspace());
    };
    let user_id = str_param(req, "userId")?;
    let notification_id = str_param(req, "notificationId")?;
    let changed = conn
        .execute(
            "DELETE FROM notifications WHERE id = ? AND user_id = ?",
            (&notification_id, &user_id),
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("notification not found"));
    }
    Ok(ok(&req.id, json!({ "ok": true })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.list" => Some(handle_list(state, req)),
        "notifications.markRead" => Some(match mark_read(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        "notifications.markAllRead" => Some(match mark_all_read(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        "notifications.delete" => Some(match delete_notification(state, req) {
            Ok(resp) => resp,
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
