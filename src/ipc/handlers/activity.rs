use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, types::Value};
use serde_json::json;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let page = req
        .params
        .get("page")
        .and_then(|v| v.as_i64())
        .unwrap_or(1)
        .max(1);
    let per_page = req
        .params
        .get("perPage")
        .and_then(|v| v.as_i64())
        .unwrap_or(50)
        .max(1);
    let offset = (page - 1) * per_page;

    let mut where_parts: Vec<&str> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(user_id) = req.params.get("userId").and_then(|v| v.as_str()) {
        where_parts.push("al.user_id = ?");
        bind_values.push(Value::Text(user_id.to_string()));
    }
    if let Some(action) = req.params.get("action").and_then(|v| v.as_str()) {
        where_parts.push("al.action = ?");
        bind_values.push(Value::Text(action.to_string()));
    }
    if let Some(from) = req.params.get("dateFrom").and_then(|v| v.as_str()) {
        where_parts.push("DATE(al.created_at) >= ?");
        bind_values.push(Value::Text(from.to_string()));
    }
    if let Some(to) = req.params.get("dateTo").and_then(|v| v.as_str()) {
        where_parts.push("DATE(al.created_at) <= ?");
        bind_values.push(Value::Text(to.to_string()));
    }

    let where_sql = if where_parts.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_parts.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM activity_logs al {}", where_sql);
    let total: i64 = match conn.query_row(
        &count_sql,
        params_from_iter(bind_values.iter()),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let total_pages = if total == 0 {
        0
    } else {
        (total + per_page - 1) / per_page
    };

    let logs_sql = format!(
        "SELECT al.id, al.user_id, al.action, al.details, al.created_at,
                COALESCE(u.first_name || ' ' || u.last_name, '') AS user_name,
                COALESCE(u.role, '') AS role,
                COALESCE(u.email, '') AS email
         FROM activity_logs al
         LEFT JOIN users u ON u.id = al.user_id
         {}
         ORDER BY al.created_at DESC
         LIMIT ? OFFSET ?",
        where_sql
    );
    let mut page_binds = bind_values.clone();
    page_binds.push(Value::Integer(per_page));
    page_binds.push(Value::Integer(offset));

    let mut stmt = match conn.prepare(&logs_sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(page_binds.iter()), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "userId": row.get::<_, Option<String>>(1)?,
                "action": row.get::<_, String>(2)?,
                "details": row.get::<_, Option<String>>(3)?,
                "createdAt": row.get::<_, String>(4)?,
                "userName": row.get::<_, String>(5)?,
                "role": row.get::<_, String>(6)?,
                "email": row.get::<_, String>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(logs) => ok(
            &req.id,
            json!({
                "logs": logs,
                "total": total,
                "page": page,
                "perPage": per_page,
                "totalPages": total_pages,
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "activityLogs.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
