use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

/// Inserts a user-facing notification. Callers that treat delivery as a
/// fire-and-forget side effect ignore the result with `let _ =`.
pub fn create_notification(
    conn: &Connection,
    user_id: &str,
    title: &str,
    message: &str,
    kind: &str,
    related_type: Option<&str>,
    related_id: Option<&str>,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO notifications(id, user_id, title, message, kind, related_type, related_id, is_read, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 0, ?)",
        (
            Uuid::new_v4().to_string(),
            user_id,
            title,
            message,
            kind,
            related_type,
            related_id,
            Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(())
}

pub fn unread_count(conn: &Connection, user_id: &str) -> anyhow::Result<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0",
        [user_id],
        |r| r.get(0),
    )?;
    Ok(n)
}

/// Best-effort audit trail entry; mutations call this after committing.
pub fn log_activity(
    conn: &Connection,
    user_id: Option<&str>,
    action: &str,
    details: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO activity_logs(id, user_id, action, details, created_at) VALUES(?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            user_id,
            action,
            details,
            Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(())
}
