use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn count(conn: &Connection, sql: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(sql, [], |r| r.get(0))
}

/// Count rollups backing the dashboard and reports pages.
fn handle_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let result = (|| -> Result<serde_json::Value, rusqlite::Error> {
        let users = json!({
            "total": count(conn, "SELECT COUNT(*) FROM users")?,
            "students": count(conn, "SELECT COUNT(*) FROM users WHERE role = 'student'")?,
            "instructors": count(conn, "SELECT COUNT(*) FROM users WHERE role = 'instructor'")?,
            "admins": count(conn, "SELECT COUNT(*) FROM users WHERE role = 'admin'")?,
            "active": count(conn, "SELECT COUNT(*) FROM users WHERE status = 'active'")?,
            "inactive": count(conn, "SELECT COUNT(*) FROM users WHERE status = 'inactive'")?,
        });
        let academics = json!({
            "totalCourses": count(conn, "SELECT COUNT(*) FROM courses")?,
            "totalClasses": count(conn, "SELECT COUNT(*) FROM classes")?,
            "activeClasses": count(conn, "SELECT COUNT(*) FROM classes WHERE status = 'active'")?,
            "gradingSystems": count(conn, "SELECT COUNT(*) FROM grading_systems")?,
        });
        let enrollments = json!({
            "total": count(conn, "SELECT COUNT(*) FROM enrollments")?,
            "enrolled": count(conn, "SELECT COUNT(*) FROM enrollments WHERE status = 'enrolled'")?,
            "completed": count(conn, "SELECT COUNT(*) FROM enrollments WHERE status = 'completed'")?,
            "dropped": count(conn, "SELECT COUNT(*) FROM enrollments WHERE status = 'dropped'")?,
        });
        Ok(json!({
            "users": users,
            "academics": academics,
            "enrollments": enrollments,
        }))
    })();

    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.overview" => Some(handle_overview(state, req)),
        _ => None,
    }
}
