use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::ipc::error::err;
use crate::ipc::types::Request;

/// Handler-internal error carrying the wire code; converted to the response
/// envelope at the top of each handler.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        HandlerErr {
            code: "validation_failed",
            message: message.into(),
            details,
        }
    }

    pub fn in_use(message: impl Into<String>, count: i64) -> Self {
        HandlerErr {
            code: "in_use",
            message: message.into(),
            details: Some(json!({ "count": count })),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "forbidden",
            message: message.into(),
            details: None,
        }
    }

    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        HandlerErr {
            code,
            message: e.to_string(),
            details: None,
        }
    }
}

pub fn str_param(req: &Request, key: &str) -> Result<String, HandlerErr> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) => Ok(v.to_string()),
        None => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

pub fn trimmed_param(req: &Request, key: &str) -> Result<String, HandlerErr> {
    let v = str_param(req, key)?.trim().to_string();
    if v.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(v)
}

pub fn opt_str_param(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn f64_param(req: &Request, key: &str) -> Result<f64, HandlerErr> {
    match req.params.get(key).and_then(|v| v.as_f64()) {
        Some(v) => Ok(v),
        None => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

/// The actor the portal's session layer would have provided. Resolved per
/// request from `params.actorUserId`; there is no ambient session state.
pub struct Actor {
    pub user_id: String,
}

pub fn require_admin(conn: &Connection, req: &Request) -> Result<Actor, HandlerErr> {
    let user_id = str_param(req, "actorUserId")?;
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT role, status FROM users WHERE id = ?",
            [&user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    match row {
        Some((role, status)) if role == "admin" && status == "active" => Ok(Actor { user_id }),
        Some(_) => Err(HandlerErr::forbidden("actor is not an active admin")),
        None => Err(HandlerErr::forbidden("unknown actor")),
    }
}
