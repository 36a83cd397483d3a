use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::ipc::types::Request;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn app_err(req: &Request, e: &AppError) -> serde_json::Value {
    match e {
        AppError::Storage(_) | AppError::Json(_) | AppError::Io(_) | AppError::Internal(_) => {
            log::error!("{} failed: {}", req.method, e)
        }
        _ => log::warn!("{} rejected: {} ({})", req.method, e, e.code()),
    }
    err(&req.id, e.code(), e.to_string(), None)
}

/// Turns a handler result into the response line.
pub fn respond(req: &Request, result: AppResult<serde_json::Value>) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => app_err(req, &e),
    }
}
