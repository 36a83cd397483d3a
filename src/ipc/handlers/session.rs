use crate::error::{AppError, AppResult};
use crate::guard::RoleGuard;
use crate::ipc::error::respond;
use crate::ipc::helpers::{opt_str_param, role_param};
use crate::ipc::types::{AppState, Request};
use crate::roles::resolve_role;
use serde_json::{json, Value};

fn handle_session_role(state: &mut AppState, _req: &Request) -> AppResult<Value> {
    let session = state.session.as_ref().ok_or(AppError::NotSignedIn)?;
    let info = resolve_role(state.store()?, &session.uid)?;
    Ok(json!(info))
}

/// Runs one guard for a protected screen and reports where it landed.
fn handle_guard_check(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let required = role_param(&req.params, "requiredRole")?;
    let fallback = opt_str_param(&req.params, "fallbackRoute")?.unwrap_or("/");
    let mut guard = RoleGuard::new(required, fallback);
    let store = state.store()?;
    let session = state.session.as_ref();
    guard.check(|| {
        let session = session.ok_or(AppError::NotSignedIn)?;
        resolve_role(store, &session.uid)
    });
    let rendered = guard.render(|_| true).unwrap_or(false);
    Ok(json!({ "guard": guard.state(), "rendered": rendered }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "session.role" => handle_session_role(state, req),
        "guard.check" => handle_guard_check(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
