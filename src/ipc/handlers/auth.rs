use crate::auth;
use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{opt_str_param, role_param, str_param};
use crate::ipc::types::{AppState, Request};
use crate::roles::resolve_role;
use serde_json::{json, Value};

fn session_result(state: &AppState) -> AppResult<Value> {
    let Some(session) = state.session.as_ref() else {
        return Ok(json!({ "session": null, "role": null }));
    };
    let info = resolve_role(state.store()?, &session.uid)?;
    Ok(json!({ "session": session, "role": info }))
}

fn handle_sign_up(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let email = str_param(p, "email")?;
    let password = str_param(p, "password")?;
    let role = role_param(p, "role")?;
    let display_name = opt_str_param(p, "displayName")?;
    if let Some(previous) = state.end_session() {
        auth::sign_out(state.store()?, &previous)?;
    }
    let store = state.store_mut()?;
    let session = auth::sign_up(store, email, password, role, display_name)?;
    state.session = Some(session);
    session_result(state)
}

/// `expectedRole` mirrors the per-role sign-in screens: a valid account with
/// the wrong role is signed straight back out.
fn handle_sign_in(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let email = str_param(p, "email")?;
    let password = str_param(p, "password")?;
    let expected = match opt_str_param(p, "expectedRole")? {
        Some(_) => Some(role_param(p, "expectedRole")?),
        None => None,
    };
    // Signing in always replaces whoever was signed in before.
    if let Some(previous) = state.end_session() {
        auth::sign_out(state.store()?, &previous)?;
    }
    let store = state.store()?;
    let session = auth::sign_in(store, email, password)?;
    if let Some(expected) = expected {
        let info = resolve_role(store, &session.uid)?;
        if info.role != expected {
            auth::sign_out(store, &session)?;
            return Err(AppError::unauthorized(format!(
                "this account is not registered as a {}",
                expected.as_str()
            )));
        }
    }
    state.session = Some(session);
    session_result(state)
}

fn handle_sign_out(state: &mut AppState, _req: &Request) -> AppResult<Value> {
    if let Some(session) = state.end_session() {
        auth::sign_out(state.store()?, &session)?;
    }
    Ok(json!({ "signedOut": true }))
}

fn handle_restore(state: &mut AppState, _req: &Request) -> AppResult<Value> {
    let session = auth::restore(state.store()?)?;
    state.end_session();
    state.session = session;
    session_result(state)
}

fn handle_change_password(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let current = str_param(&req.params, "currentPassword")?;
    let new_password = str_param(&req.params, "newPassword")?;
    let session = state.session.as_ref().ok_or(AppError::NotSignedIn)?;
    auth::change_password(state.store()?, session, current, new_password)?;
    Ok(json!({ "changed": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.signUp" => handle_sign_up(state, req),
        "auth.signIn" => handle_sign_in(state, req),
        "auth.signOut" => handle_sign_out(state, req),
        "auth.current" => session_result(state),
        "auth.restore" => handle_restore(state, req),
        "auth.changePassword" => handle_change_password(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}

