use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::str_param;
use crate::ipc::types::{AppState, Request};
use crate::roles::Role;
use crate::settings::{load_section, merge_section_patch, save_section, Section, ALL_SECTIONS};
use serde_json::{Map, Value};

fn handle_setup_get(state: &mut AppState, _req: &Request) -> AppResult<Value> {
    let ctx = state.ctx()?;
    ctx.session()?;
    let conn = ctx.store.conn();
    let mut out = Map::new();
    for section in ALL_SECTIONS {
        out.insert(section.name().to_string(), load_section(conn, section)?);
    }
    Ok(Value::Object(out))
}

/// Settings are classroom-wide policy, so only teachers change them.
fn handle_setup_update(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let ctx = state.ctx()?;
    let teacher = ctx.require(Role::Teacher)?;
    let conn = ctx.store.conn();
    let section_raw = str_param(&req.params, "section")?;
    let section = Section::parse(section_raw)
        .ok_or_else(|| AppError::BadParams(format!("unknown section: {}", section_raw)))?;
    let patch = req
        .params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| AppError::BadParams("patch must be an object".into()))?;

    let mut current = load_section(conn, section)?;
    merge_section_patch(section, &mut current, patch).map_err(AppError::BadParams)?;
    save_section(conn, section, &current)?;
    log::info!("settings section {} updated by {}", section.name(), teacher.uid);
    Ok(current)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "setup.get" => handle_setup_get(state, req),
        "setup.update" => handle_setup_update(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
