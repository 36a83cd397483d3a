use crate::classroom;
use crate::error::AppResult;
use crate::ipc::error::respond;
use crate::ipc::helpers::{attachment_param, doc_json, docs_json, fields_param, opt_str_param, str_param};
use crate::ipc::types::{AppState, Request};
use crate::roles::Role;
use serde_json::{json, Value};

fn handle_resources_save(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let ctx = state.ctx()?;
    let teacher = ctx.require(Role::Teacher)?;
    let settings = ctx.settings()?;
    let resource = classroom::save_resource(
        ctx.store,
        ctx.blobs,
        &settings,
        &teacher,
        str_param(p, "classId")?,
        opt_str_param(p, "resourceId")?,
        fields_param(p)?,
        attachment_param(p)?,
    )?;
    Ok(json!({ "resource": doc_json(&resource) }))
}

fn handle_resources_list(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let ctx = state.ctx()?;
    let caller = ctx.caller()?;
    let docs = classroom::list_resources(ctx.store, &caller, str_param(&req.params, "classId")?)?;
    Ok(json!({ "resources": docs_json(&docs) }))
}

fn handle_resources_delete(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let ctx = state.ctx()?;
    let teacher = ctx.require(Role::Teacher)?;
    let resource_id = str_param(p, "resourceId")?;
    classroom::delete_resource(ctx.store, &teacher, str_param(p, "classId")?, resource_id)?;
    Ok(json!({ "deleted": resource_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "resources.save" => handle_resources_save(state, req),
        "resources.list" => handle_resources_list(state, req),
        "resources.delete" => handle_resources_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
