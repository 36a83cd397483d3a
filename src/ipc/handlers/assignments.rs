use crate::classroom;
use crate::error::AppResult;
use crate::ipc::error::respond;
use crate::ipc::helpers::{
    attachment_param, bool_param, doc_json, docs_json, fields_param, opt_str_param, str_param,
};
use crate::ipc::types::{AppState, Request};
use crate::roles::Role;
use serde_json::{json, Value};

fn handle_assignments_save(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let ctx = state.ctx()?;
    let teacher = ctx.require(Role::Teacher)?;
    let settings = ctx.settings()?;
    let assignment = classroom::save_assignment(
        ctx.store,
        ctx.blobs,
        &settings,
        &teacher,
        str_param(p, "classId")?,
        opt_str_param(p, "assignmentId")?,
        fields_param(p)?,
        attachment_param(p)?,
    )?;
    Ok(json!({ "assignment": doc_json(&assignment) }))
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let ctx = state.ctx()?;
    let caller = ctx.caller()?;
    let settings = ctx.settings()?;
    let docs = classroom::list_assignments(
        ctx.store,
        &settings,
        &caller,
        str_param(p, "classId")?,
        bool_param(p, "includeArchived", false)?,
    )?;
    Ok(json!({ "assignments": docs_json(&docs) }))
}

fn handle_assignments_archive(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let ctx = state.ctx()?;
    let teacher = ctx.require(Role::Teacher)?;
    let doc = classroom::archive_assignment(
        ctx.store,
        &teacher,
        str_param(p, "classId")?,
        str_param(p, "assignmentId")?,
    )?;
    Ok(json!({ "assignment": doc_json(&doc) }))
}

fn handle_assignments_submit(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let ctx = state.ctx()?;
    let student = ctx.require(Role::Student)?;
    let settings = ctx.settings()?;
    let progress = classroom::submit_assignment(
        ctx.store,
        ctx.blobs,
        &settings,
        &student,
        str_param(p, "classId")?,
        str_param(p, "assignmentId")?,
        attachment_param(p)?,
    )?;
    Ok(json!({ "progress": doc_json(&progress) }))
}

fn handle_assignments_grade(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let ctx = state.ctx()?;
    let teacher = ctx.require(Role::Teacher)?;
    let progress = classroom::grade_submission(
        ctx.store,
        &teacher,
        str_param(p, "classId")?,
        str_param(p, "assignmentId")?,
        str_param(p, "studentId")?,
        p.get("grade").unwrap_or(&Value::Null),
        opt_str_param(p, "feedback")?,
    )?;
    Ok(json!({ "progress": doc_json(&progress) }))
}

fn handle_progress_get(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let ctx = state.ctx()?;
    let caller = ctx.caller()?;
    // Students default to their own record.
    let student_id = opt_str_param(p, "studentId")?.unwrap_or(caller.uid.as_str());
    let progress = classroom::get_progress(ctx.store, &caller, str_param(p, "classId")?, student_id)?;
    Ok(json!({ "progress": progress.as_ref().map(doc_json) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "assignments.save" => handle_assignments_save(state, req),
        "assignments.list" => handle_assignments_list(state, req),
        "assignments.archive" => handle_assignments_archive(state, req),
        "assignments.submit" => handle_assignments_submit(state, req),
        "assignments.grade" => handle_assignments_grade(state, req),
        "progress.get" => handle_progress_get(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
