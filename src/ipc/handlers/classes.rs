use crate::classroom;
use crate::error::AppResult;
use crate::ipc::error::respond;
use crate::ipc::helpers::{doc_json, docs_json, fields_param, str_param, string_list_param};
use crate::ipc::types::{AppState, Request};
use crate::roles::Role;
use serde_json::{json, Value};

fn handle_classes_create(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let ctx = state.ctx()?;
    let teacher = ctx.require(Role::Teacher)?;
    let settings = ctx.settings()?;
    let students = string_list_param(&req.params, "students")?;
    let class = classroom::create_class(
        ctx.store,
        ctx.blobs,
        &settings,
        &teacher,
        fields_param(&req.params)?,
        &students,
    )?;
    Ok(json!({ "class": doc_json(&class) }))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let ctx = state.ctx()?;
    let teacher = ctx.require(Role::Teacher)?;
    let settings = ctx.settings()?;
    let class_id = str_param(&req.params, "classId")?;
    let class = classroom::update_class(
        ctx.store,
        ctx.blobs,
        &settings,
        &teacher,
        class_id,
        fields_param(&req.params)?,
    )?;
    Ok(json!({ "class": doc_json(&class) }))
}

fn handle_classes_list(state: &mut AppState, _req: &Request) -> AppResult<Value> {
    let ctx = state.ctx()?;
    let caller = ctx.caller()?;
    let classes = classroom::list_classes(ctx.store, &caller)?;
    Ok(json!({ "classes": docs_json(&classes) }))
}

fn handle_classes_get(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let ctx = state.ctx()?;
    let caller = ctx.caller()?;
    let class = classroom::member_class(ctx.store, &caller, str_param(&req.params, "classId")?)?;
    Ok(json!({ "class": doc_json(&class) }))
}

fn handle_classes_enroll(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let ctx = state.ctx()?;
    let teacher = ctx.require(Role::Teacher)?;
    let class_id = str_param(&req.params, "classId")?;
    classroom::owned_class(ctx.store, &teacher, class_id)?;
    let student_id = classroom::find_student(ctx.store, str_param(&req.params, "student")?)?;
    let class = classroom::enroll_student(ctx.store, class_id, &student_id)?;
    Ok(json!({ "class": doc_json(&class), "studentId": student_id }))
}

fn handle_classes_remove_student(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let ctx = state.ctx()?;
    let teacher = ctx.require(Role::Teacher)?;
    let class_id = str_param(&req.params, "classId")?;
    classroom::owned_class(ctx.store, &teacher, class_id)?;
    let class = classroom::remove_student(ctx.store, class_id, str_param(&req.params, "studentId")?)?;
    Ok(json!({ "class": doc_json(&class) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.create" => handle_classes_create(state, req),
        "classes.update" => handle_classes_update(state, req),
        "classes.list" => handle_classes_list(state, req),
        "classes.get" => handle_classes_get(state, req),
        "classes.enroll" => handle_classes_enroll(state, req),
        "classes.removeStudent" => handle_classes_remove_student(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
