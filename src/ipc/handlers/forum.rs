use crate::classroom;
use crate::error::AppResult;
use crate::ipc::error::respond;
use crate::ipc::helpers::{attachment_param, doc_json, docs_json, fields_param, opt_str_param, str_param};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn handle_posts_save(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let ctx = state.ctx()?;
    let session = ctx.session()?;
    let settings = ctx.settings()?;
    let post = classroom::save_post(
        ctx.store,
        ctx.blobs,
        &settings,
        session,
        opt_str_param(p, "postId")?,
        fields_param(p)?,
        attachment_param(p)?,
    )?;
    Ok(json!({ "post": doc_json(&post) }))
}

fn handle_posts_list(state: &mut AppState, _req: &Request) -> AppResult<Value> {
    let ctx = state.ctx()?;
    ctx.session()?;
    let posts = classroom::list_posts(ctx.store)?;
    Ok(json!({ "posts": docs_json(&posts) }))
}

fn handle_comments_add(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let ctx = state.ctx()?;
    let session = ctx.session()?;
    let comment = classroom::add_comment(
        ctx.store,
        session,
        str_param(p, "postId")?,
        opt_str_param(p, "parentId")?,
        str_param(p, "content")?,
    )?;
    Ok(json!({ "comment": doc_json(&comment) }))
}

fn handle_comments_tree(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let ctx = state.ctx()?;
    ctx.session()?;
    let settings = ctx.settings()?;
    let tree = classroom::comment_tree(ctx.store, &settings, str_param(&req.params, "postId")?)?;
    Ok(json!({ "comments": tree }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "forum.posts.save" => handle_posts_save(state, req),
        "forum.posts.list" => handle_posts_list(state, req),
        "forum.comments.add" => handle_comments_add(state, req),
        "forum.comments.tree" => handle_comments_tree(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
