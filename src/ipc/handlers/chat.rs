use crate::classroom;
use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{doc_json, docs_json, str_param, string_list_param};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

fn handle_chat_create(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let ctx = state.ctx()?;
    let session = ctx.session()?;
    let chat = classroom::create_chat(
        ctx.store,
        session,
        str_param(p, "title")?,
        &string_list_param(p, "participantIds")?,
    )?;
    Ok(json!({ "chat": doc_json(&chat) }))
}

fn handle_chat_send(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let ctx = state.ctx()?;
    let session = ctx.session()?;
    let settings = ctx.settings()?;
    let message = classroom::send_message(
        ctx.store,
        &settings,
        session,
        str_param(p, "chatId")?,
        str_param(p, "text")?,
    )?;
    Ok(json!({ "message": doc_json(&message) }))
}

fn handle_chat_messages(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let after_seq = match p.get("afterSeq") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_i64()
                .ok_or_else(|| AppError::BadParams("afterSeq must be an integer".into()))?,
        ),
    };
    let ctx = state.ctx()?;
    let session = ctx.session()?;
    let messages = classroom::list_messages(ctx.store, session, str_param(p, "chatId")?, after_seq)?;
    Ok(json!({ "messages": docs_json(&messages) }))
}

fn handle_chat_list(state: &mut AppState, _req: &Request) -> AppResult<Value> {
    let ctx = state.ctx()?;
    let session = ctx.session()?;
    let chats = classroom::list_chats(ctx.store, session)?;
    Ok(json!({ "chats": docs_json(&chats) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "chat.create" => handle_chat_create(state, req),
        "chat.send" => handle_chat_send(state, req),
        "chat.messages" => handle_chat_messages(state, req),
        "chat.list" => handle_chat_list(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
