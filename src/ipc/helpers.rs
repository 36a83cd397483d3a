use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::forms::Attachment;
use crate::roles::Role;
use crate::store::Document;

pub fn str_param<'a>(params: &'a Value, key: &str) -> AppResult<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::BadParams(format!("missing {}", key)))
}

pub fn opt_str_param<'a>(params: &'a Value, key: &str) -> AppResult<Option<&'a str>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(AppError::BadParams(format!("{} must be a string", key))),
    }
}

pub fn bool_param(params: &Value, key: &str, default: bool) -> AppResult<bool> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(AppError::BadParams(format!("{} must be boolean", key))),
    }
}

/// The `fields` object a form sends; missing means an empty form.
pub fn fields_param(params: &Value) -> AppResult<Map<String, Value>> {
    match params.get("fields") {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(m)) => Ok(m.clone()),
        Some(_) => Err(AppError::BadParams("fields must be an object".into())),
    }
}

pub fn string_list_param(params: &Value, key: &str) -> AppResult<Vec<String>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| AppError::BadParams(format!("{} must contain strings", key)))
            })
            .collect(),
        Some(_) => Err(AppError::BadParams(format!("{} must be an array", key))),
    }
}

pub fn attachment_param(params: &Value) -> AppResult<Option<Attachment>> {
    match params.get("file") {
        None | Some(Value::Null) => Ok(None),
        Some(v) if v.is_object() => Attachment::from_json(v).map(Some),
        Some(_) => Err(AppError::BadParams("file must be an object".into())),
    }
}

pub fn role_param(params: &Value, key: &str) -> AppResult<Role> {
    let raw = str_param(params, key)?;
    Role::parse(&raw.trim().to_ascii_lowercase())
        .ok_or_else(|| AppError::BadParams(format!("{} must be teacher or student", key)))
}

pub fn docs_json(docs: &[Document]) -> Value {
    serde_json::to_value(docs).unwrap_or_else(|_| Value::Array(Vec::new()))
}

pub fn doc_json(doc: &Document) -> Value {
    serde_json::to_value(doc).unwrap_or(Value::Null)
}
