use crate::binder::LiveView;
use crate::classroom;
use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{docs_json, opt_str_param, str_param};
use crate::ipc::types::{AppState, Request};
use crate::roles::Role;
use crate::store::{Direction, Filter, Query};
use serde_json::{json, Value};

/// `{collection, where: [{field, op, value}], orderBy, direction, limit}`
fn parse_query(v: &Value) -> AppResult<Query> {
    let mut q = Query::new(str_param(v, "collection")?);
    if let Some(filters) = v.get("where").filter(|f| !f.is_null()) {
        let filters = filters
            .as_array()
            .ok_or_else(|| AppError::BadParams("where must be an array".into()))?;
        for f in filters {
            let field = str_param(f, "field")?.to_string();
            let value = f.get("value").cloned().unwrap_or(Value::Null);
            let filter = match str_param(f, "op")? {
                "==" => Filter::Eq(field, value),
                "array-contains" => Filter::ArrayContains(field, value),
                "in" => {
                    let options = value
                        .as_array()
                        .cloned()
                        .ok_or_else(|| AppError::BadParams("in expects an array value".into()))?;
                    Filter::In(field, options)
                }
                other => {
                    return Err(AppError::BadParams(format!("unsupported operator: {}", other)))
                }
            };
            q.filters.push(filter);
        }
    }
    if let Some(field) = opt_str_param(v, "orderBy")? {
        let direction = match opt_str_param(v, "direction")? {
            None | Some("asc") => Direction::Asc,
            Some("desc") => Direction::Desc,
            Some(other) => {
                return Err(AppError::BadParams(format!("unknown direction: {}", other)))
            }
        };
        q = q.order_by(field, direction);
    }
    if let Some(limit) = v.get("limit").filter(|l| !l.is_null()) {
        let n = limit
            .as_u64()
            .ok_or_else(|| AppError::BadParams("limit must be a non-negative integer".into()))?;
        q.limit = Some(n as usize);
    }
    Ok(q)
}

fn handle_live_subscribe(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let query = parse_query(&req.params)?;
    let ctx = state.ctx()?;
    let session = ctx.session()?;
    let caller = ctx.caller()?;
    let query = classroom::scope_live_query(ctx.store, session, &caller, query)?;
    let outbox = ctx.outbox.clone();
    let id = ctx.store.subscribe(query, move |id, docs| {
        outbox.borrow_mut().push(json!({
            "event": "subscription.update",
            "subscriptionId": id,
            "documents": docs_json(docs),
        }));
    })?;
    ctx.subscriptions.insert(id);
    Ok(json!({ "subscriptionId": id }))
}

fn handle_live_unsubscribe(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let id = req
        .params
        .get("subscriptionId")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| AppError::BadParams("missing subscriptionId".into()))?;
    let ctx = state.ctx()?;
    // Only the session's own listeners can be released.
    if !ctx.subscriptions.remove(&id) || !ctx.store.unsubscribe(id) {
        return Err(AppError::not_found("no such subscription"));
    }
    Ok(json!({ "unsubscribed": id }))
}

/// Partitions for the caller's assignment list: one live query per class.
fn assignment_partitions(state: &mut AppState) -> AppResult<Vec<(String, Query)>> {
    let ctx = state.ctx()?;
    let caller = ctx.caller()?;
    let class_ids = match caller.role {
        Role::Student => caller.class_ids.clone(),
        Role::Teacher => classroom::list_classes(ctx.store, &caller)?
            .into_iter()
            .map(|c| c.id)
            .collect(),
    };
    Ok(class_ids
        .into_iter()
        .map(|cid| {
            let q = classroom::active_assignments_query(&cid);
            (cid, q)
        })
        .collect())
}

fn handle_view_open(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let p = &req.params;
    let (partitions, sort_field) = match opt_str_param(p, "source")? {
        Some("assignments") => (assignment_partitions(state)?, Some("dueDate".to_string())),
        Some(other) => return Err(AppError::BadParams(format!("unknown view source: {}", other))),
        None => {
            let items = p
                .get("partitions")
                .and_then(|v| v.as_array())
                .ok_or_else(|| AppError::BadParams("missing partitions".into()))?;
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                let key = str_param(item, "key")?.to_string();
                let query = parse_query(item.get("query").unwrap_or(&Value::Null))?;
                parts.push((key, query));
            }
            (parts, opt_str_param(p, "sortField")?.map(|s| s.to_string()))
        }
    };

    let view_id = opt_str_param(p, "viewId")?
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let ctx = state.ctx()?;
    let session = ctx.session()?;
    let caller = ctx.caller()?;
    if ctx.views.contains_key(&view_id) {
        return Err(AppError::AlreadyExists(format!("view {} is already open", view_id)));
    }
    let partitions = partitions
        .into_iter()
        .map(|(key, query)| {
            classroom::scope_live_query(ctx.store, session, &caller, query).map(|q| (key, q))
        })
        .collect::<AppResult<Vec<_>>>()?;
    let outbox = ctx.outbox.clone();
    let event_view_id = view_id.clone();
    let view = LiveView::open(ctx.store, partitions, sort_field, move |items| {
        outbox.borrow_mut().push(json!({
            "event": "view.update",
            "viewId": event_view_id,
            "items": docs_json(items),
        }));
    })?;
    let items = view.items();
    ctx.views.insert(view_id.clone(), view);
    log::debug!("view {} opened", view_id);
    Ok(json!({ "viewId": view_id, "items": docs_json(&items) }))
}

fn handle_view_close(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let view_id = str_param(&req.params, "viewId")?;
    let ctx = state.ctx()?;
    let view = ctx
        .views
        .remove(view_id)
        .ok_or_else(|| AppError::not_found("no such view"))?;
    view.close(ctx.store);
    Ok(json!({ "closed": view_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "live.subscribe" => handle_live_subscribe(state, req),
        "live.unsubscribe" => handle_live_unsubscribe(state, req),
        "live.viewOpen" => handle_view_open(state, req),
        "live.viewClose" => handle_view_close(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
