use crate::auth;
use crate::blobs::BlobStore;
use crate::db;
use crate::error::AppResult;
use crate::ipc::error::{ok, respond};
use crate::ipc::helpers::str_param;
use crate::ipc::types::{AppState, Request};
use crate::store::DocumentStore;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "signedIn": state.session.is_some(),
            "subscriptions": state.store.as_ref().map(|s| s.subscription_count()),
            "writes": state.store.as_ref().map(|s| s.write_count())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let path = PathBuf::from(str_param(&req.params, "path")?);
    let conn = db::open_db(&path)?;
    let blobs = BlobStore::open(&path)?;
    let store = DocumentStore::new(conn);

    // Listeners belong to the previous store and go away with it.
    state.views.clear();
    state.subscriptions.clear();
    state.outbox.borrow_mut().clear();

    // A session only survives if this workspace still holds its token.
    let session = auth::restore(&store).unwrap_or_else(|e| {
        log::warn!("could not restore session: {}", e);
        None
    });
    log::info!(
        "workspace opened at {} (session restored: {})",
        path.to_string_lossy(),
        session.is_some()
    );

    state.workspace = Some(path.clone());
    state.store = Some(store);
    state.blobs = Some(blobs);
    state.session = session;
    Ok(json!({
        "workspacePath": path.to_string_lossy(),
        "session": state.session,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(respond(req, handle_workspace_select(state, req))),
        _ => None,
    }
}

