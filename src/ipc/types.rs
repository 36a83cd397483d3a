use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;

use serde::Deserialize;
use serde_json::Value;

use crate::binder::LiveView;
use crate::blobs::BlobStore;
use crate::error::{AppError, AppResult};
use crate::roles::{require_role, resolve_role, Role, RoleInfo, Session};
use crate::settings::Settings;
use crate::store::{DocumentStore, SubscriptionId};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Event lines queued by listeners, flushed ahead of the current response.
pub type Outbox = Rc<RefCell<Vec<Value>>>;

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub store: Option<DocumentStore>,
    pub blobs: Option<BlobStore>,
    pub session: Option<Session>,
    /// Views and raw subscriptions opened by the current session.
    pub views: HashMap<String, LiveView>,
    pub subscriptions: HashSet<SubscriptionId>,
    pub outbox: Outbox,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            store: None,
            blobs: None,
            session: None,
            views: HashMap::new(),
            subscriptions: HashSet::new(),
            outbox: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn take_events(&self) -> Vec<Value> {
        std::mem::take(&mut *self.outbox.borrow_mut())
    }

    pub fn store(&self) -> AppResult<&DocumentStore> {
        self.store.as_ref().ok_or(AppError::NoWorkspace)
    }

    pub fn store_mut(&mut self) -> AppResult<&mut DocumentStore> {
        self.store.as_mut().ok_or(AppError::NoWorkspace)
    }

    /// Ends the current session and releases every listener it opened, so
    /// nothing bound by one user reports to the next.
    pub fn end_session(&mut self) -> Option<Session> {
        let views: Vec<LiveView> = self.views.drain().map(|(_, view)| view).collect();
        let subscriptions: Vec<SubscriptionId> = self.subscriptions.drain().collect();
        if let Some(store) = self.store.as_mut() {
            for view in views {
                view.close(store);
            }
            for id in subscriptions {
                store.unsubscribe(id);
            }
        }
        self.outbox.borrow_mut().clear();
        self.session.take()
    }

    /// Borrows everything a domain call needs at once.
    pub fn ctx(&mut self) -> AppResult<Ctx<'_>> {
        let (Some(store), Some(blobs)) = (self.store.as_mut(), self.blobs.as_ref()) else {
            return Err(AppError::NoWorkspace);
        };
        Ok(Ctx {
            store,
            blobs,
            session: self.session.as_ref(),
            views: &mut self.views,
            subscriptions: &mut self.subscriptions,
            outbox: &self.outbox,
        })
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Ctx<'a> {
    pub store: &'a mut DocumentStore,
    pub blobs: &'a BlobStore,
    pub session: Option<&'a Session>,
    pub views: &'a mut HashMap<String, LiveView>,
    pub subscriptions: &'a mut HashSet<SubscriptionId>,
    pub outbox: &'a Outbox,
}

impl<'a> Ctx<'a> {
    pub fn session(&self) -> AppResult<&'a Session> {
        self.session.ok_or(AppError::NotSignedIn)
    }

    pub fn caller(&self) -> AppResult<RoleInfo> {
        let session = self.session()?;
        resolve_role(&*self.store, &session.uid)
    }

    pub fn require(&self, role: Role) -> AppResult<RoleInfo> {
        require_role(&*self.store, self.session, role)
    }

    pub fn settings(&self) -> AppResult<Settings> {
        Ok(Settings::load(self.store.conn())?)
    }
}
