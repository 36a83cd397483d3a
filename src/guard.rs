use crate::error::AppResult;
use crate::roles::{Role, RoleInfo};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum GuardState {
    Checking,
    Authorized { role: RoleInfo },
    Unauthorized { redirect: String },
}

/// Gate in front of a protected screen: `Checking -> Authorized | Unauthorized`.
///
/// The check runs once per guard. Errors fail closed and there is no retry;
/// mounting a new guard re-runs it.
pub struct RoleGuard {
    required: Role,
    fallback_route: String,
    state: GuardState,
}

impl RoleGuard {
    pub fn new(required: Role, fallback_route: impl Into<String>) -> Self {
        Self {
            required,
            fallback_route: fallback_route.into(),
            state: GuardState::Checking,
        }
    }

    pub fn state(&self) -> &GuardState {
        &self.state
    }

    pub fn check<F>(&mut self, resolve: F) -> &GuardState
    where
        F: FnOnce() -> AppResult<RoleInfo>,
    {
        if !matches!(self.state, GuardState::Checking) {
            return &self.state;
        }
        self.state = match resolve() {
            Ok(info) if info.role == self.required => GuardState::Authorized { role: info },
            Ok(info) => {
                log::info!(
                    "guard denied {}: role {} but {} required",
                    info.uid,
                    info.role.as_str(),
                    self.required.as_str()
                );
                self.unauthorized()
            }
            Err(e) => {
                log::warn!("guard check failed: {}", e);
                self.unauthorized()
            }
        };
        &self.state
    }

    /// Renders protected content only once authorized.
    pub fn render<T, F>(&self, children: F) -> Option<T>
    where
        F: FnOnce(&RoleInfo) -> T,
    {
        match &self.state {
            GuardState::Authorized { role } => Some(children(role)),
            _ => None,
        }
    }

    fn unauthorized(&self) -> GuardState {
        GuardState::Unauthorized {
            redirect: self.fallback_route.clone(),
        }
    }
}
