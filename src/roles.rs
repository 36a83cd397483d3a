use crate::error::{AppError, AppResult};
use crate::store::DocumentStore;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "teacher" => Some(Self::Teacher),
            "student" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }
}

/// The authenticated caller, passed explicitly to every component.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub uid: String,
    pub email: String,
    #[serde(skip)]
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleInfo {
    pub uid: String,
    pub role: Role,
    pub class_ids: Vec<String>,
}

pub fn user_path(uid: &str) -> String {
    format!("users/{}", uid)
}

/// Reads `users/{uid}` and reports its role and enrolled classes.
pub fn resolve_role(store: &DocumentStore, uid: &str) -> AppResult<RoleInfo> {
    let doc = store
        .get(&user_path(uid))?
        .ok_or_else(|| AppError::not_found("user record not found"))?;
    let role = doc
        .str_field("role")
        .and_then(Role::parse)
        .ok_or_else(|| AppError::unauthorized("user has no recognised role"))?;
    Ok(RoleInfo {
        uid: uid.to_string(),
        role,
        class_ids: doc.string_list("classIds"),
    })
}

/// Resolves the session's role and fails unless it equals `required`.
pub fn require_role(
    store: &DocumentStore,
    session: Option<&Session>,
    required: Role,
) -> AppResult<RoleInfo> {
    let session = session.ok_or(AppError::NotSignedIn)?;
    let info = resolve_role(store, &session.uid)?;
    if info.role != required {
        return Err(AppError::unauthorized(format!(
            "only a {} can do this",
            required.as_str()
        )));
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::fields;
    use serde_json::json;

    #[test]
    fn resolves_known_roles_and_rejects_the_rest() {
        let mut store = DocumentStore::new(db::open_memory());
        store
            .set(
                "users/t1",
                fields(json!({ "role": "teacher", "classIds": ["c1"] })),
            )
            .expect("t1");
        store
            .set("users/x1", fields(json!({ "role": "admin" })))
            .expect("x1");

        let info = resolve_role(&store, "t1").expect("teacher");
        assert_eq!(info.role, Role::Teacher);
        assert_eq!(info.class_ids, vec!["c1".to_string()]);

        assert_eq!(
            resolve_role(&store, "x1").expect_err("admin").code(),
            "unauthorized"
        );
        assert_eq!(
            resolve_role(&store, "missing").expect_err("missing").code(),
            "not_found"
        );
    }

    #[test]
    fn require_role_needs_a_session_and_the_right_role() {
        let mut store = DocumentStore::new(db::open_memory());
        store
            .set("users/s1", fields(json!({ "role": "student" })))
            .expect("s1");
        let session = Session {
            uid: "s1".into(),
            email: "s1@example.com".into(),
            token: "t".into(),
        };
        assert_eq!(
            require_role(&store, None, Role::Student)
                .expect_err("no session")
                .code(),
            "not_signed_in"
        );
        assert!(require_role(&store, Some(&session), Role::Student).is_ok());
        assert_eq!(
            require_role(&store, Some(&session), Role::Teacher)
                .expect_err("wrong role")
                .code(),
            "unauthorized"
        );
    }
}
