use crate::db;
use crate::error::{AppError, AppResult};
use crate::roles::{user_path, Role, Session};
use crate::store::{fields, now_timestamp, server_timestamp, DocumentStore};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use rusqlite::OptionalExtension;
use serde_json::json;

// The one secure-store key holding the signed-in token.
const TOKEN_KEY: &str = "auth.token";
const MIN_PASSWORD_LEN: usize = 6;

fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_ascii_lowercase();
    let valid = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
        .unwrap_or(false);
    if !valid {
        return Err(AppError::validation("enter a valid email address"));
    }
    Ok(email)
}

fn check_password_strength(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Creates the account, writes its `users/{uid}` record and signs it in.
pub fn sign_up(
    store: &mut DocumentStore,
    email: &str,
    password: &str,
    role: Role,
    display_name: Option<&str>,
) -> AppResult<Session> {
    let email = normalize_email(email)?;
    check_password_strength(password)?;

    let taken: Option<String> = store
        .conn()
        .query_row("SELECT uid FROM accounts WHERE email = ?", [&email], |r| {
            r.get(0)
        })
        .optional()?;
    if taken.is_some() {
        return Err(AppError::AlreadyExists(
            "an account with this email already exists".into(),
        ));
    }

    let uid = uuid::Uuid::new_v4().simple().to_string();
    let hash = hash_password(password)?;
    store.conn().execute(
        "INSERT INTO accounts(uid, email, password_hash, created_at) VALUES(?, ?, ?, ?)",
        (&uid, &email, &hash, now_timestamp()),
    )?;

    store.set(
        &user_path(&uid),
        fields(json!({
            "email": email,
            "role": role.as_str(),
            "classIds": [],
            "displayName": display_name.map(|s| s.trim()).unwrap_or(""),
            "createdAt": server_timestamp(),
        })),
    )?;
    log::info!("account {} created as {}", uid, role.as_str());

    open_session(store, &uid, &email)
}

pub fn sign_in(store: &DocumentStore, email: &str, password: &str) -> AppResult<Session> {
    let email = normalize_email(email)?;
    let row: Option<(String, String)> = store
        .conn()
        .query_row(
            "SELECT uid, password_hash FROM accounts WHERE email = ?",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    // Same message for unknown email and wrong password.
    let Some((uid, hash)) = row else {
        return Err(AppError::AuthFailed("invalid email or password".into()));
    };
    if !verify_password(password, &hash) {
        return Err(AppError::AuthFailed("invalid email or password".into()));
    }
    open_session(store, &uid, &email)
}

fn open_session(store: &DocumentStore, uid: &str, email: &str) -> AppResult<Session> {
    let token = uuid::Uuid::new_v4().to_string();
    store.conn().execute(
        "INSERT INTO sessions(token, uid, created_at) VALUES(?, ?, ?)",
        (&token, uid, now_timestamp()),
    )?;
    db::secure_set(store.conn(), TOKEN_KEY, &token)?;
    log::info!("session opened for {}", uid);
    Ok(Session {
        uid: uid.to_string(),
        email: email.to_string(),
        token,
    })
}

pub fn sign_out(store: &DocumentStore, session: &Session) -> AppResult<()> {
    store
        .conn()
        .execute("DELETE FROM sessions WHERE token = ?", [&session.token])?;
    db::secure_remove(store.conn(), TOKEN_KEY)?;
    log::info!("session closed for {}", session.uid);
    Ok(())
}

/// Reloads the session whose token is held in the secure store, if it is still valid.
pub fn restore(store: &DocumentStore) -> AppResult<Option<Session>> {
    let Some(token) = db::secure_get(store.conn(), TOKEN_KEY)? else {
        return Ok(None);
    };
    let row: Option<(String, String)> = store
        .conn()
        .query_row(
            "SELECT a.uid, a.email
             FROM sessions s
             JOIN accounts a ON a.uid = s.uid
             WHERE s.token = ?",
            [&token],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    match row {
        Some((uid, email)) => Ok(Some(Session { uid, email, token })),
        None => {
            db::secure_remove(store.conn(), TOKEN_KEY)?;
            Ok(None)
        }
    }
}

/// Re-authenticates with `current` before replacing the password.
pub fn change_password(
    store: &DocumentStore,
    session: &Session,
    current: &str,
    new_password: &str,
) -> AppResult<()> {
    let hash: Option<String> = store
        .conn()
        .query_row(
            "SELECT password_hash FROM accounts WHERE uid = ?",
            [&session.uid],
            |r| r.get(0),
        )
        .optional()?;
    let Some(hash) = hash else {
        return Err(AppError::not_found("account not found"));
    };
    if !verify_password(current, &hash) {
        return Err(AppError::AuthFailed(
            "current password is incorrect; re-authentication failed".into(),
        ));
    }
    check_password_strength(new_password)?;
    let new_hash = hash_password(new_password)?;
    store.conn().execute(
        "UPDATE accounts SET password_hash = ?, password_changed_at = ? WHERE uid = ?",
        (&new_hash, now_timestamp(), &session.uid),
    )?;
    log::info!("password changed for {}", session.uid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::resolve_role;

    #[test]
    fn sign_up_writes_user_record_and_persists_token() {
        let mut store = DocumentStore::new(db::open_memory());
        let s = sign_up(&mut store, "Ada@Example.com", "secret1", Role::Teacher, None)
            .expect("sign up");
        assert_eq!(s.email, "ada@example.com");
        assert_eq!(resolve_role(&store, &s.uid).expect("role").role, Role::Teacher);

        let restored = restore(&store).expect("restore").expect("session");
        assert_eq!(restored.uid, s.uid);

        sign_out(&store, &s).expect("sign out");
        assert!(restore(&store).expect("restore").is_none());
        assert!(db::secure_get(store.conn(), TOKEN_KEY).expect("get").is_none());
    }

    #[test]
    fn sign_in_rejects_wrong_password_and_duplicate_sign_up() {
        let mut store = DocumentStore::new(db::open_memory());
        sign_up(&mut store, "b@example.com", "secret1", Role::Student, None).expect("sign up");
        assert_eq!(
            sign_in(&store, "b@example.com", "nope123")
                .expect_err("wrong password")
                .code(),
            "auth_failed"
        );
        assert!(sign_in(&store, "B@example.com", "secret1").is_ok());
        assert_eq!(
            sign_up(&mut store, "b@example.com", "secret1", Role::Student, None)
                .expect_err("duplicate")
                .code(),
            "already_exists"
        );
    }

    #[test]
    fn change_password_requires_the_current_one() {
        let mut store = DocumentStore::new(db::open_memory());
        let s = sign_up(&mut store, "c@example.com", "secret1", Role::Student, None)
            .expect("sign up");
        assert_eq!(
            change_password(&store, &s, "wrong!!", "secret2")
                .expect_err("reauth")
                .code(),
            "auth_failed"
        );
        change_password(&store, &s, "secret1", "secret2").expect("change");
        assert!(sign_in(&store, "c@example.com", "secret2").is_ok());
        assert!(sign_in(&store, "c@example.com", "secret1").is_err());
    }

    #[test]
    fn short_passwords_and_bad_emails_fail_validation() {
        let mut store = DocumentStore::new(db::open_memory());
        assert_eq!(
            sign_up(&mut store, "nobody", "secret1", Role::Student, None)
                .expect_err("email")
                .code(),
            "validation_failed"
        );
        assert_eq!(
            sign_up(&mut store, "d@example.com", "123", Role::Student, None)
                .expect_err("password")
                .code(),
            "validation_failed"
        );
    }
}
