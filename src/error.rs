use thiserror::Error;

/// Failures surfaced by the classroom components.
///
/// Every variant maps onto exactly one protocol error code, so the message a
/// client shows and the line written to the log come from the same value.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    BadParams(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    AuthFailed(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("select a workspace first")]
    NoWorkspace,

    #[error("sign in first")]
    NotSignedIn,

    #[error("database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_failed",
            AppError::BadParams(_) => "bad_params",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::AuthFailed(_) => "auth_failed",
            AppError::NotFound(_) => "not_found",
            AppError::AlreadyExists(_) => "already_exists",
            AppError::NoWorkspace => "no_workspace",
            AppError::NotSignedIn => "not_signed_in",
            AppError::Storage(_) => "db_failed",
            AppError::Json(_) => "bad_document",
            AppError::Io(_) => "io_failed",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }
}

pub type AppResult<T> = Result<T, AppError>;
