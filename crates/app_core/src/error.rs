//! Application error types

use crate::engine::EngineError;
use api_proto::{ErrorBody, ErrorCode, FieldError};
use thiserror::Error;

/// Main application error type
///
/// Lower-layer errors are translated into these variants so callers can
/// branch on [`AppError::code`] without knowing which component failed.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Caller errors (never retried) =====
    #[error("Validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Permission denied: {path} ({hint})")]
    Permission { path: String, hint: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // ===== Recoverable (visible failure, caller decides) =====
    #[error("Work engine error: {0}")]
    Engine(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Fatal =====
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization failed: {0}")]
    Init(String),
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl AppError {
    /// Error category for clients
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation(_) => ErrorCode::Validation,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::Permission { .. } => ErrorCode::Permission,
            AppError::InvalidPath(_) => ErrorCode::InvalidPath,
            AppError::Engine(_) => ErrorCode::Engine,
            AppError::Io(_) | AppError::Database(_) | AppError::Config(_) | AppError::Init(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// Is this error recoverable?
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AppError::Database(_) | AppError::Config(_) | AppError::Init(_)
        )
    }

    /// Is this a fatal error?
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Get a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(fields) => format!("Please fix: {}", join_fields(fields)),
            AppError::NotFound(what) => format!("Not found: {}", what),
            AppError::Permission { path, hint } => {
                format!("The service cannot access {}. To fix, {}", path, hint)
            }
            _ => self.to_string(),
        }
    }

    pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation(vec![FieldError::new(field, message)])
    }
}

impl From<app_fs::FsError> for AppError {
    fn from(e: app_fs::FsError) -> Self {
        match e {
            app_fs::FsError::NotFound(p) => AppError::NotFound(p),
            app_fs::FsError::PermissionDenied { path, hint } => AppError::Permission { path, hint },
            app_fs::FsError::InvalidPath(p) => AppError::InvalidPath(p),
            app_fs::FsError::Conflict(msg) => AppError::Conflict(msg),
            app_fs::FsError::Io(e) => AppError::Io(e),
        }
    }
}

impl From<app_db::DbError> for AppError {
    fn from(e: app_db::DbError) -> Self {
        match e {
            app_db::DbError::NotFound(msg) => AppError::NotFound(msg),
            _ => AppError::Database(e.to_string()),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::PermissionDenied { path, hint } => AppError::Permission { path, hint },
            EngineError::InputUnreadable { .. } => AppError::NotFound(e.to_string()),
            EngineError::UnknownHandle(_) => AppError::NotFound(e.to_string()),
            _ => AppError::Engine(e.to_string()),
        }
    }
}

impl From<&AppError> for ErrorBody {
    fn from(e: &AppError) -> Self {
        let (hint, fields) = match e {
            AppError::Permission { hint, .. } => (Some(hint.clone()), Vec::new()),
            AppError::Validation(fields) => (None, fields.clone()),
            _ => (None, Vec::new()),
        };

        ErrorBody {
            code: e.code(),
            message: e.to_string(),
            hint,
            fields,
        }
    }
}

impl From<AppError> for ErrorBody {
    fn from(e: AppError) -> Self {
        ErrorBody::from(&e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_errors_keep_their_kind() {
        let err: AppError = app_fs::FsError::Conflict("taken".into()).into();
        assert_eq!(err.code(), ErrorCode::Conflict);

        let err: AppError = app_fs::FsError::PermissionDenied {
            path: "/srv".into(),
            hint: "chown".into(),
        }
        .into();
        let body = ErrorBody::from(&err);
        assert_eq!(body.code, ErrorCode::Permission);
        assert_eq!(body.hint.as_deref(), Some("chown"));
    }

    #[test]
    fn test_validation_lists_every_field() {
        let err = AppError::Validation(vec![
            FieldError::new("name", "must not be empty"),
            FieldError::new("type", "unknown"),
        ]);
        assert!(err.to_string().contains("name: must not be empty"));
        assert!(err.to_string().contains("type: unknown"));
        assert_eq!(ErrorBody::from(err).fields.len(), 2);
    }

    #[test]
    fn test_user_message() {
        let err = AppError::validation("mediaId", "must not contain path separators");
        assert_eq!(
            err.user_message(),
            "Please fix: mediaId: must not contain path separators"
        );

        let err = AppError::Permission {
            path: "/srv/media".into(),
            hint: "run chown".into(),
        };
        assert_eq!(
            err.user_message(),
            "The service cannot access /srv/media. To fix, run chown"
        );
    }

    #[test]
    fn test_db_not_found_maps_to_not_found() {
        let err: AppError = app_db::DbError::NotFound("library x".into()).into();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(err.is_recoverable());

        let err: AppError = app_db::DbError::Pool("exhausted".into()).into();
        assert!(err.is_fatal());
    }
}
