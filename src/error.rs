use std::collections::HashMap;
use std::fmt;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;
use std::io::Error as IoError;
use zip::result::ZipError;

/// Structured application error surfaced to callers of the library and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    /// Machine readable error code, e.g. `BACKUP/MALFORMED`.
    pub code: String,
    /// Human friendly message.
    pub message: String,
    /// Additional key/value context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Code used when an upstream error does not expose a specific one.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            let mut pairs: Vec<_> = self
                .context
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            pairs.sort();
            write!(f, "[{}] {} ({})", self.code, self.message, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let mut app = AppError::new(format!("IO/{:?}", error.kind()), error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app = app.with_context("os_code", os_code.to_string());
        }
        app
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = if error.is_data() {
            "JSON/DATA"
        } else if error.is_syntax() {
            "JSON/SYNTAX"
        } else if error.is_eof() {
            "JSON/EOF"
        } else {
            "JSON/ERROR"
        };
        let mut app = AppError::new(code, error.to_string());
        if error.line() > 0 {
            app = app
                .with_context("line", error.line().to_string())
                .with_context("column", error.column().to_string());
        }
        app
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::new("SQLX/ROW_NOT_FOUND", "Record not found"),
            SqlxError::ColumnNotFound(name) => {
                AppError::new("SQLX/COLUMN_NOT_FOUND", format!("Column not found: {name}"))
            }
            SqlxError::PoolTimedOut => AppError::new(
                "SQLX/POOL_TIMEOUT",
                "Timed out acquiring a database connection",
            ),
            SqlxError::Io(err) => AppError::from(err).with_context("source", "sqlx"),
            SqlxError::Database(db) => {
                let code = db
                    .code()
                    .map(|code| format!("Sqlite/{code}"))
                    .unwrap_or_else(|| "SQLX/DATABASE".to_string());
                let mut app = AppError::new(code, db.message().to_string());
                if let Some(constraint) = db.constraint() {
                    app = app.with_context("constraint", constraint.to_string());
                }
                app
            }
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}

impl From<ZipError> for AppError {
    fn from(error: ZipError) -> Self {
        AppError::new("ZIP/ERROR", error.to_string())
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        match error.downcast::<AppError>() {
            Ok(app) => app,
            Err(other) => AppError::new(AppError::UNKNOWN_CODE, format!("{other:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_error_with_context() {
        let error = AppError::new("TEST/CODE", "Something went wrong")
            .with_context("entity", "student")
            .with_context("id", "1234");

        assert_eq!(error.code(), "TEST/CODE");
        assert_eq!(error.context().get("entity"), Some(&"student".to_string()));
        let rendered = error.to_string();
        assert!(rendered.starts_with("[TEST/CODE]"));
        assert!(rendered.contains("id=1234"));
    }

    #[test]
    fn serde_json_errors_capture_position() {
        let err: SerdeJsonError =
            serde_json::from_str::<serde_json::Value>("{\"foo\": }").expect_err("invalid json");
        let app = AppError::from(err);
        assert_eq!(app.code(), "JSON/SYNTAX");
        assert!(app.context().contains_key("line"));
    }

    #[test]
    fn sqlx_row_not_found_translates_to_specific_code() {
        let app = AppError::from(SqlxError::RowNotFound);
        assert_eq!(app.code(), "SQLX/ROW_NOT_FOUND");
    }

    #[test]
    fn anyhow_preserves_wrapped_app_error() {
        let inner = AppError::new("VALIDATION", "nope").with_context("field", "name");
        let any = AnyhowError::from(inner.clone());
        assert_eq!(AppError::from(any), inner);
    }

    #[test]
    fn io_error_keeps_kind_in_code() {
        let err = IoError::from_raw_os_error(2);
        let app = AppError::from(err);
        assert_eq!(app.code(), "IO/NotFound");
    }
}
