use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::error::Category as JsonCategory;

use crate::store::StoreError;
use crate::validate::VerifyError;

/// Error shape handed to front ends: a stable `code`, a readable `message`,
/// and free-form context. `cause` is set when a coded error was wrapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Code for failures that carry no code of their own.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
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

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.context.is_empty() {
            let mut keys: Vec<_> = self.context.iter().collect();
            keys.sort();
            for (key, value) in keys {
                write!(f, " {key}={value}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

/// Keeps the code of a wrapped [`AppError`]; anything else becomes
/// `APP/UNKNOWN` with the full context chain as message.
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        let wrapped = error
            .chain()
            .find_map(|source| source.downcast_ref::<AppError>())
            .cloned();
        let Some(inner) = wrapped else {
            return AppError::new(Self::UNKNOWN_CODE, format!("{error:#}"));
        };

        let outer = error.to_string();
        if outer == inner.to_string() {
            return inner;
        }
        AppError {
            code: inner.code.clone(),
            message: outer,
            context: HashMap::new(),
            cause: Some(Box::new(inner)),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        let app_error = AppError::new(format!("IO/{:?}", error.kind()), error.to_string());
        match error.raw_os_error() {
            Some(os_code) => app_error.with_context("os_code", os_code.to_string()),
            None => app_error,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        let code = match error.classify() {
            JsonCategory::Io => "JSON/IO",
            JsonCategory::Syntax => "JSON/SYNTAX",
            JsonCategory::Data => "JSON/DATA",
            JsonCategory::Eof => "JSON/EOF",
        };
        let app_error = AppError::new(code, error.to_string());
        if error.line() == 0 {
            return app_error;
        }
        app_error
            .with_context("line", error.line().to_string())
            .with_context("column", error.column().to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => AppError::new("SQLX/ROW_NOT_FOUND", "Record not found"),
            sqlx::Error::PoolTimedOut => AppError::new(
                "SQLX/POOL_TIMEOUT",
                "Timed out acquiring a database connection",
            ),
            sqlx::Error::Io(err) => AppError::from(err).with_context("source", "sqlx"),
            sqlx::Error::Database(db) => {
                let code = db
                    .code()
                    .map(|code| format!("Sqlite/{code}"))
                    .unwrap_or_else(|| "SQLX/DATABASE".to_string());
                AppError::new(code, db.message().to_string())
            }
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Duplicate { name } => {
                AppError::new("STORE/DUPLICATE_NAME", "An item with this name already exists")
                    .with_context("name", name)
            }
            StoreError::ReadOnly { sql } => AppError::new(
                "STORE/READ_ONLY",
                "Only a single SELECT statement can be queried",
            )
            .with_context("sql", sql),
            StoreError::Database(err) => AppError::from(err),
        }
    }
}

impl From<VerifyError> for AppError {
    fn from(error: VerifyError) -> Self {
        let message = error.to_string();
        match error {
            VerifyError::MissingValues => AppError::new("VERIFY/MISSING_VALUES", message),
            VerifyError::MissingField(field) => AppError::new("VERIFY/MISSING_FIELD", message)
                .with_context("field", field.column()),
            VerifyError::NullField(field) => {
                AppError::new("VERIFY/NULL_FIELD", message).with_context("field", field.column())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Field;
    use anyhow::Context;

    #[test]
    fn display_lists_context_in_key_order() {
        let error = AppError::new("STORE/DUPLICATE_NAME", "taken")
            .with_context("name", "Milk")
            .with_context("id", "3");
        assert_eq!(error.to_string(), "[STORE/DUPLICATE_NAME] taken id=3 name=Milk");
    }

    #[test]
    fn uncoded_anyhow_chain_becomes_unknown() {
        let err = Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
            .context("failed to open list database")
            .unwrap_err();

        let app_error = AppError::from(err);
        assert_eq!(app_error.code(), AppError::UNKNOWN_CODE);
        assert_eq!(app_error.message(), "failed to open list database: disk full");
        assert!(app_error.cause().is_none());
    }

    #[test]
    fn wrapped_app_error_keeps_its_code() {
        let inner = AppError::new("MIGRATE/CHECKSUM_MISMATCH", "edited")
            .with_context("file", "0001_list.sql");

        let bare = AppError::from(anyhow::Error::new(inner.clone()));
        assert_eq!(bare, inner);

        let wrapped = AppError::from(anyhow::Error::new(inner.clone()).context("open store"));
        assert_eq!(wrapped.code(), "MIGRATE/CHECKSUM_MISMATCH");
        assert_eq!(wrapped.message(), "open store");
        assert_eq!(wrapped.cause(), Some(&inner));
    }

    #[test]
    fn sqlx_row_not_found_has_its_own_code() {
        let app_error = AppError::from(sqlx::Error::RowNotFound);
        assert_eq!(app_error.code(), "SQLX/ROW_NOT_FOUND");
    }

    #[test]
    fn io_error_carries_os_code() {
        let app_error = AppError::from(std::io::Error::from_raw_os_error(2));
        assert_eq!(app_error.code(), "IO/NotFound");
        assert_eq!(app_error.context().get("os_code"), Some(&"2".to_string()));
    }

    #[test]
    fn store_errors_map_to_store_codes() {
        let dup = AppError::from(StoreError::Duplicate {
            name: "Name 1".into(),
        });
        assert_eq!(dup.code(), "STORE/DUPLICATE_NAME");
        assert_eq!(dup.context().get("name"), Some(&"Name 1".to_string()));

        let ro = AppError::from(StoreError::ReadOnly {
            sql: "DELETE FROM list".into(),
        });
        assert_eq!(ro.code(), "STORE/READ_ONLY");
    }

    #[test]
    fn verify_errors_name_the_field() {
        let missing = AppError::from(VerifyError::MissingField(Field::Category));
        assert_eq!(missing.code(), "VERIFY/MISSING_FIELD");
        assert_eq!(missing.context().get("field"), Some(&"category".to_string()));

        let null = AppError::from(VerifyError::NullField(Field::Status));
        assert_eq!(null.code(), "VERIFY/NULL_FIELD");
        assert_eq!(null.context().get("field"), Some(&"status".to_string()));
    }

    #[test]
    fn serializes_without_empty_parts() {
        let error = AppError::new("VERIFY/NULL_FIELD", "nope").with_context("field", "name");
        let value = serde_json::to_value(&error).expect("serialize app error");
        assert_eq!(value["code"], "VERIFY/NULL_FIELD");
        assert_eq!(value["context"]["field"], "name");
        assert!(value.get("cause").is_none());
    }
}
