//! Error types for the migration engine.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query error
    #[error("Database error: {0}")]
    Db(#[from] tiberius::error::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A migration filename does not match any recognized pattern
    #[error("Invalid migration name: {0}")]
    InvalidName(String),

    /// A batch failed during execution
    #[error("Migration {migration} failed: {message}\n  Batch (line {start_line}): {sql_prefix}")]
    Batch {
        migration: String,
        message: String,
        start_line: usize,
        sql_prefix: String,
    },

    /// BEGIN/COMMIT/ROLLBACK failed; the original cause is preserved
    #[error("Transaction {action} failed: {message}")]
    Transaction { action: String, message: String },

    /// Acquiring the migration lock timed out or was denied
    #[error("Could not acquire migration lock on {0}")]
    Lock(String),

    /// Validation failure (checksum drift, missing files)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A batch exceeded the configured request timeout
    #[error("Request timed out after {timeout_ms} ms executing {migration}")]
    Timeout { migration: String, timeout_ms: u64 },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Batch error, keeping only a short prefix of the failing SQL
    pub fn batch(
        migration: impl Into<String>,
        message: impl std::fmt::Display,
        start_line: usize,
        sql: &str,
    ) -> Self {
        const PREFIX_LEN: usize = 256;
        let sql_prefix: String = sql.chars().take(PREFIX_LEN).collect();
        MigrateError::Batch {
            migration: migration.into(),
            message: message.to_string(),
            start_line,
            sql_prefix,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Map the error to a process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Json(_) => 1,
            MigrateError::Db(_)
            | MigrateError::Pool { .. }
            | MigrateError::Batch { .. }
            | MigrateError::Transaction { .. }
            | MigrateError::Lock(_)
            | MigrateError::Timeout { .. } => 2,
            MigrateError::Validation(_) => 3,
            MigrateError::InvalidName(_) => 4,
            MigrateError::Io(_) => 7,
        }
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
