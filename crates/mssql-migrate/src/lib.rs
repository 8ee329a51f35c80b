//! # mssql-migrate
//!
//! Flyway-compatible SQL schema migration engine for Microsoft SQL Server.
//!
//! This library discovers ordered SQL migration scripts on disk, determines
//! which have already been applied by consulting a schema-history table in
//! the target database, and executes the pending subset inside database
//! transactions, with support for:
//!
//! - **Versioned, baseline, and repeatable migrations** (`V`/`B`/`R` prefixes)
//! - **Flyway-compatible CRC32 checksums** and history table layout
//! - **`GO` batch splitting** with repeat counts
//! - **`${...}` placeholder substitution** that only touches known keys
//! - **Per-run or per-migration transaction disciplines**
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_migrate::{Config, Migrator};
//!
//! #[tokio::main]
//! async fn main() -> mssql_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let migrator = Migrator::new(config).await?;
//!     let result = migrator.migrate().await?;
//!     println!("Applied {} migrations", result.migrations_applied);
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod history;
pub mod ident;
pub mod migration;
pub mod orchestrator;
pub mod placeholder;
pub mod resolver;
pub mod splitter;

// Re-exports for convenient access
pub use checksum::checksum;
pub use config::{Config, ConnectionConfig, MigrationConfig, TransactionMode};
pub use error::{MigrateError, Result};
pub use history::{HistoryRecord, HistoryRecordType, SchemaHistory};
pub use migration::{MigrationInfo, MigrationType, ResolvedMigration};
pub use orchestrator::{
    BaselineResult, MigrateResult, MigrationStatus, Migrator, ProgressCallbacks, RepairResult,
    ValidateResult,
};
pub use placeholder::{PlaceholderContext, PlaceholderEngine};
pub use resolver::{resolve, MigrationState, Resolution, StatusEntry};
pub use splitter::{split, SqlBatch};
