//! Configuration type definitions.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQL Server connection configuration.
    pub connection: ConnectionConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// SQL Server connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database host.
    pub server: String,

    /// Database port (default: 1433).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(skip_serializing)]
    pub password: String,

    /// Encrypt connection (default: true, for cloud compatibility).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Trust server certificate (default: true).
    #[serde(default = "default_true")]
    pub trust_server_certificate: bool,

    /// Per-batch request timeout in milliseconds (default: 300000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Connection timeout in milliseconds (default: 30000).
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .finish()
    }
}

/// Transaction discipline for a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionMode {
    /// One transaction around the whole run; any failure undoes everything.
    PerRun,
    /// A fresh transaction per migration; earlier migrations stay committed.
    #[default]
    PerMigration,
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Ordered list of directories to scan for migration scripts.
    #[serde(default = "default_locations")]
    pub locations: Vec<String>,

    /// Schema hosting the history table; also the value of
    /// `${flyway:defaultSchema}`.
    #[serde(default = "default_schema")]
    pub default_schema: String,

    /// History table name.
    #[serde(default = "default_history_table")]
    pub history_table: String,

    /// Baseline version. The sentinel `"1"` enables auto-selection of the
    /// highest-versioned baseline script.
    #[serde(default = "default_baseline_version")]
    pub baseline_version: String,

    /// Apply a baseline script when migrating an empty database.
    #[serde(default)]
    pub baseline_on_migrate: bool,

    /// Permit applying a migration whose version precedes the highest
    /// applied version.
    #[serde(default)]
    pub out_of_order: bool,

    /// User placeholder map; keys shadow built-ins of the same name.
    #[serde(default)]
    pub placeholders: HashMap<String, String>,

    /// Transaction discipline (default: per-migration).
    #[serde(default)]
    pub transaction_mode: TransactionMode,

    /// Record a failed history row after a per-migration rollback.
    #[serde(default = "default_true")]
    pub insert_failed_row: bool,

    /// Report pending migrations without executing them.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            locations: default_locations(),
            default_schema: default_schema(),
            history_table: default_history_table(),
            baseline_version: default_baseline_version(),
            baseline_on_migrate: false,
            out_of_order: false,
            placeholders: HashMap::new(),
            transaction_mode: TransactionMode::default(),
            insert_failed_row: true,
            dry_run: false,
        }
    }
}

fn default_port() -> u16 {
    1433
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    300_000
}

fn default_connection_timeout_ms() -> u64 {
    30_000
}

fn default_locations() -> Vec<String> {
    vec!["migrations".to_string()]
}

fn default_schema() -> String {
    "dbo".to_string()
}

fn default_history_table() -> String {
    "flyway_schema_history".to_string()
}

fn default_baseline_version() -> String {
    "1".to_string()
}
