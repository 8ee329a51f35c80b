//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.connection.server.is_empty() {
        return Err(MigrateError::Config("connection.server is required".into()));
    }
    if config.connection.database.is_empty() {
        return Err(MigrateError::Config("connection.database is required".into()));
    }
    if config.connection.user.is_empty() {
        return Err(MigrateError::Config("connection.user is required".into()));
    }
    if config.connection.port == 0 {
        return Err(MigrateError::Config("connection.port must be nonzero".into()));
    }

    if config.migration.locations.is_empty() {
        return Err(MigrateError::Config(
            "migration.locations must name at least one directory".into(),
        ));
    }
    if config.migration.default_schema.is_empty() {
        return Err(MigrateError::Config(
            "migration.default_schema is required".into(),
        ));
    }
    if config.migration.history_table.is_empty() {
        return Err(MigrateError::Config(
            "migration.history_table is required".into(),
        ));
    }
    if config.migration.baseline_version.is_empty() {
        return Err(MigrateError::Config(
            "migration.baseline_version must not be empty".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, MigrationConfig};

    fn valid_config() -> Config {
        Config {
            connection: ConnectionConfig {
                server: "localhost".to_string(),
                port: 1433,
                database: "appdb".to_string(),
                user: "sa".to_string(),
                password: "password".to_string(),
                encrypt: true,
                trust_server_certificate: true,
                request_timeout_ms: 300_000,
                connection_timeout_ms: 30_000,
            },
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_server() {
        let mut config = valid_config();
        config.connection.server = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_database() {
        let mut config = valid_config();
        config.connection.database = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_locations() {
        let mut config = valid_config();
        config.migration.locations.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_history_table() {
        let mut config = valid_config();
        config.migration.history_table = "".to_string();
        assert!(validate(&config).is_err());
    }
}
