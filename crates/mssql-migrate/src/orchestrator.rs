//! Migration orchestrator - composes scanning, resolution, and execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{acquire_app_lock, release_app_lock, MigratePool, MssqlConnection};
use crate::error::Result;
use crate::executor::{ExecutionReport, Executor};
use crate::history::{HistoryRecordType, SchemaHistory};
use crate::migration::{scan_and_resolve, ResolvedMigration};
use crate::placeholder::PlaceholderContext;
use crate::resolver::{resolve, Resolution};

/// Optional progress callbacks. All fields default to no-ops.
#[derive(Clone, Default)]
pub struct ProgressCallbacks {
    pub on_warning: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_migration_start: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_migration_applied: Option<Arc<dyn Fn(&str, i32) + Send + Sync>>,
}

impl ProgressCallbacks {
    fn warn(&self, message: &str) {
        if let Some(cb) = &self.on_warning {
            cb(message);
        } else {
            warn!("{}", message);
        }
    }
}

/// Result of a `migrate` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateResult {
    /// Unique run identifier.
    pub run_id: String,
    /// Whether every pending migration was applied.
    pub success: bool,
    /// Scripts applied this run, in execution order.
    pub applied: Vec<String>,
    /// Number of migrations applied this run.
    pub migrations_applied: usize,
    /// Pending count observed (meaningful for dry runs).
    pub pending_count: usize,
    /// Whether the schema marker row was created by this run.
    pub schema_created: bool,
    /// Version of the baseline script applied, if one was.
    pub baseline_applied: Option<String>,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Failure detail when `success` is false.
    pub error_message: Option<String>,
}

/// One line of `info` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub version: Option<String>,
    pub description: String,
    pub script: String,
    pub state: String,
}

/// Result of `validate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResult {
    pub success: bool,
    pub validated: usize,
    pub errors: Vec<String>,
}

/// Result of `baseline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineResult {
    pub success: bool,
    pub version: String,
    pub error_message: Option<String>,
}

/// Result of `repair`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairResult {
    pub failed_rows_deleted: usize,
    pub checksums_realigned: usize,
}

/// Main entry point: bundles config, the run connection, and the history
/// table handle.
pub struct Migrator {
    config: Config,
    pool: MigratePool,
    history: SchemaHistory,
    callbacks: ProgressCallbacks,
}

impl Migrator {
    /// Validate the configuration and connect.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let pool = MigratePool::new(&config.connection).await?;
        let history = SchemaHistory::new(
            config.migration.default_schema.clone(),
            config.migration.history_table.clone(),
        );
        Ok(Self {
            config,
            pool,
            history,
            callbacks: ProgressCallbacks::default(),
        })
    }

    /// Attach progress callbacks.
    pub fn with_callbacks(mut self, callbacks: ProgressCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    fn lock_resource(&self) -> String {
        format!(
            "{}.{}",
            self.config.migration.default_schema, self.config.migration.history_table
        )
    }

    fn placeholder_context(&self) -> PlaceholderContext {
        PlaceholderContext::new(
            &self.config.migration.default_schema,
            &self.config.connection.database,
            &self.config.connection.user,
            &self.config.migration.history_table,
        )
    }

    /// Scan all configured locations, routing warnings to the callbacks.
    fn scan(&self) -> Result<Vec<ResolvedMigration>> {
        let callbacks = &self.callbacks;
        scan_and_resolve(&self.config.migration.locations, |w| callbacks.warn(w))
    }

    async fn resolve_against_history(
        &self,
        conn: &mut MssqlConnection,
        discovered: &[ResolvedMigration],
    ) -> Result<Resolution> {
        let applied = self.history.get_all_records(conn).await?;
        Ok(resolve(
            discovered,
            &applied,
            &self.config.migration.baseline_version,
            self.config.migration.baseline_on_migrate,
            self.config.migration.out_of_order,
        ))
    }

    /// Apply pending migrations.
    ///
    /// Execution-phase failures are reported through the result record;
    /// only connection loss and other unrecoverable driver errors propagate.
    pub async fn migrate(&self) -> Result<MigrateResult> {
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut conn = self.pool.get_conn().await?;

        let outcome = self.migrate_inner(&mut conn).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((resolution, schema_created, report)) => {
                let baseline_applied = report
                    .applied
                    .iter()
                    .any(|a| {
                        resolution
                            .effective_baseline_version
                            .as_deref()
                            .is_some_and(|b| a.version.as_deref() == Some(b))
                    })
                    .then(|| resolution.effective_baseline_version.clone())
                    .flatten();
                let success = report.error.is_none();
                let result = MigrateResult {
                    run_id,
                    success,
                    applied: report.applied.iter().map(|a| a.script.clone()).collect(),
                    migrations_applied: report.applied.len(),
                    pending_count: resolution.pending.len(),
                    schema_created,
                    baseline_applied,
                    dry_run: self.config.migration.dry_run,
                    duration_ms,
                    error_message: report.error.map(|e| e.format_detailed()),
                };
                if result.success {
                    info!(
                        "Applied {} migration(s) in {} ms",
                        result.migrations_applied, result.duration_ms
                    );
                }
                Ok(result)
            }
            Err(e) => Ok(MigrateResult {
                run_id,
                success: false,
                applied: Vec::new(),
                migrations_applied: 0,
                pending_count: 0,
                schema_created: false,
                baseline_applied: None,
                dry_run: self.config.migration.dry_run,
                duration_ms,
                error_message: Some(e.format_detailed()),
            }),
        }
    }

    async fn migrate_inner(
        &self,
        conn: &mut MssqlConnection,
    ) -> Result<(Resolution, bool, ExecutionReport)> {
        self.history.ensure_exists(conn).await?;

        let lock = self.lock_resource();
        acquire_app_lock(conn, &lock).await?;

        let run: Result<(Resolution, bool, ExecutionReport)> = async {
            let schema_created = self
                .history
                .insert_schema_marker(conn, &self.config.connection.user)
                .await?;
            let discovered = self.scan()?;
            let resolution = self.resolve_against_history(conn, &discovered).await?;
            info!(
                "{} migration(s) pending out of {} discovered",
                resolution.pending.len(),
                discovered.len()
            );

            if self.config.migration.dry_run {
                for m in &resolution.pending {
                    info!("Would apply {}", m.info.script_path);
                }
                return Ok((resolution, schema_created, ExecutionReport::default()));
            }

            if let Some(cb) = &self.callbacks.on_migration_start {
                for m in &resolution.pending {
                    cb(&m.info.script_path);
                }
            }

            let executor = Executor {
                history: &self.history,
                placeholders: &self.config.migration.placeholders,
                context: self.placeholder_context(),
                transaction_mode: self.config.migration.transaction_mode,
                insert_failed_row: self.config.migration.insert_failed_row,
                request_timeout: Duration::from_millis(self.config.connection.request_timeout_ms),
                installed_by: self.config.connection.user.clone(),
            };
            let report = executor.run(conn, &resolution.pending).await?;

            if let Some(cb) = &self.callbacks.on_migration_applied {
                for applied in &report.applied {
                    cb(&applied.script, applied.execution_time_ms);
                }
            }

            Ok((resolution, schema_created, report))
        }
        .await;

        // The lock is held for the whole run and released regardless of how
        // the run ended.
        let release = release_app_lock(conn, &lock).await;
        let outcome = run?;
        release?;

        Ok(outcome)
    }

    /// Show migration status for the union of disk and history entries.
    pub async fn info(&self) -> Result<Vec<MigrationStatus>> {
        let mut conn = self.pool.get_conn().await?;
        let discovered = self.scan()?;

        let resolution = if self.history.exists(&mut conn).await? {
            self.resolve_against_history(&mut conn, &discovered).await?
        } else {
            resolve(
                &discovered,
                &[],
                &self.config.migration.baseline_version,
                self.config.migration.baseline_on_migrate,
                self.config.migration.out_of_order,
            )
        };

        Ok(resolution
            .status_report
            .into_iter()
            .map(|e| MigrationStatus {
                version: e.version,
                description: e.description,
                script: e.script,
                state: e.state.as_str().to_string(),
            })
            .collect())
    }

    /// Check applied migrations against the files on disk.
    ///
    /// Missing files and checksum drift are aggregated into the result,
    /// never raised.
    pub async fn validate(&self) -> Result<ValidateResult> {
        let mut conn = self.pool.get_conn().await?;
        if !self.history.exists(&mut conn).await? {
            return Ok(ValidateResult {
                success: true,
                validated: 0,
                errors: Vec::new(),
            });
        }

        let discovered = self.scan()?;
        let by_version: HashMap<&str, &ResolvedMigration> = discovered
            .iter()
            .filter_map(|m| m.info.version.as_deref().map(|v| (v, m)))
            .collect();

        let applied = self.history.get_all_records(&mut conn).await?;
        let mut errors = Vec::new();
        let mut validated = 0usize;

        for record in &applied {
            let Some(version) = record.version.as_deref() else {
                continue;
            };
            // Baseline markers have no script file to check.
            if matches!(
                record.record_type,
                HistoryRecordType::Schema | HistoryRecordType::Baseline
            ) {
                continue;
            }
            match by_version.get(version) {
                None => errors.push(format!(
                    "Applied migration {} ({}) is missing on disk",
                    version, record.script
                )),
                Some(on_disk) => {
                    validated += 1;
                    if record.checksum != Some(on_disk.checksum) {
                        errors.push(format!(
                            "Checksum mismatch for version {}: history {:?}, file {}",
                            version, record.checksum, on_disk.checksum
                        ));
                    }
                }
            }
        }

        Ok(ValidateResult {
            success: errors.is_empty(),
            validated,
            errors,
        })
    }

    /// Mark an existing database as baselined at `version`.
    ///
    /// Refuses when any migration rows exist; only the schema marker is
    /// permitted.
    pub async fn baseline(&self, version: &str) -> Result<BaselineResult> {
        let mut conn = self.pool.get_conn().await?;
        self.history.ensure_exists(&mut conn).await?;

        let applied = self.history.get_all_records(&mut conn).await?;
        if applied
            .iter()
            .any(|r| r.record_type != HistoryRecordType::Schema)
        {
            return Ok(BaselineResult {
                success: false,
                version: version.to_string(),
                error_message: Some(
                    "Cannot baseline: migration history is not empty".to_string(),
                ),
            });
        }

        self.history
            .insert_schema_marker(&mut conn, &self.config.connection.user)
            .await?;
        self.history
            .insert_baseline(&mut conn, version, &self.config.connection.user)
            .await?;
        info!("Baselined at version {}", version);

        Ok(BaselineResult {
            success: true,
            version: version.to_string(),
            error_message: None,
        })
    }

    /// Remove failed rows and realign checksums with the files on disk.
    pub async fn repair(&self) -> Result<RepairResult> {
        let mut conn = self.pool.get_conn().await?;
        if !self.history.exists(&mut conn).await? {
            return Ok(RepairResult {
                failed_rows_deleted: 0,
                checksums_realigned: 0,
            });
        }

        let discovered = self.scan()?;
        let applied = self.history.get_all_records(&mut conn).await?;

        let mut deleted = 0usize;
        for record in applied.iter().filter(|r| !r.success) {
            self.history
                .delete_record(&mut conn, record.installed_rank)
                .await?;
            deleted += 1;
        }

        let by_version: HashMap<&str, &ResolvedMigration> = discovered
            .iter()
            .filter_map(|m| m.info.version.as_deref().map(|v| (v, m)))
            .collect();
        let by_description: HashMap<&str, &ResolvedMigration> = discovered
            .iter()
            .filter(|m| m.info.version.is_none())
            .map(|m| (m.info.description.as_str(), m))
            .collect();

        let mut realigned = 0usize;
        for record in applied.iter().filter(|r| r.success) {
            if record.record_type != HistoryRecordType::Sql
                && record.record_type != HistoryRecordType::SqlBaseline
            {
                continue;
            }
            let on_disk = match record.version.as_deref() {
                Some(v) => by_version.get(v).copied(),
                None => by_description.get(record.description.as_str()).copied(),
            };
            if let Some(m) = on_disk {
                if record.checksum != Some(m.checksum) {
                    self.history
                        .update_checksum(&mut conn, record.installed_rank, m.checksum)
                        .await?;
                    realigned += 1;
                }
            }
        }

        info!(
            "Repair: deleted {} failed row(s), realigned {} checksum(s)",
            deleted, realigned
        );
        Ok(RepairResult {
            failed_rows_deleted: deleted,
            checksums_realigned: realigned,
        })
    }
}

/// Convert a [`MigrateResult`] to pretty JSON (for `--output-json`).
impl MigrateResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_result_json_round_trip() {
        let result = MigrateResult {
            run_id: "r".to_string(),
            success: true,
            applied: vec!["V1__a.sql".to_string()],
            migrations_applied: 1,
            pending_count: 1,
            schema_created: true,
            baseline_applied: None,
            dry_run: false,
            duration_ms: 42,
            error_message: None,
        };
        let json = result.to_json().unwrap();
        let back: MigrateResult = serde_json::from_str(&json).unwrap();
        assert!(back.success);
        assert_eq!(back.applied, vec!["V1__a.sql"]);
    }

    #[test]
    fn test_callbacks_default_to_noop() {
        let callbacks = ProgressCallbacks::default();
        assert!(callbacks.on_warning.is_none());
        assert!(callbacks.on_migration_start.is_none());
        assert!(callbacks.on_migration_applied.is_none());
    }
}
