//! Batch execution under the two transaction disciplines.
//!
//! The executor owns the run's single connection for its duration. All
//! transaction control is explicit `BEGIN/COMMIT/ROLLBACK TRANSACTION`
//! statements on that connection, so history inserts land inside the same
//! transaction as the schema changes they record.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::checksum::checksum;
use crate::config::TransactionMode;
use crate::db::MssqlConnection;
use crate::error::{MigrateError, Result};
use crate::history::SchemaHistory;
use crate::migration::{MigrationType, ResolvedMigration};
use crate::placeholder::{PlaceholderContext, PlaceholderEngine};
use crate::splitter::split;

/// A migration applied during this run.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub script: String,
    pub version: Option<String>,
    pub execution_time_ms: i32,
}

/// What the run accomplished. When `error` is set, `applied` still lists the
/// migrations that remain committed (always empty under per-run discipline).
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub applied: Vec<AppliedMigration>,
    pub error: Option<MigrateError>,
}

/// Run-scoped executor settings.
pub struct Executor<'a> {
    pub history: &'a SchemaHistory,
    pub placeholders: &'a HashMap<String, String>,
    pub context: PlaceholderContext,
    pub transaction_mode: TransactionMode,
    pub insert_failed_row: bool,
    pub request_timeout: Duration,
    pub installed_by: String,
}

impl<'a> Executor<'a> {
    /// Execute the pending migrations in order, recording history rows in the
    /// same transaction(s) as the schema changes.
    pub async fn run(
        &self,
        conn: &mut MssqlConnection,
        pending: &[ResolvedMigration],
    ) -> Result<ExecutionReport> {
        if pending.is_empty() {
            return Ok(ExecutionReport::default());
        }
        match self.transaction_mode {
            TransactionMode::PerRun => self.run_single_transaction(conn, pending).await,
            TransactionMode::PerMigration => self.run_per_migration(conn, pending).await,
        }
    }

    /// One transaction around the whole run: either everything lands,
    /// history rows included, or the database is untouched.
    async fn run_single_transaction(
        &self,
        conn: &mut MssqlConnection,
        pending: &[ResolvedMigration],
    ) -> Result<ExecutionReport> {
        begin(conn).await?;
        let mut rank = match self.history.next_rank(conn).await {
            Ok(rank) => rank,
            Err(e) => {
                rollback(conn).await?;
                return Err(e);
            }
        };

        let mut report = ExecutionReport::default();
        for migration in pending {
            match self.execute_migration(conn, migration).await {
                Ok((executed, elapsed_ms)) => {
                    if let Err(e) = self
                        .history
                        .insert_applied_migration(conn, &executed, rank, elapsed_ms, &self.installed_by)
                        .await
                    {
                        rollback(conn).await?;
                        return Err(e);
                    }
                    report.applied.push(AppliedMigration {
                        script: executed.info.script_path.clone(),
                        version: executed.info.version.clone(),
                        execution_time_ms: elapsed_ms,
                    });
                    rank += 1;
                }
                Err(e) => {
                    warn!("Rolling back entire run: {}", e);
                    rollback(conn).await?;
                    report.applied.clear();
                    report.error = Some(e);
                    return Ok(report);
                }
            }
        }

        commit(conn).await?;
        Ok(report)
    }

    /// A fresh transaction per migration; earlier migrations stay committed.
    async fn run_per_migration(
        &self,
        conn: &mut MssqlConnection,
        pending: &[ResolvedMigration],
    ) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();

        for migration in pending {
            begin(conn).await?;
            let rank = match self.history.next_rank(conn).await {
                Ok(rank) => rank,
                Err(e) => {
                    rollback(conn).await?;
                    return Err(e);
                }
            };

            match self.execute_migration(conn, migration).await {
                Ok((executed, elapsed_ms)) => {
                    if let Err(e) = self
                        .history
                        .insert_applied_migration(conn, &executed, rank, elapsed_ms, &self.installed_by)
                        .await
                    {
                        rollback(conn).await?;
                        return Err(e);
                    }
                    commit(conn).await?;
                    report.applied.push(AppliedMigration {
                        script: executed.info.script_path.clone(),
                        version: executed.info.version.clone(),
                        execution_time_ms: elapsed_ms,
                    });
                }
                Err(e) => {
                    warn!("Rolling back {}: {}", migration.info.script_path, e);
                    rollback(conn).await?;
                    if self.insert_failed_row {
                        // Recorded outside the rolled-back transaction, so
                        // the failure stays visible to info and repair.
                        let rank = self.history.next_rank(conn).await?;
                        self.history
                            .insert_failed_migration(conn, migration, rank, 0, &self.installed_by)
                            .await?;
                    }
                    report.error = Some(e);
                    return Ok(report);
                }
            }
        }

        Ok(report)
    }

    /// Substitute, split, and run one migration's batches. Returns the
    /// migration as recorded (repeatables carry the post-substitution
    /// checksum) and the wall-clock batch time.
    async fn execute_migration(
        &self,
        conn: &mut MssqlConnection,
        migration: &ResolvedMigration,
    ) -> Result<(ResolvedMigration, i32)> {
        let context = self.context.with_filename(&migration.info.filename);
        let engine = PlaceholderEngine::new(self.placeholders, &context);
        let sql = engine.substitute(&migration.sql);

        let mut executed = migration.clone();
        if executed.info.migration_type == MigrationType::Repeatable {
            // The recorded checksum covers the substituted body, so a
            // runtime-varying placeholder forces re-execution next run.
            executed.checksum = checksum(&sql);
        }

        let batches = split(&sql);
        info!(
            "Executing {} ({} batches)",
            migration.info.script_path,
            batches.len()
        );

        let started = Instant::now();
        for batch in &batches {
            for _ in 0..batch.repeat_count {
                self.execute_batch(conn, migration, batch.start_line, &batch.sql)
                    .await?;
            }
        }
        let elapsed_ms = started.elapsed().as_millis().min(i32::MAX as u128) as i32;

        Ok((executed, elapsed_ms))
    }

    async fn execute_batch(
        &self,
        conn: &mut MssqlConnection,
        migration: &ResolvedMigration,
        start_line: usize,
        sql: &str,
    ) -> Result<()> {
        let fut = async {
            conn.simple_query(sql).await?.into_results().await?;
            Ok::<_, tiberius::error::Error>(())
        };
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(MigrateError::batch(
                migration.info.script_path.clone(),
                e,
                start_line,
                sql,
            )),
            Err(_) => Err(MigrateError::Timeout {
                migration: migration.info.script_path.clone(),
                timeout_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }
}

async fn begin(conn: &mut MssqlConnection) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", &[])
        .await
        .map_err(|e| MigrateError::Transaction {
            action: "begin".to_string(),
            message: e.to_string(),
        })?;
    Ok(())
}

async fn commit(conn: &mut MssqlConnection) -> Result<()> {
    conn.execute("COMMIT TRANSACTION", &[])
        .await
        .map_err(|e| MigrateError::Transaction {
            action: "commit".to_string(),
            message: e.to_string(),
        })?;
    Ok(())
}

async fn rollback(conn: &mut MssqlConnection) -> Result<()> {
    conn.execute("ROLLBACK TRANSACTION", &[])
        .await
        .map_err(|e| MigrateError::Transaction {
            action: "rollback".to_string(),
            message: e.to_string(),
        })?;
    Ok(())
}
