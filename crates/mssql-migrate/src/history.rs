//! Schema-history table operations.
//!
//! The table layout is a wire-compatibility surface shared with the
//! reference tool: column names, widths, nullability, and the index name
//! must not change. Identifiers are interpolated as bracketed identifiers;
//! every row value is a bound parameter.

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::db::MssqlConnection;
use crate::error::{MigrateError, Result};
use crate::ident::quote_ident;
use crate::migration::{MigrationType, ResolvedMigration};

/// Row type discriminator in the history table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRecordType {
    /// The rank-0 marker recording schema creation.
    Schema,
    /// A versioned or repeatable SQL migration.
    Sql,
    /// A baseline script applied by `migrate`.
    SqlBaseline,
    /// A baseline marker inserted by the `baseline` command.
    Baseline,
}

pub fn type_to_str(t: HistoryRecordType) -> &'static str {
    match t {
        HistoryRecordType::Schema => "SCHEMA",
        HistoryRecordType::Sql => "SQL",
        HistoryRecordType::SqlBaseline => "SQL_BASELINE",
        HistoryRecordType::Baseline => "BASELINE",
    }
}

pub fn str_to_type(s: &str) -> Result<HistoryRecordType> {
    match s {
        "SCHEMA" => Ok(HistoryRecordType::Schema),
        "SQL" => Ok(HistoryRecordType::Sql),
        "SQL_BASELINE" => Ok(HistoryRecordType::SqlBaseline),
        "BASELINE" => Ok(HistoryRecordType::Baseline),
        other => Err(MigrateError::Validation(format!(
            "Unknown history record type: {}",
            other
        ))),
    }
}

/// One row of the schema-history table.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub installed_rank: i32,
    pub version: Option<String>,
    pub description: String,
    pub record_type: HistoryRecordType,
    pub script: String,
    pub checksum: Option<i32>,
    pub installed_by: String,
    pub installed_on: NaiveDateTime,
    pub execution_time: i32,
    pub success: bool,
}

/// Handle on the history table of one schema.
#[derive(Debug, Clone)]
pub struct SchemaHistory {
    schema: String,
    table: String,
}

const SCHEMA_MARKER_DESCRIPTION: &str = "<< Flyway Schema Creation >>";
const BASELINE_DESCRIPTION: &str = "<< Flyway Baseline >>";

impl SchemaHistory {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    fn qualified(&self) -> Result<String> {
        Ok(format!(
            "{}.{}",
            quote_ident(&self.schema)?,
            quote_ident(&self.table)?
        ))
    }

    /// Create the schema, the history table, and the success index if any of
    /// them are missing. Idempotent.
    pub async fn ensure_exists(&self, conn: &mut MssqlConnection) -> Result<()> {
        let schema_ident = quote_ident(&self.schema)?;
        let table_ident = quote_ident(&self.table)?;
        let qualified = self.qualified()?;

        let sql = format!(
            "IF NOT EXISTS (SELECT * FROM sys.schemas WHERE name = @P1)
             BEGIN
                 EXEC('CREATE SCHEMA {}')
             END",
            schema_ident.replace('\'', "''")
        );
        conn.execute(sql, &[&self.schema]).await?;

        let sql = format!(
            "IF NOT EXISTS (SELECT * FROM sys.tables WHERE name = @P1 AND schema_id = SCHEMA_ID(@P2))
             BEGIN
                 CREATE TABLE {qualified} (
                     [installed_rank] INT NOT NULL,
                     [version] NVARCHAR(50) NULL,
                     [description] NVARCHAR(200) NOT NULL,
                     [type] NVARCHAR(20) NOT NULL,
                     [script] NVARCHAR(1000) NOT NULL,
                     [checksum] INT NULL,
                     [installed_by] NVARCHAR(100) NOT NULL,
                     [installed_on] DATETIME NOT NULL DEFAULT GETDATE(),
                     [execution_time] INT NOT NULL,
                     [success] BIT NOT NULL,
                     CONSTRAINT {pk} PRIMARY KEY ([installed_rank])
                 )
             END",
            qualified = qualified,
            pk = quote_ident(&format!("{}_pk", self.table))?,
        );
        conn.execute(sql, &[&self.table, &self.schema]).await?;

        let index_name = format!("{}_s_idx", self.table);
        let object_name = format!("{}.{}", schema_ident, table_ident);
        let sql = format!(
            "IF NOT EXISTS (SELECT * FROM sys.indexes WHERE name = @P1 AND object_id = OBJECT_ID(@P2))
             BEGIN
                 CREATE INDEX {} ON {} ([success])
             END",
            quote_ident(&index_name)?,
            qualified,
        );
        conn.execute(sql, &[&index_name, &object_name]).await?;

        debug!("Ensured history table {}", qualified);
        Ok(())
    }

    /// Whether the history table exists.
    pub async fn exists(&self, conn: &mut MssqlConnection) -> Result<bool> {
        let row = conn
            .query(
                "SELECT COUNT(*) FROM sys.tables WHERE name = @P1 AND schema_id = SCHEMA_ID(@P2)",
                &[&self.table, &self.schema],
            )
            .await?
            .into_row()
            .await?;
        let count: i32 = row.as_ref().and_then(|r| r.get(0)).unwrap_or(0);
        Ok(count > 0)
    }

    /// All history rows, ordered by installed rank.
    pub async fn get_all_records(&self, conn: &mut MssqlConnection) -> Result<Vec<HistoryRecord>> {
        let sql = format!(
            "SELECT [installed_rank], [version], [description], [type], [script],
                    [checksum], [installed_by], [installed_on], [execution_time], [success]
             FROM {}
             ORDER BY [installed_rank]",
            self.qualified()?
        );
        let rows = conn.simple_query(sql).await?.into_first_result().await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let type_str: &str = row
                .get(3)
                .ok_or_else(|| MigrateError::Validation("history row missing type".into()))?;
            records.push(HistoryRecord {
                installed_rank: row.get(0).unwrap_or(0),
                version: row.get::<&str, _>(1).map(String::from),
                description: row.get::<&str, _>(2).unwrap_or_default().to_string(),
                record_type: str_to_type(type_str)?,
                script: row.get::<&str, _>(4).unwrap_or_default().to_string(),
                checksum: row.get(5),
                installed_by: row.get::<&str, _>(6).unwrap_or_default().to_string(),
                installed_on: row.get(7).unwrap_or_default(),
                execution_time: row.get(8).unwrap_or(0),
                success: row.get(9).unwrap_or(false),
            });
        }
        Ok(records)
    }

    /// The next free rank: `MAX(installed_rank) + 1`, starting at 0 for an
    /// empty table.
    pub async fn next_rank(&self, conn: &mut MssqlConnection) -> Result<i32> {
        let sql = format!(
            "SELECT ISNULL(MAX([installed_rank]), -1) FROM {}",
            self.qualified()?
        );
        let row = conn.simple_query(sql).await?.into_row().await?;
        let max: i32 = row.as_ref().and_then(|r| r.get(0)).unwrap_or(-1);
        Ok(max + 1)
    }

    /// Insert the rank-0 schema-creation marker. No-op when rank 0 exists.
    pub async fn insert_schema_marker(
        &self,
        conn: &mut MssqlConnection,
        user: &str,
    ) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE [installed_rank] = 0",
            self.qualified()?
        );
        let row = conn.simple_query(sql).await?.into_row().await?;
        let count: i32 = row.as_ref().and_then(|r| r.get(0)).unwrap_or(0);
        if count > 0 {
            return Ok(false);
        }

        let script = format!("[{}]", self.schema);
        self.insert_row(
            conn,
            0,
            None,
            SCHEMA_MARKER_DESCRIPTION,
            HistoryRecordType::Schema,
            &script,
            None,
            user,
            0,
            true,
        )
        .await?;
        info!("Created schema marker for [{}]", self.schema);
        Ok(true)
    }

    /// Record a successfully applied migration.
    pub async fn insert_applied_migration(
        &self,
        conn: &mut MssqlConnection,
        migration: &ResolvedMigration,
        rank: i32,
        execution_time_ms: i32,
        user: &str,
    ) -> Result<()> {
        self.insert_migration(conn, migration, rank, execution_time_ms, user, true)
            .await
    }

    /// Record a failed migration (per-migration discipline only).
    pub async fn insert_failed_migration(
        &self,
        conn: &mut MssqlConnection,
        migration: &ResolvedMigration,
        rank: i32,
        execution_time_ms: i32,
        user: &str,
    ) -> Result<()> {
        self.insert_migration(conn, migration, rank, execution_time_ms, user, false)
            .await
    }

    async fn insert_migration(
        &self,
        conn: &mut MssqlConnection,
        migration: &ResolvedMigration,
        rank: i32,
        execution_time_ms: i32,
        user: &str,
        success: bool,
    ) -> Result<()> {
        let record_type = match migration.info.migration_type {
            MigrationType::Baseline => HistoryRecordType::SqlBaseline,
            _ => HistoryRecordType::Sql,
        };
        self.insert_row(
            conn,
            rank,
            migration.info.version.as_deref(),
            &migration.info.description,
            record_type,
            &migration.info.script_path,
            Some(migration.checksum),
            user,
            execution_time_ms,
            success,
        )
        .await
    }

    /// Insert a `BASELINE` marker row for the `baseline` command.
    pub async fn insert_baseline(
        &self,
        conn: &mut MssqlConnection,
        version: &str,
        user: &str,
    ) -> Result<()> {
        let rank = self.next_rank(conn).await?;
        self.insert_row(
            conn,
            rank,
            Some(version),
            BASELINE_DESCRIPTION,
            HistoryRecordType::Baseline,
            BASELINE_DESCRIPTION,
            None,
            user,
            0,
            true,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_row(
        &self,
        conn: &mut MssqlConnection,
        rank: i32,
        version: Option<&str>,
        description: &str,
        record_type: HistoryRecordType,
        script: &str,
        checksum: Option<i32>,
        user: &str,
        execution_time_ms: i32,
        success: bool,
    ) -> Result<()> {
        // Column widths are part of the compatibility surface; values are
        // clipped rather than letting the server reject the row.
        let description: String = description.chars().take(200).collect();
        let script: String = script.chars().take(1000).collect();
        let user: String = user.chars().take(100).collect();

        let sql = format!(
            "INSERT INTO {} ([installed_rank], [version], [description], [type], [script],
                             [checksum], [installed_by], [execution_time], [success])
             VALUES (@P1, @P2, @P3, @P4, @P5, @P6, @P7, @P8, @P9)",
            self.qualified()?
        );
        conn.execute(
            sql,
            &[
                &rank,
                &version,
                &description,
                &type_to_str(record_type),
                &script,
                &checksum,
                &user,
                &execution_time_ms,
                &success,
            ],
        )
        .await?;
        Ok(())
    }

    /// Rewrite the checksum of one row. Repair only.
    pub async fn update_checksum(
        &self,
        conn: &mut MssqlConnection,
        rank: i32,
        checksum: i32,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET [checksum] = @P1 WHERE [installed_rank] = @P2",
            self.qualified()?
        );
        conn.execute(sql, &[&checksum, &rank]).await?;
        Ok(())
    }

    /// Delete one row. Repair only.
    pub async fn delete_record(&self, conn: &mut MssqlConnection, rank: i32) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE [installed_rank] = @P1",
            self.qualified()?
        );
        conn.execute(sql, &[&rank]).await?;
        Ok(())
    }
}
