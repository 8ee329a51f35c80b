//! Diffing discovered scripts against recorded history.
//!
//! The resolver never touches the database or the filesystem; it takes the
//! scanner's output and the history rows and produces the ordered pending
//! list plus a classified status report for `info`.
//!
//! Version ordering is lexicographic on the version strings. Timestamp
//! versions (the convention in this corpus) sort correctly under that rule.

use std::collections::HashMap;

use crate::history::{HistoryRecord, HistoryRecordType};
use crate::migration::{MigrationType, ResolvedMigration};

/// Classification of one migration for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// On disk, not yet applied (or deliberately skipped as out-of-order).
    Pending,
    /// Applied successfully.
    Applied,
    /// Recorded in history but no longer on disk.
    Missing,
    /// Recorded in history with `success = false`.
    Failed,
    /// Repeatable whose checksum no longer matches the recorded one.
    Outdated,
    /// An applied baseline row.
    Baseline,
    /// Covered by the baseline about to be applied.
    AboveBaseline,
}

impl MigrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::Pending => "PENDING",
            MigrationState::Applied => "APPLIED",
            MigrationState::Missing => "MISSING",
            MigrationState::Failed => "FAILED",
            MigrationState::Outdated => "OUTDATED",
            MigrationState::Baseline => "BASELINE",
            MigrationState::AboveBaseline => "ABOVE_BASELINE",
        }
    }
}

/// One line of the status report: the union of disk and history entries.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub version: Option<String>,
    pub description: String,
    pub script: String,
    pub state: MigrationState,
}

/// Output of [`resolve`].
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Migrations to execute, in execution order: the selected baseline (if
    /// any), then versioned ascending, then repeatables in discovery order.
    pub pending: Vec<ResolvedMigration>,
    pub status_report: Vec<StatusEntry>,
    pub should_baseline: bool,
    pub effective_baseline_version: Option<String>,
    pub baseline_auto_selected: bool,
    pub baseline_file_count: usize,
}

/// Classify every discovered and applied migration and order the pending set.
pub fn resolve(
    discovered: &[ResolvedMigration],
    applied: &[HistoryRecord],
    baseline_version: &str,
    baseline_on_migrate: bool,
    out_of_order: bool,
) -> Resolution {
    let mut versioned: Vec<&ResolvedMigration> = Vec::new();
    let mut baselines: Vec<&ResolvedMigration> = Vec::new();
    let mut repeatables: Vec<&ResolvedMigration> = Vec::new();
    for m in discovered {
        match m.info.migration_type {
            MigrationType::Versioned => versioned.push(m),
            MigrationType::Baseline => baselines.push(m),
            MigrationType::Repeatable => repeatables.push(m),
        }
    }
    versioned.sort_by(|a, b| a.info.version.cmp(&b.info.version));
    baselines.sort_by(|a, b| a.info.version.cmp(&b.info.version));

    // Latest row wins for a given version or description; iterate in rank
    // order so later rows overwrite earlier ones.
    let mut applied_by_version: HashMap<&str, &HistoryRecord> = HashMap::new();
    let mut applied_repeatables: HashMap<&str, &HistoryRecord> = HashMap::new();
    for record in applied {
        if record.record_type == HistoryRecordType::Schema {
            continue;
        }
        match &record.version {
            Some(v) => {
                applied_by_version.insert(v.as_str(), record);
            }
            None => {
                if record.record_type == HistoryRecordType::Sql {
                    applied_repeatables.insert(record.description.as_str(), record);
                }
            }
        }
    }

    let has_migration_rows = applied.iter().any(|r| {
        matches!(
            r.record_type,
            HistoryRecordType::Sql | HistoryRecordType::SqlBaseline | HistoryRecordType::Baseline
        )
    });
    let should_baseline = baseline_on_migrate && !has_migration_rows;

    let highest_applied_version: Option<&str> = applied
        .iter()
        .filter(|r| r.record_type != HistoryRecordType::Schema)
        .filter_map(|r| r.version.as_deref())
        .max();

    let mut pending: Vec<ResolvedMigration> = Vec::new();
    let mut status_report: Vec<StatusEntry> = Vec::new();

    // Baseline selection. The sentinel "1" means "not explicitly set" and
    // routes to auto-selection of the highest-versioned baseline.
    let mut selected_baseline: Option<&ResolvedMigration> = None;
    let mut baseline_auto_selected = false;
    if should_baseline && !baselines.is_empty() {
        if baseline_version == "1" {
            selected_baseline = baselines.last().copied();
            baseline_auto_selected = true;
        } else {
            selected_baseline = baselines
                .iter()
                .find(|b| b.info.version.as_deref() == Some(baseline_version))
                .copied();
        }
    }
    let effective_baseline_version: Option<String> =
        selected_baseline.and_then(|b| b.info.version.clone());

    if let Some(baseline) = selected_baseline {
        status_report.push(StatusEntry {
            version: baseline.info.version.clone(),
            description: baseline.info.description.clone(),
            script: baseline.info.script_path.clone(),
            state: MigrationState::Pending,
        });
        pending.push(baseline.clone());
    }

    // Versioned migrations, ascending.
    for m in &versioned {
        let version = m.info.version.as_deref().unwrap_or_default();
        let state = if let Some(record) = applied_by_version.get(version) {
            if record.success {
                MigrationState::Applied
            } else {
                MigrationState::Failed
            }
        } else if should_baseline
            && effective_baseline_version
                .as_deref()
                .is_some_and(|b| version <= b)
        {
            MigrationState::AboveBaseline
        } else if !out_of_order && highest_applied_version.is_some_and(|h| version < h) {
            // Visible but skipped: an out-of-order migration stays PENDING
            // in the report without entering the execution list.
            MigrationState::Pending
        } else {
            pending.push((*m).clone());
            MigrationState::Pending
        };
        status_report.push(StatusEntry {
            version: m.info.version.clone(),
            description: m.info.description.clone(),
            script: m.info.script_path.clone(),
            state,
        });
    }

    // History rows with no matching file on disk.
    let on_disk_versions: HashMap<&str, &ResolvedMigration> = versioned
        .iter()
        .chain(baselines.iter())
        .filter_map(|m| m.info.version.as_deref().map(|v| (v, *m)))
        .collect();
    for record in applied {
        let Some(version) = record.version.as_deref() else {
            continue;
        };
        if record.record_type == HistoryRecordType::Schema {
            continue;
        }
        match record.record_type {
            HistoryRecordType::Baseline => {
                // A baseline marker never has a script file.
                status_report.push(StatusEntry {
                    version: Some(version.to_string()),
                    description: record.description.clone(),
                    script: record.script.clone(),
                    state: MigrationState::Baseline,
                });
            }
            HistoryRecordType::SqlBaseline => {
                let state = if on_disk_versions.contains_key(version) {
                    MigrationState::Baseline
                } else {
                    MigrationState::Missing
                };
                status_report.push(StatusEntry {
                    version: Some(version.to_string()),
                    description: record.description.clone(),
                    script: record.script.clone(),
                    state,
                });
            }
            _ => {
                if !on_disk_versions.contains_key(version) {
                    status_report.push(StatusEntry {
                        version: Some(version.to_string()),
                        description: record.description.clone(),
                        script: record.script.clone(),
                        state: MigrationState::Missing,
                    });
                }
            }
        }
    }

    // Repeatables, in discovery order.
    for m in &repeatables {
        let state = match applied_repeatables.get(m.info.description.as_str()) {
            None => {
                pending.push((*m).clone());
                MigrationState::Pending
            }
            Some(record) if record.checksum != Some(m.checksum) => {
                pending.push((*m).clone());
                MigrationState::Outdated
            }
            Some(_) => MigrationState::Applied,
        };
        status_report.push(StatusEntry {
            version: None,
            description: m.info.description.clone(),
            script: m.info.script_path.clone(),
            state,
        });
    }

    Resolution {
        pending,
        status_report,
        should_baseline,
        effective_baseline_version,
        baseline_auto_selected,
        baseline_file_count: baselines.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum;
    use crate::migration::MigrationInfo;
    use chrono::NaiveDateTime;
    use std::path::PathBuf;

    fn disk(name: &str, sql: &str) -> ResolvedMigration {
        let root = PathBuf::from("/migrations");
        let info = crate::migration::parse(&root.join(name), &root).unwrap();
        ResolvedMigration {
            info,
            sql: sql.to_string(),
            checksum: checksum(sql),
        }
    }

    fn row(
        rank: i32,
        version: Option<&str>,
        description: &str,
        record_type: HistoryRecordType,
        checksum: Option<i32>,
        success: bool,
    ) -> HistoryRecord {
        HistoryRecord {
            installed_rank: rank,
            version: version.map(String::from),
            description: description.to_string(),
            record_type,
            script: format!("{}.sql", description.replace(' ', "_")),
            checksum,
            installed_by: "sa".to_string(),
            installed_on: NaiveDateTime::default(),
            execution_time: 0,
            success,
        }
    }

    fn schema_marker() -> HistoryRecord {
        row(0, None, "<< Flyway Schema Creation >>", HistoryRecordType::Schema, None, true)
    }

    fn states_of(resolution: &Resolution) -> Vec<(Option<String>, MigrationState)> {
        resolution
            .status_report
            .iter()
            .map(|e| (e.version.clone(), e.state))
            .collect()
    }

    #[test]
    fn test_fresh_database_all_pending_in_order() {
        let discovered = vec![
            disk("V2__b.sql", "SELECT 2;"),
            disk("R__views.sql", "SELECT 9;"),
            disk("V1__a.sql", "SELECT 1;"),
        ];
        let resolution = resolve(&discovered, &[schema_marker()], "1", false, false);

        let names: Vec<_> = resolution
            .pending
            .iter()
            .map(|m| m.info.filename.clone())
            .collect();
        assert_eq!(names, vec!["V1__a.sql", "V2__b.sql", "R__views.sql"]);
        assert!(!resolution.should_baseline);
    }

    #[test]
    fn test_applied_and_failed_classification() {
        let discovered = vec![disk("V1__a.sql", "SELECT 1;"), disk("V2__b.sql", "SELECT 2;")];
        let applied = vec![
            schema_marker(),
            row(1, Some("1"), "a", HistoryRecordType::Sql, Some(1), true),
            row(2, Some("2"), "b", HistoryRecordType::Sql, Some(2), false),
        ];
        let resolution = resolve(&discovered, &applied, "1", false, false);
        assert!(resolution.pending.is_empty());
        assert_eq!(
            states_of(&resolution),
            vec![
                (Some("1".into()), MigrationState::Applied),
                (Some("2".into()), MigrationState::Failed),
            ]
        );
    }

    #[test]
    fn test_auto_baseline_selects_highest() {
        // Scenario: three baselines, two versioned files, empty history.
        let discovered = vec![
            disk("B20240101__v1.sql", "B1"),
            disk("B20250101__v2.sql", "B2"),
            disk("B20260122__v3.sql", "B3"),
            disk("V20240102__early.sql", "E"),
            disk("V20260201__late.sql", "L"),
        ];
        let resolution = resolve(&discovered, &[], "1", true, false);

        assert!(resolution.should_baseline);
        assert!(resolution.baseline_auto_selected);
        assert_eq!(resolution.baseline_file_count, 3);
        assert_eq!(
            resolution.effective_baseline_version.as_deref(),
            Some("20260122")
        );

        let names: Vec<_> = resolution
            .pending
            .iter()
            .map(|m| m.info.filename.clone())
            .collect();
        assert_eq!(names, vec!["B20260122__v3.sql", "V20260201__late.sql"]);

        let early = resolution
            .status_report
            .iter()
            .find(|e| e.version.as_deref() == Some("20240102"))
            .unwrap();
        assert_eq!(early.state, MigrationState::AboveBaseline);
    }

    #[test]
    fn test_explicit_baseline_version_must_match() {
        let discovered = vec![
            disk("B20240101__v1.sql", "B1"),
            disk("B20250101__v2.sql", "B2"),
            disk("V20260201__late.sql", "L"),
        ];
        let resolution = resolve(&discovered, &[], "20240101", true, false);
        assert_eq!(
            resolution.effective_baseline_version.as_deref(),
            Some("20240101")
        );
        assert!(!resolution.baseline_auto_selected);

        // No match: nothing selected, everything pends normally.
        let resolution = resolve(&discovered, &[], "20230101", true, false);
        assert_eq!(resolution.effective_baseline_version, None);
        let names: Vec<_> = resolution
            .pending
            .iter()
            .map(|m| m.info.filename.clone())
            .collect();
        assert_eq!(names, vec!["V20260201__late.sql"]);
    }

    #[test]
    fn test_no_baseline_when_history_has_migrations() {
        let discovered = vec![disk("B1__base.sql", "B"), disk("V2__next.sql", "N")];
        let applied = vec![
            schema_marker(),
            row(1, Some("1"), "old", HistoryRecordType::Sql, Some(1), true),
        ];
        let resolution = resolve(&discovered, &applied, "1", true, false);
        assert!(!resolution.should_baseline);
        let names: Vec<_> = resolution
            .pending
            .iter()
            .map(|m| m.info.filename.clone())
            .collect();
        assert_eq!(names, vec!["V2__next.sql"]);
    }

    #[test]
    fn test_out_of_order_skipped_but_reported_pending() {
        let discovered = vec![disk("V1__early.sql", "E"), disk("V3__late.sql", "L")];
        let applied = vec![
            schema_marker(),
            row(1, Some("2"), "mid", HistoryRecordType::Sql, Some(1), true),
        ];

        let resolution = resolve(&discovered, &applied, "1", false, false);
        let names: Vec<_> = resolution
            .pending
            .iter()
            .map(|m| m.info.filename.clone())
            .collect();
        assert_eq!(names, vec!["V3__late.sql"]);
        // V1 is visible as PENDING without entering the execution list.
        let v1 = resolution
            .status_report
            .iter()
            .find(|e| e.version.as_deref() == Some("1"))
            .unwrap();
        assert_eq!(v1.state, MigrationState::Pending);

        // With out_of_order, V1 executes (still in version order).
        let resolution = resolve(&discovered, &applied, "1", false, true);
        let names: Vec<_> = resolution
            .pending
            .iter()
            .map(|m| m.info.filename.clone())
            .collect();
        assert_eq!(names, vec!["V1__early.sql", "V3__late.sql"]);
    }

    #[test]
    fn test_missing_migration_reported() {
        let applied = vec![
            schema_marker(),
            row(1, Some("1"), "gone", HistoryRecordType::Sql, Some(1), true),
        ];
        let resolution = resolve(&[], &applied, "1", false, false);
        assert_eq!(
            states_of(&resolution),
            vec![(Some("1".into()), MigrationState::Missing)]
        );
    }

    #[test]
    fn test_applied_baseline_row_reported_as_baseline() {
        let applied = vec![
            schema_marker(),
            row(1, Some("5"), "<< Flyway Baseline >>", HistoryRecordType::Baseline, None, true),
        ];
        let resolution = resolve(&[], &applied, "1", true, false);
        assert!(!resolution.should_baseline);
        assert_eq!(
            states_of(&resolution),
            vec![(Some("5".into()), MigrationState::Baseline)]
        );
    }

    #[test]
    fn test_repeatable_lifecycle() {
        let fresh = disk("R__views.sql", "CREATE VIEW v AS SELECT 1;");

        // Never applied: pending.
        let resolution = resolve(&[fresh.clone()], &[schema_marker()], "1", false, false);
        assert_eq!(resolution.pending.len(), 1);
        assert_eq!(resolution.status_report[0].state, MigrationState::Pending);

        // Applied with the same checksum: applied, not pending.
        let applied = vec![
            schema_marker(),
            row(1, None, "views", HistoryRecordType::Sql, Some(fresh.checksum), true),
        ];
        let resolution = resolve(&[fresh.clone()], &applied, "1", false, false);
        assert!(resolution.pending.is_empty());
        assert_eq!(resolution.status_report[0].state, MigrationState::Applied);

        // Applied with a different checksum: outdated, re-run.
        let applied = vec![
            schema_marker(),
            row(1, None, "views", HistoryRecordType::Sql, Some(fresh.checksum ^ 1), true),
        ];
        let resolution = resolve(&[fresh], &applied, "1", false, false);
        assert_eq!(resolution.pending.len(), 1);
        assert_eq!(resolution.status_report[0].state, MigrationState::Outdated);
    }

    #[test]
    fn test_latest_repeatable_row_wins() {
        let fresh = disk("R__views.sql", "V2 body");
        let applied = vec![
            schema_marker(),
            row(1, None, "views", HistoryRecordType::Sql, Some(123), true),
            row(2, None, "views", HistoryRecordType::Sql, Some(fresh.checksum), true),
        ];
        let resolution = resolve(&[fresh], &applied, "1", false, false);
        assert!(resolution.pending.is_empty());
    }

    #[test]
    fn test_pending_subset_property() {
        // pending ⊆ {state ∈ {PENDING, OUTDATED}} and contains every such
        // migration except skipped out-of-order ones.
        let discovered = vec![
            disk("V1__a.sql", "A"),
            disk("V5__e.sql", "E"),
            disk("R__r.sql", "R"),
        ];
        let applied = vec![
            schema_marker(),
            row(1, Some("3"), "mid", HistoryRecordType::Sql, Some(1), true),
            row(2, None, "r", HistoryRecordType::Sql, Some(999), true),
        ];
        let resolution = resolve(&discovered, &applied, "1", false, false);
        let names: Vec<_> = resolution
            .pending
            .iter()
            .map(|m| m.info.filename.clone())
            .collect();
        // V1 is out-of-order (skipped), V5 pends, R is outdated.
        assert_eq!(names, vec!["V5__e.sql", "R__r.sql"]);
    }

    #[test]
    fn test_version_ordering_is_lexicographic() {
        let discovered = vec![
            disk("V20260102__b.sql", "B"),
            disk("V20260101__a.sql", "A"),
        ];
        let resolution = resolve(&discovered, &[], "1", false, false);
        let names: Vec<_> = resolution
            .pending
            .iter()
            .map(|m| m.info.filename.clone())
            .collect();
        assert_eq!(names, vec!["V20260101__a.sql", "V20260102__b.sql"]);
    }
}
