//! Migration metadata: filename parsing and resolved scripts.

mod scanner;

pub use scanner::scan_and_resolve;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{MigrateError, Result};

/// Kind of migration, determined by the filename prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationType {
    /// `V<version>__<description>.sql` — applied at most once.
    Versioned,
    /// `B<version>__<description>.sql` — subsumes all versions at or below.
    Baseline,
    /// `R__<description>.sql` — re-applied whenever its checksum changes.
    Repeatable,
}

/// Parsed filename metadata.
///
/// Invariant: `version` is `None` exactly when `migration_type` is
/// [`MigrationType::Repeatable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    pub migration_type: MigrationType,
    pub version: Option<String>,
    /// Human text; underscores in the filename become spaces.
    pub description: String,
    /// Basename of the file.
    pub filename: String,
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the scanned root, forward slashes. Recorded verbatim
    /// in the history table's `script` column.
    pub script_path: String,
}

/// A migration with its script body and checksum.
///
/// Immutable once resolved, except that a repeatable migration's checksum is
/// recomputed over the placeholder-substituted body just before it is
/// recorded.
#[derive(Debug, Clone)]
pub struct ResolvedMigration {
    pub info: MigrationInfo,
    pub sql: String,
    pub checksum: i32,
}

static VERSIONED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)([VB])(\d+)(.*?)__(.+)\.sql$").expect("valid name regex"));
static REPEATABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)R__(.+)\.sql$").expect("valid name regex"));

/// Parse a migration filename into [`MigrationInfo`].
///
/// `root` is the location the file was discovered under; the relative path
/// from it becomes `script_path`.
pub fn parse(path: &Path, root: &Path) -> Result<MigrationInfo> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| MigrateError::InvalidName(path.display().to_string()))?
        .to_string();

    let script_path = path
        .strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    if let Some(caps) = REPEATABLE_NAME.captures(&filename) {
        let description = caps[1].replace('_', " ");
        return Ok(MigrationInfo {
            migration_type: MigrationType::Repeatable,
            version: None,
            description,
            filename: filename.clone(),
            path: path.to_path_buf(),
            script_path,
        });
    }

    if let Some(caps) = VERSIONED_NAME.captures(&filename) {
        let migration_type = if caps[1].eq_ignore_ascii_case("B") {
            MigrationType::Baseline
        } else {
            MigrationType::Versioned
        };
        // Only the leading digits form the version; anything between them
        // and the `__` separator joins the description.
        let version = caps[2].to_string();
        let stray = &caps[3];
        let description = if stray.is_empty() {
            caps[4].replace('_', " ")
        } else {
            format!("{}{}", stray, &caps[4]).replace('_', " ")
        };
        return Ok(MigrationInfo {
            migration_type,
            version: Some(version),
            description,
            filename: filename.clone(),
            path: path.to_path_buf(),
            script_path,
        });
    }

    Err(MigrateError::InvalidName(filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_name(name: &str) -> Result<MigrationInfo> {
        let root = Path::new("/migrations");
        parse(&root.join(name), root)
    }

    #[test]
    fn test_versioned() {
        let info = parse_name("V202601200000__Add_Users.sql").unwrap();
        assert_eq!(info.migration_type, MigrationType::Versioned);
        assert_eq!(info.version.as_deref(), Some("202601200000"));
        assert_eq!(info.description, "Add Users");
        assert_eq!(info.script_path, "V202601200000__Add_Users.sql");
    }

    #[test]
    fn test_repeatable() {
        let info = parse_name("R__Refresh_Views.sql").unwrap();
        assert_eq!(info.migration_type, MigrationType::Repeatable);
        assert_eq!(info.version, None);
        assert_eq!(info.description, "Refresh Views");
    }

    #[test]
    fn test_baseline() {
        let info = parse_name("B202601122300__v3.0_Baseline.sql").unwrap();
        assert_eq!(info.migration_type, MigrationType::Baseline);
        assert_eq!(info.version.as_deref(), Some("202601122300"));
        assert_eq!(info.description, "v3.0 Baseline");
    }

    #[test]
    fn test_greedy_digits_with_trailing_text() {
        let info = parse_name("V202601200000__v3.1.x__Add.sql").unwrap();
        assert_eq!(info.version.as_deref(), Some("202601200000"));
        assert_eq!(info.description, "v3.1.x  Add");
    }

    #[test]
    fn test_version_with_stray_suffix_before_separator() {
        // Non-digits after the leading digits join the description.
        let info = parse_name("V12abc__Fix.sql").unwrap();
        assert_eq!(info.version.as_deref(), Some("12"));
        assert_eq!(info.description, "abcFix");
    }

    #[test]
    fn test_single_underscore_is_invalid() {
        assert!(matches!(
            parse_name("V1_Init.sql"),
            Err(MigrateError::InvalidName(_))
        ));
    }

    #[test]
    fn test_prefix_is_case_insensitive() {
        assert_eq!(
            parse_name("v1__x.sql").unwrap().migration_type,
            MigrationType::Versioned
        );
        assert_eq!(
            parse_name("b1__x.sql").unwrap().migration_type,
            MigrationType::Baseline
        );
        assert_eq!(
            parse_name("r__x.sql").unwrap().migration_type,
            MigrationType::Repeatable
        );
    }

    #[test]
    fn test_non_sql_and_garbage_are_invalid() {
        assert!(parse_name("readme.md").is_err());
        assert!(parse_name("X1__nope.sql").is_err());
        assert!(parse_name("V__missing_version.sql").is_err());
    }

    #[test]
    fn test_script_path_uses_forward_slashes() {
        let root = Path::new("/migrations");
        let info = parse(&root.join("sub").join("V1__a.sql"), root).unwrap();
        assert_eq!(info.script_path, "sub/V1__a.sql");
    }
}
