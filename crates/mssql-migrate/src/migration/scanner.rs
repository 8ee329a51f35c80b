//! Filesystem scanning for migration scripts.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::checksum::checksum;
use crate::error::Result;

use super::{parse, ResolvedMigration};

/// Recursively scan the configured locations and resolve every `*.sql` file.
///
/// Unparseable filenames and missing locations are reported through
/// `on_warning` and skipped; neither aborts the scan. The returned order is
/// unspecified — the resolver sorts.
pub fn scan_and_resolve(
    locations: &[String],
    mut on_warning: impl FnMut(&str),
) -> Result<Vec<ResolvedMigration>> {
    let mut resolved = Vec::new();

    for location in locations {
        let root = Path::new(location);
        if !root.is_dir() {
            on_warning(&format!("Migration location not found: {}", location));
            continue;
        }

        let mut files = Vec::new();
        collect_sql_files(root, &mut files)?;
        debug!("Found {} SQL files under {}", files.len(), location);

        for path in files {
            let info = match parse(&path, root) {
                Ok(info) => info,
                Err(e) => {
                    on_warning(&format!("Skipping {}: {}", path.display(), e));
                    continue;
                }
            };
            let sql = fs::read_to_string(&path)?;
            let checksum = checksum(&sql);
            resolved.push(ResolvedMigration { info, sql, checksum });
        }
    }

    Ok(resolved)
}

fn collect_sql_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            collect_sql_files(&path, out)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
        {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::MigrationType;
    use std::fs::File;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, body: &str) {
        let mut f = File::create(dir.join(name)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn test_scans_and_resolves() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "V1__init.sql", "CREATE TABLE a (id INT);");
        write_file(dir.path(), "R__views.sql", "SELECT 1;");

        let mut warnings = Vec::new();
        let resolved = scan_and_resolve(
            &[dir.path().to_string_lossy().to_string()],
            |w| warnings.push(w.to_string()),
        )
        .unwrap();

        assert_eq!(resolved.len(), 2);
        assert!(warnings.is_empty());
        let versioned = resolved
            .iter()
            .find(|m| m.info.migration_type == MigrationType::Versioned)
            .unwrap();
        assert_eq!(versioned.checksum, checksum("CREATE TABLE a (id INT);"));
    }

    #[test]
    fn test_recurses_into_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("2026");
        fs::create_dir(&sub).unwrap();
        write_file(&sub, "V2__sub.sql", "SELECT 2;");

        let resolved =
            scan_and_resolve(&[dir.path().to_string_lossy().to_string()], |_| {}).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].info.script_path, "2026/V2__sub.sql");
    }

    #[test]
    fn test_invalid_name_warns_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "V1_broken.sql", "SELECT 1;");
        write_file(dir.path(), "V1__good.sql", "SELECT 1;");

        let mut warnings = Vec::new();
        let resolved = scan_and_resolve(
            &[dir.path().to_string_lossy().to_string()],
            |w| warnings.push(w.to_string()),
        )
        .unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("V1_broken.sql"));
    }

    #[test]
    fn test_missing_location_warns_and_skips() {
        let mut warnings = Vec::new();
        let resolved = scan_and_resolve(&["does/not/exist".to_string()], |w| {
            warnings.push(w.to_string())
        })
        .unwrap();
        assert!(resolved.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_non_sql_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "notes.txt", "not sql");
        write_file(dir.path(), "V1__a.SQL", "SELECT 1;");

        let resolved =
            scan_and_resolve(&[dir.path().to_string_lossy().to_string()], |_| {}).unwrap();
        assert_eq!(resolved.len(), 1);
    }
}
