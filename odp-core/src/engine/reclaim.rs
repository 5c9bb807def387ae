//! Stale-resource reclamation.
//!
//! A process that crashed leaves `odp-<pid>-*` files behind in the temporary
//! and huge-page directories. When the OS later hands the same pid to a new
//! process, those files would collide with the new instance, so they are
//! removed before any subsystem allocates shared resources.
//!
//! Reclamation is best-effort: a missing directory means there is nothing to
//! do, and a file that cannot be removed is logged and skipped.

use std::fs;
use std::path::Path;

use tracing::{debug, error};

/// Name prefix of every file owned by the process with the given pid.
pub fn owner_prefix(pid: u32) -> String {
    format!("odp-{pid}-")
}

/// Outcome of one reclamation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Entries whose name matched the owner prefix.
    pub matched: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Remove every entry of `dir` whose name starts with `odp-<pid>-`.
pub fn reclaim(dir: &Path, pid: u32) -> ReclaimReport {
    let mut report = ReclaimReport::default();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Nothing to reclaim");
            return report;
        }
    };

    let prefix = owner_prefix(pid);
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(&prefix) {
            continue;
        }
        report.matched += 1;

        let path = entry.path();
        debug!(path = %path.display(), "Deleting obsolete file");
        match fs::remove_file(&path) {
            Ok(()) => report.removed += 1,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Unlink failed");
                report.failed += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_only_owner_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["odp-42-a", "odp-42-b", "odp-7-c", "odp-420-d", "unrelated"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let report = reclaim(dir.path(), 42);
        assert_eq!(report.matched, 2);
        assert_eq!(report.removed, 2);
        assert_eq!(report.failed, 0);

        assert!(!dir.path().join("odp-42-a").exists());
        assert!(!dir.path().join("odp-42-b").exists());
        assert!(dir.path().join("odp-7-c").exists());
        assert!(dir.path().join("odp-420-d").exists());
        assert!(dir.path().join("unrelated").exists());
    }

    #[test]
    fn test_missing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let report = reclaim(&dir.path().join("gone"), 42);
        assert_eq!(report, ReclaimReport::default());
    }

    #[test]
    fn test_undeletable_entry_is_counted_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        // remove_file refuses directories, which stands in for a permission failure.
        fs::create_dir(dir.path().join("odp-9-dir")).unwrap();
        fs::write(dir.path().join("odp-9-file"), b"x").unwrap();

        let report = reclaim(dir.path(), 9);
        assert_eq!(report.matched, 2);
        assert_eq!(report.removed, 1);
        assert_eq!(report.failed, 1);
        assert!(dir.path().join("odp-9-dir").exists());
    }

    #[test]
    fn test_prefix_format() {
        assert_eq!(owner_prefix(1234), "odp-1234-");
    }
}
