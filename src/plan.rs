//! Aggregation of walker output into a backup plan or a size report.

use crate::walk::FileRecord;
use rustc_hash::FxHashSet;
use std::cmp::Reverse;

/// Files to upload, plus the keys that must be left alone on the remote side.
#[derive(Debug, Clone, Default)]
pub struct BackupPlan {
    pub files: Vec<FileRecord>,
    pub excluded: Vec<FileRecord>,
    protected_files: FxHashSet<String>,
    protected_dirs: Vec<String>,
    protect_all: bool,
}

impl BackupPlan {
    pub fn from_records(records: impl IntoIterator<Item = FileRecord>) -> Self {
        let mut plan = BackupPlan::default();
        for record in records {
            if record.is_included() {
                plan.files.push(record);
                continue;
            }
            let key = record.key();
            if record.is_dir && key.is_empty() {
                // The source root itself could not be read.
                plan.protect_all = true;
            } else if record.is_dir {
                plan.protected_dirs.push(format!("{key}/"));
            }
            plan.protected_files.insert(key);
            plan.excluded.push(record);
        }
        plan
    }

    /// True when `key` names an excluded entry or lies under an excluded directory.
    ///
    /// Remote objects under protected keys are never deleted by a sync.
    pub fn is_protected(&self, key: &str) -> bool {
        self.protect_all
            || self.protected_files.contains(key)
            || self.protected_dirs.iter().any(|dir| key.starts_with(dir.as_str()))
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Totals for `compute-backup-size`.
#[derive(Debug, Clone, Default)]
pub struct SizeReport {
    pub total_bytes: u64,
    pub file_count: usize,
    pub excluded_count: usize,
    /// Largest included files, biggest first.
    pub largest: Vec<FileRecord>,
    pub records: Vec<FileRecord>,
}

impl SizeReport {
    /// Keep every record and the `largest` biggest included files.
    pub fn from_records(records: impl IntoIterator<Item = FileRecord>, largest: usize) -> Self {
        let records: Vec<FileRecord> = records.into_iter().collect();
        let mut report = SizeReport::default();
        for record in &records {
            if record.is_included() {
                report.total_bytes += record.size;
                report.file_count += 1;
            } else {
                report.excluded_count += 1;
            }
        }

        if largest > 0 {
            let mut included: Vec<&FileRecord> = records.iter().filter(|r| r.is_included()).collect();
            included.sort_by(|a, b| (Reverse(a.size), &a.path).cmp(&(Reverse(b.size), &b.path)));
            report.largest = included.into_iter().take(largest).cloned().collect();
        }
        report.records = records;
        report
    }

    pub fn included(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.iter().filter(|r| r.is_included())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walk::Classification;
    use std::path::PathBuf;

    fn record(path: &str, size: u64, is_dir: bool, classification: Classification) -> FileRecord {
        FileRecord {
            path: PathBuf::from(path),
            size,
            is_dir,
            classification,
        }
    }

    fn included(path: &str, size: u64) -> FileRecord {
        record(path, size, false, Classification::Included)
    }

    #[test]
    fn test_plan_keeps_only_included() {
        let plan = BackupPlan::from_records(vec![
            included("a.txt", 10),
            record("b.log", 5, false, Classification::ExcludedByIgnore("`*.log`".into())),
            included("c/d.txt", 7),
        ]);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.total_bytes(), 17);
        assert_eq!(plan.excluded.len(), 1);
    }

    #[test]
    fn test_protected_keys() {
        let plan = BackupPlan::from_records(vec![
            record("node_modules", 0, true, Classification::ExcludedByIgnore("x".into())),
            record("big.bin", 9, false, Classification::ExcludedBySize("y".into())),
            included("node_modules_readme.txt", 1),
        ]);
        assert!(plan.is_protected("node_modules/x.js"));
        assert!(plan.is_protected("big.bin"));
        assert!(!plan.is_protected("node_modules_readme.txt"));
        assert!(!plan.is_protected("other.txt"));
    }

    #[test]
    fn test_unreadable_root_protects_everything() {
        let plan = BackupPlan::from_records(vec![record(
            ".",
            0,
            true,
            Classification::ExcludedByError("permission denied".into()),
        )]);
        assert!(plan.is_empty());
        assert!(plan.is_protected("anything/at/all"));
    }

    #[test]
    fn test_size_report_largest() {
        let report = SizeReport::from_records(
            vec![
                included("small", 1),
                included("b-big", 100),
                included("a-big", 100),
                included("mid", 50),
                record("huge", 1000, false, Classification::ExcludedBySize("z".into())),
            ],
            3,
        );
        assert_eq!(report.total_bytes, 251);
        assert_eq!(report.file_count, 4);
        assert_eq!(report.excluded_count, 1);
        let names: Vec<_> = report.largest.iter().map(|r| r.key()).collect();
        assert_eq!(names, ["a-big", "b-big", "mid"]);
        assert_eq!(report.records.len(), 5);
    }

    #[test]
    fn test_size_report_without_largest() {
        let report = SizeReport::from_records(vec![included("a", 1)], 0);
        assert!(report.largest.is_empty());
        assert_eq!(report.included().count(), 1);
    }
}
