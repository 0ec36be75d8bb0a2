use bucket_backup::config::Config;
use bucket_backup::{BackupPlan, Classification, FileRecord, SizeReport};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut file = File::create(path).unwrap();
    file.write_all(content).unwrap();
}

fn write_sized(path: &Path, size: u64) {
    write_file(path, b"");
    File::options().write(true).open(path).unwrap().set_len(size).unwrap();
}

fn walk(config: &Config) -> Vec<FileRecord> {
    config.walk_options().unwrap().walk().unwrap().collect()
}

fn find<'a>(records: &'a [FileRecord], key: &str) -> Option<&'a FileRecord> {
    records.iter().find(|r| r.key() == key)
}

#[test]
fn scenario_global_ignore_prunes_directory() {
    let src = tempdir().unwrap();
    write_file(&src.path().join("a.txt"), &[b'a'; 1024]);
    write_file(&src.path().join("node_modules/x.js"), b"module.exports = 1;");

    let mut config = Config::new(src.path(), "backup");
    config.global_ignores = vec![".*node_modules$".into()];
    let records = walk(&config);

    assert_eq!(records.len(), 2);
    let a = find(&records, "a.txt").unwrap();
    assert!(a.is_included());
    assert_eq!(a.size, 1024);
    let modules = find(&records, "node_modules").unwrap();
    assert!(modules.is_dir);
    assert!(matches!(modules.classification, Classification::ExcludedByIgnore(_)));
    assert!(find(&records, "node_modules/x.js").is_none());
}

#[test]
fn scenario_size_limit() {
    let src = tempdir().unwrap();
    write_sized(&src.path().join("notebook.ipynb"), 6_000_000);
    write_sized(&src.path().join("small.ipynb"), 2_000_000);
    write_sized(&src.path().join("large.bin"), 6_000_000);

    let mut config = Config::new(src.path(), "backup");
    config.size_limits.insert(r".*\.ipynb$".into(), ">=5".into());
    let records = walk(&config);

    assert!(matches!(
        find(&records, "notebook.ipynb").unwrap().classification,
        Classification::ExcludedBySize(_)
    ));
    assert!(find(&records, "small.ipynb").unwrap().is_included());
    assert!(find(&records, "large.bin").unwrap().is_included());
}

#[test]
fn scenario_nested_negation() {
    let src = tempdir().unwrap();
    write_file(&src.path().join("other.log"), b"root log");
    write_file(&src.path().join("sub/.gitignore"), b"!special.log\n");
    write_file(&src.path().join("sub/special.log"), b"keep me");
    write_file(&src.path().join("sub/other.log"), b"drop me");

    let mut config = Config::new(src.path(), "backup");
    config.global_ignores = vec![r".*\.log$".into()];
    let records = walk(&config);

    assert!(find(&records, "sub/special.log").unwrap().is_included());
    assert!(!find(&records, "sub/other.log").unwrap().is_included());
    assert!(!find(&records, "other.log").unwrap().is_included());
}

#[cfg(unix)]
#[test]
fn scenario_unreadable_entries_do_not_stop_the_walk() {
    use std::os::unix::fs::PermissionsExt;

    let src = tempdir().unwrap();
    write_file(&src.path().join("a.txt"), b"a");
    write_file(&src.path().join("locked.bin"), b"secret");
    write_file(&src.path().join("z.txt"), b"z");
    std::os::unix::fs::symlink(src.path().join("missing"), src.path().join("dangling")).unwrap();
    let locked = src.path().join("locked.bin");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    // Privileged users can read the file regardless of its mode.
    let enforced = File::open(&locked).is_err();

    let config = Config::new(src.path(), "backup");
    let records = walk(&config);

    assert!(matches!(
        find(&records, "dangling").unwrap().classification,
        Classification::ExcludedByError(_)
    ));
    if enforced {
        assert!(matches!(
            find(&records, "locked.bin").unwrap().classification,
            Classification::ExcludedByError(_)
        ));
    }
    assert!(find(&records, "a.txt").unwrap().is_included());
    assert!(find(&records, "z.txt").unwrap().is_included());

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
}

#[test]
fn nested_rule_cannot_reinclude_inside_pruned_directory() {
    let src = tempdir().unwrap();
    write_file(&src.path().join(".gitignore"), b"cache/\n");
    write_file(&src.path().join("cache/.gitignore"), b"!important.txt\n");
    write_file(&src.path().join("cache/important.txt"), b"x");
    write_file(&src.path().join("keep.txt"), b"x");

    let records = walk(&Config::new(src.path(), "backup"));
    assert!(records.iter().all(|r| !r.key().starts_with("cache/")));
    assert!(find(&records, "keep.txt").unwrap().is_included());
}

#[test]
fn plan_and_report_agree() {
    let src = tempdir().unwrap();
    write_sized(&src.path().join("a.bin"), 300);
    write_sized(&src.path().join("b/c.bin"), 200);
    write_sized(&src.path().join("b/d.tmp"), 999);
    write_file(&src.path().join(".gitignore"), b"*.tmp\n");

    let options = Config::new(src.path(), "backup").walk_options().unwrap();
    let plan = BackupPlan::from_records(options.walk().unwrap());
    let report = SizeReport::from_records(options.walk().unwrap(), 2);

    assert_eq!(plan.total_bytes(), report.total_bytes);
    assert_eq!(plan.len(), report.file_count);
    assert_eq!(report.largest[0].key(), "a.bin");
    assert_eq!(report.largest[1].key(), "b/c.bin");
    assert!(plan.is_protected("b/d.tmp"));
}
