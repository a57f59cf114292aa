use super::*;

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[test]
fn stable_hash_bytes() {
    assert_eq!(hash_bytes(b"hello world"), HELLO_SHA256);
    assert_eq!(hash_bytes(b""), EMPTY_SHA256);
}

#[test]
fn hash_file_and_verify() {
    let root = TempDir::new().expect("must create temp dir");
    let path = root.path().join("data");
    fs::write(&path, b"hello world").expect("must write");

    assert_eq!(hash_file(&path).expect("must hash"), HELLO_SHA256);
    assert!(verify(&path, HELLO_SHA256).expect("must verify"));
    assert!(!verify(&path, EMPTY_SHA256).expect("must verify"));
}

#[test]
fn verify_propagates_io_errors() {
    let root = TempDir::new().expect("must create temp dir");
    let missing = root.path().join("missing");
    assert!(verify(&missing, HELLO_SHA256).is_err());
}

#[test]
fn hash_stream_matches_hash_bytes() {
    let mut reader = std::io::Cursor::new(b"hello world".to_vec());
    assert_eq!(hash_stream(&mut reader).expect("must hash"), HELLO_SHA256);
}

#[test]
fn create_and_open_round_trip() {
    let root = TempDir::new().expect("must create temp dir");
    let dir = root.path().join("ledgers");

    let mut ledg = Ledger::create(&dir, "ripgrep", "https://example.test/rg.tar.gz")
        .expect("must create ledger");
    assert_eq!(ledg.header.version, CURRENT_VERSION);
    assert_eq!(ledg.header.package, "ripgrep");

    ledg.record(Entry {
        checksum: Some(HELLO_SHA256.to_string()),
        ..Entry::new(Op::FileCreate, "/tmp/t/rg")
    })
    .expect("must record");
    ledg.record(Entry::new(Op::DirCreate, "/tmp/t"))
        .expect("must record");
    ledg.close().expect("must close");

    let reopened = Ledger::open(&dir, "ripgrep").expect("must open");
    assert_eq!(reopened.header.package, "ripgrep");
    assert_eq!(reopened.header.source, "https://example.test/rg.tar.gz");
    assert_eq!(reopened.entries.len(), 2);
    assert_eq!(reopened.entries[0].op, Op::FileCreate);
    assert_eq!(reopened.entries[0].path, Path::new("/tmp/t/rg"));
    assert_eq!(reopened.entries[1].op, Op::DirCreate);
}

#[test]
fn record_assigns_timestamp_when_unset() {
    let root = TempDir::new().expect("must create temp dir");
    let dir = root.path().join("ledgers");

    let mut ledg = Ledger::create(&dir, "pkg", "src").expect("must create ledger");
    ledg.record(Entry::new(Op::DirCreate, "/tmp/x"))
        .expect("must record");
    assert!(ledg.entries[0].timestamp.is_some());
    ledg.close().expect("must close");
}

#[test]
fn duplicate_create_is_refused() {
    let root = TempDir::new().expect("must create temp dir");
    let dir = root.path().join("ledgers");

    let mut first = Ledger::create(&dir, "pkg", "src").expect("must create ledger");
    first.close().expect("must close");

    let err = Ledger::create(&dir, "pkg", "src").expect_err("must refuse duplicate");
    assert!(err.to_string().contains("already exists"));
}

#[test]
fn open_rejects_empty_file() {
    let root = TempDir::new().expect("must create temp dir");
    let dir = root.path().join("ledgers");
    fs::create_dir_all(&dir).expect("must create dir");
    fs::write(ledger_path(&dir, "pkg"), b"").expect("must write");

    let err = Ledger::open(&dir, "pkg").expect_err("must reject empty ledger");
    assert!(err.to_string().contains("empty"));
}

#[test]
fn open_rejects_newer_version() {
    let root = TempDir::new().expect("must create temp dir");
    let dir = root.path().join("ledgers");
    fs::create_dir_all(&dir).expect("must create dir");
    fs::write(
        ledger_path(&dir, "pkg"),
        b"{\"version\":99,\"package\":\"pkg\",\"installed_at\":\"2024-01-01T00:00:00Z\"}\n",
    )
    .expect("must write");

    let err = Ledger::open(&dir, "pkg").expect_err("must reject newer version");
    assert!(err.to_string().contains("newer than supported"));
}

#[test]
fn parse_errors_carry_line_numbers() {
    let root = TempDir::new().expect("must create temp dir");
    let dir = root.path().join("ledgers");
    fs::create_dir_all(&dir).expect("must create dir");
    fs::write(
        ledger_path(&dir, "pkg"),
        b"{\"version\":1,\"package\":\"pkg\",\"installed_at\":\"2024-01-01T00:00:00Z\"}\n{\"op\":\"chmod_apply\",\"path\":\"/tmp/x\"}\n",
    )
    .expect("must write");

    let err = Ledger::open(&dir, "pkg").expect_err("must reject unknown op");
    assert!(format!("{err:#}").contains("line 2"));
}

#[test]
fn append_extends_existing_ledger() {
    let root = TempDir::new().expect("must create temp dir");
    let dir = root.path().join("ledgers");

    let mut ledg = Ledger::create(&dir, "pkg", "src").expect("must create ledger");
    ledg.record(Entry::new(Op::DirCreate, "/tmp/a"))
        .expect("must record");
    ledg.close().expect("must close");

    let mut appended = Ledger::append(&dir, "pkg").expect("must open for append");
    appended
        .record(Entry::new(Op::DirCreate, "/tmp/a/b"))
        .expect("must record");
    appended.close().expect("must close");

    let reopened = Ledger::open(&dir, "pkg").expect("must open");
    assert_eq!(reopened.entries.len(), 2);
    assert_eq!(reopened.entries[1].path, Path::new("/tmp/a/b"));
}

#[test]
fn stream_yields_header_then_entries() {
    let root = TempDir::new().expect("must create temp dir");
    let dir = root.path().join("ledgers");

    let mut ledg = Ledger::create(&dir, "pkg", "src").expect("must create ledger");
    for index in 0..3 {
        ledg.record(Entry::new(Op::DirCreate, format!("/tmp/d{index}")))
            .expect("must record");
    }
    ledg.close().expect("must close");

    let stream = LedgerStream::open(&dir, "pkg").expect("must open stream");
    assert_eq!(stream.header().package, "pkg");
    let entries: Vec<Entry> = stream
        .collect::<anyhow::Result<Vec<_>>>()
        .expect("entries must parse");
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2].path, Path::new("/tmp/d2"));
}

#[test]
fn list_and_exists_cover_jsonl_files() {
    let root = TempDir::new().expect("must create temp dir");
    let dir = root.path().join("ledgers");

    assert!(list(&dir).expect("missing dir lists as empty").is_empty());

    for pkg in ["fd", "ripgrep"] {
        let mut ledg = Ledger::create(&dir, pkg, "src").expect("must create ledger");
        ledg.close().expect("must close");
    }
    fs::write(dir.join("notes.txt"), b"ignored").expect("must write");

    assert_eq!(list(&dir).expect("must list"), vec!["fd", "ripgrep"]);
    assert!(exists(&dir, "fd"));
    assert!(!exists(&dir, "bat"));
}

#[test]
fn filters_and_reverse_entries() {
    let root = TempDir::new().expect("must create temp dir");
    let dir = root.path().join("ledgers");

    let mut ledg = Ledger::create(&dir, "pkg", "src").expect("must create ledger");
    ledg.record(Entry::new(Op::DirCreate, "/tmp/a"))
        .expect("must record");
    ledg.record(Entry::new(Op::FileCreate, "/tmp/a/f"))
        .expect("must record");
    ledg.record(Entry::new(Op::DirCreate, "/tmp/b"))
        .expect("must record");

    assert_eq!(ledg.filter_by_op(Op::DirCreate).len(), 2);
    assert_eq!(ledg.filter_by_path(Path::new("/tmp/a/f")).len(), 1);

    let reversed: Vec<&Path> = ledg.reverse_entries().map(|e| e.path.as_path()).collect();
    assert_eq!(
        reversed,
        vec![Path::new("/tmp/b"), Path::new("/tmp/a/f"), Path::new("/tmp/a")]
    );
    ledg.close().expect("must close");
}

#[test]
fn omitted_fields_are_absent_from_the_wire() {
    let line = serde_json::to_string(&Entry::new(Op::DirCreate, "/tmp/a")).expect("must encode");
    assert!(!line.contains("checksum"));
    assert!(!line.contains("original"));
    assert!(!line.contains("size"));
    assert!(!line.contains("null"));
}

#[test]
fn backup_store_dedupes_identical_content() {
    let mut harness = Harness::new();
    let store = BackupStore::new(harness.backup_dir.clone(), "pkg");

    let first = harness.target("one.conf");
    let second = harness.target("two.conf");
    fs::write(&first, b"hello world").expect("must write");
    fs::write(&second, b"hello world").expect("must write");

    let backup_one = store.put(&first, HELLO_SHA256).expect("must back up");
    let backup_two = store.put(&second, HELLO_SHA256).expect("must back up");
    assert_eq!(backup_one, backup_two);
    assert_eq!(backup_one, store.backup_path(HELLO_SHA256));

    let count = fs::read_dir(store.package_dir()).expect("must read").count();
    assert_eq!(count, 1);
    harness.finish();
}

#[test]
fn recorder_file_create_captures_metadata() {
    let mut harness = Harness::new();
    let path = harness.target("tool");
    fs::write(&path, b"hello world").expect("must write");

    harness
        .recorder()
        .record_file_create(&path)
        .expect("must record");

    let entry = &harness.recorder().ledger().entries[0];
    assert_eq!(entry.op, Op::FileCreate);
    assert_eq!(entry.checksum.as_deref(), Some(HELLO_SHA256));
    assert_eq!(entry.size, Some(11));
    assert!(entry.mode.is_some());
    assert!(entry.timestamp.is_some());
    harness.finish();
}

#[test]
fn prepare_overwrite_on_missing_path_is_benign() {
    let mut harness = Harness::new();
    let path = harness.target("missing");
    let original = harness
        .recorder()
        .prepare_overwrite(&path)
        .expect("must succeed");
    assert!(original.is_none());
    harness.finish();
}

#[test]
fn prepare_overwrite_backs_up_regular_files() {
    let mut harness = Harness::new();
    let path = harness.target("config");
    fs::write(&path, b"hello world").expect("must write");

    let original = harness
        .recorder()
        .prepare_overwrite(&path)
        .expect("must succeed")
        .expect("must capture original");

    assert_eq!(original.checksum.as_deref(), Some(HELLO_SHA256));
    assert_eq!(original.size, Some(11));
    let backup_path = original.backup_path.expect("must have backup");
    assert_eq!(
        fs::read(&backup_path).expect("backup must exist"),
        b"hello world"
    );
    harness.finish();
}

#[cfg(unix)]
#[test]
fn prepare_overwrite_captures_symlink_without_backup() {
    let mut harness = Harness::new();
    let path = harness.target("link");
    std::os::unix::fs::symlink("/opt/tool", &path).expect("must symlink");

    let original = harness
        .recorder()
        .prepare_overwrite(&path)
        .expect("must succeed")
        .expect("must capture original");

    assert_eq!(original.target.as_deref(), Some(Path::new("/opt/tool")));
    assert!(original.backup_path.is_none());
    assert!(original.checksum.is_none());
    harness.finish();
}

#[test]
fn record_file_delete_on_missing_path_is_benign() {
    let mut harness = Harness::new();
    let path = harness.target("missing");
    let recorded = harness
        .recorder()
        .record_file_delete(&path)
        .expect("must succeed");
    assert!(!recorded);
    assert!(harness.recorder().ledger().entries.is_empty());
    harness.finish();
}

#[test]
fn append_only_ordering_survives_reopen() {
    let mut harness = Harness::new();
    let paths: Vec<PathBuf> = (0..5).map(|i| harness.target(format!("f{i}"))).collect();
    for path in &paths {
        fs::write(path, b"x").expect("must write");
        harness
            .recorder()
            .record_file_create(path)
            .expect("must record");
    }
    harness.finish();

    let reopened = Ledger::open(&harness.ledger_dir, "pkg").expect("must open");
    let recorded: Vec<&Path> = reopened.entries.iter().map(|e| e.path.as_path()).collect();
    let expected: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
    assert_eq!(recorded, expected);
}

#[cfg(unix)]
#[test]
fn replay_round_trip_restores_empty_tree() {
    let mut harness = Harness::new();

    let dir = harness.target("a");
    let subdir = harness.target("a/b");
    let file = harness.target("a/b/rg");
    let link = harness.target("a/rg-link");
    let hardlink = harness.target("a/rg-hard");

    fs::create_dir(&dir).expect("must mkdir");
    harness.recorder().record_dir_create(&dir).expect("must record");
    fs::create_dir(&subdir).expect("must mkdir");
    harness
        .recorder()
        .record_dir_create(&subdir)
        .expect("must record");
    fs::write(&file, b"hello world").expect("must write");
    harness
        .recorder()
        .record_file_create(&file)
        .expect("must record");
    std::os::unix::fs::symlink(&file, &link).expect("must symlink");
    harness
        .recorder()
        .record_symlink_create(&link, &file)
        .expect("must record");
    fs::hard_link(&file, &hardlink).expect("must hardlink");
    harness
        .recorder()
        .record_hardlink_create(&hardlink, &file)
        .expect("must record");

    let result = harness.replay(&ReplayOptions::default());
    assert_eq!(result.processed, 5);
    assert_eq!(result.skipped, 0);
    assert!(result.errors.is_empty());
    assert!(result.modified_files.is_empty());

    for path in [&hardlink, &link, &file, &subdir, &dir] {
        assert!(
            fs::symlink_metadata(path).is_err(),
            "{} must be gone",
            path.display()
        );
    }
}

#[test]
fn replay_is_idempotent_over_absent_targets() {
    let mut harness = Harness::new();
    let file = harness.target("tool");
    fs::write(&file, b"hello world").expect("must write");
    harness
        .recorder()
        .record_file_create(&file)
        .expect("must record");

    let first = harness.replay(&ReplayOptions::default());
    assert_eq!(first.processed, 1);

    let second = harness.replay(&ReplayOptions::default());
    assert_eq!(second.processed, 0);
    assert_eq!(second.skipped, 1);
    assert!(second.errors.is_empty());
}

#[cfg(unix)]
#[test]
fn replay_restores_overwritten_original() {
    use std::os::unix::fs::PermissionsExt;

    let mut harness = Harness::new();
    let config = harness.target("etc/config");
    fs::create_dir_all(config.parent().expect("parent")).expect("must mkdir");
    fs::write(&config, b"old").expect("must write");
    fs::set_permissions(&config, fs::Permissions::from_mode(0o640)).expect("must chmod");

    let original = harness
        .recorder()
        .prepare_overwrite(&config)
        .expect("must prepare")
        .expect("must capture");
    fs::write(&config, b"new").expect("must overwrite");
    fs::set_permissions(&config, fs::Permissions::from_mode(0o644)).expect("must chmod");
    let new_sum = hash_file(&config).expect("must hash");
    harness
        .recorder()
        .record_file_overwrite(&config, original, new_sum, 3, 0o644)
        .expect("must record");

    let result = harness.replay(&ReplayOptions::default());
    assert!(result.errors.is_empty());
    assert_eq!(result.processed, 1);

    assert_eq!(fs::read(&config).expect("must read"), b"old");
    let mode = fs::metadata(&config).expect("must stat").permissions().mode() & 0o7777;
    assert_eq!(mode, 0o640);

    // Restored backups are discarded unless keep_backups is set.
    let backups = harness.backup_dir.join("pkg");
    assert!(fs::read_dir(&backups)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true));
}

#[test]
fn replay_restores_deleted_file_from_backup() {
    let mut harness = Harness::new();
    let doomed = harness.target("doomed.conf");
    fs::write(&doomed, b"hello world").expect("must write");

    let recorded = harness
        .recorder()
        .record_file_delete(&doomed)
        .expect("must record");
    assert!(recorded);
    fs::remove_file(&doomed).expect("must delete");

    let result = harness.replay(&ReplayOptions::default());
    assert!(result.errors.is_empty());
    assert_eq!(result.processed, 1);
    assert_eq!(fs::read(&doomed).expect("must read"), b"hello world");
}

#[cfg(unix)]
#[test]
fn replay_recreates_deleted_symlink() {
    let mut harness = Harness::new();
    let link = harness.target("tool-link");
    std::os::unix::fs::symlink("/opt/tool-20/bin/tool", &link).expect("must symlink");

    harness
        .recorder()
        .record_file_delete(&link)
        .expect("must record");
    fs::remove_file(&link).expect("must delete");

    let result = harness.replay(&ReplayOptions::default());
    assert!(result.errors.is_empty());
    assert_eq!(
        fs::read_link(&link).expect("symlink must be back"),
        Path::new("/opt/tool-20/bin/tool")
    );
}

#[test]
fn replay_skips_restore_when_path_reappeared() {
    let mut harness = Harness::new();
    let path = harness.target("settings");
    fs::write(&path, b"hello world").expect("must write");
    harness
        .recorder()
        .record_file_delete(&path)
        .expect("must record");
    // Never actually deleted; the path still exists at replay time.

    let result = harness.replay(&ReplayOptions::default());
    assert_eq!(result.skipped, 1);
    assert_eq!(result.processed, 0);
    assert!(result.errors.is_empty());
}

#[test]
fn drift_without_force_preserves_the_file() {
    let mut harness = Harness::new();
    let dir = harness.target("t");
    let file = harness.target("t/rg");

    fs::create_dir(&dir).expect("must mkdir");
    harness.recorder().record_dir_create(&dir).expect("must record");
    fs::write(&file, b"hello world").expect("must write");
    harness
        .recorder()
        .record_file_create(&file)
        .expect("must record");

    fs::write(&file, b"tampered").expect("must tamper");

    let result = harness.replay(&ReplayOptions::default());
    assert_eq!(result.modified_files, vec![file.clone()]);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(fs::read(&file).expect("must read"), b"tampered");
    // The enclosing directory still contains the drifted file, so it is
    // skipped rather than removed.
    assert!(dir.is_dir());
    assert_eq!(result.skipped, 1);
}

#[test]
fn drift_with_force_removes_the_file() {
    let mut harness = Harness::new();
    let dir = harness.target("t");
    let file = harness.target("t/rg");

    fs::create_dir(&dir).expect("must mkdir");
    harness.recorder().record_dir_create(&dir).expect("must record");
    fs::write(&file, b"hello world").expect("must write");
    harness
        .recorder()
        .record_file_create(&file)
        .expect("must record");

    fs::write(&file, b"tampered").expect("must tamper");

    let result = harness.replay(&ReplayOptions {
        force: true,
        ..ReplayOptions::default()
    });
    assert_eq!(result.modified_files, vec![file.clone()]);
    assert!(result.errors.is_empty());
    assert_eq!(result.processed, 2);
    assert!(fs::symlink_metadata(&file).is_err());
    assert!(fs::symlink_metadata(&dir).is_err());
}

#[cfg(unix)]
#[test]
fn symlink_target_drift_is_detected() {
    let mut harness = Harness::new();
    let link = harness.target("node");
    std::os::unix::fs::symlink("/opt/node-20/bin/node", &link).expect("must symlink");
    harness
        .recorder()
        .record_symlink_create(&link, Path::new("/opt/node-20/bin/node"))
        .expect("must record");

    fs::remove_file(&link).expect("must remove");
    std::os::unix::fs::symlink("/opt/node-18/bin/node", &link).expect("must repoint");

    let blocked = harness.replay(&ReplayOptions::default());
    assert_eq!(blocked.modified_files, vec![link.clone()]);
    assert_eq!(blocked.errors.len(), 1);
    assert!(fs::symlink_metadata(&link).is_ok());

    let forced = harness.replay(&ReplayOptions {
        force: true,
        ..ReplayOptions::default()
    });
    assert!(forced.errors.is_empty());
    assert!(fs::symlink_metadata(&link).is_err());
}

#[test]
fn overwrite_undo_with_missing_destination_still_restores() {
    let mut harness = Harness::new();
    let config = harness.target("app.conf");
    fs::write(&config, b"old").expect("must write");

    let original = harness
        .recorder()
        .prepare_overwrite(&config)
        .expect("must prepare")
        .expect("must capture");
    fs::write(&config, b"new").expect("must overwrite");
    let new_sum = hash_file(&config).expect("must hash");
    harness
        .recorder()
        .record_file_overwrite(&config, original, new_sum, 3, 0o644)
        .expect("must record");

    fs::remove_file(&config).expect("must vanish");

    let result = harness.replay(&ReplayOptions::default());
    assert!(result.errors.is_empty());
    assert_eq!(fs::read(&config).expect("must read"), b"old");
}

#[test]
fn non_empty_directories_are_skipped_never_recursed() {
    let mut harness = Harness::new();
    let dir = harness.target("share");
    fs::create_dir(&dir).expect("must mkdir");
    harness.recorder().record_dir_create(&dir).expect("must record");
    fs::write(dir.join("user-data"), b"keep me").expect("must write");

    let result = harness.replay(&ReplayOptions::default());
    assert_eq!(result.skipped, 1);
    assert!(result.errors.is_empty());
    assert!(dir.is_dir());
    assert_eq!(fs::read(dir.join("user-data")).expect("must read"), b"keep me");
}

#[test]
fn dry_run_changes_nothing_and_labels_everything() {
    let mut harness = Harness::new();
    let file = harness.target("tool");
    fs::write(&file, b"hello world").expect("must write");
    harness
        .recorder()
        .record_file_create(&file)
        .expect("must record");

    let labels = RefCell::new(Vec::new());
    let on_entry = |_entry: &Entry, action: &str| {
        labels.borrow_mut().push(action.to_string());
    };
    let result = harness.replay(&ReplayOptions {
        dry_run: true,
        verbose: true,
        on_entry: Some(&on_entry),
        ..ReplayOptions::default()
    });

    assert_eq!(result.processed, 1);
    assert!(file.is_file());
    assert_eq!(labels.into_inner(), vec!["would delete"]);
}

#[test]
fn callback_is_gated_by_verbose() {
    let mut harness = Harness::new();
    let file = harness.target("tool");
    fs::write(&file, b"hello world").expect("must write");
    harness
        .recorder()
        .record_file_create(&file)
        .expect("must record");

    let calls = RefCell::new(0usize);
    let on_entry = |_entry: &Entry, _action: &str| {
        *calls.borrow_mut() += 1;
    };
    harness.replay(&ReplayOptions {
        dry_run: true,
        verbose: false,
        on_entry: Some(&on_entry),
        ..ReplayOptions::default()
    });
    assert_eq!(calls.into_inner(), 0);
}

#[test]
fn keep_backups_retains_restored_backup() {
    let mut harness = Harness::new();
    let config = harness.target("kept.conf");
    fs::write(&config, b"hello world").expect("must write");

    let original = harness
        .recorder()
        .prepare_overwrite(&config)
        .expect("must prepare")
        .expect("must capture");
    let backup_path = original.backup_path.clone().expect("must have backup");
    fs::write(&config, b"new").expect("must overwrite");
    let new_sum = hash_file(&config).expect("must hash");
    harness
        .recorder()
        .record_file_overwrite(&config, original, new_sum, 3, 0o644)
        .expect("must record");

    let result = harness.replay(&ReplayOptions {
        keep_backups: true,
        ..ReplayOptions::default()
    });
    assert!(result.errors.is_empty());
    assert!(backup_path.is_file());
}

#[test]
fn missing_original_is_a_per_entry_error() {
    let mut harness = Harness::new();
    let path = harness.target("tool");
    fs::write(&path, b"x").expect("must write");
    harness
        .recorder()
        .record_file_create(&path)
        .expect("must record");

    // A hand-built overwrite entry with no original: replay must surface a
    // per-entry error and keep undoing the rest.
    let phantom = harness.target("phantom");
    harness
        .ledger()
        .record(Entry::new(Op::FileOverwrite, phantom))
        .expect("must record");

    let result = harness.replay(&ReplayOptions::default());
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0]
        .error
        .to_string()
        .contains("no original file information"));
    assert_eq!(result.processed, 1);
    assert!(fs::symlink_metadata(&path).is_err());
}

#[cfg(unix)]
#[test]
fn integrity_check_passes_on_healthy_ledger() {
    let mut harness = Harness::new();
    let dir = harness.target("opt");
    let file = harness.target("opt/tool");
    let link = harness.target("opt/tool-link");

    fs::create_dir(&dir).expect("must mkdir");
    harness.recorder().record_dir_create(&dir).expect("must record");
    fs::write(&file, b"hello world").expect("must write");
    harness
        .recorder()
        .record_file_create(&file)
        .expect("must record");
    std::os::unix::fs::symlink(&file, &link).expect("must symlink");
    harness
        .recorder()
        .record_symlink_create(&link, &file)
        .expect("must record");

    let overwritten = harness.target("opt/tool.conf");
    fs::write(&overwritten, b"old").expect("must write");
    let original = harness
        .recorder()
        .prepare_overwrite(&overwritten)
        .expect("must prepare")
        .expect("must capture");
    fs::write(&overwritten, b"new").expect("must overwrite");
    let new_sum = hash_file(&overwritten).expect("must hash");
    harness
        .recorder()
        .record_file_overwrite(&overwritten, original, new_sum, 3, 0o644)
        .expect("must record");

    harness.finish();
    let result = check_ledger_integrity(
        &harness.ledger_dir,
        &harness.backup_dir,
        "pkg",
        &DoctorOptions {
            verbose: false,
            check_files: true,
        },
    );

    assert!(result.parse_error.is_none());
    assert_eq!(result.entry_count, 4);
    assert!(result.missing_backups.is_empty());
    assert!(result.orphaned_files.is_empty());
    assert!(result.modified_files.is_empty());
    assert!(!result.has_issues());
}

#[test]
fn integrity_check_reports_missing_backups_and_drift() {
    let mut harness = Harness::new();
    let file = harness.target("tool");
    let overwritten = harness.target("tool.conf");

    fs::write(&file, b"hello world").expect("must write");
    harness
        .recorder()
        .record_file_create(&file)
        .expect("must record");

    fs::write(&overwritten, b"old").expect("must write");
    let original = harness
        .recorder()
        .prepare_overwrite(&overwritten)
        .expect("must prepare")
        .expect("must capture");
    let backup_path = original.backup_path.clone().expect("must have backup");
    fs::write(&overwritten, b"new").expect("must overwrite");
    let new_sum = hash_file(&overwritten).expect("must hash");
    harness
        .recorder()
        .record_file_overwrite(&overwritten, original, new_sum, 3, 0o644)
        .expect("must record");

    fs::remove_file(&backup_path).expect("must lose backup");
    fs::write(&file, b"tampered").expect("must tamper");

    harness.finish();
    let result = check_ledger_integrity(
        &harness.ledger_dir,
        &harness.backup_dir,
        "pkg",
        &DoctorOptions {
            verbose: false,
            check_files: true,
        },
    );

    assert_eq!(result.missing_backups, vec![backup_path]);
    assert_eq!(result.modified_files, vec![file.display().to_string()]);
    assert!(result.has_issues());
}

#[test]
fn integrity_check_reports_orphaned_files() {
    let mut harness = Harness::new();
    let file = harness.target("tool");
    fs::write(&file, b"hello world").expect("must write");
    harness
        .recorder()
        .record_file_create(&file)
        .expect("must record");
    fs::remove_file(&file).expect("must remove");

    harness.finish();
    let result = check_ledger_integrity(
        &harness.ledger_dir,
        &harness.backup_dir,
        "pkg",
        &DoctorOptions {
            verbose: false,
            check_files: true,
        },
    );
    assert_eq!(result.orphaned_files, vec![file]);
}

#[test]
fn orphaned_backup_sweep_spares_referenced_files() {
    let mut harness = Harness::new();
    let overwritten = harness.target("app.conf");
    fs::write(&overwritten, b"old").expect("must write");
    let original = harness
        .recorder()
        .prepare_overwrite(&overwritten)
        .expect("must prepare")
        .expect("must capture");
    let referenced = original.backup_path.clone().expect("must have backup");
    fs::write(&overwritten, b"new").expect("must overwrite");
    let new_sum = hash_file(&overwritten).expect("must hash");
    harness
        .recorder()
        .record_file_overwrite(&overwritten, original, new_sum, 3, 0o644)
        .expect("must record");

    harness.finish();
    let stray = harness.backup_dir.join("pkg").join("deadbeef");
    fs::write(&stray, b"unreferenced").expect("must write");

    let orphans =
        find_orphaned_backups(&harness.ledger_dir, &harness.backup_dir).expect("must sweep");
    assert_eq!(orphans, vec![stray]);
    assert!(referenced.is_file());
}

#[test]
fn directory_permission_probe_covers_subdirectories() {
    let root = TempDir::new().expect("must create temp dir");
    let alloy_root = root.path().join(".alloy");
    fs::create_dir_all(alloy_root.join("ledgers")).expect("must mkdir");
    fs::create_dir_all(alloy_root.join("backups")).expect("must mkdir");

    let results = check_directory_permissions(&alloy_root);
    assert!(
        results.iter().all(|diag| diag.status == DiagStatus::Ok),
        "{results:?}"
    );
    // Root readable + writable, three subdirectories probed.
    assert_eq!(results.len(), 5);
}

#[test]
fn directory_permission_probe_tolerates_missing_root() {
    let root = TempDir::new().expect("must create temp dir");
    let results = check_directory_permissions(&root.path().join("nope"));
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DiagStatus::Ok);
    assert!(results[0].message.contains("does not exist yet"));
}

/// Shared scaffolding: a temp tree with ledger, backup, and target roots
/// plus a live recorder for the package "pkg". The recorder converts into
/// a plain ledger the first time a test replays or finishes.
struct Harness {
    _root: TempDir,
    ledger_dir: PathBuf,
    backup_dir: PathBuf,
    target_dir: PathBuf,
    recorder: Option<Recorder>,
    ledger: Option<Ledger>,
}

impl Harness {
    fn new() -> Self {
        let root = TempDir::new().expect("must create temp dir");
        let ledger_dir = root.path().join("ledgers");
        let backup_dir = root.path().join("backups");
        let target_dir = root.path().join("target");
        fs::create_dir_all(&target_dir).expect("must create target dir");

        let ledger = Ledger::create(&ledger_dir, "pkg", "test://source").expect("must create");
        let recorder = Recorder::new(ledger, backup_dir.clone());

        Self {
            _root: root,
            ledger_dir,
            backup_dir,
            target_dir,
            recorder: Some(recorder),
            ledger: None,
        }
    }

    fn target(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.target_dir.join(rel)
    }

    fn recorder(&mut self) -> &mut Recorder {
        self.recorder.as_mut().expect("recorder already consumed")
    }

    fn ledger(&mut self) -> &mut Ledger {
        if self.ledger.is_none() {
            let recorder = self.recorder.take().expect("recorder already consumed");
            self.ledger = Some(recorder.into_ledger());
        }
        self.ledger.as_mut().expect("ledger")
    }

    fn replay(&mut self, opts: &ReplayOptions) -> ReplayResult {
        self.ledger();
        reverse_replay(self.ledger.as_ref().expect("ledger"), opts)
    }

    /// Closes the ledger so offline checks can reopen it from disk.
    fn finish(&mut self) {
        self.ledger().close().expect("must close ledger");
    }
}
