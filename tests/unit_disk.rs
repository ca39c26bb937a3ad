#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]

mod common;

use chimp_occupy_agent::lib_disk::{is_padding_file, PAD_PREFIX, PAD_SUFFIX};
use chimp_occupy_agent::{DiskPadding, OccupyError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const KIB: u64 = 1024;

#[test]
fn names_are_recognised() {
    assert!(is_padding_file("chimp_occupy_pad_1700000000000_42_0.dat"));
    assert!(!is_padding_file("chimp_occupy_pad_.dat"));
    assert!(!is_padding_file("chimp_occupy_pad_1_2_3.txt"));
    assert!(!is_padding_file("notes.dat"));
    assert!(!is_padding_file("chimp_occupy_pad_backup.dat"));
    assert!(!is_padding_file("chimp_occupy_pad_my_backup.dat"));
    assert!(!is_padding_file("chimp_occupy_pad_1_2.dat"));
    assert!(!is_padding_file("chimp_occupy_pad_1_2_3_4.dat"));
    assert!(!is_padding_file("chimp_occupy_pad_1__3.dat"));
    assert!(!is_padding_file("chimp_occupy_pad_1_x_3.dat"));
    assert!(!is_padding_file(PAD_PREFIX));
    assert!(!is_padding_file(PAD_SUFFIX));
}

#[test]
fn grow_splits_at_file_cap() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pad = DiskPadding::new(dir.path(), KIB, 5 * KIB);
    let report = pad.grow(12 * KIB, &CancellationToken::new()).expect("ok");
    assert_eq!(report.files.len(), 3);
    assert_eq!(report.bytes_written, 12 * KIB);
    assert_eq!(report.failed_files, 0);

    let mut sizes: Vec<u64> = report
        .files
        .iter()
        .map(|p| std::fs::metadata(p).expect("meta").len())
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![2 * KIB, 5 * KIB, 5 * KIB]);
    assert_eq!(pad.file_count(), 3);
    assert_eq!(pad.padded_bytes(), 12 * KIB);
}

#[test]
fn shrink_all_leaves_unrelated_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let keep = dir.path().join("notes.txt");
    let lookalike = dir.path().join("chimp_occupy_pad_keep.txt");
    std::fs::write(&keep, b"hello").expect("write");
    std::fs::write(&lookalike, b"hello").expect("write");

    let pad = DiskPadding::new(dir.path(), KIB, 4 * KIB);
    pad.grow(10 * KIB, &CancellationToken::new()).expect("ok");
    assert_eq!(common::padding_files(dir.path()).len(), 3);

    let removed = pad.shrink_all().expect("ok");
    assert_eq!(removed, 3);
    assert!(common::padding_files(dir.path()).is_empty());
    assert!(keep.exists());
    assert!(lookalike.exists());
    assert_eq!(pad.file_count(), 0);
    assert_eq!(pad.padded_bytes(), 0);
}

#[test]
fn shrink_all_keeps_user_files_with_padding_prefix() {
    let dir = tempfile::tempdir().expect("tempdir");
    let user = dir.path().join("chimp_occupy_pad_my_backup.dat");
    std::fs::write(&user, b"precious").expect("write");

    let pad = DiskPadding::new(dir.path(), KIB, KIB);
    pad.grow(2 * KIB, &CancellationToken::new()).expect("ok");
    assert_eq!(pad.shrink_all().expect("ok"), 2);
    assert!(user.exists());
    assert_eq!(std::fs::read(&user).expect("read"), b"precious");
}

#[test]
fn failed_file_is_skipped_and_rest_written() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pad = DiskPadding::new(dir.path(), KIB, 4 * KIB);
    // a directory squatting on the first name makes that create fail
    let blocked = pad.path_for(0);
    std::fs::create_dir(&blocked).expect("mkdir");

    let report = pad.grow(12 * KIB, &CancellationToken::new()).expect("grow still succeeds");
    assert_eq!(report.failed_files, 1);
    assert_eq!(report.files.len(), 2);
    assert_eq!(report.bytes_written, 8 * KIB);
    assert!(!report.files.contains(&blocked));
    assert_eq!(pad.padded_bytes(), 8 * KIB);

    let written: Vec<_> = common::padding_files(dir.path())
        .into_iter()
        .filter(|p| p.is_file())
        .collect();
    assert_eq!(written.len(), 2);
    for path in &written {
        assert_eq!(std::fs::metadata(path).expect("meta").len(), 4 * KIB);
    }

    pad.shrink_all().expect("ok");
    assert!(blocked.is_dir());
    assert_eq!(pad.file_count(), 0);
}

#[test]
fn shrink_all_removes_files_from_earlier_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stale = dir.path().join(format!("{PAD_PREFIX}1600000000000_1_7{PAD_SUFFIX}"));
    std::fs::write(&stale, vec![0u8; 64]).expect("write");

    let pad = DiskPadding::new(dir.path(), KIB, KIB);
    assert_eq!(pad.shrink_all().expect("ok"), 1);
    assert!(!stale.exists());
    assert_eq!(pad.shrink_all().expect("ok"), 0);
}

#[test]
fn shrink_all_on_missing_dir_is_noop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pad = DiskPadding::new(dir.path().join("never-created"), KIB, KIB);
    assert_eq!(pad.shrink_all().expect("ok"), 0);
}

#[test]
fn cancelled_grow_leaves_no_partial_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pad = DiskPadding::new(dir.path(), KIB, 8 * KIB);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let res = pad.grow(32 * KIB, &cancel);
    assert!(matches!(res, Err(OccupyError::Cancelled)));
    assert!(common::padding_files(dir.path()).is_empty());
    assert_eq!(pad.file_count(), 0);
}

#[test]
fn grow_zero_writes_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pad = DiskPadding::new(dir.path(), KIB, KIB);
    let report = pad.grow(0, &CancellationToken::new()).expect("ok");
    assert!(report.files.is_empty());
    assert!(common::padding_files(dir.path()).is_empty());
}

#[test]
fn cleanup_during_grow_wins() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pad = Arc::new(DiskPadding::new(dir.path(), 64 * KIB, 4 * 1024 * KIB));
    let cancel = CancellationToken::new();

    let writer = {
        let pad = Arc::clone(&pad);
        let cancel = cancel.clone();
        std::thread::spawn(move || pad.grow(64 * 1024 * KIB, &cancel))
    };
    std::thread::sleep(std::time::Duration::from_millis(20));
    cancel.cancel();
    pad.shrink_all().expect("ok");
    let res = writer.join().expect("writer thread");
    assert!(matches!(res, Ok(_) | Err(OccupyError::Cancelled)));

    pad.shrink_all().expect("ok");
    assert!(common::padding_files(dir.path()).is_empty());
    assert_eq!(pad.file_count(), 0);
}
