//
// tests/split.rs -- directory doubling and bucket splitting
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use gdbm_native::{OpenOptions, StoreMode};
use tempfile::NamedTempFile;

/// A tiny block size forces a small bucket (few `bucket_elems`), so a
/// handful of inserts is enough to drive several bucket splits and at
/// least one directory doubling.
const TINY_BLOCK_SIZE: u32 = 160;

#[test]
fn many_inserts_survive_repeated_splits() {
    let tmp = NamedTempFile::new().unwrap();
    let mut db = OpenOptions::new()
        .create()
        .block_size(TINY_BLOCK_SIZE)
        .open(tmp.path())
        .unwrap();

    let n = 2000;
    for i in 0..n {
        let key = format!("split-key-{i:06}");
        let value = format!("value-{i}");
        db.store(key.as_bytes(), value.as_bytes(), StoreMode::Insert).unwrap();
    }

    for i in 0..n {
        let key = format!("split-key-{i:06}");
        let expected = format!("value-{i}");
        assert_eq!(
            db.fetch(key.as_bytes()).unwrap(),
            Some(expected.into_bytes()),
            "missing key {key}"
        );
    }

    // All keys must still enumerate exactly once after however many
    // splits and directory doublings it took to fit them.
    let mut count = 0;
    let mut key = db.first_key().unwrap();
    while let Some(k) = key {
        count += 1;
        key = db.next_key(&k).unwrap();
    }
    assert_eq!(count, n);
}

#[test]
fn split_preserves_values_across_reopen() {
    let tmp = NamedTempFile::new().unwrap();
    {
        let mut db = OpenOptions::new()
            .create()
            .block_size(TINY_BLOCK_SIZE)
            .open(tmp.path())
            .unwrap();
        for i in 0..500 {
            let key = format!("k{i}");
            db.store(key.as_bytes(), b"payload", StoreMode::Insert).unwrap();
        }
    }

    let mut db = OpenOptions::new().open(tmp.path()).unwrap();
    for i in 0..500 {
        let key = format!("k{i}");
        assert_eq!(db.fetch(key.as_bytes()).unwrap(), Some(b"payload".to_vec()));
    }
}

#[test]
fn deleting_after_splits_still_finds_remaining_keys() {
    let tmp = NamedTempFile::new().unwrap();
    let mut db = OpenOptions::new()
        .create()
        .block_size(TINY_BLOCK_SIZE)
        .open(tmp.path())
        .unwrap();

    let n = 800;
    for i in 0..n {
        let key = format!("del-{i}");
        db.store(key.as_bytes(), b"x", StoreMode::Insert).unwrap();
    }
    for i in (0..n).step_by(2) {
        let key = format!("del-{i}");
        db.delete(key.as_bytes()).unwrap();
    }
    for i in 0..n {
        let key = format!("del-{i}");
        let expect_present = i % 2 == 1;
        assert_eq!(db.exists(key.as_bytes()).unwrap(), expect_present, "key {key}");
    }
}
