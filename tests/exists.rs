//
// tests/exists.rs -- exists()/contains_key semantics
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use gdbm_native::{OpenOptions, StoreMode};
use tempfile::NamedTempFile;

#[test]
fn exists_is_false_for_missing_key() {
    let tmp = NamedTempFile::new().unwrap();
    let mut db = OpenOptions::new().create().open(tmp.path()).unwrap();
    assert_eq!(db.exists(b"dummy").unwrap(), false);
}

#[test]
fn exists_is_true_after_store() {
    let tmp = NamedTempFile::new().unwrap();
    let mut db = OpenOptions::new().create().open(tmp.path()).unwrap();

    for n in 0..2000 {
        let key = format!("key {n}");
        db.store(key.as_bytes(), b"v", StoreMode::Insert).unwrap();
    }
    for n in 0..2000 {
        let key = format!("key {n}");
        assert!(db.exists(key.as_bytes()).unwrap());
    }
}

#[test]
fn exists_is_false_after_delete() {
    let tmp = NamedTempFile::new().unwrap();
    let mut db = OpenOptions::new().create().open(tmp.path()).unwrap();

    db.store(b"k", b"v", StoreMode::Insert).unwrap();
    assert!(db.exists(b"k").unwrap());
    db.delete(b"k").unwrap();
    assert!(!db.exists(b"k").unwrap());
}

#[test]
fn contains_key_generic_sugar_matches_exists() {
    let tmp = NamedTempFile::new().unwrap();
    let mut db = OpenOptions::new().create().open(tmp.path()).unwrap();
    db.insert("abc", "def").unwrap();
    assert_eq!(db.contains_key("abc").unwrap(), db.exists(b"abc").unwrap());
    assert!(db.contains_key("abc").unwrap());
    assert!(!db.contains_key("xyz").unwrap());
}
