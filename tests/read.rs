//
// tests/read.rs -- fetch semantics
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use gdbm_native::OpenOptions;
use tempfile::NamedTempFile;

fn fresh_db() -> (NamedTempFile, gdbm_native::Gdbm) {
    let tmp = NamedTempFile::new().unwrap();
    let db = OpenOptions::new().create().open(tmp.path()).unwrap();
    (tmp, db)
}

#[test]
fn fetch_missing_key_returns_none() {
    let (_tmp, mut db) = fresh_db();
    assert_eq!(db.fetch(b"nope").unwrap(), None);
}

#[test]
fn fetch_returns_stored_value() {
    let (_tmp, mut db) = fresh_db();
    db.store(b"k", b"some value", gdbm_native::StoreMode::Insert).unwrap();
    assert_eq!(db.fetch(b"k").unwrap(), Some(b"some value".to_vec()));
}

#[test]
fn fetch_many_keys() {
    let (_tmp, mut db) = fresh_db();
    for n in 0..500 {
        let key = format!("key-{n}");
        let value = format!("value-{n}");
        db.store(key.as_bytes(), value.as_bytes(), gdbm_native::StoreMode::Insert)
            .unwrap();
    }
    for n in 0..500 {
        let key = format!("key-{n}");
        let expected = format!("value-{n}");
        assert_eq!(db.fetch(key.as_bytes()).unwrap(), Some(expected.into_bytes()));
    }
}

#[test]
fn fetch_on_empty_key_prefix_boundary() {
    // Keys shorter than the 4-byte partial-key fast-reject prefix must
    // still be looked up correctly.
    let (_tmp, mut db) = fresh_db();
    for key in ["a", "ab", "abc", "abcd", "abcde", "abcdef"] {
        db.store(key.as_bytes(), b"v", gdbm_native::StoreMode::Insert).unwrap();
    }
    for key in ["a", "ab", "abc", "abcd", "abcde", "abcdef"] {
        assert_eq!(db.fetch(key.as_bytes()).unwrap(), Some(b"v".to_vec()));
    }
}
