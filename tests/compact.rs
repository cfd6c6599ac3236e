//
// tests/compact.rs -- reorganize preservation and size behavior
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use std::collections::HashMap;

use gdbm_native::{OpenOptions, StoreMode};
use tempfile::NamedTempFile;

#[test]
fn reorganize_preserves_all_records() {
    let tmp = NamedTempFile::new().unwrap();
    let mut db = OpenOptions::new().create().open(tmp.path()).unwrap();

    let mut expected = HashMap::new();
    for n in 0..400 {
        let k = format!("key-{n}").into_bytes();
        let v = format!("value-{n}-{}", "x".repeat(n % 40)).into_bytes();
        db.store(&k, &v, StoreMode::Insert).unwrap();
        expected.insert(k, v);
    }

    // Delete a third of the keys to create fragmentation for reorganize
    // to reclaim.
    let to_delete: Vec<_> = expected.keys().take(expected.len() / 3).cloned().collect();
    for k in &to_delete {
        db.delete(k).unwrap();
        expected.remove(k);
    }

    db.reorganize().unwrap();

    for (k, v) in &expected {
        assert_eq!(db.fetch(k).unwrap(), Some(v.clone()));
    }
    for k in &to_delete {
        assert_eq!(db.fetch(k).unwrap(), None);
    }
}

#[test]
fn reorganize_never_grows_the_file() {
    let tmp = NamedTempFile::new().unwrap();
    let mut db = OpenOptions::new().create().open(tmp.path()).unwrap();

    for n in 0..500 {
        let k = format!("key-{n}");
        db.store(k.as_bytes(), b"some reasonably sized value here", StoreMode::Insert)
            .unwrap();
    }
    for n in 0..400 {
        let k = format!("key-{n}");
        db.delete(k.as_bytes()).unwrap();
    }
    db.sync().unwrap();
    let size_before = std::fs::metadata(tmp.path()).unwrap().len();

    db.reorganize().unwrap();
    db.sync().unwrap();
    let size_after = std::fs::metadata(tmp.path()).unwrap().len();

    assert!(size_after <= size_before, "{size_after} > {size_before}");
}

#[test]
fn reorganize_on_reader_is_rejected() {
    let tmp = NamedTempFile::new().unwrap();
    {
        let mut db = OpenOptions::new().create().open(tmp.path()).unwrap();
        db.insert("k", "v").unwrap();
    }
    let mut db = OpenOptions::new().open(tmp.path()).unwrap();
    let err = db.reorganize().unwrap_err();
    assert!(matches!(err, gdbm_native::Error::ReaderCantReorganize));
}
