//
// tests/iterate.rs -- firstkey/nextkey traversal and the iterator/keys/
// values convenience layer built on top of it
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use std::collections::{HashMap, HashSet};

use gdbm_native::{OpenOptions, StoreMode};
use tempfile::NamedTempFile;

fn populated(n: usize) -> (NamedTempFile, gdbm_native::Gdbm, HashMap<Vec<u8>, Vec<u8>>) {
    let tmp = NamedTempFile::new().unwrap();
    let mut db = OpenOptions::new().create().open(tmp.path()).unwrap();
    let mut expected = HashMap::new();
    for n in 0..n {
        let k = format!("key-{n}").into_bytes();
        let v = format!("value-{n}").into_bytes();
        db.store(&k, &v, StoreMode::Insert).unwrap();
        expected.insert(k, v);
    }
    (tmp, db, expected)
}

#[test]
fn firstkey_nextkey_enumerate_every_stored_key_exactly_once() {
    let (_tmp, mut db, expected) = populated(300);

    let mut seen = HashSet::new();
    let mut key = db.first_key().unwrap();
    while let Some(k) = key {
        assert!(seen.insert(k.clone()), "key {k:?} returned twice");
        assert!(expected.contains_key(&k), "unexpected key {k:?}");
        key = db.next_key(&k).unwrap();
    }
    assert_eq!(seen.len(), expected.len());
}

#[test]
fn empty_database_has_no_first_key() {
    let tmp = NamedTempFile::new().unwrap();
    let mut db = OpenOptions::new().create().open(tmp.path()).unwrap();
    assert_eq!(db.first_key().unwrap(), None);
    assert!(db.is_empty().unwrap());
}

#[test]
fn iter_yields_every_key_value_pair() {
    let (_tmp, mut db, mut expected) = populated(200);

    for pair in db.iter() {
        let (k, v) = pair.unwrap();
        assert_eq!(expected.remove(&k), Some(v));
    }
    assert!(expected.is_empty(), "iteration missed keys: {expected:?}");
}

#[test]
fn keys_and_values_match_iter() {
    let (_tmp, mut db, expected) = populated(150);

    let keys: HashSet<_> = db.keys().unwrap().into_iter().collect();
    let values: HashSet<_> = db.values().unwrap().into_iter().collect();

    assert_eq!(keys, expected.keys().cloned().collect());
    assert_eq!(values, expected.values().cloned().collect());
}

#[test]
fn len_counts_stored_records() {
    let (_tmp, mut db, expected) = populated(64);
    assert_eq!(db.len().unwrap(), expected.len());
}
