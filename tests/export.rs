//
// tests/export.rs -- ASCII and binary dump/load round trips
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use std::collections::HashMap;

use gdbm_native::{BinaryWidth, OpenOptions, StoreMode};
use tempfile::NamedTempFile;

fn sample_data() -> HashMap<Vec<u8>, Vec<u8>> {
    (0..50)
        .map(|n| (format!("key-{n}").into_bytes(), format!("value-{n}").into_bytes()))
        .collect()
}

#[test]
fn ascii_dump_then_load_round_trips() {
    let src_tmp = NamedTempFile::new().unwrap();
    let mut src = OpenOptions::new().create().open(src_tmp.path()).unwrap();
    let data = sample_data();
    for (k, v) in &data {
        src.store(k, v, StoreMode::Insert).unwrap();
    }

    let mut buf = Vec::new();
    src.export_ascii(&mut buf, "src.gdbm").unwrap();
    assert!(String::from_utf8_lossy(&buf).contains("#:version=1.1"));

    let dst_tmp = NamedTempFile::new().unwrap();
    let mut dst = OpenOptions::new().create().open(dst_tmp.path()).unwrap();
    let n = dst.import_ascii(&mut buf.as_slice(), StoreMode::Insert).unwrap();
    assert_eq!(n, data.len());

    for (k, v) in &data {
        assert_eq!(dst.fetch(k).unwrap(), Some(v.clone()));
    }
}

#[test]
fn binary_dump_then_load_round_trips_both_widths() {
    for width in [BinaryWidth::W32, BinaryWidth::W64] {
        let src_tmp = NamedTempFile::new().unwrap();
        let mut src = OpenOptions::new().create().open(src_tmp.path()).unwrap();
        let data = sample_data();
        for (k, v) in &data {
            src.store(k, v, StoreMode::Insert).unwrap();
        }

        let mut buf = Vec::new();
        src.export_bin(&mut buf, width).unwrap();

        let dst_tmp = NamedTempFile::new().unwrap();
        let mut dst = OpenOptions::new().create().open(dst_tmp.path()).unwrap();
        let n = dst.import_bin(&mut buf.as_slice(), width, StoreMode::Insert).unwrap();
        assert_eq!(n, data.len());

        for (k, v) in &data {
            assert_eq!(dst.fetch(k).unwrap(), Some(v.clone()));
        }
    }
}

#[test]
fn ascii_export_handles_binary_data_via_base64() {
    let tmp = NamedTempFile::new().unwrap();
    let mut db = OpenOptions::new().create().open(tmp.path()).unwrap();
    let key = b"k".to_vec();
    let value: Vec<u8> = (0..=255).collect();
    db.store(&key, &value, StoreMode::Insert).unwrap();

    let mut buf = Vec::new();
    db.export_ascii(&mut buf, "bin.gdbm").unwrap();

    let dst_tmp = NamedTempFile::new().unwrap();
    let mut dst = OpenOptions::new().create().open(dst_tmp.path()).unwrap();
    dst.import_ascii(&mut buf.as_slice(), StoreMode::Insert).unwrap();
    assert_eq!(dst.fetch(&key).unwrap(), Some(value));
}
