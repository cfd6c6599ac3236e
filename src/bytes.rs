//
// bytes.rs -- conversions between stored byte strings and Rust types
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use crate::Error;

/// Types that can be read back out of a stored record.
///
/// The store itself is byte-string in, byte-string out (spec.md's data
/// model has no typed values); this trait is ambient convenience for
/// callers who know what they put in.
pub trait FromBytes: Sized {
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, Error>;
}

impl FromBytes for Vec<u8> {
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        Ok(bytes)
    }
}

impl FromBytes for String {
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        String::from_utf8(bytes).map_err(|e| Error::BadData(e.to_string()))
    }
}

/// Types that can be borrowed as the bytes to store for a key or value.
pub trait ToBytesRef {
    fn to_bytes_ref(&self) -> &[u8];
}

impl ToBytesRef for Vec<u8> {
    fn to_bytes_ref(&self) -> &[u8] {
        self
    }
}

impl ToBytesRef for [u8] {
    fn to_bytes_ref(&self) -> &[u8] {
        self
    }
}

impl ToBytesRef for str {
    fn to_bytes_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl ToBytesRef for String {
    fn to_bytes_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl<const N: usize> ToBytesRef for [u8; N] {
    fn to_bytes_ref(&self) -> &[u8] {
        self
    }
}
