//
// hashutil.rs -- GDBM hash library routines
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

/// Width, in bits, of the hash space: hashes are masked to 31 bits.
pub const GDBM_HASH_BITS: u32 = 31;

/// Number of leading key bytes kept inline in a bucket element for
/// cheap partial-match rejection before reading the full key back.
pub const KEY_SMALL: usize = 4;

/// The GDBM hash function: a simple additive hash folded into 31 bits.
pub fn hash_key(key: &[u8]) -> u32 {
    let mut index: u32 = 0;
    let mut value: u32 = key.len() as u32;
    value = value.wrapping_mul(0x238F13AF);

    for ch in key.iter() {
        value = (value + ((*ch as u32) << (index * 5 % 24))) & 0x7FFFFFFF;
        index += 1;
    }
    (value.wrapping_mul(1103515243).wrapping_add(12345)) & 0x7FFFFFFF
}

/// Maps a hash to a directory slot given the directory's current depth.
pub fn bucket_dir(dir_bits: u32, hash: u32) -> usize {
    (hash as usize) >> (GDBM_HASH_BITS - dir_bits)
}

/// Derives `(hash, directory slot, bucket element offset)` for a key.
pub fn key_loc(dir_bits: u32, bucket_elems: u32, key: &[u8]) -> (u32, usize, u32) {
    let hash = hash_key(key);
    let dir_slot = bucket_dir(dir_bits, hash);
    let elem_ofs = hash % bucket_elems;
    (hash, dir_slot, elem_ofs)
}

/// Cheap rejection test against a bucket element's inline partial key.
pub fn partial_key_match(key: &[u8], partial: &[u8; KEY_SMALL]) -> bool {
    if key.len() <= KEY_SMALL {
        key == &partial[0..key.len()]
    } else {
        &key[0..KEY_SMALL] == partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash() {
        assert_eq!(hash_key(b"hello"), 1730502474);
        assert_eq!(hash_key(b"hello\0"), 72084335);
        assert_eq!(hash_key(b""), 12345);
    }

    #[test]
    fn test_partial_key_match() {
        assert!(partial_key_match(b"123", b"123 "));
        assert!(partial_key_match(b"123456", b"1234"));
    }

    #[test]
    fn test_bucket_dir() {
        assert_eq!(bucket_dir(3, 0), 0);
        assert_eq!(bucket_dir(3, 0x7FFFFFFF), 7);
    }
}
