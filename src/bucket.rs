//
// bucket.rs -- GDBM hash bucket routines
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};

use crate::avail::AvailTable;
use crate::hashutil::KEY_SMALL;
use crate::ser::{self, Layout};
use crate::Error;

/// Number of local avail-list entries carried inline in every bucket.
pub const BUCKET_AVAIL: usize = 6;

/// Bytes used by a bucket's avail header + table + bits/count fields,
/// not counting the variable-length element table that follows.
pub fn fixed_size(layout: Layout) -> usize {
    let av_header_pad = match layout.alignment {
        crate::ser::Alignment::Align32 => 0,
        crate::ser::Alignment::Align64 => 4,
    };
    4 + av_header_pad + crate::avail::AvailElem::on_disk_size(layout) * BUCKET_AVAIL + 4 + 4
}

/// One hash bucket slot. An `Empty` slot serializes with hash
/// `u32::MAX`, which always sorts after any real 31-bit hash value --
/// this is what lets lookups terminate a linear probe early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketElement {
    Empty,
    Occupied {
        hash: u32,
        key_start: [u8; KEY_SMALL],
        data_ofs: u64,
        key_size: u32,
        data_size: u32,
    },
}

const EMPTY_HASH: u32 = u32::MAX;

impl BucketElement {
    pub fn is_occupied(&self) -> bool {
        matches!(self, BucketElement::Occupied { .. })
    }

    pub fn hash(&self) -> u32 {
        match self {
            BucketElement::Empty => EMPTY_HASH,
            BucketElement::Occupied { hash, .. } => *hash,
        }
    }

    fn from_reader(layout: Layout, r: &mut impl Read) -> io::Result<Self> {
        let hash = ser::read32(layout.endian, r)?;
        let mut key_start = [0u8; KEY_SMALL];
        r.read_exact(&mut key_start)?;
        let data_ofs = ser::read_off(layout, r)?;
        let key_size = ser::read32(layout.endian, r)?;
        let data_size = ser::read32(layout.endian, r)?;

        if hash == EMPTY_HASH {
            Ok(BucketElement::Empty)
        } else {
            Ok(BucketElement::Occupied {
                hash,
                key_start,
                data_ofs,
                key_size,
                data_size,
            })
        }
    }

    fn write(&self, layout: Layout, w: &mut impl Write) -> io::Result<()> {
        match self {
            BucketElement::Empty => {
                ser::write32(layout.endian, w, EMPTY_HASH)?;
                w.write_all(&[0u8; KEY_SMALL])?;
                ser::write_off(layout, w, 0)?;
                ser::write32(layout.endian, w, 0)?;
                ser::write32(layout.endian, w, 0)
            }
            BucketElement::Occupied {
                hash,
                key_start,
                data_ofs,
                key_size,
                data_size,
            } => {
                ser::write32(layout.endian, w, *hash)?;
                w.write_all(key_start)?;
                ser::write_off(layout, w, *data_ofs)?;
                ser::write32(layout.endian, w, *key_size)?;
                ser::write32(layout.endian, w, *data_size)
            }
        }
    }

    pub const fn on_disk_size(layout: Layout) -> usize {
        4 + KEY_SMALL + match layout.alignment {
            crate::ser::Alignment::Align32 => 4,
            crate::ser::Alignment::Align64 => 8,
        } + 4
            + 4
    }
}

/// A hash bucket: the directory's leaf node, holding a fixed-size sorted
/// table of key/value location entries plus a small local free-space
/// table used before falling back to the header's avail list.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub avail: AvailTable,
    pub bits: u32,
    pub count: u32,
    pub tab: Vec<BucketElement>,
}

impl Bucket {
    pub fn new(elem_count: u32) -> Self {
        Bucket {
            avail: AvailTable::new(),
            bits: 0,
            count: 0,
            tab: vec![BucketElement::Empty; elem_count as usize],
        }
    }

    pub fn read(layout: Layout, bucket_elems: u32, dir_bits: u32, r: &mut impl Read) -> crate::Result<Self> {
        let av_count = ser::read32(layout.endian, r)?;
        if layout.alignment == crate::ser::Alignment::Align64 {
            let _padding = ser::read32(layout.endian, r)?;
        }
        let avail = AvailTable::read(layout, av_count, r)?;
        let pad_elems = BUCKET_AVAIL - avail.len().min(BUCKET_AVAIL);
        let mut pad_bytes = vec![0u8; pad_elems * crate::avail::AvailElem::on_disk_size(layout)];
        r.read_exact(&mut pad_bytes)?;

        let bits = ser::read32(layout.endian, r)?;
        let count = ser::read32(layout.endian, r)?;

        if count > bucket_elems || bits > dir_bits {
            return Err(Error::BadBucket {
                offset: 0,
                elems: count,
                bits,
                max_elems: bucket_elems,
                dir_bits,
            });
        }

        let mut tab = Vec::with_capacity(bucket_elems as usize);
        for _ in 0..bucket_elems {
            tab.push(BucketElement::from_reader(layout, r)?);
        }

        Ok(Bucket {
            avail,
            bits,
            count,
            tab,
        })
    }

    pub fn write(&self, layout: Layout, w: &mut impl Write) -> io::Result<()> {
        ser::write32(layout.endian, w, self.avail.len() as u32)?;
        if layout.alignment == crate::ser::Alignment::Align64 {
            ser::write32(layout.endian, w, 0)?;
        }
        self.avail.write(layout, BUCKET_AVAIL, w)?;

        ser::write32(layout.endian, w, self.bits)?;
        ser::write32(layout.endian, w, self.count)?;

        for elem in &self.tab {
            elem.write(layout, w)?;
        }
        Ok(())
    }

    pub fn byte_size(layout: Layout, bucket_elems: u32) -> usize {
        fixed_size(layout) + bucket_elems as usize * BucketElement::on_disk_size(layout)
    }

    pub fn is_full(&self) -> bool {
        self.count as usize == self.tab.len()
    }

    /// Inserts a new occupied slot at `idx`, shifting later occupied
    /// entries down by one (the table always stays hash-sorted with
    /// empties trailing).
    pub fn insert_at(&mut self, idx: usize, elem: BucketElement) {
        self.tab.pop();
        self.tab.insert(idx, elem);
        self.count += 1;
    }

    /// Removes the occupied slot at `idx`, shifting later entries up and
    /// appending a fresh empty slot at the end.
    pub fn remove_at(&mut self, idx: usize) -> BucketElement {
        let removed = self.tab.remove(idx);
        self.tab.push(BucketElement::Empty);
        self.count -= 1;
        removed
    }

    /// Finds the sorted insertion point for `hash` among occupied slots.
    pub fn insertion_point(&self, hash: u32) -> usize {
        self.tab.partition_point(|e| e.hash() < hash)
    }

    /// Splits this bucket's occupied entries by the next hash bit beyond
    /// the current local depth, returning the entries that belong in the
    /// new (upper) half. `self` retains the lower half and its local
    /// depth is incremented by the caller.
    pub fn split(&mut self, dir_bits: u32) -> Vec<BucketElement> {
        let bit = 1u32 << (dir_bits - self.bits - 1);
        let (lower, upper): (Vec<_>, Vec<_>) = self
            .tab
            .iter()
            .filter(|e| e.is_occupied())
            .cloned()
            .partition(|e| {
                let top_bits = e.hash() >> (crate::hashutil::GDBM_HASH_BITS - dir_bits);
                top_bits & bit == 0
            });

        let elem_count = self.tab.len();
        self.tab = vec![BucketElement::Empty; elem_count];
        self.count = 0;
        self.bits += 1;
        for elem in lower {
            let idx = self.insertion_point(elem.hash());
            self.insert_at(idx, elem);
        }

        upper
    }
}

struct CacheEntry {
    bucket: Bucket,
    dirty: bool,
}

/// A bounded, LRU-evicting cache of decoded buckets, keyed by their
/// absolute file offset. Dirty entries must be flushed by the caller
/// before being discarded; [`BucketCache::insert`] hands evicted dirty
/// buckets back rather than silently dropping them.
pub struct BucketCache {
    capacity: usize,
    entries: HashMap<u64, CacheEntry>,
    order: VecDeque<u64>,
    current: Option<u64>,
}

impl BucketCache {
    pub fn new(capacity: usize) -> Self {
        BucketCache {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
            current: None,
        }
    }

    fn touch(&mut self, offset: u64) {
        if let Some(pos) = self.order.iter().position(|&o| o == offset) {
            self.order.remove(pos);
        }
        self.order.push_back(offset);
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.entries.contains_key(&offset)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, offset: u64) -> Option<&Bucket> {
        self.entries.get(&offset).map(|e| &e.bucket)
    }

    pub fn set_current(&mut self, offset: u64) {
        self.touch(offset);
        self.current = Some(offset);
    }

    pub fn current_offset(&self) -> Option<u64> {
        self.current
    }

    pub fn current_bucket(&self) -> Option<&Bucket> {
        self.current.and_then(|ofs| self.get(ofs))
    }

    pub fn current_bucket_mut(&mut self) -> Option<&mut Bucket> {
        let cur = self.current?;
        self.dirty_mut(cur)
    }

    pub fn dirty_mut(&mut self, offset: u64) -> Option<&mut Bucket> {
        self.entries.get_mut(&offset).map(|e| {
            e.dirty = true;
            &mut e.bucket
        })
    }

    /// Inserts a freshly-loaded bucket, evicting the least-recently-used
    /// entry if the cache is already at capacity. Returns the evicted
    /// `(offset, bucket)` when it was dirty, so the caller can flush it.
    pub fn insert(&mut self, offset: u64, bucket: Bucket) -> Option<(u64, Bucket)> {
        self.touch(offset);
        self.entries.insert(
            offset,
            CacheEntry {
                bucket,
                dirty: false,
            },
        );

        if self.entries.len() <= self.capacity {
            return None;
        }

        let victim = self
            .order
            .iter()
            .position(|&o| o != offset)
            .map(|pos| self.order[pos])?;
        self.order.retain(|&o| o != victim);
        let entry = self.entries.remove(&victim)?;
        if self.current == Some(victim) {
            self.current = None;
        }
        entry.dirty.then_some((victim, entry.bucket))
    }

    pub fn dirty_offsets(&self) -> Vec<u64> {
        let mut offsets: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(&ofs, _)| ofs)
            .collect();
        offsets.sort_unstable();
        offsets
    }

    pub fn clear_dirty(&mut self, offset: u64) {
        if let Some(entry) = self.entries.get_mut(&offset) {
            entry.dirty = false;
        }
    }

    pub fn all_offsets(&self) -> Vec<u64> {
        self.entries.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashutil::GDBM_HASH_BITS;

    fn occupied(hash: u32) -> BucketElement {
        BucketElement::Occupied {
            hash,
            key_start: [0; KEY_SMALL],
            data_ofs: 1000 + hash as u64,
            key_size: 4,
            data_size: 4,
        }
    }

    #[test]
    fn insert_at_keeps_table_sorted_and_drops_a_trailing_empty() {
        let mut bucket = Bucket::new(4);
        bucket.insert_at(0, occupied(10));
        bucket.insert_at(1, occupied(30));
        // Inserting 20 between them must land at index 1.
        let idx = bucket.insertion_point(20);
        assert_eq!(idx, 1);
        bucket.insert_at(idx, occupied(20));

        let hashes: Vec<u32> = bucket.tab.iter().map(|e| e.hash()).collect();
        assert_eq!(hashes[0..3], [10, 20, 30]);
        assert_eq!(bucket.count, 3);
    }

    #[test]
    fn remove_at_shifts_down_and_appends_empty() {
        let mut bucket = Bucket::new(3);
        bucket.insert_at(0, occupied(10));
        bucket.insert_at(1, occupied(20));
        bucket.insert_at(2, occupied(30));

        let removed = bucket.remove_at(0);
        assert_eq!(removed.hash(), 10);
        let hashes: Vec<u32> = bucket.tab.iter().map(|e| e.hash()).collect();
        assert_eq!(hashes, vec![20, 30, BucketElement::Empty.hash()]);
        assert_eq!(bucket.count, 2);
    }

    #[test]
    fn split_partitions_by_the_next_hash_bit_and_preserves_order() {
        let dir_bits = 3;
        let mut bucket = Bucket::new(8);
        bucket.bits = dir_bits; // already at global depth; forces a split decision upstream
        // Top 3 bits select the directory slot; bit (31-dir_bits-1) = 27
        // decides upper/lower half after the split to depth 4.
        let low_hash = 0b000_0 << (GDBM_HASH_BITS - 4);
        let high_hash = 0b000_1 << (GDBM_HASH_BITS - 4);
        for h in [low_hash, low_hash + 1, high_hash, high_hash + 2] {
            let idx = bucket.insertion_point(h);
            bucket.insert_at(idx, occupied(h));
        }

        let upper = bucket.split(dir_bits + 1);

        assert_eq!(bucket.bits, dir_bits + 1);
        assert!(bucket.tab.iter().filter(|e| e.is_occupied()).all(|e| e.hash() >> (GDBM_HASH_BITS - 4) == 0));
        assert!(upper.iter().all(|e| e.hash() >> (GDBM_HASH_BITS - 4) == 1));

        // Sort order preserved within the retained half.
        let hashes: Vec<u32> = bucket.tab.iter().filter(|e| e.is_occupied()).map(|e| e.hash()).collect();
        let mut sorted = hashes.clone();
        sorted.sort_unstable();
        assert_eq!(hashes, sorted);
    }

    #[test]
    fn cache_evicts_lru_and_hands_back_dirty_victim() {
        let mut cache = BucketCache::new(2);
        cache.insert(1, Bucket::new(4));
        cache.insert(2, Bucket::new(4));
        cache.dirty_mut(1); // mark offset 1 dirty, and touch it to MRU

        // Touch 2 as well so 1 stays MRU; inserting a third entry should
        // evict offset 2 (LRU), which is clean, so nothing is handed back.
        cache.set_current(2);
        let evicted = cache.insert(3, Bucket::new(4));
        assert_eq!(evicted, None);
        assert!(!cache.contains(2));
        assert!(cache.contains(1));
        assert!(cache.contains(3));
    }

    #[test]
    fn cache_never_holds_the_same_offset_twice() {
        let mut cache = BucketCache::new(4);
        cache.insert(5, Bucket::new(4));
        cache.insert(5, Bucket::new(4));
        assert_eq!(cache.all_offsets(), vec![5]);
    }
}
