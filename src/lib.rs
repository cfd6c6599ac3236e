//
// lib.rs -- GDBM core library API routines
//
// Copyright (c) 2019-2024 Jeff Garzik
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

//! Rust native implementation of an extensible-hashing embedded
//! key-value store, compatible with the on-disk format of legacy GDBM
//! data files.
//!
//! # Examples
//! ```
//! use gdbm_native as gdbm;
//!
//! # use tempfile::tempdir;
//! # fn main() -> Result<(), String> {
//! #     let tmp_dir = tempdir().map_err(|e| e.to_string())?;
//! #     let passwords = tmp_dir.path().join("top-level-doc-test");
//! #     || -> gdbm::Result<()> {
//! // Create a new database at path
//! let mut db = gdbm::OpenOptions::new()
//!     .write()
//!     .create()
//!     .open(passwords)?;
//!
//! // Insert key/value pairs
//! db.insert("286755fad04869ca523320acce0dc6a4", "chal28griffin@example.com")?;
//! db.insert("4aacf9c858c82716ab0034320bd2efe9", "floribund@gmail.com")?;
//! db.insert("d577273ff885c3f84dadb8578bb41399", "peterxentwhisle@me.com")?;
//!
//! // Read the value back. The database has no knowledge of the original type of the value stored
//! // so we need to add type hints.
//! let value: Option<String> = db.get("4aacf9c858c82716ab0034320bd2efe9")?;
//! assert!(value == Some("floribund@gmail.com".to_string()));
//! #         Ok(())
//! #     }().map_err(|e| e.to_string())
//! # }
//! ```

use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

pub mod avail;
pub mod bucket;
pub mod bytes;
pub mod dir;
pub mod error;
pub mod flags;
pub mod hashutil;
pub mod header;
pub mod import;
pub mod io;
pub mod lock;
pub mod magic;
pub mod options;
pub mod ser;

use avail::{AvailBlock, AvailElem, AvailTable};
use bucket::{Bucket, BucketCache, BucketElement};
pub use bytes::{FromBytes, ToBytesRef};
use dir::Directory;
pub use error::Error;
pub use flags::{OpenFlags, OpenMode, SetOpt, StoreMode};
use hashutil::{key_loc, partial_key_match};
use header::Header;
pub use import::BinaryWidth;
use import::{ASCIIImportIterator, BinaryImportIterator};
use io::FileIo;
use lock::FileLock;
use magic::Magic;
pub use options::OpenOptions;
pub use ser::{Alignment, Endian, Layout};

/// Our claimed GDBM lib version compatibility. Appears in ASCII dump headers.
pub const COMPAT_GDBM_VERSION: &str = "1.23";

/// Free extents this small are never worth tracking; they're absorbed
/// silently rather than recorded in an avail list.
const IGNORE_SIZE: u32 = 4;

/// Block size used when the caller doesn't ask for one and the
/// filesystem's preferred I/O size can't be determined.
const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// The default bucket cache size, in number of buckets.
pub const DEFAULT_CACHESIZE: usize = 100;

/// The crate Result type.
pub type Result<T> = std::result::Result<T, Error>;

fn native_endian() -> Endian {
    if cfg!(target_endian = "little") {
        Endian::Little
    } else {
        Endian::Big
    }
}

fn default_block_size(file: &std::fs::File) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        file.metadata()
            .ok()
            .map(|m| m.blksize() as u32)
            .filter(|&sz| sz >= 512)
            .unwrap_or(DEFAULT_BLOCK_SIZE)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        DEFAULT_BLOCK_SIZE
    }
}

/// Lays out the header, directory and first bucket of a brand new,
/// empty database: header at offset 0, directory immediately after,
/// then one all-empty bucket, matching the fresh-file layout described
/// in the on-disk format notes.
fn build_fresh(layout: Layout, block_sz: u32) -> (Header, Directory, Bucket) {
    let mut header = Header::new(layout, block_sz);

    let dir_ofs = u64::from(block_sz);
    let bucket_offset = dir_ofs + u64::from(header.dir_sz);
    header.dir_ofs = dir_ofs;
    header.next_block = bucket_offset + u64::from(header.bucket_sz);

    let dir = Directory::new(vec![bucket_offset; 1usize << header.dir_bits]);
    let bucket = header.new_bucket();
    (header, dir, bucket)
}

/// Reads just enough of the file to determine the header's exact
/// extent (magic + block size first, to learn the layout), then parses
/// the whole thing in one shot.
fn load_header(io: &mut FileIo, file_len: u64) -> Result<Header> {
    let probe = io.read_at(0, 8).map_err(Error::Io)?;
    let magic = Magic::from_reader(&mut &probe[0..4])?;
    if !magic.matches_host_endian() {
        return Err(Error::ByteSwapped);
    }
    let layout = Layout {
        alignment: magic.alignment(),
        endian: magic.endian(),
    };
    let block_sz = ser::read32(layout.endian, &mut &probe[4..8]).map_err(Error::Io)?;

    let avail_capacity =
        (block_sz.saturating_sub(header::fixed_size(layout) as u32)) / AvailElem::on_disk_size(layout) as u32;
    let header_extent = header::fixed_size(layout) + AvailBlock::byte_size(layout, avail_capacity);

    let bytes = io.read_at(0, header_extent).map_err(Error::Io)?;
    Header::from_reader(file_len, &mut &bytes[..])
}

/// An extensible-hashing, on-disk key/value store, byte-for-byte
/// compatible with the GDBM file format.
pub struct Gdbm {
    io: FileIo,
    lock: Option<FileLock>,
    header: Header,
    dir: Directory,
    bucket_cache: BucketCache,
    mode: OpenMode,
    flags: OpenFlags,
    cent_free: bool,
    coalesce: bool,
    cache_touched: bool,
    path: Option<PathBuf>,
    fatal: Option<String>,
    fatal_cb: Option<Box<dyn FnMut(&str) + Send>>,
}

impl Gdbm {
    /// Opens (or creates) a database at `path`. Most callers will prefer
    /// [`OpenOptions`], which defaults `cachesize`/`block_size`/`max_map_size`
    /// sensibly.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        path: impl AsRef<Path>,
        mode: OpenMode,
        flags: OpenFlags,
        cachesize: usize,
        block_size: Option<u32>,
        max_map_size: Option<u64>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut std_opts = std::fs::OpenOptions::new();
        std_opts.read(true);
        match mode {
            OpenMode::Reader => {}
            OpenMode::Writer => {
                std_opts.write(true);
            }
            OpenMode::WrCreat => {
                std_opts.write(true).create(true);
            }
            OpenMode::NewDb => {
                std_opts.write(true).create(true).truncate(true);
            }
        }
        let file = std_opts.open(path).map_err(Error::Io)?;
        Self::open_file(
            file,
            mode,
            flags,
            cachesize,
            block_size,
            max_map_size,
            Some(path.to_path_buf()),
            None,
        )
    }

    /// Like [`Gdbm::open`], but additionally installs a callback invoked
    /// whenever the handle transitions to its sticky fatal-error state
    /// (see spec's fatal-error design note).
    #[allow(clippy::too_many_arguments)]
    pub fn open_with_fatal_callback(
        path: impl AsRef<Path>,
        mode: OpenMode,
        flags: OpenFlags,
        cachesize: usize,
        block_size: Option<u32>,
        max_map_size: Option<u64>,
        fatal_cb: Box<dyn FnMut(&str) + Send>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut std_opts = std::fs::OpenOptions::new();
        std_opts.read(true);
        match mode {
            OpenMode::Reader => {}
            OpenMode::Writer => {
                std_opts.write(true);
            }
            OpenMode::WrCreat => {
                std_opts.write(true).create(true);
            }
            OpenMode::NewDb => {
                std_opts.write(true).create(true).truncate(true);
            }
        }
        let file = std_opts.open(path).map_err(Error::Io)?;
        Self::open_file(
            file,
            mode,
            flags,
            cachesize,
            block_size,
            max_map_size,
            Some(path.to_path_buf()),
            Some(fatal_cb),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn open_file(
        file: std::fs::File,
        mode: OpenMode,
        flags: OpenFlags,
        cachesize: usize,
        block_size: Option<u32>,
        max_map_size: Option<u64>,
        path: Option<PathBuf>,
        fatal_cb: Option<Box<dyn FnMut(&str) + Send>>,
    ) -> Result<Self> {
        let lock = FileLock::acquire(file.as_raw_fd(), mode.is_writer(), flags.no_lock)?;

        let mut io = FileIo::new(file, !flags.no_mmap);
        io.set_max_map_size(max_map_size);
        let file_len = io.len().map_err(Error::Io)?;

        let fresh = file_len == 0 && mode.may_create();
        if !fresh && file_len == 0 {
            return Err(Error::EmptyDatabase);
        }

        let (header, dir, bucket_cache) = if fresh {
            let layout = Layout {
                alignment: Alignment::Align64,
                endian: native_endian(),
            };
            let block_sz = block_size.unwrap_or_else(|| default_block_size(io.file()));
            let (header, dir, bucket) = build_fresh(layout, block_sz);

            let mut bucket_cache = BucketCache::new(cachesize.max(1));
            let bucket_offset = dir.get(0);
            bucket_cache.insert(bucket_offset, bucket);
            bucket_cache.dirty_mut(bucket_offset);
            bucket_cache.set_current(bucket_offset);

            (header, dir, bucket_cache)
        } else {
            let header = load_header(&mut io, file_len)?;
            if header.magic.is_legacy() && mode.is_writer() {
                return Err(Error::LegacyDatabaseReadOnly);
            }
            let dir_bytes = io
                .read_at(header.dir_ofs, header.dir_sz as usize)
                .map_err(Error::Io)?;
            let dir = Directory::read(header.layout, header.dir_sz, &mut &dir_bytes[..]).map_err(Error::Io)?;
            dir.validate(file_len, header.bucket_sz)?;
            (header, dir, BucketCache::new(cachesize.max(1)))
        };

        let mut db = Gdbm {
            io,
            lock,
            header,
            dir,
            bucket_cache,
            mode,
            flags,
            cent_free: false,
            coalesce: false,
            cache_touched: false,
            path,
            fatal: None,
            fatal_cb,
        };

        if fresh {
            db.write_header()?;
            db.write_dir()?;
            db.flush_dirty_buckets()?;
            db.io.sync().map_err(Error::Io)?;
        }

        Ok(db)
    }

    // -- fatal-error bookkeeping --------------------------------------

    fn set_fatal(&mut self, msg: String) {
        log::error!("{msg}");
        if let Some(cb) = &mut self.fatal_cb {
            cb(&msg);
        }
        self.fatal = Some(msg);
    }

    fn fatal_io(&mut self, e: std::io::Error) -> Error {
        self.set_fatal(format!("I/O error: {e}"));
        Error::Io(e)
    }

    fn check_fatal(&self) -> Result<()> {
        if self.fatal.is_some() {
            Err(Error::PriorFatalError)
        } else {
            Ok(())
        }
    }

    // -- on-disk metadata I/O ------------------------------------------

    fn write_header(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        self.header.write(&mut buf).map_err(|e| self.fatal_io(e))?;
        self.io.write_at(0, &buf).map_err(|e| self.fatal_io(e))?;
        self.header.dirty = false;
        Ok(())
    }

    fn write_dir(&mut self) -> Result<()> {
        let mut buf = Vec::with_capacity(self.header.dir_sz as usize);
        self.dir.write(self.header.layout, &mut buf).map_err(|e| self.fatal_io(e))?;
        self.io.write_at(self.header.dir_ofs, &buf).map_err(|e| self.fatal_io(e))?;
        self.dir.dirty = false;
        Ok(())
    }

    fn write_bucket_at(&mut self, offset: u64, bucket: &Bucket) -> Result<()> {
        let mut buf = Vec::with_capacity(self.header.bucket_sz as usize);
        bucket.write(self.header.layout, &mut buf).map_err(|e| self.fatal_io(e))?;
        self.io.write_at(offset, &buf).map_err(|e| self.fatal_io(e))
    }

    fn flush_dirty_buckets(&mut self) -> Result<()> {
        for offset in self.bucket_cache.dirty_offsets() {
            if let Some(bucket) = self.bucket_cache.get(offset).cloned() {
                self.write_bucket_at(offset, &bucket)?;
                self.bucket_cache.clear_dirty(offset);
            }
        }
        Ok(())
    }

    /// Loads the bucket at directory slot `dir_slot` into the cache (if
    /// not already resident) and makes it current, flushing whatever
    /// dirty entry the cache evicts to make room.
    fn load_bucket(&mut self, dir_slot: usize) -> Result<()> {
        self.cache_touched = true;
        let offset = self.dir.get(dir_slot);
        if !self.bucket_cache.contains(offset) {
            let bytes = self
                .io
                .read_at(offset, self.header.bucket_sz as usize)
                .map_err(Error::Io)?;
            let bucket = Bucket::read(self.header.layout, self.header.bucket_elems, self.header.dir_bits, &mut &bytes[..])?;
            if let Some((evicted_offset, evicted_bucket)) = self.bucket_cache.insert(offset, bucket) {
                log::trace!("evicting dirty bucket at {evicted_offset}");
                self.write_bucket_at(evicted_offset, &evicted_bucket)?;
            }
        }
        self.bucket_cache.set_current(offset);
        Ok(())
    }

    // -- sync / close ----------------------------------------------------

    /// Flushes every pending change (dirty buckets, directory, header) to
    /// disk and calls `fsync`. A no-op on a reader handle.
    pub fn sync(&mut self) -> Result<()> {
        self.check_fatal()?;
        if !self.mode.is_writer() {
            return Ok(());
        }
        self.flush_dirty_buckets()?;
        if self.dir.dirty {
            self.write_dir()?;
        }
        if self.header.dirty {
            self.write_header()?;
        }
        self.io.sync().map_err(|e| self.fatal_io(e))
    }

    fn post_mutate(&mut self) -> Result<()> {
        if self.flags.sync {
            self.sync()?;
        }
        Ok(())
    }

    // -- free-space allocator ------------------------------------------

    fn finish_allocation(&mut self, elem: AvailElem, size: u32) -> Result<u64> {
        if elem.sz > size {
            self.free_record(elem.addr + u64::from(size), elem.sz - size)?;
        }
        Ok(elem.addr)
    }

    /// Finds `size` contiguous bytes of free space, preferring (in
    /// order) the current bucket's local avail list, the header's
    /// resident avail list, an overflow avail block pulled in to
    /// replenish it, and finally growing the file.
    fn allocate_record(&mut self, size: u32) -> Result<u64> {
        if let Some(elem) = self
            .bucket_cache
            .current_bucket_mut()
            .and_then(|b| b.avail.take_best_fit(size))
        {
            return self.finish_allocation(elem, size);
        }

        if let Some(elem) = self.header.avail.table.take_best_fit(size) {
            self.header.dirty = true;
            return self.finish_allocation(elem, size);
        }

        if self.header.avail.next_block != 0 {
            self.pop_avail_block()?;
            if let Some(elem) = self.header.avail.table.take_best_fit(size) {
                self.header.dirty = true;
                return self.finish_allocation(elem, size);
            }
        }

        let offset = self.header.next_block;
        self.header.next_block += u64::from(size);
        self.header.dirty = true;
        Ok(offset)
    }

    fn coalesce_insert(table: &mut AvailTable, elem: AvailElem) {
        let mut elems = table.take_all();
        let merge_pos = elems
            .iter()
            .position(|e| e.addr + u64::from(e.sz) == elem.addr || elem.addr + u64::from(elem.sz) == e.addr);
        let elem = match merge_pos {
            Some(pos) => {
                let m = elems.remove(pos);
                AvailElem {
                    sz: elem.sz + m.sz,
                    addr: elem.addr.min(m.addr),
                }
            }
            None => elem,
        };
        elems.push(elem);
        *table = AvailTable::from_elems(elems);
    }

    fn free_to_bucket(&mut self, elem: AvailElem) -> Result<()> {
        let coalesce = self.coalesce;
        let bucket = self.bucket_cache.current_bucket_mut().expect("bucket loaded");
        if coalesce {
            Self::coalesce_insert(&mut bucket.avail, elem);
        } else {
            bucket.avail.insert(elem);
        }
        Ok(())
    }

    fn free_to_header(&mut self, elem: AvailElem) -> Result<()> {
        if self.coalesce {
            Self::coalesce_insert(&mut self.header.avail.table, elem);
        } else {
            self.header.avail.table.insert(elem);
        }
        self.header.dirty = true;
        if self.header.avail.table.len() > self.header.avail.capacity as usize {
            self.push_avail_block()?;
        }
        Ok(())
    }

    /// Records `size` bytes at `addr` as free, small extents excepted.
    fn free_record(&mut self, addr: u64, size: u32) -> Result<()> {
        if size <= IGNORE_SIZE {
            return Ok(());
        }
        let elem = AvailElem { sz: size, addr };
        if self.cent_free {
            return self.free_to_header(elem);
        }
        let has_room = self
            .bucket_cache
            .current_bucket()
            .is_some_and(|b| b.avail.len() < bucket::BUCKET_AVAIL);
        if has_room {
            self.free_to_bucket(elem)
        } else {
            self.free_to_header(elem)
        }
    }

    /// Spills half (by count, biased to the largest extents) of the
    /// header's resident avail table into a fresh overflow block,
    /// chaining it onto the existing overflow stack.
    fn push_avail_block(&mut self) -> Result<()> {
        let mut elems = self.header.avail.table.take_all();
        let mid = elems.len() / 2;
        let spill = elems.split_off(mid);
        self.header.avail.table = AvailTable::from_elems(elems);

        let capacity = self.header.avail.capacity;
        let block = AvailBlock {
            table: AvailTable::from_elems(spill),
            capacity,
            next_block: self.header.avail.next_block,
        };

        let byte_len = AvailBlock::byte_size(self.header.layout, capacity) as u32;
        let offset = self.allocate_record(byte_len)?;
        let mut buf = Vec::with_capacity(byte_len as usize);
        block.write(self.header.layout, &mut buf).map_err(|e| self.fatal_io(e))?;
        self.io.write_at(offset, &buf).map_err(|e| self.fatal_io(e))?;

        self.header.avail.next_block = offset;
        self.header.dirty = true;
        log::debug!("pushed avail overflow block at {offset}");
        Ok(())
    }

    /// Pulls the first overflow avail block back into the header's
    /// resident table, freeing the block's own storage.
    fn pop_avail_block(&mut self) -> Result<()> {
        let addr = self.header.avail.next_block;
        if addr == 0 {
            return Ok(());
        }
        let capacity = self.header.avail.capacity;
        let byte_len = AvailBlock::byte_size(self.header.layout, capacity);
        let bytes = self.io.read_at(addr, byte_len).map_err(Error::Io)?;
        let block = AvailBlock::read(self.header.layout, capacity, &mut &bytes[..]).map_err(Error::Io)?;

        let mut elems = self.header.avail.table.take_all();
        elems.extend(block.table.into_elems());
        self.header.avail.table = AvailTable::from_elems(elems);
        self.header.avail.next_block = block.next_block;
        self.header.dirty = true;

        self.free_record(addr, byte_len as u32)?;
        log::debug!("popped avail overflow block from {addr}");
        Ok(())
    }

    // -- directory / bucket splitting ------------------------------------

    fn extend_directory(&mut self) -> Result<()> {
        self.dir.extend();
        self.header.dir_bits += 1;
        let new_dir_sz = self.dir.byte_size(self.header.layout) as u32;
        let old_dir_sz = self.header.dir_sz;
        let old_dir_ofs = self.header.dir_ofs;
        self.header.dir_sz = new_dir_sz;

        let new_ofs = self.allocate_record(new_dir_sz)?;
        self.header.dir_ofs = new_ofs;
        self.header.dirty = true;
        self.write_dir()?;
        self.free_record(old_dir_ofs, old_dir_sz)?;

        log::debug!("directory doubled to {} bits", self.header.dir_bits);
        Ok(())
    }

    /// Splits the bucket at directory slot `dir_slot`, doubling the
    /// directory first if that bucket's local depth has caught up to
    /// the directory's global depth.
    fn split_bucket(&mut self, dir_slot: usize) -> Result<()> {
        let bits = self.bucket_cache.current_bucket().expect("bucket loaded").bits;
        if bits == self.header.dir_bits {
            self.extend_directory()?;
        }

        let cur_offset = self.bucket_cache.current_offset().expect("bucket loaded");
        let dir_bits = self.header.dir_bits;
        let upper = self
            .bucket_cache
            .current_bucket_mut()
            .expect("bucket loaded")
            .split(dir_bits);
        let new_bits = self.bucket_cache.current_bucket().expect("bucket loaded").bits;

        let mut new_bucket = self.header.new_bucket();
        new_bucket.bits = new_bits;
        for elem in upper {
            let idx = new_bucket.insertion_point(elem.hash());
            new_bucket.insert_at(idx, elem);
        }

        let new_offset = self.allocate_record(self.header.bucket_sz)?;
        if let Some((evicted_offset, evicted_bucket)) = self.bucket_cache.insert(new_offset, new_bucket) {
            self.write_bucket_at(evicted_offset, &evicted_bucket)?;
        }
        self.bucket_cache.dirty_mut(new_offset);
        self.bucket_cache.dirty_mut(cur_offset);

        self.dir.update_bucket_split(dir_slot, new_bits, cur_offset, new_offset);
        log::debug!("split bucket {cur_offset} -> {cur_offset}, {new_offset} (bits {new_bits})");
        Ok(())
    }

    // -- key lookup ------------------------------------------------------

    /// Locates `key`, loading its bucket as a side effect. Returns the
    /// bucket's directory slot, the occupied slot index if `key` is
    /// present, and `key`'s hash (needed by callers that must resume a
    /// scan from this position even when the key isn't found).
    fn find_slot(&mut self, key: &[u8]) -> Result<(usize, Option<usize>, u32)> {
        let (hash, dir_slot, _) = key_loc(self.header.dir_bits, self.header.bucket_elems, key);
        self.load_bucket(dir_slot)?;

        let len = self.bucket_cache.current_bucket().expect("just loaded").tab.len();
        let mut idx = self.bucket_cache.current_bucket().expect("just loaded").insertion_point(hash);

        while idx < len {
            let found = {
                let bucket = self.bucket_cache.current_bucket().expect("just loaded");
                match &bucket.tab[idx] {
                    BucketElement::Occupied {
                        hash: h,
                        key_start,
                        data_ofs,
                        key_size,
                        ..
                    } if *h == hash => Some((*key_start, *data_ofs, *key_size)),
                    _ => None,
                }
            };
            let (key_start, data_ofs, key_size) = match found {
                Some(t) => t,
                None => break,
            };
            if partial_key_match(key, &key_start) {
                let full = self.io.read_at(data_ofs, key_size as usize).map_err(Error::Io)?;
                if full == key {
                    return Ok((dir_slot, Some(idx), hash));
                }
            }
            idx += 1;
        }
        Ok((dir_slot, None, hash))
    }

    // -- core byte-level operations ---------------------------------------

    /// Looks up `key`, returning its stored value if present.
    pub fn fetch(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_fatal()?;
        let (_, slot, _) = self.find_slot(key)?;
        let Some(idx) = slot else { return Ok(None) };
        let (data_ofs, key_size, data_size) = {
            let bucket = self.bucket_cache.current_bucket().expect("just loaded");
            match &bucket.tab[idx] {
                BucketElement::Occupied {
                    data_ofs,
                    key_size,
                    data_size,
                    ..
                } => (*data_ofs, *key_size, *data_size),
                BucketElement::Empty => unreachable!("slot index came from an occupied match"),
            }
        };
        let data = self
            .io
            .read_at(data_ofs + u64::from(key_size), data_size as usize)
            .map_err(Error::Io)?;
        Ok(Some(data))
    }

    /// Reports whether `key` is present, without reading its value.
    pub fn exists(&mut self, key: &[u8]) -> Result<bool> {
        self.check_fatal()?;
        let (_, slot, _) = self.find_slot(key)?;
        Ok(slot.is_some())
    }

    /// Stores `key` -> `data`. With [`StoreMode::Insert`], fails with
    /// [`Error::CannotReplace`] if `key` is already present; with
    /// [`StoreMode::Replace`], overwrites it.
    pub fn store(&mut self, key: &[u8], data: &[u8], mode: StoreMode) -> Result<()> {
        self.check_fatal()?;
        if !self.mode.is_writer() {
            return Err(Error::ReaderCantStore);
        }
        if key.is_empty() || data.is_empty() {
            return Err(Error::IllegalData);
        }

        let (dir_slot, slot, hash) = self.find_slot(key)?;

        if let Some(idx) = slot {
            if mode == StoreMode::Insert {
                return Err(Error::CannotReplace);
            }
            return self.replace_at(idx, key, data);
        }

        let mut tries = 0u32;
        loop {
            let (_, dir_slot, _) = key_loc(self.header.dir_bits, self.header.bucket_elems, key);
            self.load_bucket(dir_slot)?;
            if !self.bucket_cache.current_bucket().expect("just loaded").is_full() {
                break;
            }
            tries += 1;
            if tries > hashutil::GDBM_HASH_BITS + 4 {
                return Err(Error::Inconsistent);
            }
            self.split_bucket(dir_slot)?;
        }
        let _ = dir_slot;

        let data_ofs = self.allocate_record(key.len() as u32 + data.len() as u32)?;
        let mut record = Vec::with_capacity(key.len() + data.len());
        record.extend_from_slice(key);
        record.extend_from_slice(data);
        self.io.write_at(data_ofs, &record).map_err(|e| self.fatal_io(e))?;

        let mut key_start = [0u8; hashutil::KEY_SMALL];
        let n = key.len().min(hashutil::KEY_SMALL);
        key_start[..n].copy_from_slice(&key[..n]);
        let elem = BucketElement::Occupied {
            hash,
            key_start,
            data_ofs,
            key_size: key.len() as u32,
            data_size: data.len() as u32,
        };

        let bucket = self.bucket_cache.current_bucket_mut().expect("just loaded");
        let idx = bucket.insertion_point(hash);
        bucket.insert_at(idx, elem);

        self.post_mutate()
    }

    fn replace_at(&mut self, idx: usize, key: &[u8], data: &[u8]) -> Result<()> {
        let (old_data_ofs, key_size, old_data_size) = {
            let bucket = self.bucket_cache.current_bucket().expect("just loaded");
            match &bucket.tab[idx] {
                BucketElement::Occupied {
                    data_ofs,
                    key_size,
                    data_size,
                    ..
                } => (*data_ofs, *key_size, *data_size),
                BucketElement::Empty => unreachable!("slot index came from an occupied match"),
            }
        };

        let new_data_ofs = if data.len() as u32 <= old_data_size {
            self.io
                .write_at(old_data_ofs + u64::from(key_size), data)
                .map_err(|e| self.fatal_io(e))?;
            old_data_ofs
        } else {
            let ofs = self.allocate_record(key_size + data.len() as u32)?;
            let mut record = Vec::with_capacity(key_size as usize + data.len());
            record.extend_from_slice(key);
            record.extend_from_slice(data);
            self.io.write_at(ofs, &record).map_err(|e| self.fatal_io(e))?;
            self.free_record(old_data_ofs, key_size + old_data_size)?;
            ofs
        };

        let hash = hashutil::hash_key(key);
        let mut key_start = [0u8; hashutil::KEY_SMALL];
        let n = key.len().min(hashutil::KEY_SMALL);
        key_start[..n].copy_from_slice(&key[..n]);
        let elem = BucketElement::Occupied {
            hash,
            key_start,
            data_ofs: new_data_ofs,
            key_size,
            data_size: data.len() as u32,
        };
        let bucket = self.bucket_cache.current_bucket_mut().expect("just loaded");
        bucket.tab[idx] = elem;

        self.post_mutate()
    }

    /// Removes `key`, returning its stored value if it was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_fatal()?;
        if !self.mode.is_writer() {
            return Err(Error::ReaderCantDelete);
        }

        let (_, slot, _) = self.find_slot(key)?;
        let Some(idx) = slot else { return Ok(None) };

        let (data_ofs, key_size, data_size) = {
            let bucket = self.bucket_cache.current_bucket().expect("just loaded");
            match &bucket.tab[idx] {
                BucketElement::Occupied {
                    data_ofs,
                    key_size,
                    data_size,
                    ..
                } => (*data_ofs, *key_size, *data_size),
                BucketElement::Empty => unreachable!("slot index came from an occupied match"),
            }
        };
        let data = self
            .io
            .read_at(data_ofs + u64::from(key_size), data_size as usize)
            .map_err(Error::Io)?;

        self.bucket_cache.current_bucket_mut().expect("just loaded").remove_at(idx);
        self.free_record(data_ofs, key_size + data_size)?;
        self.post_mutate()?;
        Ok(Some(data))
    }

    // -- hash-order traversal ---------------------------------------------

    fn next_occupied_in_bucket(&mut self, start_idx: usize) -> Result<Option<Vec<u8>>> {
        let len = self.bucket_cache.current_bucket().expect("loaded").tab.len();
        let mut idx = start_idx;
        while idx < len {
            let found = {
                let bucket = self.bucket_cache.current_bucket().expect("loaded");
                match &bucket.tab[idx] {
                    BucketElement::Occupied { data_ofs, key_size, .. } => Some((*data_ofs, *key_size)),
                    BucketElement::Empty => None,
                }
            };
            match found {
                Some((data_ofs, key_size)) => {
                    let key = self.io.read_at(data_ofs, key_size as usize).map_err(Error::Io)?;
                    return Ok(Some(key));
                }
                None => break, // occupied entries always sort before empties
            }
            #[allow(unreachable_code)]
            {
                idx += 1;
            }
        }
        Ok(None)
    }

    fn scan_from_dir(&mut self, mut dir_idx: usize) -> Result<Option<Vec<u8>>> {
        let dir_len = self.dir.len();
        while dir_idx < dir_len {
            self.load_bucket(dir_idx)?;
            if let Some(key) = self.next_occupied_in_bucket(0)? {
                return Ok(Some(key));
            }
            let bits = self.bucket_cache.current_bucket().expect("loaded").bits;
            let span = 1usize << (self.header.dir_bits - bits);
            dir_idx = (dir_idx / span + 1) * span;
        }
        Ok(None)
    }

    /// Returns the first key in hash order, or `None` if the database is
    /// empty.
    pub fn first_key(&mut self) -> Result<Option<Vec<u8>>> {
        self.check_fatal()?;
        self.scan_from_dir(0)
    }

    /// Returns the key that follows `key` in hash order. `key` is
    /// rehashed to find its position each call; it need not still be
    /// present.
    pub fn next_key(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_fatal()?;
        let (dir_slot, slot, hash) = self.find_slot(key)?;
        let bits = self.bucket_cache.current_bucket().expect("just loaded").bits;
        let resume = match slot {
            Some(idx) => idx + 1,
            None => self.bucket_cache.current_bucket().expect("just loaded").insertion_point(hash),
        };

        if let Some(found) = self.next_occupied_in_bucket(resume)? {
            return Ok(Some(found));
        }

        let span = 1usize << (self.header.dir_bits - bits);
        let next_dir = (dir_slot / span + 1) * span;
        self.scan_from_dir(next_dir)
    }

    /// Counts the records in the database by walking the full hash-order
    /// traversal.
    pub fn len(&mut self) -> Result<usize> {
        let mut count = 0;
        let mut key = self.first_key()?;
        while let Some(k) = key {
            count += 1;
            key = self.next_key(&k)?;
        }
        Ok(count)
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.first_key()?.is_none())
    }

    /// Iterates over every `(key, value)` pair in hash order.
    pub fn iter(&mut self) -> Iter<'_> {
        Iter {
            db: self,
            state: IterState::Start,
        }
    }

    pub fn keys(&mut self) -> Result<Vec<Vec<u8>>> {
        self.iter().map(|r| r.map(|(k, _)| k)).collect()
    }

    pub fn values(&mut self) -> Result<Vec<Vec<u8>>> {
        self.iter().map(|r| r.map(|(_, v)| v)).collect()
    }

    // -- setopt -----------------------------------------------------------

    /// Tunes a runtime option. Mirrors GDBM's `gdbm_setopt`.
    pub fn setopt(&mut self, opt: SetOpt) -> Result<()> {
        if !self.mode.is_writer() {
            return Err(Error::ReaderCantSetopt);
        }
        match opt {
            SetOpt::CacheSize(n) => {
                if self.cache_touched {
                    return Err(Error::OptAlreadySet);
                }
                self.flush_dirty_buckets()?;
                self.bucket_cache = BucketCache::new(n.max(1));
                self.cache_touched = true;
                Ok(())
            }
            SetOpt::SyncMode(b) => {
                self.flags.sync = b;
                Ok(())
            }
            SetOpt::CentFree(b) => {
                self.cent_free = b;
                Ok(())
            }
            SetOpt::CoalesceBlocks(b) => {
                self.coalesce = b;
                Ok(())
            }
            SetOpt::MaxMapSize(max) => {
                self.io.set_max_map_size(Some(max));
                Ok(())
            }
        }
    }

    // -- reorganize / compact ----------------------------------------------

    fn bucket_cache_capacity(&self) -> usize {
        self.bucket_cache.capacity()
    }

    fn copy_into(&mut self, target: &mut Gdbm) -> Result<()> {
        let mut key = self.first_key()?;
        while let Some(k) = key {
            let v = self.fetch(&k)?.unwrap_or_default();
            target.store(&k, &v, StoreMode::Replace)?;
            key = self.next_key(&k)?;
        }
        Ok(())
    }

    /// Rewrites the database compactly, reclaiming free space and
    /// shrinking the directory back to its minimum size. When the
    /// handle was opened from a path, the rewrite happens in a sibling
    /// temporary file that's then renamed over the original -- so a
    /// crash mid-reorganize leaves the original file untouched. A
    /// handle with no backing path (e.g. one built directly on an
    /// anonymous tempfile) falls back to rewriting in place.
    pub fn reorganize(&mut self) -> Result<()> {
        self.check_fatal()?;
        if !self.mode.is_writer() {
            return Err(Error::ReaderCantReorganize);
        }
        self.sync()?;

        match self.path.clone() {
            Some(path) => self.reorganize_via_rename(&path),
            None => self.compact_in_place(),
        }
    }

    fn new_scratch_target(&self, file: std::fs::File) -> Result<Gdbm> {
        let block_sz = self.header.block_sz;
        let cache_cap = self.bucket_cache_capacity();
        let flags = OpenFlags {
            no_lock: true,
            no_mmap: self.flags.no_mmap,
            sync: false,
        };
        Gdbm::open_file(
            file,
            OpenMode::NewDb,
            flags,
            cache_cap,
            Some(block_sz),
            None,
            None,
            None,
        )
    }

    fn reorganize_via_rename(&mut self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::Builder::new()
            .prefix(".gdbm-reorg-")
            .tempfile_in(dir)
            .map_err(|e| Error::ReorganizeFailed(e.to_string()))?;
        let tmp_file = tmp.reopen().map_err(|e| Error::ReorganizeFailed(e.to_string()))?;

        let mut target = self.new_scratch_target(tmp_file)?;
        self.copy_into(&mut target)?;
        target.sync().map_err(|e| Error::ReorganizeFailed(e.to_string()))?;
        drop(target);

        tmp.persist(path).map_err(|e| Error::ReorganizeFailed(e.error.to_string()))?;

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(Error::Io)?;
        self.reinit_from_file(file)
    }

    fn compact_in_place(&mut self) -> Result<()> {
        let tmp_file = tempfile::tempfile().map_err(|e| Error::ReorganizeFailed(e.to_string()))?;
        let mut target = self.new_scratch_target(tmp_file)?;
        self.copy_into(&mut target)?;
        target.sync().map_err(|e| Error::ReorganizeFailed(e.to_string()))?;

        let len = target.io.len().map_err(Error::Io)?;
        let bytes = target.io.read_at(0, len as usize).map_err(Error::Io)?;
        drop(target);

        self.io.set_len(0).map_err(|e| self.fatal_io(e))?;
        self.io.write_at(0, &bytes).map_err(|e| self.fatal_io(e))?;
        self.io.sync().map_err(|e| self.fatal_io(e))?;

        self.reparse(len)
    }

    fn reinit_from_file(&mut self, file: std::fs::File) -> Result<()> {
        let lock = FileLock::acquire(file.as_raw_fd(), self.mode.is_writer(), self.flags.no_lock)?;
        let mut io = FileIo::new(file, !self.flags.no_mmap);
        let file_len = io.len().map_err(Error::Io)?;
        let header = load_header(&mut io, file_len)?;
        let dir_bytes = io
            .read_at(header.dir_ofs, header.dir_sz as usize)
            .map_err(Error::Io)?;
        let dir = Directory::read(header.layout, header.dir_sz, &mut &dir_bytes[..]).map_err(Error::Io)?;
        dir.validate(file_len, header.bucket_sz)?;

        self.io = io;
        self.lock = lock;
        self.header = header;
        self.dir = dir;
        self.bucket_cache = BucketCache::new(self.bucket_cache_capacity());
        Ok(())
    }

    fn reparse(&mut self, file_len: u64) -> Result<()> {
        let header = load_header(&mut self.io, file_len)?;
        let dir_bytes = self
            .io
            .read_at(header.dir_ofs, header.dir_sz as usize)
            .map_err(Error::Io)?;
        let dir = Directory::read(header.layout, header.dir_sz, &mut &dir_bytes[..]).map_err(Error::Io)?;
        dir.validate(file_len, header.bucket_sz)?;
        self.header = header;
        self.dir = dir;
        self.bucket_cache = BucketCache::new(self.bucket_cache_capacity());
        Ok(())
    }

    // -- dump / restore -----------------------------------------------------

    /// Writes an ASCII (base64-framed) dump compatible with `gdbm_dump`.
    pub fn export_ascii(&mut self, w: &mut impl Write, pathname: &str) -> Result<()> {
        self.check_fatal()?;
        writeln!(w, "# GDBM dump file created by {COMPAT_GDBM_VERSION}").map_err(Error::Io)?;
        writeln!(w, "#:version=1.1").map_err(Error::Io)?;
        writeln!(w, "#:file={pathname}").map_err(Error::Io)?;
        writeln!(w, "#:format=standard").map_err(Error::Io)?;
        writeln!(w, "# End of header").map_err(Error::Io)?;

        let mut count = 0usize;
        let mut key = self.first_key()?;
        while let Some(k) = key {
            let v = self.fetch(&k)?.unwrap_or_default();
            write_ascii_datum(w, &k)?;
            write_ascii_datum(w, &v)?;
            count += 1;
            key = self.next_key(&k)?;
        }
        writeln!(w, "#:count={count}").map_err(Error::Io)?;
        writeln!(w, "# End of data").map_err(Error::Io)?;
        Ok(())
    }

    /// Writes a binary dump: a flat stream of length-prefixed `(key,
    /// value)` pairs, with no header or footer.
    pub fn export_bin(&mut self, w: &mut impl Write, width: BinaryWidth) -> Result<()> {
        self.check_fatal()?;
        let mut key = self.first_key()?;
        while let Some(k) = key {
            let v = self.fetch(&k)?.unwrap_or_default();
            write_bin_datum(w, &k, width)?;
            write_bin_datum(w, &v, width)?;
            key = self.next_key(&k)?;
        }
        Ok(())
    }

    /// Restores records from an ASCII dump produced by [`Gdbm::export_ascii`],
    /// returning the number of records stored.
    pub fn import_ascii(&mut self, r: &mut dyn Read, mode: StoreMode) -> Result<usize> {
        let mut count = 0;
        let iter = ASCIIImportIterator::new(r).map_err(Error::Io)?;
        for pair in iter {
            let (k, v) = pair.map_err(Error::Io)?;
            self.store(&k, &v, mode)?;
            count += 1;
        }
        Ok(count)
    }

    /// Restores records from a binary dump produced by [`Gdbm::export_bin`],
    /// returning the number of records stored.
    pub fn import_bin(&mut self, r: &mut dyn Read, width: BinaryWidth, mode: StoreMode) -> Result<usize> {
        let mut count = 0;
        let iter = BinaryImportIterator::new(r, width);
        for pair in iter {
            let (k, v) = pair.map_err(Error::Io)?;
            self.store(&k, &v, mode)?;
            count += 1;
        }
        Ok(count)
    }

    // -- ergonomic generic convenience layer --------------------------------

    /// Stores `key` -> `data`, replacing any existing value. Byte-level
    /// equivalent of `store(..., StoreMode::Replace)`.
    pub fn insert<K: ToBytesRef + ?Sized, V: ToBytesRef + ?Sized>(&mut self, key: &K, data: &V) -> Result<()> {
        self.store(key.to_bytes_ref(), data.to_bytes_ref(), StoreMode::Replace)
    }

    /// Stores `key` -> `data` only if `key` isn't already present.
    pub fn try_insert<K: ToBytesRef + ?Sized, V: ToBytesRef + ?Sized>(&mut self, key: &K, data: &V) -> Result<()> {
        self.store(key.to_bytes_ref(), data.to_bytes_ref(), StoreMode::Insert)
    }

    pub fn get<K: ToBytesRef + ?Sized, V: FromBytes>(&mut self, key: &K) -> Result<Option<V>> {
        match self.fetch(key.to_bytes_ref())? {
            Some(bytes) => V::from_bytes(bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn contains_key<K: ToBytesRef + ?Sized>(&mut self, key: &K) -> Result<bool> {
        self.exists(key.to_bytes_ref())
    }

    pub fn remove<K: ToBytesRef + ?Sized, V: FromBytes>(&mut self, key: &K) -> Result<Option<V>> {
        match self.delete(key.to_bytes_ref())? {
            Some(bytes) => V::from_bytes(bytes).map(Some),
            None => Ok(None),
        }
    }
}

impl Drop for Gdbm {
    fn drop(&mut self) {
        if self.mode.is_writer() && self.fatal.is_none() {
            let _ = self.sync();
        }
    }
}

fn write_ascii_datum(w: &mut impl Write, data: &[u8]) -> Result<()> {
    use base64::Engine;
    writeln!(w, "#:len={}", data.len()).map_err(Error::Io)?;
    let encoded = base64::prelude::BASE64_STANDARD.encode(data);
    for chunk in encoded.as_bytes().chunks(76) {
        w.write_all(chunk).map_err(Error::Io)?;
        w.write_all(b"\n").map_err(Error::Io)?;
    }
    Ok(())
}

fn write_bin_datum(w: &mut impl Write, data: &[u8], width: BinaryWidth) -> Result<()> {
    match width {
        BinaryWidth::W32 => w.write_all(&(data.len() as u32).to_be_bytes()),
        BinaryWidth::W64 => w.write_all(&(data.len() as u64).to_be_bytes()),
    }
    .map_err(Error::Io)?;
    w.write_all(data).map_err(Error::Io)
}

enum IterState {
    Start,
    After(Vec<u8>),
    Done,
}

/// Iterator over `(key, value)` pairs in hash order, built on top of
/// [`Gdbm::first_key`]/[`Gdbm::next_key`]/[`Gdbm::fetch`].
pub struct Iter<'a> {
    db: &'a mut Gdbm,
    state: IterState,
}

impl Iterator for Iter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let key = match std::mem::replace(&mut self.state, IterState::Done) {
            IterState::Done => return None,
            IterState::Start => match self.db.first_key() {
                Ok(Some(k)) => k,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            },
            IterState::After(prev) => match self.db.next_key(&prev) {
                Ok(Some(k)) => k,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            },
        };

        let value = match self.db.fetch(&key) {
            Ok(Some(v)) => v,
            Ok(None) => return None,
            Err(e) => return Some(Err(e)),
        };

        self.state = IterState::After(key.clone());
        Some(Ok((key, value)))
    }
}
