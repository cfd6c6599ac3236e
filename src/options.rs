//
// options.rs -- ergonomic builder for opening or creating a database
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use std::path::Path;

use crate::flags::{OpenFlags, OpenMode};
use crate::{Gdbm, Result, DEFAULT_CACHESIZE};

/// Builds up the arguments to [`Gdbm::open`] from sensible defaults,
/// chainable in the usual builder style.
///
/// ```no_run
/// use gdbm_native::OpenOptions;
///
/// let db = OpenOptions::new().create().open("test.gdbm").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct OpenOptions {
    mode: OpenMode,
    flags: OpenFlags,
    cachesize: usize,
    max_map_size: Option<u64>,
    block_size: Option<u32>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            mode: OpenMode::Reader,
            flags: OpenFlags::default(),
            cachesize: DEFAULT_CACHESIZE,
            max_map_size: None,
            block_size: None,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens for reading and writing; the file must already exist.
    pub fn write(mut self) -> Self {
        self.mode = OpenMode::Writer;
        self
    }

    /// Opens for reading and writing, creating the file if it's missing.
    pub fn create(mut self) -> Self {
        self.mode = OpenMode::WrCreat;
        self
    }

    /// Always creates a fresh, empty database, discarding any file already
    /// at the given path.
    pub fn truncate(mut self) -> Self {
        self.mode = OpenMode::NewDb;
        self
    }

    /// Calls `fsync` after every mutating operation instead of only on
    /// `sync`/drop.
    pub fn sync(mut self, sync: bool) -> Self {
        self.flags.sync = sync;
        self
    }

    /// Skips whole-file advisory locking entirely.
    pub fn no_lock(mut self, no_lock: bool) -> Self {
        self.flags.no_lock = no_lock;
        self
    }

    /// Uses positioned read/write instead of a memory-mapped file view.
    pub fn no_mmap(mut self, no_mmap: bool) -> Self {
        self.flags.no_mmap = no_mmap;
        self
    }

    /// Sets the bucket cache size, in number of buckets.
    pub fn cachesize(mut self, cachesize: usize) -> Self {
        self.cachesize = cachesize;
        self
    }

    /// Bounds the mmap window, in bytes, rounded up to the page size.
    pub fn max_map_size(mut self, max_map_size: u64) -> Self {
        self.max_map_size = Some(max_map_size);
        self
    }

    /// Sets the on-disk block size used when creating a new database.
    /// Ignored unless the open mode creates a fresh file.
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = Some(block_size);
        self
    }

    pub fn open(self, path: impl AsRef<Path>) -> Result<Gdbm> {
        Gdbm::open(
            path,
            self.mode,
            self.flags,
            self.cachesize,
            self.block_size,
            self.max_map_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reader_mode_with_locking_and_mmap_enabled() {
        let opts = OpenOptions::new();
        assert_eq!(opts.mode, OpenMode::Reader);
        assert!(!opts.flags.no_lock);
        assert!(!opts.flags.no_mmap);
        assert!(!opts.flags.sync);
        assert_eq!(opts.cachesize, DEFAULT_CACHESIZE);
        assert!(opts.max_map_size.is_none());
        assert!(opts.block_size.is_none());
    }

    #[test]
    fn builder_methods_chain_and_overwrite_the_open_mode() {
        let opts = OpenOptions::new()
            .create()
            .sync(true)
            .no_lock(true)
            .no_mmap(true)
            .cachesize(64)
            .max_map_size(1 << 20)
            .block_size(512)
            .truncate();

        // truncate() is the last mode call and wins over create().
        assert_eq!(opts.mode, OpenMode::NewDb);
        assert!(opts.flags.sync);
        assert!(opts.flags.no_lock);
        assert!(opts.flags.no_mmap);
        assert_eq!(opts.cachesize, 64);
        assert_eq!(opts.max_map_size, Some(1 << 20));
        assert_eq!(opts.block_size, Some(512));
    }

    #[test]
    fn write_sets_writer_mode_without_creating() {
        let opts = OpenOptions::new().write();
        assert_eq!(opts.mode, OpenMode::Writer);
    }
}
