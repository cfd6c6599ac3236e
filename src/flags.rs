//
// flags.rs -- open flags, setopt options and store modes
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

/// How an existing (or missing) database file should be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open for reading only; the file must already exist.
    Reader,
    /// Open for reading and writing; the file must already exist.
    Writer,
    /// Open for reading and writing, creating the file if missing.
    WrCreat,
    /// Always create a new, empty database, truncating any existing file.
    NewDb,
}

/// Runtime behavior flags, independent of `OpenMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    /// Call `fsync`/`sync_data` after every mutating operation.
    pub sync: bool,
    /// Skip whole-file advisory locking entirely.
    pub no_lock: bool,
    /// Use positioned read/write instead of a memory-mapped file view.
    pub no_mmap: bool,
}

impl OpenMode {
    pub fn is_writer(self) -> bool {
        !matches!(self, OpenMode::Reader)
    }

    pub fn may_create(self) -> bool {
        matches!(self, OpenMode::WrCreat | OpenMode::NewDb)
    }

    pub fn truncates(self) -> bool {
        matches!(self, OpenMode::NewDb)
    }
}

/// Selects how [`crate::Gdbm::store`] treats an already-present key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Fail with [`crate::Error::CannotReplace`] if the key already exists.
    Insert,
    /// Overwrite the value if the key already exists.
    Replace,
}

/// The tunable parameters accepted by [`crate::Gdbm::setopt`].
#[derive(Debug, Clone, Copy)]
pub enum SetOpt {
    /// Resize the bucket cache, in number of buckets.
    CacheSize(usize),
    /// Toggle sync-after-every-write behavior.
    SyncMode(bool),
    /// Keep all free-space extents in the header's resident table rather
    /// than spreading them into buckets and overflow blocks.
    CentFree(bool),
    /// Attempt to merge adjacent free extents when recording new ones.
    CoalesceBlocks(bool),
    /// Bound the mmap window to this many bytes, rounded up to the page
    /// size. Only meaningful when the handle was opened with mmap enabled.
    MaxMapSize(u64),
}
