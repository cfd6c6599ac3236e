//
// io.rs -- mmap-backed file access with a positioned-I/O fallback
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use memmap2::{Mmap, MmapOptions};

/// Wraps a database's open file descriptor, serving reads from a
/// memory-mapped view of the file when possible and falling back to
/// positioned reads/writes otherwise. The mapping is invalidated after
/// any write and rebuilt lazily on the next read, since a write may have
/// changed the file's length.
pub struct FileIo {
    file: File,
    mmap: Option<Mmap>,
    use_mmap: bool,
    max_map_size: Option<u64>,
}

impl FileIo {
    pub fn new(file: File, use_mmap: bool) -> Self {
        let mut io = FileIo {
            file,
            mmap: None,
            use_mmap,
            max_map_size: None,
        };
        if use_mmap {
            io.remap();
        }
        io
    }

    /// Bounds the mapped window to `max` bytes, rounded up to the page
    /// size (`SETMAXMAPSIZE`). Takes effect on the next remap.
    pub fn set_max_map_size(&mut self, max: Option<u64>) {
        let page = page_size::get() as u64;
        self.max_map_size = max.map(|m| m.div_ceil(page) * page);
        self.mmap = None;
    }

    fn remap(&mut self) {
        let file_len = match self.file.metadata() {
            Ok(m) => m.len(),
            Err(_) => return,
        };
        let map_len = self.max_map_size.map_or(file_len, |max| file_len.min(max));
        if map_len == 0 {
            self.mmap = None;
            return;
        }
        self.mmap = match unsafe { MmapOptions::new().len(map_len as usize).map(&self.file) } {
            Ok(mmap) => Some(mmap),
            Err(e) => {
                log::warn!("mmap remap failed, falling back to positioned I/O: {e}");
                None
            }
        };
    }

    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        if self.use_mmap {
            if let Some(mmap) = &self.mmap {
                let start = offset as usize;
                if start.checked_add(len).is_some_and(|end| end <= mmap.len()) {
                    return Ok(mmap[start..start + len].to_vec());
                }
            }
            // Either not yet mapped, or the read reaches past the current
            // mapping (the file grew since): remap and retry once.
            self.remap();
            if let Some(mmap) = &self.mmap {
                let start = offset as usize;
                if start.checked_add(len).is_some_and(|end| end <= mmap.len()) {
                    return Ok(mmap[start..start + len].to_vec());
                }
            }
        }

        let mut buf = vec![0u8; len];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        log::trace!("write_at offset={offset} len={}", data.len());
        self.file.write_all_at(data, offset)?;
        // The file's length (and thus any prior mapping) may now be
        // stale; drop it and let the next read rebuild it.
        self.mmap = None;
        Ok(())
    }

    pub fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)?;
        self.mmap = None;
        Ok(())
    }

    pub fn sync(&self) -> io::Result<()> {
        // Writes always go through write_at (pwrite), which drops the
        // mapping; the window is read-only, so there's never a dirty
        // mmap page to msync before fsync.
        self.file.sync_data()
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}
