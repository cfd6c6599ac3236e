//
// header.rs -- GDBM global file header routines
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use std::io::{Read, Write};

use crate::avail::AvailBlock;
use crate::bucket::{Bucket, BucketElement};
use crate::dir::build_dir_size;
use crate::magic::Magic;
use crate::ser::{self, Layout};
use crate::{Error, Result};

/// The fixed portion of the header block, excluding the avail table that
/// follows it: magic, block_sz, dir_ofs, dir_sz, dir_bits, bucket_sz,
/// bucket_elems, next_block, plus the avail block's own count/next_block
/// fields.
pub fn fixed_size(layout: Layout) -> usize {
    4 + 4 + ser::off_size(layout) + 4 + 4 + 4 + 4 + ser::off_size(layout) + 4 + ser::off_size(layout)
}

pub fn bucket_elem_count(layout: Layout, bucket_sz: u32) -> u32 {
    let bucket_hdr_sz = crate::bucket::fixed_size(layout) as u32;
    (bucket_sz - bucket_hdr_sz) / BucketElement::on_disk_size(layout) as u32 + 1
}

/// The on-disk file header: global layout parameters, the directory's
/// location, and the resident free-space table.
#[derive(Debug, Clone)]
pub struct Header {
    pub magic: Magic,
    pub layout: Layout,

    pub block_sz: u32,
    pub dir_ofs: u64,
    pub dir_sz: u32,
    pub dir_bits: u32,
    pub bucket_sz: u32,
    pub bucket_elems: u32,
    pub next_block: u64,

    pub avail: AvailBlock,

    pub dirty: bool,
}

impl Header {
    /// Builds the header for a brand new, empty database. `block_sz`
    /// picks the target size for the header block and is used as a
    /// rough guide for the number of elements a bucket holds; a
    /// bucket's actual on-disk size (`bucket_sz`) is then the exact
    /// byte count its element table requires, which may differ
    /// slightly from `block_sz`.
    pub fn new(layout: Layout, block_sz: u32) -> Self {
        let (dir_sz, dir_bits) = build_dir_size(layout, block_sz);
        let bucket_elems = bucket_elem_count(layout, block_sz);
        let bucket_sz = Bucket::byte_size(layout, bucket_elems) as u32;
        let avail_capacity = (block_sz - fixed_size(layout) as u32)
            / crate::avail::AvailElem::on_disk_size(layout) as u32;

        Header {
            magic: Magic::native(layout.alignment),
            layout,
            block_sz,
            dir_ofs: 0,
            dir_sz,
            dir_bits,
            bucket_sz,
            bucket_elems,
            next_block: 0,
            avail: AvailBlock::new(avail_capacity),
            dirty: true,
        }
    }

    pub fn new_bucket(&self) -> Bucket {
        Bucket::new(self.bucket_elems)
    }

    pub fn from_reader(file_sz: u64, mut r: impl Read) -> Result<Self> {
        let magic = Magic::from_reader(&mut r)?;
        if !magic.matches_host_endian() {
            return Err(Error::ByteSwapped);
        }
        let layout = Layout {
            alignment: magic.alignment(),
            endian: magic.endian(),
        };

        let block_sz = ser::read32(layout.endian, &mut r)?;
        let dir_ofs = ser::read_off(layout, &mut r)?;
        let dir_sz = ser::read32(layout.endian, &mut r)?;
        let dir_bits = ser::read32(layout.endian, &mut r)?;
        let bucket_sz = ser::read32(layout.endian, &mut r)?;
        let bucket_elems = ser::read32(layout.endian, &mut r)?;
        let next_block = ser::read_off(layout, &mut r)?;

        let min_block_sz = fixed_size(layout) as u32 + crate::avail::AvailElem::on_disk_size(layout) as u32;
        if block_sz < min_block_sz {
            return Err(Error::BadHeaderBlockSize {
                size: block_sz,
                minimum: min_block_sz,
            });
        }

        if next_block > file_sz {
            return Err(Error::BadHeaderNextBlock {
                next_block,
                file_size: file_sz,
            });
        }

        if dir_ofs == 0 || dir_sz == 0 || dir_ofs + dir_sz as u64 > file_sz {
            return Err(Error::BadHeaderDirectoryOffset {
                offset: dir_ofs,
                size: dir_sz,
                file_size: file_sz,
            });
        }

        let (min_dir_sz, _) = build_dir_size(layout, block_sz);
        let (_, expected_bits) = build_dir_size(layout, dir_sz);
        if dir_sz < min_dir_sz || dir_bits != expected_bits {
            return Err(Error::BadHeaderDirectory {
                size: dir_sz,
                bits: dir_bits,
                minimum_size: min_dir_sz,
                expected_bits,
            });
        }

        let bucket_hdr_min = crate::bucket::fixed_size(layout) as u32;
        if bucket_sz <= bucket_hdr_min {
            return Err(Error::BadHeaderBucketSize {
                size: bucket_sz,
                minimum: bucket_hdr_min,
            });
        }

        let expected_elems = bucket_elem_count(layout, bucket_sz);
        if bucket_elems != expected_elems {
            return Err(Error::BadHeaderBucketElems {
                elems: bucket_elems,
                expected: expected_elems,
            });
        }

        let avail_capacity = (block_sz - fixed_size(layout) as u32)
            / crate::avail::AvailElem::on_disk_size(layout) as u32;

        let avail_count = ser::read32(layout.endian, &mut r)?;
        let avail_next_block = ser::read_off(layout, &mut r)?;

        if avail_capacity < 1 || avail_count > avail_capacity {
            return Err(Error::BadHeaderAvailCount {
                elems: avail_count,
                maximum: avail_capacity,
            });
        }

        let table = crate::avail::AvailTable::read(layout, avail_count, &mut r)?;
        for elem in table.iter() {
            if elem.addr < bucket_sz as u64 || elem.addr + elem.sz as u64 > next_block {
                return Err(Error::BadAvailElem {
                    block_offset: 0,
                    elem: 0,
                    offset: elem.addr,
                    size: elem.sz,
                    file_size: file_sz,
                });
            }
        }

        Ok(Header {
            magic,
            layout,
            block_sz,
            dir_ofs,
            dir_sz,
            dir_bits,
            bucket_sz,
            bucket_elems,
            next_block,
            avail: AvailBlock {
                table,
                capacity: avail_capacity,
                next_block: avail_next_block,
            },
            dirty: false,
        })
    }

    pub fn write(&self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_all(self.magic.as_bytes())?;
        ser::write32(self.layout.endian, w, self.block_sz)?;
        ser::write_off(self.layout, w, self.dir_ofs)?;
        ser::write32(self.layout.endian, w, self.dir_sz)?;
        ser::write32(self.layout.endian, w, self.dir_bits)?;
        ser::write32(self.layout.endian, w, self.bucket_sz)?;
        ser::write32(self.layout.endian, w, self.bucket_elems)?;
        ser::write_off(self.layout, w, self.next_block)?;
        self.avail.write(self.layout, w)
    }
}
