//
// magic.rs -- GDBM header magic numbers and byte-swap detection
//
// This file is part of the gdbm-native software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use std::fmt;
use std::io::Read;

use crate::ser::{Alignment, Endian};
use crate::Error;

// Byte patterns as they appear on disk, independent of the *reading*
// host's endianness. A `*_LE` pattern is what a little-endian host wrote;
// a `*_BE` pattern is what a big-endian host wrote. Values taken verbatim
// from the original GDBM `gdbmconst.h`.
const GDBM_OMAGIC_LE: [u8; 4] = [0xce, 0x9a, 0x57, 0x13];
const GDBM_OMAGIC_BE: [u8; 4] = [0x13, 0x57, 0x9a, 0xce];
const GDBM_MAGIC_LE_32: [u8; 4] = [0xcd, 0x9a, 0x57, 0x13];
const GDBM_MAGIC_LE_64: [u8; 4] = [0xcf, 0x9a, 0x57, 0x13];
const GDBM_MAGIC_BE_32: [u8; 4] = [0x13, 0x57, 0x9a, 0xcd];
const GDBM_MAGIC_BE_64: [u8; 4] = [0x13, 0x57, 0x9a, 0xcf];

/// The magic number found at the start of every database file,
/// identifying both the offset width (32 vs 64-bit) and, implicitly, the
/// endianness of the host that created it.
///
/// `Legacy` corresponds to `GDBM_OMAGIC`: the original format, predating
/// 64-bit offsets, accepted read-only (spec.md §3.1).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Magic {
    Legacy { le: bool },
    Magic32 { le: bool },
    Magic64 { le: bool },
}

impl Magic {
    /// The magic to write when creating a new database on this host.
    pub fn native(alignment: Alignment) -> Self {
        let le = cfg!(target_endian = "little");
        match alignment {
            Alignment::Align32 => Magic::Magic32 { le },
            Alignment::Align64 => Magic::Magic64 { le },
        }
    }

    pub(crate) fn from_reader(r: &mut impl Read) -> crate::Result<Self> {
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf).map_err(Error::Io)?;
        match buf {
            GDBM_OMAGIC_LE => Ok(Magic::Legacy { le: true }),
            GDBM_OMAGIC_BE => Ok(Magic::Legacy { le: false }),
            GDBM_MAGIC_LE_32 => Ok(Magic::Magic32 { le: true }),
            GDBM_MAGIC_BE_32 => Ok(Magic::Magic32 { le: false }),
            GDBM_MAGIC_LE_64 => Ok(Magic::Magic64 { le: true }),
            GDBM_MAGIC_BE_64 => Ok(Magic::Magic64 { le: false }),
            _ => Err(Error::BadMagicNumber { bytes: buf }),
        }
    }

    pub(crate) fn as_bytes(&self) -> &'static [u8; 4] {
        match self {
            Magic::Legacy { le: true } => &GDBM_OMAGIC_LE,
            Magic::Legacy { le: false } => &GDBM_OMAGIC_BE,
            Magic::Magic32 { le: true } => &GDBM_MAGIC_LE_32,
            Magic::Magic32 { le: false } => &GDBM_MAGIC_BE_32,
            Magic::Magic64 { le: true } => &GDBM_MAGIC_LE_64,
            Magic::Magic64 { le: false } => &GDBM_MAGIC_BE_64,
        }
    }

    /// True if this magic was written by a host whose endianness matches
    /// the one this binary is running on. If false, the file was written
    /// on a host of the opposite endianness: spec.md treats this as an
    /// unsupported, not a byte-swap-and-continue, condition.
    pub fn matches_host_endian(&self) -> bool {
        let le = matches!(
            self,
            Magic::Legacy { le: true } | Magic::Magic32 { le: true } | Magic::Magic64 { le: true }
        );
        le == cfg!(target_endian = "little")
    }

    pub fn endian(&self) -> Endian {
        let le = matches!(
            self,
            Magic::Legacy { le: true } | Magic::Magic32 { le: true } | Magic::Magic64 { le: true }
        );
        if le {
            Endian::Little
        } else {
            Endian::Big
        }
    }

    pub fn alignment(&self) -> Alignment {
        match self {
            Magic::Magic64 { .. } => Alignment::Align64,
            _ => Alignment::Align32,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Magic::Legacy { .. })
    }
}

impl fmt::Display for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Magic::Legacy { le: true } => "GDBM_OMAGIC",
            Magic::Legacy { le: false } => "GDBM_OMAGIC_SWAP",
            Magic::Magic32 { le: true } => "GDBM_MAGIC32",
            Magic::Magic32 { le: false } => "GDBM_MAGIC32_SWAP",
            Magic::Magic64 { le: true } => "GDBM_MAGIC64",
            Magic::Magic64 { le: false } => "GDBM_MAGIC64_SWAP",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_native() {
        let m = Magic::native(Alignment::Align64);
        let bytes = *m.as_bytes();
        let mut cursor = &bytes[..];
        let read_back = Magic::from_reader(&mut cursor).unwrap();
        assert_eq!(m, read_back);
        assert!(read_back.matches_host_endian());
    }

    #[test]
    fn detects_foreign_endian() {
        let opposite_le = !cfg!(target_endian = "little");
        let foreign = Magic::Magic32 { le: opposite_le };
        let bytes = *foreign.as_bytes();
        let mut cursor = &bytes[..];
        let read_back = Magic::from_reader(&mut cursor).unwrap();
        assert!(!read_back.matches_host_endian());
    }
}
