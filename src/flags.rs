//! File and archive flag bits (spec §3). Plain `u32` masks with
//! `contains`/`intersects` helpers, matching the teacher's raw-mask style
//! (`block.flags & FILE_COMPRESS != 0`) rather than pulling in the
//! `bitflags` crate — no example in the pack reaches for it for a flag set
//! this small.

/// File compressed with PKWARE's implode method.
pub const FILE_IMPLODE: u32 = 0x0000_0100;
/// File compressed with the classic multi-codec scheme.
pub const FILE_COMPRESS: u32 = 0x0000_0200;
/// File is encrypted.
pub const FILE_ENCRYPTED: u32 = 0x0001_0000;
/// Decryption key is adjusted by file offset and size ("fix key").
pub const FILE_FIX_KEY: u32 = 0x0002_0000;
/// File is a patch file; data begins with a `PatchInfo` header.
pub const FILE_PATCH_FILE: u32 = 0x0010_0000;
/// File is stored as a single unit rather than sector-framed.
pub const FILE_SINGLE_UNIT: u32 = 0x0100_0000;
/// File has been logically deleted (tombstone entry).
pub const FILE_DELETE_MARKER: u32 = 0x0200_0000;
/// Sector CRC (Adler-32) table is present for this file.
pub const FILE_SECTOR_CRC: u32 = 0x0400_0000;
/// Entry is live (required for a legal open target).
pub const FILE_EXISTS: u32 = 0x8000_0000;

/// Every bit the reader understands. Any bit outside this mask rejects
/// the entry outright (spec §3 "Invariant", §4.2 "Salvage").
pub const FILE_VALID_MASK: u32 = FILE_IMPLODE
    | FILE_COMPRESS
    | FILE_ENCRYPTED
    | FILE_FIX_KEY
    | FILE_PATCH_FILE
    | FILE_SINGLE_UNIT
    | FILE_DELETE_MARKER
    | FILE_SECTOR_CRC
    | FILE_EXISTS;

pub const FILE_COMPRESS_MASK: u32 = FILE_IMPLODE | FILE_COMPRESS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFlags(pub u32);

impl FileFlags {
    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit == bit
    }

    pub fn is_valid(self) -> bool {
        self.0 & !FILE_VALID_MASK == 0
    }

    pub fn is_compressed(self) -> bool {
        self.0 & FILE_COMPRESS_MASK != 0
    }
}

/// Small hand-rolled substitute for the `bitflags!` macro: the crate set
/// here is tiny and fixed, so a macro dependency isn't warranted, but the
/// repeated `const`/`contains`/operator boilerplate still benefits from a
/// one-off macro instead of being typed out by hand.
macro_rules! bitflags_like_archive {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub $ty);

        impl $name {
            $(pub const $variant: $name = $name($value);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                $name(self.0 | rhs.0)
            }
        }
    };
}

bitflags_like_archive! {
    /// Archive-level flags (spec §3 "Archive").
    pub struct ArchiveFlags: u32 {
        const CHECK_SECTOR_CRC = 0x1;
        const HAS_PATCHES = 0x2;
        const MALFORMED = 0x4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveSubtype {
    Mpq,
    Mpk,
    Sqp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_mask_accepts_known_combinations() {
        let flags = FileFlags(FILE_EXISTS | FILE_COMPRESS | FILE_ENCRYPTED);
        assert!(flags.is_valid());
    }

    #[test]
    fn valid_mask_rejects_unknown_bits() {
        let flags = FileFlags(FILE_EXISTS | 0x0000_0001);
        assert!(!flags.is_valid());
    }

    #[test]
    fn archive_flags_compose() {
        let mut flags = ArchiveFlags::empty();
        flags.insert(ArchiveFlags::CHECK_SECTOR_CRC);
        flags.insert(ArchiveFlags::HAS_PATCHES);
        assert!(flags.contains(ArchiveFlags::CHECK_SECTOR_CRC));
        assert!(flags.contains(ArchiveFlags::HAS_PATCHES));
        assert!(!flags.contains(ArchiveFlags::MALFORMED));
    }
}
