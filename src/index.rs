//! C4 — Index: header parsing, the classic hash/block table, and the
//! HET/BET alternative (spec §4.2). Classic table layout and the open
//! loop are ported from the teacher's `Header`/`Hash`/`Block` structs in
//! its original `archive.rs`; the extended (format 2+) fields and HET/BET
//! shapes are recovered from `original_source` (`TMPQHeader`,
//! `TMPQHetTable`, `TMPQBetTable`) since the teacher only ever understood
//! format 1.

use crate::error::{Error, Result};
use crate::flags::{ArchiveSubtype, FileFlags, FILE_VALID_MASK};
use crate::hash::{hash3, parse_pseudo_name};
use crate::jenkins::het_name_hash;
use crate::locale::LocalePolicy;
use byteorder::{ByteOrder, LittleEndian};

pub const MPQ_HEADER_SIZE_V1: usize = 32;
pub const MPQ_HEADER_SIZE_V2: usize = 44;
pub const MPQ_HEADER_SIZE_V3: usize = 68;
pub const MPQ_HEADER_SIZE_V4: usize = 208;

pub const HASH_ENTRY_EMPTY: u32 = 0xFFFF_FFFF;
pub const HASH_ENTRY_DELETED: u32 = 0xFFFF_FFFE;

/// Normalized header, regardless of which on-disk format version it came
/// from (spec §4.3 step 3, "normalise to format 4 shape").
#[derive(Debug, Clone)]
pub struct Header {
    pub magic: [u8; 4],
    pub format_version: u16,
    pub header_size: u32,
    pub archive_size: u64,
    pub sector_size_shift: u16,
    pub hash_table_offset: u64,
    pub block_table_offset: u64,
    pub hash_table_count: u32,
    pub block_table_count: u32,
    pub het_table_offset: Option<u64>,
    pub bet_table_offset: Option<u64>,
    pub het_table_size: Option<u64>,
    pub bet_table_size: Option<u64>,
    pub raw_chunk_size: Option<u32>,
}

impl Header {
    /// Parses a header of any of the four on-disk format versions,
    /// already positioned at the archive's base offset (past any user
    /// data block). `src` must be at least `MPQ_HEADER_SIZE_V4` bytes for
    /// format 3 so the extended fields can be read unconditionally; the
    /// caller zero-pads short buffers for older formats.
    pub fn parse(src: &[u8]) -> Result<Header> {
        if src.len() < MPQ_HEADER_SIZE_V1 {
            return Err(Error::FileCorrupt("header shorter than format 1 minimum"));
        }

        let magic = [src[0], src[1], src[2], src[3]];
        let header_size = LittleEndian::read_u32(&src[0x04..]);
        let archive_size32 = LittleEndian::read_u32(&src[0x08..]);
        let format_version = LittleEndian::read_u16(&src[0x0C..]);
        let sector_size_shift = LittleEndian::read_u16(&src[0x0E..]);
        let hash_table_offset32 = LittleEndian::read_u32(&src[0x10..]);
        let block_table_offset32 = LittleEndian::read_u32(&src[0x14..]);
        let hash_table_count = LittleEndian::read_u32(&src[0x18..]);
        let block_table_count = LittleEndian::read_u32(&src[0x1C..]);

        let mut hash_table_offset = hash_table_offset32 as u64;
        let mut block_table_offset = block_table_offset32 as u64;
        let mut archive_size = archive_size32 as u64;
        let mut het_table_offset = None;
        let mut bet_table_offset = None;
        let mut het_table_size = None;
        let mut bet_table_size = None;
        let mut raw_chunk_size = None;

        if format_version >= 1 && src.len() >= MPQ_HEADER_SIZE_V2 {
            let extended_offset = LittleEndian::read_u64(&src[0x20..]);
            let hash_hi = LittleEndian::read_u16(&src[0x28..]) as u64;
            let block_hi = LittleEndian::read_u16(&src[0x2A..]) as u64;
            hash_table_offset |= hash_hi << 32;
            block_table_offset |= block_hi << 32;
            let _ = extended_offset; // reserved for hi-block-table; see SPEC_FULL §4.3
        }

        if format_version >= 2 && src.len() >= MPQ_HEADER_SIZE_V3 {
            archive_size = LittleEndian::read_u64(&src[0x2C..]);
            het_table_offset = Some(LittleEndian::read_u64(&src[0x34..]));
            bet_table_offset = Some(LittleEndian::read_u64(&src[0x3C..]));
        }

        if format_version >= 3 && src.len() >= MPQ_HEADER_SIZE_V4 {
            raw_chunk_size = Some(LittleEndian::read_u32(&src[0xC8..]));
            het_table_size = Some(LittleEndian::read_u64(&src[0x9C..]));
            bet_table_size = Some(LittleEndian::read_u64(&src[0xA4..]));
        }

        Ok(Header {
            magic,
            format_version,
            header_size,
            archive_size,
            sector_size_shift,
            hash_table_offset,
            block_table_offset,
            hash_table_count,
            block_table_count,
            het_table_offset,
            bet_table_offset,
            het_table_size,
            bet_table_size,
            raw_chunk_size,
        })
    }

    pub fn sector_size(&self) -> u32 {
        512u32 << self.sector_size_shift
    }

    pub fn subtype(&self) -> ArchiveSubtype {
        match &self.magic {
            b"MPK\x1A" => ArchiveSubtype::Mpk,
            b"SQP\x1A" => ArchiveSubtype::Sqp,
            _ => ArchiveSubtype::Mpq,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HashEntry {
    pub hash_a: u32,
    pub hash_b: u32,
    pub locale: u16,
    pub platform: u16,
    pub block_index: u32,
}

impl HashEntry {
    pub fn parse(src: &[u8]) -> HashEntry {
        HashEntry {
            hash_a: LittleEndian::read_u32(src),
            hash_b: LittleEndian::read_u32(&src[4..]),
            locale: LittleEndian::read_u16(&src[8..]),
            platform: LittleEndian::read_u16(&src[10..]),
            block_index: LittleEndian::read_u32(&src[12..]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.block_index == HASH_ENTRY_EMPTY
    }

    pub fn is_deleted(&self) -> bool {
        self.block_index == HASH_ENTRY_DELETED
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FileEntry {
    pub offset: u64,
    pub packed_size: u32,
    pub unpacked_size: u32,
    pub flags: FileFlags,
    pub locale: u16,
    pub hash_index: u32,
}

impl FileEntry {
    pub fn parse_block(src: &[u8]) -> (u32, u32, u32, u32) {
        (
            LittleEndian::read_u32(src),
            LittleEndian::read_u32(&src[0x4..]),
            LittleEndian::read_u32(&src[0x8..]),
            LittleEndian::read_u32(&src[0xC..]),
        )
    }
}

/// The classic hash + block table pair.
#[derive(Debug, Clone, Default)]
pub struct ClassicIndex {
    pub hash_table: Vec<HashEntry>,
    pub files: Vec<FileEntry>,
}

impl ClassicIndex {
    /// Linear-probe lookup exactly per spec §4.2: start at
    /// `hash(name, TABLE_INDEX) mod table_size`, skip deleted slots, stop
    /// at the first empty slot, compare `(hash_a, hash_b)`, then filter by
    /// locale policy. Table size is always a power of two on disk, so the
    /// probe wraps with a mask rather than modulo.
    pub fn lookup(&self, name: &str, locale_policy: LocalePolicy) -> Option<&FileEntry> {
        if self.hash_table.is_empty() {
            return None;
        }

        let (table_index, hash_a, hash_b) = hash3(name);
        let mask = self.hash_table.len() as u32 - 1;
        let start = (table_index & mask) as usize;

        let mut best: Option<(&HashEntry, u8)> = None;

        for step in 0..self.hash_table.len() {
            let idx = (start + step) & mask as usize;
            let entry = &self.hash_table[idx];

            if entry.is_empty() {
                break;
            }
            if entry.is_deleted() {
                continue;
            }
            if entry.hash_a != hash_a || entry.hash_b != hash_b {
                continue;
            }
            if !locale_policy.accepts(entry.locale) {
                continue;
            }

            let rank = locale_policy.rank(entry.locale);
            if best.map(|(_, r)| rank < r).unwrap_or(true) {
                best = Some((entry, rank));
                if rank == 0 {
                    break;
                }
            }
        }

        best.and_then(|(entry, _)| self.files.get(entry.block_index as usize))
    }

    /// All distinct locales carrying a copy of `name` (for `enum_locales`).
    pub fn locales_for(&self, name: &str) -> Vec<u16> {
        if self.hash_table.is_empty() {
            return Vec::new();
        }
        let (table_index, hash_a, hash_b) = hash3(name);
        let mask = self.hash_table.len() as u32 - 1;
        let start = (table_index & mask) as usize;
        let mut out = Vec::new();

        for step in 0..self.hash_table.len() {
            let idx = (start + step) & mask as usize;
            let entry = &self.hash_table[idx];
            if entry.is_empty() {
                break;
            }
            if entry.is_deleted() {
                continue;
            }
            if entry.hash_a == hash_a && entry.hash_b == hash_b {
                out.push(entry.locale);
            }
        }
        out
    }

    /// Resolves a `File%08u.ext` pseudo-name directly to its block entry,
    /// bypassing the hash probe entirely (spec §4.2).
    pub fn lookup_pseudo(&self, name: &str) -> Option<&FileEntry> {
        let index = parse_pseudo_name(name)?;
        self.files.get(index as usize)
    }
}

/// Compact HET table: a name-hash bitmap plus an index bucket, reduced to
/// what the read path needs (spec §4.2, `original_source`'s
/// `TMPQHetTable`). Not a byte-exact mirror of StormLib's packed-bit
/// on-disk representation — only read-path interop is required.
#[derive(Debug, Clone)]
pub struct HetTable {
    pub hash_bit_width: u32,
    /// One truncated name hash per occupied bucket slot; `None` marks an
    /// empty slot.
    pub name_hashes: Vec<Option<u64>>,
    /// `file_index[slot]` is the index into `BetTable::entries` for an
    /// occupied slot.
    pub file_index: Vec<u32>,
}

impl HetTable {
    pub fn lookup(&self, name: &str) -> Option<u32> {
        if self.name_hashes.is_empty() {
            return None;
        }
        let target = het_name_hash(name, self.hash_bit_width);
        let mask = self.name_hashes.len() as u64 - 1;
        let start = (target & mask) as usize;

        for step in 0..self.name_hashes.len() {
            let idx = (start + step) & mask as usize;
            match self.name_hashes[idx] {
                None => return None,
                Some(h) if h == target => return Some(self.file_index[idx]),
                Some(_) => continue,
            }
        }
        None
    }
}

/// BET table: the file-entry records a HET lookup resolves into.
#[derive(Debug, Clone, Default)]
pub struct BetTable {
    pub entries: Vec<FileEntry>,
}

#[derive(Debug, Clone)]
pub enum Index {
    Classic(ClassicIndex),
    Het {
        het: HetTable,
        bet: BetTable,
    },
}

impl Index {
    pub fn lookup(&self, name: &str, locale_policy: LocalePolicy) -> Option<&FileEntry> {
        match self {
            Index::Classic(classic) => classic
                .lookup(name, locale_policy)
                .or_else(|| classic.lookup_pseudo(name)),
            Index::Het { het, bet } => {
                let idx = het.lookup(name)?;
                bet.entries.get(idx as usize).filter(|entry| {
                    locale_policy.accepts(entry.locale)
                })
            }
        }
    }

    pub fn locales_for(&self, name: &str) -> Vec<u16> {
        match self {
            Index::Classic(classic) => classic.locales_for(name),
            Index::Het { het, bet } => het
                .lookup(name)
                .and_then(|idx| bet.entries.get(idx as usize))
                .map(|entry| vec![entry.locale])
                .unwrap_or_default(),
        }
    }

    /// Whether `name` resolves through the real hash-probe path rather than
    /// falling back to a `File%08u.ext` pseudo-name hit (spec §4.2). A
    /// pseudo-name open has no real filename to derive a decryption key
    /// from, so callers use this to decide whether `derive_file_key` is
    /// even meaningful here.
    pub fn is_named(&self, name: &str, locale_policy: LocalePolicy) -> bool {
        match self {
            Index::Classic(classic) => classic.lookup(name, locale_policy).is_some(),
            Index::Het { .. } => true,
        }
    }
}

/// Validates an entry's flags against the understood mask before it is
/// ever surfaced by a lookup (spec §4.2: "Files with flags outside the
/// valid mask are filtered out of the file table entirely").
pub fn entry_is_surfaceable(flags: FileFlags) -> bool {
    flags.0 & !FILE_VALID_MASK == 0 && flags.contains(crate::flags::FILE_EXISTS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::LOCALE_NEUTRAL;

    fn entry(block_index: u32, hash_a: u32, hash_b: u32, locale: u16) -> HashEntry {
        HashEntry {
            hash_a,
            hash_b,
            locale,
            platform: 0,
            block_index,
        }
    }

    fn build_index(name: &str, locale: u16) -> ClassicIndex {
        let (table_index, hash_a, hash_b) = hash3(name);
        let mask = 3u32; // table size 4
        let slot = (table_index & mask) as usize;
        let mut hash_table = vec![
            HashEntry {
                hash_a: 0,
                hash_b: 0,
                locale: 0,
                platform: 0,
                block_index: HASH_ENTRY_EMPTY,
            };
            4
        ];
        hash_table[slot] = entry(0, hash_a, hash_b, locale);

        ClassicIndex {
            hash_table,
            files: vec![FileEntry {
                offset: 0,
                packed_size: 10,
                unpacked_size: 10,
                flags: FileFlags(crate::flags::FILE_EXISTS),
                locale,
                hash_index: slot as u32,
            }],
        }
    }

    #[test]
    fn classic_lookup_finds_exact_match() {
        let idx = build_index("a.txt", LOCALE_NEUTRAL);
        let found = idx.lookup("a.txt", LocalePolicy::Any);
        assert!(found.is_some());
    }

    #[test]
    fn classic_lookup_respects_locale_policy() {
        let idx = build_index("a.txt", 0x409);
        assert!(idx.lookup("a.txt", LocalePolicy::Exact(0x407)).is_none());
        assert!(idx.lookup("a.txt", LocalePolicy::Exact(0x409)).is_some());
    }

    #[test]
    fn classic_lookup_stops_at_empty_slot() {
        let idx = build_index("a.txt", LOCALE_NEUTRAL);
        assert!(idx.lookup("nonexistent.txt", LocalePolicy::Any).is_none());
    }

    #[test]
    fn classic_lookup_skips_deleted_slots() {
        let (table_index, hash_a, hash_b) = hash3("a.txt");
        let mask = 3u32;
        let slot = (table_index & mask) as usize;
        let mut hash_table = vec![
            HashEntry {
                hash_a: 0,
                hash_b: 0,
                locale: 0,
                platform: 0,
                block_index: HASH_ENTRY_EMPTY,
            };
            4
        ];
        hash_table[slot] = HashEntry {
            hash_a: 0,
            hash_b: 0,
            locale: 0,
            platform: 0,
            block_index: HASH_ENTRY_DELETED,
        };
        hash_table[(slot + 1) & 3] = entry(0, hash_a, hash_b, LOCALE_NEUTRAL);
        let idx = ClassicIndex {
            hash_table,
            files: vec![FileEntry {
                offset: 0,
                packed_size: 1,
                unpacked_size: 1,
                flags: FileFlags(crate::flags::FILE_EXISTS),
                locale: LOCALE_NEUTRAL,
                hash_index: 0,
            }],
        };
        assert!(idx.lookup("a.txt", LocalePolicy::Any).is_some());
    }

    #[test]
    fn pseudo_name_resolves_by_index() {
        let idx = build_index("a.txt", LOCALE_NEUTRAL);
        assert!(idx.lookup_pseudo("File00000000.xxx").is_some());
        assert!(idx.lookup_pseudo("File00000099.xxx").is_none());
    }

    #[test]
    fn entry_surfaceable_rejects_unknown_flag_bits() {
        let bad = FileFlags(crate::flags::FILE_EXISTS | 0x0000_0001);
        assert!(!entry_is_surfaceable(bad));
    }

    #[test]
    fn entry_surfaceable_requires_exists_bit() {
        let missing_exists = FileFlags(crate::flags::FILE_COMPRESS);
        assert!(!entry_is_surfaceable(missing_exists));
    }

    #[test]
    fn header_v1_parses_core_fields() {
        let mut src = [0u8; MPQ_HEADER_SIZE_V1];
        src[0..4].copy_from_slice(b"MPQ\x1A");
        LittleEndian::write_u32(&mut src[0x04..], 32);
        LittleEndian::write_u32(&mut src[0x08..], 0x1000);
        LittleEndian::write_u16(&mut src[0x0C..], 0);
        LittleEndian::write_u16(&mut src[0x0E..], 3);
        LittleEndian::write_u32(&mut src[0x10..], 0x20);
        LittleEndian::write_u32(&mut src[0x14..], 0x40);
        LittleEndian::write_u32(&mut src[0x18..], 4);
        LittleEndian::write_u32(&mut src[0x1C..], 4);

        let header = Header::parse(&src).unwrap();
        assert_eq!(header.format_version, 0);
        assert_eq!(header.sector_size(), 512 << 3);
        assert_eq!(header.hash_table_offset, 0x20);
        assert_eq!(header.block_table_offset, 0x40);
        assert!(header.het_table_offset.is_none());
    }
}
