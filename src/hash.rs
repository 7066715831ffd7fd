//! C2 — HashFn: the three name-hash variants, key derivation, and
//! content-based key detection (spec §4.1).
//!
//! Ported from `HashString`/`DecryptFileKey`/the crypt-table initializer
//! documented in `StormCommon.h` (`examples/original_source`). The teacher
//! (`msierks-mpq-rust`) called out to an external `crypt` crate for this;
//! that crate isn't part of the retrieval pack, so the well-documented
//! reference algorithm is implemented in full here instead of inventing a
//! dependency on something that doesn't exist.

use byteorder::{ByteOrder, LittleEndian};
use std::sync::OnceLock;

pub const HASH_TABLE_INDEX: u32 = 0x000;
pub const HASH_NAME_A: u32 = 0x100;
pub const HASH_NAME_B: u32 = 0x200;
pub const HASH_FILE_KEY: u32 = 0x300;
#[allow(dead_code)] // parity with StormLib's HashType enum; unused by the read path
pub const HASH_KEY2_MIX: u32 = 0x400;

fn crypt_table() -> &'static [u32; 0x500] {
    static TABLE: OnceLock<[u32; 0x500]> = OnceLock::new();
    TABLE.get_or_init(build_crypt_table)
}

/// The one-shot LCG-seeded cryptographic table shared by hashing and the
/// block cipher. Never re-initialized (spec §9 "Global crypto table").
fn build_crypt_table() -> [u32; 0x500] {
    let mut table = [0u32; 0x500];
    let mut seed: u32 = 0x0010_0001;

    for index1 in 0..0x100usize {
        let mut index2 = index1;
        for _ in 0..5 {
            seed = (seed.wrapping_mul(125).wrapping_add(3)) % 0x2AAAAB;
            let temp1 = (seed & 0xFFFF) << 16;

            seed = (seed.wrapping_mul(125).wrapping_add(3)) % 0x2AAAAB;
            let temp2 = seed & 0xFFFF;

            table[index2] = temp1 | temp2;
            index2 += 0x100;
        }
    }

    table
}

fn ascii_upper() -> &'static [u8; 256] {
    static TABLE: OnceLock<[u8; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0u8; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = (i as u8).to_ascii_uppercase();
        }
        table
    })
}

/// Normalizes a filename byte the way the hash function expects: forward
/// slash becomes backslash, then upper-cased. Pure, not locale-sensitive.
fn normalize_byte(b: u8) -> u8 {
    let b = if b == b'/' { b'\\' } else { b };
    ascii_upper()[b as usize]
}

/// Classic MPQ name hash: table-index / nameA / nameB / file-key variants
/// all share this core with a different `hash_type` seed.
pub fn hash_string(name: &str, hash_type: u32) -> u32 {
    let table = crypt_table();
    let mut seed1: u32 = 0x7FED_7FED;
    let mut seed2: u32 = 0xEEEE_EEEE;

    for &byte in name.as_bytes() {
        let ch = normalize_byte(byte) as u32;
        seed1 = table[(hash_type + ch) as usize] ^ seed1.wrapping_add(seed2);
        seed2 = ch
            .wrapping_add(seed1)
            .wrapping_add(seed2)
            .wrapping_add(seed2 << 5)
            .wrapping_add(3);
    }

    seed1
}

/// The three hash-table lookup keys for a name, computed in one pass.
pub fn hash3(name: &str) -> (u32, u32, u32) {
    (
        hash_string(name, HASH_TABLE_INDEX),
        hash_string(name, HASH_NAME_A),
        hash_string(name, HASH_NAME_B),
    )
}

/// Strips any directory components, matching StormLib's
/// `GetPlainFileName`: only the final path segment feeds the file-key hash.
fn plain_file_name(name: &str) -> &str {
    name.rsplit(['\\', '/']).next().unwrap_or(name)
}

/// Derives the base decryption key for a file entry (spec §4.1 "Key
/// derivation"). `fix_key` corresponds to the `FIX_KEY` / "key adjusted by
/// position" flag.
pub fn derive_file_key(name: &str, offset: u32, size: u32, fix_key: bool) -> u32 {
    let mut key = hash_string(plain_file_name(name), HASH_FILE_KEY);
    if fix_key {
        key = key.wrapping_add(offset) ^ size;
    }
    key
}

/// One step of the classic MPQ block cipher, applied to a 4-byte-aligned
/// buffer. Exposed here (rather than only behind a `Cipher` trait) because
/// key detection needs to run exactly this algorithm to test candidate
/// keys; see `crypt::decrypt_block` for the public entry point used by the
/// sector/table readers.
pub(crate) fn decrypt_block(data: &mut [u8], mut key: u32) {
    let table = crypt_table();
    let mut seed2: u32 = 0xEEEE_EEEE;

    for chunk in data.chunks_exact_mut(4) {
        seed2 = seed2.wrapping_add(table[(0x400 + (key & 0xFF)) as usize]);
        let encrypted = LittleEndian::read_u32(chunk);
        let value = encrypted ^ key.wrapping_add(seed2);

        key = (!key << 0x15).wrapping_add(0x1111_1111) | (key >> 0x0B);
        seed2 = value
            .wrapping_add(seed2)
            .wrapping_add(seed2 << 5)
            .wrapping_add(3);

        LittleEndian::write_u32(chunk, value);
    }
}

/// Inverse of [`decrypt_block`], used only by test fixtures across the
/// crate to build synthetic encrypted tables/sectors with a known key.
#[cfg(test)]
pub(crate) fn encrypt_block(data: &mut [u8], mut key: u32) {
    let table = crypt_table();
    let mut seed2: u32 = 0xEEEE_EEEE;
    for chunk in data.chunks_exact_mut(4) {
        seed2 = seed2.wrapping_add(table[(0x400 + (key & 0xFF)) as usize]);
        let value = LittleEndian::read_u32(chunk);
        let encrypted = value ^ key.wrapping_add(seed2);

        key = (!key << 0x15).wrapping_add(0x1111_1111) | (key >> 0x0B);
        seed2 = value
            .wrapping_add(seed2)
            .wrapping_add(seed2 << 5)
            .wrapping_add(3);

        LittleEndian::write_u32(chunk, encrypted);
    }
}

/// Content-based key detection (spec §4.1): when the filename that would
/// give us the key is unknown (a pseudo-name open), the first encrypted
/// sector still leaks enough plaintext to recover it. The first word of a
/// correctly decrypted sector-offset table always equals the table's own
/// byte length; the second word is always a valid offset no larger than
/// the file. Trying all 256 low-byte key guesses and checking both
/// constraints is sufficient — the classic community attack on this
/// cipher, a pure function of `(first_ciphertext_block, sector_size,
/// file_size)` per spec §9.
pub fn detect_file_key(first_ciphertext_words: [u8; 8], sector_size: u32, file_size: u32) -> Option<u32> {
    let table = crypt_table();
    let enc0 = LittleEndian::read_u32(&first_ciphertext_words[0..4]);

    let sector_count = file_size.div_ceil(sector_size).max(1);
    let expected0 = (sector_count + 1) * 4;

    for low_byte in 0u32..=0xFF {
        let seed2_0 = 0xEEEE_EEEEu32.wrapping_add(table[(0x400 + low_byte) as usize]);
        let key = (expected0 ^ enc0).wrapping_sub(seed2_0);
        if key & 0xFF != low_byte {
            continue;
        }

        let mut probe = first_ciphertext_words;
        decrypt_block(&mut probe, key);
        let word1 = LittleEndian::read_u32(&probe[4..8]);
        if word1 <= file_size {
            return Some(key);
        }
    }

    None
}

/// Parses a synthetic "pseudo-name" of the form `File%08u.ext`, used to
/// address a file by table index rather than hashed name (spec §4.2).
pub fn parse_pseudo_name(name: &str) -> Option<u32> {
    let rest = name.strip_prefix("File")?;
    let digits_end = rest.find('.')?;
    let digits = &rest[..digits_end];
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
