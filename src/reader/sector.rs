//! C7 — SectorReader: the common sector-framed read path (spec §4.5).
//! Ported from `ReadMpqFileSectorFile`/`ReadMpqSectors` in
//! `examples/original_source/src/SFileReadFile.c`. The reference
//! implementation splits a request into a head fragment (through a
//! one-sector cache), an aligned bulk middle, and a tail fragment
//! (through the cache again); this port collapses all three legs into
//! one loop over `decode_sector`, which is itself cache-aware — the same
//! sectors get decoded at most once per handle either way, just without
//! the reference's explicit three-branch shape.

use crate::error::{Error, Result};
use crate::flags::{FILE_ENCRYPTED, FILE_IMPLODE, FILE_SECTOR_CRC};
use crate::handle::FileHandle;
use byteorder::{ByteOrder, LittleEndian};

pub fn read(handle: &mut FileHandle, buf: &mut [u8]) -> Result<usize> {
    ensure_sector_offsets(handle)?;

    let file_size = handle.get_file_size();
    if handle.position >= file_size {
        return Ok(0);
    }

    let sector_size = handle.archive.ok_or(Error::InvalidHandle)?.sector_size() as u64;
    let want = buf.len().min((file_size - handle.position) as usize);
    let mut produced = 0usize;

    while produced < want {
        let sector_index = (handle.position / sector_size) as u32;
        let sector_start = sector_index as u64 * sector_size;
        let offset_in_sector = (handle.position - sector_start) as usize;

        let sector_data = decode_sector(handle, sector_index)?;
        let available = sector_data.len().saturating_sub(offset_in_sector);
        if available == 0 {
            break;
        }

        let n = available.min(want - produced);
        buf[produced..produced + n]
            .copy_from_slice(&sector_data[offset_in_sector..offset_in_sector + n]);
        produced += n;
        handle.position += n as u64;
    }

    Ok(produced)
}

/// Decodes one sector's plaintext, serving it from the handle's one-sector
/// cache when possible. Decrypt -> CRC check -> codec dispatch, exactly
/// per spec §4.5's "per-sector decode order" (the secondary-cipher and
/// byte-swap legs of that order are no-ops here: secondary cipher is out
/// of scope per spec §1 and the host is assumed little-endian per spec §9).
fn decode_sector(handle: &mut FileHandle, sector_index: u32) -> Result<Vec<u8>> {
    if let Some((cached_index, data)) = &handle.sector_cache {
        if *cached_index == sector_index {
            return Ok(data.clone());
        }
    }

    let archive = handle.archive.ok_or(Error::InvalidHandle)?;
    let entry = handle.entry;
    let sector_size = archive.sector_size();
    let sector_count = entry.unpacked_size.div_ceil(sector_size).max(1);
    let this_unpacked_len = if sector_index + 1 == sector_count {
        entry.unpacked_size - sector_index * sector_size
    } else {
        sector_size
    };

    let decoded = if entry.flags.is_compressed() {
        let offsets = handle
            .sector_offsets
            .as_ref()
            .ok_or(Error::CanNotComplete("sector offset table not loaded"))?;
        let start = *offsets
            .get(sector_index as usize)
            .ok_or(Error::FileCorrupt("sector index out of range"))?;
        let end = *offsets
            .get(sector_index as usize + 1)
            .ok_or(Error::FileCorrupt("sector index out of range"))?;
        let packed_len = end.checked_sub(start).ok_or(Error::FileCorrupt(
            "sector offset table is not monotonically increasing",
        ))? as usize;

        let mut raw = vec![0u8; packed_len];
        archive
            .stream()
            .read_at(archive.base_offset() + entry.offset + start as u64, &mut raw)?;

        if entry.flags.contains(FILE_ENCRYPTED) {
            decrypt_sector(handle, &mut raw, sector_index, sector_size, entry.unpacked_size)?;
        }

        if entry.flags.contains(FILE_SECTOR_CRC) && archive_checks_crc(archive) {
            ensure_sector_crcs(handle)?;
            if let Some(crcs) = handle_sector_crcs(handle) {
                if let Some(&expected) = crcs.get(sector_index as usize) {
                    // Sentinel values mean "not checked" (spec §4.5).
                    if expected != 0 && expected != 0xFFFF_FFFF {
                        let actual = adler32::adler32(std::io::Cursor::new(&raw))
                            .map_err(|_| Error::FileCorrupt("adler32 computation failed"))?;
                        if actual != expected {
                            return Err(Error::ChecksumError {
                                sector: sector_index,
                            });
                        }
                    }
                }
            }
        }

        if packed_len == this_unpacked_len as usize {
            raw
        } else if entry.flags.contains(FILE_IMPLODE) {
            let mut out = vec![0u8; this_unpacked_len as usize];
            let n = crate::compression::explode(&raw, &mut out)?;
            out.truncate(n);
            out
        } else {
            let mut out = vec![0u8; this_unpacked_len as usize];
            let n = crate::compression::decompress_multi(&raw, &mut out)?;
            out.truncate(n);
            out
        }
    } else {
        let start = sector_index as u64 * sector_size as u64;
        let mut raw = vec![0u8; this_unpacked_len as usize];
        archive
            .stream()
            .read_at(archive.base_offset() + entry.offset + start, &mut raw)?;

        if entry.flags.contains(FILE_ENCRYPTED) {
            decrypt_sector(handle, &mut raw, sector_index, sector_size, entry.unpacked_size)?;
        }

        raw
    };

    handle.sector_cache = Some((sector_index, decoded.clone()));
    Ok(decoded)
}

/// Decrypts one sector's raw bytes in place, recovering `handle.file_key`
/// by content (spec §4.1) on first use when it opened under a pseudo-name
/// and the real key was never derived from a name hash.
fn decrypt_sector(
    handle: &mut FileHandle,
    raw: &mut [u8],
    sector_index: u32,
    sector_size: u32,
    file_size: u32,
) -> Result<()> {
    let decrypt_key = match handle.file_key {
        Some(key) => key.wrapping_add(sector_index),
        None => {
            let mut probe = [0u8; 8];
            probe.copy_from_slice(raw.get(0..8).ok_or(Error::UnknownFileKey)?);
            let detected = crate::hash::detect_file_key(probe, sector_size, file_size)
                .ok_or(Error::UnknownFileKey)?;
            handle.file_key = Some(detected.wrapping_sub(sector_index));
            detected
        }
    };
    crate::hash::decrypt_block(raw, decrypt_key);
    Ok(())
}

fn archive_checks_crc(archive: &crate::archive::Archive) -> bool {
    archive.options.check_sector_crcs
}

fn handle_sector_crcs<'a>(handle: &'a FileHandle) -> Option<&'a Vec<u32>> {
    handle.sector_crcs.as_ref()
}

/// Loads the sector-offset table once, lazily, on first access (spec
/// §4.5 "Sector-offset loading"). Uncompressed files use fixed-size
/// sectors and carry no offset table at all.
fn ensure_sector_offsets(handle: &mut FileHandle) -> Result<()> {
    if handle.sector_offsets.is_some() || !handle.entry.flags.is_compressed() {
        return Ok(());
    }

    let archive = handle.archive.ok_or(Error::InvalidHandle)?;
    let entry = handle.entry;
    let sector_size = archive.sector_size();
    let sector_count = entry.unpacked_size.div_ceil(sector_size).max(1);
    let table_len = sector_count as usize + 1;

    let mut buf = vec![0u8; table_len * 4];
    archive.stream().read_at(archive.base_offset() + entry.offset, &mut buf)?;

    if entry.flags.contains(FILE_ENCRYPTED) {
        let table_key = match handle.file_key {
            Some(key) => key.wrapping_sub(1),
            None => {
                let mut probe = [0u8; 8];
                probe.copy_from_slice(&buf[0..8]);
                let table_key = crate::hash::detect_file_key(probe, sector_size, entry.unpacked_size)
                    .ok_or(Error::UnknownFileKey)?;
                handle.file_key = Some(table_key.wrapping_add(1));
                table_key
            }
        };
        crate::hash::decrypt_block(&mut buf, table_key);
    }

    let offsets: Vec<u32> = buf.chunks_exact(4).map(LittleEndian::read_u32).collect();
    handle.sector_offsets = Some(offsets);
    Ok(())
}

/// Loads the sector-CRC table once, lazily (spec §4.5 "Sector CRC
/// loading"). Stored immediately after the compressed data, unencrypted
/// (the documented convention for this table).
fn ensure_sector_crcs(handle: &mut FileHandle) -> Result<()> {
    if handle.sector_crcs.is_some() {
        return Ok(());
    }

    let entry = handle.entry;
    let sector_size;
    let base_offset;
    let crc_table_offset;
    let sector_count;
    {
        let archive = handle.archive.ok_or(Error::InvalidHandle)?;
        sector_size = archive.sector_size();
        base_offset = archive.base_offset();
        sector_count = entry.unpacked_size.div_ceil(sector_size).max(1);
        let offsets = handle
            .sector_offsets
            .as_ref()
            .ok_or(Error::CanNotComplete("sector offsets not loaded before crcs"))?;
        crc_table_offset = *offsets
            .get(sector_count as usize)
            .ok_or(Error::FileCorrupt("sector offset table missing crc anchor"))?;
    }

    let archive = handle.archive.ok_or(Error::InvalidHandle)?;
    let mut buf = vec![0u8; sector_count as usize * 4];
    archive.stream().read_at(
        base_offset + entry.offset + crc_table_offset as u64,
        &mut buf,
    )?;

    let crcs: Vec<u32> = buf.chunks_exact(4).map(LittleEndian::read_u32).collect();
    handle.sector_crcs = Some(crcs);
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::archive::Archive;
    use crate::cipher::{BLOCK_TABLE_KEY_NAME, HASH_TABLE_KEY_NAME};
    use crate::hash::{hash3, hash_string, HASH_FILE_KEY};
    use crate::scope::OpenScope;
    use byteorder::{ByteOrder, LittleEndian};
    use std::io::Read;

    fn put_u32(buf: &mut [u8], off: usize, v: u32) {
        LittleEndian::write_u32(&mut buf[off..], v);
    }
    fn put_u16(buf: &mut [u8], off: usize, v: u16) {
        LittleEndian::write_u16(&mut buf[off..], v);
    }

    /// Builds a format-0 archive holding one uncompressed file spanning
    /// several sectors, optionally encrypted, so the head/middle/tail loop
    /// in `read` actually has more than one sector to walk.
    fn build_sector_archive(name: &str, contents: &[u8], encrypt: bool) -> Vec<u8> {
        let header_size = 32u32;
        let hash_off = header_size as u64;
        let block_off = hash_off + 16;
        let data_off = block_off + 16;

        let mut buf = vec![0u8; data_off as usize + contents.len()];
        buf[0..4].copy_from_slice(b"MPQ\x1A");
        put_u32(&mut buf, 0x04, header_size);
        put_u32(&mut buf, 0x08, buf.len() as u32);
        put_u16(&mut buf, 0x0C, 0);
        put_u16(&mut buf, 0x0E, 0);
        put_u32(&mut buf, 0x10, hash_off as u32);
        put_u32(&mut buf, 0x14, block_off as u32);
        put_u32(&mut buf, 0x18, 1);
        put_u32(&mut buf, 0x1C, 1);

        let (_, hash_a, hash_b) = hash3(name);
        let mut hash_entry = [0u8; 16];
        put_u32(&mut hash_entry, 0, hash_a);
        put_u32(&mut hash_entry, 4, hash_b);
        put_u32(&mut hash_entry, 12, 0);
        crate::hash::encrypt_block(
            &mut hash_entry,
            hash_string(HASH_TABLE_KEY_NAME, HASH_FILE_KEY),
        );
        buf[hash_off as usize..hash_off as usize + 16].copy_from_slice(&hash_entry);

        let mut flags = crate::flags::FILE_EXISTS;
        let mut stored = contents.to_vec();
        if encrypt {
            flags |= crate::flags::FILE_ENCRYPTED;
            let key = crate::hash::derive_file_key(name, data_off as u32, contents.len() as u32, false);
            for (i, chunk) in stored.chunks_mut(512).enumerate() {
                crate::hash::encrypt_block(chunk, key.wrapping_add(i as u32));
            }
        }

        let mut block_entry = [0u8; 16];
        put_u32(&mut block_entry, 0, data_off as u32);
        put_u32(&mut block_entry, 4, contents.len() as u32);
        put_u32(&mut block_entry, 8, contents.len() as u32);
        put_u32(&mut block_entry, 12, flags);
        crate::hash::encrypt_block(
            &mut block_entry,
            hash_string(BLOCK_TABLE_KEY_NAME, HASH_FILE_KEY),
        );
        buf[block_off as usize..block_off as usize + 16].copy_from_slice(&block_entry);

        buf[data_off as usize..].copy_from_slice(&stored);
        buf
    }

    #[test]
    fn reads_plain_content_across_several_sectors() {
        let contents: Vec<u8> = (0..1100u32).map(|i| (i % 251) as u8).collect();
        let bytes = build_sector_archive("big.dat", &contents, false);
        let archive = Archive::open_memory(bytes).unwrap();
        let mut handle = archive.open_file("big.dat", OpenScope::FromMpq).unwrap();
        let mut out = Vec::new();
        handle.read_to_end(&mut out).unwrap();
        assert_eq!(out, contents);
    }

    #[test]
    fn reads_encrypted_content_across_several_sectors() {
        let contents: Vec<u8> = (0..900u32).map(|i| (i % 199) as u8).collect();
        let bytes = build_sector_archive("secret.dat", &contents, true);
        let archive = Archive::open_memory(bytes).unwrap();
        let mut handle = archive.open_file("secret.dat", OpenScope::FromMpq).unwrap();
        let mut out = Vec::new();
        handle.read_to_end(&mut out).unwrap();
        assert_eq!(out, contents);
    }

    #[test]
    fn partial_read_from_mid_file_lands_on_correct_bytes() {
        let contents: Vec<u8> = (0..1200u32).map(|i| (i % 253) as u8).collect();
        let bytes = build_sector_archive("mid.dat", &contents, false);
        let archive = Archive::open_memory(bytes).unwrap();
        let mut handle = archive.open_file("mid.dat", OpenScope::FromMpq).unwrap();
        handle.set_file_pointer(520, std::io::SeekFrom::Start(0)).unwrap();
        let mut out = [0u8; 32];
        let n = handle.read_file(&mut out).unwrap();
        assert_eq!(n, 32);
        assert_eq!(&out[..], &contents[520..552]);
    }
}
