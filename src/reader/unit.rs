//! C8 — UnitReader: single-unit whole-file materialization (spec §4.6).
//! Ported from `ReadMpqFileSingleUnit`/`ReadMpkFileSingleUnit` in
//! `examples/original_source/src/SFileReadFile.c`: the entire file is one
//! compressed (or literal) blob, decoded in full on first read and served
//! by slicing thereafter.

use crate::cipher::Cipher as _;
use crate::compression::Codec as _;
use crate::error::{Error, Result};
use crate::flags::{ArchiveSubtype, FILE_ENCRYPTED, FILE_IMPLODE};
use crate::handle::FileHandle;

/// `TPatchInfo` (StormLib): a 12-byte header prefixing a patch file's
/// single-unit payload.
const PATCH_INFO_SIZE: u64 = 12;

pub fn read(handle: &mut FileHandle, buf: &mut [u8]) -> Result<usize> {
    ensure_materialized(handle)?;

    let data = handle
        .unit_buffer
        .as_ref()
        .ok_or(Error::CanNotComplete("single-unit buffer not populated"))?;

    let pos = handle.position as usize;
    if pos >= data.len() {
        return Ok(0);
    }

    let available = &data[pos..];
    let n = available.len().min(buf.len());
    buf[..n].copy_from_slice(&available[..n]);
    handle.position += n as u64;
    Ok(n)
}

fn ensure_materialized(handle: &mut FileHandle) -> Result<()> {
    if handle.unit_buffer.is_some() {
        return Ok(());
    }

    let archive = handle.archive.ok_or(Error::InvalidHandle)?;
    let entry = handle.entry;
    let subtype = archive.subtype();

    let (data_offset, packed_len) = if entry.flags.contains(crate::flags::FILE_PATCH_FILE) {
        (
            archive.base_offset() + entry.offset + PATCH_INFO_SIZE,
            entry.packed_size.saturating_sub(PATCH_INFO_SIZE as u32),
        )
    } else if subtype == ArchiveSubtype::Mpk {
        (archive.base_offset() + entry.offset + 0x0C, entry.packed_size)
    } else {
        (archive.base_offset() + entry.offset, entry.packed_size)
    };

    let mut raw = vec![0u8; packed_len as usize];
    archive.stream().read_at(data_offset, &mut raw)?;

    if subtype == ArchiveSubtype::Mpk {
        crate::cipher::StormCipher.decrypt_mpk_table(&mut raw)?;
        let mut out = vec![0u8; entry.unpacked_size as usize];
        let n = crate::compression::StormCodec.decompress_mpk(&raw, &mut out)?;
        out.truncate(n);
        handle.unit_buffer = Some(out);
        return Ok(());
    }

    if entry.flags.contains(FILE_ENCRYPTED) {
        let key = match handle.file_key {
            Some(key) => key,
            None => {
                let mut probe = [0u8; 8];
                probe.copy_from_slice(raw.get(0..8).ok_or(Error::UnknownFileKey)?);
                let detected =
                    crate::hash::detect_file_key(probe, archive.sector_size(), entry.unpacked_size)
                        .ok_or(Error::UnknownFileKey)?;
                handle.file_key = Some(detected);
                detected
            }
        };
        crate::hash::decrypt_block(&mut raw, key);
    }

    let decoded = if packed_len as u32 == entry.unpacked_size {
        raw
    } else if entry.flags.contains(FILE_IMPLODE) {
        let mut out = vec![0u8; entry.unpacked_size as usize];
        let n = crate::compression::explode(&raw, &mut out)?;
        out.truncate(n);
        out
    } else {
        let mut out = vec![0u8; entry.unpacked_size as usize];
        let n = crate::compression::decompress_multi(&raw, &mut out)?;
        out.truncate(n);
        out
    };

    handle.unit_buffer = Some(decoded);
    Ok(())
}
