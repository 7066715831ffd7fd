//! C9 — PatchReader: chain resolution and delta overlay (spec §4.7).
//! Ported from `OpenPatchedFile`/`ReadMpqFilePatchFile` in
//! `examples/original_source`: walk the chain from the most recent patch
//! toward the base, find the lowest archive holding the name without
//! `PATCH_FILE` set, then link every archive above it that patches the
//! same name.

use crate::archive::Archive;
use crate::error::{Error, Result};
use crate::flags::FILE_PATCH_FILE;
use crate::handle::{FileHandle, HandleKind};
use crate::locale::LocalePolicy;

/// A pluggable binary-delta codec for one patch entry's payload. The
/// chain-walk and materialization below are in scope; the delta formats
/// themselves (StormLib's COPY/MPQZ bsdiff variants) are codec bodies and
/// out of scope per spec §1, so the only implementation here is a stub
/// that reports as much.
pub trait PatchFormat {
    fn apply(&self, base: &[u8], patch_payload: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Default)]
pub struct UnsupportedPatchFormat;

impl PatchFormat for UnsupportedPatchFormat {
    fn apply(&self, _base: &[u8], _patch_payload: &[u8]) -> Result<Vec<u8>> {
        Err(Error::NotSupported("binary patch delta codec not implemented"))
    }
}

/// Assembles a patch-chain handle for `name`, starting from `archive`
/// (the top-most, most recently applied patch) and walking down through
/// `archive.patch` (spec §4.7).
pub fn open_patched<'a>(archive: &'a Archive, name: &str) -> Result<FileHandle<'a>> {
    let mut chain: Vec<&Archive> = Vec::new();
    let mut cursor = Some(archive);
    while let Some(a) = cursor {
        chain.push(a);
        cursor = a.patch.as_deref();
    }

    let base_index = chain
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, a)| {
            a.lookup(name, LocalePolicy::Any)
                .filter(|e| !e.flags.contains(FILE_PATCH_FILE))
                .map(|_| i)
        })
        .ok_or_else(|| Error::FileNotFound(name.to_string()))?;

    let top_size = chain
        .iter()
        .find_map(|a| a.lookup(name, LocalePolicy::Any))
        .map(|e| e.unpacked_size as u64);

    let mut handle = chain[base_index].open_file_base(name, LocalePolicy::Any)?;
    handle.kind = HandleKind::PatchChain;
    handle.reported_size = top_size;

    let mut next_link: Option<Box<FileHandle<'a>>> = None;
    for i in (0..base_index).rev() {
        let a = chain[i];
        let Some(entry) = a.lookup(name, LocalePolicy::Any) else {
            continue;
        };
        if !entry.flags.contains(FILE_PATCH_FILE) {
            continue;
        }
        let mut patch_handle = a.open_file_base(name, LocalePolicy::Any)?;
        patch_handle.patch_next = next_link.take();
        next_link = Some(Box::new(patch_handle));
    }
    handle.patch_next = next_link;

    Ok(handle)
}

/// Serves a read against a patch-chain handle: materializes the base
/// file in full on first access, applies every linked patch's delta in
/// chain order, then serves from the resulting buffer exactly like the
/// single-unit reader does (spec §4.7: "After materialisation...").
pub fn read(handle: &mut FileHandle, buf: &mut [u8]) -> Result<usize> {
    ensure_materialized(handle)?;

    let data = handle
        .file_data
        .as_ref()
        .ok_or(Error::CanNotComplete("patch chain did not materialize data"))?;

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
    if handle.file_data.is_some() {
        return Ok(());
    }

    let mut base = read_whole(handle)?;

    let mut next = handle.patch_next.take();
    let formatter = UnsupportedPatchFormat;
    while let Some(boxed) = next {
        let mut patch_handle = *boxed;
        let payload = read_whole(&mut patch_handle)?;
        base = formatter.apply(&base, &payload)?;
        next = patch_handle.patch_next;
    }

    handle.file_data = Some(base);
    Ok(())
}

/// Reads a handle's content in full, bypassing the patch dispatch in
/// `FileHandle::read_file` (used both for the base file and for each
/// linked patch payload, which are themselves plain `BaseFile` handles).
fn read_whole(handle: &mut FileHandle) -> Result<Vec<u8>> {
    let size = handle.entry.unpacked_size as usize;
    let mut out = vec![0u8; size];
    let mut total = 0;

    while total < out.len() {
        let n = if handle.entry.flags.contains(crate::flags::FILE_SINGLE_UNIT) {
            crate::reader::unit::read(handle, &mut out[total..])?
        } else {
            crate::reader::sector::read(handle, &mut out[total..])?
        };
        if n == 0 {
            break;
        }
        total += n;
    }

    out.truncate(total);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use crate::archive::Archive;
    use crate::cipher::{BLOCK_TABLE_KEY_NAME, HASH_TABLE_KEY_NAME};
    use crate::error::Error;
    use crate::hash::{hash3, hash_string, HASH_FILE_KEY};
    use crate::scope::OpenScope;
    use byteorder::{ByteOrder, LittleEndian};
    use std::io::Read;

    fn put_u32(buf: &mut [u8], off: usize, v: u32) {
        LittleEndian::write_u32(&mut buf[off..], v);
    }

    /// Builds a single-file, single-unit format-0 archive. `patch_info`
    /// prefixes the stored bytes with a 12-byte `PatchInfo` header when the
    /// file is itself meant to carry `FILE_PATCH_FILE`.
    fn build_single_file_archive(name: &str, stored: &[u8], unpacked_size: u32, extra_flags: u32) -> Vec<u8> {
        let header_size = 32u32;
        let hash_off = header_size as u64;
        let block_off = hash_off + 16;
        let data_off = block_off + 16;

        let mut buf = vec![0u8; data_off as usize + stored.len()];
        buf[0..4].copy_from_slice(b"MPQ\x1A");
        put_u32(&mut buf, 0x04, header_size);
        put_u32(&mut buf, 0x08, buf.len() as u32);
        put_u32(&mut buf, 0x10, hash_off as u32);
        put_u32(&mut buf, 0x14, block_off as u32);
        put_u32(&mut buf, 0x18, 1);
        put_u32(&mut buf, 0x1C, 1);

        let (_, hash_a, hash_b) = hash3(name);
        let mut hash_entry = [0u8; 16];
        put_u32(&mut hash_entry, 0, hash_a);
        put_u32(&mut hash_entry, 4, hash_b);
        crate::hash::encrypt_block(
            &mut hash_entry,
            hash_string(HASH_TABLE_KEY_NAME, HASH_FILE_KEY),
        );
        buf[hash_off as usize..hash_off as usize + 16].copy_from_slice(&hash_entry);

        let flags = crate::flags::FILE_EXISTS | crate::flags::FILE_SINGLE_UNIT | extra_flags;
        let mut block_entry = [0u8; 16];
        put_u32(&mut block_entry, 0, data_off as u32);
        put_u32(&mut block_entry, 4, stored.len() as u32);
        put_u32(&mut block_entry, 8, unpacked_size);
        put_u32(&mut block_entry, 12, flags);
        crate::hash::encrypt_block(
            &mut block_entry,
            hash_string(BLOCK_TABLE_KEY_NAME, HASH_FILE_KEY),
        );
        buf[block_off as usize..block_off as usize + 16].copy_from_slice(&block_entry);

        buf[data_off as usize..].copy_from_slice(stored);
        buf
    }

    #[test]
    fn chained_archive_without_a_patch_record_reads_base_content_unchanged() {
        let base_bytes = build_single_file_archive("data.txt", b"base content", 12, 0);
        let base = Archive::open_memory(base_bytes).unwrap();
        // `top` carries no record for `data.txt` at all, only an unrelated
        // file, so the chain walk should fall straight through to `base`.
        let top_bytes = build_single_file_archive("unrelated.txt", b"x", 1, 0);
        let mut top = Archive::open_memory(top_bytes).unwrap();
        top.patch = Some(Box::new(base));

        let mut handle = top.open_file("data.txt", OpenScope::FromMpq).unwrap();
        let mut out = Vec::new();
        handle.read_to_end(&mut out).unwrap();
        assert_eq!(out, &b"base content"[..]);
    }

    #[test]
    fn patch_record_above_the_base_hits_the_unsupported_delta_codec() {
        let base_bytes = build_single_file_archive("data.txt", b"base content", 12, 0);
        let base = Archive::open_memory(base_bytes).unwrap();

        let payload = b"delta-payload";
        let mut stored = vec![0u8; 12 + payload.len()];
        stored[12..].copy_from_slice(payload);
        let top_bytes = build_single_file_archive(
            "data.txt",
            &stored,
            payload.len() as u32,
            crate::flags::FILE_PATCH_FILE,
        );
        let mut top = Archive::open_memory(top_bytes).unwrap();
        top.patch = Some(Box::new(base));

        let mut handle = top.open_file("data.txt", OpenScope::FromMpq).unwrap();
        let mut out = vec![0u8; payload.len()];
        let err = handle.read_file(&mut out).unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }
}
