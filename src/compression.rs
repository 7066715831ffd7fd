//! C3 (codec half) — "decompress one buffer" (spec §6). The teacher
//! (`msierks-mpq-rust`) already depends on `flate2`, `bzip2-rs` and
//! `implode`; this module wires all three in for real instead of leaving
//! the `println!("FixMe: ...")` stubs the teacher's `compression.rs` had.
//! Codec families this crate genuinely cannot decode (Huffman, PKZIP,
//! sparse, ADPCM, LZMA) are out of scope per spec §1 and return
//! `Error::NotSupported` rather than guessing at a vendored implementation.

use crate::error::{Error, Result};
use std::io::Read;

const COMPRESSION_HUFFMAN: u8 = 0x01;
const COMPRESSION_ZLIB: u8 = 0x02;
const COMPRESSION_PKZIP: u8 = 0x08;
const COMPRESSION_BZIP2: u8 = 0x10;
const COMPRESSION_SPARSE: u8 = 0x20;
const COMPRESSION_ADPCM_MONO: u8 = 0x40;
const COMPRESSION_ADPCM_STEREO: u8 = 0x80;
const COMPRESSION_LZMA: u8 = 0x12;

pub trait Codec {
    /// Decompresses one sector that was packed by Blizzard's "multi-codec"
    /// scheme: a one-byte compression-method tag followed by the payload.
    fn decompress_multi(&self, input: &[u8], out: &mut [u8]) -> Result<usize>;

    /// PKWARE Data Compression Library ("implode").
    fn explode(&self, input: &[u8], out: &mut [u8]) -> Result<usize>;

    /// The MPK sibling format's dedicated codec.
    fn decompress_mpk(&self, _input: &[u8], _out: &mut [u8]) -> Result<usize> {
        Err(Error::NotSupported("MPK codec not implemented"))
    }
}

#[derive(Default)]
pub struct StormCodec;

impl Codec for StormCodec {
    fn decompress_multi(&self, input: &[u8], out: &mut [u8]) -> Result<usize> {
        decompress_multi(input, out)
    }

    fn explode(&self, input: &[u8], out: &mut [u8]) -> Result<usize> {
        explode(input, out)
    }
}

/// Dispatches on the leading compression-method byte. Real archives only
/// ever set one bit in practice for the methods this crate implements;
/// an unrecognized or unimplemented bit is reported rather than silently
/// skipped.
pub fn decompress_multi(data: &[u8], out: &mut [u8]) -> Result<usize> {
    let (&method, payload) = data
        .split_first()
        .ok_or(Error::FileCorrupt("empty compressed sector"))?;

    if method & COMPRESSION_ZLIB != 0 {
        return decompress_zlib(payload, out);
    }
    if method & COMPRESSION_BZIP2 != 0 {
        return decompress_bzip2(payload, out);
    }
    if method & COMPRESSION_HUFFMAN != 0 {
        return Err(Error::NotSupported("huffman compression not implemented"));
    }
    if method & COMPRESSION_PKZIP != 0 {
        return Err(Error::NotSupported("pkzip compression not implemented"));
    }
    if method & COMPRESSION_SPARSE != 0 {
        return Err(Error::NotSupported("sparse compression not implemented"));
    }
    if method == COMPRESSION_LZMA {
        return Err(Error::NotSupported("lzma compression not implemented"));
    }
    if method & (COMPRESSION_ADPCM_MONO | COMPRESSION_ADPCM_STEREO) != 0 {
        return Err(Error::NotSupported("adpcm compression not implemented"));
    }

    Err(Error::FileCorrupt("unrecognized compression method byte"))
}

fn decompress_zlib(input: &[u8], out: &mut [u8]) -> Result<usize> {
    let mut zlib = flate2::Decompress::new(true);
    zlib.decompress(input, out, flate2::FlushDecompress::Finish)
        .map_err(|_| Error::FileCorrupt("zlib decompression failed"))?;
    Ok(zlib.total_out() as usize)
}

fn decompress_bzip2(input: &[u8], out: &mut [u8]) -> Result<usize> {
    let mut decoder = bzip2_rs::DecoderReader::new(input);
    let mut total = 0;
    while total < out.len() {
        match decoder.read(&mut out[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(_) => return Err(Error::FileCorrupt("bzip2 decompression failed")),
        }
    }
    Ok(total)
}

/// PKWARE implode ("explode") for the `FILE_IMPLODE` flag family.
pub fn explode(input: &[u8], out: &mut [u8]) -> Result<usize> {
    let decoded =
        implode::explode(input).map_err(|_| Error::FileCorrupt("pkware explode failed"))?;
    if decoded.len() > out.len() {
        return Err(Error::FileCorrupt("exploded sector larger than expected"));
    }
    out[..decoded.len()].copy_from_slice(&decoded);
    Ok(decoded.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompress_multi_rejects_empty_sector() {
        let mut out = [0u8; 4];
        assert!(decompress_multi(&[], &mut out).is_err());
    }

    #[test]
    fn decompress_multi_reports_unsupported_huffman() {
        let mut out = [0u8; 4];
        let data = [COMPRESSION_HUFFMAN, 1, 2, 3];
        match decompress_multi(&data, &mut out) {
            Err(Error::NotSupported(_)) => {}
            other => panic!("expected NotSupported, got {other:?}"),
        }
    }

    #[test]
    fn decompress_multi_round_trips_zlib() {
        use std::io::Write;
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"hello sector").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut framed = vec![COMPRESSION_ZLIB];
        framed.extend_from_slice(&compressed);

        let mut out = [0u8; 32];
        let n = decompress_multi(&framed, &mut out).unwrap();
        assert_eq!(&out[..n], b"hello sector");
    }
}
