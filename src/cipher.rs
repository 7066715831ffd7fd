//! C3 (cipher half) — the block-cipher collaborator named in spec §6
//! (`decrypt_primary`, `decrypt_secondary`, `decrypt_mpk_table`).
//!
//! Spec §2 marks this component "external": the read path is written
//! against the `Cipher` trait so an embedder could swap in a hardware- or
//! vendor-supplied implementation. `StormCipher` is the crate's own
//! default — the classic MPQ block cipher is public knowledge (the same
//! crypt table HashFn already builds), so shipping a real implementation
//! here is no different from shipping `FileStream` as the default `Stream`.

use crate::error::{Error, Result};
use crate::hash::decrypt_block;

pub trait Cipher {
    /// Decrypts a 4-byte-word-aligned buffer in place with the primary
    /// (classic) MPQ block cipher.
    fn decrypt_primary(&self, buf: &mut [u8], key: u32);

    /// Decrypts with the secondary (Anubis) cipher. Out of scope per spec
    /// §1 ("cipher primitives... Anubis, Serpent"); no archive in the
    /// valid-flags mask can request it, so this only exists to satisfy the
    /// interface shape of §6.
    fn decrypt_secondary(&self, _buf: &mut [u8]) -> Result<()> {
        Err(Error::NotSupported("secondary (Anubis) cipher not implemented"))
    }

    /// Decrypts an MPK archive's internal table blob.
    fn decrypt_mpk_table(&self, _buf: &mut [u8]) -> Result<()> {
        Err(Error::NotSupported("MPK table cipher not implemented"))
    }
}

#[derive(Default)]
pub struct StormCipher;

impl Cipher for StormCipher {
    fn decrypt_primary(&self, buf: &mut [u8], key: u32) {
        decrypt_block(buf, key);
    }
}

/// Well-known literal keys for the two classic index tables (spec §4.3).
pub const HASH_TABLE_KEY_NAME: &str = "(hash table)";
pub const BLOCK_TABLE_KEY_NAME: &str = "(block table)";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{hash_string, HASH_FILE_KEY};

    #[test]
    fn storm_cipher_round_trips_with_itself() {
        // Applying the byte-swap-free classic cipher with the stream's own
        // stepping twice does not generally return the original bytes
        // (it isn't an involution); this just exercises the trait call.
        let cipher = StormCipher;
        let key = hash_string("test", HASH_FILE_KEY);
        let mut data = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        cipher.decrypt_primary(&mut data, key);
        assert_ne!(data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
