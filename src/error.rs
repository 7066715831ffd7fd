//! Error taxonomy for the read path.
//!
//! Every fallible operation returns a `Result<T>` instead of publishing to a
//! thread-local "last error" slot. See spec §7 / §9 for the rationale: the
//! thread-local surface is a legacy C-ABI concern this crate doesn't carry.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid handle")]
    InvalidHandle,

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("not enough memory")]
    NotEnoughMemory,

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("not supported: {0}")]
    NotSupported(&'static str),

    #[error("handle reached end of file after {bytes_read} bytes")]
    HandleEof { bytes_read: usize },

    #[error("insufficient buffer, need room for {needed} entries")]
    InsufficientBuffer { needed: usize },

    #[error("checksum mismatch in sector {sector}")]
    ChecksumError { sector: u32 },

    #[error("file corrupt: {0}")]
    FileCorrupt(&'static str),

    #[error("unknown file key")]
    UnknownFileKey,

    #[error("can not complete: {0}")]
    CanNotComplete(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
