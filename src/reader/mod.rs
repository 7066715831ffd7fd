//! C7/C8/C9 — the three read strategies a `FileHandle` dispatches to
//! depending on its entry's flags (spec §4.4): sector-framed (the common
//! case), single-unit whole-file, and patch-chain overlay.

pub mod patch;
pub mod sector;
pub mod unit;
