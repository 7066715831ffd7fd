//! Open-target scope (spec §4.2): where in the archive-or-patch-chain a
//! name should resolve to, and which locale copy wins when several are
//! present.

/// Selects which copy of an archive's content an open call should
/// actually return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenScope {
    /// Resolve through the full patch chain: locate the name in the base
    /// archive, then apply every patch archive that overlays it, in order.
    FromMpq,
    /// Stop at the base archive; ignore any attached patch chain even if
    /// one is present.
    BaseFile,
    /// Accept any locale's copy of the entry, neutral-locale preferred.
    AnyLocale,
    /// The name identifies a loose file on disk rather than an MPQ member.
    LocalFile,
}

impl Default for OpenScope {
    fn default() -> Self {
        OpenScope::FromMpq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scope_is_from_mpq() {
        assert_eq!(OpenScope::default(), OpenScope::FromMpq);
    }
}
