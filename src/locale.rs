//! Locale resolution (spec §4.2, §5 "Global / shared state").
//!
//! The hash table can carry several entries for one name, one per locale.
//! `LocalePolicy` is the lookup-time choice of which to accept; the
//! process-wide "preferred locale" is a deliberate, documented data race
//! (spec §5: "not synchronized by design — matches the reference tool's
//! own global, last writer wins"), so it lives behind a plain `AtomicU16`
//! rather than a `Mutex`.

use std::sync::atomic::{AtomicU16, Ordering};

/// Locale-neutral entries use this value in the hash table.
pub const LOCALE_NEUTRAL: u16 = 0;

static PREFERRED_LOCALE: AtomicU16 = AtomicU16::new(LOCALE_NEUTRAL);

/// Sets the process-wide preferred locale used by
/// [`LocalePolicy::from_preferred`] lookups. Intentionally racy across
/// threads; callers that need per-archive determinism should use
/// `LocalePolicy::Exact` instead.
pub fn set_preferred_locale(locale: u16) {
    PREFERRED_LOCALE.store(locale, Ordering::Relaxed);
}

pub fn preferred_locale() -> u16 {
    PREFERRED_LOCALE.load(Ordering::Relaxed)
}

/// How a lookup should pick among several locale copies of one name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalePolicy {
    /// Only this exact locale is acceptable.
    Exact(u16),
    /// Prefer the given locale; fall back to the neutral-locale copy.
    PreferredThenNeutral(u16),
    /// Accept the first locale copy found, in table order.
    Any,
}

impl LocalePolicy {
    /// Builds the policy from the current process-wide preferred locale.
    pub fn from_preferred() -> Self {
        LocalePolicy::PreferredThenNeutral(preferred_locale())
    }

    pub fn accepts(self, candidate: u16) -> bool {
        match self {
            LocalePolicy::Exact(locale) => candidate == locale,
            LocalePolicy::PreferredThenNeutral(locale) => {
                candidate == locale || candidate == LOCALE_NEUTRAL
            }
            LocalePolicy::Any => true,
        }
    }

    /// Ranks a candidate so the best locale match sorts first among
    /// several accepted entries for the same name: exact preferred match,
    /// then neutral, then everything else.
    pub fn rank(self, candidate: u16) -> u8 {
        match self {
            LocalePolicy::Exact(locale) if candidate == locale => 0,
            LocalePolicy::PreferredThenNeutral(locale) if candidate == locale => 0,
            LocalePolicy::PreferredThenNeutral(_) if candidate == LOCALE_NEUTRAL => 1,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_policy_accepts_only_its_locale() {
        let policy = LocalePolicy::Exact(0x409);
        assert!(policy.accepts(0x409));
        assert!(!policy.accepts(LOCALE_NEUTRAL));
    }

    #[test]
    fn preferred_then_neutral_accepts_both() {
        let policy = LocalePolicy::PreferredThenNeutral(0x409);
        assert!(policy.accepts(0x409));
        assert!(policy.accepts(LOCALE_NEUTRAL));
        assert!(!policy.accepts(0x407));
    }

    #[test]
    fn preferred_then_neutral_ranks_exact_match_first() {
        let policy = LocalePolicy::PreferredThenNeutral(0x409);
        assert!(policy.rank(0x409) < policy.rank(LOCALE_NEUTRAL));
    }

    #[test]
    fn any_policy_accepts_everything() {
        assert!(LocalePolicy::Any.accepts(0x407));
    }

    #[test]
    fn preferred_locale_round_trips() {
        set_preferred_locale(0x409);
        assert_eq!(preferred_locale(), 0x409);
        set_preferred_locale(LOCALE_NEUTRAL);
        assert_eq!(preferred_locale(), LOCALE_NEUTRAL);
    }
}
