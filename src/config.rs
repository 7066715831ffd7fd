//! Ambient configuration surface (SPEC_FULL §10): per-open options that
//! tune the otherwise-fixed reading algorithm, builder-style the way the
//! teacher's `Archive::open` grew optional behavior.

use crate::locale::LocalePolicy;

/// Options controlling how [`crate::archive::Archive::open`] behaves.
#[derive(Debug, Clone)]
pub struct ArchiveOpenOptions {
    /// Verify each sector's Adler-32 checksum against the sector-CRC table
    /// when the entry carries `FILE_SECTOR_CRC`, rather than trusting the
    /// compressed bytes as given.
    pub check_sector_crcs: bool,
    /// Locale to prefer when a name has more than one locale copy. `None`
    /// defers to the process-wide preferred locale (spec §5).
    pub preferred_locale: Option<u16>,
    /// Load an attached patch chain and resolve opens through it, rather
    /// than exposing only the base archive's contents.
    pub load_patch_chain: bool,
}

impl Default for ArchiveOpenOptions {
    fn default() -> Self {
        ArchiveOpenOptions {
            check_sector_crcs: false,
            preferred_locale: None,
            load_patch_chain: true,
        }
    }
}

impl ArchiveOpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_sector_crcs(mut self, enabled: bool) -> Self {
        self.check_sector_crcs = enabled;
        self
    }

    pub fn preferred_locale(mut self, locale: u16) -> Self {
        self.preferred_locale = Some(locale);
        self
    }

    pub fn load_patch_chain(mut self, enabled: bool) -> Self {
        self.load_patch_chain = enabled;
        self
    }

    pub(crate) fn locale_policy(&self) -> LocalePolicy {
        match self.preferred_locale {
            Some(locale) => LocalePolicy::PreferredThenNeutral(locale),
            None => LocalePolicy::from_preferred(),
        }
    }
}
