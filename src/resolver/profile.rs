use std::collections::HashMap;

use crate::image::Signature;

/// Where an unexported symbol lives inside one specific build of the host binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymbolLocation {
    /// Offset relative to the module base (RVA on PE, link-time address on ELF).
    Offset(u64),
    /// Unique byte signature within the executable sections, plus a displacement from the
    /// first matched byte to the symbol itself.
    Signature {
        /// The pattern to scan for
        pattern: Signature,
        /// Displacement from the match to the symbol
        adjust: i64,
    },
}

/// Per-build table of known symbol locations.
///
/// Profiles are tied to one exact host build. Offsets from a different build point into
/// unrelated code, so a profile that records a fingerprint is only used for an image with the
/// same fingerprint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildProfile {
    version: String,
    fingerprint: Option<String>,
    locations: HashMap<String, SymbolLocation>,
}

impl BuildProfile {
    /// Create an empty profile for the given host version string
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        BuildProfile {
            version: version.into(),
            fingerprint: None,
            locations: HashMap::new(),
        }
    }

    /// Bind the profile to the SHA-1 fingerprint of one host binary
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into().to_ascii_lowercase());
        self
    }

    /// Record a module-relative offset for `name`
    #[must_use]
    pub fn with_offset(mut self, name: impl Into<String>, offset: u64) -> Self {
        self.insert(name, SymbolLocation::Offset(offset));
        self
    }

    /// Record a byte signature for `name`
    #[must_use]
    pub fn with_signature(mut self, name: impl Into<String>, pattern: Signature, adjust: i64) -> Self {
        self.insert(name, SymbolLocation::Signature { pattern, adjust });
        self
    }

    /// Record a location, returning the one it replaced
    pub fn insert(&mut self, name: impl Into<String>, location: SymbolLocation) -> Option<SymbolLocation> {
        self.locations.insert(name.into(), location)
    }

    /// The host version this profile describes
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The fingerprint this profile is bound to, if any
    #[must_use]
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Returns `true` if the profile may be used for an image with `fingerprint`.
    ///
    /// Unbound profiles apply to every image.
    #[must_use]
    pub fn applies_to(&self, fingerprint: &str) -> bool {
        self.fingerprint
            .as_deref()
            .map_or(true, |own| own.eq_ignore_ascii_case(fingerprint))
    }

    /// The recorded location of `name`
    #[must_use]
    pub fn location(&self, name: &str) -> Option<&SymbolLocation> {
        self.locations.get(name)
    }

    /// Number of recorded locations
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// Returns `true` if no location is recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}
