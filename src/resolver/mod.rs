//! Layered symbol resolution inside the host module.
//!
//! The host binary exports only a small fraction of the functions a patch needs. Everything
//! else has to be located by knowledge about the exact build: a known offset from the module
//! base, a byte signature of the function's prologue, or a symbol table the file happens to
//! still carry. [`Resolver`] tries these sources in a fixed order (see [`Strategy`]) and
//! reports the first hit.
//!
//! # Key Components
//!
//! - [`HostModule`] - the loaded host module as seen through the OS loader
//! - [`BuildProfile`] - known offsets and signatures of one host build
//! - [`Resolver`] - runs the strategies in order
//!
//! # Examples
//!
//! ```rust,no_run
//! use hostlink::{BuildProfile, HostImage, ProcessModule, Resolver};
//!
//! let module = ProcessModule::open_self()?;
//! let image = HostImage::from_module(&module)?;
//! let profile = BuildProfile::new("1.0.3.279").with_offset("lGetMemoryUsage", 0x2f1a0);
//!
//! let resolver = Resolver::new(module).with_image(image).with_profile(profile);
//! let (address, strategy) = resolver.resolve_with_strategy("lGetMemoryUsage")?;
//! println!("lGetMemoryUsage at {address} ({strategy})");
//! # Ok::<(), hostlink::Error>(())
//! ```

mod profile;

pub use profile::{BuildProfile, SymbolLocation};

use std::path::PathBuf;

use strum::{Display, EnumIter, IntoEnumIterator};

use crate::{
    image::HostImage,
    symbol::Address,
    Error::{AmbiguousSignature, SymbolNotFound},
    Result,
};

/// A module loaded into the current process.
///
/// Implemented by [`crate::ProcessModule`] for the real host and by test fixtures.
pub trait HostModule {
    /// Display name of the module
    fn name(&self) -> &str;

    /// Load address of the module in this process run
    fn base(&self) -> Address;

    /// Address of an exported symbol, as reported by the OS loader
    fn export(&self, name: &str) -> Option<Address>;

    /// The file the module was loaded from
    fn path(&self) -> Option<PathBuf>;
}

impl<T: HostModule + ?Sized> HostModule for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn base(&self) -> Address {
        (**self).base()
    }

    fn export(&self, name: &str) -> Option<Address> {
        (**self).export(name)
    }

    fn path(&self) -> Option<PathBuf> {
        (**self).path()
    }
}

/// A source of symbol addresses, in the order the resolver consults them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Strategy {
    /// The OS loader's export lookup
    Export,
    /// A module-relative offset from the build profile
    Offset,
    /// A unique byte signature from the build profile
    Signature,
    /// A symbol table still present in the host image file
    SymbolTable,
}

/// Locates symbols inside one loaded host module.
///
/// Without a [`BuildProfile`] or [`HostImage`] only exported symbols can be found; each
/// adds the strategies that depend on it.
pub struct Resolver {
    module: Box<dyn HostModule>,
    profile: Option<BuildProfile>,
    image: Option<HostImage>,
    fingerprint: Option<String>,
}

impl Resolver {
    /// Create a resolver for `module`
    pub fn new(module: impl HostModule + 'static) -> Self {
        Resolver {
            module: Box::new(module),
            profile: None,
            image: None,
            fingerprint: None,
        }
    }

    /// Add a build profile, enabling the offset and signature strategies
    #[must_use]
    pub fn with_profile(mut self, profile: BuildProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Add the module's on-disk image, enabling the signature and symbol table strategies.
    ///
    /// The image's fingerprint is computed once here and checked against the profile.
    #[must_use]
    pub fn with_image(mut self, image: HostImage) -> Self {
        self.fingerprint = Some(image.fingerprint());
        self.image = Some(image);
        self
    }

    /// The host module
    #[must_use]
    pub fn module(&self) -> &dyn HostModule {
        self.module.as_ref()
    }

    /// The build profile, if one was provided
    #[must_use]
    pub fn profile(&self) -> Option<&BuildProfile> {
        self.profile.as_ref()
    }

    /// The host image, if one was provided
    #[must_use]
    pub fn image(&self) -> Option<&HostImage> {
        self.image.as_ref()
    }

    /// Resolve `name` to an absolute address.
    ///
    /// # Errors
    /// - [`crate::Error::SymbolNotFound`] if no strategy locates the symbol
    /// - [`crate::Error::AmbiguousSignature`] if the profile's signature is not unique
    /// - [`crate::Error::Malformed`] if a recorded location does not fit the address space
    pub fn resolve(&self, name: &str) -> Result<Address> {
        self.resolve_with_strategy(name).map(|(address, _)| address)
    }

    /// Resolve `name` and report which strategy located it.
    ///
    /// # Errors
    /// See [`Resolver::resolve`].
    pub fn resolve_with_strategy(&self, name: &str) -> Result<(Address, Strategy)> {
        for strategy in Strategy::iter() {
            log::trace!("Resolving '{}' via {}", name, strategy);

            let Some(address) = self.try_strategy(strategy, name)? else {
                continue;
            };

            if address.is_null() {
                log::trace!("Strategy {} produced a null address for '{}'", strategy, name);
                continue;
            }

            log::debug!("Resolved '{}' to {} via {}", name, address, strategy);
            return Ok((address, strategy));
        }

        log::debug!("'{}' not found in {}", name, self.module.name());
        Err(SymbolNotFound(name.to_string()))
    }

    fn try_strategy(&self, strategy: Strategy, name: &str) -> Result<Option<Address>> {
        match strategy {
            Strategy::Export => Ok(self.module.export(name)),
            Strategy::Offset => match self.applicable_profile().and_then(|p| p.location(name)) {
                Some(SymbolLocation::Offset(offset)) => {
                    Address::rebase(self.module.base(), *offset).map(Some)
                }
                _ => Ok(None),
            },
            Strategy::Signature => {
                let Some(SymbolLocation::Signature { pattern, adjust }) =
                    self.applicable_profile().and_then(|p| p.location(name))
                else {
                    return Ok(None);
                };
                let Some(image) = &self.image else {
                    log::trace!("No host image to scan for '{}'", name);
                    return Ok(None);
                };

                let matches = image.find_signature(pattern);
                match matches.as_slice() {
                    [] => Ok(None),
                    [offset] => {
                        let rva = image.offset_to_rva(*offset)?;
                        let address = Address::rebase(self.module.base(), rva)?;
                        address.checked_offset(*adjust).map(Some).ok_or_else(|| {
                            malformed_error!("Adjust {} moves '{}' out of the address space", adjust, name)
                        })
                    }
                    _ => Err(AmbiguousSignature {
                        name: name.to_string(),
                        matches: matches.len(),
                    }),
                }
            }
            Strategy::SymbolTable => match self.image.as_ref().and_then(|i| i.symbol_rva(name)) {
                Some(rva) => Address::rebase(self.module.base(), rva).map(Some),
                None => Ok(None),
            },
        }
    }

    fn applicable_profile(&self) -> Option<&BuildProfile> {
        let profile = self.profile.as_ref()?;
        match &self.fingerprint {
            Some(fingerprint) if !profile.applies_to(fingerprint) => {
                log::warn!(
                    "Build profile {} does not match host fingerprint {}, ignoring it",
                    profile.version(),
                    fingerprint
                );
                None
            }
            _ => Some(profile),
        }
    }
}

/// Resolve `name` through `resolver`.
///
/// # Errors
/// See [`Resolver::resolve`].
pub fn resolve_symbol(resolver: &Resolver, name: &str) -> Result<Address> {
    resolver.resolve(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        image::Signature,
        test::{elf_fixture, FixtureModule, ELF_CODE_OFFSET, ELF_CODE_VADDR},
        Error,
    };

    const BASE: usize = 0x5555_0000;

    const CODE: [u8; 12] = [
        0x55, 0x8B, 0xEC, 0x90, 0xC3, 0x55, 0x8B, 0xEC, 0x6A, 0xFF, 0x5D, 0xC3,
    ];

    #[test]
    fn export_first() {
        let module = FixtureModule::new("host", BASE).with_export("lua_pushnil", BASE + 0x100);
        let profile = BuildProfile::new("1").with_offset("lua_pushnil", 0x999);
        let resolver = Resolver::new(module).with_profile(profile);

        let (address, strategy) = resolver.resolve_with_strategy("lua_pushnil").unwrap();
        assert_eq!(address, Address::new(BASE + 0x100));
        assert_eq!(strategy, Strategy::Export);
    }

    #[test]
    fn offset_is_rebased() {
        let module = FixtureModule::new("host", BASE);
        let profile = BuildProfile::new("1").with_offset("lGetMemoryUsage", 0x2f1a0);
        let resolver = Resolver::new(module).with_profile(profile);

        let (address, strategy) = resolver.resolve_with_strategy("lGetMemoryUsage").unwrap();
        assert_eq!(address, Address::new(BASE + 0x2f1a0));
        assert_eq!(strategy, Strategy::Offset);
    }

    #[test]
    fn null_export_falls_through() {
        let module = FixtureModule::new("host", BASE).with_export("weak", 0);
        let resolver = Resolver::new(module);

        assert!(matches!(resolver.resolve("weak"), Err(SymbolNotFound(name)) if name == "weak"));
    }

    #[test]
    fn not_found() {
        let resolver = Resolver::new(FixtureModule::new("host", BASE));
        match resolve_symbol(&resolver, "missing") {
            Err(Error::SymbolNotFound(name)) => assert_eq!(name, "missing"),
            other => panic!("Expected SymbolNotFound, got {other:?}"),
        }
    }

    #[test]
    fn signature_unique() {
        let image = HostImage::from_mem(elf_fixture(&CODE)).unwrap();
        let profile = BuildProfile::new("1").with_signature(
            "SetActiveDLCAndMods",
            Signature::parse("55 8B EC 6A ??").unwrap(),
            0,
        );
        let resolver = Resolver::new(FixtureModule::new("host", BASE))
            .with_image(image)
            .with_profile(profile);

        let (address, strategy) = resolver
            .resolve_with_strategy("SetActiveDLCAndMods")
            .unwrap();
        assert_eq!(strategy, Strategy::Signature);
        assert_eq!(address, Address::new(BASE + ELF_CODE_VADDR as usize + 5));
    }

    #[test]
    fn signature_adjust() {
        let image = HostImage::from_mem(elf_fixture(&CODE)).unwrap();
        let profile = BuildProfile::new("1").with_signature(
            "inner",
            Signature::parse("6A FF 5D").unwrap(),
            -3,
        );
        let resolver = Resolver::new(FixtureModule::new("host", BASE))
            .with_image(image)
            .with_profile(profile);

        assert_eq!(
            resolver.resolve("inner").unwrap(),
            Address::new(BASE + ELF_CODE_VADDR as usize + 5)
        );
    }

    #[test]
    fn signature_ambiguous() {
        let image = HostImage::from_mem(elf_fixture(&CODE)).unwrap();
        let profile = BuildProfile::new("1").with_signature(
            "prologue",
            Signature::parse("55 8B EC").unwrap(),
            0,
        );
        let resolver = Resolver::new(FixtureModule::new("host", BASE))
            .with_image(image)
            .with_profile(profile);

        match resolver.resolve("prologue") {
            Err(AmbiguousSignature { name, matches }) => {
                assert_eq!(name, "prologue");
                assert_eq!(matches, 2);
            }
            other => panic!("Expected AmbiguousSignature, got {other:?}"),
        }
    }

    #[test]
    fn signature_without_image() {
        let profile = BuildProfile::new("1").with_signature(
            "prologue",
            Signature::parse("55 8B EC").unwrap(),
            0,
        );
        let resolver = Resolver::new(FixtureModule::new("host", BASE)).with_profile(profile);

        assert!(matches!(resolver.resolve("prologue"), Err(SymbolNotFound(_))));
    }

    #[test]
    fn foreign_profile_is_ignored() {
        let image = HostImage::from_mem(elf_fixture(&CODE)).unwrap();
        let profile = BuildProfile::new("other build")
            .with_fingerprint("0000000000000000000000000000000000000000")
            .with_offset("lGetMemoryUsage", 0x2f1a0);
        let resolver = Resolver::new(FixtureModule::new("host", BASE))
            .with_image(image)
            .with_profile(profile);

        assert!(matches!(
            resolver.resolve("lGetMemoryUsage"),
            Err(SymbolNotFound(_))
        ));
    }

    #[test]
    fn matching_profile_is_used() {
        let image = HostImage::from_mem(elf_fixture(&CODE)).unwrap();
        let profile = BuildProfile::new("this build")
            .with_fingerprint(image.fingerprint())
            .with_offset("lGetMemoryUsage", ELF_CODE_OFFSET as u64);
        let resolver = Resolver::new(FixtureModule::new("host", BASE))
            .with_image(image)
            .with_profile(profile);

        assert_eq!(
            resolver.resolve("lGetMemoryUsage").unwrap(),
            Address::new(BASE + ELF_CODE_OFFSET)
        );
    }

    #[test]
    fn offset_overflow() {
        let module = FixtureModule::new("host", usize::MAX - 0x10);
        let profile = BuildProfile::new("1").with_offset("far", 0x100);
        let resolver = Resolver::new(module).with_profile(profile);

        assert!(matches!(resolver.resolve("far"), Err(Error::Malformed { .. })));
    }

    #[test]
    fn resolution_is_idempotent() {
        let module = FixtureModule::new("host", BASE).with_export("a", BASE + 0x40);
        let profile = BuildProfile::new("1").with_offset("b", 0x80);
        let resolver = Resolver::new(module).with_profile(profile);

        for name in ["a", "b"] {
            assert_eq!(resolver.resolve(name).unwrap(), resolver.resolve(name).unwrap());
        }
    }

    #[test]
    fn strategy_names() {
        let names: Vec<String> = Strategy::iter().map(|s| s.to_string()).collect();
        assert_eq!(names, ["export", "offset", "signature", "symbol-table"]);
    }
}
