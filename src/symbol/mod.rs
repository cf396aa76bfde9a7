//! Symbol declarations and addresses.
//!
//! A [`Symbol`] is the lookup key for one function or data object inside the host binary.
//! It is declared once, as a constant, together with the calling convention the host's
//! compiler used for it. The convention is not optional: every symbol that is ever called
//! across the ABI boundary must carry it, because a mismatch corrupts the caller's stack
//! silently and only shows up as an unrelated crash much later.
//!
//! # Examples
//!
//! ```rust
//! use hostlink::{CallingConvention, Features, Symbol};
//!
//! const SET_ACTIVE: Symbol =
//!     Symbol::new("SetActiveDLCAndMods", CallingConvention::Thiscall)
//!         .with_feature(Features::MULTIPLAYER);
//!
//! assert_eq!(SET_ACTIVE.name(), "SetActiveDLCAndMods");
//! assert_eq!(SET_ACTIVE.convention(), CallingConvention::Thiscall);
//! ```

mod convention;

pub use convention::{CallingConvention, ForeignFn, HostFn};
pub(crate) use convention::ensure_compatible;

use std::fmt;

use crate::config::Features;

/// An absolute address in the current process (or in a fixture's address space).
///
/// Addresses produced by the resolver are only valid for the lifetime of the loaded host
/// module. They are never dereferenced by the resolution pipeline itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(usize);

impl Address {
    /// The null address
    pub const NULL: Address = Address(0);

    /// Wrap a raw address value
    #[must_use]
    pub const fn new(value: usize) -> Self {
        Address(value)
    }

    /// Address of a pointer
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Address(ptr as usize)
    }

    /// The raw address value
    #[must_use]
    pub const fn value(self) -> usize {
        self.0
    }

    /// Returns `true` if this is the null address
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Adds `offset` bytes, returning `None` on overflow
    #[must_use]
    pub fn checked_add(self, offset: usize) -> Option<Address> {
        self.0.checked_add(offset).map(Address)
    }

    /// Adds a signed displacement, returning `None` on overflow or underflow
    #[must_use]
    pub fn checked_offset(self, delta: i64) -> Option<Address> {
        let delta = isize::try_from(delta).ok()?;
        self.0.checked_add_signed(delta).map(Address)
    }

    /// Rebases a module-relative offset onto the module's load address.
    ///
    /// Offsets stored in build profiles are relative to the module base, which moves between
    /// process runs due to relocation. They must always go through this function and are
    /// never used as absolute addresses.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the offset does not fit the address space.
    pub fn rebase(base: Address, offset: u64) -> crate::Result<Address> {
        usize::try_from(offset)
            .ok()
            .and_then(|offset| base.checked_add(offset))
            .ok_or_else(|| malformed_error!("Offset 0x{:x} overflows base {}", offset, base))
    }

    /// The address as a raw pointer
    #[must_use]
    pub fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// The address as a mutable raw pointer
    #[must_use]
    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<usize> for Address {
    fn from(value: usize) -> Self {
        Address(value)
    }
}

/// Declaration of one function or data object inside the host binary.
///
/// Declarations are `const`-constructible so that a patch lists every symbol it touches in
/// one place. The resolved address is not part of the declaration; it is computed during
/// linking and stored in the [`crate::Linker`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Symbol {
    name: &'static str,
    convention: CallingConvention,
    feature: Option<Features>,
}

impl Symbol {
    /// Declare a symbol and the calling convention the host binary uses for it
    #[must_use]
    pub const fn new(name: &'static str, convention: CallingConvention) -> Self {
        Symbol {
            name,
            convention,
            feature: None,
        }
    }

    /// Tag the symbol with the optional feature that depends on it.
    ///
    /// A tagged symbol is only resolved when the feature is enabled, and a failure to resolve
    /// it disables that feature instead of aborting the whole link.
    #[must_use]
    pub const fn with_feature(mut self, feature: Features) -> Self {
        self.feature = Some(feature);
        self
    }

    /// The logical symbol name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The convention the host binary expects at every call site
    #[must_use]
    pub const fn convention(&self) -> CallingConvention {
        self.convention
    }

    /// The feature depending on this symbol, `None` for core symbols
    #[must_use]
    pub const fn feature(&self) -> Option<Features> {
        self.feature
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.convention)
    }
}
