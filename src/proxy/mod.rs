//! Replacement of host symbols by patch implementations.
//!
//! A patch that wants to replace a host function registers the replacement under the
//! symbol's name. Every address the linker hands out then goes through
//! [`ProxyTable::filter`], which substitutes the replacement for mapped names and passes all
//! other addresses through unchanged.
//!
//! The mapping is populated once through [`ProxyTableBuilder`] and then frozen: a
//! [`ProxyTable`] has no mutating methods and is `Send + Sync`, so host threads can filter
//! concurrently without locking. Each replacement is checked against the symbol's declared
//! calling convention when it is inserted, because the host will call the replacement with
//! the convention it expects for the original.
//!
//! # Examples
//!
//! ```rust
//! use hostlink::{Address, CallingConvention, ProxyTableBuilder, Symbol};
//!
//! const GET_MEMORY_USAGE: Symbol = Symbol::new("lGetMemoryUsage", CallingConvention::Cdecl);
//!
//! extern "C" fn get_memory_usage(_state: *mut std::ffi::c_void) -> i32 {
//!     0
//! }
//!
//! let mut builder = ProxyTableBuilder::new();
//! builder.insert(&GET_MEMORY_USAGE, get_memory_usage as extern "C" fn(_) -> _)?;
//! let proxies = builder.build_unchecked();
//!
//! let original = Address::new(0x1000);
//! assert_ne!(proxies.filter("lGetMemoryUsage", original), original);
//! assert_eq!(proxies.filter("lua_pushnil", original), original);
//! # Ok::<(), hostlink::Error>(())
//! ```

use std::collections::{hash_map::Entry, HashMap};

use crate::{
    resolver::Resolver,
    symbol::{ensure_compatible, Address, CallingConvention, ForeignFn, Symbol},
    Error::{ConventionUnsupported, DuplicateProxy, InvalidAddress, SymbolNotFound, UnknownProxyTarget},
    Result,
};

/// A patch implementation standing in for a host symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Replacement {
    address: Address,
    convention: CallingConvention,
}

impl Replacement {
    /// Address of the replacement function
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// The convention the replacement was checked against
    #[must_use]
    pub fn convention(&self) -> CallingConvention {
        self.convention
    }
}

/// Collects replacements before the table is frozen.
#[derive(Debug, Default)]
pub struct ProxyTableBuilder {
    entries: HashMap<&'static str, Replacement>,
}

impl ProxyTableBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `replacement` for `symbol`.
    ///
    /// # Errors
    /// - [`crate::Error::ConventionMismatch`] / [`crate::Error::ConventionUnsupported`] if the
    ///   function type does not honor the symbol's declared convention
    /// - [`crate::Error::DuplicateProxy`] if a replacement for the name already exists
    pub fn insert<F: ForeignFn>(&mut self, symbol: &Symbol, replacement: F) -> Result<&mut Self> {
        ensure_compatible::<F>(symbol)?;
        self.insert_checked(symbol, replacement.address())
    }

    /// Register a replacement address produced elsewhere.
    ///
    /// # Safety
    /// `address` must point to a function with the signature and the calling convention
    /// declared for `symbol`. Only the convention's availability on this target is checked.
    ///
    /// # Errors
    /// - [`crate::Error::ConventionUnsupported`] if the declared convention does not exist here
    /// - [`crate::Error::InvalidAddress`] if `address` is null
    /// - [`crate::Error::DuplicateProxy`] if a replacement for the name already exists
    pub unsafe fn insert_raw(&mut self, symbol: &Symbol, address: Address) -> Result<&mut Self> {
        if symbol.convention().lowered().is_none() {
            return Err(ConventionUnsupported {
                name: symbol.name().to_string(),
                convention: symbol.convention(),
            });
        }

        self.insert_checked(symbol, address)
    }

    fn insert_checked(&mut self, symbol: &Symbol, address: Address) -> Result<&mut Self> {
        if address.is_null() {
            return Err(InvalidAddress {
                address,
                reason: "a proxy cannot point to null",
            });
        }

        match self.entries.entry(symbol.name()) {
            Entry::Occupied(_) => Err(DuplicateProxy(symbol.name().to_string())),
            Entry::Vacant(slot) => {
                log::debug!("Registered proxy for {} at {}", symbol, address);
                slot.insert(Replacement {
                    address,
                    convention: symbol.convention(),
                });
                Ok(self)
            }
        }
    }

    /// Number of registered replacements
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze the table after checking that the host defines every replaced symbol.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownProxyTarget`] for the first (by name) replaced symbol the
    /// resolver cannot find, or any other resolution error.
    pub fn build(self, resolver: &Resolver) -> Result<ProxyTable> {
        let mut names: Vec<&'static str> = self.entries.keys().copied().collect();
        names.sort_unstable();

        for name in names {
            match resolver.resolve(name) {
                Ok(_) => {}
                Err(SymbolNotFound(_)) => return Err(UnknownProxyTarget(name.to_string())),
                Err(error) => return Err(error),
            }
        }

        Ok(self.build_unchecked())
    }

    /// Freeze the table without consulting the host.
    #[must_use]
    pub fn build_unchecked(self) -> ProxyTable {
        ProxyTable {
            entries: self.entries,
        }
    }
}

/// The frozen replacement mapping.
#[derive(Clone, Debug, Default)]
pub struct ProxyTable {
    entries: HashMap<&'static str, Replacement>,
}

impl ProxyTable {
    /// The address callers of `name` should use.
    ///
    /// Returns the replacement for mapped names regardless of `target`, and `target`
    /// unchanged for every other name. Neither address is dereferenced.
    #[must_use]
    pub fn filter(&self, name: &str, target: Address) -> Address {
        match self.entries.get(name) {
            Some(replacement) => {
                log::trace!("Proxying {} from {} to {}", name, target, replacement.address);
                replacement.address
            }
            None => target,
        }
    }

    /// Returns `true` if `name` is replaced
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// The replacement registered for `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Replacement> {
        self.entries.get(name)
    }

    /// Number of replacements
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is replaced
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All replacements in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Replacement)> {
        self.entries.iter().map(|(name, replacement)| (*name, replacement))
    }
}

/// Apply `table` to the lookup of `name`, which the host resolved to `target`.
#[must_use]
pub fn filter_proxy_symbol(table: &ProxyTable, name: &str, target: Address) -> Address {
    table.filter(name, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test::FixtureModule, Error};

    const GET_MEMORY_USAGE: Symbol = Symbol::new("lGetMemoryUsage", CallingConvention::Cdecl);
    const PUSH_NIL: Symbol = Symbol::new("lua_pushnil", CallingConvention::Cdecl);

    extern "C" fn fake_memory_usage(_state: *mut u8) -> i32 {
        42
    }

    fn replacement() -> extern "C" fn(*mut u8) -> i32 {
        fake_memory_usage
    }

    #[test]
    fn filter_mapped_and_identity() {
        let mut builder = ProxyTableBuilder::new();
        builder.insert(&GET_MEMORY_USAGE, replacement()).unwrap();
        let table = builder.build_unchecked();

        let proxy = replacement().address();
        for target in [Address::NULL, Address::new(0x1000), Address::new(usize::MAX)] {
            assert_eq!(table.filter("lGetMemoryUsage", target), proxy);
            assert_eq!(table.filter("lua_pushnil", target), target);
            assert_eq!(filter_proxy_symbol(&table, "lua_pushnil", target), target);
        }

        assert!(table.contains("lGetMemoryUsage"));
        assert!(!table.contains("lua_pushnil"));
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get("lGetMemoryUsage").map(Replacement::convention),
            Some(CallingConvention::Cdecl)
        );
        assert_eq!(table.iter().count(), 1);
    }

    #[test]
    fn empty_table_is_identity() {
        let table = ProxyTable::default();
        assert!(table.is_empty());
        assert_eq!(table.filter("anything", Address::new(0x40)), Address::new(0x40));
    }

    #[test]
    fn duplicate_is_rejected() {
        let mut builder = ProxyTableBuilder::new();
        builder.insert(&GET_MEMORY_USAGE, replacement()).unwrap();

        let result = builder.insert(&GET_MEMORY_USAGE, replacement());
        assert!(matches!(result, Err(DuplicateProxy(name)) if name == "lGetMemoryUsage"));
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn insert_raw_rejects_null() {
        let mut builder = ProxyTableBuilder::new();
        let result = unsafe { builder.insert_raw(&PUSH_NIL, Address::NULL) };
        assert!(matches!(result, Err(InvalidAddress { .. })));
        assert!(builder.is_empty());
    }

    #[cfg(all(target_arch = "x86_64", not(windows)))]
    #[test]
    fn convention_mismatch_is_rejected() {
        const WIN: Symbol = Symbol::new("win_only", CallingConvention::Win64);

        let mut builder = ProxyTableBuilder::new();
        let result = builder.insert(&WIN, replacement());
        assert!(matches!(result, Err(Error::ConventionMismatch { .. })));
        assert!(builder.is_empty());
    }

    #[test]
    fn build_checks_targets() {
        let module = FixtureModule::new("host", 0x40_0000).with_export("lGetMemoryUsage", 0x40_1000);
        let resolver = Resolver::new(module);

        let mut builder = ProxyTableBuilder::new();
        builder.insert(&GET_MEMORY_USAGE, replacement()).unwrap();
        let table = builder.build(&resolver).unwrap();
        assert_eq!(table.len(), 1);

        let mut builder = ProxyTableBuilder::new();
        builder
            .insert(&GET_MEMORY_USAGE, replacement())
            .unwrap()
            .insert(&PUSH_NIL, replacement())
            .unwrap();
        match builder.build(&resolver) {
            Err(Error::UnknownProxyTarget(name)) => assert_eq!(name, "lua_pushnil"),
            other => panic!("Expected UnknownProxyTarget, got {other:?}"),
        }
    }
}
