//! The link phase: resolving every declared symbol once, up front.
//!
//! A patch declares all host symbols it touches, hands them to a [`LinkerBuilder`] together
//! with its [`ProxyTable`] and enabled [`Features`], and calls [`LinkerBuilder::link`] during
//! its single-threaded initialization. The resulting [`Linker`] is immutable; it can be
//! published process-wide with [`install`] and read from any host thread afterwards.
//!
//! A failed symbol never aborts the link. Core symbols (untagged) turn the report into an
//! error through [`LinkReport::into_result`]; symbols tagged with a feature only disable that
//! feature.
//!
//! # Examples
//!
//! ```rust,no_run
//! use hostlink::{platform, Features, Linker, ProcessModule, ProxyTable, Resolver};
//!
//! let resolver = Resolver::new(ProcessModule::open_self()?);
//! let report = Linker::builder(&resolver)
//!     .proxies(ProxyTable::default())
//!     .features(Features::MULTIPLAYER)
//!     .declare_all(platform::HOST_SYMBOLS)
//!     .link();
//!
//! for failure in report.failures() {
//!     eprintln!("{}: {}", failure.symbol().name(), failure.error());
//! }
//! let linker = hostlink::install(report.into_result()?)?;
//! println!("{} symbols linked", linker.len());
//! # Ok::<(), hostlink::Error>(())
//! ```

use std::{collections::HashMap, sync::OnceLock};

use crate::{
    config::Features,
    proxy::ProxyTable,
    resolver::Resolver,
    symbol::{Address, ForeignFn, HostFn, Symbol},
    Error::{self, AlreadyInstalled, ConventionMismatch, SymbolNotFound},
    Result,
};

static INSTALLED: OnceLock<Linker> = OnceLock::new();

/// One successfully linked symbol
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LinkedSymbol {
    symbol: Symbol,
    original: Address,
    address: Address,
}

/// Collects the inputs of a link.
pub struct LinkerBuilder<'r> {
    resolver: &'r Resolver,
    proxies: ProxyTable,
    features: Features,
    symbols: Vec<Symbol>,
}

impl<'r> LinkerBuilder<'r> {
    /// Replace the proxy table (empty by default)
    #[must_use]
    pub fn proxies(mut self, proxies: ProxyTable) -> Self {
        self.proxies = proxies;
        self
    }

    /// Select the enabled optional features (none by default)
    #[must_use]
    pub fn features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    /// Declare one symbol
    #[must_use]
    pub fn declare(mut self, symbol: &Symbol) -> Self {
        self.symbols.push(*symbol);
        self
    }

    /// Declare several symbols
    #[must_use]
    pub fn declare_all(mut self, symbols: &[Symbol]) -> Self {
        self.symbols.extend_from_slice(symbols);
        self
    }

    /// Resolve and filter every declared symbol whose feature is enabled.
    ///
    /// Symbols tagged with a disabled feature are skipped. A symbol declared twice under the
    /// same name is linked once; declaring it with two different conventions is a failure.
    #[must_use]
    pub fn link(self) -> LinkReport {
        let mut entries: HashMap<&'static str, LinkedSymbol> = HashMap::new();
        let mut failures = Vec::new();
        let mut disabled = Features::empty();
        let mut skipped = 0_usize;

        for symbol in &self.symbols {
            if let Some(feature) = symbol.feature() {
                if !self.features.intersects(feature) {
                    log::trace!("Skipping {symbol}, feature {feature:?} is not enabled");
                    skipped += 1;
                    continue;
                }
            }

            if let Some(linked) = entries.get(symbol.name()) {
                if linked.symbol.convention() != symbol.convention() {
                    failures.push(LinkFailure {
                        symbol: *symbol,
                        error: ConventionMismatch {
                            name: symbol.name().to_string(),
                            declared: linked.symbol.convention(),
                            requested: symbol.convention(),
                        },
                    });
                }
                continue;
            }

            match self.link_symbol(symbol) {
                Ok(linked) => {
                    log::debug!(
                        "Linked {} at {}{}",
                        symbol,
                        linked.address,
                        if linked.address == linked.original { "" } else { " (proxied)" }
                    );
                    entries.insert(symbol.name(), linked);
                }
                Err(error) => {
                    log::debug!("Failed to link {symbol}: {error}");
                    failures.push(LinkFailure {
                        symbol: *symbol,
                        error,
                    });
                }
            }
        }

        for failure in &failures {
            if let Some(feature) = failure.symbol.feature() {
                disabled |= feature & self.features;
            }
        }
        if !disabled.is_empty() {
            log::warn!("Disabling features {disabled:?}, required host symbols are missing");
        }

        let proxied = entries
            .values()
            .filter(|linked| linked.address != linked.original)
            .count();
        log::info!(
            "Linked {} symbols ({} proxied, {} failed, {} skipped)",
            entries.len(),
            proxied,
            failures.len(),
            skipped
        );

        LinkReport {
            linker: Linker {
                entries,
                features: self.features - disabled,
            },
            failures,
            disabled,
        }
    }

    fn link_symbol(&self, symbol: &Symbol) -> Result<LinkedSymbol> {
        let original = self.resolver.resolve(symbol.name())?;

        if let Some(replacement) = self.proxies.get(symbol.name()) {
            if !symbol.convention().is_compatible(replacement.convention()) {
                return Err(ConventionMismatch {
                    name: symbol.name().to_string(),
                    declared: symbol.convention(),
                    requested: replacement.convention(),
                });
            }
        }

        Ok(LinkedSymbol {
            symbol: *symbol,
            original,
            address: self.proxies.filter(symbol.name(), original),
        })
    }
}

/// A symbol that could not be linked
#[derive(Debug)]
pub struct LinkFailure {
    symbol: Symbol,
    error: Error,
}

impl LinkFailure {
    /// The declaration that failed
    #[must_use]
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Why it failed
    #[must_use]
    pub fn error(&self) -> &Error {
        &self.error
    }
}

/// Outcome of [`LinkerBuilder::link`].
#[derive(Debug)]
pub struct LinkReport {
    linker: Linker,
    failures: Vec<LinkFailure>,
    disabled: Features,
}

impl LinkReport {
    /// The linker holding every symbol that did link
    #[must_use]
    pub fn linker(&self) -> &Linker {
        &self.linker
    }

    /// Every symbol that failed, in declaration order
    #[must_use]
    pub fn failures(&self) -> &[LinkFailure] {
        &self.failures
    }

    /// Enabled features that lost at least one of their symbols
    #[must_use]
    pub fn disabled_features(&self) -> Features {
        self.disabled
    }

    /// Returns `true` if every considered symbol linked
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// The linker, unless a core symbol failed.
    ///
    /// # Errors
    /// Returns the error of the first failed symbol that is not tagged with a feature.
    pub fn into_result(self) -> Result<Linker> {
        match self
            .failures
            .into_iter()
            .find(|failure| failure.symbol.feature().is_none())
        {
            Some(failure) => Err(failure.error),
            None => Ok(self.linker),
        }
    }
}

/// The immutable result of a link: symbol name to final address.
#[derive(Debug, Default)]
pub struct Linker {
    entries: HashMap<&'static str, LinkedSymbol>,
    features: Features,
}

impl Linker {
    /// Start a link against `resolver`
    #[must_use]
    pub fn builder(resolver: &Resolver) -> LinkerBuilder<'_> {
        LinkerBuilder {
            resolver,
            proxies: ProxyTable::default(),
            features: Features::empty(),
            symbols: Vec::new(),
        }
    }

    /// The address callers of `name` must use (the replacement if proxied)
    #[must_use]
    pub fn address(&self, name: &str) -> Option<Address> {
        self.entries.get(name).map(|linked| linked.address)
    }

    /// The host's own address of `name`, ignoring proxies
    #[must_use]
    pub fn original(&self, name: &str) -> Option<Address> {
        self.entries.get(name).map(|linked| linked.original)
    }

    /// Returns `true` if `name` was linked to a replacement
    #[must_use]
    pub fn is_proxied(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .is_some_and(|linked| linked.address != linked.original)
    }

    /// Bind the linked address of `symbol` to the function-pointer type `F`.
    ///
    /// # Safety
    /// See [`HostFn::new`]: the host function must have exactly the signature of `F`.
    ///
    /// # Errors
    /// - [`Error::SymbolNotFound`] if `symbol` was not linked
    /// - [`Error::ConventionMismatch`] if `symbol` or `F` disagree with the linked declaration
    pub unsafe fn bind<F: ForeignFn>(&self, symbol: &Symbol) -> Result<HostFn<F>> {
        let Some(linked) = self.entries.get(symbol.name()) else {
            return Err(SymbolNotFound(symbol.name().to_string()));
        };

        if linked.symbol.convention() != symbol.convention() {
            return Err(ConventionMismatch {
                name: symbol.name().to_string(),
                declared: linked.symbol.convention(),
                requested: symbol.convention(),
            });
        }

        HostFn::new(&linked.symbol, linked.address)
    }

    /// Features that are enabled and have all their symbols
    #[must_use]
    pub fn features(&self) -> Features {
        self.features
    }

    /// Number of linked symbols
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing was linked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Publish `linker` for the rest of the process lifetime.
///
/// # Errors
/// Returns [`Error::AlreadyInstalled`] if a linker was installed before.
pub fn install(linker: Linker) -> Result<&'static Linker> {
    INSTALLED.set(linker).map_err(|_| AlreadyInstalled)?;
    log::info!("Installed process-wide linker");
    INSTALLED.get().ok_or(AlreadyInstalled)
}

/// The linker published by [`install`], if any
#[must_use]
pub fn installed() -> Option<&'static Linker> {
    INSTALLED.get()
}
