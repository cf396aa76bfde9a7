use thiserror::Error;

use crate::{symbol::Address, symbol::CallingConvention};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

macro_rules! inconsistent_error {
    ($expected:expr, $observed:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        crate::Error::LayoutInconsistency {
            expected: $expected,
            observed: $observed,
            reason: format!($fmt $(, $arg)*),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into four groups:
///
/// ## Resolution Errors
/// - [`Error::SymbolNotFound`] - No resolution strategy located the symbol
/// - [`Error::AmbiguousSignature`] - A byte signature matched more than one location
///
/// ## ABI Errors
/// - [`Error::ConventionMismatch`] - Call site and declaration disagree on the calling convention
/// - [`Error::ConventionUnsupported`] - The declared convention does not exist on this target
/// - [`Error::LayoutInconsistency`] - A foreign container failed its consistency check
/// - [`Error::InvalidAddress`] - Access to an address that is null or outside any known region
///
/// ## Configuration Errors
/// - [`Error::DuplicateProxy`], [`Error::UnknownProxyTarget`], [`Error::AlreadyInstalled`],
///   [`Error::Config`]
///
/// ## Image Parsing and External Errors
/// - [`Error::Malformed`], [`Error::OutOfBounds`], [`Error::NotSupported`], [`Error::Empty`],
///   [`Error::FileError`], [`Error::GoblinErr`], [`Error::LoaderError`]
///
/// # Examples
///
/// ```rust,no_run
/// use hostlink::{Error, ProcessModule, Resolver};
///
/// let resolver = Resolver::new(ProcessModule::open_self()?);
/// match resolver.resolve("SetActiveDLCAndMods") {
///     Ok(address) => println!("found at {address}"),
///     Err(Error::SymbolNotFound(name)) => eprintln!("{name} is not available in this build"),
///     Err(e) => eprintln!("resolution failed: {e}"),
/// }
/// # Ok::<(), hostlink::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// Every resolution strategy failed to locate the symbol.
    ///
    /// Fatal to whatever feature depends on the symbol: proceeding would mean calling or
    /// reading an unknown address.
    #[error("Symbol not found in host module - {0}")]
    SymbolNotFound(String),

    /// A byte signature matched more than one location in the host image.
    #[error("Signature for '{name}' is ambiguous - {matches} matches")]
    AmbiguousSignature {
        /// The symbol the signature belongs to
        name: String,
        /// Number of locations the signature matched
        matches: usize,
    },

    /// A call site or replacement disagrees with the convention declared for the symbol.
    #[error("Calling convention mismatch for '{name}' - declared {declared}, requested {requested}")]
    ConventionMismatch {
        /// The symbol whose declaration was violated
        name: String,
        /// The convention the symbol was declared with
        declared: CallingConvention,
        /// The convention of the function type used at the call site
        requested: CallingConvention,
    },

    /// The declared convention cannot be expressed on the current compilation target.
    #[error("Calling convention {convention} of '{name}' is not supported on this target")]
    ConventionUnsupported {
        /// The symbol whose declaration cannot be honored
        name: String,
        /// The unsupported convention
        convention: CallingConvention,
    },

    /// A foreign container's observed shape disagrees with its recorded bookkeeping.
    ///
    /// Traversal is aborted when this is raised; the container must not be used further.
    #[error("Layout inconsistency - expected {expected}, observed {observed}: {reason}")]
    LayoutInconsistency {
        /// The element count recorded by the host
        expected: usize,
        /// The element count observed before the check failed
        observed: usize,
        /// What exactly failed
        reason: String,
    },

    /// An address was null or outside every known memory region.
    #[error("Invalid address {address} - {reason}")]
    InvalidAddress {
        /// The offending address
        address: Address,
        /// Why the access was refused
        reason: &'static str,
    },

    /// A replacement for this symbol name was already registered.
    #[error("A proxy for '{0}' is already registered")]
    DuplicateProxy(String),

    /// A replacement was registered for a symbol the host binary does not define.
    #[error("Proxy registered for a symbol the host does not define - {0}")]
    UnknownProxyTarget(String),

    /// The process-wide linker was already installed.
    #[error("The process-wide linker is already installed")]
    AlreadyInstalled,

    /// The configuration or manifest could not be parsed.
    #[error("Configuration error - {0}")]
    Config(String),

    /// The host image is damaged and could not be parsed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the image.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type or architecture is not supported.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE/ELF parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// The operating system's module loader refused a request.
    #[error("Loader error - {0}")]
    LoaderError(String),
}
