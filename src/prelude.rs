//! # hostlink Prelude
//!
//! The types a patch needs during initialization and at call sites, for glob imports.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all hostlink operations
pub use crate::Error;

/// The result type used throughout hostlink
pub use crate::Result;

// ================================================================================================
// Declarations and Calls
// ================================================================================================

/// Symbol declarations and absolute addresses
pub use crate::symbol::{Address, Symbol};

/// Calling conventions and the checked call-site adapter
pub use crate::symbol::{CallingConvention, ForeignFn, HostFn};

/// Optional patch features
pub use crate::config::{Features, Manifest};

// ================================================================================================
// Resolution and Linking
// ================================================================================================

/// The host module and the layered resolver
pub use crate::resolver::{BuildProfile, HostModule, Resolver, Strategy, SymbolLocation};

/// The host module of the current process
pub use crate::os::ProcessModule;

/// The on-disk view of the host binary
pub use crate::image::{HostImage, Signature};

/// Symbol replacement
pub use crate::proxy::{ProxyTable, ProxyTableBuilder};

/// The link phase and its process-wide result
pub use crate::linker::{install, installed, LinkReport, Linker};

// ================================================================================================
// Host Containers
// ================================================================================================

/// Views onto host-owned lists
pub use crate::container::{ForeignList, ListLayout, ListTermination, NodeRef};

/// Host memory access
pub use crate::container::{MemorySpace, ProcessMemory};
