//! Views onto host-owned containers.
//!
//! - [`memory`] - explicit-offset access to host memory ([`MemorySpace`], [`ProcessMemory`],
//!   [`Arena`])
//! - [`list`] - the host's doubly-linked list ([`ForeignList`], [`ListLayout`])

pub mod list;
pub mod memory;

pub use list::{ForeignList, ListLayout, ListTermination, NodeRef};
pub use memory::{Arena, MemorySpace, ProcessMemory};
