// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![warn(missing_docs)]
//#![deny(unsafe_code)]
// - 'image/physical.rs' uses mmap to map a file into memory
// - 'os/' talks to the dynamic loader
// - 'container/memory.rs' reads and writes raw host memory
// - 'symbol/convention.rs' turns addresses into function pointers

//! # hostlink
//!
//! An interposition layer between a patch loaded into a closed native program (the *host*)
//! and the host itself. Patch code and host are built by different compilers, so nothing can
//! be assumed about the host's symbol visibility, calling conventions or data layouts.
//! `hostlink` makes each of them explicit:
//!
//! - **Symbol resolution** - find internal functions through exports, known per-build offsets,
//!   byte signatures and leftover symbol tables ([`Resolver`])
//! - **Proxying** - redirect chosen host symbols to patch replacements ([`ProxyTable`])
//! - **Calling conventions** - every symbol declares its convention and every call goes
//!   through a checked binding ([`Symbol`], [`HostFn`])
//! - **Foreign containers** - traverse and mutate the host's `std::list` by its real byte
//!   layout ([`ForeignList`])
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hostlink::prelude::*;
//! use hostlink::platform;
//!
//! let manifest = Manifest::from_file("hostlink.xml")?;
//! let module = ProcessModule::open_self()?;
//! let image = HostImage::from_module(&module)?;
//!
//! let mut resolver = Resolver::new(module);
//! if let Some(profile) = manifest.profile_for(&image.fingerprint()) {
//!     resolver = resolver.with_profile(profile.clone());
//! }
//! let resolver = resolver.with_image(image);
//!
//! let report = Linker::builder(&resolver)
//!     .features(manifest.features())
//!     .declare_all(platform::HOST_SYMBOLS)
//!     .link();
//! let linker = install(report.into_result()?)?;
//!
//! type GetMemoryUsage = unsafe extern "C" fn(*mut std::ffi::c_void) -> i32;
//! if linker.features().contains(Features::MULTIPLAYER) {
//!     let usage = unsafe { linker.bind::<GetMemoryUsage>(&platform::L_GET_MEMORY_USAGE)? };
//!     println!("lGetMemoryUsage at {}", usage.address());
//! }
//! # Ok::<(), hostlink::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`image`] - the host binary on disk (PE / ELF), signatures and address translation
//! - [`resolver`] - layered symbol resolution and build profiles
//! - [`os`] - the OS loader backends
//! - [`symbol`] - declarations, addresses and calling conventions
//! - [`proxy`] - the replacement table
//! - [`linker`] - the link phase and the process-wide result
//! - [`container`] - host memory access and the foreign list view
//! - [`config`] - features and the build manifest
//! - [`platform`] - constants of the targeted host build
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result):
//!
//! ```rust,no_run
//! use hostlink::{Error, HostImage};
//!
//! match HostImage::from_file("Game.exe") {
//!     Ok(image) => println!("{} image", image.arch()),
//!     Err(Error::NotSupported) => println!("Not a supported PE/ELF image"),
//!     Err(Error::Malformed { message, .. }) => println!("Malformed file: {}", message),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! ## Development and Testing
//!
//! ### Fuzzing
//!
//! ```bash
//! cargo +nightly fuzz run image --release
//! cargo +nightly fuzz run manifest --release
//! ```
//!
//! ### Testing
//!
//! ```bash
//! cargo test
//! RUST_LOG=hostlink=trace cargo test -- --nocapture
//! ```

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("hostlink supports x86, x86_64 and aarch64 targets only");

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use hostlink::prelude::*;
///
/// let resolver = Resolver::new(ProcessModule::open("libc.so.6")?);
/// let address = resolver.resolve("malloc")?;
/// # Ok::<(), hostlink::Error>(())
/// ```
pub mod prelude;

pub mod config;
pub mod container;
pub mod image;
pub mod linker;
pub mod os;
pub mod platform;
pub mod proxy;
pub mod resolver;
pub mod symbol;

/// `hostlink` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `hostlink` Error type
///
/// Every fallible operation of this crate reports one of its variants.
pub use error::Error;

pub use config::{Features, Manifest};
pub use container::{
    Arena, ForeignList, ListLayout, ListTermination, MemorySpace, NodeRef, ProcessMemory,
};
pub use image::{Arch, HostImage, ImageSymbol, Signature};
pub use linker::{install, installed, LinkFailure, LinkReport, Linker, LinkerBuilder};
pub use os::ProcessModule;
pub use platform::PATH_SEPARATOR;
pub use proxy::{filter_proxy_symbol, ProxyTable, ProxyTableBuilder, Replacement};
pub use resolver::{resolve_symbol, BuildProfile, HostModule, Resolver, Strategy, SymbolLocation};
pub use symbol::{Address, CallingConvention, ForeignFn, HostFn, Symbol};
