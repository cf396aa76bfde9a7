//! Operating system loader backends.
//!
//! [`ProcessModule`] is the [`crate::HostModule`] for a module that is actually loaded into the
//! current process. It asks the OS loader for the module's base address, its exports and the
//! file it was loaded from:
//!
//! - Linux: `dlopen` / `dlsym` / `dl_iterate_phdr`
//! - Windows: `GetModuleHandleW` / `GetProcAddress` / `GetModuleFileNameW`
//!
//! Handles are only borrowed from the loader. Dropping a [`ProcessModule`] never unloads the
//! host.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod unix;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use unix::ProcessModule;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::ProcessModule;

#[cfg(not(any(target_os = "linux", target_os = "android", windows)))]
compile_error!("hostlink only knows the loaders of Linux and Windows hosts");
