//! Calling-convention descriptors and the typed call-site adapter.
//!
//! Every platform fixes which argument-passing convention the host's compiler used for a
//! given function category: on 32-bit MSVC builds free functions are usually `cdecl`, while
//! member functions are `thiscall` and receive the implicit receiver in `ecx` rather than on
//! the stack. Mixing them up corrupts the stack of whoever made the call.
//!
//! The convention is therefore modelled as an explicit [`CallingConvention`] tag on every
//! [`Symbol`], and every call site goes through [`HostFn`], which only exists once the Rust
//! function-pointer type (via [`ForeignFn::CONVENTION`]) has been checked against that tag.
//!
//! # Lowering
//!
//! Conventions are compared after lowering them onto the current compilation target. On
//! x86_64 the four 32-bit conventions all collapse onto the platform's single convention
//! (the receiver of a `thiscall` member function simply becomes the first argument), so a
//! `Thiscall` declaration is satisfied by an `extern "C" fn` there, while on x86 it needs an
//! `extern "thiscall" fn`.
//!
//! | Declared | x86 | x86_64 (Windows) | x86_64 (other) | aarch64 |
//! |----------|-----|------------------|----------------|---------|
//! | `Cdecl` | `Cdecl` | `Win64` | `SysV64` | `Aapcs64` |
//! | `Stdcall` | `Stdcall` | `Win64` | `SysV64` | `Aapcs64` |
//! | `Thiscall` | `Thiscall` | `Win64` | `SysV64` | `Aapcs64` |
//! | `Fastcall` | `Fastcall` | `Win64` | `SysV64` | `Aapcs64` |
//! | `SysV64` | - | `SysV64` | `SysV64` | - |
//! | `Win64` | - | `Win64` | `Win64` | - |
//! | `Aapcs64` | - | - | - | `Aapcs64` |

use std::fmt;

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    symbol::{Address, Symbol},
    Error, Result,
};

/// Argument-passing convention of a host function.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum CallingConvention {
    /// Caller cleans the stack, all arguments on the stack (x86)
    Cdecl,
    /// Callee cleans the stack, all arguments on the stack (x86)
    Stdcall,
    /// Like `Stdcall`, but the receiver is passed in `ecx` (x86 MSVC member functions)
    Thiscall,
    /// First two arguments in `ecx`/`edx`, callee cleans the stack (x86)
    Fastcall,
    /// System V AMD64 ABI
    SysV64,
    /// Microsoft x64 ABI
    Win64,
    /// AArch64 procedure call standard
    Aapcs64,
}

impl CallingConvention {
    /// The convention `extern "C"` resolves to on the current target.
    #[cfg(target_arch = "x86")]
    pub const NATIVE: CallingConvention = CallingConvention::Cdecl;
    /// The convention `extern "C"` resolves to on the current target.
    #[cfg(all(target_arch = "x86_64", windows))]
    pub const NATIVE: CallingConvention = CallingConvention::Win64;
    /// The convention `extern "C"` resolves to on the current target.
    #[cfg(all(target_arch = "x86_64", not(windows)))]
    pub const NATIVE: CallingConvention = CallingConvention::SysV64;
    /// The convention `extern "C"` resolves to on the current target.
    #[cfg(target_arch = "aarch64")]
    pub const NATIVE: CallingConvention = CallingConvention::Aapcs64;

    /// The convention the current target actually uses for a function declared with `self`.
    ///
    /// Returns `None` if the declaration cannot be honored on this target at all.
    #[cfg(target_arch = "x86")]
    #[must_use]
    pub const fn lowered(self) -> Option<CallingConvention> {
        match self {
            Self::Cdecl | Self::Stdcall | Self::Thiscall | Self::Fastcall => Some(self),
            Self::SysV64 | Self::Win64 | Self::Aapcs64 => None,
        }
    }

    /// The convention the current target actually uses for a function declared with `self`.
    ///
    /// Returns `None` if the declaration cannot be honored on this target at all.
    #[cfg(target_arch = "x86_64")]
    #[must_use]
    pub const fn lowered(self) -> Option<CallingConvention> {
        match self {
            Self::Cdecl | Self::Stdcall | Self::Thiscall | Self::Fastcall => Some(Self::NATIVE),
            Self::SysV64 | Self::Win64 => Some(self),
            Self::Aapcs64 => None,
        }
    }

    /// The convention the current target actually uses for a function declared with `self`.
    ///
    /// Returns `None` if the declaration cannot be honored on this target at all.
    #[cfg(target_arch = "aarch64")]
    #[must_use]
    pub const fn lowered(self) -> Option<CallingConvention> {
        match self {
            Self::Cdecl | Self::Stdcall | Self::Thiscall | Self::Fastcall | Self::Aapcs64 => {
                Some(Self::Aapcs64)
            }
            Self::SysV64 | Self::Win64 => None,
        }
    }

    /// Returns `true` if both conventions lower to the same convention on this target
    #[must_use]
    pub fn is_compatible(self, other: CallingConvention) -> bool {
        match (self.lowered(), other.lowered()) {
            (Some(lhs), Some(rhs)) => lhs == rhs,
            _ => false,
        }
    }
}

/// Checks that the function-pointer type `F` may be used for `symbol`.
///
/// # Errors
/// - [`Error::ConventionUnsupported`] if the declared convention does not exist on this target
/// - [`Error::ConventionMismatch`] if `F` uses a different convention than declared
pub(crate) fn ensure_compatible<F: ForeignFn>(symbol: &Symbol) -> Result<()> {
    let declared = symbol.convention();
    if declared.lowered().is_none() {
        return Err(Error::ConventionUnsupported {
            name: symbol.name().to_string(),
            convention: declared,
        });
    }

    if !declared.is_compatible(F::CONVENTION) {
        return Err(Error::ConventionMismatch {
            name: symbol.name().to_string(),
            declared,
            requested: F::CONVENTION,
        });
    }

    Ok(())
}

/// A function-pointer type that can cross the ABI boundary.
///
/// Implemented for `extern "C"` function pointers on every target, for `extern "sysv64"` and
/// `extern "win64"` on x86_64 and for `extern "stdcall"`, `extern "fastcall"` and
/// `extern "thiscall"` on x86, each with up to six arguments and in both safe and `unsafe`
/// flavours.
pub trait ForeignFn: Copy {
    /// The convention this function-pointer type is compiled with
    const CONVENTION: CallingConvention;

    /// The address of the function
    fn address(self) -> Address;

    /// Reinterpret an address as this function-pointer type.
    ///
    /// # Safety
    /// `address` must be non-null and point to a function with exactly this signature and
    /// convention, which must stay loaded for as long as the returned pointer is used.
    unsafe fn from_address(address: Address) -> Self;
}

macro_rules! impl_foreign_fn {
    ($abi:tt => $conv:expr; $($arg:ident),*) => {
        impl<R, $($arg),*> ForeignFn for extern $abi fn($($arg),*) -> R {
            const CONVENTION: CallingConvention = $conv;

            fn address(self) -> Address {
                Address::new(self as usize)
            }

            unsafe fn from_address(address: Address) -> Self {
                std::mem::transmute_copy::<usize, Self>(&address.value())
            }
        }

        impl<R, $($arg),*> ForeignFn for unsafe extern $abi fn($($arg),*) -> R {
            const CONVENTION: CallingConvention = $conv;

            fn address(self) -> Address {
                Address::new(self as usize)
            }

            unsafe fn from_address(address: Address) -> Self {
                std::mem::transmute_copy::<usize, Self>(&address.value())
            }
        }
    };
}

macro_rules! impl_foreign_fn_arities {
    ($abi:tt => $conv:expr) => {
        impl_foreign_fn!($abi => $conv;);
        impl_foreign_fn!($abi => $conv; A1);
        impl_foreign_fn!($abi => $conv; A1, A2);
        impl_foreign_fn!($abi => $conv; A1, A2, A3);
        impl_foreign_fn!($abi => $conv; A1, A2, A3, A4);
        impl_foreign_fn!($abi => $conv; A1, A2, A3, A4, A5);
        impl_foreign_fn!($abi => $conv; A1, A2, A3, A4, A5, A6);
    };
}

impl_foreign_fn_arities!("C" => CallingConvention::NATIVE);

#[cfg(target_arch = "x86_64")]
impl_foreign_fn_arities!("sysv64" => CallingConvention::SysV64);
#[cfg(target_arch = "x86_64")]
impl_foreign_fn_arities!("win64" => CallingConvention::Win64);

#[cfg(target_arch = "x86")]
impl_foreign_fn_arities!("stdcall" => CallingConvention::Stdcall);
#[cfg(target_arch = "x86")]
impl_foreign_fn_arities!("fastcall" => CallingConvention::Fastcall);
#[cfg(target_arch = "x86")]
impl_foreign_fn_arities!("thiscall" => CallingConvention::Thiscall);

/// A host function bound to a Rust function-pointer type whose convention was checked
/// against the symbol's declaration.
///
/// This is the only sanctioned way to call a resolved host address.
///
/// # Examples
///
/// ```rust,no_run
/// use hostlink::{CallingConvention, HostFn, Symbol};
///
/// const GET_MEMORY_USAGE: Symbol = Symbol::new("lGetMemoryUsage", CallingConvention::Cdecl);
/// type GetMemoryUsage = unsafe extern "C" fn(*mut std::ffi::c_void) -> i32;
///
/// # let address = hostlink::Address::new(0x1000);
/// let func: HostFn<GetMemoryUsage> = unsafe { HostFn::new(&GET_MEMORY_USAGE, address)? };
/// # Ok::<(), hostlink::Error>(())
/// ```
#[derive(Clone, Copy)]
pub struct HostFn<F: ForeignFn> {
    symbol: Symbol,
    function: F,
}

impl<F: ForeignFn> HostFn<F> {
    /// Bind `address` as the implementation of `symbol`.
    ///
    /// # Safety
    /// `address` must point to a function whose signature matches `F` and that stays loaded
    /// for as long as the binding is used. The convention is checked, the signature cannot be.
    ///
    /// # Errors
    /// - [`Error::ConventionUnsupported`] / [`Error::ConventionMismatch`] if `F` does not
    ///   honor the declared convention
    /// - [`Error::InvalidAddress`] if `address` is null
    pub unsafe fn new(symbol: &Symbol, address: Address) -> Result<Self> {
        ensure_compatible::<F>(symbol)?;

        if address.is_null() {
            return Err(Error::InvalidAddress {
                address,
                reason: "cannot bind a null function address",
            });
        }

        Ok(HostFn {
            symbol: *symbol,
            function: F::from_address(address),
        })
    }

    /// The bound function pointer
    #[must_use]
    pub fn get(&self) -> F {
        self.function
    }

    /// The bound address
    #[must_use]
    pub fn address(&self) -> Address {
        self.function.address()
    }

    /// The declaration this function was bound against
    #[must_use]
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }
}

impl<F: ForeignFn> fmt::Debug for HostFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFn")
            .field("symbol", &self.symbol)
            .field("address", &self.address())
            .finish()
    }
}
