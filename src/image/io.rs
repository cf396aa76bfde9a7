//! Bounds-checked little-endian reads and writes of host-sized integers.
//!
//! Everything the host binary stores is read through these helpers instead of through Rust
//! structure definitions: field widths and offsets are dictated by the host's compiler, and
//! the only portable way to honor them is explicit byte access at explicit offsets.
//!
//! Pointer-sized fields have no fixed Rust type, since a 32-bit host has 4-byte pointers even
//! when the patch is inspected from a 64-bit process. [`read_le_at_dyn`] and
//! [`write_le_at_dyn`] handle both widths and always widen to `u64`.
//!
//! # Examples
//!
//! ```rust
//! use hostlink::image::io::{read_le_at, read_le_at_dyn};
//!
//! let data = [0x01, 0x00, 0x00, 0x00, 0x10, 0x20, 0x30, 0x40];
//! let mut offset = 0;
//!
//! let opaque: u32 = read_le_at(&data, &mut offset)?;
//! assert_eq!(opaque, 1);
//!
//! let pointer = read_le_at_dyn(&data, &mut offset, false)?;
//! assert_eq!(pointer, 0x4030_2010);
//! assert_eq!(offset, 8);
//! # Ok::<(), hostlink::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// A fixed-width integer that can be decoded from / encoded to little-endian host bytes.
pub trait HostIO: Sized + Copy {
    /// Byte representation of the type
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decode from little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode into little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_host_io {
    ($($ty:ty => $len:literal),* $(,)?) => {
        $(
            impl HostIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_host_io!(
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
);

/// Reads a value of type `T` from the beginning of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: HostIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Reads a value of type `T` at `offset` and advances `offset` past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: HostIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Reads a pointer-sized value: 8 bytes if `is_wide`, otherwise 4 bytes widened to `u64`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_wide: bool) -> Result<u64> {
    let res = if is_wide {
        read_le_at::<u64>(data, offset)?
    } else {
        u64::from(read_le_at::<u32>(data, offset)?)
    };

    Ok(res)
}

/// Writes `value` to the beginning of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le<T: HostIO>(data: &mut [u8], value: T) -> Result<()> {
    let mut offset = 0_usize;
    write_le_at(data, &mut offset, value)
}

/// Writes `value` at `offset` and advances `offset` past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le_at<T: HostIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let bytes = value.to_le_bytes();
    data[*offset..end].copy_from_slice(bytes.as_ref());
    *offset = end;

    Ok(())
}

/// Writes a pointer-sized value: 8 bytes if `is_wide`, otherwise 4 bytes.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small, or
/// [`crate::Error::Malformed`] if a narrow write would truncate `value`.
pub fn write_le_at_dyn(data: &mut [u8], offset: &mut usize, value: u64, is_wide: bool) -> Result<()> {
    if is_wide {
        write_le_at::<u64>(data, offset, value)?;
    } else {
        let narrow = u32::try_from(value)
            .map_err(|_| malformed_error!("Value 0x{:x} does not fit a 32-bit pointer", value))?;
        write_le_at::<u32>(data, offset, narrow)?;
    }

    Ok(())
}
