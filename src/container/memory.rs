//! Explicit-offset access to host memory.
//!
//! Host structures are never mirrored as Rust types. Every field is read or written through a
//! [`MemorySpace`] at an explicit address, with the width the host's compiler gave it.
//!
//! Two spaces exist: [`ProcessMemory`] accesses the live memory of the current process, and
//! [`Arena`] is a self-contained byte region at a fixed fake base address used to build
//! host-shaped fixtures without a host.

use crate::{
    image::io::{read_le, read_le_at_dyn, write_le, write_le_at_dyn, HostIO},
    symbol::Address,
    Error::{InvalidAddress, OutOfBounds},
    Result,
};

/// An address space that host structures can be read from and written to.
pub trait MemorySpace {
    /// Fill `buffer` with the bytes at `address`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidAddress`] if the range is not accessible.
    fn read(&self, address: Address, buffer: &mut [u8]) -> Result<()>;

    /// Store `data` at `address`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidAddress`] if the range is not accessible.
    fn write(&mut self, address: Address, data: &[u8]) -> Result<()>;

    /// Read a little-endian integer at `address`.
    ///
    /// # Errors
    /// Returns an error if the range is not accessible.
    fn read_value<T: HostIO>(&self, address: Address) -> Result<T>
    where
        Self: Sized,
    {
        let mut buffer = [0_u8; 8];
        let len = std::mem::size_of::<T>();
        self.read(address, &mut buffer[..len])?;
        read_le(&buffer[..len])
    }

    /// Write a little-endian integer at `address`.
    ///
    /// # Errors
    /// Returns an error if the range is not accessible.
    fn write_value<T: HostIO>(&mut self, address: Address, value: T) -> Result<()>
    where
        Self: Sized,
    {
        let mut buffer = [0_u8; 8];
        let len = std::mem::size_of::<T>();
        write_le(&mut buffer[..len], value)?;
        self.write(address, &buffer[..len])
    }

    /// Read a host pointer of `width` bytes (4 or 8) at `address`.
    ///
    /// # Errors
    /// Returns an error if the range is not accessible or the pointer does not fit this
    /// process's address space.
    fn read_pointer(&self, address: Address, width: usize) -> Result<Address>
    where
        Self: Sized,
    {
        let mut buffer = [0_u8; 8];
        let slot = buffer.get_mut(..width).ok_or(OutOfBounds)?;
        self.read(address, slot)?;

        let value = read_le_at_dyn(&buffer, &mut 0, width == 8)?;
        usize::try_from(value)
            .map(Address::new)
            .map_err(|_| malformed_error!("Host pointer 0x{:x} does not fit usize", value))
    }

    /// Write a host pointer of `width` bytes (4 or 8) at `address`.
    ///
    /// # Errors
    /// Returns an error if the range is not accessible or `value` does not fit `width`.
    fn write_pointer(&mut self, address: Address, width: usize, value: Address) -> Result<()>
    where
        Self: Sized,
    {
        let mut buffer = [0_u8; 8];
        write_le_at_dyn(&mut buffer, &mut 0, value.value() as u64, width == 8)?;
        let slot = buffer.get(..width).ok_or(OutOfBounds)?;
        self.write(address, slot)
    }
}

fn end_of(address: Address, len: usize) -> Result<usize> {
    address.value().checked_add(len).ok_or(InvalidAddress {
        address,
        reason: "range wraps around the address space",
    })
}

/// The live memory of the current process.
#[derive(Debug)]
pub struct ProcessMemory {
    _private: (),
}

impl ProcessMemory {
    /// Create an accessor for the current process.
    ///
    /// # Safety
    /// Every non-null address later passed to `read` or `write` must be valid, mapped host
    /// memory of at least the requested length, and must not be concurrently mutated by host
    /// threads during the access. Only null addresses and wrapping ranges are detected.
    #[must_use]
    pub unsafe fn new() -> Self {
        ProcessMemory { _private: () }
    }
}

impl MemorySpace for ProcessMemory {
    fn read(&self, address: Address, buffer: &mut [u8]) -> Result<()> {
        if address.is_null() {
            return Err(InvalidAddress {
                address,
                reason: "read from null",
            });
        }
        end_of(address, buffer.len())?;

        // Validity of the range is the contract of `ProcessMemory::new`.
        unsafe {
            std::ptr::copy_nonoverlapping(
                address.as_ptr::<u8>(),
                buffer.as_mut_ptr(),
                buffer.len(),
            );
        }
        Ok(())
    }

    fn write(&mut self, address: Address, data: &[u8]) -> Result<()> {
        if address.is_null() {
            return Err(InvalidAddress {
                address,
                reason: "write to null",
            });
        }
        end_of(address, data.len())?;

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), address.as_mut_ptr::<u8>(), data.len());
        }
        Ok(())
    }
}

/// A contiguous byte region at a fixed base address.
///
/// Allocations are bump-allocated, zeroed and aligned to 16 bytes. Any access outside the
/// allocated part of the region fails with [`crate::Error::InvalidAddress`], so fixtures with
/// dangling links are detected instead of reading garbage.
///
/// The default base is below 4 GiB so that fixtures with 4-byte host pointers can address
/// every allocation.
#[derive(Clone, Debug)]
pub struct Arena {
    base: Address,
    data: Vec<u8>,
    capacity: usize,
}

impl Arena {
    /// Base address used by [`Arena::new`]
    pub const DEFAULT_BASE: Address = Address::new(0x1000_0000);

    /// Alignment of every allocation
    pub const ALIGNMENT: usize = 16;

    /// Create an arena of `capacity` bytes at [`Arena::DEFAULT_BASE`]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Arena {
            base: Self::DEFAULT_BASE,
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Create an arena of `capacity` bytes at `base`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidAddress`] if `base` is null, unaligned, or the region
    /// would wrap around the address space.
    pub fn with_base(base: Address, capacity: usize) -> Result<Self> {
        if base.is_null() || base.value() % Self::ALIGNMENT != 0 {
            return Err(InvalidAddress {
                address: base,
                reason: "arena base must be non-null and 16-byte aligned",
            });
        }
        end_of(base, capacity)?;

        Ok(Arena {
            base,
            data: Vec::with_capacity(capacity),
            capacity,
        })
    }

    /// The first address of the region
    #[must_use]
    pub fn base(&self) -> Address {
        self.base
    }

    /// Number of bytes handed out so far, including alignment padding
    #[must_use]
    pub fn used(&self) -> usize {
        self.data.len()
    }

    /// Allocate `size` zeroed bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the arena is exhausted.
    pub fn alloc(&mut self, size: usize) -> Result<Address> {
        let offset = self.data.len();
        let padded = size.max(1).div_ceil(Self::ALIGNMENT) * Self::ALIGNMENT;
        let Some(end) = offset.checked_add(padded) else {
            return Err(OutOfBounds);
        };
        if end > self.capacity {
            return Err(OutOfBounds);
        }

        self.data.resize(end, 0);
        Ok(Address::new(self.base.value() + offset))
    }

    fn range(&self, address: Address, len: usize) -> Result<std::ops::Range<usize>> {
        let end = end_of(address, len)?;
        if address < self.base || end > self.base.value() + self.data.len() {
            return Err(InvalidAddress {
                address,
                reason: "outside of the arena's allocated region",
            });
        }

        let start = address.value() - self.base.value();
        Ok(start..start + len)
    }
}

impl MemorySpace for Arena {
    fn read(&self, address: Address, buffer: &mut [u8]) -> Result<()> {
        let range = self.range(address, buffer.len())?;
        buffer.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write(&mut self, address: Address, data: &[u8]) -> Result<()> {
        let range = self.range(address, data.len())?;
        self.data[range].copy_from_slice(data);
        Ok(())
    }
}
