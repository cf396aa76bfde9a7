//! On-disk view of the host binary.
//!
//! The operating system's loader only answers questions about exported symbols. Everything
//! else the resolver needs (static symbol tables, code bytes to scan for signatures, the
//! mapping between file offsets and module-relative addresses, a fingerprint identifying the
//! exact build) comes from parsing the host binary file itself. [`HostImage`] wraps that file
//! and its parsed PE or ELF structure.
//!
//! # Architecture
//!
//! - **Backend system** - [`Backend`] abstracts over a memory-mapped file ([`physical::Physical`])
//!   and owned bytes ([`memory::Buffer`])
//! - **Format parsing** - `goblin` parses PE (Windows hosts) and ELF (Linux hosts); other
//!   formats and architectures are refused at load time
//! - **Address translation** - [`HostImage::rva_to_offset`] and [`HostImage::offset_to_rva`]
//!
//! # Relative addresses
//!
//! An *RVA* in this crate is always an address relative to the module's load address as
//! reported by the OS backend: the PE RVA for PE images, and the link-time virtual address for
//! ELF images (the dynamic loader reports the load bias as base). `base + rva` is therefore
//! the runtime address in both cases.
//!
//! # Examples
//!
//! ```rust,no_run
//! use hostlink::image::{HostImage, Signature};
//!
//! let image = HostImage::from_file("Game.exe")?;
//! println!("{} image, fingerprint {}", image.arch(), image.fingerprint());
//!
//! let prologue = Signature::parse("55 8B EC 6A FF 68 ?? ?? ?? ??")?;
//! for offset in image.find_signature(&prologue) {
//!     println!("candidate at rva 0x{:x}", image.offset_to_rva(offset)?);
//! }
//! # Ok::<(), hostlink::Error>(())
//! ```

pub mod io;
pub mod memory;
pub mod physical;
mod signature;

pub use signature::Signature;

use std::{fmt::Write, ops::Range, path::Path};

use goblin::{
    elf::{
        header::{EM_386, EM_AARCH64, EM_X86_64},
        program_header::{PF_X, PT_LOAD},
        sym::{Symtab, STT_FUNC, STT_OBJECT},
        Elf,
    },
    pe::{
        header::{COFF_MACHINE_ARM64, COFF_MACHINE_X86, COFF_MACHINE_X86_64},
        section_table::{IMAGE_SCN_CNT_CODE, IMAGE_SCN_MEM_EXECUTE},
        PE,
    },
    strtab::Strtab,
    Object,
};
use ouroboros::self_referencing;
use sha1::{Digest, Sha1};
use strum::Display;

use crate::{
    resolver::HostModule,
    Error::{Empty, GoblinErr, LoaderError, NotSupported},
    Result,
};
use memory::Buffer;
use physical::Physical;

/// Backend trait for image data sources.
///
/// Abstracts over the source of the host binary's bytes, so that the image can be parsed from
/// the file on disk or from a buffer that was read (or synthesized) elsewhere.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Arguments
    ///
    /// * `offset` - The starting offset within the data.
    /// * `len` - The length of the slice in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

/// Instruction set of a host image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum Arch {
    /// 32-bit x86
    #[strum(serialize = "x86")]
    X86,
    /// x86_64 / AMD64
    #[strum(serialize = "x86_64")]
    X86_64,
    /// AArch64 / ARM64
    #[strum(serialize = "aarch64")]
    AArch64,
}

impl Arch {
    /// The architecture this crate was compiled for
    #[cfg(target_arch = "x86")]
    pub const CURRENT: Arch = Arch::X86;
    /// The architecture this crate was compiled for
    #[cfg(target_arch = "x86_64")]
    pub const CURRENT: Arch = Arch::X86_64;
    /// The architecture this crate was compiled for
    #[cfg(target_arch = "aarch64")]
    pub const CURRENT: Arch = Arch::AArch64;

    /// Size of a pointer in bytes
    #[must_use]
    pub const fn pointer_width(self) -> usize {
        match self {
            Arch::X86 => 4,
            Arch::X86_64 | Arch::AArch64 => 8,
        }
    }

    /// Returns `true` if pointers are 8 bytes wide
    #[must_use]
    pub const fn is_wide(self) -> bool {
        self.pointer_width() == 8
    }
}

/// A named symbol of the image and its module-relative address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageSymbol {
    /// Symbol name as stored in the image
    pub name: String,
    /// Address relative to the module base
    pub rva: u64,
}

enum Format<'a> {
    Pe(PE<'a>),
    Elf(Elf<'a>),
}

#[self_referencing]
/// A parsed host binary.
///
/// Owns the raw bytes through a [`Backend`] and the `goblin` structures parsed from them.
/// Loading fails for anything that is not a PE or ELF image for x86, x86_64 or aarch64.
pub struct HostImage {
    /// The underlying data source (memory or file).
    data: Box<dyn Backend>,
    /// The parsed PE or ELF structure, referencing the data.
    #[borrows(data)]
    #[not_covariant]
    format: Format<'this>,
}

impl HostImage {
    /// Loads and parses the host binary at `path`.
    ///
    /// The file is memory-mapped, not read.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, is empty, is neither PE nor ELF, or
    /// targets an unsupported architecture.
    pub fn from_file(path: impl AsRef<Path>) -> Result<HostImage> {
        let input = Physical::new(path)?;

        Self::load(input)
    }

    /// Parses a host binary that is already in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is empty, is neither PE nor ELF, or targets an
    /// unsupported architecture.
    pub fn from_mem(data: Vec<u8>) -> Result<HostImage> {
        Self::load(Buffer::from(data))
    }

    /// Loads the file backing a loaded module.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LoaderError`] if the module has no backing file, otherwise
    /// the same errors as [`HostImage::from_file`].
    pub fn from_module(module: &dyn HostModule) -> Result<HostImage> {
        let Some(path) = module.path() else {
            return Err(LoaderError(format!(
                "Module '{}' has no backing file",
                module.name()
            )));
        };

        Self::from_file(path)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<HostImage> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let data = Box::new(data);

        let image = HostImage::try_new(data, |data| {
            match Object::parse(data.data()).map_err(GoblinErr)? {
                Object::PE(pe) => Ok(Format::Pe(pe)),
                Object::Elf(elf) => Ok(Format::Elf(elf)),
                _ => Err(NotSupported),
            }
        })?;

        // Refuse machines the rest of the crate has no layout rules for.
        let arch = image.arch_checked()?;
        log::debug!("Loaded {} host image, {} bytes", arch, image.len());

        Ok(image)
    }

    fn arch_checked(&self) -> Result<Arch> {
        self.with_format(|format| {
            let arch = match format {
                Format::Pe(pe) => match pe.header.coff_header.machine {
                    COFF_MACHINE_X86 => Some(Arch::X86),
                    COFF_MACHINE_X86_64 => Some(Arch::X86_64),
                    COFF_MACHINE_ARM64 => Some(Arch::AArch64),
                    _ => None,
                },
                Format::Elf(elf) => match elf.header.e_machine {
                    EM_386 => Some(Arch::X86),
                    EM_X86_64 => Some(Arch::X86_64),
                    EM_AARCH64 => Some(Arch::AArch64),
                    _ => None,
                },
            };

            arch.ok_or(NotSupported)
        })
    }

    /// The instruction set of the image.
    ///
    /// Loading refuses every machine without an [`Arch`], so the fallback is unreachable for
    /// a constructed image.
    #[must_use]
    pub fn arch(&self) -> Arch {
        self.arch_checked().unwrap_or(Arch::CURRENT)
    }

    /// Returns `true` for PE images, `false` for ELF images
    #[must_use]
    pub fn is_pe(&self) -> bool {
        self.with_format(|format| matches!(format, Format::Pe(_)))
    }

    /// Returns the total size of the image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns `true` if the image has a length of zero.
    ///
    /// Loading refuses empty input, so this is `false` for every successfully loaded image.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the raw image bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// Returns a slice of the image data at the given offset and length.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.with_data(|data| data.data_slice(offset, len))
    }

    /// Lowercase hex SHA-1 of the complete file, used to select a build profile.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.data());
        let digest = hasher.finalize();

        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }

    /// Symbols the image makes available to the dynamic loader.
    ///
    /// For PE this is the export directory, for ELF the defined entries of `.dynsym`.
    #[must_use]
    pub fn exports(&self) -> Vec<ImageSymbol> {
        self.with_format(|format| match format {
            Format::Pe(pe) => pe
                .exports
                .iter()
                .filter(|export| export.reexport.is_none())
                .filter_map(|export| {
                    Some(ImageSymbol {
                        name: export.name?.to_string(),
                        rva: export.rva as u64,
                    })
                })
                .collect(),
            Format::Elf(elf) => elf_symbols(&elf.dynsyms, &elf.dynstrtab),
        })
    }

    /// Module-relative address of an exported symbol.
    #[must_use]
    pub fn export_rva(&self, name: &str) -> Option<u64> {
        self.exports()
            .into_iter()
            .find(|symbol| symbol.name == name)
            .map(|symbol| symbol.rva)
    }

    /// Module-relative address of any named symbol the file still carries.
    ///
    /// ELF images are searched in `.symtab` first and `.dynsym` second. PE images carry no
    /// usable static symbol table after linking, so only the export directory is consulted.
    #[must_use]
    pub fn symbol_rva(&self, name: &str) -> Option<u64> {
        let found = self.with_format(|format| match format {
            Format::Pe(_) => None,
            Format::Elf(elf) => elf_symbols(&elf.syms, &elf.strtab)
                .into_iter()
                .find(|symbol| symbol.name == name)
                .map(|symbol| symbol.rva),
        });

        found.or_else(|| self.export_rva(name))
    }

    /// File offset ranges that are mapped executable at runtime.
    ///
    /// PE sections flagged as code or executable, ELF `PT_LOAD` segments with `PF_X`. Ranges
    /// are clamped to the file size.
    #[must_use]
    pub fn executable_ranges(&self) -> Vec<Range<usize>> {
        let len = self.len();
        let clamp = |start: u64, size: u64| -> Option<Range<usize>> {
            let end = start.checked_add(size)?;
            let start = usize::try_from(start).ok()?.min(len);
            let end = usize::try_from(end).unwrap_or(usize::MAX).min(len);
            (start < end).then_some(start..end)
        };

        self.with_format(|format| match format {
            Format::Pe(pe) => pe
                .sections
                .iter()
                .filter(|section| {
                    section.characteristics & (IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_CNT_CODE) != 0
                })
                .filter_map(|section| {
                    clamp(
                        u64::from(section.pointer_to_raw_data),
                        u64::from(section.size_of_raw_data),
                    )
                })
                .collect(),
            Format::Elf(elf) => elf
                .program_headers
                .iter()
                .filter(|header| header.p_type == PT_LOAD && header.p_flags & PF_X != 0)
                .filter_map(|header| clamp(header.p_offset, header.p_filesz))
                .collect(),
        })
    }

    /// File offsets of every match of `signature` within the executable ranges.
    #[must_use]
    pub fn find_signature(&self, signature: &Signature) -> Vec<usize> {
        let data = self.data();
        let mut matches = Vec::new();

        for range in self.executable_ranges() {
            let start = range.start;
            matches.extend(
                signature
                    .find_all(&data[range])
                    .into_iter()
                    .map(|offset| start + offset),
            );
        }

        matches.sort_unstable();
        matches.dedup();
        matches
    }

    /// Converts a module-relative address to a file offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not backed by file data.
    pub fn rva_to_offset(&self, rva: u64) -> Result<usize> {
        let offset = self.with_format(|format| match format {
            Format::Pe(pe) => {
                for section in &pe.sections {
                    let start = u64::from(section.virtual_address);
                    let size = u64::from(section.virtual_size.max(section.size_of_raw_data));
                    if rva >= start && rva < start + size {
                        let delta = rva - start;
                        if delta >= u64::from(section.size_of_raw_data) {
                            return Err(malformed_error!(
                                "RVA 0x{:x} lies in uninitialized section data",
                                rva
                            ));
                        }
                        return Ok(u64::from(section.pointer_to_raw_data) + delta);
                    }
                }
                Err(malformed_error!("RVA could not be converted to offset - 0x{:x}", rva))
            }
            Format::Elf(elf) => {
                for header in elf.program_headers.iter().filter(|h| h.p_type == PT_LOAD) {
                    let Some(end) = header.p_vaddr.checked_add(header.p_filesz) else {
                        return Err(malformed_error!(
                            "Segment malformed, causing integer overflow - 0x{:x} + 0x{:x}",
                            header.p_vaddr,
                            header.p_filesz
                        ));
                    };
                    if rva >= header.p_vaddr && rva < end {
                        return header.p_offset.checked_add(rva - header.p_vaddr).ok_or_else(|| {
                            malformed_error!("Segment offset overflows - 0x{:x}", header.p_offset)
                        });
                    }
                }
                Err(malformed_error!("RVA could not be converted to offset - 0x{:x}", rva))
            }
        })?;

        usize::try_from(offset)
            .map_err(|_| malformed_error!("Offset too large to fit in usize: {}", offset))
    }

    /// Converts a file offset to a module-relative address.
    ///
    /// # Errors
    ///
    /// Returns an error if the offset is not mapped at runtime.
    pub fn offset_to_rva(&self, offset: usize) -> Result<u64> {
        let offset = offset as u64;
        self.with_format(|format| match format {
            Format::Pe(pe) => {
                for section in &pe.sections {
                    let start = u64::from(section.pointer_to_raw_data);
                    let end = start + u64::from(section.size_of_raw_data);
                    if offset >= start && offset < end {
                        return Ok(u64::from(section.virtual_address) + (offset - start));
                    }
                }
                Err(malformed_error!("Offset could not be converted to RVA - 0x{:x}", offset))
            }
            Format::Elf(elf) => {
                for header in elf.program_headers.iter().filter(|h| h.p_type == PT_LOAD) {
                    let Some(end) = header.p_offset.checked_add(header.p_filesz) else {
                        return Err(malformed_error!(
                            "Segment malformed, causing integer overflow - 0x{:x} + 0x{:x}",
                            header.p_offset,
                            header.p_filesz
                        ));
                    };
                    if offset >= header.p_offset && offset < end {
                        return header.p_vaddr.checked_add(offset - header.p_offset).ok_or_else(|| {
                            malformed_error!("Segment address overflows - 0x{:x}", header.p_vaddr)
                        });
                    }
                }
                Err(malformed_error!("Offset could not be converted to RVA - 0x{:x}", offset))
            }
        })
    }
}

fn elf_symbols(symtab: &Symtab<'_>, strtab: &Strtab<'_>) -> Vec<ImageSymbol> {
    symtab
        .iter()
        .filter(|sym| sym.st_shndx != 0 && sym.st_value != 0)
        .filter(|sym| matches!(sym.st_type(), STT_FUNC | STT_OBJECT))
        .filter_map(|sym| {
            let name = strtab.get_at(sym.st_name)?;
            (!name.is_empty()).then(|| ImageSymbol {
                name: name.to_string(),
                rva: sym.st_value,
            })
        })
        .collect()
}
