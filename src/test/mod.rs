//! Shared fixtures for unit tests.

use std::{collections::HashMap, path::PathBuf};

use crate::{
    container::{Arena, ListLayout, ListTermination, MemorySpace},
    image::io::HostIO,
    resolver::HostModule,
    symbol::Address,
};

/// A fake loaded module with a fixed base and a hand-written export table.
pub(crate) struct FixtureModule {
    name: String,
    base: Address,
    exports: HashMap<String, Address>,
    path: Option<PathBuf>,
}

impl FixtureModule {
    pub fn new(name: &str, base: usize) -> Self {
        FixtureModule {
            name: name.to_string(),
            base: Address::new(base),
            exports: HashMap::new(),
            path: None,
        }
    }

    pub fn with_export(mut self, name: &str, address: usize) -> Self {
        self.exports.insert(name.to_string(), Address::new(address));
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl HostModule for FixtureModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn base(&self) -> Address {
        self.base
    }

    fn export(&self, name: &str) -> Option<Address> {
        self.exports.get(name).copied()
    }

    fn path(&self) -> Option<PathBuf> {
        self.path.clone()
    }
}

/// File offset of the code segment in [`elf_fixture`] images
pub(crate) const ELF_CODE_OFFSET: usize = 0x100;
/// Link-time address of the code segment in [`elf_fixture`] images
pub(crate) const ELF_CODE_VADDR: u64 = 0x1100;

/// A minimal x86_64 ELF shared object: a read-only segment covering the headers at vaddr 0
/// and an executable segment holding `code` at [`ELF_CODE_VADDR`]. No section headers.
pub(crate) fn elf_fixture(code: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(ELF_CODE_OFFSET + code.len());

    // e_ident
    data.extend_from_slice(&[0x7F, b'E', b'L', b'F', 2, 1, 1, 0]);
    data.extend_from_slice(&[0; 8]);
    data.extend_from_slice(&3_u16.to_le_bytes()); // ET_DYN
    data.extend_from_slice(&62_u16.to_le_bytes()); // EM_X86_64
    data.extend_from_slice(&1_u32.to_le_bytes());
    data.extend_from_slice(&ELF_CODE_VADDR.to_le_bytes()); // e_entry
    data.extend_from_slice(&64_u64.to_le_bytes()); // e_phoff
    data.extend_from_slice(&0_u64.to_le_bytes()); // e_shoff
    data.extend_from_slice(&0_u32.to_le_bytes()); // e_flags
    data.extend_from_slice(&64_u16.to_le_bytes()); // e_ehsize
    data.extend_from_slice(&56_u16.to_le_bytes()); // e_phentsize
    data.extend_from_slice(&2_u16.to_le_bytes()); // e_phnum
    data.extend_from_slice(&64_u16.to_le_bytes()); // e_shentsize
    data.extend_from_slice(&0_u16.to_le_bytes()); // e_shnum
    data.extend_from_slice(&0_u16.to_le_bytes()); // e_shstrndx

    let mut program_header = |flags: u32, offset: u64, vaddr: u64, size: u64| {
        data.extend_from_slice(&1_u32.to_le_bytes()); // PT_LOAD
        data.extend_from_slice(&flags.to_le_bytes());
        data.extend_from_slice(&offset.to_le_bytes());
        data.extend_from_slice(&vaddr.to_le_bytes());
        data.extend_from_slice(&vaddr.to_le_bytes());
        data.extend_from_slice(&size.to_le_bytes());
        data.extend_from_slice(&size.to_le_bytes());
        data.extend_from_slice(&0x1000_u64.to_le_bytes());
    };
    program_header(4, 0, 0, ELF_CODE_OFFSET as u64);
    program_header(5, ELF_CODE_OFFSET as u64, ELF_CODE_VADDR, code.len() as u64);

    data.resize(ELF_CODE_OFFSET, 0);
    data.extend_from_slice(code);
    data
}

/// A host-shaped list built inside an [`Arena`].
///
/// Every node is linked correctly on construction; the `set_*` and `link` helpers corrupt it
/// on purpose.
pub(crate) struct ListFixture {
    pub arena: Arena,
    pub header: Address,
    pub nodes: Vec<Address>,
    layout: ListLayout,
}

impl ListFixture {
    pub const OPAQUE: u32 = 0xC0FF_EE01;

    /// A list whose elements are `values`
    pub fn build<T: HostIO>(layout: ListLayout, values: &[T]) -> Self {
        let mut fixture = Self::build_sized(layout, values.len(), std::mem::size_of::<T>());

        for (node, value) in fixture.nodes.iter().zip(values) {
            let payload = node.checked_add(layout.node_payload_offset()).unwrap();
            fixture.arena.write_value(payload, *value).unwrap();
        }
        fixture
    }

    /// A list of `count` zeroed elements of `payload_size` bytes each
    pub fn build_sized(layout: ListLayout, count: usize, payload_size: usize) -> Self {
        let node_size = layout.node_payload_offset() + payload_size;
        let mut arena = Arena::new(64 + (count + 1) * (node_size + Arena::ALIGNMENT));

        let header = arena.alloc(layout.header_size()).unwrap();
        let sentinel = match layout.termination() {
            ListTermination::Sentinel => Some(arena.alloc(layout.node_payload_offset()).unwrap()),
            _ => None,
        };
        let nodes: Vec<Address> = (0..count).map(|_| arena.alloc(node_size).unwrap()).collect();

        let mut fixture = ListFixture {
            arena,
            header,
            nodes,
            layout,
        };

        let head = match sentinel {
            Some(sentinel) => {
                let ring: Vec<Address> =
                    std::iter::once(sentinel).chain(fixture.nodes.iter().copied()).collect();
                for (index, node) in ring.iter().enumerate() {
                    fixture.link(*node, ring[(index + 1) % ring.len()]);
                }
                sentinel
            }
            None if layout.termination() == ListTermination::Circular => {
                let ring = fixture.nodes.clone();
                for (index, node) in ring.iter().enumerate() {
                    fixture.link(*node, ring[(index + 1) % ring.len()]);
                }
                ring.first().copied().unwrap_or(Address::NULL)
            }
            None => {
                let chain = fixture.nodes.clone();
                for pair in chain.windows(2) {
                    fixture.link(pair[0], pair[1]);
                }
                chain.first().copied().unwrap_or(Address::NULL)
            }
        };

        let width = layout.pointer_width();
        let opaque = header.checked_add(layout.header_opaque_offset()).unwrap();
        let head_slot = header.checked_add(layout.header_head_offset()).unwrap();
        fixture.arena.write_value(opaque, Self::OPAQUE).unwrap();
        fixture.arena.write_pointer(head_slot, width, head).unwrap();
        fixture.set_length(i32::try_from(count).unwrap());
        fixture
    }

    /// Point `from.next` at `to` and `to.prev` at `from`
    pub fn link(&mut self, from: Address, to: Address) {
        self.set_next(from, to);
        self.set_prev(to, from);
    }

    pub fn set_next(&mut self, node: Address, target: Address) {
        let slot = node.checked_add(self.layout.node_next_offset()).unwrap();
        self.arena
            .write_pointer(slot, self.layout.pointer_width(), target)
            .unwrap();
    }

    pub fn set_prev(&mut self, node: Address, target: Address) {
        let slot = node.checked_add(self.layout.node_prev_offset()).unwrap();
        self.arena
            .write_pointer(slot, self.layout.pointer_width(), target)
            .unwrap();
    }

    pub fn set_length(&mut self, length: i32) {
        let slot = self
            .header
            .checked_add(self.layout.header_length_offset())
            .unwrap();
        self.arena.write_value(slot, length).unwrap();
    }
}
