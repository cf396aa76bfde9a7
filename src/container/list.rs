//! A view of the host's doubly-linked `std::list`.
//!
//! The host compiler decides how its list is laid out. For the targeted build the header is
//!
//! | Field | Width | Meaning |
//! |-------|-------|---------|
//! | opaque | 4 bytes | bookkeeping word of unknown meaning, preserved and never interpreted |
//! | head | host pointer | first node, or a sentinel node |
//! | length | 4 bytes, signed | number of elements |
//!
//! each field aligned to its own width, and every node is a `next` pointer, a `prev` pointer
//! and the element's bytes immediately after them.
//!
//! [`ForeignList`] reads that layout through a [`MemorySpace`] at the offsets computed by
//! [`ListLayout`]. It can navigate the list and read or overwrite element bytes in place, but
//! it never links, unlinks, allocates or frees nodes: those operations must go through the
//! host's own allocator and constructors.
//!
//! # Consistency
//!
//! A list attached with [`ForeignList::attach`] has been walked once and its shape matches
//! its recorded length: every element is visited exactly once, every `prev` link mirrors the
//! matching `next` link, and the walk returns to its start (or reaches null) after exactly
//! `length` elements. The walk never takes more than `length + 1` steps, so a corrupted list
//! surfaces as [`crate::Error::LayoutInconsistency`] instead of an endless loop.
//!
//! # Examples
//!
//! ```rust,no_run
//! use hostlink::{Address, ForeignList, ListLayout, ProcessMemory};
//!
//! # let header = Address::new(0x0BAD_F00D);
//! let mut memory = unsafe { ProcessMemory::new() };
//! let list = ForeignList::attach(&mut memory, header, ListLayout::msvc_x86())?;
//!
//! for node in list.nodes()? {
//!     let id: u32 = list.read_element(node, 0)?;
//!     println!("element {id} at {}", node.address());
//! }
//! # Ok::<(), hostlink::Error>(())
//! ```

use std::collections::HashSet;

use crate::{
    container::memory::MemorySpace,
    image::{io::HostIO, Arch},
    symbol::Address,
    Error::{InvalidAddress, NotSupported},
    Result,
};

/// Upper bound for buffers sized from a host-provided length, which may be corrupted.
const PREALLOCATED_NODES: usize = 1024;

/// How the host terminates its lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListTermination {
    /// The head is the first element, and the last element links back to it.
    Circular,
    /// The head is a sentinel node without an element. The last element links back to the
    /// sentinel. This is how MSVC and libstdc++ implement `std::list`.
    Sentinel,
    /// The head is the first element, the last element's `next` and the first element's
    /// `prev` are null.
    NullTerminated,
}

/// Byte layout of the host's list header and nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListLayout {
    pointer_width: usize,
    termination: ListTermination,
}

impl ListLayout {
    /// Create a layout for host pointers of `pointer_width` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] unless `pointer_width` is 4 or 8.
    pub fn new(pointer_width: usize, termination: ListTermination) -> Result<Self> {
        match pointer_width {
            4 | 8 => Ok(ListLayout {
                pointer_width,
                termination,
            }),
            _ => Err(NotSupported),
        }
    }

    /// Layout for a host compiled for `arch`
    #[must_use]
    pub const fn for_arch(arch: Arch, termination: ListTermination) -> Self {
        ListLayout {
            pointer_width: arch.pointer_width(),
            termination,
        }
    }

    /// 32-bit MSVC `std::list`: 4-byte pointers, sentinel head
    #[must_use]
    pub const fn msvc_x86() -> Self {
        ListLayout {
            pointer_width: 4,
            termination: ListTermination::Sentinel,
        }
    }

    /// Size of a host pointer
    #[must_use]
    pub const fn pointer_width(&self) -> usize {
        self.pointer_width
    }

    /// Termination convention
    #[must_use]
    pub const fn termination(&self) -> ListTermination {
        self.termination
    }

    /// Offset of the opaque word in the header
    #[must_use]
    pub const fn header_opaque_offset(&self) -> usize {
        0
    }

    /// Offset of the head pointer in the header
    #[must_use]
    pub const fn header_head_offset(&self) -> usize {
        align_up(4, self.pointer_width)
    }

    /// Offset of the length in the header
    #[must_use]
    pub const fn header_length_offset(&self) -> usize {
        self.header_head_offset() + self.pointer_width
    }

    /// Size of the header including trailing padding
    #[must_use]
    pub const fn header_size(&self) -> usize {
        align_up(self.header_length_offset() + 4, self.pointer_width)
    }

    /// Offset of the `next` link in a node
    #[must_use]
    pub const fn node_next_offset(&self) -> usize {
        0
    }

    /// Offset of the `prev` link in a node
    #[must_use]
    pub const fn node_prev_offset(&self) -> usize {
        self.pointer_width
    }

    /// Offset of the element bytes in a node
    #[must_use]
    pub const fn node_payload_offset(&self) -> usize {
        2 * self.pointer_width
    }
}

const fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// A node of a [`ForeignList`].
///
/// Only obtained from the list it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeRef(Address);

impl NodeRef {
    /// Address of the node's first byte
    #[must_use]
    pub fn address(self) -> Address {
        self.0
    }
}

/// A view of one host list.
///
/// The header fields are captured when the view is created; [`ForeignList::refresh`] reads
/// them again after the host had a chance to modify the list.
pub struct ForeignList<'m, M: MemorySpace> {
    memory: &'m mut M,
    header: Address,
    layout: ListLayout,
    opaque: u32,
    head: Address,
    length: i32,
}

impl<'m, M: MemorySpace> ForeignList<'m, M> {
    /// Attach to the list whose header is at `header` and verify its shape.
    ///
    /// # Errors
    /// - [`crate::Error::LayoutInconsistency`] if the list does not match its recorded length
    /// - [`crate::Error::InvalidAddress`] if the header or a node is not accessible
    pub fn attach(memory: &'m mut M, header: Address, layout: ListLayout) -> Result<Self> {
        let list = Self::attach_unchecked(memory, header, layout)?;
        list.verify()?;

        log::debug!(
            "Attached list at {} with {} elements",
            header,
            list.length()
        );
        Ok(list)
    }

    /// Attach to the list whose header is at `header` without walking it.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidAddress`] if the header is not accessible.
    pub fn attach_unchecked(memory: &'m mut M, header: Address, layout: ListLayout) -> Result<Self> {
        let mut list = ForeignList {
            memory,
            header,
            layout,
            opaque: 0,
            head: Address::NULL,
            length: 0,
        };
        list.refresh()?;
        Ok(list)
    }

    /// Read the header fields again.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidAddress`] if the header is not accessible.
    pub fn refresh(&mut self) -> Result<()> {
        let layout = self.layout;
        self.opaque = self
            .memory
            .read_value::<u32>(self.field(layout.header_opaque_offset())?)?;
        self.head = self
            .memory
            .read_pointer(self.field(layout.header_head_offset())?, layout.pointer_width())?;
        self.length = self
            .memory
            .read_value::<i32>(self.field(layout.header_length_offset())?)?;
        Ok(())
    }

    /// The header's address
    #[must_use]
    pub fn header(&self) -> Address {
        self.header
    }

    /// The layout this view uses
    #[must_use]
    pub fn layout(&self) -> &ListLayout {
        &self.layout
    }

    /// The opaque header word, exactly as the host stored it
    #[must_use]
    pub fn opaque(&self) -> u32 {
        self.opaque
    }

    /// The recorded element count, with a negative count reported as zero.
    ///
    /// Lists attached with [`ForeignList::attach`] never have a negative count.
    #[must_use]
    pub fn length(&self) -> usize {
        usize::try_from(self.length).unwrap_or(0)
    }

    /// The recorded element count as the host stored it
    #[must_use]
    pub fn raw_length(&self) -> i32 {
        self.length
    }

    /// Returns `true` if the recorded element count is zero
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// The head node: the first element, or the sentinel for sentinel-terminated lists.
    ///
    /// # Errors
    /// Never fails once the header has been read.
    pub fn head(&self) -> Result<Option<NodeRef>> {
        Ok((!self.head.is_null()).then_some(NodeRef(self.head)))
    }

    /// The node holding the first element, `None` for an empty list.
    ///
    /// # Errors
    /// Returns an error if the sentinel's link is not accessible.
    pub fn first(&self) -> Result<Option<NodeRef>> {
        if self.length <= 0 {
            return Ok(None);
        }

        match self.layout.termination() {
            ListTermination::Circular | ListTermination::NullTerminated => self.head(),
            ListTermination::Sentinel => match self.head()? {
                Some(sentinel) => self.next(sentinel),
                None => Ok(None),
            },
        }
    }

    /// The node `node` links to, `None` for a null link.
    ///
    /// # Errors
    /// Returns an error if the link is not accessible.
    pub fn next(&self, node: NodeRef) -> Result<Option<NodeRef>> {
        self.link(node, self.layout.node_next_offset())
    }

    /// The node linking to `node`, `None` for a null link.
    ///
    /// # Errors
    /// Returns an error if the link is not accessible.
    pub fn prev(&self, node: NodeRef) -> Result<Option<NodeRef>> {
        self.link(node, self.layout.node_prev_offset())
    }

    fn link(&self, node: NodeRef, offset: usize) -> Result<Option<NodeRef>> {
        let slot = offset_address(node.0, offset)?;
        let target = self.memory.read_pointer(slot, self.layout.pointer_width())?;
        Ok((!target.is_null()).then_some(NodeRef(target)))
    }

    /// Copy `size` bytes of `node`'s element.
    ///
    /// The element size is not recorded in the node; it must come from knowledge of the
    /// element type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidAddress`] for the sentinel or an inaccessible range.
    pub fn payload(&self, node: NodeRef, size: usize) -> Result<Vec<u8>> {
        let start = self.payload_address(node, 0)?;
        let mut buffer = vec![0_u8; size];
        self.memory.read(start, &mut buffer)?;
        Ok(buffer)
    }

    /// Overwrite element bytes of `node` in place, starting `offset` bytes into the element.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidAddress`] for the sentinel or an inaccessible range.
    pub fn write_payload(&mut self, node: NodeRef, offset: usize, bytes: &[u8]) -> Result<()> {
        let start = self.payload_address(node, offset)?;
        self.memory.write(start, bytes)
    }

    /// Read an integer field `offset` bytes into `node`'s element.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidAddress`] for the sentinel or an inaccessible range.
    pub fn read_element<T: HostIO>(&self, node: NodeRef, offset: usize) -> Result<T> {
        let start = self.payload_address(node, offset)?;
        self.memory.read_value(start)
    }

    /// Write an integer field `offset` bytes into `node`'s element.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidAddress`] for the sentinel or an inaccessible range.
    pub fn write_element<T: HostIO>(&mut self, node: NodeRef, offset: usize, value: T) -> Result<()> {
        let start = self.payload_address(node, offset)?;
        self.memory.write_value(start, value)
    }

    fn payload_address(&self, node: NodeRef, offset: usize) -> Result<Address> {
        if self.layout.termination() == ListTermination::Sentinel && node.0 == self.head {
            return Err(InvalidAddress {
                address: node.0,
                reason: "the sentinel node carries no element",
            });
        }

        let start = offset_address(node.0, self.layout.node_payload_offset())?;
        offset_address(start, offset)
    }

    /// Every element node in list order, after checking the list's shape.
    ///
    /// # Errors
    /// Returns [`crate::Error::LayoutInconsistency`] if the shape does not match the recorded
    /// length, or an access error.
    pub fn nodes(&self) -> Result<Vec<NodeRef>> {
        self.walk()
    }

    /// Walk the list once and check it against the recorded length.
    ///
    /// # Errors
    /// Returns [`crate::Error::LayoutInconsistency`] if the shape does not match the recorded
    /// length, or an access error.
    pub fn verify(&self) -> Result<()> {
        self.walk().map(|_| ())
    }

    fn walk(&self) -> Result<Vec<NodeRef>> {
        let Ok(expected) = usize::try_from(self.length) else {
            return Err(inconsistent_error!(
                0,
                0,
                "negative length {}",
                self.length
            ));
        };

        match self.layout.termination() {
            ListTermination::Circular => self.walk_circular(expected),
            ListTermination::Sentinel => self.walk_sentinel(expected),
            ListTermination::NullTerminated => self.walk_null_terminated(expected),
        }
    }

    fn walk_circular(&self, expected: usize) -> Result<Vec<NodeRef>> {
        let Some(head) = self.head()? else {
            if expected == 0 {
                return Ok(Vec::new());
            }
            return Err(inconsistent_error!(expected, 0, "null head"));
        };
        if expected == 0 {
            return Err(inconsistent_error!(0, 1, "empty list with a non-null head"));
        }

        let mut nodes = Vec::with_capacity(expected.min(PREALLOCATED_NODES));
        let mut seen = HashSet::with_capacity(expected.min(PREALLOCATED_NODES));
        let mut current = head;

        for step in 0..expected {
            nodes.push(current);
            seen.insert(current);

            let next = self.checked_next(current, expected, nodes.len())?;
            if step + 1 < expected {
                if next == head {
                    return Err(inconsistent_error!(
                        expected,
                        nodes.len(),
                        "returned to head after {} links",
                        step + 1
                    ));
                }
                if seen.contains(&next) {
                    return Err(inconsistent_error!(
                        expected,
                        nodes.len(),
                        "node {} visited twice",
                        next.0
                    ));
                }
            }
            current = next;
        }

        if current != head {
            return Err(inconsistent_error!(
                expected,
                expected + 1,
                "did not return to head after {} links",
                expected
            ));
        }

        Ok(nodes)
    }

    fn walk_sentinel(&self, expected: usize) -> Result<Vec<NodeRef>> {
        let Some(sentinel) = self.head()? else {
            return Err(inconsistent_error!(expected, 0, "null sentinel"));
        };

        let mut nodes = Vec::with_capacity(expected.min(PREALLOCATED_NODES));
        let mut seen = HashSet::with_capacity(expected.min(PREALLOCATED_NODES) + 1);
        seen.insert(sentinel);
        let mut current = sentinel;

        for step in 0..=expected {
            let next = self.checked_next(current, expected, nodes.len())?;
            if step < expected {
                if next == sentinel {
                    return Err(inconsistent_error!(
                        expected,
                        nodes.len(),
                        "returned to the sentinel after {} elements",
                        nodes.len()
                    ));
                }
                if !seen.insert(next) {
                    return Err(inconsistent_error!(
                        expected,
                        nodes.len(),
                        "node {} visited twice",
                        next.0
                    ));
                }
                nodes.push(next);
                current = next;
            } else if next != sentinel {
                return Err(inconsistent_error!(
                    expected,
                    expected + 1,
                    "did not return to the sentinel after {} elements",
                    expected
                ));
            }
        }

        Ok(nodes)
    }

    fn walk_null_terminated(&self, expected: usize) -> Result<Vec<NodeRef>> {
        let Some(head) = self.head()? else {
            if expected == 0 {
                return Ok(Vec::new());
            }
            return Err(inconsistent_error!(expected, 0, "null head"));
        };
        if expected == 0 {
            return Err(inconsistent_error!(0, 1, "empty list with a non-null head"));
        }
        if self.prev(head)?.is_some() {
            return Err(inconsistent_error!(expected, 0, "head has a predecessor"));
        }

        let mut nodes = Vec::with_capacity(expected.min(PREALLOCATED_NODES));
        let mut seen = HashSet::with_capacity(expected.min(PREALLOCATED_NODES));
        let mut current = head;

        for step in 0..expected {
            nodes.push(current);
            seen.insert(current);

            let next = self.next(current)?;
            match next {
                None if step + 1 < expected => {
                    return Err(inconsistent_error!(
                        expected,
                        nodes.len(),
                        "null link after {} elements",
                        nodes.len()
                    ));
                }
                None => {}
                Some(_) if step + 1 == expected => {
                    return Err(inconsistent_error!(
                        expected,
                        expected + 1,
                        "list continues past {} elements",
                        expected
                    ));
                }
                Some(next) => {
                    if seen.contains(&next) {
                        return Err(inconsistent_error!(
                            expected,
                            nodes.len(),
                            "node {} visited twice",
                            next.0
                        ));
                    }
                    self.check_back_link(current, next, expected, nodes.len())?;
                    current = next;
                }
            }
        }

        Ok(nodes)
    }

    /// Follows `next` from `node`, requiring a non-null link whose `prev` points back.
    fn checked_next(&self, node: NodeRef, expected: usize, observed: usize) -> Result<NodeRef> {
        let Some(next) = self.next(node)? else {
            return Err(inconsistent_error!(
                expected,
                observed,
                "null next link at {}",
                node.0
            ));
        };

        self.check_back_link(node, next, expected, observed)?;
        Ok(next)
    }

    fn check_back_link(&self, node: NodeRef, next: NodeRef, expected: usize, observed: usize) -> Result<()> {
        if self.prev(next)? != Some(node) {
            return Err(inconsistent_error!(
                expected,
                observed,
                "prev of {} does not point back to {}",
                next.0,
                node.0
            ));
        }
        Ok(())
    }

    fn field(&self, offset: usize) -> Result<Address> {
        offset_address(self.header, offset)
    }
}

fn offset_address(base: Address, offset: usize) -> Result<Address> {
    base.checked_add(offset).ok_or(InvalidAddress {
        address: base,
        reason: "offset wraps around the address space",
    })
}
