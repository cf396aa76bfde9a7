//! Foreign list views over host-shaped memory, built byte by byte the way the host's compiler
//! lays them out.

use hostlink::prelude::*;
use hostlink::{platform::HOST_LIST_LAYOUT, Arch, Arena};

/// Sentinel-headed list of `u32` elements in the 32-bit host layout.
fn host_list(arena: &mut Arena, values: &[u32]) -> Address {
    let layout = HOST_LIST_LAYOUT;
    let header = arena.alloc(layout.header_size()).unwrap();
    let sentinel = arena.alloc(layout.node_payload_offset()).unwrap();

    let mut ring = vec![sentinel];
    for value in values {
        let node = arena.alloc(layout.node_payload_offset() + 4).unwrap();
        arena
            .write_value(node.checked_add(layout.node_payload_offset()).unwrap(), *value)
            .unwrap();
        ring.push(node);
    }

    for (index, node) in ring.iter().enumerate() {
        let next = ring[(index + 1) % ring.len()];
        let prev = ring[(index + ring.len() - 1) % ring.len()];
        arena.write_pointer(*node, 4, next).unwrap();
        arena
            .write_pointer(node.checked_add(4).unwrap(), 4, prev)
            .unwrap();
    }

    arena.write_value(header, 0x0000_0001_u32).unwrap();
    arena
        .write_pointer(header.checked_add(4).unwrap(), 4, sentinel)
        .unwrap();
    arena
        .write_value(header.checked_add(8).unwrap(), i32::try_from(values.len()).unwrap())
        .unwrap();
    header
}

#[test]
fn host_layout_traversal() {
    let mut arena = Arena::new(4096);
    let header = host_list(&mut arena, &[10, 20, 30, 40]);

    let list = ForeignList::attach(&mut arena, header, HOST_LIST_LAYOUT).unwrap();
    assert_eq!(list.length(), 4);
    assert_eq!(list.opaque(), 1);

    let values: Vec<u32> = list
        .nodes()
        .unwrap()
        .into_iter()
        .map(|node| list.read_element(node, 0).unwrap())
        .collect();
    assert_eq!(values, [10, 20, 30, 40]);

    let first = list.first().unwrap().unwrap();
    let second = list.next(first).unwrap().unwrap();
    assert_eq!(list.prev(second).unwrap(), Some(first));
    assert_eq!(list.prev(first).unwrap(), list.head().unwrap());
}

#[test]
fn in_place_update() {
    let mut arena = Arena::new(4096);
    let header = host_list(&mut arena, &[1, 2, 3]);

    let mut list = ForeignList::attach(&mut arena, header, HOST_LIST_LAYOUT).unwrap();
    for node in list.nodes().unwrap() {
        let value: u32 = list.read_element(node, 0).unwrap();
        list.write_element(node, 0, value * 100).unwrap();
    }

    let values: Vec<u32> = list
        .nodes()
        .unwrap()
        .into_iter()
        .map(|node| list.read_element(node, 0).unwrap())
        .collect();
    assert_eq!(values, [100, 200, 300]);
    assert_eq!(list.opaque(), 1);
}

#[test]
fn corrupted_length_is_detected() {
    let mut arena = Arena::new(4096);
    let header = host_list(&mut arena, &[1, 2, 3]);
    arena
        .write_value(header.checked_add(8).unwrap(), 7_i32)
        .unwrap();

    match ForeignList::attach(&mut arena, header, HOST_LIST_LAYOUT) {
        Err(Error::LayoutInconsistency { expected, .. }) => assert_eq!(expected, 7),
        other => panic!("Expected LayoutInconsistency, got {:?}", other.err()),
    }
}

#[test]
fn live_process_list() {
    // A circular list of native-width nodes in this process' own heap.
    let layout = ListLayout::for_arch(Arch::CURRENT, ListTermination::Circular);
    let width = layout.pointer_width();
    let node_size = layout.node_payload_offset() + 8;

    let mut nodes: Vec<Box<[u8]>> = (0..3).map(|_| vec![0_u8; node_size].into_boxed_slice()).collect();
    let mut header = vec![0_u8; layout.header_size()].into_boxed_slice();
    let addresses: Vec<Address> = nodes
        .iter_mut()
        .map(|node| Address::from_ptr(node.as_mut_ptr().cast_const()))
        .collect();
    let header_address = Address::from_ptr(header.as_mut_ptr().cast_const());

    let mut memory = unsafe { ProcessMemory::new() };
    for (index, node) in addresses.iter().enumerate() {
        let next = addresses[(index + 1) % addresses.len()];
        let prev = addresses[(index + addresses.len() - 1) % addresses.len()];
        memory.write_pointer(*node, width, next).unwrap();
        memory
            .write_pointer(node.checked_add(width).unwrap(), width, prev)
            .unwrap();
        memory
            .write_value(
                node.checked_add(layout.node_payload_offset()).unwrap(),
                0xAA00_u64 + index as u64,
            )
            .unwrap();
    }
    memory
        .write_pointer(
            header_address.checked_add(layout.header_head_offset()).unwrap(),
            width,
            addresses[0],
        )
        .unwrap();
    memory
        .write_value(
            header_address.checked_add(layout.header_length_offset()).unwrap(),
            3_i32,
        )
        .unwrap();

    let list = ForeignList::attach(&mut memory, header_address, layout).unwrap();
    let visited: Vec<Address> = list.nodes().unwrap().iter().map(|node| node.address()).collect();
    assert_eq!(visited, addresses);

    let last = list.nodes().unwrap()[2];
    assert_eq!(list.read_element::<u64>(last, 0).unwrap(), 0xAA02);
    assert_eq!(list.payload(last, 8).unwrap(), 0xAA02_u64.to_le_bytes());

    drop(list);
    drop(nodes);
    drop(header);
}
