//! Benchmarks for foreign list traversal.
//!
//! Lists are built in an [`Arena`] in the 32-bit host layout:
//! - attaching (one verifying walk)
//! - collecting the nodes
//! - reading one field of every element

extern crate hostlink;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use hostlink::{platform::HOST_LIST_LAYOUT, Address, Arena, ForeignList, MemorySpace};
use std::hint::black_box;

/// Sentinel-headed list of `count` elements whose first field is their index.
fn build(count: usize) -> (Arena, Address) {
    let layout = HOST_LIST_LAYOUT;
    let node_size = layout.node_payload_offset() + 8;
    let mut arena = Arena::new(64 + (count + 1) * (node_size + Arena::ALIGNMENT));

    let header = arena.alloc(layout.header_size()).unwrap();
    let mut ring = vec![arena.alloc(layout.node_payload_offset()).unwrap()];
    for index in 0..count {
        let node = arena.alloc(node_size).unwrap();
        let payload = node.checked_add(layout.node_payload_offset()).unwrap();
        arena.write_value(payload, index as u32).unwrap();
        ring.push(node);
    }

    for (index, node) in ring.iter().enumerate() {
        let next = ring[(index + 1) % ring.len()];
        let prev = ring[(index + ring.len() - 1) % ring.len()];
        arena.write_pointer(*node, 4, next).unwrap();
        arena.write_pointer(node.checked_add(4).unwrap(), 4, prev).unwrap();
    }

    arena
        .write_pointer(header.checked_add(layout.header_head_offset()).unwrap(), 4, ring[0])
        .unwrap();
    arena
        .write_value(
            header.checked_add(layout.header_length_offset()).unwrap(),
            count as i32,
        )
        .unwrap();

    (arena, header)
}

fn bench_attach(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_attach");
    for count in [16, 1024, 16384] {
        let (mut arena, header) = build(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &header, |b, header| {
            b.iter(|| {
                let list = ForeignList::attach(&mut arena, black_box(*header), HOST_LIST_LAYOUT)
                    .unwrap();
                black_box(list.length())
            });
        });
    }
    group.finish();
}

fn bench_sum_elements(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_sum_elements");
    for count in [16, 1024, 16384] {
        let (mut arena, header) = build(count);
        let list = ForeignList::attach_unchecked(&mut arena, header, HOST_LIST_LAYOUT).unwrap();

        group.bench_function(BenchmarkId::from_parameter(count), |b| {
            b.iter(|| {
                let sum: u64 = list
                    .nodes()
                    .unwrap()
                    .into_iter()
                    .map(|node| u64::from(list.read_element::<u32>(node, 0).unwrap()))
                    .sum();
                black_box(sum)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_attach, bench_sum_elements);
criterion_main!(benches);
