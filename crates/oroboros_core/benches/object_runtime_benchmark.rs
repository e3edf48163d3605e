//! # Object Runtime Benchmark
//!
//! Measures the operations editors hit hardest:
//! - slot allocation and release across pool boundaries
//! - object creation with a default subobject
//! - path lookups from reader threads
//! - whole-tree duplication and snapshot save
//!
//! Run with: `cargo bench --package oroboros_core`

// Benchmarks don't need docs
#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use oroboros_core::{
    duplicate_object, save_snapshot, CoreObjects, DuplicateOptions, MutationPermit, ObjectClass,
    ObjectId, SlotAllocator,
};
use oroboros_reflect::{reflect_class, ObjPtr, ObjectRef, TypeRegistry, Vec3};

#[derive(Default, Clone)]
struct Socket {
    voltage: f32,
}

reflect_class!(Socket { voltage: f32 });

impl ObjectClass for Socket {}

#[derive(Default, Clone)]
struct Fixture {
    position: Vec3,
    socket: ObjPtr<Socket>,
    neighbour: ObjectRef,
    labels: Vec<String>,
}

reflect_class!(Fixture {
    position: Vec3,
    socket: ObjPtr<Socket>,
    neighbour: ObjectRef,
    labels: Vec<String>,
});

impl ObjectClass for Fixture {
    fn constructed(objects: &CoreObjects, permit: &MutationPermit, this: ObjectId) {
        if let Ok(socket) = objects.create::<Socket>(permit, "Socket", Some(this)) {
            objects.modify::<Fixture, _>(permit, this, |fixture| fixture.socket = ObjPtr::new(socket));
        }
    }
}

fn runtime() -> CoreObjects {
    let objects = CoreObjects::new(Arc::new(TypeRegistry::new()));
    let permit = objects.mutation_permit();
    objects.register_class::<Socket>(&permit);
    objects.register_class::<Fixture>(&permit);
    objects
}

/// A root with `count` fixtures, each pointing at the previous one.
fn populate(objects: &CoreObjects, permit: &MutationPermit, count: usize) -> ObjectId {
    let room = objects.create::<Socket>(permit, "Room", None).unwrap();
    let mut previous = None;
    for i in 0..count {
        let fixture = objects
            .create::<Fixture>(permit, &format!("Fixture{i}"), Some(room))
            .unwrap();
        objects.modify::<Fixture, _>(permit, fixture, |value| {
            value.neighbour = ObjectRef::from(previous);
            value.labels = vec![format!("fixture-{i}")];
        });
        previous = Some(fixture);
    }
    room
}

fn bench_slot_allocator(c: &mut Criterion) {
    c.bench_function("slot_allocator_churn_130", |b| {
        let mut allocator: SlotAllocator<u64> = SlotAllocator::new();
        b.iter(|| {
            let handles: Vec<_> = (0..130).map(|i| allocator.allocate(i)).collect();
            for idx in handles {
                black_box(allocator.free(idx));
            }
        });
    });
}

fn bench_create_destroy(c: &mut Criterion) {
    let mut group = c.benchmark_group("create_destroy");
    for count in [64usize, 1_024] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let objects = runtime();
            let permit = objects.mutation_permit();
            b.iter(|| {
                let room = populate(&objects, &permit, count);
                objects.destroy_object(&permit, room);
                objects.collect_garbage(&permit)
            });
        });
    }
    group.finish();
}

fn bench_path_lookup(c: &mut Criterion) {
    let objects = runtime();
    let permit = objects.mutation_permit();
    populate(&objects, &permit, 1_024);
    c.bench_function("find_by_path_1024", |b| {
        b.iter(|| {
            for i in (0..1_024).step_by(64) {
                black_box(objects.find(&format!("Room:Fixture{i}.Socket")));
            }
        });
    });
}

fn bench_duplicate_and_save(c: &mut Criterion) {
    let objects = runtime();
    let permit = objects.mutation_permit();
    let room = populate(&objects, &permit, 256);

    c.bench_function("duplicate_tree_256", |b| {
        b.iter(|| {
            let copy = duplicate_object(&objects, &permit, room, &DuplicateOptions::default()).unwrap();
            objects.destroy_object(&permit, copy);
            objects.collect_garbage(&permit)
        });
    });

    c.bench_function("save_snapshot_256", |b| {
        b.iter(|| black_box(save_snapshot(&objects, room).unwrap().len()));
    });
}

criterion_group!(
    benches,
    bench_slot_allocator,
    bench_create_destroy,
    bench_path_lookup,
    bench_duplicate_and_save
);
criterion_main!(benches);
