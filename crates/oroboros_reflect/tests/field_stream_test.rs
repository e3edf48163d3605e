//! # Field Stream Verification Tests
//!
//! Verifies the generic field visitors end to end:
//!
//! 1. **Round trip**: nested structs, containers, maps, pairs, enums and flags
//! 2. **Schema tolerance**: unknown and damaged fields are skipped by their length record
//! 3. **Enum validation**: unknown values never reach the loaded object
//! 4. **Deep copy**: no storage is shared and references are remapped
//!
//! Run with: cargo test -p oroboros_reflect --test field_stream_test

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use oroboros_reflect::{
    copy_fields, read_fields, reflect_class, reflect_enum, reflect_flags, write_fields,
    ArchiveError, ArchiveReader, ArchiveWriter, Color, ObjPtr, ObjectId, ObjectRef, RawIdCodec,
    ReadOptions, StringId, TypeRegistry, Vec3,
};

// ============================================================================
// FIXTURES
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
enum Mode {
    #[default]
    Idle,
    Active,
}

reflect_enum!(Mode: u8 { Idle, Active });

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
enum WideMode {
    #[default]
    Idle,
    Active,
    Overdrive,
}

reflect_enum!(WideMode: u8 { Idle, Active, Overdrive });

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Layers(u32);

impl Layers {
    const WORLD: Self = Self(1);
    const UI: Self = Self(2);
    const DEBUG: Self = Self(4);
}

reflect_flags!(Layers: u32 { WORLD, UI });

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct WideLayers(u32);

impl WideLayers {
    const WORLD: Self = Self(1);
    const UI: Self = Self(2);
    const DEBUG: Self = Self(4);
}

reflect_flags!(WideLayers: u32 { WORLD, UI, DEBUG });

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(i16)]
enum Heading {
    #[default]
    North = 1,
    South = -1,
}

reflect_enum!(Heading: i16 { North, South });

#[derive(Debug, Default, PartialEq)]
struct Compass {
    mode: Mode,
    heading: Heading,
    layers: Layers,
}

reflect_class!(Compass {
    mode: Mode,
    heading: Heading,
    layers: Layers,
});

#[derive(Debug, Default, PartialEq)]
struct Transform {
    position: Vec3,
    scale: f32,
}

reflect_class!(Transform { position: Vec3, scale: f32 });

#[derive(Debug, Default, PartialEq)]
struct Entity {
    base: Transform,
    name: String,
    tint: Color,
    mode: Mode,
    layers: Layers,
    tags: BTreeSet<String>,
    waypoints: Vec<Transform>,
    stats: BTreeMap<String, Vec<u32>>,
    lookup: HashMap<u32, (String, i64)>,
    seen: HashSet<u64>,
    target: ObjPtr<Entity>,
    anything: ObjectRef,
}

reflect_class!(Entity: Transform => base {
    name: String,
    tint: Color,
    mode: Mode,
    layers: Layers,
    tags: BTreeSet<String>,
    waypoints: Vec<Transform>,
    stats: BTreeMap<String, Vec<u32>>,
    lookup: HashMap<u32, (String, i64)>,
    seen: HashSet<u64>,
    target: ObjPtr<Entity>,
    anything: ObjectRef,
});

/// Same field names as [`Counter`] plus one more, as written by a newer build.
#[derive(Default)]
struct CounterV2 {
    count: u32,
    label: String,
    mode: WideMode,
    layers: WideLayers,
    total: u64,
}

reflect_class!(CounterV2 {
    count: u32,
    label: String,
    mode: WideMode,
    layers: WideLayers,
    total: u64,
});

#[derive(Debug, Default)]
struct Counter {
    count: u32,
    mode: Mode,
    layers: Layers,
    total: u64,
}

reflect_class!(Counter {
    count: u32,
    mode: Mode,
    layers: Layers,
    total: u64,
});

fn sample_entity() -> Entity {
    Entity {
        base: Transform {
            position: Vec3::new(1.0, 2.0, 3.0),
            scale: 2.5,
        },
        name: "lamp".to_owned(),
        tint: Color::rgba(10, 20, 30, 255),
        mode: Mode::Active,
        layers: Layers(Layers::WORLD.0 | Layers::UI.0),
        tags: BTreeSet::from(["light".to_owned(), "static".to_owned()]),
        waypoints: vec![
            Transform {
                position: Vec3::ONE,
                scale: 1.0,
            },
            Transform {
                position: Vec3::ZERO,
                scale: 0.5,
            },
        ],
        stats: BTreeMap::from([
            ("hits".to_owned(), vec![1, 2, 3]),
            ("misses".to_owned(), Vec::new()),
        ]),
        lookup: HashMap::from([(7, ("seven".to_owned(), -7))]),
        seen: HashSet::from([11, 12]),
        target: ObjPtr::new(ObjectId::new(4, 2)),
        anything: ObjectRef::NULL,
    }
}

fn write_object<T: oroboros_reflect::Reflected>(registry: &TypeRegistry, value: &T) -> Vec<u8> {
    let mut ar = ArchiveWriter::new();
    write_fields(
        registry,
        registry.descriptor_of::<T>(),
        value,
        &mut ar,
        &RawIdCodec,
        None,
    );
    ar.finish()
}

// ============================================================================
// ROUND TRIP
// ============================================================================

#[test]
fn verify_nested_round_trip() {
    let registry = TypeRegistry::new();
    let original = sample_entity();
    let bytes = write_object(&registry, &original);

    let mut loaded = Entity::default();
    let mut reader = ArchiveReader::new(&bytes).unwrap();
    let report = read_fields(
        &registry,
        registry.descriptor_of::<Entity>(),
        &mut loaded,
        &mut reader,
        &RawIdCodec,
        &ReadOptions::default(),
    )
    .unwrap();

    assert!(report.is_clean(), "unexpected report: {report:?}");
    // Base fields count as fields of the derived class.
    assert_eq!(report.read, 13);
    assert_eq!(loaded, original);
    assert_eq!(reader.remaining(), 0);
}

#[test]
fn verify_filtered_write_only_emits_named_fields() {
    let registry = TypeRegistry::new();
    let original = sample_entity();

    let filter = BTreeSet::from([StringId::new("name"), StringId::new("scale")]);
    let mut ar = ArchiveWriter::new();
    write_fields(
        &registry,
        registry.descriptor_of::<Entity>(),
        &original,
        &mut ar,
        &RawIdCodec,
        Some(&filter),
    );
    let bytes = ar.finish();

    let mut loaded = Entity::default();
    let mut reader = ArchiveReader::new(&bytes).unwrap();
    let report = read_fields(
        &registry,
        registry.descriptor_of::<Entity>(),
        &mut loaded,
        &mut reader,
        &RawIdCodec,
        &ReadOptions::default(),
    )
    .unwrap();

    assert_eq!(report.read, 2);
    assert_eq!(loaded.name, "lamp");
    assert!((loaded.base.scale - 2.5).abs() < f32::EPSILON);
    assert!(loaded.tags.is_empty());
    assert_eq!(loaded.mode, Mode::Idle);
}

// ============================================================================
// SCHEMA TOLERANCE
// ============================================================================

#[test]
fn verify_unknown_field_is_skipped() {
    let registry = TypeRegistry::new();
    let newer = CounterV2 {
        count: 5,
        label: "removed in this build".to_owned(),
        mode: WideMode::Active,
        layers: WideLayers(WideLayers::UI.0),
        total: 99,
    };
    let bytes = write_object(&registry, &newer);

    let mut loaded = Counter::default();
    let mut reader = ArchiveReader::new(&bytes).unwrap();
    let report = read_fields(
        &registry,
        registry.descriptor_of::<Counter>(),
        &mut loaded,
        &mut reader,
        &RawIdCodec,
        &ReadOptions::default(),
    )
    .unwrap();

    assert_eq!(report.skipped, vec![StringId::new("label")]);
    assert!(report.corrupted.is_empty());
    assert_eq!(loaded.count, 5);
    assert_eq!(loaded.mode, Mode::Active);
    assert_eq!(loaded.layers, Layers(Layers::UI.0));
    // The field after the unknown one still lands.
    assert_eq!(loaded.total, 99);
}

#[test]
fn verify_damaged_field_does_not_cost_siblings() {
    let registry = TypeRegistry::new();

    let mut ar = ArchiveWriter::new();
    ar.set_custom_version(StringId::new("ObjectFieldsSerializer"), 1);
    // A u32 field whose payload was truncated to two bytes.
    ar.write(&StringId::new("count"));
    ar.write(&2u64);
    ar.write(&0xABCDu16);
    ar.write(&StringId::new("total"));
    ar.write(&8u64);
    ar.write(&42u64);
    ar.write(&StringId::INVALID);
    let bytes = ar.finish();

    let mut loaded = Counter {
        count: 3,
        ..Counter::default()
    };
    let mut reader = ArchiveReader::new(&bytes).unwrap();
    let report = read_fields(
        &registry,
        registry.descriptor_of::<Counter>(),
        &mut loaded,
        &mut reader,
        &RawIdCodec,
        &ReadOptions::default(),
    )
    .unwrap();

    assert_eq!(report.corrupted, vec![StringId::new("count")]);
    assert_eq!(report.read, 1);
    assert_eq!(loaded.count, 3);
    assert_eq!(loaded.total, 42);
}

#[test]
fn verify_out_of_range_length_stops_the_stream() {
    let registry = TypeRegistry::new();

    let mut ar = ArchiveWriter::new();
    ar.set_custom_version(StringId::new("ObjectFieldsSerializer"), 1);
    ar.write(&StringId::new("total"));
    ar.write(&u64::MAX);
    ar.write(&StringId::INVALID);
    let bytes = ar.finish();

    let mut loaded = Counter::default();
    let mut reader = ArchiveReader::new(&bytes).unwrap();
    let report = read_fields(
        &registry,
        registry.descriptor_of::<Counter>(),
        &mut loaded,
        &mut reader,
        &RawIdCodec,
        &ReadOptions::default(),
    )
    .unwrap();

    assert_eq!(report.corrupted, vec![StringId::new("total")]);
    assert_eq!(loaded.total, 0);
}

#[test]
fn verify_outdated_stream_is_rejected() {
    let registry = TypeRegistry::new();

    let mut ar = ArchiveWriter::new();
    ar.write(&StringId::INVALID);
    let bytes = ar.finish();

    let mut loaded = Counter::default();
    let mut reader = ArchiveReader::new(&bytes).unwrap();
    let result = read_fields(
        &registry,
        registry.descriptor_of::<Counter>(),
        &mut loaded,
        &mut reader,
        &RawIdCodec,
        &ReadOptions::default(),
    );

    assert!(matches!(
        result,
        Err(ArchiveError::UnsupportedVersion {
            found: 0,
            minimum: 1,
            ..
        })
    ));
}

// ============================================================================
// ENUM VALIDATION
// ============================================================================

#[test]
fn verify_unknown_enum_value_keeps_current() {
    let registry = TypeRegistry::new();
    let newer = CounterV2 {
        mode: WideMode::Overdrive,
        layers: WideLayers(WideLayers::WORLD.0 | WideLayers::DEBUG.0),
        ..CounterV2::default()
    };
    let bytes = write_object(&registry, &newer);

    let mut loaded = Counter {
        mode: Mode::Active,
        ..Counter::default()
    };
    let mut reader = ArchiveReader::new(&bytes).unwrap();
    read_fields(
        &registry,
        registry.descriptor_of::<Counter>(),
        &mut loaded,
        &mut reader,
        &RawIdCodec,
        &ReadOptions::default(),
    )
    .unwrap();

    assert_eq!(loaded.mode, Mode::Active);
    // Unknown flag bits are masked off, known ones survive.
    assert_eq!(loaded.layers, Layers::WORLD);
    assert_ne!(loaded.layers.0 & Layers::DEBUG.0, Layers::DEBUG.0);
}

#[test]
fn verify_enum_payload_uses_storage_width() {
    let registry = TypeRegistry::new();
    let compass = Compass {
        mode: Mode::Active,
        heading: Heading::South,
        layers: Layers::UI,
    };
    let bytes = write_object(&registry, &compass);
    let mut reader = ArchiveReader::new(&bytes).unwrap();

    assert_eq!(reader.read::<StringId>().unwrap(), StringId::new("mode"));
    assert_eq!(reader.read::<u64>().unwrap(), 1);
    assert_eq!(reader.read::<u8>().unwrap(), Mode::Active as u8);

    assert_eq!(reader.read::<StringId>().unwrap(), StringId::new("heading"));
    assert_eq!(reader.read::<u64>().unwrap(), 2);
    assert_eq!(reader.read::<i16>().unwrap(), -1);

    assert_eq!(reader.read::<StringId>().unwrap(), StringId::new("layers"));
    assert_eq!(reader.read::<u64>().unwrap(), 4);
    assert_eq!(reader.read::<u32>().unwrap(), Layers::UI.0);

    assert_eq!(reader.read::<StringId>().unwrap(), StringId::INVALID);
    assert_eq!(reader.remaining(), 0);

    let mut loaded = Compass::default();
    let mut reader = ArchiveReader::new(&bytes).unwrap();
    let report = read_fields(
        &registry,
        registry.descriptor_of::<Compass>(),
        &mut loaded,
        &mut reader,
        &RawIdCodec,
        &ReadOptions::default(),
    )
    .unwrap();
    assert!(report.is_clean(), "unexpected report: {report:?}");
    assert_eq!(loaded, compass);
}

// ============================================================================
// DEEP COPY
// ============================================================================

#[test]
fn verify_deep_copy_remaps_references() {
    let registry = TypeRegistry::new();
    let original = sample_entity();
    let old_target = ObjectId::new(4, 2);
    let new_target = ObjectId::new(9, 0);

    let mut copy = Entity {
        tags: BTreeSet::from(["stale".to_owned()]),
        ..Entity::default()
    };
    copy_fields(
        &registry,
        registry.descriptor_of::<Entity>(),
        &original,
        &mut copy,
        &|target: Option<ObjectId>| {
            if target == Some(old_target) {
                Some(new_target)
            } else {
                target
            }
        },
    );

    assert_eq!(copy.target.get(), Some(new_target));
    assert_eq!(copy.tags, original.tags);
    assert_eq!(copy.waypoints, original.waypoints);
    assert_eq!(copy.stats, original.stats);
    assert_eq!(copy.lookup, original.lookup);
    assert_eq!(copy.base, original.base);
}
