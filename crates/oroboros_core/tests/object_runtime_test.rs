//! # Object Runtime Verification Tests
//!
//! Verifies the object runtime end to end:
//!
//! 1. **Storage**: pool hysteresis through the runtime and pending garbage resolution
//! 2. **Readers**: queries from several threads while the main thread mutates
//! 3. **Deep copy**: internal references follow the copy, external ones stay
//! 4. **Prefabs**: overrides propagate and survive a snapshot round trip
//! 5. **Schema drift**: unknown classes drop their subtree, siblings still load
//!
//! Run with: cargo test -p oroboros_core --test object_runtime_test

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use oroboros_core::{
    duplicate_object, find_object_references, load_snapshot, save_snapshot, CoreObjects,
    DuplicateOptions, HandleState, MutationPermit, ObjectClass, ObjectFlags, ObjectId,
    ObjectTemplate, Prefab, RuntimeConfig, TraversalMode,
};
use oroboros_reflect::{reflect_class, ObjPtr, ObjectRef, StringId, TypeRegistry, Vec3};

// ============================================================================
// FIXTURES
// ============================================================================

#[derive(Default, Debug, Clone, PartialEq)]
struct Bulb {
    watts: u32,
}

reflect_class!(Bulb { watts: u32 });

impl ObjectClass for Bulb {}

/// Creates its bulb on construction.
#[derive(Default, Debug, Clone, PartialEq)]
struct Lamp {
    position: Vec3,
    bulb: ObjPtr<Bulb>,
    switch: ObjectRef,
    tags: Vec<String>,
}

reflect_class!(Lamp {
    position: Vec3,
    bulb: ObjPtr<Bulb>,
    switch: ObjectRef,
    tags: Vec<String>,
});

impl ObjectClass for Lamp {
    fn constructed(objects: &CoreObjects, permit: &MutationPermit, this: ObjectId) {
        if let Ok(bulb) = objects.create::<Bulb>(permit, "Bulb", Some(this)) {
            objects.modify::<Lamp, _>(permit, this, |lamp| lamp.bulb = ObjPtr::new(bulb));
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
struct Switch {
    target: ObjectRef,
}

reflect_class!(Switch { target: ObjectRef });

impl ObjectClass for Switch {}

fn runtime_with(config: RuntimeConfig) -> CoreObjects {
    let objects = CoreObjects::with_config(Arc::new(TypeRegistry::new()), config);
    let permit = objects.mutation_permit();
    objects.register_class::<Bulb>(&permit);
    objects.register_class::<Lamp>(&permit);
    objects.register_class::<Switch>(&permit);
    objects
}

fn runtime() -> CoreObjects {
    runtime_with(RuntimeConfig::default())
}

// ============================================================================
// STORAGE
// ============================================================================

#[test]
fn verify_pool_hysteresis_through_runtime() {
    let config = RuntimeConfig::from_toml_str("[gc]\ncollect_on_destroy = true\n").unwrap();
    let objects = runtime_with(config);
    let permit = objects.mutation_permit();
    let class = objects.types().descriptor_of::<Bulb>();

    let bulbs: Vec<ObjectId> = (0..130)
        .map(|i| objects.create::<Bulb>(&permit, &format!("Bulb{i}"), None).unwrap())
        .collect();
    assert_eq!(objects.storage_usage(class), Some((130, 3)));

    let in_pool = |pool: usize| -> Vec<ObjectId> {
        bulbs
            .iter()
            .copied()
            .filter(|&id| objects.db().handle_of(id).is_some_and(|handle| handle.alloc.pool() == pool))
            .collect()
    };
    let (first, second) = (in_pool(0), in_pool(1));
    assert_eq!((first.len(), second.len()), (64, 64));

    for id in first {
        objects.destroy_object(&permit, id);
    }
    // The first empty pool is kept.
    assert_eq!(objects.storage_usage(class), Some((66, 3)));

    for id in second {
        objects.destroy_object(&permit, id);
    }
    assert_eq!(objects.storage_usage(class), Some((2, 1)));
    assert!(objects.is_valid(bulbs[129]));
}

#[test]
fn verify_pending_gc_resolution() {
    let objects = runtime();
    let permit = objects.mutation_permit();
    let lamp = objects.create::<Lamp>(&permit, "Lamp", None).unwrap();
    let bulb = objects.find("Lamp:Bulb").unwrap();
    let handle = objects.db().handle_of(bulb).unwrap();
    assert_eq!(objects.resolve_handle(handle), HandleState::Live(bulb));

    assert_eq!(objects.destroy_object(&permit, lamp), 2);
    assert!(!objects.is_valid(bulb));
    assert_eq!(objects.resolve_handle(handle), HandleState::PendingGc);
    assert_eq!(objects.pending_gc_count(), 2);

    assert_eq!(objects.collect_garbage(&permit), 2);
    assert_eq!(objects.resolve_handle(handle), HandleState::Invalid);
}

// ============================================================================
// READERS
// ============================================================================

#[test]
fn verify_concurrent_readers() {
    let objects = runtime();
    let permit = objects.mutation_permit();
    let room = objects.create::<Bulb>(&permit, "Room", None).unwrap();
    for i in 0..16 {
        let lamp = objects.create::<Lamp>(&permit, &format!("Lamp{i}"), Some(room)).unwrap();
        objects.modify::<Lamp, _>(&permit, lamp, |lamp| lamp.tags.push(format!("lamp-{i}")));
    }

    thread::scope(|scope| {
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let objects = &objects;
                scope.spawn(move || {
                    let mut seen = 0;
                    for _ in 0..200 {
                        for lamp in objects.children(room) {
                            let path = objects.full_path(lamp).unwrap_or_default();
                            if objects.find(&path) == Some(lamp) {
                                seen += 1;
                            }
                            let tags = objects.read::<Lamp, _>(lamp, |lamp| lamp.tags.len());
                            assert!(tags.unwrap_or(0) <= 1);
                        }
                        assert!(objects.find("Room:Lamp0.Bulb").is_some());
                    }
                    seen
                })
            })
            .collect();

        for round in 0..50 {
            let spare = objects
                .create::<Lamp>(&permit, &format!("Spare{round}"), Some(room))
                .unwrap();
            objects.destroy_object(&permit, spare);
        }

        for reader in readers {
            assert!(reader.join().unwrap() >= 200 * 16);
        }
    });

    assert_eq!(objects.children(room).len(), 16);
    assert_eq!(objects.collect_garbage(&permit), 100);
}

// ============================================================================
// DEEP COPY
// ============================================================================

#[test]
fn verify_duplicate_preserves_graph() {
    let objects = runtime();
    let permit = objects.mutation_permit();
    let outside = objects.create::<Bulb>(&permit, "Outside", None).unwrap();
    let lamp = objects.create::<Lamp>(&permit, "Lamp", None).unwrap();
    let switch = objects.create::<Switch>(&permit, "Switch", Some(lamp)).unwrap();
    let bulb = objects.find("Lamp:Bulb").unwrap();
    objects.modify::<Lamp, _>(&permit, lamp, |lamp| {
        lamp.position = Vec3::new(1.0, 2.0, 3.0);
        lamp.switch = ObjectRef::new(switch);
        lamp.tags = vec!["desk".to_owned()];
    });
    objects.modify::<Switch, _>(&permit, switch, |switch| switch.target = ObjectRef::new(outside));

    let copy = duplicate_object(&objects, &permit, lamp, &DuplicateOptions::default()).unwrap();
    assert_eq!(objects.full_path(copy).as_deref(), Some("Lamp_1"));
    let copy_bulb = objects.find("Lamp_1:Bulb").unwrap();
    let copy_switch = objects.find("Lamp_1:Switch").unwrap();

    let copied = objects.read::<Lamp, _>(copy, Clone::clone).unwrap();
    assert_eq!(copied.position, Vec3::new(1.0, 2.0, 3.0));
    assert_eq!(copied.bulb.get(), Some(copy_bulb));
    assert_eq!(copied.switch.get(), Some(copy_switch));
    assert_eq!(copied.tags, vec!["desk".to_owned()]);
    assert_eq!(
        objects.read::<Switch, _>(copy_switch, |switch| switch.target.get()),
        Some(Some(outside))
    );
    assert!(objects.flags(copy).unwrap().contains(ObjectFlags::ROOT_OBJECT));

    // Nothing in the copy points back into the source tree.
    let source_tree: HashSet<ObjectId> = [lamp, bulb, switch].into_iter().collect();
    assert!(find_object_references(&objects, copy, &source_tree, TraversalMode::EntireObjectTree).is_empty());
}

// ============================================================================
// PREFABS
// ============================================================================

struct PrefabScene {
    objects: CoreObjects,
    base: ObjectId,
    lamp: ObjectId,
    switch: ObjectId,
}

/// `Base` prefab: a `Lamp` root component and a `Switch` component targeting it.
fn prefab_scene() -> PrefabScene {
    let objects = runtime();
    let permit = objects.mutation_permit();
    let lamp_class = objects.types().descriptor_of::<Lamp>();
    let switch_class = objects.types().descriptor_of::<Switch>();
    let library = objects.create::<Bulb>(&permit, "Library", None).unwrap();
    let base = Prefab::create(&objects, &permit, lamp_class, "Base", Some(library)).unwrap();
    let lamp = Prefab::add_component(&objects, &permit, base, lamp_class, "Light").unwrap();
    let switch = Prefab::add_component(&objects, &permit, base, switch_class, "Toggle").unwrap();

    let lamp_instance = ObjectTemplate::instance(&objects, lamp).unwrap();
    let switch_instance = ObjectTemplate::instance(&objects, switch).unwrap();
    objects.modify::<Switch, _>(&permit, switch_instance, |switch| {
        switch.target = ObjectRef::new(lamp_instance);
    });
    Prefab::on_component_field_modified(&objects, &permit, base, switch, switch_instance, StringId::new("target"))
        .unwrap();
    drop(permit);
    PrefabScene { objects, base, lamp, switch }
}

fn switch_target(objects: &CoreObjects, template: ObjectId) -> Option<ObjectId> {
    let instance = ObjectTemplate::instance(objects, template)?;
    objects.read::<Switch, _>(instance, |switch| switch.target.get()).flatten()
}

#[test]
fn verify_override_propagation_chain() {
    let PrefabScene { objects, base, lamp, switch } = prefab_scene();
    let permit = objects.mutation_permit();
    let derived = Prefab::create_derived(&objects, &permit, base, "Derived", None).unwrap();
    let leaf = Prefab::create_derived(&objects, &permit, derived, "Leaf", None).unwrap();

    // Overriding the lamp drags the switch along, on every level that overrides it.
    let derived_lamp = Prefab::modify_component(&objects, &permit, derived, lamp).unwrap();
    let derived_switch = Prefab::effective_template(&objects, derived, switch).unwrap();
    assert_ne!(derived_switch, switch);
    assert_eq!(switch_target(&objects, derived_switch), ObjectTemplate::instance(&objects, derived_lamp));

    // The leaf was derived before the override; its records still point at the base.
    assert_eq!(Prefab::effective_template(&objects, leaf, lamp), Some(lamp));
    let leaf_lamp = Prefab::modify_component(&objects, &permit, leaf, lamp).unwrap();
    let leaf_switch = Prefab::effective_template(&objects, leaf, switch).unwrap();
    assert_eq!(switch_target(&objects, leaf_switch), ObjectTemplate::instance(&objects, leaf_lamp));
    assert_eq!(Prefab::root_component(&objects, leaf), Some(leaf_lamp));
    assert_eq!(Prefab::attached_to(&objects, leaf, leaf_switch), Some(leaf_lamp));

    // Templates keep their parent's values until edited.
    let leaf_instance = ObjectTemplate::instance(&objects, leaf_lamp).unwrap();
    objects.modify::<Lamp, _>(&permit, leaf_instance, |lamp| lamp.tags.push("leaf".to_owned()));
    Prefab::on_component_field_modified(&objects, &permit, leaf, leaf_lamp, leaf_instance, StringId::new("tags"))
        .unwrap();
    assert!(ObjectTemplate::is_field_modified(&objects, leaf_lamp, "", StringId::new("tags")));
    assert!(!ObjectTemplate::is_field_modified(&objects, derived_lamp, "", StringId::new("tags")));
}

#[test]
fn verify_prefab_snapshot_round_trip() {
    let PrefabScene { objects, base, switch, .. } = prefab_scene();
    let permit = objects.mutation_permit();
    let bytes = save_snapshot(&objects, base).unwrap();

    let copies = objects.create::<Bulb>(&permit, "Copies", None).unwrap();
    let load = load_snapshot(&objects, &permit, &bytes, Some(copies)).unwrap();
    assert!(load.dropped.is_empty());
    assert!(load.unresolved_refs.is_empty());
    assert_eq!(load.template_loads.len(), 3);

    let loaded = load.root.unwrap();
    assert_eq!(objects.full_path(loaded).as_deref(), Some("Copies:Base"));
    let components = Prefab::effective_components(&objects, loaded);
    assert_eq!(components.len(), 2);
    let loaded_lamp = objects.find("Copies:Base.Light").unwrap();
    let loaded_switch = objects.find("Copies:Base.Toggle").unwrap();
    assert_eq!(components, vec![loaded_lamp, loaded_switch]);
    assert_ne!(loaded_switch, switch);
    assert_eq!(Prefab::root_component(&objects, loaded), Some(loaded_lamp));
    assert_eq!(Prefab::attached_to(&objects, loaded, loaded_switch), Some(loaded_lamp));

    // The delta travelled with the template and was rewired into the loaded tree.
    assert_eq!(switch_target(&objects, loaded_switch), ObjectTemplate::instance(&objects, loaded_lamp));
    assert!(ObjectTemplate::is_field_modified(&objects, loaded_switch, "", StringId::new("target")));
}

// ============================================================================
// SCHEMA DRIFT
// ============================================================================

#[test]
fn verify_unknown_class_drops_subtree() {
    let writer = runtime();
    let permit = writer.mutation_permit();
    let room = writer.create::<Bulb>(&permit, "Room", None).unwrap();
    writer.modify::<Bulb, _>(&permit, room, |bulb| bulb.watts = 60);
    let lamp = writer.create::<Lamp>(&permit, "Lamp", Some(room)).unwrap();
    writer.create::<Bulb>(&permit, "Spare", Some(lamp)).unwrap();
    writer.create::<Switch>(&permit, "Switch", Some(room)).unwrap();
    let bytes = save_snapshot(&writer, room).unwrap();

    // The reader knows bulbs and switches but not lamps.
    let reader = CoreObjects::new(Arc::new(TypeRegistry::new()));
    reader.register_class::<Bulb>(&permit_of(&reader));
    reader.register_class::<Switch>(&permit_of(&reader));
    let load = load_snapshot(&reader, &permit_of(&reader), &bytes, None).unwrap();

    let root = load.root.unwrap();
    assert_eq!(reader.read::<Bulb, _>(root, |bulb| bulb.watts), Some(60));
    assert!(reader.find("Room:Switch").is_some());
    assert!(reader.find("Room:Lamp").is_none());
    let dropped: HashSet<&str> = load.dropped.iter().map(String::as_str).collect();
    assert_eq!(dropped, HashSet::from(["Lamp", "Lamp.Bulb", "Lamp.Spare"]));
}

fn permit_of(objects: &CoreObjects) -> MutationPermit {
    objects.mutation_permit()
}
