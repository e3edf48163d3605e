//! Descriptors of the built-in types: primitives, standard collections and object references.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use crate::descriptor::{
    ContainerDescriptor, ContainerKind, MapDescriptor, PairDescriptor, PrimitiveDescriptor,
    QualifiedDescriptor, TypeKind,
};
use crate::math::{Color, Quat, Vec3};
use crate::name::StringId;
use crate::object_ref::{ObjPtr, ObjectId, ObjectRef, RefSlot};
use crate::registry::{Reflected, TypeBuild, TypeRegistry};
use crate::retriever::{
    BTreeMapRetriever, BTreeSetRetriever, HashMapRetriever, HashSetRetriever, TupleRetriever,
    VecRetriever,
};

macro_rules! reflect_primitive {
    ($variant:ident: $($ty:ty),* $(,)?) => {
        $(
            impl Reflected for $ty {
                fn build_descriptor(_registry: &TypeRegistry) -> TypeBuild {
                    TypeBuild::Ready {
                        name: stringify!($ty).to_owned(),
                        kind: TypeKind::$variant(PrimitiveDescriptor::of::<$ty>()),
                    }
                }
            }
        )*
    };
}

reflect_primitive!(Fundamental: bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);
reflect_primitive!(Special: String, StringId, Vec3, Quat, Color);

fn type_name(registry: &TypeRegistry, id: crate::DescriptorId) -> String {
    registry.get(id).name().to_owned()
}

impl<T: Reflected> Reflected for Vec<T> {
    fn build_descriptor(registry: &TypeRegistry) -> TypeBuild {
        let element = registry.descriptor_of::<T>();
        TypeBuild::Ready {
            name: format!("Vec<{}>", type_name(registry, element)),
            kind: TypeKind::Container(ContainerDescriptor {
                kind: ContainerKind::Array,
                element,
                retriever: Box::new(VecRetriever::<T>::default()),
            }),
        }
    }
}

impl<T: Reflected + Eq + Hash> Reflected for HashSet<T> {
    fn build_descriptor(registry: &TypeRegistry) -> TypeBuild {
        let element = registry.descriptor_of::<T>();
        TypeBuild::Ready {
            name: format!("HashSet<{}>", type_name(registry, element)),
            kind: TypeKind::Container(ContainerDescriptor {
                kind: ContainerKind::Set,
                element,
                retriever: Box::new(HashSetRetriever::<T>::default()),
            }),
        }
    }
}

impl<T: Reflected + Ord> Reflected for BTreeSet<T> {
    fn build_descriptor(registry: &TypeRegistry) -> TypeBuild {
        let element = registry.descriptor_of::<T>();
        TypeBuild::Ready {
            name: format!("BTreeSet<{}>", type_name(registry, element)),
            kind: TypeKind::Container(ContainerDescriptor {
                kind: ContainerKind::Set,
                element,
                retriever: Box::new(BTreeSetRetriever::<T>::default()),
            }),
        }
    }
}

impl<K: Reflected + Eq + Hash, V: Reflected> Reflected for HashMap<K, V> {
    fn build_descriptor(registry: &TypeRegistry) -> TypeBuild {
        let key = registry.descriptor_of::<K>();
        let value = registry.descriptor_of::<V>();
        TypeBuild::Ready {
            name: format!(
                "HashMap<{}, {}>",
                type_name(registry, key),
                type_name(registry, value)
            ),
            kind: TypeKind::Map(MapDescriptor {
                key,
                value,
                entry: registry.descriptor_of::<(K, V)>(),
                retriever: Box::new(HashMapRetriever::<K, V>::default()),
            }),
        }
    }
}

impl<K: Reflected + Ord, V: Reflected> Reflected for BTreeMap<K, V> {
    fn build_descriptor(registry: &TypeRegistry) -> TypeBuild {
        let key = registry.descriptor_of::<K>();
        let value = registry.descriptor_of::<V>();
        TypeBuild::Ready {
            name: format!(
                "BTreeMap<{}, {}>",
                type_name(registry, key),
                type_name(registry, value)
            ),
            kind: TypeKind::Map(MapDescriptor {
                key,
                value,
                entry: registry.descriptor_of::<(K, V)>(),
                retriever: Box::new(BTreeMapRetriever::<K, V>::default()),
            }),
        }
    }
}

impl<A: Reflected, B: Reflected> Reflected for (A, B) {
    fn build_descriptor(registry: &TypeRegistry) -> TypeBuild {
        let first = registry.descriptor_of::<A>();
        let second = registry.descriptor_of::<B>();
        TypeBuild::Ready {
            name: format!(
                "({}, {})",
                type_name(registry, first),
                type_name(registry, second)
            ),
            kind: TypeKind::Pair(PairDescriptor {
                first,
                second,
                retriever: Box::new(TupleRetriever::<A, B>::default()),
            }),
        }
    }
}

fn ref_get<R: RefSlot + Any>(value: &dyn Any) -> Option<Option<ObjectId>> {
    value.downcast_ref::<R>().map(RefSlot::target)
}

fn ref_set<R: RefSlot + Any>(value: &mut dyn Any, target: Option<ObjectId>) -> bool {
    match value.downcast_mut::<R>() {
        Some(slot) => {
            slot.set_target(target);
            true
        }
        None => false,
    }
}

impl<T: Reflected> Reflected for ObjPtr<T> {
    fn build_descriptor(registry: &TypeRegistry) -> TypeBuild {
        let pointee = registry.descriptor_of::<T>();
        TypeBuild::Ready {
            name: format!("ObjPtr<{}>", type_name(registry, pointee)),
            kind: TypeKind::Qualified(QualifiedDescriptor {
                pointee: Some(pointee),
                get: ref_get::<Self>,
                set: ref_set::<Self>,
            }),
        }
    }
}

impl Reflected for ObjectRef {
    fn build_descriptor(_registry: &TypeRegistry) -> TypeBuild {
        TypeBuild::Ready {
            name: "ObjectRef".to_owned(),
            kind: TypeKind::Qualified(QualifiedDescriptor {
                pointee: None,
                get: ref_get::<Self>,
                set: ref_set::<Self>,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names_nest() {
        let registry = TypeRegistry::new();
        let map = registry.descriptor::<BTreeMap<String, Vec<u32>>>();
        assert_eq!(map.name(), "BTreeMap<String, Vec<u32>>");
        assert_eq!(map.kind().label(), "map");

        let TypeKind::Map(descriptor) = map.kind() else {
            panic!("expected a map descriptor");
        };
        assert_eq!(registry.get(descriptor.entry).name(), "(String, Vec<u32>)");
    }

    #[test]
    fn test_primitive_operations() {
        let registry = TypeRegistry::new();
        let descriptor = registry.descriptor::<Vec3>();
        let TypeKind::Special(ops) = descriptor.kind() else {
            panic!("expected a special descriptor");
        };

        let from = Vec3::new(1.0, 2.0, 3.0);
        let mut to = Vec3::ZERO;
        assert!((ops.copy)(&from, &mut to));
        assert!((ops.equals)(&from, &to));
        assert!(!(ops.copy)(&from, &mut 0u32));
    }

    #[test]
    fn test_object_ref_descriptor() {
        let registry = TypeRegistry::new();
        let descriptor = registry.descriptor::<ObjectRef>();
        let TypeKind::Qualified(qualified) = descriptor.kind() else {
            panic!("expected a qualified descriptor");
        };
        assert!(qualified.pointee.is_none());

        let mut slot = ObjectRef::NULL;
        let id = ObjectId::new(1, 0);
        assert!((qualified.set)(&mut slot, Some(id)));
        assert_eq!((qualified.get)(&slot), Some(Some(id)));
    }
}
