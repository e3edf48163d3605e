//! # Retrievers
//!
//! Type-erased access to concrete containers, maps and pairs. A descriptor owns one retriever
//! per concrete container type; visitors never name the Rust collection they are walking.
//!
//! Elements are moved in and out as `Box<dyn Any>`. A visitor that needs to mutate elements in
//! place (reference replacement) drains the container, edits the drained values and adds them
//! back, which works the same for ordered and hashed collections.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::marker::PhantomData;

/// Generic access to an array or set.
pub trait ContainerRetriever: Send + Sync {
    /// Number of elements.
    fn size(&self, container: &dyn Any) -> usize;
    /// Removes every element.
    fn clear(&self, container: &mut dyn Any);
    /// Default-constructs a scratch element.
    fn construct(&self) -> Box<dyn Any>;
    /// Moves `element` into the container. Returns false on a type mismatch.
    fn add(&self, container: &mut dyn Any, element: Box<dyn Any>) -> bool;
    /// Iterates the elements.
    fn iter<'a>(&self, container: &'a dyn Any) -> Box<dyn Iterator<Item = &'a dyn Any> + 'a>;
    /// Takes every element out, leaving the container empty.
    fn drain(&self, container: &mut dyn Any) -> Vec<Box<dyn Any>>;
}

/// Generic access to a key/value map.
pub trait MapRetriever: Send + Sync {
    /// Number of entries.
    fn size(&self, map: &dyn Any) -> usize;
    /// Removes every entry.
    fn clear(&self, map: &mut dyn Any);
    /// Default-constructs a scratch `(key, value)` entry.
    fn construct_entry(&self) -> Box<dyn Any>;
    /// Moves a `(key, value)` entry into the map. Returns false on a type mismatch.
    fn add_entry(&self, map: &mut dyn Any, entry: Box<dyn Any>) -> bool;
    /// Iterates the entries.
    fn iter<'a>(
        &self,
        map: &'a dyn Any,
    ) -> Box<dyn Iterator<Item = (&'a dyn Any, &'a dyn Any)> + 'a>;
    /// Takes every entry out as boxed `(key, value)` tuples.
    fn drain(&self, map: &mut dyn Any) -> Vec<Box<dyn Any>>;
}

/// Generic access to a two-element tuple.
pub trait PairRetriever: Send + Sync {
    /// First element.
    fn first<'a>(&self, pair: &'a dyn Any) -> Option<&'a dyn Any>;
    /// First element, mutably.
    fn first_mut<'a>(&self, pair: &'a mut dyn Any) -> Option<&'a mut dyn Any>;
    /// Second element.
    fn second<'a>(&self, pair: &'a dyn Any) -> Option<&'a dyn Any>;
    /// Second element, mutably.
    fn second_mut<'a>(&self, pair: &'a mut dyn Any) -> Option<&'a mut dyn Any>;
}

/// Retriever of `Vec<T>`.
pub struct VecRetriever<T>(PhantomData<fn() -> T>);

impl<T> Default for VecRetriever<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: Any + Default> ContainerRetriever for VecRetriever<T> {
    fn size(&self, container: &dyn Any) -> usize {
        container.downcast_ref::<Vec<T>>().map_or(0, Vec::len)
    }

    fn clear(&self, container: &mut dyn Any) {
        if let Some(vec) = container.downcast_mut::<Vec<T>>() {
            vec.clear();
        }
    }

    fn construct(&self) -> Box<dyn Any> {
        Box::new(T::default())
    }

    fn add(&self, container: &mut dyn Any, element: Box<dyn Any>) -> bool {
        match (container.downcast_mut::<Vec<T>>(), element.downcast::<T>()) {
            (Some(vec), Ok(element)) => {
                vec.push(*element);
                true
            }
            _ => false,
        }
    }

    fn iter<'a>(&self, container: &'a dyn Any) -> Box<dyn Iterator<Item = &'a dyn Any> + 'a> {
        match container.downcast_ref::<Vec<T>>() {
            Some(vec) => Box::new(vec.iter().map(|element| element as &dyn Any)),
            None => Box::new(std::iter::empty()),
        }
    }

    fn drain(&self, container: &mut dyn Any) -> Vec<Box<dyn Any>> {
        container.downcast_mut::<Vec<T>>().map_or_else(Vec::new, |vec| {
            vec.drain(..)
                .map(|element| Box::new(element) as Box<dyn Any>)
                .collect()
        })
    }
}

/// Retriever of `HashSet<T>`.
pub struct HashSetRetriever<T>(PhantomData<fn() -> T>);

impl<T> Default for HashSetRetriever<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: Any + Default + Eq + Hash> ContainerRetriever for HashSetRetriever<T> {
    fn size(&self, container: &dyn Any) -> usize {
        container.downcast_ref::<HashSet<T>>().map_or(0, HashSet::len)
    }

    fn clear(&self, container: &mut dyn Any) {
        if let Some(set) = container.downcast_mut::<HashSet<T>>() {
            set.clear();
        }
    }

    fn construct(&self) -> Box<dyn Any> {
        Box::new(T::default())
    }

    fn add(&self, container: &mut dyn Any, element: Box<dyn Any>) -> bool {
        match (container.downcast_mut::<HashSet<T>>(), element.downcast::<T>()) {
            (Some(set), Ok(element)) => {
                set.insert(*element);
                true
            }
            _ => false,
        }
    }

    fn iter<'a>(&self, container: &'a dyn Any) -> Box<dyn Iterator<Item = &'a dyn Any> + 'a> {
        match container.downcast_ref::<HashSet<T>>() {
            Some(set) => Box::new(set.iter().map(|element| element as &dyn Any)),
            None => Box::new(std::iter::empty()),
        }
    }

    fn drain(&self, container: &mut dyn Any) -> Vec<Box<dyn Any>> {
        container
            .downcast_mut::<HashSet<T>>()
            .map_or_else(Vec::new, |set| {
                set.drain()
                    .map(|element| Box::new(element) as Box<dyn Any>)
                    .collect()
            })
    }
}

/// Retriever of `BTreeSet<T>`.
pub struct BTreeSetRetriever<T>(PhantomData<fn() -> T>);

impl<T> Default for BTreeSetRetriever<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: Any + Default + Ord> ContainerRetriever for BTreeSetRetriever<T> {
    fn size(&self, container: &dyn Any) -> usize {
        container.downcast_ref::<BTreeSet<T>>().map_or(0, BTreeSet::len)
    }

    fn clear(&self, container: &mut dyn Any) {
        if let Some(set) = container.downcast_mut::<BTreeSet<T>>() {
            set.clear();
        }
    }

    fn construct(&self) -> Box<dyn Any> {
        Box::new(T::default())
    }

    fn add(&self, container: &mut dyn Any, element: Box<dyn Any>) -> bool {
        match (container.downcast_mut::<BTreeSet<T>>(), element.downcast::<T>()) {
            (Some(set), Ok(element)) => {
                set.insert(*element);
                true
            }
            _ => false,
        }
    }

    fn iter<'a>(&self, container: &'a dyn Any) -> Box<dyn Iterator<Item = &'a dyn Any> + 'a> {
        match container.downcast_ref::<BTreeSet<T>>() {
            Some(set) => Box::new(set.iter().map(|element| element as &dyn Any)),
            None => Box::new(std::iter::empty()),
        }
    }

    fn drain(&self, container: &mut dyn Any) -> Vec<Box<dyn Any>> {
        container
            .downcast_mut::<BTreeSet<T>>()
            .map_or_else(Vec::new, |set| {
                std::mem::take(set)
                    .into_iter()
                    .map(|element| Box::new(element) as Box<dyn Any>)
                    .collect()
            })
    }
}

/// Retriever of `HashMap<K, V>`.
pub struct HashMapRetriever<K, V>(PhantomData<fn() -> (K, V)>);

impl<K, V> Default for HashMapRetriever<K, V> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<K, V> MapRetriever for HashMapRetriever<K, V>
where
    K: Any + Default + Eq + Hash,
    V: Any + Default,
{
    fn size(&self, map: &dyn Any) -> usize {
        map.downcast_ref::<HashMap<K, V>>().map_or(0, HashMap::len)
    }

    fn clear(&self, map: &mut dyn Any) {
        if let Some(map) = map.downcast_mut::<HashMap<K, V>>() {
            map.clear();
        }
    }

    fn construct_entry(&self) -> Box<dyn Any> {
        Box::new(<(K, V)>::default())
    }

    fn add_entry(&self, map: &mut dyn Any, entry: Box<dyn Any>) -> bool {
        match (map.downcast_mut::<HashMap<K, V>>(), entry.downcast::<(K, V)>()) {
            (Some(map), Ok(entry)) => {
                let (key, value) = *entry;
                map.insert(key, value);
                true
            }
            _ => false,
        }
    }

    fn iter<'a>(
        &self,
        map: &'a dyn Any,
    ) -> Box<dyn Iterator<Item = (&'a dyn Any, &'a dyn Any)> + 'a> {
        match map.downcast_ref::<HashMap<K, V>>() {
            Some(map) => Box::new(
                map.iter()
                    .map(|(key, value)| (key as &dyn Any, value as &dyn Any)),
            ),
            None => Box::new(std::iter::empty()),
        }
    }

    fn drain(&self, map: &mut dyn Any) -> Vec<Box<dyn Any>> {
        map.downcast_mut::<HashMap<K, V>>()
            .map_or_else(Vec::new, |map| {
                map.drain()
                    .map(|entry| Box::new(entry) as Box<dyn Any>)
                    .collect()
            })
    }
}

/// Retriever of `BTreeMap<K, V>`.
pub struct BTreeMapRetriever<K, V>(PhantomData<fn() -> (K, V)>);

impl<K, V> Default for BTreeMapRetriever<K, V> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<K, V> MapRetriever for BTreeMapRetriever<K, V>
where
    K: Any + Default + Ord,
    V: Any + Default,
{
    fn size(&self, map: &dyn Any) -> usize {
        map.downcast_ref::<BTreeMap<K, V>>().map_or(0, BTreeMap::len)
    }

    fn clear(&self, map: &mut dyn Any) {
        if let Some(map) = map.downcast_mut::<BTreeMap<K, V>>() {
            map.clear();
        }
    }

    fn construct_entry(&self) -> Box<dyn Any> {
        Box::new(<(K, V)>::default())
    }

    fn add_entry(&self, map: &mut dyn Any, entry: Box<dyn Any>) -> bool {
        match (map.downcast_mut::<BTreeMap<K, V>>(), entry.downcast::<(K, V)>()) {
            (Some(map), Ok(entry)) => {
                let (key, value) = *entry;
                map.insert(key, value);
                true
            }
            _ => false,
        }
    }

    fn iter<'a>(
        &self,
        map: &'a dyn Any,
    ) -> Box<dyn Iterator<Item = (&'a dyn Any, &'a dyn Any)> + 'a> {
        match map.downcast_ref::<BTreeMap<K, V>>() {
            Some(map) => Box::new(
                map.iter()
                    .map(|(key, value)| (key as &dyn Any, value as &dyn Any)),
            ),
            None => Box::new(std::iter::empty()),
        }
    }

    fn drain(&self, map: &mut dyn Any) -> Vec<Box<dyn Any>> {
        map.downcast_mut::<BTreeMap<K, V>>()
            .map_or_else(Vec::new, |map| {
                std::mem::take(map)
                    .into_iter()
                    .map(|entry| Box::new(entry) as Box<dyn Any>)
                    .collect()
            })
    }
}

/// Retriever of `(A, B)`.
pub struct TupleRetriever<A, B>(PhantomData<fn() -> (A, B)>);

impl<A, B> Default for TupleRetriever<A, B> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<A: Any, B: Any> PairRetriever for TupleRetriever<A, B> {
    fn first<'a>(&self, pair: &'a dyn Any) -> Option<&'a dyn Any> {
        pair.downcast_ref::<(A, B)>().map(|pair| &pair.0 as &dyn Any)
    }

    fn first_mut<'a>(&self, pair: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        pair.downcast_mut::<(A, B)>()
            .map(|pair| &mut pair.0 as &mut dyn Any)
    }

    fn second<'a>(&self, pair: &'a dyn Any) -> Option<&'a dyn Any> {
        pair.downcast_ref::<(A, B)>().map(|pair| &pair.1 as &dyn Any)
    }

    fn second_mut<'a>(&self, pair: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        pair.downcast_mut::<(A, B)>()
            .map(|pair| &mut pair.1 as &mut dyn Any)
    }
}
