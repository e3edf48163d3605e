//! # Object References
//!
//! Reflected fields never hold raw addresses of engine objects. They hold an [`ObjectId`]:
//! a generational index naming a node of the object database.
//!
//! - [`ObjPtr<T>`] is a typed reference; its descriptor records the pointee class.
//! - [`ObjectRef`] is an untyped reference to any object.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Identifier of an object database node.
///
/// The ID is split into two parts:
/// - Lower 32 bits: Index into the node table
/// - Upper 32 bits: Generation counter for detecting stale references
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Creates a new object ID from index and generation.
    ///
    /// # Arguments
    ///
    /// * `index` - The index into the node table
    /// * `generation` - The generation counter of that node
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the ID.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the ID.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Returns the packed bits.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Rebuilds an ID from packed bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index(), self.generation())
    }
}

/// Uniform access to the target of a reference field.
pub trait RefSlot {
    /// Returns the referenced object, if any.
    fn target(&self) -> Option<ObjectId>;
    /// Points the reference at `target`.
    fn set_target(&mut self, target: Option<ObjectId>);
}

/// Untyped reference to an engine object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(Option<ObjectId>);

impl ObjectRef {
    /// The null reference.
    pub const NULL: Self = Self(None);

    /// Creates a reference to `id`.
    #[inline]
    #[must_use]
    pub const fn new(id: ObjectId) -> Self {
        Self(Some(id))
    }

    /// Returns the referenced object.
    #[inline]
    #[must_use]
    pub const fn get(self) -> Option<ObjectId> {
        self.0
    }

    /// Checks whether the reference is null.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0.is_none()
    }
}

impl From<ObjectId> for ObjectRef {
    fn from(id: ObjectId) -> Self {
        Self::new(id)
    }
}

impl From<Option<ObjectId>> for ObjectRef {
    fn from(id: Option<ObjectId>) -> Self {
        Self(id)
    }
}

impl RefSlot for ObjectRef {
    fn target(&self) -> Option<ObjectId> {
        self.0
    }

    fn set_target(&mut self, target: Option<ObjectId>) {
        self.0 = target;
    }
}

/// Typed reference to an engine object of class `T`.
///
/// The type parameter only drives the reflected descriptor; the stored value is the same
/// [`ObjectId`] an [`ObjectRef`] holds.
pub struct ObjPtr<T> {
    id: Option<ObjectId>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjPtr<T> {
    /// The null pointer.
    pub const NULL: Self = Self {
        id: None,
        _marker: PhantomData,
    };

    /// Creates a pointer to `id`.
    #[inline]
    #[must_use]
    pub const fn new(id: ObjectId) -> Self {
        Self {
            id: Some(id),
            _marker: PhantomData,
        }
    }

    /// Creates a pointer from an optional id.
    #[inline]
    #[must_use]
    pub const fn from_option(id: Option<ObjectId>) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Returns the referenced object.
    #[inline]
    #[must_use]
    pub const fn get(&self) -> Option<ObjectId> {
        self.id
    }

    /// Checks whether the pointer is null.
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.id.is_none()
    }
}

impl<T> RefSlot for ObjPtr<T> {
    fn target(&self) -> Option<ObjectId> {
        self.id
    }

    fn set_target(&mut self, target: Option<ObjectId>) {
        self.id = target;
    }
}

impl<T> Clone for ObjPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjPtr<T> {}

impl<T> Default for ObjPtr<T> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<T> PartialEq for ObjPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for ObjPtr<T> {}

impl<T> PartialOrd for ObjPtr<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for ObjPtr<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl<T> Hash for ObjPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for ObjPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "ObjPtr({id})"),
            None => f.write_str("ObjPtr(null)"),
        }
    }
}

impl<T> From<ObjectId> for ObjPtr<T> {
    fn from(id: ObjectId) -> Self {
        Self::new(id)
    }
}
