//! # Type Descriptors
//!
//! A [`TypeDescriptor`] is a tagged union over the kinds of reflected types. Descriptors refer
//! to each other by [`DescriptorId`], never by pointer, so a class may contain containers of
//! itself without creating ownership cycles.
//!
//! Field access goes through [`FieldAccessor`]: given `&dyn Any` of the owning object it hands
//! back `&dyn Any` of the field. A wrong owner type is caught by the downcast at the boundary.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::archive::{Archivable, ArchiveReader, ArchiveWriter};
use crate::error::ArchiveResult;
use crate::name::StringId;
use crate::object_ref::ObjectId;
use crate::registry::{Reflected, TypeRegistry};
use crate::retriever::{ContainerRetriever, MapRetriever, PairRetriever};

/// Index of a descriptor inside its [`TypeRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct DescriptorId(u32);

impl DescriptorId {
    #[inline]
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Position of the descriptor in the registry table.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Reflection metadata of one concrete type.
pub struct TypeDescriptor {
    /// Identity inside the registry.
    pub(crate) id: DescriptorId,
    /// Stable type name.
    pub(crate) name: String,
    /// Hash of `name`, used as the on-disk class id.
    pub(crate) name_id: StringId,
    /// Rust type identity.
    pub(crate) type_id: TypeId,
    /// Shape of the type.
    pub(crate) kind: TypeKind,
}

impl TypeDescriptor {
    /// Identity inside the registry.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> DescriptorId {
        self.id
    }

    /// Stable type name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hash of the type name.
    #[inline]
    #[must_use]
    pub const fn name_id(&self) -> StringId {
        self.name_id
    }

    /// Rust type identity.
    #[inline]
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Shape of the type.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Returns the class data if this is a class or struct.
    #[must_use]
    pub const fn as_class(&self) -> Option<&ClassDescriptor> {
        match &self.kind {
            TypeKind::Class(class) => Some(class),
            _ => None,
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind.label())
            .finish()
    }
}

/// The kinds of reflected types.
pub enum TypeKind {
    /// Numbers and booleans.
    Fundamental(PrimitiveDescriptor),
    /// Strings, names, math and color types serialized as opaque values.
    Special(PrimitiveDescriptor),
    /// Classes and structs with fields.
    Class(ClassDescriptor),
    /// Enumerations and bit flags.
    Enum(EnumDescriptor),
    /// Arrays and sets.
    Container(ContainerDescriptor),
    /// Key/value maps.
    Map(MapDescriptor),
    /// Two-element tuples.
    Pair(PairDescriptor),
    /// References to engine objects.
    Qualified(QualifiedDescriptor),
}

impl TypeKind {
    /// Short name of the kind, for diagnostics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Fundamental(_) => "fundamental",
            Self::Special(_) => "special",
            Self::Class(_) => "class",
            Self::Enum(_) => "enum",
            Self::Container(ContainerDescriptor {
                kind: ContainerKind::Array,
                ..
            }) => "array",
            Self::Container(_) => "set",
            Self::Map(_) => "map",
            Self::Pair(_) => "pair",
            Self::Qualified(_) => "qualified",
        }
    }
}

/// Value operations of a primitive type, resolved once per type.
#[derive(Clone, Copy)]
pub struct PrimitiveDescriptor {
    /// Size of the in-memory value.
    pub size: usize,
    /// Copies `from` into `to`. Returns false on a type mismatch.
    pub copy: fn(&dyn Any, &mut dyn Any) -> bool,
    /// Writes the value. Returns false on a type mismatch.
    pub write: fn(&dyn Any, &mut ArchiveWriter) -> bool,
    /// Reads into the value.
    pub read: fn(&mut dyn Any, &mut ArchiveReader<'_>) -> ArchiveResult<()>,
    /// Compares two values of the type.
    pub equals: fn(&dyn Any, &dyn Any) -> bool,
}

impl PrimitiveDescriptor {
    /// Builds the operations for `T`.
    #[must_use]
    pub fn of<T: Archivable + Clone + PartialEq + Any>() -> Self {
        Self {
            size: std::mem::size_of::<T>(),
            copy: copy_primitive::<T>,
            write: write_primitive::<T>,
            read: read_primitive::<T>,
            equals: equals_primitive::<T>,
        }
    }
}

fn copy_primitive<T: Clone + Any>(from: &dyn Any, to: &mut dyn Any) -> bool {
    match (from.downcast_ref::<T>(), to.downcast_mut::<T>()) {
        (Some(from), Some(to)) => {
            to.clone_from(from);
            true
        }
        _ => false,
    }
}

fn write_primitive<T: Archivable + Any>(value: &dyn Any, ar: &mut ArchiveWriter) -> bool {
    match value.downcast_ref::<T>() {
        Some(value) => {
            ar.write(value);
            true
        }
        None => false,
    }
}

fn read_primitive<T: Archivable + Any>(
    value: &mut dyn Any,
    ar: &mut ArchiveReader<'_>,
) -> ArchiveResult<()> {
    let loaded = T::read_from(ar)?;
    match value.downcast_mut::<T>() {
        Some(slot) => *slot = loaded,
        None => debug_assert!(false, "primitive read into a value of another type"),
    }
    Ok(())
}

fn equals_primitive<T: PartialEq + Any>(lhs: &dyn Any, rhs: &dyn Any) -> bool {
    matches!(
        (lhs.downcast_ref::<T>(), rhs.downcast_ref::<T>()),
        (Some(lhs), Some(rhs)) if lhs == rhs
    )
}

/// Boxed default-constructor of a class.
pub type Constructor = fn() -> Box<dyn Any + Send + Sync>;

/// Class or struct descriptor.
///
/// Registered bare first and initialized afterwards, see [`TypeRegistry::descriptor_of`].
pub struct ClassDescriptor {
    body: OnceLock<ClassBody>,
}

/// Fields, base link and constructor of a class.
pub struct ClassBody {
    /// Fields in declaration order (base fields excluded).
    pub fields: Vec<FieldDescriptor>,
    /// Link to the embedded base class.
    pub base: Option<BaseLink>,
    /// Default constructor.
    pub ctor: Option<Constructor>,
}

static EMPTY_CLASS_BODY: ClassBody = ClassBody {
    fields: Vec::new(),
    base: None,
    ctor: None,
};

impl ClassDescriptor {
    pub(crate) fn bare() -> Self {
        Self {
            body: OnceLock::new(),
        }
    }

    pub(crate) fn initialize(&self, body: ClassBody) -> bool {
        self.body.set(body).is_ok()
    }

    /// Checks whether the second creation phase has run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.body.get().is_some()
    }

    /// Fields, base and constructor. Empty while the class is still bare.
    #[must_use]
    pub fn body(&self) -> &ClassBody {
        self.body.get().unwrap_or(&EMPTY_CLASS_BODY)
    }

    /// Own fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.body().fields
    }

    /// Base class link.
    #[must_use]
    pub fn base(&self) -> Option<&BaseLink> {
        self.body().base.as_ref()
    }

    /// Constructs a default instance.
    #[must_use]
    pub fn construct(&self) -> Option<Box<dyn Any + Send + Sync>> {
        self.body().ctor.map(|ctor| ctor())
    }
}

/// Projects a class value onto its embedded base class value.
pub struct BaseLink {
    /// Base class descriptor.
    pub class: DescriptorId,
    /// Accessor from the derived value to the base value.
    pub accessor: Box<dyn FieldAccessor>,
}

impl BaseLink {
    /// Creates a base link, resolving (and possibly creating) the base descriptor.
    pub fn new<O: Any, B: Reflected>(
        registry: &TypeRegistry,
        get: fn(&O) -> &B,
        get_mut: fn(&mut O) -> &mut B,
    ) -> Self {
        Self {
            class: registry.descriptor_of::<B>(),
            accessor: Box::new(FnAccessor::new(get, get_mut)),
        }
    }
}

/// Capability to reach a field given its owning object.
pub trait FieldAccessor: Send + Sync {
    /// Borrows the field. `None` if `object` is not of the owning type.
    fn get<'a>(&self, object: &'a dyn Any) -> Option<&'a dyn Any>;
    /// Mutably borrows the field. `None` if `object` is not of the owning type.
    fn get_mut<'a>(&self, object: &'a mut dyn Any) -> Option<&'a mut dyn Any>;
}

/// [`FieldAccessor`] built from a pair of projection functions.
pub struct FnAccessor<O, F> {
    get: fn(&O) -> &F,
    get_mut: fn(&mut O) -> &mut F,
}

impl<O, F> FnAccessor<O, F> {
    /// Creates an accessor from projections.
    #[must_use]
    pub const fn new(get: fn(&O) -> &F, get_mut: fn(&mut O) -> &mut F) -> Self {
        Self { get, get_mut }
    }
}

impl<O: Any, F: Any> FieldAccessor for FnAccessor<O, F> {
    fn get<'a>(&self, object: &'a dyn Any) -> Option<&'a dyn Any> {
        let owner = object.downcast_ref::<O>()?;
        Some((self.get)(owner))
    }

    fn get_mut<'a>(&self, object: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        let owner = object.downcast_mut::<O>()?;
        Some((self.get_mut)(owner))
    }
}

/// Descriptor of one field.
pub struct FieldDescriptor {
    name: &'static str,
    name_id: StringId,
    owner: DescriptorId,
    value_type: DescriptorId,
    accessor: Box<dyn FieldAccessor>,
}

impl FieldDescriptor {
    /// Creates a field descriptor, resolving the value type descriptor.
    pub fn new<O: Any, F: Reflected>(
        registry: &TypeRegistry,
        owner: DescriptorId,
        name: &'static str,
        get: fn(&O) -> &F,
        get_mut: fn(&mut O) -> &mut F,
    ) -> Self {
        Self {
            name,
            name_id: StringId::new(name),
            owner,
            value_type: registry.descriptor_of::<F>(),
            accessor: Box::new(FnAccessor::new(get, get_mut)),
        }
    }

    /// Field name.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Stable id of the field name, written to field streams.
    #[inline]
    #[must_use]
    pub const fn name_id(&self) -> StringId {
        self.name_id
    }

    /// Class declaring the field.
    #[inline]
    #[must_use]
    pub const fn owner(&self) -> DescriptorId {
        self.owner
    }

    /// Descriptor of the field's value type.
    #[inline]
    #[must_use]
    pub const fn value_type(&self) -> DescriptorId {
        self.value_type
    }

    /// Accessor of the field.
    #[inline]
    #[must_use]
    pub fn accessor(&self) -> &dyn FieldAccessor {
        self.accessor.as_ref()
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("value_type", &self.value_type)
            .finish_non_exhaustive()
    }
}

/// A field found by name, possibly declared on a base class.
#[derive(Debug, Clone)]
pub struct FieldPath {
    /// Classes whose base link is followed, most derived first.
    pub(crate) bases: Vec<Arc<TypeDescriptor>>,
    /// Class declaring the field.
    pub(crate) owner: Arc<TypeDescriptor>,
    /// Index into the owner's fields.
    pub(crate) index: usize,
}

impl FieldPath {
    /// The field descriptor.
    #[must_use]
    pub fn field(&self) -> Option<&FieldDescriptor> {
        self.owner.as_class()?.fields().get(self.index)
    }

    /// Borrows the field out of an instance of the class the search started from.
    #[must_use]
    pub fn get<'a>(&self, object: &'a dyn Any) -> Option<&'a dyn Any> {
        let mut current = object;
        for class in &self.bases {
            current = class.as_class()?.base()?.accessor.get(current)?;
        }
        self.field()?.accessor.get(current)
    }

    /// Mutably borrows the field out of an instance of the class the search started from.
    pub fn get_mut<'a>(&self, object: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        let mut current = object;
        for class in &self.bases {
            current = class.as_class()?.base()?.accessor.get_mut(current)?;
        }
        self.field()?.accessor.get_mut(current)
    }
}

/// One named value of an enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnumEntry {
    /// Variant name.
    pub name: &'static str,
    /// Underlying value.
    pub value: i64,
}

/// Integer type an enum or flag set is stored as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnumStorage {
    /// `i8`
    I8,
    /// `u8`
    U8,
    /// `i16`
    I16,
    /// `u16`
    U16,
    /// `i32`
    I32,
    /// `u32`
    U32,
    /// `i64`
    I64,
    /// `u64`
    U64,
}

impl EnumStorage {
    /// Encoded width in bytes.
    #[must_use]
    pub const fn byte_size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 => 4,
            Self::I64 | Self::U64 => 8,
        }
    }

    /// Writes `raw` truncated to the storage width.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn write(self, ar: &mut ArchiveWriter, raw: i64) {
        match self {
            Self::I8 => ar.write(&(raw as i8)),
            Self::U8 => ar.write(&(raw as u8)),
            Self::I16 => ar.write(&(raw as i16)),
            Self::U16 => ar.write(&(raw as u16)),
            Self::I32 => ar.write(&(raw as i32)),
            Self::U32 => ar.write(&(raw as u32)),
            Self::I64 => ar.write(&raw),
            Self::U64 => ar.write(&(raw as u64)),
        }
    }

    /// Reads a value of the storage width and widens it.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is truncated.
    #[allow(clippy::cast_possible_wrap)]
    pub fn read(self, ar: &mut ArchiveReader<'_>) -> ArchiveResult<i64> {
        Ok(match self {
            Self::I8 => i64::from(ar.read::<i8>()?),
            Self::U8 => i64::from(ar.read::<u8>()?),
            Self::I16 => i64::from(ar.read::<i16>()?),
            Self::U16 => i64::from(ar.read::<u16>()?),
            Self::I32 => i64::from(ar.read::<i32>()?),
            Self::U32 => i64::from(ar.read::<u32>()?),
            Self::I64 => ar.read::<i64>()?,
            Self::U64 => ar.read::<u64>()? as i64,
        })
    }
}

/// Integer types usable as enum storage in [`reflect_enum!`](crate::reflect_enum) and
/// [`reflect_flags!`](crate::reflect_flags).
pub trait EnumRepr {
    /// Matching storage tag.
    const STORAGE: EnumStorage;
}

macro_rules! enum_repr {
    ($($ty:ty => $storage:ident),* $(,)?) => {
        $(
            impl EnumRepr for $ty {
                const STORAGE: EnumStorage = EnumStorage::$storage;
            }
        )*
    };
}

enum_repr!(i8 => I8, u8 => U8, i16 => I16, u16 => U16, i32 => I32, u32 => U32, i64 => I64, u64 => U64);

/// Enum descriptor.
pub struct EnumDescriptor {
    /// Known values in declaration order.
    pub entries: Vec<EnumEntry>,
    /// Integer width of the stored value.
    pub storage: EnumStorage,
    /// Bit-flag semantics: any combination of known bits is valid.
    pub is_flags: bool,
    /// Reads the underlying value.
    pub get: fn(&dyn Any) -> Option<i64>,
    /// Stores an underlying value. Returns false if it is not representable.
    pub set: fn(&mut dyn Any, i64) -> bool,
}

impl EnumDescriptor {
    /// Checks whether `raw` is a known value.
    #[must_use]
    pub fn is_known(&self, raw: i64) -> bool {
        self.entries.iter().any(|entry| entry.value == raw)
    }

    /// OR of every known value.
    #[must_use]
    pub fn known_mask(&self) -> i64 {
        self.entries.iter().fold(0, |mask, entry| mask | entry.value)
    }

    /// Name of a known value.
    #[must_use]
    pub fn name_of(&self, raw: i64) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|entry| entry.value == raw)
            .map(|entry| entry.name)
    }

    /// Brings a loaded value into the known value set.
    ///
    /// Flags keep only known bits; plain enums reject unknown values.
    #[must_use]
    pub fn validate(&self, raw: i64) -> Option<i64> {
        if self.is_flags {
            Some(raw & self.known_mask())
        } else if self.is_known(raw) {
            Some(raw)
        } else {
            None
        }
    }
}

/// Array or set semantics of a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    /// Ordered, duplicates allowed.
    Array,
    /// Unique elements.
    Set,
}

/// Container descriptor.
pub struct ContainerDescriptor {
    /// Array or set.
    pub kind: ContainerKind,
    /// Element type.
    pub element: DescriptorId,
    /// Generic access to the concrete container.
    pub retriever: Box<dyn ContainerRetriever>,
}

/// Map descriptor.
pub struct MapDescriptor {
    /// Key type.
    pub key: DescriptorId,
    /// Value type.
    pub value: DescriptorId,
    /// Pair descriptor of `(key, value)`, the shape of a scratch entry.
    pub entry: DescriptorId,
    /// Generic access to the concrete map.
    pub retriever: Box<dyn MapRetriever>,
}

/// Pair descriptor.
pub struct PairDescriptor {
    /// First element type.
    pub first: DescriptorId,
    /// Second element type.
    pub second: DescriptorId,
    /// Generic access to the concrete pair.
    pub retriever: Box<dyn PairRetriever>,
}

/// Reference-to-object descriptor.
pub struct QualifiedDescriptor {
    /// Class the reference points to, `None` for untyped references.
    pub pointee: Option<DescriptorId>,
    /// Reads the target. Outer `None` on a type mismatch.
    pub get: fn(&dyn Any) -> Option<Option<ObjectId>>,
    /// Stores a target. Returns false on a type mismatch.
    pub set: fn(&mut dyn Any, Option<ObjectId>) -> bool,
}
