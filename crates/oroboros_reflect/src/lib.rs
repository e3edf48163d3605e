//! # OROBOROS Reflect
//!
//! The property graph behind the object runtime: every reflected type gets exactly one
//! [`TypeDescriptor`], created lazily on first query and cached in an explicitly constructed
//! [`TypeRegistry`].
//!
//! ## Architecture Rules
//!
//! 1. **One descriptor per type** - value identity implies descriptor identity
//! 2. **Two-phase class creation** - a class is registered bare before its fields are resolved,
//!    so self-referencing types never deadlock the registry
//! 3. **No per-type serialization code** - the [`visitor`] module copies, writes and reads any
//!    reflected value by walking its descriptor
//!
//! ## Example
//!
//! ```rust,ignore
//! use oroboros_reflect::{reflect_class, TypeRegistry, Vec3};
//!
//! #[derive(Default)]
//! struct Transform {
//!     position: Vec3,
//!     tags: Vec<String>,
//! }
//! reflect_class!(Transform { position: Vec3, tags: Vec<String> });
//!
//! let registry = TypeRegistry::new();
//! let class = registry.descriptor_of::<Transform>();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod archive;
mod builtin;
pub mod descriptor;
pub mod error;
mod macros;
pub mod math;
pub mod name;
pub mod object_ref;
pub mod registry;
pub mod retriever;
pub mod visitor;

pub use archive::{Archivable, ArchiveReader, ArchiveWriter};
pub use descriptor::{
    BaseLink, ClassBody, ClassDescriptor, Constructor, ContainerDescriptor, ContainerKind,
    DescriptorId, EnumDescriptor, EnumEntry, EnumRepr, EnumStorage, FieldAccessor,
    FieldDescriptor, FieldPath, FnAccessor, MapDescriptor, PairDescriptor, PrimitiveDescriptor,
    QualifiedDescriptor, TypeDescriptor, TypeKind,
};
pub use error::{ArchiveError, ArchiveResult};
pub use math::{Color, Quat, Vec3};
pub use name::StringId;
pub use object_ref::{ObjPtr, ObjectId, ObjectRef, RefSlot};
pub use registry::{construct_boxed, Reflected, TypeBuild, TypeRegistry};
pub use retriever::{ContainerRetriever, MapRetriever, PairRetriever};
pub use visitor::{
    clear_refs_in, copy_fields, copy_value, dispatch, find_refs_in, read_fields, replace_refs_in,
    write_fields, FieldVisitor, FoundRef, ObjectRefCodec, ObjectRefRemap, RawIdCodec, ReadOptions,
    ReadReport,
};
