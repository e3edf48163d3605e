//! Small object classes shared by unit tests.

use oroboros_reflect::{reflect_class, ObjPtr, ObjectId, ObjectRef};

use crate::object::{CoreObjects, MutationPermit, ObjectClass};

#[derive(Default, Debug, Clone, PartialEq)]
pub struct Cushion {
    pub softness: f32,
}

reflect_class!(Cushion { softness: f32 });

impl ObjectClass for Cushion {}

/// Creates a `Cushion` subobject on construction.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Chair {
    pub legs: u32,
    pub cushion: ObjPtr<Cushion>,
}

reflect_class!(Chair { legs: u32, cushion: ObjPtr<Cushion> });

impl ObjectClass for Chair {
    fn constructed(objects: &CoreObjects, permit: &MutationPermit, this: ObjectId) {
        if let Ok(cushion) = objects.create::<Cushion>(permit, "Cushion", Some(this)) {
            objects.modify::<Chair, _>(permit, this, |chair| chair.cushion = ObjPtr::new(cushion));
        }
    }
}

/// Points at an arbitrary object, usually one in another tree.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Anchor {
    pub target: ObjectRef,
    pub offset: f32,
}

reflect_class!(Anchor { target: ObjectRef, offset: f32 });

impl ObjectClass for Anchor {}
