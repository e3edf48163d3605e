//! # Templates and Prefabs
//!
//! Prototype objects whose instances can be partially overridden by derived prototypes while
//! staying linked to their base.

mod object_template;
mod prefab;

pub use object_template::{
    ObjectTemplate, TemplateLoad, OBJECT_TEMPLATE_MIN_VERSION, OBJECT_TEMPLATE_VERSION,
    OBJECT_TEMPLATE_VERSION_TAG, TEMPLATE_INSTANCE_FLAGS,
};
pub use prefab::{ComponentOverride, Prefab, ACTOR_TEMPLATE_NAME};
