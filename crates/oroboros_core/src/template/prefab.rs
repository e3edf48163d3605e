//! # Prefabs
//!
//! A prefab is an actor template plus a set of component templates. A derived prefab does not
//! copy its parent's components: it keeps one [`ComponentOverride`] record per inherited
//! component and only gets its own copy of a component when that component is modified.
//!
//! ## Override Chain
//!
//! ```text
//! Base ──► Derived ──► Leaf
//! Mesh     { base: Mesh, last: -,     over: Mesh'  }
//!                      { base: Mesh, last: Mesh', over: -  }   effective: Mesh'
//! ```
//!
//! Overriding a component duplicates its effective template into the prefab. Inherited
//! components whose instances reference the replaced objects are overridden as well, until no
//! inherited component points into a replaced tree.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use oroboros_reflect::{reflect_class, DescriptorId, ObjPtr, ObjectId, ObjectRef, StringId};
use tracing::debug;

use super::object_template::ObjectTemplate;
use crate::error::{ObjectsError, ObjectsResult};
use crate::object::{
    find_object_references, replace_object_references, CoreObjects, MutationPermit, ObjectClass,
    TraversalMode,
};

/// Name of the actor template inside every prefab.
pub const ACTOR_TEMPLATE_NAME: &str = "Actor";

/// Override state of one inherited component.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentOverride {
    /// Component template of the prefab that introduced the component.
    pub base_template: ObjPtr<ObjectTemplate>,
    /// Closest override made by an ancestor prefab.
    pub last_override: ObjPtr<ObjectTemplate>,
    /// Override made by this prefab. Null until the component is modified here.
    pub overridden_template: ObjPtr<ObjectTemplate>,
}

reflect_class!(ComponentOverride {
    base_template: ObjPtr<ObjectTemplate>,
    last_override: ObjPtr<ObjectTemplate>,
    overridden_template: ObjPtr<ObjectTemplate>,
});

impl ComponentOverride {
    /// Template an override of this component starts from.
    #[must_use]
    pub const fn template_to_override(&self) -> Option<ObjectId> {
        match self.last_override.get() {
            Some(last) => Some(last),
            None => self.base_template.get(),
        }
    }

    /// Template currently in effect for this component.
    #[must_use]
    pub const fn effective(&self) -> Option<ObjectId> {
        match self.overridden_template.get() {
            Some(overridden) => Some(overridden),
            None => self.template_to_override(),
        }
    }

    fn refers_to(&self, component: ObjectId) -> bool {
        [self.base_template, self.last_override, self.overridden_template]
            .iter()
            .any(|template| template.get() == Some(component))
    }
}

/// Actor template with component templates and inheritance.
#[derive(Default, Debug)]
pub struct Prefab {
    actor_class: StringId,
    parent_prefab: ObjPtr<Prefab>,
    actor_template: ObjPtr<ObjectTemplate>,
    /// Components introduced by this prefab.
    components: Vec<ObjPtr<ObjectTemplate>>,
    /// One record per inherited component.
    component_overrides: Vec<ComponentOverride>,
    root_component: ObjectRef,
    /// Component to the component it is attached to.
    attached_to: BTreeMap<ObjectRef, ObjectRef>,
}

reflect_class!(Prefab {
    actor_class: StringId,
    parent_prefab: ObjPtr<Prefab>,
    actor_template: ObjPtr<ObjectTemplate>,
    components: Vec<ObjPtr<ObjectTemplate>>,
    component_overrides: Vec<ComponentOverride>,
    root_component: ObjectRef,
    attached_to: BTreeMap<ObjectRef, ObjectRef>,
});

impl ObjectClass for Prefab {}

/// Maps `from` and its instance tree onto `to` and its instance tree by relative path.
fn map_instance_trees(
    objects: &CoreObjects,
    from: ObjectId,
    to: ObjectId,
    replacements: &mut HashMap<ObjectId, ObjectId>,
) {
    replacements.insert(from, to);
    let (Some(from), Some(to)) = (
        ObjectTemplate::instance(objects, from),
        ObjectTemplate::instance(objects, to),
    ) else {
        return;
    };
    replacements.insert(from, to);
    for subobject in objects.subobjects(from) {
        let counterpart = objects
            .object_path(subobject, Some(from))
            .and_then(|relative| objects.find_under(to, &relative));
        if let Some(counterpart) = counterpart {
            replacements.insert(subobject, counterpart);
        }
    }
}

impl Prefab {
    fn value<R>(
        objects: &CoreObjects,
        prefab: ObjectId,
        f: impl FnOnce(&Self) -> R,
    ) -> ObjectsResult<R> {
        objects
            .read::<Self, _>(prefab, f)
            .ok_or(ObjectsError::NotAPrefab(prefab))
    }

    fn edit<R>(
        objects: &CoreObjects,
        permit: &MutationPermit,
        prefab: ObjectId,
        f: impl FnOnce(&mut Self) -> R,
    ) -> ObjectsResult<R> {
        objects
            .modify::<Self, _>(permit, prefab, f)
            .ok_or(ObjectsError::NotAPrefab(prefab))
    }

    /// Creates a prefab for actors of `actor_class`.
    ///
    /// # Errors
    ///
    /// Fails if the prefab or its actor template cannot be created.
    pub fn create(
        objects: &CoreObjects,
        permit: &MutationPermit,
        actor_class: DescriptorId,
        name: &str,
        outer: Option<ObjectId>,
    ) -> ObjectsResult<ObjectId> {
        let prefab = objects.create::<Self>(permit, name, outer)?;
        let actor = match ObjectTemplate::create_from_class(
            objects,
            permit,
            actor_class,
            ACTOR_TEMPLATE_NAME,
            Some(prefab),
        ) {
            Ok(actor) => actor,
            Err(error) => {
                objects.destroy_object(permit, prefab);
                return Err(error);
            }
        };
        let class_id = objects.types().get(actor_class).name_id();
        Self::edit(objects, permit, prefab, |value| {
            value.actor_class = class_id;
            value.actor_template = ObjPtr::new(actor);
        })?;
        debug!(%prefab, "Created prefab");
        Ok(prefab)
    }

    /// Creates a prefab deriving from `parent`.
    ///
    /// The parent's own components become override bases; the parent's override records are
    /// carried over with the parent's override (or its inherited one) as the last override.
    ///
    /// # Errors
    ///
    /// Fails if `parent` is not a prefab or the new prefab cannot be created.
    pub fn create_derived(
        objects: &CoreObjects,
        permit: &MutationPermit,
        parent: ObjectId,
        name: &str,
        outer: Option<ObjectId>,
    ) -> ObjectsResult<ObjectId> {
        let (actor_class, parent_actor, records, root_component, attached_to) =
            Self::value(objects, parent, |value| {
                let mut records: Vec<ComponentOverride> = value
                    .component_overrides
                    .iter()
                    .map(|record| ComponentOverride {
                        base_template: record.base_template,
                        last_override: ObjPtr::from_option(
                            record.overridden_template.get().or(record.last_override.get()),
                        ),
                        overridden_template: ObjPtr::NULL,
                    })
                    .collect();
                records.extend(value.components.iter().map(|&component| ComponentOverride {
                    base_template: component,
                    ..ComponentOverride::default()
                }));
                (
                    value.actor_class,
                    value.actor_template.get(),
                    records,
                    value.root_component,
                    value.attached_to.clone(),
                )
            })?;
        let parent_actor = parent_actor.ok_or(ObjectsError::NotAPrefab(parent))?;

        let prefab = objects.create::<Self>(permit, name, outer)?;
        let actor = match ObjectTemplate::create_from_template(
            objects,
            permit,
            parent_actor,
            ACTOR_TEMPLATE_NAME,
            Some(prefab),
        ) {
            Ok(actor) => actor,
            Err(error) => {
                objects.destroy_object(permit, prefab);
                return Err(error);
            }
        };
        Self::edit(objects, permit, prefab, |value| {
            value.actor_class = actor_class;
            value.parent_prefab = ObjPtr::new(parent);
            value.actor_template = ObjPtr::new(actor);
            value.component_overrides = records;
            value.root_component = root_component;
            value.attached_to = attached_to;
        })?;
        debug!(%prefab, %parent, "Created derived prefab");
        Ok(prefab)
    }

    /// Prefab this one derives from.
    #[must_use]
    pub fn parent_prefab(objects: &CoreObjects, prefab: ObjectId) -> Option<ObjectId> {
        Self::value(objects, prefab, |value| value.parent_prefab.get()).ok().flatten()
    }

    /// Template of the actor itself.
    #[must_use]
    pub fn actor_template(objects: &CoreObjects, prefab: ObjectId) -> Option<ObjectId> {
        Self::value(objects, prefab, |value| value.actor_template.get()).ok().flatten()
    }

    /// Override records of the inherited components.
    #[must_use]
    pub fn component_overrides(objects: &CoreObjects, prefab: ObjectId) -> Vec<ComponentOverride> {
        Self::value(objects, prefab, |value| value.component_overrides.clone()).unwrap_or_default()
    }

    /// Adds a component template of `class`.
    ///
    /// The first component becomes the root; later ones are attached to the root.
    ///
    /// # Errors
    ///
    /// Fails with [`ObjectsError::NameTaken`] if a component of that name already exists.
    pub fn add_component(
        objects: &CoreObjects,
        permit: &MutationPermit,
        prefab: ObjectId,
        class: DescriptorId,
        name: &str,
    ) -> ObjectsResult<ObjectId> {
        let taken = name == ACTOR_TEMPLATE_NAME
            || Self::effective_components(objects, prefab)
                .into_iter()
                .any(|component| objects.name_of(component).as_deref() == Some(name));
        if taken {
            return Err(ObjectsError::NameTaken(name.to_owned()));
        }

        let component = ObjectTemplate::create_from_class(objects, permit, class, name, Some(prefab))?;
        Self::edit(objects, permit, prefab, |value| {
            value.components.push(ObjPtr::new(component));
            match value.root_component.get() {
                Some(root) => {
                    value
                        .attached_to
                        .insert(ObjectRef::new(component), ObjectRef::new(root));
                }
                None => value.root_component = ObjectRef::new(component),
            }
        })?;
        debug!(%prefab, %component, name, "Added prefab component");
        Ok(component)
    }

    /// Root component.
    #[must_use]
    pub fn root_component(objects: &CoreObjects, prefab: ObjectId) -> Option<ObjectId> {
        Self::value(objects, prefab, |value| value.root_component.get()).ok().flatten()
    }

    /// Component `component` is attached to.
    #[must_use]
    pub fn attached_to(objects: &CoreObjects, prefab: ObjectId, component: ObjectId) -> Option<ObjectId> {
        Self::value(objects, prefab, |value| {
            value
                .attached_to
                .get(&ObjectRef::new(component))
                .and_then(|parent| parent.get())
        })
        .ok()
        .flatten()
    }

    /// Attaches `component` to `parent`, or detaches it with `None`.
    ///
    /// # Errors
    ///
    /// Fails if either is not an effective component of the prefab, or if the attachment
    /// would form a cycle.
    pub fn set_attached_to(
        objects: &CoreObjects,
        permit: &MutationPermit,
        prefab: ObjectId,
        component: ObjectId,
        parent: Option<ObjectId>,
    ) -> ObjectsResult<()> {
        let components = Self::effective_components(objects, prefab);
        for id in std::iter::once(component).chain(parent) {
            if !components.contains(&id) {
                return Err(ObjectsError::UnknownComponent { prefab, component: id });
            }
        }

        if let Some(parent) = parent {
            let mut current = Some(parent);
            while let Some(id) = current {
                if id == component {
                    return Err(ObjectsError::HierarchyCycle { object: component, outer: parent });
                }
                current = Self::attached_to(objects, prefab, id);
            }
        }

        Self::edit(objects, permit, prefab, |value| match parent {
            Some(parent) => {
                value
                    .attached_to
                    .insert(ObjectRef::new(component), ObjectRef::new(parent));
            }
            None => {
                value.attached_to.remove(&ObjectRef::new(component));
            }
        })
    }

    /// Template in effect for `component` (a base, inherited override or own component).
    #[must_use]
    pub fn effective_template(objects: &CoreObjects, prefab: ObjectId, component: ObjectId) -> Option<ObjectId> {
        Self::value(objects, prefab, |value| {
            if value.components.iter().any(|own| own.get() == Some(component)) {
                return Some(component);
            }
            value
                .component_overrides
                .iter()
                .find(|record| record.refers_to(component))
                .and_then(ComponentOverride::effective)
        })
        .ok()
        .flatten()
    }

    /// Templates in effect for every component: inherited first, then own.
    #[must_use]
    pub fn effective_components(objects: &CoreObjects, prefab: ObjectId) -> Vec<ObjectId> {
        Self::value(objects, prefab, |value| {
            value
                .component_overrides
                .iter()
                .filter_map(ComponentOverride::effective)
                .chain(value.components.iter().filter_map(ObjPtr::get))
                .collect()
        })
        .unwrap_or_default()
    }

    /// Checks whether `component` may be edited through this prefab.
    #[must_use]
    pub fn is_owned_component(objects: &CoreObjects, prefab: ObjectId, component: ObjectId) -> bool {
        Self::value(objects, prefab, |value| {
            value.components.iter().any(|own| own.get() == Some(component))
                || value
                    .component_overrides
                    .iter()
                    .any(|record| record.overridden_template.get() == Some(component))
        })
        .unwrap_or(false)
    }

    /// Returns a template of `component` this prefab owns, overriding it first if needed.
    ///
    /// # Errors
    ///
    /// Fails with [`ObjectsError::UnknownComponent`] if the component is not part of the
    /// prefab.
    pub fn modify_component(
        objects: &CoreObjects,
        permit: &MutationPermit,
        prefab: ObjectId,
        component: ObjectId,
    ) -> ObjectsResult<ObjectId> {
        if Self::is_owned_component(objects, prefab, component) {
            return Ok(component);
        }
        Self::create_component_override(objects, permit, prefab, component)
    }

    /// Overrides an inherited component in this prefab.
    ///
    /// Every inherited component whose instance references the overridden tree is overridden
    /// too, breadth-first, and references inside the prefab are redirected to the new copies.
    /// Returns the override of `component`.
    ///
    /// # Errors
    ///
    /// Fails if the component is not inherited by the prefab or a copy cannot be created.
    pub fn create_component_override(
        objects: &CoreObjects,
        permit: &MutationPermit,
        prefab: ObjectId,
        component: ObjectId,
    ) -> ObjectsResult<ObjectId> {
        let records = Self::component_overrides(objects, prefab);
        let Some(first) = records.iter().position(|record| record.refers_to(component)) else {
            debug_assert!(false, "component {component} is not inherited by prefab {prefab}");
            return Err(ObjectsError::UnknownComponent { prefab, component });
        };
        if let Some(existing) = records[first].overridden_template.get() {
            return Ok(existing);
        }

        let mut replacements = HashMap::new();
        let mut queue = VecDeque::from([first]);
        let mut queued = HashSet::from([first]);
        let mut created = None;
        while let Some(index) = queue.pop_front() {
            let source = records[index]
                .template_to_override()
                .ok_or(ObjectsError::UnknownComponent { prefab, component })?;
            let name = objects.name_of(source).ok_or(ObjectsError::ObjectNotFound(source))?;
            let overridden = ObjectTemplate::create_from_template(objects, permit, source, &name, Some(prefab))?;
            Self::edit(objects, permit, prefab, |value| {
                if let Some(record) = value.component_overrides.get_mut(index) {
                    record.overridden_template = ObjPtr::new(overridden);
                }
            })?;
            map_instance_trees(objects, source, overridden, &mut replacements);
            created.get_or_insert(overridden);
            debug!(%prefab, %source, %overridden, "Created component override");

            let targets: HashSet<ObjectId> = replacements.keys().copied().collect();
            for (other, record) in records.iter().enumerate() {
                if record.overridden_template.get().is_some() || queued.contains(&other) {
                    continue;
                }
                let referencing = record
                    .template_to_override()
                    .and_then(|template| ObjectTemplate::instance(objects, template))
                    .is_some_and(|instance| {
                        !find_object_references(objects, instance, &targets, TraversalMode::EntireObjectTree)
                            .is_empty()
                    });
                if referencing {
                    queued.insert(other);
                    queue.push_back(other);
                }
            }
        }

        Self::apply_replacements(objects, permit, prefab, &replacements)?;
        created.ok_or(ObjectsError::UnknownComponent { prefab, component })
    }

    /// Removes this prefab's override of `component`, going back to the inherited template.
    ///
    /// Returns false if the component is not overridden here.
    ///
    /// # Errors
    ///
    /// Fails if `prefab` is not a prefab.
    pub fn clear_component_override(
        objects: &CoreObjects,
        permit: &MutationPermit,
        prefab: ObjectId,
        component: ObjectId,
    ) -> ObjectsResult<bool> {
        let records = Self::component_overrides(objects, prefab);
        let Some(index) = records.iter().position(|record| record.refers_to(component)) else {
            return Ok(false);
        };
        let record = records[index];
        let (Some(overridden), Some(restored)) =
            (record.overridden_template.get(), record.template_to_override())
        else {
            return Ok(false);
        };

        let mut replacements = HashMap::new();
        map_instance_trees(objects, overridden, restored, &mut replacements);
        Self::edit(objects, permit, prefab, |value| {
            if let Some(record) = value.component_overrides.get_mut(index) {
                record.overridden_template = ObjPtr::NULL;
            }
        })?;
        Self::apply_replacements(objects, permit, prefab, &replacements)?;
        objects.destroy_object(permit, overridden);
        debug!(%prefab, %overridden, %restored, "Cleared component override");
        Ok(true)
    }

    /// Records a field edit on an owned component.
    ///
    /// # Errors
    ///
    /// Fails if the component is not owned by the prefab. Editing an unowned component
    /// without [`Prefab::modify_component`] is a contract violation and asserts in debug
    /// builds.
    pub fn on_component_field_modified(
        objects: &CoreObjects,
        permit: &MutationPermit,
        prefab: ObjectId,
        component: ObjectId,
        object: ObjectId,
        field: StringId,
    ) -> ObjectsResult<bool> {
        let owned = Self::is_owned_component(objects, prefab, component);
        debug_assert!(owned, "component {component} is not owned by prefab {prefab}");
        if !owned {
            return Err(ObjectsError::UnknownComponent { prefab, component });
        }
        ObjectTemplate::on_field_modified(objects, permit, component, object, field)
    }

    /// Redirects references in the prefab's own templates and attachment data.
    fn apply_replacements(
        objects: &CoreObjects,
        permit: &MutationPermit,
        prefab: ObjectId,
        replacements: &HashMap<ObjectId, ObjectId>,
    ) -> ObjectsResult<usize> {
        let owned: Vec<ObjectId> = Self::value(objects, prefab, |value| {
            value
                .actor_template
                .get()
                .into_iter()
                .chain(value.components.iter().filter_map(ObjPtr::get))
                .chain(
                    value
                        .component_overrides
                        .iter()
                        .filter_map(|record| record.overridden_template.get()),
                )
                .collect()
        })?;

        let mut replaced = 0;
        for template in owned {
            if let Some(instance) = ObjectTemplate::instance(objects, template) {
                replaced += replace_object_references(
                    objects,
                    permit,
                    instance,
                    replacements,
                    TraversalMode::EntireObjectTree,
                );
            }
        }

        let swap = |reference: ObjectRef| {
            reference
                .get()
                .and_then(|id| replacements.get(&id))
                .map_or(reference, |&id| ObjectRef::new(id))
        };
        Self::edit(objects, permit, prefab, |value| {
            value.root_component = swap(value.root_component);
            value.attached_to = std::mem::take(&mut value.attached_to)
                .into_iter()
                .map(|(component, parent)| (swap(component), swap(parent)))
                .collect();
        })?;
        Ok(replaced)
    }
}
