//! # Reachability Collection
//!
//! A cycle runs in three phases, each resumable under a work budget:
//!
//! ```text
//!  Idle ──► Marking ──► Sweeping ──► Clearing ──► Idle
//!           roots,      unmarked     null refs to
//!           children,   objects      destroyed ids,
//!           outers,     destroyed    free parked
//!           field refs  (GC_PURGE)   storage
//! ```
//!
//! Objects flagged [`ObjectFlags::ROOT_OBJECT`] are live. Liveness spreads to children, to
//! outers, and to every object referenced from a reflected field. An object flagged
//! [`ObjectFlags::MARKED_FOR_DELETE`] never becomes live, whoever refers to it.
//!
//! Only objects that existed when the cycle started can be swept. Any edit that may add a
//! reference or a root between two steps of marking or sweeping restarts the cycle.

use std::collections::HashSet;

use oroboros_reflect::{clear_refs_in, find_refs_in, ObjectId};
use tracing::{debug, info};

use super::flags::ObjectFlags;
use super::permit::MutationPermit;
use super::runtime::CoreObjects;

/// Phase of a collection cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GcPhase {
    /// No cycle in progress.
    #[default]
    Idle,
    /// Spreading liveness from the roots.
    Marking,
    /// Destroying unreachable objects.
    Sweeping,
    /// Nulling references to destroyed objects.
    Clearing,
}

/// Totals of one collection cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Objects visited while marking.
    pub marked: usize,
    /// Objects destroyed by the sweep, subobjects included.
    pub destroyed: usize,
    /// References nulled.
    pub cleared_refs: usize,
    /// Parked storage slots freed.
    pub freed: usize,
    /// Restarts caused by edits between steps.
    pub restarts: usize,
}

/// Result of [`CoreObjects::gc_step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcStatus {
    /// The cycle continues in this phase.
    Pending(GcPhase),
    /// The cycle finished.
    Finished(GcStats),
}

/// State carried between steps.
#[derive(Default)]
pub(super) struct GcCycle {
    phase: GcPhase,
    epoch: u64,
    candidates: HashSet<ObjectId>,
    marked: HashSet<ObjectId>,
    worklist: Vec<ObjectId>,
    queue: Vec<ObjectId>,
    destroyed: HashSet<ObjectId>,
    stats: GcStats,
}

impl CoreObjects {
    /// Phase of the collection cycle in progress.
    #[must_use]
    pub fn gc_phase(&self) -> GcPhase {
        self.gc.lock().phase
    }

    /// Flags an object to be destroyed by the next collection even if it is still referenced.
    pub fn mark_for_delete(&self, permit: &MutationPermit, id: ObjectId) -> bool {
        self.set_flags(permit, id, ObjectFlags::MARKED_FOR_DELETE)
    }

    /// Runs collection until the current cycle finishes.
    pub fn collect_unreachable(&self, permit: &MutationPermit) -> GcStats {
        loop {
            if let GcStatus::Finished(stats) = self.gc_step(permit, usize::MAX) {
                return stats;
            }
        }
    }

    /// Advances collection by the configured `[gc] step_budget`.
    pub fn gc_tick(&self, permit: &MutationPermit) -> GcStatus {
        self.gc_step(permit, self.config().gc.step_budget)
    }

    /// Advances collection by at most `budget` objects of work, starting a cycle if none is
    /// in progress.
    pub fn gc_step(&self, permit: &MutationPermit, budget: usize) -> GcStatus {
        self.check_permit(permit);
        let mut cycle = std::mem::take(&mut *self.gc.lock());
        let status = self.advance(permit, &mut cycle, budget);
        *self.gc.lock() = cycle;
        status
    }

    fn advance(&self, permit: &MutationPermit, cycle: &mut GcCycle, mut budget: usize) -> GcStatus {
        let stale = matches!(cycle.phase, GcPhase::Marking | GcPhase::Sweeping)
            && cycle.epoch != self.mutation_epoch();
        if stale {
            debug!(phase = ?cycle.phase, "Objects edited during collection, restarting cycle");
            let mut stats = cycle.stats;
            stats.restarts += 1;
            *cycle = GcCycle {
                stats,
                ..GcCycle::default()
            };
        }

        loop {
            match cycle.phase {
                GcPhase::Idle => self.begin_marking(cycle),
                GcPhase::Marking => {
                    if !self.mark(cycle, &mut budget) {
                        return GcStatus::Pending(GcPhase::Marking);
                    }
                    Self::begin_sweeping(cycle);
                }
                GcPhase::Sweeping => {
                    if !self.sweep(permit, cycle, &mut budget) {
                        return GcStatus::Pending(GcPhase::Sweeping);
                    }
                    self.begin_clearing(cycle);
                }
                GcPhase::Clearing => {
                    if !self.clear(cycle, &mut budget) {
                        return GcStatus::Pending(GcPhase::Clearing);
                    }
                    return GcStatus::Finished(self.finish_cycle(permit, cycle));
                }
            }
        }
    }

    fn begin_marking(&self, cycle: &mut GcCycle) {
        let candidates: HashSet<ObjectId> = self.db().get_all_objects().into_iter().collect();
        let roots: Vec<ObjectId> = candidates
            .iter()
            .copied()
            .filter(|&id| {
                self.flags(id).is_some_and(|flags| {
                    flags.contains(ObjectFlags::ROOT_OBJECT)
                        && !flags.contains(ObjectFlags::MARKED_FOR_DELETE)
                })
            })
            .collect();

        cycle.marked = roots.iter().copied().collect();
        cycle.worklist = roots;
        cycle.candidates = candidates;
        cycle.epoch = self.mutation_epoch();
        cycle.phase = GcPhase::Marking;
    }

    /// Returns false when the budget ran out first.
    fn mark(&self, cycle: &mut GcCycle, budget: &mut usize) -> bool {
        while let Some(&id) = cycle.worklist.last() {
            if *budget == 0 {
                return false;
            }
            cycle.worklist.pop();
            *budget -= 1;
            cycle.stats.marked += 1;

            let mut reached = self.children(id);
            reached.extend(self.outer(id));
            let candidates = &cycle.candidates;
            if let Some(found) = self
                .read_dyn(id, |class, value| find_refs_in(self.types(), class, value, candidates))
            {
                reached.extend(found.into_iter().map(|reference| reference.target));
            }

            for target in reached {
                let live = cycle.candidates.contains(&target)
                    && self
                        .flags(target)
                        .is_some_and(|flags| !flags.contains(ObjectFlags::MARKED_FOR_DELETE));
                if live && cycle.marked.insert(target) {
                    cycle.worklist.push(target);
                }
            }
        }
        true
    }

    fn begin_sweeping(cycle: &mut GcCycle) {
        let marked = std::mem::take(&mut cycle.marked);
        cycle.queue = std::mem::take(&mut cycle.candidates)
            .into_iter()
            .filter(|id| !marked.contains(id))
            .collect();
        cycle.phase = GcPhase::Sweeping;
    }

    fn sweep(&self, permit: &MutationPermit, cycle: &mut GcCycle, budget: &mut usize) -> bool {
        while let Some(&id) = cycle.queue.last() {
            if *budget == 0 {
                return false;
            }
            cycle.queue.pop();
            *budget -= 1;

            // Already gone with an unreachable outer.
            if !self.is_valid(id) {
                continue;
            }
            self.db().update_flags(id, |flags| {
                flags.insert(ObjectFlags::MARKED_FOR_DELETE | ObjectFlags::GC_PURGE);
            });
            let count = self.destroy_object(permit, id);
            debug!(%id, count, "Swept unreachable object");
            cycle.stats.destroyed += count;
        }
        true
    }

    fn begin_clearing(&self, cycle: &mut GcCycle) {
        cycle.destroyed = std::mem::take(&mut *self.destroyed.lock());
        cycle.queue = if cycle.destroyed.is_empty() {
            Vec::new()
        } else {
            self.db().get_all_objects()
        };
        cycle.phase = GcPhase::Clearing;
    }

    fn clear(&self, cycle: &mut GcCycle, budget: &mut usize) -> bool {
        while let Some(&id) = cycle.queue.last() {
            if *budget == 0 {
                return false;
            }
            cycle.queue.pop();
            *budget -= 1;

            let Some(handle) = self.db().handle_of(id) else {
                continue;
            };
            let mut heap = self.heap.write();
            if let Some(value) = heap.get_mut(handle) {
                cycle.stats.cleared_refs +=
                    clear_refs_in(self.types(), handle.class, value, &cycle.destroyed);
            }
        }
        true
    }

    fn finish_cycle(&self, permit: &MutationPermit, cycle: &mut GcCycle) -> GcStats {
        let mut stats = cycle.stats;
        stats.freed = self.collect_garbage(permit);
        *cycle = GcCycle::default();
        info!(
            marked = stats.marked,
            destroyed = stats.destroyed,
            cleared_refs = stats.cleared_refs,
            freed = stats.freed,
            "Collection cycle finished"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use oroboros_reflect::{ObjPtr, ObjectRef, TypeRegistry};

    use super::*;
    use crate::config::{GcConfig, RuntimeConfig};
    use crate::test_classes::{Anchor, Chair, Cushion};

    fn runtime() -> CoreObjects {
        let objects = CoreObjects::new(Arc::new(TypeRegistry::new()));
        let permit = objects.mutation_permit();
        objects.register_class::<Chair>(&permit);
        objects.register_class::<Cushion>(&permit);
        objects.register_class::<Anchor>(&permit);
        objects
    }

    fn anchor_at(objects: &CoreObjects, permit: &MutationPermit, anchor: ObjectId, target: ObjectId) {
        objects.modify::<Anchor, _>(permit, anchor, |value| value.target = ObjectRef::new(target));
    }

    #[test]
    fn test_unreferenced_free_object_is_swept() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let level = objects.create::<Anchor>(&permit, "Level", None).unwrap();
        let kept = objects.create::<Cushion>(&permit, "Kept", None).unwrap();
        let loose = objects.create::<Cushion>(&permit, "Loose", None).unwrap();
        anchor_at(&objects, &permit, level, kept);
        objects.clear_flags(&permit, kept, ObjectFlags::ROOT_OBJECT);
        objects.clear_flags(&permit, loose, ObjectFlags::ROOT_OBJECT);

        let stats = objects.collect_unreachable(&permit);

        assert!(objects.is_valid(level));
        assert!(objects.is_valid(kept));
        assert!(!objects.is_valid(loose));
        assert_eq!(stats.destroyed, 1);
        assert_eq!(objects.gc_phase(), GcPhase::Idle);
    }

    #[test]
    fn test_subobjects_live_with_their_outer() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let chair = objects.create::<Chair>(&permit, "Chair", None).unwrap();
        let cushion = objects.read::<Chair, _>(chair, |c| c.cushion.get()).flatten().unwrap();

        let stats = objects.collect_unreachable(&permit);

        assert!(objects.is_valid(cushion));
        assert_eq!(stats.destroyed, 0);
    }

    #[test]
    fn test_marked_for_delete_ignores_references() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let chair = objects.create::<Chair>(&permit, "Chair", None).unwrap();
        let cushion = objects.read::<Chair, _>(chair, |c| c.cushion.get()).flatten().unwrap();
        let anchor = objects.create::<Anchor>(&permit, "Anchor", None).unwrap();
        anchor_at(&objects, &permit, anchor, cushion);

        assert!(objects.mark_for_delete(&permit, cushion));
        let stats = objects.collect_unreachable(&permit);

        assert!(!objects.is_valid(cushion));
        assert!(objects.is_valid(chair));
        assert_eq!(stats.destroyed, 1);
        // Both the chair's pointer and the anchor's reference were nulled.
        assert_eq!(stats.cleared_refs, 2);
        assert_eq!(objects.read::<Chair, _>(chair, |c| c.cushion), Some(ObjPtr::NULL));
        assert!(objects.read::<Anchor, _>(anchor, |a| a.target.get()).unwrap().is_none());
    }

    #[test]
    fn test_explicit_destroy_refs_are_cleared_and_storage_freed() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let anchor = objects.create::<Anchor>(&permit, "Anchor", None).unwrap();
        let target = objects.create::<Cushion>(&permit, "Target", None).unwrap();
        anchor_at(&objects, &permit, anchor, target);

        objects.destroy_object(&permit, target);
        assert_eq!(objects.pending_gc_count(), 1);
        let stats = objects.collect_unreachable(&permit);

        assert_eq!(stats.cleared_refs, 1);
        assert_eq!(stats.freed, 1);
        assert_eq!(objects.pending_gc_count(), 0);
        assert!(objects.read::<Anchor, _>(anchor, |a| a.target.get()).unwrap().is_none());
    }

    #[test]
    fn test_swept_objects_skip_pending_garbage() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let cushion_class = objects.types().descriptor_of::<Cushion>();
        let loose = objects.create::<Cushion>(&permit, "Loose", None).unwrap();
        objects.clear_flags(&permit, loose, ObjectFlags::ROOT_OBJECT);

        let stats = objects.collect_unreachable(&permit);

        assert_eq!(stats.destroyed, 1);
        // GC_PURGE frees storage on destroy, nothing is parked.
        assert_eq!(stats.freed, 0);
        assert_eq!(objects.storage_usage(cushion_class).map(|(live, _)| live), Some(0));
    }

    #[test]
    fn test_budgeted_steps_finish_the_cycle() {
        let objects = CoreObjects::with_config(
            Arc::new(TypeRegistry::new()),
            RuntimeConfig {
                gc: GcConfig {
                    step_budget: 2,
                    ..GcConfig::default()
                },
                ..RuntimeConfig::default()
            },
        );
        let permit = objects.mutation_permit();
        objects.register_class::<Cushion>(&permit);
        let loose: Vec<_> = (0..5)
            .map(|i| {
                let id = objects.create::<Cushion>(&permit, &format!("Loose{i}"), None).unwrap();
                objects.clear_flags(&permit, id, ObjectFlags::ROOT_OBJECT);
                id
            })
            .collect();
        let root = objects.create::<Cushion>(&permit, "Root", None).unwrap();

        let mut ticks = 0;
        let stats = loop {
            ticks += 1;
            match objects.gc_tick(&permit) {
                GcStatus::Finished(stats) => break stats,
                GcStatus::Pending(phase) => assert_eq!(objects.gc_phase(), phase),
            }
        };

        assert!(ticks > 1);
        assert_eq!(stats.destroyed, 5);
        assert_eq!(stats.restarts, 0);
        assert!(objects.is_valid(root));
        assert!(loose.iter().all(|&id| !objects.is_valid(id)));
    }

    #[test]
    fn test_edit_between_steps_restarts_marking() {
        let objects = runtime();
        let permit = objects.mutation_permit();
        let anchor = objects.create::<Anchor>(&permit, "Anchor", None).unwrap();
        let spare = objects.create::<Cushion>(&permit, "Spare", None).unwrap();
        objects.clear_flags(&permit, spare, ObjectFlags::ROOT_OBJECT);

        // One unit marks the anchor, the spare is queued for the sweep.
        assert_eq!(objects.gc_step(&permit, 1), GcStatus::Pending(GcPhase::Sweeping));
        anchor_at(&objects, &permit, anchor, spare);
        let stats = objects.collect_unreachable(&permit);

        assert!(objects.is_valid(spare));
        assert_eq!(stats.restarts, 1);
        assert_eq!(stats.destroyed, 0);
    }
}
