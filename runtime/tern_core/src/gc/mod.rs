//! Cooperative mark-and-sweep collector over an instance arena.
//!
//! # Architecture
//!
//! Every deep instance lives in a slot of the [`Heap`] arena and is addressed
//! by an [`Instance`] handle (slot index + generation). Freeing a slot bumps
//! its generation, so a stale handle is rejected with an access failure
//! instead of aliasing whatever reuses the slot.
//!
//! A collection pass:
//!
//! 1. advances the mark [`Epoch`]
//! 2. seeds a [`Tracer`] worklist from the caller's roots and from every
//!    untracked instance
//! 3. pops instances off the worklist, stamps them with the epoch and asks
//!    their handler to trace outgoing references
//!    ([`TypeHandler::mark`](crate::handler::TypeHandler::mark))
//! 4. asks each tracked instance's handler whether its stamp proves it
//!    reachable, and moves every rejected instance's data into
//!    [`TypeHandler::dispose`](crate::handler::TypeHandler::dispose)
//!
//! Only the heap frees instance data, and it does so exactly once per
//! instance: the data is moved out of the slot before disposal.

use std::any::Any;
use std::fmt;

use crate::errors::{access_error, type_mismatch, Failure};
use crate::handler::HandlerRef;
use crate::value::Value;

/// Instance data as stored in the arena.
pub type InstanceData = Box<dyn Any + Send>;

/// Handle to an arena slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instance {
    index: u32,
    generation: u32,
}

impl Instance {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Monotonic mark counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Epoch {
    pub const ZERO: Epoch = Epoch(0);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Epoch(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

/// Worklist of instances reached during a mark pass.
#[derive(Default)]
pub struct Tracer {
    worklist: Vec<Instance>,
}

impl Tracer {
    pub fn instance(&mut self, instance: Instance) {
        self.worklist.push(instance);
    }

    pub fn value(&mut self, value: &Value) {
        if let Some(instance) = value.instance() {
            self.worklist.push(instance);
        }
    }

    pub fn values<'a>(&mut self, values: impl IntoIterator<Item = &'a Value>) {
        for value in values {
            self.value(value);
        }
    }

    /// Everything reported so far, unmarked.
    pub(crate) fn into_instances(self) -> Vec<Instance> {
        self.worklist
    }
}

/// Outcome of one collection pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub epoch: Epoch,
    pub marked: usize,
    pub freed: usize,
    pub live: usize,
}

/// Lifetime counters of a heap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcStats {
    pub passes: u64,
    pub allocated: u64,
    pub freed: u64,
}

struct Entry {
    handler: HandlerRef,
    data: InstanceData,
    mark: Epoch,
    tracked: bool,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Arena owning every registered instance.
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    epoch: Epoch,
    live: usize,
    since_last_pass: usize,
    threshold: usize,
    stats: GcStats,
}

impl Heap {
    /// Create a heap that asks for a pass every `threshold` tracked stores.
    pub fn new(threshold: usize) -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            epoch: Epoch::ZERO,
            live: 0,
            since_last_pass: 0,
            threshold,
            stats: GcStats::default(),
        }
    }

    /// Hand `data` to the collector. It is disposed once unreachable.
    pub fn gc_store(&mut self, handler: HandlerRef, data: InstanceData) -> Instance {
        self.since_last_pass += 1;
        self.insert(handler, data, true)
    }

    /// Store caller-owned data. It is never collected, is treated as a root,
    /// and must be freed with [`Heap::release`].
    pub fn store_untracked(&mut self, handler: HandlerRef, data: InstanceData) -> Instance {
        self.insert(handler, data, false)
    }

    fn insert(&mut self, handler: HandlerRef, data: InstanceData, tracked: bool) -> Instance {
        let entry = Entry {
            handler,
            data,
            mark: self.epoch,
            tracked,
        };
        self.live += 1;
        self.stats.allocated += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return Instance {
                index,
                generation: slot.generation,
            };
        }
        #[expect(
            clippy::cast_possible_truncation,
            reason = "an arena of 2^32 slots is beyond any supported heap"
        )]
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        Instance {
            index,
            generation: 0,
        }
    }

    fn entry(&self, instance: Instance) -> Result<&Entry, Failure> {
        self.slots
            .get(instance.index as usize)
            .filter(|slot| slot.generation == instance.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or_else(|| stale(instance))
    }

    fn entry_mut(&mut self, instance: Instance) -> Result<&mut Entry, Failure> {
        self.slots
            .get_mut(instance.index as usize)
            .filter(|slot| slot.generation == instance.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or_else(|| stale(instance))
    }

    /// Whether `instance` still names live data.
    pub fn contains(&self, instance: Instance) -> bool {
        self.entry(instance).is_ok()
    }

    /// Typed read access to instance data.
    pub fn get<T: Any>(&self, instance: Instance) -> Result<&T, Failure> {
        let entry = self.entry(instance)?;
        entry
            .data
            .downcast_ref::<T>()
            .ok_or_else(|| type_mismatch(std::any::type_name::<T>(), entry.handler.info().name()))
    }

    /// Typed write access to instance data.
    pub fn get_mut<T: Any>(&mut self, instance: Instance) -> Result<&mut T, Failure> {
        let entry = self.entry_mut(instance)?;
        if !entry.data.is::<T>() {
            return Err(type_mismatch(
                std::any::type_name::<T>(),
                entry.handler.info().name(),
            ));
        }
        entry
            .data
            .downcast_mut::<T>()
            .ok_or_else(|| stale(instance))
    }

    pub fn handler_of(&self, instance: Instance) -> Result<&HandlerRef, Failure> {
        self.entry(instance).map(|entry| &entry.handler)
    }

    /// Whether the collector tracks `instance`.
    pub fn is_tracked(&self, instance: Instance) -> bool {
        self.entry(instance).is_ok_and(|entry| entry.tracked)
    }

    /// Epoch at which `instance` was last proven reachable.
    pub fn mark_of(&self, instance: Instance) -> Option<Epoch> {
        self.entry(instance).ok().map(|entry| entry.mark)
    }

    /// Dispose an untracked instance now.
    pub fn release(&mut self, instance: Instance) -> Result<(), Failure> {
        if self.is_tracked(instance) {
            return Err(access_error(format!(
                "instance {instance} is owned by the collector"
            )));
        }
        let entry = self.take(instance)?;
        entry.handler.dispose(entry.data);
        Ok(())
    }

    fn take(&mut self, instance: Instance) -> Result<Entry, Failure> {
        let slot = self
            .slots
            .get_mut(instance.index as usize)
            .filter(|slot| slot.generation == instance.generation)
            .ok_or_else(|| stale(instance))?;
        let entry = slot.entry.take().ok_or_else(|| stale(instance))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(instance.index);
        self.live -= 1;
        self.stats.freed += 1;
        Ok(entry)
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Number of instances currently stored.
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    /// Whether enough tracked stores happened since the last pass.
    pub fn should_collect(&self) -> bool {
        self.since_last_pass >= self.threshold
    }

    /// Run one full pass. `roots` pushes every root reference into the tracer.
    #[tracing::instrument(level = "debug", skip_all, fields(epoch = tracing::field::Empty))]
    pub fn collect(&mut self, roots: impl FnOnce(&mut Tracer)) -> CollectStats {
        let epoch = self.epoch.next();
        self.epoch = epoch;
        tracing::Span::current().record("epoch", epoch.raw());

        let mut tracer = Tracer::default();
        roots(&mut tracer);
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(entry) = &slot.entry {
                if !entry.tracked {
                    #[expect(
                        clippy::cast_possible_truncation,
                        reason = "slot indices are created from u32"
                    )]
                    tracer.instance(Instance {
                        index: index as u32,
                        generation: slot.generation,
                    });
                }
            }
        }

        let marked = self.mark(&mut tracer, epoch);
        let freed = self.sweep(epoch);

        self.since_last_pass = 0;
        self.stats.passes += 1;
        let stats = CollectStats {
            epoch,
            marked,
            freed,
            live: self.live,
        };
        tracing::debug!(marked, freed, live = self.live, "collection pass finished");
        stats
    }

    fn mark(&mut self, tracer: &mut Tracer, epoch: Epoch) -> usize {
        let mut marked = 0;
        while let Some(instance) = tracer.worklist.pop() {
            let handler = match self.entry_mut(instance) {
                Ok(entry) if entry.mark != epoch => {
                    entry.mark = epoch;
                    HandlerRef::clone(&entry.handler)
                }
                // Already stamped this pass, or a stale handle.
                _ => continue,
            };
            marked += 1;
            handler.info().stamp(epoch);
            handler.mark(self, instance, tracer);
        }
        marked
    }

    fn sweep(&mut self, epoch: Epoch) -> usize {
        let mut doomed = Vec::new();
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(entry) = &slot.entry else { continue };
            if entry.tracked && !entry.handler.is_reachable(entry.mark, epoch) {
                #[expect(
                    clippy::cast_possible_truncation,
                    reason = "slot indices are created from u32"
                )]
                doomed.push(Instance {
                    index: index as u32,
                    generation: slot.generation,
                });
            }
        }
        let freed = doomed.len();
        for instance in doomed {
            if let Ok(entry) = self.take(instance) {
                entry.handler.dispose(entry.data);
            }
        }
        freed
    }
}

#[cold]
fn stale(instance: Instance) -> Failure {
    access_error(format!("instance {instance} is not live"))
}

#[cfg(test)]
mod tests;
