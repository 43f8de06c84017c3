//! The entity registry.
//!
//! Mirrors the shape of `WorldSEnder-stealth-paint`'s `Pool`:
//! a `SlotMap` holding the actual values behind small `Copy` keys, plus side
//! indices for name/id lookup. Unlike the C original, identity is never a
//! raw pointer: `insert` deduplicates by content fingerprint *before* a new
//! slot is ever created, so two value-equal entities are guaranteed to share
//! one `Handle`.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use slotmap::{new_key_type, SlotMap};

use crate::error::{BablError, Result};

new_key_type! {
    struct Slot;
}

/// Implemented by every entity class stored in a [`Registry`].
pub trait Entity {
    /// Zero means "anonymous"; only name-based lookup finds it.
    fn id(&self) -> u32;
    fn name(&self) -> &str;
    /// Content fingerprint used for value-based interning.
    fn fingerprint(&self) -> u64;
}

/// A small, `Copy` reference to an interned entity of type `T`.
///
/// Stable for the lifetime of the owning [`Registry`]; plays the role that
/// pointer identity would, without ever dereferencing a raw pointer.
pub struct Handle<T> {
    slot: Slot,
    dense: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot
    }
}
impl<T> Eq for Handle<T> {}
impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
    }
}
impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("dense", &self.dense).finish()
    }
}

impl<T> Handle<T> {
    /// Dense, zero-based position assigned at first insertion. Used by the
    /// path search (`search.rs`) to index a caller-local visited bitmap
    /// instead of mutating a flag on the shared entity.
    pub fn dense_index(&self) -> u32 {
        self.dense
    }
}

struct Entry<T> {
    value: T,
    dense: u32,
}

/// Deduplicated, insertion-ordered storage for one entity class.
pub struct Registry<T> {
    slots: SlotMap<Slot, Entry<T>>,
    order: Vec<Slot>,
    by_name: HashMap<String, Slot>,
    by_id: HashMap<u32, Slot>,
    by_fingerprint: HashMap<u64, Slot>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Registry {
            slots: SlotMap::with_key(),
            order: Vec::new(),
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            by_fingerprint: HashMap::new(),
        }
    }
}

impl<T: Entity> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_for(&self, slot: Slot) -> Handle<T> {
        Handle {
            slot,
            dense: self.slots[slot].dense,
            _marker: PhantomData,
        }
    }

    /// Insert `entity`, deduplicating by fingerprint, then by id, then by
    /// name. Insertion is idempotent.
    ///
    /// # Panics
    /// Panics if `entity` carries a non-zero id already registered under a
    /// different name — a fatal programming error, not a recoverable one.
    pub fn insert(&mut self, entity: T) -> Handle<T> {
        let fingerprint = entity.fingerprint();
        if let Some(&slot) = self.by_fingerprint.get(&fingerprint) {
            return self.handle_for(slot);
        }
        if entity.id() != 0 {
            if let Some(&slot) = self.by_id.get(&entity.id()) {
                let existing = &self.slots[slot].value;
                assert_eq!(
                    existing.name(),
                    entity.name(),
                    "id {} already registered under name `{}`, refusing to rebind to `{}`",
                    entity.id(),
                    existing.name(),
                    entity.name(),
                );
                return self.handle_for(slot);
            }
        }
        if let Some(&slot) = self.by_name.get(entity.name()) {
            return self.handle_for(slot);
        }

        let dense = self.order.len() as u32;
        let id = entity.id();
        let name = entity.name().to_owned();
        let slot = self.slots.insert(Entry { value: entity, dense });
        self.order.push(slot);
        self.by_fingerprint.insert(fingerprint, slot);
        if id != 0 {
            self.by_id.insert(id, slot);
        }
        self.by_name.insert(name, slot);
        self.handle_for(slot)
    }

    /// Like [`insert`](Self::insert) but returns an error instead of
    /// panicking on an id/name collision; used by the public builder APIs
    /// (`context.rs`) which surface `BablError::IdNameCollision` rather than
    /// aborting, leaving the "log and abort" decision to the caller.
    pub fn try_insert(&mut self, entity: T) -> Result<Handle<T>> {
        if entity.id() != 0 {
            if let Some(&slot) = self.by_id.get(&entity.id()) {
                let existing = &self.slots[slot].value;
                if existing.name() != entity.name() {
                    return Err(BablError::IdNameCollision {
                        id: entity.id(),
                        existing: existing.name().to_owned(),
                        requested: entity.name().to_owned(),
                    });
                }
            }
        }
        Ok(self.insert(entity))
    }

    pub fn lookup(&self, name: &str) -> Option<Handle<T>> {
        self.by_name.get(name).map(|&slot| self.handle_for(slot))
    }

    pub fn lookup_by_id(&self, id: u32) -> Option<Handle<T>> {
        self.by_id.get(&id).map(|&slot| self.handle_for(slot))
    }

    pub fn get(&self, handle: Handle<T>) -> &T {
        &self.slots[handle.slot].value
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Deterministic insertion-order iteration.
    pub fn iterate(&self) -> impl Iterator<Item = Handle<T>> + '_ {
        self.order.iter().map(move |&slot| self.handle_for(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Thing {
        id: u32,
        name: String,
        fp: u64,
    }

    impl Entity for Thing {
        fn id(&self) -> u32 {
            self.id
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn fingerprint(&self) -> u64 {
            self.fp
        }
    }

    #[test]
    fn insert_is_idempotent_by_fingerprint() {
        let mut reg: Registry<Thing> = Registry::new();
        let a = reg.insert(Thing { id: 0, name: "a".into(), fp: 1 });
        let b = reg.insert(Thing { id: 0, name: "a-dup".into(), fp: 1 });
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn insert_is_idempotent_by_name() {
        let mut reg: Registry<Thing> = Registry::new();
        let a = reg.insert(Thing { id: 0, name: "a".into(), fp: 1 });
        let b = reg.insert(Thing { id: 0, name: "a".into(), fp: 2 });
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    #[should_panic]
    fn id_collision_with_different_name_panics() {
        let mut reg: Registry<Thing> = Registry::new();
        reg.insert(Thing { id: 7, name: "a".into(), fp: 1 });
        reg.insert(Thing { id: 7, name: "b".into(), fp: 2 });
    }

    #[test]
    fn try_insert_surfaces_collision_as_error() {
        let mut reg: Registry<Thing> = Registry::new();
        reg.insert(Thing { id: 7, name: "a".into(), fp: 1 });
        let err = reg
            .try_insert(Thing { id: 7, name: "b".into(), fp: 2 })
            .unwrap_err();
        assert!(matches!(err, BablError::IdNameCollision { .. }));
    }

    #[test]
    fn dense_index_is_insertion_order() {
        let mut reg: Registry<Thing> = Registry::new();
        let a = reg.insert(Thing { id: 0, name: "a".into(), fp: 1 });
        let b = reg.insert(Thing { id: 0, name: "b".into(), fp: 2 });
        assert_eq!(a.dense_index(), 0);
        assert_eq!(b.dense_index(), 1);
    }

    #[test]
    fn iterate_preserves_insertion_order() {
        let mut reg: Registry<Thing> = Registry::new();
        reg.insert(Thing { id: 0, name: "a".into(), fp: 1 });
        reg.insert(Thing { id: 0, name: "b".into(), fp: 2 });
        reg.insert(Thing { id: 0, name: "c".into(), fp: 3 });
        let names: Vec<_> = reg.iterate().map(|h| reg.get(h).name.clone()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
