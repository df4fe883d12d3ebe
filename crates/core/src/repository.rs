//! Keyed entity storage abstraction.
//!
//! Components talk to a [`Repository`] instead of owning raw maps so storage
//! can move to a persistent backend without touching component logic. Reads
//! always hand out owned copies, never live references.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::entity::Entity;
use crate::error::{AnalyticsError, AnalyticsResult};

pub trait Repository<E: Entity>: Send + Sync {
    fn get(&self, id: &E::Id) -> Option<E>;

    /// Insert a new entity; fails with `Conflict` if the id is taken.
    fn insert(&self, entity: E) -> AnalyticsResult<()>;

    /// Atomically mutate one entity.
    ///
    /// The closure runs against a working copy under the entity's write lock.
    /// The copy is committed only if the closure returns `Ok`, so a rejected
    /// mutation leaves the stored entity untouched.
    fn update<R>(
        &self,
        id: &E::Id,
        f: impl FnOnce(&mut E) -> AnalyticsResult<R>,
    ) -> AnalyticsResult<R>;

    /// All entities, in insertion order.
    fn list(&self) -> Vec<E>;

    /// Whether any stored entity satisfies `pred`. Nothing is cloned.
    fn any(&self, pred: impl Fn(&E) -> bool) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E, S> Repository<E> for Arc<S>
where
    E: Entity,
    S: Repository<E> + ?Sized,
{
    fn get(&self, id: &E::Id) -> Option<E> {
        (**self).get(id)
    }

    fn insert(&self, entity: E) -> AnalyticsResult<()> {
        (**self).insert(entity)
    }

    fn update<R>(
        &self,
        id: &E::Id,
        f: impl FnOnce(&mut E) -> AnalyticsResult<R>,
    ) -> AnalyticsResult<R> {
        (**self).update(id, f)
    }

    fn list(&self) -> Vec<E> {
        (**self).list()
    }

    fn any(&self, pred: impl Fn(&E) -> bool) -> bool {
        (**self).any(pred)
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

type Slot<E> = Arc<RwLock<E>>;

#[derive(Debug)]
struct Arena<E: Entity> {
    slots: Vec<Slot<E>>,
    index: HashMap<E::Id, usize>,
}

/// In-memory repository: an append-only arena of per-entity locks plus an
/// id index.
///
/// The collection lock is only held long enough to find a slot; mutations
/// then lock the single entity, so writers on different entities do not
/// serialize and a reader never observes a half-applied mutation.
#[derive(Debug)]
pub struct InMemoryRepository<E: Entity> {
    inner: RwLock<Arena<E>>,
}

impl<E: Entity> InMemoryRepository<E> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arena {
                slots: Vec::new(),
                index: HashMap::new(),
            }),
        }
    }

    fn slot(&self, id: &E::Id) -> Option<Slot<E>> {
        let arena = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        arena.index.get(id).map(|&i| arena.slots[i].clone())
    }

    fn slots(&self) -> Vec<Slot<E>> {
        let arena = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        arena.slots.clone()
    }
}

impl<E: Entity> Default for InMemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Repository<E> for InMemoryRepository<E> {
    fn get(&self, id: &E::Id) -> Option<E> {
        let slot = self.slot(id)?;
        let entity = slot.read().unwrap_or_else(PoisonError::into_inner);
        Some(entity.clone())
    }

    fn insert(&self, entity: E) -> AnalyticsResult<()> {
        let mut arena = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let id = entity.id().clone();
        if arena.index.contains_key(&id) {
            return Err(AnalyticsError::conflict(format!(
                "{} {} already exists",
                E::KIND,
                id
            )));
        }
        let position = arena.slots.len();
        arena.slots.push(Arc::new(RwLock::new(entity)));
        arena.index.insert(id, position);
        Ok(())
    }

    fn update<R>(
        &self,
        id: &E::Id,
        f: impl FnOnce(&mut E) -> AnalyticsResult<R>,
    ) -> AnalyticsResult<R> {
        let slot = self
            .slot(id)
            .ok_or_else(|| AnalyticsError::not_found(E::KIND, id))?;
        let mut stored = slot.write().unwrap_or_else(PoisonError::into_inner);
        let mut working = stored.clone();
        let out = f(&mut working)?;
        *stored = working;
        Ok(out)
    }

    fn list(&self) -> Vec<E> {
        self.slots()
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }

    fn any(&self, pred: impl Fn(&E) -> bool) -> bool {
        self.slots()
            .iter()
            .any(|s| pred(&s.read().unwrap_or_else(PoisonError::into_inner)))
    }

    fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len()
    }
}
