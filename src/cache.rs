//! An extension map for derived artifacts: a mapping from artifact-kind
//! tags to owned, type-erased payloads, registered by collaborators after
//! parse. The core neither reads nor interprets these payloads, only owns
//! and frees them — which in Rust means nothing more than letting `Drop` run.

use std::any::Any;
use std::collections::HashMap;

/// The artifact kinds a collaborator may stash in a context's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSlot {
    Imports,
    Exports,
    HashHeaders,
    HashSections,
    HashFile,
    Resources,
}

/// Owned, opaque payloads keyed by [`CacheSlot`]. Populating a slot is a
/// mutation of the context and must be externally serialized if the
/// context is shared across threads.
#[derive(Default)]
pub struct Cache {
    slots: HashMap<CacheSlot, Box<dyn Any + Send + Sync>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the payload for `slot`, dropping whatever
    /// was previously there.
    pub fn insert<T: Any + Send + Sync>(&mut self, slot: CacheSlot, value: T) {
        self.slots.insert(slot, Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, slot: CacheSlot) -> Option<&T> {
        self.slots.get(&slot)?.downcast_ref::<T>()
    }

    pub fn remove(&mut self, slot: CacheSlot) {
        self.slots.remove(&slot);
    }

    pub fn contains(&self, slot: CacheSlot) -> bool {
        self.slots.contains_key(&slot)
    }

    /// Frees every registered payload. Called by `Context`'s teardown.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
