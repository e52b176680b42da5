// src/util/snapshot.rs
//
// Swappable read snapshot. Queries clone out an Arc and keep using
// their snapshot even while a reload swaps in a fresh one; the old
// snapshot is freed when its last borrower drops.

use std::sync::{Arc, RwLock};

pub struct Snapshot<T> {
    inner: RwLock<Arc<T>>,
}

impl<T> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(Arc::new(value)),
        }
    }

    pub fn load(&self) -> Arc<T> {
        self.inner.read().expect("snapshot lock poisoned").clone()
    }

    /// Swap in a new value, returning the previous snapshot.
    pub fn swap(&self, value: T) -> Arc<T> {
        let mut guard = self.inner.write().expect("snapshot lock poisoned");
        std::mem::replace(&mut guard, Arc::new(value))
    }
}
