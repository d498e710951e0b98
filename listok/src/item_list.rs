//! Item list of the active trip.
//!
//! Shared between the session (which adds and removes items) and background
//! enrichment tasks (which patch them in place). All mutation goes through
//! per-ID operations so an update never touches any other item and never
//! re-inserts an item that was removed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::{self, ShoppingItem};

/// Newest-first list of items, cheap to clone (clones share state).
#[derive(Debug, Clone, Default)]
pub struct ItemList {
    inner: Arc<Mutex<VecDeque<ShoppingItem>>>,
}

impl ItemList {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ShoppingItem>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert at the front (newest first).
    pub fn push_front(&self, item: ShoppingItem) {
        self.lock().push_front(item);
    }

    /// Remove the item with `id`, returning it if it was present.
    pub fn remove(&self, id: &str) -> Option<ShoppingItem> {
        let mut items = self.lock();
        let pos = items.iter().position(|item| item.id == id)?;
        items.remove(pos)
    }

    /// Apply `f` to the item with `id`.
    ///
    /// Returns `false` and does nothing when no such item exists.
    pub fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut ShoppingItem),
    {
        match self.lock().iter_mut().find(|item| item.id == id) {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        }
    }

    /// Copy of the current items, newest first.
    pub fn snapshot(&self) -> Vec<ShoppingItem> {
        self.lock().iter().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<ShoppingItem> {
        self.lock().iter().find(|item| item.id == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().iter().any(|item| item.id == id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Running total, recomputed from the current items on every call.
    pub fn total_spent(&self) -> f64 {
        types::total_spent(self.lock().iter())
    }
}
