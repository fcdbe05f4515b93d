//! Modal-request registry.
//!
//! A single map from modal identifier to its open state and payload, owned by the parent
//! view, instead of one open/closed flag per modal.

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct ModalRegistry<K: Ord, P> {
    open: BTreeMap<K, P>,
}

impl<K: Ord, P> Default for ModalRegistry<K, P> {
    fn default() -> Self {
        Self {
            open: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Copy, P> ModalRegistry<K, P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `id` with `payload`. Re-opening replaces the payload and returns the old one.
    pub fn open(&mut self, id: K, payload: P) -> Option<P> {
        self.open.insert(id, payload)
    }

    pub fn close(&mut self, id: K) -> Option<P> {
        self.open.remove(&id)
    }

    pub fn close_all(&mut self) {
        self.open.clear();
    }

    pub fn is_open(&self, id: K) -> bool {
        self.open.contains_key(&id)
    }

    pub fn payload(&self, id: K) -> Option<&P> {
        self.open.get(&id)
    }

    pub fn payload_mut(&mut self, id: K) -> Option<&mut P> {
        self.open.get_mut(&id)
    }

    /// Identifiers of open modals in key order.
    pub fn open_ids(&self) -> Vec<K> {
        self.open.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}
