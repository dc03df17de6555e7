//! Subscription and advertisement tables. Both preserve insertion order so
//! reconnect replay can re-send entries in the order the application
//! created them.

use std::sync::Arc;

use serde_json::Value as JsonValue;

/// A subscriber callback. Identity-compared (`Arc::ptr_eq`) for set
/// semantics — the same `Arc` registered twice is a no-op.
pub type Callback = Arc<dyn Fn(JsonValue) + Send + Sync>;

pub struct SubscriptionEntry {
    pub msg_type: String,
    pub compression: Option<String>,
    pub callbacks: Vec<Callback>,
}

impl SubscriptionEntry {
    /// Returns `true` if the callback was newly added (not already present).
    pub fn add_callback(&mut self, callback: Callback) -> bool {
        if self.callbacks.iter().any(|existing| Arc::ptr_eq(existing, &callback)) {
            return false;
        }
        self.callbacks.push(callback);
        true
    }
}

pub struct AdvertisementEntry {
    pub msg_type: String,
}

/// An insertion-ordered keyed table, shared by subscriptions and
/// advertisements. A `Vec<String>` tracks order alongside a `HashMap` for
/// O(1) lookup; tables in this crate stay small (one entry per topic an
/// application actually uses), so the linear removal cost is immaterial.
pub struct OrderedTable<V> {
    order: Vec<String>,
    entries: std::collections::HashMap<String, V>,
}

impl<V> Default for OrderedTable<V> {
    fn default() -> Self {
        OrderedTable {
            order: Vec::new(),
            entries: std::collections::HashMap::new(),
        }
    }
}

impl<V> OrderedTable<V> {
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: String, value: V) {
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.order.retain(|k| k != key);
        self.entries.remove(key)
    }

    /// Iterates entries in insertion order, as required for replay.
    pub fn iter_in_order(&self) -> impl Iterator<Item = (&String, &V)> {
        self.order.iter().map(move |k| (k, self.entries.get(k).expect("order/map in sync")))
    }
}

pub type SubscriptionTable = OrderedTable<SubscriptionEntry>;
pub type AdvertisementTable = OrderedTable<AdvertisementEntry>;
