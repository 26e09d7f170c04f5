//! Per-handle private data store.
//!
//! Embedding code and optional subsystems attach their own state to a handle
//! under string keys without the handle knowing the types involved.
//!
//! The store owns its keys and never owns values: each entry holds a
//! [`Weak`] reference, so the caller's `Arc` decides how long a value lives.
//! Once the caller drops the last strong reference, lookups for that key
//! return `None`.
//!
//! The backing table is created on first insertion; most handles never use
//! the store at all.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use guestkit_shared::constants::PRIVATE_TABLE_CAPACITY;

use crate::logging::teardown_event;
use crate::memory::Allocator;

type Entry = Weak<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct PrivateData {
    table: Option<HashMap<String, Entry>>,
}

impl std::fmt::Debug for PrivateData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateData")
            .field("entries", &self.len())
            .finish()
    }
}

impl PrivateData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous entry.
    ///
    /// The previous entry's key copy is released; its value is left to
    /// whoever still holds it.
    pub fn set<T>(&mut self, alloc: &Allocator, key: &str, value: &Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let table = self.table.get_or_insert_with(|| {
            let mut table = HashMap::new();
            if table.try_reserve(PRIVATE_TABLE_CAPACITY).is_err() {
                alloc.fail(std::alloc::Layout::new::<[Entry; PRIVATE_TABLE_CAPACITY]>());
            }
            table
        });

        let erased: Arc<dyn Any + Send + Sync> = value.clone();
        let entry = Arc::downgrade(&erased);
        let key = alloc.strdup(key);

        if table.remove(&key).is_some() {
            tracing::trace!(key = %key, "replacing private data entry");
        }
        table.insert(key, entry);
    }

    /// Look up the value stored under `key`.
    ///
    /// Returns `None` if nothing was stored, if the value has since been
    /// dropped by its owner, or if it is not a `T`.
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.get_any(key)?.downcast::<T>().ok()
    }

    /// Untyped lookup.
    pub fn get_any(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.table.as_ref()?.get(key)?.upgrade()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.table
            .as_ref()
            .is_some_and(|table| table.contains_key(key))
    }

    /// Number of stored keys, live or not.
    pub fn len(&self) -> usize {
        self.table.as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the first entry has been stored.
    pub fn is_initialized(&self) -> bool {
        self.table.is_some()
    }

    /// Drop the table and every key copy in it.
    pub fn clear(&mut self) {
        if let Some(table) = self.table.take() {
            teardown_event!(trace, entries = table.len(), "releasing private data table");
        }
    }
}
