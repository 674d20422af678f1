//! Deduplication of binding layouts and binding sets.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::binding::BindingItemKey;
use super::{BindingLayout, BindingSet, BindingSetDescriptor};
use crate::error::RhiError;
use crate::types::{BindingLayoutDescriptor, ResourceId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindingSetKey {
    layout: ResourceId,
    items: Vec<BindingItemKey>,
}

/// Device-level cache that shares identical layouts and binding sets.
///
/// Entries are weak: the cache never keeps an object alive, and an entry
/// whose object was dropped is replaced on the next request.
#[derive(Debug, Default)]
pub struct BindingCache {
    layouts: RwLock<HashMap<BindingLayoutDescriptor, Weak<BindingLayout>>>,
    sets: RwLock<HashMap<BindingSetKey, Weak<BindingSet>>>,
}

impl BindingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a live layout for `descriptor`, or create one with `create`.
    pub fn get_or_create_layout(
        &self,
        descriptor: &BindingLayoutDescriptor,
        create: impl FnOnce() -> Result<Arc<BindingLayout>, RhiError>,
    ) -> Result<Arc<BindingLayout>, RhiError> {
        // Fast path: read lock
        if let Some(layout) = self.layouts.read().get(descriptor).and_then(Weak::upgrade) {
            return Ok(layout);
        }

        let mut layouts = self.layouts.write();
        if let Some(layout) = layouts.get(descriptor).and_then(Weak::upgrade) {
            return Ok(layout);
        }
        let layout = create()?;
        layouts.insert(descriptor.clone(), Arc::downgrade(&layout));
        Ok(layout)
    }

    /// Get a live set with the same layout and items, or create one with `create`.
    pub fn get_or_create_set(
        &self,
        layout: &BindingLayout,
        descriptor: &BindingSetDescriptor,
        create: impl FnOnce() -> Result<Arc<BindingSet>, RhiError>,
    ) -> Result<Arc<BindingSet>, RhiError> {
        let key = BindingSetKey {
            layout: layout.id(),
            items: descriptor.cache_keys(),
        };
        if let Some(set) = self.sets.read().get(&key).and_then(Weak::upgrade) {
            return Ok(set);
        }

        let mut sets = self.sets.write();
        if let Some(set) = sets.get(&key).and_then(Weak::upgrade) {
            return Ok(set);
        }
        let set = create()?;
        sets.insert(key, Arc::downgrade(&set));
        Ok(set)
    }

    /// Drop entries whose objects no longer exist. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut removed = 0;
        {
            let mut layouts = self.layouts.write();
            let before = layouts.len();
            layouts.retain(|_, layout| layout.strong_count() > 0);
            removed += before - layouts.len();
        }
        let mut sets = self.sets.write();
        let before = sets.len();
        sets.retain(|_, set| set.strong_count() > 0);
        removed += before - sets.len();
        if removed > 0 {
            log::trace!("Pruned {removed} binding cache entries");
        }
        removed
    }

    /// Number of layout entries, live or not.
    pub fn layout_count(&self) -> usize {
        self.layouts.read().len()
    }

    /// Number of binding set entries, live or not.
    pub fn set_count(&self) -> usize {
        self.sets.read().len()
    }
}
