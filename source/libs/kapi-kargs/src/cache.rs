// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Function-handle to layout cache shared by every caller thread.
//!
//! Layouts are resolved once when a function handle is obtained and read on every launch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::layout::{parse_mangled, FunctionLayout, LayoutError};

/// Function identity -> layout map shared by launch paths.
///
/// Lookups take a read lock only. Parsing happens outside the lock; when two threads race to
/// build the same entry the first insert wins and both observe the same `Arc`.
#[derive(Debug, Default)]
pub struct LayoutCache {
    entries: RwLock<HashMap<u64, Arc<FunctionLayout>>>,
}

impl LayoutCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the layout recorded for `function`, if any.
    pub fn get(&self, function: u64) -> Option<Arc<FunctionLayout>> {
        self.entries.read().get(&function).cloned()
    }

    /// Returns the cached layout or parses `name` and caches the result.
    ///
    /// Parse failures are not cached.
    pub fn get_or_build(&self, function: u64, name: &str) -> Result<Arc<FunctionLayout>, LayoutError> {
        if let Some(layout) = self.get(function) {
            return Ok(layout);
        }
        let built = Arc::new(parse_mangled(name)?);
        let mut entries = self.entries.write();
        let layout = entries.entry(function).or_insert_with(|| {
            log::debug!("kargs: cached {name} as {built}");
            Arc::clone(&built)
        });
        Ok(Arc::clone(layout))
    }

    /// Records `layout` for `function`, replacing any previous entry.
    ///
    /// Function handles can be recycled by the driver after a module unload, so a fresh
    /// resolution always overwrites.
    pub fn insert(&self, function: u64, layout: FunctionLayout) -> Arc<FunctionLayout> {
        let layout = Arc::new(layout);
        if self.entries.write().insert(function, Arc::clone(&layout)).is_some() {
            log::debug!("kargs: replaced layout for function {function:#x}");
        }
        layout
    }

    /// Forgets `function`; the next [`get_or_build`](Self::get_or_build) parses again.
    pub fn remove(&self, function: u64) -> Option<Arc<FunctionLayout>> {
        self.entries.write().remove(&function)
    }

    /// Number of cached layouts.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn build_once_then_hit() {
        let cache = LayoutCache::new();
        let first = cache.get_or_build(0x10, "_Z3addPfS_i").unwrap();
        // Different name on purpose: a hit must not re-parse.
        let second = cache.get_or_build(0x10, "garbage").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_parse_is_not_cached() {
        let cache = LayoutCache::new();
        assert!(cache.get_or_build(1, "_Z3fooPd").is_err());
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_replaces() {
        let cache = LayoutCache::new();
        cache.insert(7, parse_mangled("_Z1ki").unwrap());
        cache.insert(7, parse_mangled("_Z1kl").unwrap());
        assert_eq!(cache.get(7).unwrap().total_size(), 8);
        assert!(cache.remove(7).is_some());
        assert!(cache.remove(7).is_none());
        cache.insert(8, parse_mangled("_Z1kv").unwrap());
        cache.clear();
        assert!(cache.get(8).is_none());
    }

    #[test]
    fn concurrent_builders_agree() {
        let cache = Arc::new(LayoutCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get_or_build(42, "_Z6kernelPfPiij").unwrap())
            })
            .collect();
        let layouts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(layouts.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(layouts[0].total_size(), 24);
    }
}
