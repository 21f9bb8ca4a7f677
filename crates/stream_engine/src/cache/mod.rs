//! Reference-counted GPU object caches
//!
//! Pipelines, render passes, descriptor-set layouts and textures are
//! generated lazily on first request and shared by reference count. Lifetime
//! is explicit (`generate_or_get` acquires, `destroy` releases): destruction
//! must land at a GPU-safe point, so nothing here auto-drops on last use.
//! Cross-references between caches go through cache keys resolved at
//! construction time, never through owning pointers into another cache.

pub mod descriptor_layout;
pub mod pipeline;
pub mod render_pass;
pub mod texture;

pub use descriptor_layout::{DescriptorLayoutCache, LayoutBinding, LayoutDescriptor};
pub use pipeline::{CachedPipeline, PipelineCache, PipelineDescriptor};
pub use render_pass::{RenderPassCache, RenderPassDescriptor};
pub use texture::{Texture, TextureCache, TextureDescriptor};

use std::collections::HashMap;
use std::hash::Hash;

use crate::context::VulkanResult;

/// Outcome of releasing a cache entry
#[derive(Debug)]
pub enum Release<T> {
    /// Refcount reached zero; the caller must destroy the object
    Released(T),
    /// Other references remain; nothing to destroy
    Retained,
    /// No entry exists for the key
    NotFound,
}

struct CacheEntry<T> {
    object: T,
    refcount: u32,
}

/// Refcounted object store shared by all concrete caches
pub struct RefCache<K, T> {
    entries: HashMap<K, CacheEntry<T>>,
}

impl<K: Eq + Hash, T> RefCache<K, T> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Look up by key, constructing and inserting at refcount 1 on miss
    ///
    /// A hit increments the refcount and returns the existing object.
    pub fn generate_or_get<F>(&mut self, key: K, create: F) -> VulkanResult<&T>
    where
        F: FnOnce() -> VulkanResult<T>,
    {
        use std::collections::hash_map::Entry;

        match self.entries.entry(key) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                entry.refcount += 1;
                Ok(&entry.object)
            }
            Entry::Vacant(vacant) => {
                let object = create()?;
                let entry = vacant.insert(CacheEntry {
                    object,
                    refcount: 1,
                });
                Ok(&entry.object)
            }
        }
    }

    /// Look up without touching the refcount
    pub fn peek(&self, key: &K) -> Option<&T> {
        self.entries.get(key).map(|entry| &entry.object)
    }

    /// Decrement the refcount, yielding the object when it reaches zero
    pub fn release(&mut self, key: &K) -> Release<T> {
        match self.entries.get_mut(key) {
            None => Release::NotFound,
            Some(entry) if entry.refcount > 1 => {
                entry.refcount -= 1;
                Release::Retained
            }
            Some(_) => match self.entries.remove(key) {
                Some(entry) => Release::Released(entry.object),
                None => Release::NotFound,
            },
        }
    }

    /// Remove every entry regardless of refcount (full teardown only)
    pub fn drain(&mut self) -> Vec<T> {
        self.entries.drain().map(|(_, entry)| entry.object).collect()
    }

    /// Current refcount of a key (0 when absent)
    pub fn refcount(&self, key: &K) -> u32 {
        self.entries.get(key).map_or(0, |entry| entry.refcount)
    }

    /// Number of cached objects
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash, T> Default for RefCache<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miss_inserts_at_refcount_one() {
        let mut cache: RefCache<u64, &str> = RefCache::new();
        let value = cache.generate_or_get(7, || Ok("object")).unwrap();
        assert_eq!(*value, "object");
        assert_eq!(cache.refcount(&7), 1);
    }

    #[test]
    fn test_hit_increments_without_reconstructing() {
        let mut cache: RefCache<u64, u32> = RefCache::new();
        cache.generate_or_get(1, || Ok(10)).unwrap();
        let value = cache
            .generate_or_get(1, || panic!("must not reconstruct on hit"))
            .unwrap();
        assert_eq!(*value, 10);
        assert_eq!(cache.refcount(&1), 2);
    }

    #[test]
    fn test_release_yields_object_only_at_zero() {
        let mut cache: RefCache<u64, u32> = RefCache::new();
        cache.generate_or_get(1, || Ok(10)).unwrap();
        cache.generate_or_get(1, || Ok(10)).unwrap();

        assert!(matches!(cache.release(&1), Release::Retained));
        match cache.release(&1) {
            Release::Released(object) => assert_eq!(object, 10),
            other => panic!("expected Released, got {other:?}"),
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn test_release_unknown_key() {
        let mut cache: RefCache<u64, u32> = RefCache::new();
        assert!(matches!(cache.release(&99), Release::NotFound));
    }

    #[test]
    fn test_drain_ignores_refcounts() {
        let mut cache: RefCache<u64, u32> = RefCache::new();
        cache.generate_or_get(1, || Ok(10)).unwrap();
        cache.generate_or_get(1, || Ok(10)).unwrap();
        cache.generate_or_get(2, || Ok(20)).unwrap();

        let mut drained = cache.drain();
        drained.sort_unstable();
        assert_eq!(drained, vec![10, 20]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_construction_inserts_nothing() {
        let mut cache: RefCache<u64, u32> = RefCache::new();
        let result = cache.generate_or_get(1, || {
            Err(crate::context::VulkanError::InitializationFailed(
                "construction failed".to_string(),
            ))
        });
        assert!(result.is_err());
        assert_eq!(cache.refcount(&1), 0);
        assert!(cache.is_empty());
    }
}
