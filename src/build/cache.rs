//! Thread-safe caches for built buffers and primitives.
//!
//! Both caches use `parking_lot::RwLock` so layout decisions can be made
//! from any worker thread. Inserts never replace an existing entry; the
//! entry already present wins, which keeps `Arc` identity stable.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;

use super::{BuiltPrimitive, GpuBuffer};
use crate::document::{BufferView, Primitive};

/// Identity of the source data a built buffer was made from.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum SharingKey {
    /// A view carrying an explicit key: same buffer, key and range share.
    Keyed {
        buffer: usize,
        key: String,
        view_offset: u64,
        view_length: u64,
    },
    /// A view without key is only shared with itself.
    View(usize),
}

impl SharingKey {
    pub fn for_view(index: usize, view: &BufferView) -> Self {
        match &view.key {
            Some(key) => Self::Keyed {
                buffer: view.buffer,
                key: key.clone(),
                view_offset: view.offset(),
                view_length: view.byte_length,
            },
            None => Self::View(index),
        }
    }
}

/// Key of a built buffer: the whole view, or the view split at an offset.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct BufferKey {
    pub source: SharingKey,
    pub split_at: Option<u64>,
}

impl BufferKey {
    pub fn shared(source: SharingKey) -> Self {
        Self { source, split_at: None }
    }

    pub fn split(source: SharingKey, offset: u64) -> Self {
        Self {
            source,
            split_at: Some(offset),
        }
    }
}

/// Identity of a primitive: its full attribute set plus indices.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PrimitiveKey {
    attributes: SmallVec<[(String, usize); 4]>,
    indices: Option<usize>,
}

impl PrimitiveKey {
    pub fn of(primitive: &Primitive) -> Self {
        // BTreeMap iteration is sorted, so equal sets give equal keys
        Self {
            attributes: primitive
                .attributes
                .iter()
                .map(|(name, &acc)| (name.clone(), acc))
                .collect(),
            indices: primitive.indices,
        }
    }
}

/// Insert-once map behind a read/write lock.
pub struct SharedCache<K, V> {
    map: RwLock<HashMap<K, Arc<V>>>,
    hits: AtomicUsize,
}

impl<K: Hash + Eq, V> SharedCache<K, V> {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            hits: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let hit = self.map.read().get(key).cloned();
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Insert unless present; returns the entry that ends up cached.
    pub fn insert(&self, key: K, value: Arc<V>) -> Arc<V> {
        let mut map = self.map.write();
        Arc::clone(map.entry(key).or_insert(value))
    }

    /// Insert a batch under one lock, returning the canonical entries in order.
    pub fn commit(&self, entries: Vec<(K, Arc<V>)>) -> Vec<Arc<V>> {
        let mut map = self.map.write();
        entries
            .into_iter()
            .map(|(k, v)| Arc::clone(map.entry(k).or_insert(v)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Number of successful lookups so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.map.write().clear();
        self.hits.store(0, Ordering::Relaxed);
    }
}

impl<K: Hash + Eq, V> Default for SharedCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

pub type BufferCache = SharedCache<BufferKey, GpuBuffer>;
pub type PrimitiveCache = SharedCache<PrimitiveKey, BuiltPrimitive>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_first() {
        let cache: SharedCache<u32, GpuBuffer> = SharedCache::new();
        let a = Arc::new(GpuBuffer::new(vec![1]));
        let b = Arc::new(GpuBuffer::new(vec![2]));
        let first = cache.insert(7, Arc::clone(&a));
        let second = cache.insert(7, b);
        assert!(Arc::ptr_eq(&first, &a));
        assert!(Arc::ptr_eq(&second, &a));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hits() {
        let cache: SharedCache<u32, GpuBuffer> = SharedCache::default();
        assert!(cache.get(&1).is_none());
        cache.insert(1, Arc::new(GpuBuffer::new(vec![])));
        assert!(cache.get(&1).is_some());
        assert_eq!(cache.hits(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sharing_key() {
        let plain = BufferView::new(0, 16, 64);
        assert_eq!(SharingKey::for_view(3, &plain), SharingKey::View(3));

        let a = BufferView::new(0, 16, 64).with_key("vb");
        let b = BufferView::new(0, 16, 64).with_key("vb");
        let c = BufferView::new(0, 16, 64).with_key("other");
        assert_eq!(SharingKey::for_view(1, &a), SharingKey::for_view(2, &b));
        assert_ne!(SharingKey::for_view(1, &a), SharingKey::for_view(2, &c));
    }

    #[test]
    fn test_primitive_key() {
        let mut p = Primitive::default();
        p.attributes.insert("POSITION".into(), 0);
        p.attributes.insert("NORMAL".into(), 1);
        let mut q = Primitive::default();
        q.attributes.insert("NORMAL".into(), 1);
        q.attributes.insert("POSITION".into(), 0);
        assert_eq!(PrimitiveKey::of(&p), PrimitiveKey::of(&q));
        q.indices = Some(2);
        assert_ne!(PrimitiveKey::of(&p), PrimitiveKey::of(&q));
    }
}
