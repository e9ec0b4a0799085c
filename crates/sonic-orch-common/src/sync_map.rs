//! Ordered map that never creates entries implicitly.
//!
//! Reference counts on shared objects (next hops, next-hop groups) must
//! only move through [`SyncMap::increment_ref`] and
//! [`SyncMap::decrement_ref`], which fail on missing keys and on underflow
//! instead of materialising a zeroed entry.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use thiserror::Error;

/// Error type for SyncMap operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncMapError {
    #[error("Key not found")]
    KeyNotFound,

    #[error("Reference count underflow")]
    RefCountUnderflow,
}

/// Trait for types that have a reference count.
pub trait HasRefCount {
    /// Increments the reference count and returns the new value.
    fn increment_ref(&mut self) -> u32;

    /// Decrements the reference count and returns the new value.
    ///
    /// Returns `None` if the count would underflow.
    fn decrement_ref(&mut self) -> Option<u32>;

    fn ref_count(&self) -> u32;
}

/// Ordered map with explicit insertion.
///
/// # Example
///
/// ```
/// use sonic_orch_common::SyncMap;
///
/// let mut map: SyncMap<String, i32> = SyncMap::new();
/// assert!(map.get("missing").is_none());
/// assert!(map.is_empty());
///
/// map.insert("key".to_string(), 42);
/// assert_eq!(map.get("key"), Some(&42));
/// ```
#[derive(Debug, Clone)]
pub struct SyncMap<K, V> {
    inner: BTreeMap<K, V>,
}

impl<K: Ord, V> SyncMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.inner.contains_key(key)
    }

    /// Never creates entries.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.inner.get(key)
    }

    /// Never creates entries.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.inner.get_mut(key)
    }

    /// Returns the old value if the key was already present.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.inner.remove(key)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Iterates in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.inner.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.inner.values_mut()
    }

    /// Explicit get-or-create.
    pub fn get_or_insert_with<F>(&mut self, key: K, f: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        self.inner.entry(key).or_insert_with(f)
    }
}

impl<K: Ord, V: HasRefCount> SyncMap<K, V> {
    /// Returns the new count. Never creates entries.
    pub fn increment_ref<Q>(&mut self, key: &Q) -> Result<u32, SyncMapError>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match self.inner.get_mut(key) {
            Some(entry) => Ok(entry.increment_ref()),
            None => Err(SyncMapError::KeyNotFound),
        }
    }

    /// Returns the new count, or an error on a missing key or underflow.
    pub fn decrement_ref<Q>(&mut self, key: &Q) -> Result<u32, SyncMapError>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match self.inner.get_mut(key) {
            Some(entry) => entry.decrement_ref().ok_or(SyncMapError::RefCountUnderflow),
            None => Err(SyncMapError::KeyNotFound),
        }
    }

    pub fn ref_count<Q>(&self, key: &Q) -> Option<u32>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.inner.get(key).map(|e| e.ref_count())
    }
}

impl<K: Ord, V> Default for SyncMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V> FromIterator<(K, V)> for SyncMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, Default)]
    struct Counted {
        refs: u32,
    }

    impl HasRefCount for Counted {
        fn increment_ref(&mut self) -> u32 {
            self.refs += 1;
            self.refs
        }

        fn decrement_ref(&mut self) -> Option<u32> {
            self.refs = self.refs.checked_sub(1)?;
            Some(self.refs)
        }

        fn ref_count(&self) -> u32 {
            self.refs
        }
    }

    #[test]
    fn test_get_never_creates() {
        let mut map: SyncMap<String, i32> = SyncMap::new();
        assert!(map.get("missing").is_none());
        assert!(map.get_mut("missing").is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_increment_ref_requires_existing_key() {
        let mut map: SyncMap<String, Counted> = SyncMap::new();
        assert_eq!(map.increment_ref("missing"), Err(SyncMapError::KeyNotFound));
        assert!(map.is_empty());

        map.insert("nh".to_string(), Counted::default());
        assert_eq!(map.increment_ref("nh"), Ok(1));
        assert_eq!(map.increment_ref("nh"), Ok(2));
        assert_eq!(map.ref_count("nh"), Some(2));
    }

    #[test]
    fn test_decrement_ref_underflow_protection() {
        let mut map: SyncMap<String, Counted> = SyncMap::new();
        map.insert("nh".to_string(), Counted::default());

        assert_eq!(map.decrement_ref("nh"), Err(SyncMapError::RefCountUnderflow));
        map.increment_ref("nh").unwrap();
        assert_eq!(map.decrement_ref("nh"), Ok(0));
        assert_eq!(map.decrement_ref("nh"), Err(SyncMapError::RefCountUnderflow));
    }

    #[test]
    fn test_iterates_in_key_order() {
        let map: SyncMap<u32, &str> = [(3, "c"), (1, "a"), (2, "b")].into_iter().collect();
        assert_eq!(map.values().copied().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }
}
