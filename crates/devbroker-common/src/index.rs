// ============================================
// File: crates/devbroker-common/src/index.rs
// ============================================
//! # Hash Index
//!
//! ## Creation Reason
//! Every manager in the broker (devices, reservations, sessions) keeps its
//! records in a string-keyed table whose capacity is known up front. This
//! module provides that table with a fixed bucket array, chained
//! collisions and one internal mutex.
//!
//! ## Main Functionality
//! - `HashIndex<V>`: Fixed-size chained hash table keyed by `String`
//! - Optional destructor hook run for every value the index destroys
//! - Closure-based access (`with`, `with_mut`, `for_each`) so callers never
//!   hold references past the lock
//!
//! ## Hashing
//! ```text
//! h = 5381
//! for byte in key: h = h * 33 + byte      (djb2, wrapping)
//! bucket = h % bucket_count
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The table never resizes; size `bucket_count` above the expected entry
//!   count for the table's purpose
//! - Closures run while the index mutex is held: they must not touch the
//!   same index again (the mutex is not reentrant)
//! - Destructors run after the mutex is released
//! - `remove` hands the value back without running the destructor;
//!   `delete`, replacing `insert`, `destroy` and `Drop` all run it
//!
//! ## Last Modified
//! v0.1.0 - Initial hash index

use std::fmt;

use parking_lot::Mutex;
use tracing::warn;

/// Hook invoked for every value the index destroys.
pub type Destructor<V> = Box<dyn Fn(&str, V) + Send + Sync>;

// ============================================
// Hashing
// ============================================

const DJB2_SEED: u64 = 5381;

/// djb2 string hash.
#[must_use]
pub fn djb2(key: &str) -> u64 {
    key.bytes().fold(DJB2_SEED, |hash, byte| {
        hash.wrapping_mul(33).wrapping_add(u64::from(byte))
    })
}

// ============================================
// HashIndex
// ============================================

struct Entry<V> {
    key: String,
    value: V,
}

struct Table<V> {
    buckets: Vec<Vec<Entry<V>>>,
    len: usize,
}

/// Fixed-size, internally synchronized, string-keyed hash table.
///
/// # Example
/// ```
/// use devbroker_common::index::HashIndex;
///
/// let index = HashIndex::new(16);
/// assert!(index.insert("DEV001", 1u32));
/// assert!(!index.insert("DEV001", 2u32)); // replaced
/// assert_eq!(index.get("DEV001"), Some(2));
/// assert!(index.delete("DEV001"));
/// assert_eq!(index.get("DEV001"), None);
/// ```
pub struct HashIndex<V> {
    table: Mutex<Table<V>>,
    bucket_count: usize,
    destructor: Option<Destructor<V>>,
}

impl<V> HashIndex<V> {
    /// Creates an index with `bucket_count` chains.
    ///
    /// A bucket count of zero is clamped to one.
    #[must_use]
    pub fn new(bucket_count: usize) -> Self {
        Self::build(bucket_count, None)
    }

    /// Creates an index that runs `destructor` on every value it destroys.
    #[must_use]
    pub fn with_destructor<F>(bucket_count: usize, destructor: F) -> Self
    where
        F: Fn(&str, V) + Send + Sync + 'static,
    {
        Self::build(bucket_count, Some(Box::new(destructor)))
    }

    fn build(bucket_count: usize, destructor: Option<Destructor<V>>) -> Self {
        let bucket_count = if bucket_count == 0 {
            warn!("Hash index created with zero buckets, using 1");
            1
        } else {
            bucket_count
        };

        let mut buckets = Vec::with_capacity(bucket_count);
        buckets.resize_with(bucket_count, Vec::new);

        Self {
            table: Mutex::new(Table { buckets, len: 0 }),
            bucket_count,
            destructor,
        }
    }

    #[inline]
    fn bucket_of(&self, key: &str) -> usize {
        // bucket_count >= 1, and the result is < bucket_count
        (djb2(key) % self.bucket_count as u64) as usize
    }

    fn destroy_value(&self, key: &str, value: V) {
        match &self.destructor {
            Some(destructor) => destructor(key, value),
            None => drop(value),
        }
    }

    /// Inserts or replaces the value for `key`.
    ///
    /// # Returns
    /// `true` if the key was new, `false` if an existing value was
    /// replaced (and destroyed).
    pub fn insert(&self, key: impl Into<String>, value: V) -> bool {
        let key = key.into();
        let bucket = self.bucket_of(&key);

        let replaced = {
            let mut table = self.table.lock();
            let chain = &mut table.buckets[bucket];
            match chain.iter_mut().find(|e| e.key == key) {
                Some(entry) => Some(std::mem::replace(&mut entry.value, value)),
                None => {
                    chain.push(Entry {
                        key: key.clone(),
                        value,
                    });
                    table.len += 1;
                    None
                }
            }
        };

        match replaced {
            Some(old) => {
                self.destroy_value(&key, old);
                false
            }
            None => true,
        }
    }

    /// Runs `f` on the value for `key`, if present.
    pub fn with<R>(&self, key: &str, f: impl FnOnce(&V) -> R) -> Option<R> {
        let bucket = self.bucket_of(key);
        let table = self.table.lock();
        table.buckets[bucket]
            .iter()
            .find(|e| e.key == key)
            .map(|e| f(&e.value))
    }

    /// Runs `f` on a mutable reference to the value for `key`, if present.
    pub fn with_mut<R>(&self, key: &str, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let bucket = self.bucket_of(key);
        let mut table = self.table.lock();
        table.buckets[bucket]
            .iter_mut()
            .find(|e| e.key == key)
            .map(|e| f(&mut e.value))
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.with(key, |_| ()).is_some()
    }

    /// Removes `key` and destroys its value.
    ///
    /// # Returns
    /// `true` if the key was present.
    pub fn delete(&self, key: &str) -> bool {
        match self.take(key) {
            Some(value) => {
                self.destroy_value(key, value);
                true
            }
            None => false,
        }
    }

    /// Removes `key` and hands its value to the caller without running the
    /// destructor.
    pub fn remove(&self, key: &str) -> Option<V> {
        self.take(key)
    }

    fn take(&self, key: &str) -> Option<V> {
        let bucket = self.bucket_of(key);
        let mut table = self.table.lock();
        let chain = &mut table.buckets[bucket];
        let pos = chain.iter().position(|e| e.key == key)?;
        let entry = chain.swap_remove(pos);
        table.len -= 1;
        Some(entry.value)
    }

    /// Visits every entry in bucket order.
    pub fn for_each(&self, mut f: impl FnMut(&str, &V)) {
        let table = self.table.lock();
        for entry in table.buckets.iter().flatten() {
            f(&entry.key, &entry.value);
        }
    }

    /// Returns all keys currently stored.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let table = self.table.lock();
        table
            .buckets
            .iter()
            .flatten()
            .map(|e| e.key.clone())
            .collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().len
    }

    /// Returns `true` if the index holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the fixed number of buckets.
    #[must_use]
    pub const fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Returns the length of the longest chain.
    #[must_use]
    pub fn max_chain_len(&self) -> usize {
        let table = self.table.lock();
        table.buckets.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Destroys every remaining value, leaving the index empty.
    ///
    /// # Returns
    /// The number of values destroyed.
    pub fn destroy(&self) -> usize {
        let drained: Vec<Entry<V>> = {
            let mut table = self.table.lock();
            table.len = 0;
            table.buckets.iter_mut().flat_map(std::mem::take).collect()
        };

        let count = drained.len();
        for entry in drained {
            self.destroy_value(&entry.key, entry.value);
        }
        count
    }
}

impl<V: Clone> HashIndex<V> {
    /// Returns a clone of the value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        self.with(key, V::clone)
    }

    /// Returns clones of every value.
    #[must_use]
    pub fn values(&self) -> Vec<V> {
        let table = self.table.lock();
        table
            .buckets
            .iter()
            .flatten()
            .map(|e| e.value.clone())
            .collect()
    }
}

impl<V> Drop for HashIndex<V> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<V> fmt::Debug for HashIndex<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashIndex")
            .field("len", &self.len())
            .field("bucket_count", &self.bucket_count)
            .field("has_destructor", &self.destructor.is_some())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_index(buckets: usize) -> (HashIndex<u32>, Arc<AtomicUsize>) {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&destroyed);
        let index = HashIndex::with_destructor(buckets, move |_key: &str, _value: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (index, destroyed)
    }

    #[test]
    fn test_djb2_known_values() {
        assert_eq!(djb2(""), 5381);
        // 5381 * 33 + 'a'
        assert_eq!(djb2("a"), 5381 * 33 + 97);
    }

    #[test]
    fn test_insert_get_delete() {
        let index = HashIndex::new(8);
        assert!(index.is_empty());

        assert!(index.insert("k1", "v1".to_string()));
        assert!(index.insert("k2", "v2".to_string()));
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("k1").as_deref(), Some("v1"));

        assert!(index.delete("k1"));
        assert!(!index.delete("k1"));
        assert_eq!(index.get("k1"), None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_last_insert_wins_and_destroys_prior() {
        let (index, destroyed) = counting_index(4);

        assert!(index.insert("dev", 1));
        assert!(!index.insert("dev", 2));
        assert!(!index.insert("dev", 3));

        assert_eq!(index.get("dev"), Some(3));
        assert_eq!(index.len(), 1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_skips_destructor() {
        let (index, destroyed) = counting_index(4);
        index.insert("a", 7);

        assert_eq!(index.remove("a"), Some(7));
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
        assert_eq!(index.remove("a"), None);
    }

    #[test]
    fn test_destroy_runs_destructor_once_per_live_entry() {
        let (index, destroyed) = counting_index(16);
        for i in 0..10 {
            index.insert(format!("key-{i}"), i);
        }
        index.delete("key-3");
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);

        assert_eq!(index.destroy(), 9);
        assert_eq!(destroyed.load(Ordering::SeqCst), 10);
        assert!(index.is_empty());

        // Drop after destroy must not double-destroy.
        drop(index);
        assert_eq!(destroyed.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_drop_destroys_remaining() {
        let (index, destroyed) = counting_index(16);
        index.insert("x", 1);
        index.insert("y", 2);
        drop(index);
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_single_bucket_chaining() {
        let index = HashIndex::new(1);
        for i in 0..50u32 {
            index.insert(i.to_string(), i);
        }
        assert_eq!(index.max_chain_len(), 50);
        for i in 0..50u32 {
            assert_eq!(index.get(&i.to_string()), Some(i));
        }
        assert!(index.delete("25"));
        assert_eq!(index.get("25"), None);
        assert_eq!(index.get("49"), Some(49));
    }

    #[test]
    fn test_zero_buckets_clamped() {
        let index = HashIndex::new(0);
        assert_eq!(index.bucket_count(), 1);
        index.insert("a", 1u8);
        assert_eq!(index.get("a"), Some(1));
    }

    #[test]
    fn test_with_mut_and_for_each() {
        let index = HashIndex::new(8);
        index.insert("a", 1u32);
        index.insert("b", 2u32);

        assert_eq!(index.with_mut("a", |v| { *v += 10; *v }), Some(11));
        assert_eq!(index.with_mut("missing", |v| *v), None);

        let mut seen = HashMap::new();
        index.for_each(|k, v| {
            seen.insert(k.to_string(), *v);
        });
        assert_eq!(seen.get("a"), Some(&11));
        assert_eq!(seen.get("b"), Some(&2));

        let mut keys = index.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_round_trip_matches_std_map() {
        // Mixed workload compared against a reference map.
        let index = HashIndex::new(7);
        let mut reference = HashMap::new();
        for i in 0..500u64 {
            let key = format!("k{}", (i * 31) % 97);
            if i % 5 == 0 {
                assert_eq!(index.delete(&key), reference.remove(&key).is_some());
            } else {
                let fresh = !reference.contains_key(&key);
                assert_eq!(index.insert(key.clone(), i), fresh);
                reference.insert(key, i);
            }
        }
        assert_eq!(index.len(), reference.len());
        for (key, value) in &reference {
            assert_eq!(index.get(key), Some(*value));
        }
    }

    #[test]
    fn test_concurrent_inserts() {
        let index = Arc::new(HashIndex::new(64));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        index.insert(format!("{t}-{i}"), i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(index.len(), 1000);
    }
}
