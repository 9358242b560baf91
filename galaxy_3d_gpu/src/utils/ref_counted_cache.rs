/// Reference-counted cache: key -> (reference count, value)
///
/// Values are built by a caller-supplied factory on the first acquire of a
/// key and handed to a caller-supplied releaser when the last reference is
/// released. References returned by the cache borrow it, so they cannot be
/// held across the next `acquire`/`release` call.
///
/// The storage strategy is chosen at compile time:
/// - [`Inline`] keeps values in the hash map itself (small handles)
/// - [`Boxed`] keeps each value behind its own allocation, so the value
///   does not move when the map rehashes (large parsed definitions)
///
/// # Example
///
/// ```ignore
/// let mut cache: RefCountedCache<u64, String> = RefCountedCache::new();
/// cache.acquire_with(7, || Some("seven".to_string()));  // built, count 1
/// cache.acquire(&7);                                     // count 2
/// cache.release(&7);
/// cache.release_with(&7, |value| drop(value));           // destroyed
/// ```

use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::collections::hash_map::Entry;
use rustc_hash::FxHashMap;

// ===== STORAGE STRATEGIES =====

/// How a cache stores its values
pub trait CacheStorage<V> {
    /// Representation kept in the map
    type Stored;

    fn store(value: V) -> Self::Stored;
    fn get(stored: &Self::Stored) -> &V;
    fn get_mut(stored: &mut Self::Stored) -> &mut V;
    fn into_value(stored: Self::Stored) -> V;
}

/// Values live directly in the map
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

/// Values live behind a `Box`, with a stable address for their lifetime
#[derive(Debug, Clone, Copy, Default)]
pub struct Boxed;

impl<V> CacheStorage<V> for Inline {
    type Stored = V;

    fn store(value: V) -> V {
        value
    }

    fn get(stored: &V) -> &V {
        stored
    }

    fn get_mut(stored: &mut V) -> &mut V {
        stored
    }

    fn into_value(stored: V) -> V {
        stored
    }
}

impl<V> CacheStorage<V> for Boxed {
    type Stored = Box<V>;

    fn store(value: V) -> Box<V> {
        Box::new(value)
    }

    fn get(stored: &Box<V>) -> &V {
        stored
    }

    fn get_mut(stored: &mut Box<V>) -> &mut V {
        stored
    }

    fn into_value(stored: Box<V>) -> V {
        *stored
    }
}

// ===== FACTORY RESULTS =====

/// Outcome of a cache factory: a value, or nothing when construction failed
///
/// Implemented for `Option<V>` and for handle types whose null value means
/// failure (see `ProgramHandle`).
pub trait Constructed<V> {
    fn into_constructed(self) -> Option<V>;
}

impl<V> Constructed<V> for Option<V> {
    fn into_constructed(self) -> Option<V> {
        self
    }
}

// ===== CACHE =====

struct CacheEntry<S> {
    ref_count: u32,
    value: S,
}

/// Deduplicates expensive values by key
pub struct RefCountedCache<K, V, S: CacheStorage<V> = Inline> {
    entries: FxHashMap<K, CacheEntry<S::Stored>>,
    _storage: PhantomData<fn() -> (V, S)>,
}

impl<K, V, S> RefCountedCache<K, V, S>
where
    K: Hash + Eq + Debug,
    S: CacheStorage<V>,
{
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            _storage: PhantomData,
        }
    }

    /// Acquire `key`, building the value with `factory` on a miss
    ///
    /// Returns `None` if the factory failed; nothing is inserted in that case
    /// and the factory is never called on a hit.
    pub fn acquire_with<F, R>(&mut self, key: K, factory: F) -> Option<&V>
    where
        F: FnOnce() -> R,
        R: Constructed<V>,
    {
        match self.entries.entry(key) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                Self::increment(entry);
                Some(S::get(&entry.value))
            }
            Entry::Vacant(vacant) => {
                let value = factory().into_constructed()?;
                let entry = vacant.insert(CacheEntry {
                    ref_count: 1,
                    value: S::store(value),
                });
                Some(S::get(&entry.value))
            }
        }
    }

    /// Acquire `key`, building the value with an infallible `factory` on a miss
    pub fn acquire_or_insert_with<F>(&mut self, key: K, factory: F) -> &V
    where
        F: FnOnce() -> V,
    {
        let entry = match self.entries.entry(key) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                Self::increment(entry);
                entry
            }
            Entry::Vacant(vacant) => vacant.insert(CacheEntry {
                ref_count: 1,
                value: S::store(factory()),
            }),
        };
        S::get(&entry.value)
    }

    /// Acquire one more reference to an entry that must already exist
    ///
    /// # Panics
    ///
    /// If `key` is not in the cache.
    pub fn acquire(&mut self, key: &K) -> &V {
        let entry = self.entries.get_mut(key)
            .unwrap_or_else(|| panic!("acquiring {:?} which is not in the cache", key));
        Self::increment(entry);
        S::get(&entry.value)
    }

    /// Value of an entry that must exist
    ///
    /// # Panics
    ///
    /// If `key` is not in the cache.
    pub fn get(&self, key: &K) -> &V {
        self.try_get(key)
            .unwrap_or_else(|| panic!("{:?} is not in the cache", key))
    }

    /// Mutable value of an entry that must exist
    ///
    /// # Panics
    ///
    /// If `key` is not in the cache.
    pub fn get_mut(&mut self, key: &K) -> &mut V {
        let entry = self.entries.get_mut(key)
            .unwrap_or_else(|| panic!("{:?} is not in the cache", key));
        S::get_mut(&mut entry.value)
    }

    /// Value of an entry, if present
    pub fn try_get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|entry| S::get(&entry.value))
    }

    /// Drop one reference; on the last one, hand the value to `releaser`
    /// and erase the entry
    ///
    /// Returns `true` if the entry was erased.
    ///
    /// # Panics
    ///
    /// If `key` is not in the cache.
    pub fn release_with<F>(&mut self, key: &K, releaser: F) -> bool
    where
        F: FnOnce(V),
    {
        let entry = self.entries.get_mut(key)
            .unwrap_or_else(|| panic!("releasing {:?} which is not in the cache", key));
        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            return false;
        }
        if let Some(entry) = self.entries.remove(key) {
            releaser(S::into_value(entry.value));
        }
        true
    }

    /// Drop one reference, erasing the entry on the last one
    ///
    /// # Panics
    ///
    /// If `key` is not in the cache.
    pub fn release(&mut self, key: &K) -> bool {
        self.release_with(key, drop)
    }

    /// Current reference count of `key` (0 when absent)
    pub fn ref_count(&self, key: &K) -> u32 {
        self.entries.get(key).map_or(0, |entry| entry.ref_count)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry regardless of its count, yielding
    /// `(key, ref_count, value)` (teardown)
    pub fn drain(&mut self) -> impl Iterator<Item = (K, u32, V)> + '_ {
        self.entries
            .drain()
            .map(|(key, entry)| (key, entry.ref_count, S::into_value(entry.value)))
    }

    fn increment(entry: &mut CacheEntry<S::Stored>) {
        entry.ref_count = entry.ref_count.checked_add(1)
            .unwrap_or_else(|| panic!("cache reference count overflow"));
    }
}

impl<K, V, S> Default for RefCountedCache<K, V, S>
where
    K: Hash + Eq + Debug,
    S: CacheStorage<V>,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "ref_counted_cache_tests.rs"]
mod tests;
