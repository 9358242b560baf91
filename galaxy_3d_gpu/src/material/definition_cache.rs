/// Parsed material definitions shared by every material instance using them
///
/// Definitions are boxed: they are large and callers read them often, so
/// they should not move when the cache grows.

use crate::graphics_device::GraphicsDevice;
use crate::material::{DefinitionKey, MaterialDefinition};
use crate::utils::{RefCountedCache, Boxed, Constructed};

const SOURCE: &str = "galaxy3d::DefinitionCache";

#[derive(Default)]
pub struct DefinitionCache {
    cache: RefCountedCache<DefinitionKey, MaterialDefinition, Boxed>,
}

impl DefinitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the definition for `key`, parsing it with `parse` on a miss
    ///
    /// Returns `None` if parsing failed; the cache is left unchanged.
    pub fn acquire_definition<F, R>(&mut self, key: DefinitionKey, parse: F) -> Option<&MaterialDefinition>
    where
        F: FnOnce() -> R,
        R: Constructed<MaterialDefinition>,
    {
        let definition = self.cache.acquire_with(key, parse);
        if definition.is_none() {
            crate::engine_warn!(SOURCE, "Material definition {:?} could not be built", key);
        }
        definition
    }

    /// Acquire one more reference to a cached definition
    ///
    /// # Panics
    ///
    /// If `key` is not cached.
    pub fn acquire(&mut self, key: &DefinitionKey) -> &MaterialDefinition {
        self.cache.acquire(key)
    }

    /// # Panics
    ///
    /// If `key` is not cached.
    pub fn get(&self, key: &DefinitionKey) -> &MaterialDefinition {
        self.cache.get(key)
    }

    pub fn try_get(&self, key: &DefinitionKey) -> Option<&MaterialDefinition> {
        self.cache.try_get(key)
    }

    /// Release one reference; the last one destroys the definition's device
    /// objects. Returns `true` if the definition was destroyed.
    ///
    /// # Panics
    ///
    /// If `key` is not cached.
    pub fn release_definition(&mut self, device: &mut dyn GraphicsDevice, key: &DefinitionKey) -> bool {
        self.cache.release_with(key, |definition| {
            crate::engine_trace!(SOURCE, "Destroying material definition '{}'", definition.name());
            definition.terminate(device);
        })
    }

    pub fn ref_count(&self, key: &DefinitionKey) -> u32 {
        self.cache.ref_count(key)
    }

    pub fn contains(&self, key: &DefinitionKey) -> bool {
        self.cache.contains(key)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Destroy every remaining definition (engine teardown)
    pub fn terminate(&mut self, device: &mut dyn GraphicsDevice) {
        for (key, ref_count, definition) in self.cache.drain() {
            crate::engine_warn!(
                SOURCE,
                "Material definition '{}' ({:?}) still has {} reference(s) at teardown",
                definition.name(),
                key,
                ref_count
            );
            definition.terminate(device);
        }
    }
}

#[cfg(test)]
#[path = "definition_cache_tests.rs"]
mod tests;
