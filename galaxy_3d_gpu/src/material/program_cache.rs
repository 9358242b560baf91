/// Compiled programs deduplicated by material, variant and specialization
///
/// A slot may be reserved before its program exists ("reserve now, compile
/// later"): it holds a null handle until [`ProgramCache::fill_program`].

use slotmap::Key;

use crate::graphics_device::{GraphicsDevice, ProgramHandle};
use crate::material::ProgramSpecialization;
use crate::utils::{RefCountedCache, Constructed};

const SOURCE: &str = "galaxy3d::ProgramCache";

/// A null program handle means compilation failed
impl Constructed<ProgramHandle> for ProgramHandle {
    fn into_constructed(self) -> Option<ProgramHandle> {
        (!self.is_null()).then_some(self)
    }
}

#[derive(Default)]
pub struct ProgramCache {
    cache: RefCountedCache<ProgramSpecialization, ProgramHandle>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the program for `key`, compiling it with `compile` on a miss
    ///
    /// `compile` may return a `ProgramHandle` (null on failure) or an
    /// `Option<ProgramHandle>`. Returns `None` if compilation failed; the
    /// cache is left unchanged.
    ///
    /// Also returns `None` when `key` is reserved but not yet filled. That
    /// reference is still taken and must be released like any other.
    pub fn acquire_program<F, R>(&mut self, key: ProgramSpecialization, compile: F) -> Option<ProgramHandle>
    where
        F: FnOnce() -> R,
        R: Constructed<ProgramHandle>,
    {
        self.cache
            .acquire_with(key, compile)
            .copied()
            .filter(|program| !program.is_null())
    }

    /// Acquire one more reference to a cached program
    ///
    /// # Panics
    ///
    /// If `key` is not cached.
    pub fn acquire(&mut self, key: &ProgramSpecialization) -> ProgramHandle {
        *self.cache.acquire(key)
    }

    /// Acquire `key` without compiling anything
    ///
    /// On a miss an empty slot is reserved and a null handle returned; the
    /// caller compiles later and calls [`fill_program`](Self::fill_program).
    /// A reserved slot being filled by someone else also returns null.
    pub fn reserve_program(&mut self, key: ProgramSpecialization) -> ProgramHandle {
        *self.cache.acquire_or_insert_with(key, ProgramHandle::null)
    }

    /// Store the compiled program of a reserved slot
    ///
    /// # Panics
    ///
    /// If `key` is not cached, or its slot already holds a program.
    pub fn fill_program(&mut self, key: &ProgramSpecialization, program: ProgramHandle) {
        let slot = self.cache.get_mut(key);
        assert!(slot.is_null(), "program slot {:?} is already filled", key);
        *slot = program;
    }

    /// Program for `key`, null while a reserved slot is unfilled
    ///
    /// # Panics
    ///
    /// If `key` is not cached.
    pub fn get_program(&self, key: &ProgramSpecialization) -> ProgramHandle {
        *self.cache.get(key)
    }

    pub fn try_get_program(&self, key: &ProgramSpecialization) -> Option<ProgramHandle> {
        self.cache.try_get(key).copied()
    }

    /// Release one reference; the last one destroys the program (a slot that
    /// was never filled destroys nothing). Returns `true` if the slot was
    /// erased.
    ///
    /// # Panics
    ///
    /// If `key` is not cached.
    pub fn release_program(&mut self, device: &mut dyn GraphicsDevice, key: &ProgramSpecialization) -> bool {
        self.cache.release_with(key, |program| {
            if !program.is_null() {
                device.destroy_program(program);
            }
        })
    }

    pub fn ref_count(&self, key: &ProgramSpecialization) -> u32 {
        self.cache.ref_count(key)
    }

    pub fn contains(&self, key: &ProgramSpecialization) -> bool {
        self.cache.contains(key)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Destroy every remaining program (engine teardown)
    pub fn terminate(&mut self, device: &mut dyn GraphicsDevice) {
        for (key, ref_count, program) in self.cache.drain() {
            crate::engine_warn!(
                SOURCE,
                "Program {:?} still has {} reference(s) at teardown",
                key,
                ref_count
            );
            if !program.is_null() {
                device.destroy_program(program);
            }
        }
    }
}

#[cfg(test)]
#[path = "program_cache_tests.rs"]
mod tests;
