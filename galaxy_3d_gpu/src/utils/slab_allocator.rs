/// Sub-allocates aligned byte ranges of one fixed-size GPU buffer.
///
/// The buffer is partitioned into slots: contiguous `[offset, offset + size)`
/// ranges whose offset and size are multiples of the slot size. A slot is
/// free only when the CPU has retired it *and* no in-flight GPU work still
/// references it. Adjacent free slots are coalesced by
/// [`release_free_slots`](SlabAllocator::release_free_slots) only, never on
/// retire, so a slot the GPU is reading is never absorbed mid-frame.
///
/// Not thread-safe: one instance belongs to the render thread.
///
/// # Example
///
/// ```ignore
/// let mut slab = SlabAllocator::new(1024, 64);
/// let (id, offset) = slab.allocate(100);   // id 1, offset 0, 128 bytes
/// slab.acquire_gpu(id);                     // frame submitted
/// slab.retire(id);                          // CPU done, GPU still reading
/// slab.release_gpu(id);                     // fence signaled
/// slab.release_free_slots();
/// ```

use std::collections::{BTreeMap, BTreeSet};

/// Identifier of a slab allocation
///
/// Derived from the slot offset: `id = offset / slot_size + 1`, so `0` is
/// never a real allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationId(u32);

impl AllocationId {
    /// No allocation held
    pub const UNALLOCATED: AllocationId = AllocationId(0);

    /// The last allocation attempt did not fit; the buffer must grow
    pub const REALLOCATION_REQUIRED: AllocationId = AllocationId(u32::MAX);

    /// Build an id from its raw value
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id value
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this id refers to an actual slot (neither sentinel)
    pub fn is_valid(self) -> bool {
        self != Self::UNALLOCATED && self != Self::REALLOCATION_REQUIRED
    }
}

impl Default for AllocationId {
    fn default() -> Self {
        Self::UNALLOCATED
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u32,
    size: u32,
    allocated: bool,
    gpu_use_count: u32,
}

impl Slot {
    fn free(offset: u32, size: u32) -> Self {
        Self { offset, size, allocated: false, gpu_use_count: 0 }
    }

    fn is_free(&self) -> bool {
        !self.allocated && self.gpu_use_count == 0
    }

    fn free_key(&self) -> (u32, u32) {
        (self.size, self.offset)
    }
}

/// Offset/size bookkeeping for a single backing buffer
pub struct SlabAllocator {
    slot_size: u32,
    total_size: u32,
    /// Every slot, keyed by offset. Consecutive entries are adjacent.
    slots: BTreeMap<u32, Slot>,
    /// Free slots ordered by (size, offset)
    free_slots: BTreeSet<(u32, u32)>,
}

impl SlabAllocator {
    /// Create an allocator over `total_size` bytes
    ///
    /// # Panics
    ///
    /// If `slot_size` is not a power of two, or `total_size` is not a
    /// multiple of it.
    pub fn new(total_size: u32, slot_size: u32) -> Self {
        assert!(
            slot_size.is_power_of_two(),
            "slab slot size must be a power of two, got {}",
            slot_size
        );
        let mut allocator = Self {
            slot_size,
            total_size: 0,
            slots: BTreeMap::new(),
            free_slots: BTreeSet::new(),
        };
        allocator.reset(total_size);
        allocator
    }

    /// Allocate `size` bytes, rounded up to the slot size
    ///
    /// Returns `(UNALLOCATED, 0)` for a zero size and
    /// `(REALLOCATION_REQUIRED, 0)` when no free slot is large enough or the
    /// rounded size is not addressable. Neither case changes any state.
    pub fn allocate(&mut self, size: u32) -> (AllocationId, u32) {
        if size == 0 {
            return (AllocationId::UNALLOCATED, 0);
        }
        let Some(needed) = self.align_up(size) else {
            return (AllocationId::REALLOCATION_REQUIRED, 0);
        };

        // Smallest free slot that fits, lowest offset among equals
        let Some(&(found_size, offset)) = self.free_slots.range((needed, 0)..).next() else {
            return (AllocationId::REALLOCATION_REQUIRED, 0);
        };
        self.free_slots.remove(&(found_size, offset));

        let slot = Self::slot_at_mut(&mut self.slots, offset);
        slot.allocated = true;
        if found_size > needed {
            slot.size = needed;
            let remainder = Slot::free(offset + needed, found_size - needed);
            self.slots.insert(remainder.offset, remainder);
            self.free_slots.insert(remainder.free_key());
        }

        (self.id_for_offset(offset), offset)
    }

    /// Give up CPU ownership of a slot
    ///
    /// The space becomes reusable only once its GPU use count is zero.
    ///
    /// # Panics
    ///
    /// If `id` does not name a slot, or that slot is not allocated.
    pub fn retire(&mut self, id: AllocationId) {
        let offset = self.offset_for_id(id);
        let slot = Self::slot_at_mut(&mut self.slots, offset);
        assert!(slot.allocated, "retiring slab allocation {:?} which is not allocated", id);
        slot.allocated = false;
        if slot.is_free() {
            self.free_slots.insert(slot.free_key());
        }
    }

    /// Record one more in-flight GPU reference to a slot
    pub fn acquire_gpu(&mut self, id: AllocationId) {
        let offset = self.offset_for_id(id);
        let slot = Self::slot_at_mut(&mut self.slots, offset);
        if slot.is_free() {
            self.free_slots.remove(&slot.free_key());
        }
        slot.gpu_use_count = slot.gpu_use_count.checked_add(1)
            .unwrap_or_else(|| panic!("GPU use count overflow on slab allocation {:?}", id));
    }

    /// Drop one in-flight GPU reference to a slot
    ///
    /// # Panics
    ///
    /// If the slot's GPU use count is already zero.
    pub fn release_gpu(&mut self, id: AllocationId) {
        let offset = self.offset_for_id(id);
        let slot = Self::slot_at_mut(&mut self.slots, offset);
        slot.gpu_use_count = slot.gpu_use_count.checked_sub(1)
            .unwrap_or_else(|| panic!("GPU use count underflow on slab allocation {:?}", id));
        if slot.is_free() {
            self.free_slots.insert(slot.free_key());
        }
    }

    /// Coalesce every run of adjacent free slots into a single slot
    pub fn release_free_slots(&mut self) {
        // (start, end) of runs made of at least two free slots
        let mut runs: Vec<(u32, u32)> = Vec::new();
        let mut current: Option<(u32, u32, usize)> = None;

        for slot in self.slots.values() {
            if slot.is_free() {
                let end = slot.offset + slot.size;
                current = Some(match current {
                    Some((start, _, count)) => (start, end, count + 1),
                    None => (slot.offset, end, 1),
                });
            } else if let Some((start, end, count)) = current.take() {
                if count > 1 {
                    runs.push((start, end));
                }
            }
        }
        if let Some((start, end, count)) = current {
            if count > 1 {
                runs.push((start, end));
            }
        }

        for (start, end) in runs {
            let absorbed: Vec<Slot> = self.slots.range(start..end).map(|(_, slot)| *slot).collect();
            for slot in absorbed {
                self.slots.remove(&slot.offset);
                self.free_slots.remove(&slot.free_key());
            }
            let merged = Slot::free(start, end - start);
            self.slots.insert(start, merged);
            self.free_slots.insert(merged.free_key());
        }
    }

    /// Discard all slots, including GPU-locked ones, and start over with one
    /// free slot spanning `new_total_size`
    ///
    /// The caller must know the GPU no longer reads the old ranges.
    ///
    /// # Panics
    ///
    /// If `new_total_size` is not a multiple of the slot size.
    pub fn reset(&mut self, new_total_size: u32) {
        assert!(
            new_total_size % self.slot_size == 0,
            "slab size {} is not a multiple of the slot size {}",
            new_total_size,
            self.slot_size
        );
        assert!(
            new_total_size / self.slot_size < u32::MAX - 1,
            "slab size {} has too many slots to be addressed",
            new_total_size
        );
        self.slots.clear();
        self.free_slots.clear();
        self.total_size = new_total_size;
        if new_total_size > 0 {
            let whole = Slot::free(0, new_total_size);
            self.slots.insert(0, whole);
            self.free_slots.insert(whole.free_key());
        }
    }

    // ===== QUERIES =====

    /// Byte offset of an allocation in the backing buffer
    pub fn allocation_offset(&self, id: AllocationId) -> u32 {
        self.slot(id).offset
    }

    /// Size of an allocation (always a multiple of the slot size)
    pub fn allocation_size(&self, id: AllocationId) -> u32 {
        self.slot(id).size
    }

    /// Whether in-flight GPU work still references the allocation
    pub fn is_locked_by_gpu(&self, id: AllocationId) -> bool {
        self.slot(id).gpu_use_count > 0
    }

    /// Whether the CPU still owns the allocation
    pub fn is_allocated(&self, id: AllocationId) -> bool {
        self.slot(id).allocated
    }

    /// Round `size` up to the slot size, `None` past `u32::MAX`
    pub fn align_up(&self, size: u32) -> Option<u32> {
        size.checked_next_multiple_of(self.slot_size)
    }

    /// Alignment and granularity of every slot
    pub fn slot_size(&self) -> u32 {
        self.slot_size
    }

    /// Size of the backing buffer being managed
    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    /// Bytes currently free for allocation
    pub fn free_size(&self) -> u32 {
        self.free_slots.iter().map(|&(size, _)| size).sum()
    }

    /// Number of slots (allocated, retired and free) partitioning the buffer
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    // ===== INTERNAL =====

    fn id_for_offset(&self, offset: u32) -> AllocationId {
        AllocationId(offset / self.slot_size + 1)
    }

    fn offset_for_id(&self, id: AllocationId) -> u32 {
        assert!(id.is_valid(), "slab allocation id {:?} does not name a slot", id);
        let offset = (id.0 - 1).checked_mul(self.slot_size).unwrap_or(u32::MAX);
        assert!(
            self.slots.contains_key(&offset),
            "slab allocation {:?} (offset {}) is not live",
            id,
            offset
        );
        offset
    }

    fn slot(&self, id: AllocationId) -> &Slot {
        let offset = self.offset_for_id(id);
        &self.slots[&offset]
    }

    fn slot_at_mut(slots: &mut BTreeMap<u32, Slot>, offset: u32) -> &mut Slot {
        slots.get_mut(&offset)
            .unwrap_or_else(|| panic!("no slab slot at offset {}", offset))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "slab_allocator_tests.rs"]
mod tests;
