/// Shared uniform buffer: per-frame allocation, growth and mapping
///
/// One backing buffer is sub-allocated by a [`SlabAllocator`]. Every frame
/// follows the same cycle:
///
/// ```text
/// Idle --begin_frame--> Mapped --finish_begin_frame--> Unmapped --end_frame--> Idle
/// ```
///
/// `begin_frame` reclaims slots whose fence has signaled, hands out slots to
/// clients that need one, grows the buffer if they did not all fit, then
/// maps it. Writes happen while mapped. `end_frame` locks every slot used by
/// the frame and tracks them behind a new fence.
///
/// A slot the GPU may still be reading is never rewritten: a dirty client
/// whose slot is GPU-locked is moved to a fresh slot instead.
///
/// Every live client must be passed to `begin_frame` and `end_frame` each
/// frame, since growth reassigns all of them.

use rustc_hash::FxHashSet;

use crate::config::UniformBufferConfig;
use crate::error::{Error, Result};
use crate::graphics_device::{GraphicsDevice, BufferObjectHandle, MappedBufferHandle, MapAccessFlags};
use crate::uniform::{DeferredReclaimQueue, UniformClient};
use crate::utils::{SlabAllocator, AllocationId};

const SOURCE: &str = "galaxy3d::UniformBufferManager";

/// Headroom applied to the required size when the buffer grows
pub const GROWTH_FACTOR: f64 = 1.5;

/// Where the manager is in its frame cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// Between frames
    Idle,
    /// Allocation settled, buffer mapped for writing
    Mapped,
    /// Writes done, waiting for the frame to be submitted
    Unmapped,
}

/// Uniform buffer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UniformBufferStats {
    /// Size of the backing buffer (bytes)
    pub total_size: u32,
    /// Bytes free for allocation
    pub free_size: u32,
    /// Number of times the backing buffer was replaced by a larger one
    pub reallocation_count: u32,
    /// Fences still protecting slots
    pub pending_fence_count: usize,
}

pub struct UniformBufferManager {
    config: UniformBufferConfig,
    allocator: SlabAllocator,
    reclaim_queue: DeferredReclaimQueue,
    buffer: BufferObjectHandle,
    mapped: Option<MappedBufferHandle>,
    phase: FramePhase,
    reallocation_count: u32,
}

impl UniformBufferManager {
    /// Create the manager and its first backing buffer
    ///
    /// # Errors
    ///
    /// `InitializationFailed` for an invalid configuration; device errors
    /// from buffer creation are propagated.
    pub fn new(device: &mut dyn GraphicsDevice, config: UniformBufferConfig) -> Result<Self> {
        config.validate()?;
        let total_size = config.aligned_initial_size();
        let buffer = device.create_buffer_object(total_size as u64, config.binding, config.usage)?;
        crate::engine_debug!(
            SOURCE,
            "Created uniform buffer of {} bytes ({}-byte slots)",
            total_size,
            config.slot_size
        );

        Ok(Self {
            allocator: SlabAllocator::new(total_size, config.slot_size),
            reclaim_queue: DeferredReclaimQueue::new(),
            buffer,
            mapped: None,
            phase: FramePhase::Idle,
            reallocation_count: 0,
            config,
        })
    }

    // ===== FRAME CYCLE =====

    /// Reclaim, allocate (growing if needed) and map the buffer
    ///
    /// # Panics
    ///
    /// If the previous frame was not ended.
    ///
    /// # Errors
    ///
    /// Device failures while growing or mapping. The manager stays `Idle`
    /// and the call can be retried next frame.
    pub fn begin_frame<C: UniformClient>(
        &mut self,
        device: &mut dyn GraphicsDevice,
        clients: &mut [C],
    ) -> Result<()> {
        assert_eq!(
            self.phase,
            FramePhase::Idle,
            "begin_frame called before the previous frame ended"
        );

        let allocator = &mut self.allocator;
        self.reclaim_queue.reclaim_completed_resources(device, |id| allocator.release_gpu(id));
        self.allocator.release_free_slots();

        if !self.allocate_on_demand(clients) {
            self.reallocate(device, clients)?;
        }

        let mapped = device.map_buffer(
            self.buffer,
            0,
            self.allocator.total_size() as u64,
            MapAccessFlags::WRITE,
        )?;
        self.mapped = Some(mapped);
        self.phase = FramePhase::Mapped;
        Ok(())
    }

    /// Copy `bytes` to the start of slot `id`
    ///
    /// # Panics
    ///
    /// If the buffer is not mapped, the write does not fit the slot, or the
    /// GPU may still be reading the slot.
    pub fn write(&mut self, device: &mut dyn GraphicsDevice, id: AllocationId, bytes: &[u8]) -> Result<()> {
        let Some(mapped) = self.mapped else {
            panic!("writing uniform allocation {:?} while the buffer is not mapped", id);
        };
        let slot_size = self.allocator.allocation_size(id);
        assert!(
            bytes.len() as u64 <= slot_size as u64,
            "writing {} bytes to uniform allocation {:?} of {} bytes",
            bytes.len(),
            id,
            slot_size
        );
        assert!(
            !self.allocator.is_locked_by_gpu(id),
            "writing uniform allocation {:?} while the GPU may still read it",
            id
        );
        let offset = self.allocator.allocation_offset(id);
        device.copy_to_mapped_buffer(mapped, offset as u64, bytes)
    }

    /// Upload every dirty client and clear its dirty flag
    ///
    /// Returns the number of clients written.
    pub fn write_dirty_clients<C: UniformClient>(
        &mut self,
        device: &mut dyn GraphicsDevice,
        clients: &mut [C],
    ) -> Result<usize> {
        let mut written = 0;
        for client in clients.iter_mut() {
            if !client.uses_shared_uniform_buffer() || !client.is_dirty() {
                continue;
            }
            let id = client.allocation_id();
            if !id.is_valid() {
                continue;
            }
            self.write(device, id, client.contents())?;
            client.clear_dirty();
            written += 1;
        }
        crate::engine_trace!(SOURCE, "Wrote {} dirty uniform client(s)", written);
        Ok(written)
    }

    /// Unmap the buffer once all writes for the frame are done
    ///
    /// # Panics
    ///
    /// If `begin_frame` did not run first.
    pub fn finish_begin_frame(&mut self, device: &mut dyn GraphicsDevice) {
        assert_eq!(
            self.phase,
            FramePhase::Mapped,
            "finish_begin_frame called without begin_frame"
        );
        if let Some(mapped) = self.mapped.take() {
            device.unmap_buffer(mapped);
        }
        self.phase = FramePhase::Unmapped;
    }

    /// Lock every slot used by this frame behind a new fence
    ///
    /// Call after the frame's GPU work has been submitted.
    ///
    /// # Panics
    ///
    /// If `finish_begin_frame` did not run first.
    ///
    /// # Errors
    ///
    /// Fence creation failure. No slot is locked in that case.
    pub fn end_frame<C: UniformClient>(
        &mut self,
        device: &mut dyn GraphicsDevice,
        clients: &[C],
    ) -> Result<()> {
        assert_eq!(
            self.phase,
            FramePhase::Unmapped,
            "end_frame called without finish_begin_frame"
        );
        self.phase = FramePhase::Idle;

        let ids: FxHashSet<AllocationId> = clients
            .iter()
            .filter(|client| client.uses_shared_uniform_buffer())
            .map(|client| client.allocation_id())
            .filter(|id| id.is_valid())
            .collect();
        let locked: Vec<AllocationId> = ids.iter().copied().collect();

        self.reclaim_queue.track(device, ids)?;
        for id in locked {
            self.allocator.acquire_gpu(id);
        }
        Ok(())
    }

    // ===== CLIENT LIFETIME =====

    /// Give up a slot; it is reused once the GPU no longer reads it
    ///
    /// Sentinel ids are ignored.
    pub fn release_allocation(&mut self, id: AllocationId) {
        if id.is_valid() {
            self.allocator.retire(id);
        }
    }

    /// Release a client's slot and reset its allocation id
    pub fn release_client<C: UniformClient + ?Sized>(&mut self, client: &mut C) {
        self.release_allocation(client.allocation_id());
        client.set_allocation_id(AllocationId::UNALLOCATED);
    }

    /// Destroy the backing buffer and every pending fence
    ///
    /// The GPU must be idle.
    pub fn terminate(mut self, device: &mut dyn GraphicsDevice) {
        self.reclaim_queue.reset(device);
        if let Some(mapped) = self.mapped.take() {
            device.unmap_buffer(mapped);
        }
        device.destroy_buffer_object(self.buffer);
        crate::engine_debug!(
            SOURCE,
            "Uniform buffer terminated ({} bytes, {} reallocation(s))",
            self.allocator.total_size(),
            self.reallocation_count
        );
    }

    // ===== ACCESSORS =====

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Current backing buffer (changes when the buffer grows)
    pub fn buffer(&self) -> BufferObjectHandle {
        self.buffer
    }

    /// Byte offset of a slot in the backing buffer (for descriptor binding)
    pub fn allocation_offset(&self, id: AllocationId) -> u32 {
        self.allocator.allocation_offset(id)
    }

    pub fn allocator(&self) -> &SlabAllocator {
        &self.allocator
    }

    pub fn config(&self) -> &UniformBufferConfig {
        &self.config
    }

    pub fn total_size(&self) -> u32 {
        self.allocator.total_size()
    }

    pub fn reallocation_count(&self) -> u32 {
        self.reallocation_count
    }

    pub fn pending_fence_count(&self) -> usize {
        self.reclaim_queue.pending_fence_count()
    }

    pub fn stats(&self) -> UniformBufferStats {
        UniformBufferStats {
            total_size: self.allocator.total_size(),
            free_size: self.allocator.free_size(),
            reallocation_count: self.reallocation_count,
            pending_fence_count: self.reclaim_queue.pending_fence_count(),
        }
    }

    // ===== INTERNAL =====

    /// Give a slot to every client that needs one
    ///
    /// Returns `false` if some allocation did not fit. Every client is still
    /// visited so the allocator and the clients agree on what was handed out.
    fn allocate_on_demand<C: UniformClient>(&mut self, clients: &mut [C]) -> bool {
        let mut all_fit = true;

        for client in clients.iter_mut() {
            if !client.uses_shared_uniform_buffer() {
                continue;
            }
            let current = client.allocation_id();
            let size = client.uniform_size();

            if current.is_valid() {
                // an unaddressable size counts as resized and falls through to growth
                let resized = self.allocator.align_up(size) != Some(self.allocator.allocation_size(current));
                let orphaned = client.is_dirty() && self.allocator.is_locked_by_gpu(current);
                if !resized && !orphaned {
                    continue;
                }
                self.allocator.retire(current);
                crate::engine_trace!(
                    SOURCE,
                    "Moving uniform client off allocation {:?} ({})",
                    current,
                    if resized { "resized" } else { "GPU-locked" }
                );
            }

            let (id, _) = self.allocator.allocate(size);
            client.set_allocation_id(id);
            if id == AllocationId::REALLOCATION_REQUIRED {
                all_fit = false;
            } else if id.is_valid() {
                client.mark_dirty();
            }
        }

        all_fit
    }

    /// Replace the backing buffer with one large enough for every client and
    /// allocate them all again from scratch
    fn reallocate<C: UniformClient>(
        &mut self,
        device: &mut dyn GraphicsDevice,
        clients: &mut [C],
    ) -> Result<()> {
        let slot_size = self.config.slot_size as u64;
        let required: u64 = clients
            .iter()
            .filter(|client| client.uses_shared_uniform_buffer())
            .map(|client| {
                let aligned = (client.uniform_size() as u64).div_ceil(slot_size) * slot_size;
                // the outgoing slot is still locked while the new one is written
                if client.allocation_id() == AllocationId::REALLOCATION_REQUIRED {
                    aligned * 2
                } else {
                    aligned
                }
            })
            .sum();

        let grown = (required as f64 * GROWTH_FACTOR).ceil() as u64;
        let new_size = grown.div_ceil(slot_size) * slot_size;
        let new_size = new_size.max(self.allocator.total_size() as u64);
        let new_size = u32::try_from(new_size).map_err(|_| {
            crate::engine_error!(SOURCE, "Uniform buffer cannot grow to {} bytes", new_size);
            Error::OutOfMemory
        })?;

        // Old buffer stays alive until the replacement exists
        let new_buffer = device.create_buffer_object(new_size as u64, self.config.binding, self.config.usage)?;
        if let Some(mapped) = self.mapped.take() {
            device.unmap_buffer(mapped);
        }
        device.destroy_buffer_object(self.buffer);
        self.buffer = new_buffer;

        let old_size = self.allocator.total_size();
        self.reclaim_queue.reset(device);
        self.allocator.reset(new_size);

        for client in clients.iter_mut() {
            if !client.uses_shared_uniform_buffer() {
                continue;
            }
            let (id, _) = self.allocator.allocate(client.uniform_size());
            assert_ne!(
                id,
                AllocationId::REALLOCATION_REQUIRED,
                "uniform client does not fit a freshly grown buffer"
            );
            client.set_allocation_id(id);
            client.mark_dirty();
        }

        self.reallocation_count += 1;
        crate::engine_info!(
            SOURCE,
            "Uniform buffer grown from {} to {} bytes ({} required)",
            old_size,
            new_size,
            required
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "uniform_buffer_manager_tests.rs"]
mod tests;
