use super::*;
use crate::graphics_device::mock_graphics_device::MockGraphicsDevice;
use crate::graphics_device::{BufferBinding, BufferUsageFlags, FenceStatus};
use crate::uniform::UniformBlock;

// ============================================================================
// Helpers
// ============================================================================

/// 256-byte buffer of 64-byte slots
fn small_config() -> UniformBufferConfig {
    UniformBufferConfig {
        slot_size: 64,
        initial_size: 256,
        binding: BufferBinding::Uniform,
        usage: BufferUsageFlags::DYNAMIC,
    }
}

fn create_manager(device: &mut MockGraphicsDevice) -> UniformBufferManager {
    UniformBufferManager::new(device, small_config()).unwrap()
}

fn blocks(fills: &[u8]) -> Vec<UniformBlock> {
    fills.iter().map(|&fill| UniformBlock::from_bytes(vec![fill; 64])).collect()
}

/// Run one whole frame: begin, write pass, finish, end
fn run_frame(
    manager: &mut UniformBufferManager,
    device: &mut MockGraphicsDevice,
    clients: &mut [UniformBlock],
) -> usize {
    manager.begin_frame(device, clients).unwrap();
    let written = manager.write_dirty_clients(device, clients).unwrap();
    manager.finish_begin_frame(device);
    manager.end_frame(device, clients).unwrap();
    written
}

/// Client claiming a size no buffer can address
struct OversizedClient {
    block: UniformBlock,
    claimed_size: Option<u32>,
}

impl UniformClient for OversizedClient {
    fn is_dirty(&self) -> bool {
        self.block.is_dirty()
    }

    fn mark_dirty(&mut self) {
        self.block.mark_dirty();
    }

    fn clear_dirty(&mut self) {
        self.block.clear_dirty();
    }

    fn uniform_size(&self) -> u32 {
        self.claimed_size.unwrap_or_else(|| self.block.uniform_size())
    }

    fn contents(&self) -> &[u8] {
        self.block.contents()
    }

    fn allocation_id(&self) -> AllocationId {
        self.block.allocation_id()
    }

    fn set_allocation_id(&mut self, id: AllocationId) {
        self.block.set_allocation_id(id);
    }
}

fn bytes_at(device: &MockGraphicsDevice, manager: &UniformBufferManager, client: &UniformBlock) -> Vec<u8> {
    let offset = manager.allocation_offset(client.allocation_id()) as usize;
    let size = client.uniform_size() as usize;
    device.buffer_contents(manager.buffer())[offset..offset + size].to_vec()
}

// ============================================================================
// Creation tests
// ============================================================================

#[test]
fn test_new_creates_aligned_buffer() {
    let mut device = MockGraphicsDevice::new();
    let config = UniformBufferConfig { initial_size: 1000, ..small_config() };
    let manager = UniformBufferManager::new(&mut device, config).unwrap();

    assert_eq!(manager.total_size(), 1024);
    assert_eq!(device.buffer_size(manager.buffer()), 1024);
    assert_eq!(manager.phase(), FramePhase::Idle);
    assert_eq!(manager.reallocation_count(), 0);
}

#[test]
fn test_new_rejects_invalid_config_without_touching_device() {
    let mut device = MockGraphicsDevice::new();
    let config = UniformBufferConfig { slot_size: 100, ..small_config() };

    let result = UniformBufferManager::new(&mut device, config);
    assert!(matches!(result, Err(Error::InitializationFailed(_))));
    assert_eq!(device.live_buffer_count(), 0);
}

#[test]
fn test_new_propagates_buffer_creation_failure() {
    let mut device = MockGraphicsDevice::new();
    device.lock().fail_buffer_creation = true;
    assert!(matches!(
        UniformBufferManager::new(&mut device, small_config()),
        Err(Error::OutOfMemory)
    ));
}

// ============================================================================
// Frame cycle tests
// ============================================================================

#[test]
fn test_first_frame_allocates_and_uploads_every_client() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1, 2, 3]);

    assert_eq!(run_frame(&mut manager, &mut device, &mut clients), 3);

    let offsets: Vec<u32> = clients.iter().map(|c| manager.allocation_offset(c.allocation_id())).collect();
    assert_eq!(offsets, vec![0, 64, 128]);
    for (client, fill) in clients.iter().zip([1u8, 2, 3]) {
        assert!(!client.is_dirty());
        assert_eq!(bytes_at(&device, &manager, client), vec![fill; 64]);
        assert!(manager.allocator().is_locked_by_gpu(client.allocation_id()));
    }

    assert_eq!(manager.pending_fence_count(), 1);
    let state = device.lock();
    assert_eq!(state.maps, 1);
    assert_eq!(state.unmaps, 1);
    assert!(state.mappings.is_empty());
}

#[test]
fn test_clean_client_keeps_its_slot_while_locked() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1]);

    run_frame(&mut manager, &mut device, &mut clients);
    let first = clients[0].allocation_id();

    // fence still pending, client unchanged
    assert_eq!(run_frame(&mut manager, &mut device, &mut clients), 0);
    assert_eq!(clients[0].allocation_id(), first);
    assert_eq!(manager.pending_fence_count(), 2);
}

#[test]
fn test_dirty_client_on_locked_slot_is_orphaned() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1]);

    run_frame(&mut manager, &mut device, &mut clients);
    let first = clients[0].allocation_id();

    clients[0].write(0, &[2; 64]);
    assert_eq!(run_frame(&mut manager, &mut device, &mut clients), 1);
    let second = clients[0].allocation_id();

    assert_ne!(first, second);
    assert_eq!(manager.allocation_offset(second), 64);
    // the slot the GPU may be reading was left untouched
    assert_eq!(&device.buffer_contents(manager.buffer())[0..64], &[1; 64][..]);
    assert_eq!(bytes_at(&device, &manager, &clients[0]), vec![2; 64]);
    assert!(!manager.allocator().is_allocated(first));
    assert!(manager.allocator().is_locked_by_gpu(first));

    // GPU catches up: the orphaned slot becomes free again
    device.signal_all_fences();
    run_frame(&mut manager, &mut device, &mut clients);
    assert_eq!(manager.pending_fence_count(), 1);
    assert_eq!(manager.stats().free_size, 256 - 64);
}

#[test]
fn test_dirty_client_on_released_slot_is_rewritten_in_place() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1]);

    run_frame(&mut manager, &mut device, &mut clients);
    let first = clients[0].allocation_id();
    device.signal_all_fences();

    clients[0].write(0, &[9; 64]);
    run_frame(&mut manager, &mut device, &mut clients);
    assert_eq!(clients[0].allocation_id(), first);
    assert_eq!(bytes_at(&device, &manager, &clients[0]), vec![9; 64]);
}

#[test]
fn test_resized_client_moves_even_when_unlocked() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1, 2]);

    run_frame(&mut manager, &mut device, &mut clients);
    device.signal_all_fences();

    clients[0].set_contents(vec![5; 100]);
    run_frame(&mut manager, &mut device, &mut clients);

    let id = clients[0].allocation_id();
    assert_eq!(manager.allocator().allocation_size(id), 128);
    assert_eq!(manager.allocation_offset(id), 128);
    assert_eq!(bytes_at(&device, &manager, &clients[0]), vec![5; 100]);
}

#[test]
fn test_clients_outside_the_shared_buffer_are_skipped() {
    struct Private(UniformBlock);

    impl UniformClient for Private {
        fn uses_shared_uniform_buffer(&self) -> bool {
            false
        }
        fn is_dirty(&self) -> bool {
            self.0.is_dirty()
        }
        fn mark_dirty(&mut self) {
            self.0.mark_dirty()
        }
        fn clear_dirty(&mut self) {
            self.0.clear_dirty()
        }
        fn contents(&self) -> &[u8] {
            self.0.contents()
        }
        fn allocation_id(&self) -> AllocationId {
            self.0.allocation_id()
        }
        fn set_allocation_id(&mut self, id: AllocationId) {
            self.0.set_allocation_id(id)
        }
    }

    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = vec![Private(UniformBlock::new(64))];

    manager.begin_frame(&mut device, &mut clients).unwrap();
    assert_eq!(manager.write_dirty_clients(&mut device, &mut clients).unwrap(), 0);
    manager.finish_begin_frame(&mut device);
    manager.end_frame(&mut device, &clients).unwrap();

    assert_eq!(clients[0].allocation_id(), AllocationId::UNALLOCATED);
    assert_eq!(manager.pending_fence_count(), 0);
    assert_eq!(device.lock().fences_created, 0);
}

// ============================================================================
// Growth tests
// ============================================================================

#[test]
fn test_growth_when_new_clients_do_not_fit() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let old_buffer = manager.buffer();
    let mut clients = blocks(&[1, 2, 3, 4, 5]);

    assert_eq!(run_frame(&mut manager, &mut device, &mut clients), 5);

    // 4 * 64 + 2 * 64 for the client that failed, * 1.5
    assert_eq!(manager.total_size(), 576);
    assert_eq!(manager.reallocation_count(), 1);
    assert_ne!(manager.buffer(), old_buffer);
    {
        let state = device.lock();
        assert_eq!(state.buffer_sizes_created, vec![256, 576]);
        assert_eq!(state.buffers_destroyed, 1);
        assert_eq!(state.buffers.len(), 1);
    }
    for (client, fill) in clients.iter().zip([1u8, 2, 3, 4, 5]) {
        assert!(client.allocation_id().is_valid());
        assert_eq!(bytes_at(&device, &manager, client), vec![fill; 64]);
    }
}

#[test]
fn test_growth_when_orphans_cannot_be_placed() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1, 2, 3, 4]);

    run_frame(&mut manager, &mut device, &mut clients);
    assert_eq!(manager.total_size(), 256);
    assert_eq!(device.live_fences().len(), 1);

    // everything changes while the GPU still holds every slot
    for client in clients.iter_mut() {
        client.write(0, &[7; 64]);
    }
    assert_eq!(run_frame(&mut manager, &mut device, &mut clients), 4);

    // every client needed a second slot: 4 * 128 * 1.5
    assert_eq!(manager.total_size(), 768);
    assert_eq!(manager.reallocation_count(), 1);
    // the old fence went with the old buffer, only this frame's remains
    assert_eq!(device.live_fences().len(), 1);
    assert_eq!(manager.pending_fence_count(), 1);
    let offsets: Vec<u32> = clients.iter().map(|c| manager.allocation_offset(c.allocation_id())).collect();
    assert_eq!(offsets, vec![0, 64, 128, 192]);
}

#[test]
fn test_growth_buffer_creation_failure_is_propagated() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let old_buffer = manager.buffer();
    let mut clients = blocks(&[1, 2, 3, 4, 5]);

    device.lock().fail_buffer_creation = true;
    assert!(manager.begin_frame(&mut device, &mut clients).is_err());
    assert_eq!(manager.phase(), FramePhase::Idle);
    assert_eq!(manager.buffer(), old_buffer);
    assert_eq!(device.live_buffer_count(), 1);
    assert_eq!(clients[4].allocation_id(), AllocationId::REALLOCATION_REQUIRED);

    // next frame succeeds
    device.lock().fail_buffer_creation = false;
    assert_eq!(run_frame(&mut manager, &mut device, &mut clients), 5);
    assert_eq!(manager.reallocation_count(), 1);
}

#[test]
fn test_growth_past_addressable_size_is_out_of_memory() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let old_buffer = manager.buffer();
    let mut clients = vec![OversizedClient { block: UniformBlock::new(64), claimed_size: Some(u32::MAX) }];

    assert!(matches!(manager.begin_frame(&mut device, &mut clients), Err(Error::OutOfMemory)));
    assert_eq!(manager.phase(), FramePhase::Idle);
    assert_eq!(manager.buffer(), old_buffer);
    assert_eq!(manager.total_size(), 256);
    assert_eq!(manager.reallocation_count(), 0);
    assert_eq!(device.live_buffer_count(), 1);
    assert_eq!(clients[0].allocation_id(), AllocationId::REALLOCATION_REQUIRED);
}

#[test]
fn test_resize_past_addressable_size_is_out_of_memory() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = vec![OversizedClient { block: UniformBlock::new(64), claimed_size: None }];

    manager.begin_frame(&mut device, &mut clients).unwrap();
    manager.write_dirty_clients(&mut device, &mut clients).unwrap();
    manager.finish_begin_frame(&mut device);
    manager.end_frame(&mut device, &mut clients).unwrap();
    assert!(clients[0].allocation_id().is_valid());

    clients[0].claimed_size = Some(u32::MAX - 10);
    clients[0].mark_dirty();
    assert!(matches!(manager.begin_frame(&mut device, &mut clients), Err(Error::OutOfMemory)));
    assert_eq!(manager.phase(), FramePhase::Idle);
    assert_eq!(manager.total_size(), 256);
    assert_eq!(clients[0].allocation_id(), AllocationId::REALLOCATION_REQUIRED);
}

#[test]
fn test_growth_larger_than_current_size() {
    let mut device = MockGraphicsDevice::new();
    let config = UniformBufferConfig { initial_size: 1024, ..small_config() };
    let mut manager = UniformBufferManager::new(&mut device, config).unwrap();

    let mut big = vec![UniformBlock::new(1024)];
    run_frame(&mut manager, &mut device, &mut big);
    assert_eq!(manager.reallocation_count(), 0);

    // the only slot is GPU-locked when the client changes
    big[0].write(0, &[1]);
    run_frame(&mut manager, &mut device, &mut big);
    assert_eq!(manager.reallocation_count(), 1);
    assert_eq!(manager.total_size(), 1024 * 3);
}

#[test]
fn test_growth_never_shrinks_the_buffer() {
    let mut device = MockGraphicsDevice::new();
    let config = UniformBufferConfig { initial_size: 1024, ..small_config() };
    let mut manager = UniformBufferManager::new(&mut device, config).unwrap();

    let mut clients = vec![UniformBlock::new(960)];
    run_frame(&mut manager, &mut device, &mut clients);

    // the large block goes away while the GPU still reads it; the newcomer
    // does not fit the 64 bytes left
    let mut gone = clients.remove(0);
    manager.release_client(&mut gone);
    clients.push(UniformBlock::new(128));
    run_frame(&mut manager, &mut device, &mut clients);

    // 2 * 128 * 1.5 is below the current size, which is kept
    assert_eq!(manager.reallocation_count(), 1);
    assert_eq!(manager.total_size(), 1024);
    assert_eq!(manager.allocation_offset(clients[0].allocation_id()), 0);
}

// ============================================================================
// Client lifetime tests
// ============================================================================

#[test]
fn test_released_client_slot_waits_for_its_fence() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1, 2]);
    run_frame(&mut manager, &mut device, &mut clients);

    let mut gone = clients.remove(0);
    let old_id = gone.allocation_id();
    manager.release_client(&mut gone);
    assert_eq!(gone.allocation_id(), AllocationId::UNALLOCATED);

    // new client arrives while the GPU still reads the released slot
    clients.push(UniformBlock::from_bytes(vec![3; 64]));
    run_frame(&mut manager, &mut device, &mut clients);
    assert_ne!(manager.allocation_offset(clients[1].allocation_id()), 0);

    device.signal_all_fences();
    clients.push(UniformBlock::from_bytes(vec![4; 64]));
    run_frame(&mut manager, &mut device, &mut clients);
    assert_eq!(clients[2].allocation_id(), old_id);
}

#[test]
fn test_release_allocation_ignores_sentinels() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    manager.release_allocation(AllocationId::UNALLOCATED);
    manager.release_allocation(AllocationId::REALLOCATION_REQUIRED);
    assert_eq!(manager.stats().free_size, 256);
}

#[test]
fn test_end_frame_fence_failure_locks_nothing() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1]);

    manager.begin_frame(&mut device, &mut clients).unwrap();
    manager.write_dirty_clients(&mut device, &mut clients).unwrap();
    manager.finish_begin_frame(&mut device);

    device.lock().fail_fence_creation = true;
    assert!(manager.end_frame(&mut device, &clients).is_err());
    assert!(!manager.allocator().is_locked_by_gpu(clients[0].allocation_id()));
    assert_eq!(manager.phase(), FramePhase::Idle);
}

#[test]
fn test_terminate_releases_device_objects() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1, 2]);
    run_frame(&mut manager, &mut device, &mut clients);
    run_frame(&mut manager, &mut device, &mut clients);

    manager.terminate(&mut device);
    assert_eq!(device.live_buffer_count(), 0);
    assert!(device.live_fences().is_empty());
}

#[test]
fn test_stats_reflect_state() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1, 2]);
    run_frame(&mut manager, &mut device, &mut clients);

    assert_eq!(
        manager.stats(),
        UniformBufferStats {
            total_size: 256,
            free_size: 128,
            reallocation_count: 0,
            pending_fence_count: 1,
        }
    );
}

// ============================================================================
// Contract violation tests
// ============================================================================

#[test]
#[should_panic(expected = "before the previous frame ended")]
fn test_begin_frame_twice_panics() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1]);
    manager.begin_frame(&mut device, &mut clients).unwrap();
    manager.begin_frame(&mut device, &mut clients).unwrap();
}

#[test]
#[should_panic(expected = "without finish_begin_frame")]
fn test_end_frame_while_mapped_panics() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1]);
    manager.begin_frame(&mut device, &mut clients).unwrap();
    manager.end_frame(&mut device, &clients).unwrap();
}

#[test]
#[should_panic(expected = "not mapped")]
fn test_write_while_unmapped_panics() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1]);
    run_frame(&mut manager, &mut device, &mut clients);
    manager.write(&mut device, clients[0].allocation_id(), &[0; 4]).unwrap();
}

#[test]
#[should_panic(expected = "may still read it")]
fn test_write_to_locked_slot_panics() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1]);
    run_frame(&mut manager, &mut device, &mut clients);

    // fence pending, client clean: slot kept and still locked
    manager.begin_frame(&mut device, &mut clients).unwrap();
    manager.write(&mut device, clients[0].allocation_id(), &[0; 4]).unwrap();
}

#[test]
#[should_panic(expected = "writing 65 bytes")]
fn test_write_larger_than_slot_panics() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1]);
    manager.begin_frame(&mut device, &mut clients).unwrap();
    manager.write(&mut device, clients[0].allocation_id(), &[0; 65]).unwrap();
}

#[test]
fn test_error_fence_does_not_release_locks() {
    let mut device = MockGraphicsDevice::new();
    let mut manager = create_manager(&mut device);
    let mut clients = blocks(&[1]);
    run_frame(&mut manager, &mut device, &mut clients);

    let fence = device.live_fences()[0];
    device.set_fence_status(fence, FenceStatus::Error);
    clients[0].write(0, &[2]);
    run_frame(&mut manager, &mut device, &mut clients);

    // treated as still in flight: the client was moved, not overwritten
    assert_eq!(manager.allocation_offset(clients[0].allocation_id()), 64);
    assert_eq!(manager.pending_fence_count(), 2);
}
