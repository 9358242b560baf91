/// Mock GraphicsDevice for unit tests (no GPU required)
///
/// All state lives behind `Arc<Mutex<_>>` so a test can keep a handle on it
/// after the device itself has been boxed and moved into an `Engine`.
/// Fences start `Pending`; tests decide when the "GPU" finishes.

use std::sync::{Arc, Mutex, MutexGuard};
use slotmap::SlotMap;

use crate::error::{Error, Result};
use crate::graphics_device::{
    GraphicsDevice, FenceHandle, FenceStatus, BufferObjectHandle, MappedBufferHandle,
    ProgramHandle, DescriptorSetLayoutHandle, BufferBinding, BufferUsageFlags, MapAccessFlags,
};

// ============================================================================
// Mock objects
// ============================================================================

#[derive(Debug, Clone)]
pub struct MockBufferObject {
    pub size: u64,
    pub binding: BufferBinding,
    pub usage: BufferUsageFlags,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct MockMapping {
    pub buffer: BufferObjectHandle,
    pub offset: u64,
    pub size: u64,
    pub access: MapAccessFlags,
}

/// Everything the mock device has seen
#[derive(Debug, Default)]
pub struct MockDeviceState {
    pub fences: SlotMap<FenceHandle, FenceStatus>,
    pub fences_created: usize,
    pub fences_destroyed: usize,
    pub buffers: SlotMap<BufferObjectHandle, MockBufferObject>,
    pub buffer_sizes_created: Vec<u64>,
    pub buffers_destroyed: usize,
    pub mappings: SlotMap<MappedBufferHandle, MockMapping>,
    pub maps: usize,
    pub unmaps: usize,
    pub programs: SlotMap<ProgramHandle, String>,
    pub destroyed_programs: Vec<String>,
    pub layouts: SlotMap<DescriptorSetLayoutHandle, ()>,
    pub layouts_destroyed: usize,
    pub fail_fence_creation: bool,
    pub fail_buffer_creation: bool,
}

// ============================================================================
// Mock GraphicsDevice
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MockGraphicsDevice {
    state: Arc<Mutex<MockDeviceState>>,
}

impl MockGraphicsDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared state, still readable after the device has been moved
    pub fn state(&self) -> Arc<Mutex<MockDeviceState>> {
        self.state.clone()
    }

    pub fn lock(&self) -> MutexGuard<'_, MockDeviceState> {
        self.state.lock().unwrap()
    }

    pub fn set_fence_status(&self, fence: FenceHandle, status: FenceStatus) {
        *self.lock().fences.get_mut(fence).expect("unknown mock fence") = status;
    }

    /// Simulate the GPU draining its queue
    pub fn signal_all_fences(&self) {
        for (_, status) in self.lock().fences.iter_mut() {
            *status = FenceStatus::Satisfied;
        }
    }

    pub fn live_fences(&self) -> Vec<FenceHandle> {
        self.lock().fences.keys().collect()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.lock().buffers.len()
    }

    pub fn buffer_contents(&self, buffer: BufferObjectHandle) -> Vec<u8> {
        self.lock().buffers.get(buffer).expect("unknown mock buffer").contents.clone()
    }

    pub fn buffer_size(&self, buffer: BufferObjectHandle) -> u64 {
        self.lock().buffers.get(buffer).expect("unknown mock buffer").size
    }

    /// Stand-in for pipeline compilation done elsewhere in the renderer
    pub fn create_program(&self, name: &str) -> ProgramHandle {
        self.lock().programs.insert(name.to_string())
    }

    pub fn create_descriptor_set_layout(&self) -> DescriptorSetLayoutHandle {
        self.lock().layouts.insert(())
    }
}

impl GraphicsDevice for MockGraphicsDevice {
    fn create_fence(&mut self) -> Result<FenceHandle> {
        let mut state = self.lock();
        if state.fail_fence_creation {
            return Err(Error::BackendError("mock fence creation failure".to_string()));
        }
        state.fences_created += 1;
        Ok(state.fences.insert(FenceStatus::Pending))
    }

    fn fence_status(&self, fence: FenceHandle) -> FenceStatus {
        self.lock().fences.get(fence).copied().expect("polling a destroyed mock fence")
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        let mut state = self.lock();
        assert!(state.fences.remove(fence).is_some(), "mock fence destroyed twice");
        state.fences_destroyed += 1;
    }

    fn create_buffer_object(
        &mut self,
        size: u64,
        binding: BufferBinding,
        usage: BufferUsageFlags,
    ) -> Result<BufferObjectHandle> {
        let mut state = self.lock();
        if state.fail_buffer_creation {
            return Err(Error::OutOfMemory);
        }
        state.buffer_sizes_created.push(size);
        Ok(state.buffers.insert(MockBufferObject {
            size,
            binding,
            usage,
            contents: vec![0; size as usize],
        }))
    }

    fn destroy_buffer_object(&mut self, buffer: BufferObjectHandle) {
        let mut state = self.lock();
        assert!(state.buffers.remove(buffer).is_some(), "mock buffer destroyed twice");
        state.buffers_destroyed += 1;
    }

    fn map_buffer(
        &mut self,
        buffer: BufferObjectHandle,
        offset: u64,
        size: u64,
        access: MapAccessFlags,
    ) -> Result<MappedBufferHandle> {
        let mut state = self.lock();
        let buffer_size = state.buffers.get(buffer)
            .ok_or_else(|| Error::InvalidResource("mapping a destroyed buffer".to_string()))?
            .size;
        if offset + size > buffer_size {
            return Err(Error::InvalidResource("mapping past the end of the buffer".to_string()));
        }
        state.maps += 1;
        Ok(state.mappings.insert(MockMapping { buffer, offset, size, access }))
    }

    fn unmap_buffer(&mut self, mapped: MappedBufferHandle) {
        let mut state = self.lock();
        assert!(state.mappings.remove(mapped).is_some(), "mock mapping released twice");
        state.unmaps += 1;
    }

    fn copy_to_mapped_buffer(
        &mut self,
        mapped: MappedBufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let mut state = self.lock();
        let mapping = *state.mappings.get(mapped)
            .ok_or_else(|| Error::InvalidResource("writing through a released mapping".to_string()))?;
        if offset + data.len() as u64 > mapping.size {
            return Err(Error::InvalidResource("write past the end of the mapping".to_string()));
        }
        let buffer = state.buffers.get_mut(mapping.buffer)
            .ok_or_else(|| Error::InvalidResource("mapped buffer was destroyed".to_string()))?;
        let start = (mapping.offset + offset) as usize;
        buffer.contents[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        let mut state = self.lock();
        let name = state.programs.remove(program).expect("destroying an unknown mock program");
        state.destroyed_programs.push(name);
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        let mut state = self.lock();
        assert!(state.layouts.remove(layout).is_some(), "mock layout destroyed twice");
        state.layouts_destroyed += 1;
    }
}

#[cfg(test)]
#[path = "mock_graphics_device_tests.rs"]
mod tests;
