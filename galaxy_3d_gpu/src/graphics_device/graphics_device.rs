/// GraphicsDevice trait - the backend operations the GPU resource layer needs
///
/// Only fences, buffer objects and object destruction are exposed here.
/// Command recording, presentation and pipeline creation live in the
/// surrounding renderer and reach this layer only as handles.

use slotmap::new_key_type;
use crate::error::Result;
use crate::graphics_device::{BufferBinding, BufferUsageFlags, MapAccessFlags};

new_key_type! {
    /// Fence signaled once all GPU work submitted before its creation has completed
    pub struct FenceHandle;

    /// Device buffer object
    pub struct BufferObjectHandle;

    /// CPU-visible mapping of a buffer object range
    pub struct MappedBufferHandle;

    /// Compiled GPU program (pipeline). May be null for a reserved cache slot.
    pub struct ProgramHandle;

    /// Descriptor set layout owned by a material definition
    pub struct DescriptorSetLayoutHandle;
}

/// Result of polling a fence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The GPU has finished all work guarded by the fence
    Satisfied,
    /// Work is still in flight
    Pending,
    /// The status query itself timed out
    Timeout,
    /// The status query failed (e.g. device lost)
    Error,
}

/// Backend driver interface
///
/// Implemented by backend-specific devices (e.g., `VulkanGraphicsDevice`)
/// and by the test mock. Every call happens on the render thread.
pub trait GraphicsDevice: Send {
    /// Create a fence covering all work submitted so far
    fn create_fence(&mut self) -> Result<FenceHandle>;

    /// Poll a fence without blocking
    fn fence_status(&self, fence: FenceHandle) -> FenceStatus;

    /// Destroy a fence
    fn destroy_fence(&mut self, fence: FenceHandle);

    /// Create a buffer object
    ///
    /// # Arguments
    ///
    /// * `size` - Size in bytes
    /// * `binding` - Uniform or storage binding
    /// * `usage` - Expected update frequency
    fn create_buffer_object(
        &mut self,
        size: u64,
        binding: BufferBinding,
        usage: BufferUsageFlags,
    ) -> Result<BufferObjectHandle>;

    /// Destroy a buffer object. The backend keeps the storage alive until
    /// GPU work already submitted against it has completed.
    fn destroy_buffer_object(&mut self, buffer: BufferObjectHandle);

    /// Map `size` bytes of `buffer` starting at `offset` for CPU access
    fn map_buffer(
        &mut self,
        buffer: BufferObjectHandle,
        offset: u64,
        size: u64,
        access: MapAccessFlags,
    ) -> Result<MappedBufferHandle>;

    /// Release a mapping, making CPU writes visible to the GPU
    fn unmap_buffer(&mut self, mapped: MappedBufferHandle);

    /// Copy bytes into a mapping. `offset` is relative to the mapped range.
    fn copy_to_mapped_buffer(
        &mut self,
        mapped: MappedBufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<()>;

    /// Destroy a compiled program
    fn destroy_program(&mut self, program: ProgramHandle);

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle);
}
