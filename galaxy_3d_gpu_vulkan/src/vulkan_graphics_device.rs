/// VulkanGraphicsDevice - Vulkan implementation of the GraphicsDevice trait
///
/// Fences are created by an empty queue submission, so each one signals once
/// every command buffer submitted before it has completed. Buffer objects
/// live in host-visible memory from gpu-allocator and stay persistently
/// mapped; `map_buffer` only hands out a window on that memory.
///
/// Destroying a buffer object retires it behind its own fence. The memory
/// is freed once that fence signals.

use galaxy_3d_gpu::galaxy3d::{Result, Error};
use galaxy_3d_gpu::galaxy3d::device::{
    GraphicsDevice, FenceHandle, FenceStatus, BufferObjectHandle, MappedBufferHandle,
    ProgramHandle, DescriptorSetLayoutHandle, BufferBinding, BufferUsageFlags, MapAccessFlags,
};
use galaxy_3d_gpu::{engine_debug, engine_info, engine_warn, engine_error, engine_err, engine_bail};
use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use slotmap::SlotMap;

use crate::vulkan_context::{GpuContext, VulkanDeviceConfig};

const SOURCE: &str = "galaxy3d::vulkan";

struct BufferObject {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
}

struct Mapping {
    buffer: BufferObjectHandle,
    offset: u64,
    size: u64,
}

/// Buffer destroyed by the caller, waiting for the GPU to let go of it
struct RetiredBuffer {
    object: BufferObject,
    fence: vk::Fence,
}

struct Program {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

/// Vulkan buffer usage for a binding kind
pub fn buffer_usage_flags(binding: BufferBinding) -> vk::BufferUsageFlags {
    match binding {
        BufferBinding::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        BufferBinding::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
    }
}

/// Memory location for a usage: anything the CPU rewrites must be host-visible
pub fn memory_location(usage: BufferUsageFlags) -> MemoryLocation {
    if usage.is_host_written() {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

pub struct VulkanGraphicsDevice {
    fences: SlotMap<FenceHandle, vk::Fence>,
    buffers: SlotMap<BufferObjectHandle, BufferObject>,
    mappings: SlotMap<MappedBufferHandle, Mapping>,
    programs: SlotMap<ProgramHandle, Program>,
    layouts: SlotMap<DescriptorSetLayoutHandle, vk::DescriptorSetLayout>,
    retired_buffers: Vec<RetiredBuffer>,
    /// Destroyed last (see Drop)
    ctx: GpuContext,
}

impl VulkanGraphicsDevice {
    /// Create a device without a window
    pub fn new_headless(config: VulkanDeviceConfig) -> Result<Self> {
        let ctx = GpuContext::new_headless(config)?;
        engine_info!(SOURCE, "Headless Vulkan device created (queue family {})", ctx.graphics_queue_family);

        Ok(Self {
            fences: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            mappings: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            layouts: SlotMap::with_key(),
            retired_buffers: Vec::new(),
            ctx,
        })
    }

    /// Logical device, for pipeline creation done by the renderer
    pub fn device(&self) -> &ash::Device {
        &self.ctx.device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.ctx.graphics_queue
    }

    /// Vulkan buffer behind a handle (for descriptor writes)
    pub fn vk_buffer(&self, buffer: BufferObjectHandle) -> Option<vk::Buffer> {
        self.buffers.get(buffer).map(|object| object.buffer)
    }

    /// Hand a compiled pipeline over to the device. Both objects are
    /// destroyed by `destroy_program`.
    pub fn register_program(&mut self, pipeline: vk::Pipeline, layout: vk::PipelineLayout) -> ProgramHandle {
        self.programs.insert(Program { pipeline, layout })
    }

    /// Hand a descriptor set layout over to the device
    pub fn register_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout) -> DescriptorSetLayoutHandle {
        self.layouts.insert(layout)
    }

    /// Create a layout of `binding_count` dynamic uniform buffer bindings
    /// visible to all graphics stages
    pub fn create_uniform_descriptor_set_layout(&mut self, binding_count: u32) -> Result<DescriptorSetLayoutHandle> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..binding_count)
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::ALL_GRAPHICS)
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        let layout = unsafe { self.ctx.device.create_descriptor_set_layout(&create_info, None) }
            .map_err(|e| engine_err!(SOURCE, "Failed to create descriptor set layout: {:?}", e))?;
        Ok(self.register_descriptor_set_layout(layout))
    }

    /// Block until the queue is idle
    pub fn wait_idle(&mut self) -> Result<()> {
        unsafe {
            self.ctx.device
                .device_wait_idle()
                .map_err(|e| engine_err!(SOURCE, "Failed to wait idle: {:?}", e))?;
        }
        self.collect_retired_buffers();
        Ok(())
    }

    /// Number of destroyed buffers whose memory is not freed yet
    pub fn retired_buffer_count(&self) -> usize {
        self.retired_buffers.len()
    }

    fn submit_fence(&self) -> Result<vk::Fence> {
        unsafe {
            let fence = self.ctx.device
                .create_fence(&vk::FenceCreateInfo::default(), None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create fence: {:?}", e))?;

            // An empty submission signals once all earlier submissions complete
            if let Err(e) = self.ctx.device.queue_submit(self.ctx.graphics_queue, &[], fence) {
                self.ctx.device.destroy_fence(fence, None);
                engine_bail!(SOURCE, "Failed to submit fence to GPU queue: {:?}", e);
            }
            Ok(fence)
        }
    }

    /// Free retired buffers whose fence has signaled
    fn collect_retired_buffers(&mut self) {
        let mut index = 0;
        while index < self.retired_buffers.len() {
            let signaled = unsafe {
                self.ctx.device.get_fence_status(self.retired_buffers[index].fence)
            };
            if matches!(signaled, Ok(true)) {
                let retired = self.retired_buffers.swap_remove(index);
                unsafe { self.ctx.device.destroy_fence(retired.fence, None) };
                self.free_buffer_object(retired.object);
            } else {
                index += 1;
            }
        }
    }

    fn free_buffer_object(&mut self, mut object: BufferObject) {
        if let Some(allocation) = object.allocation.take() {
            if let Err(e) = self.ctx.allocator.free(allocation) {
                engine_warn!(SOURCE, "Failed to free buffer allocation ({} bytes): {:?}", object.size, e);
            }
        }
        unsafe { self.ctx.device.destroy_buffer(object.buffer, None) };
    }
}

impl GraphicsDevice for VulkanGraphicsDevice {
    fn create_fence(&mut self) -> Result<FenceHandle> {
        // Called once per frame
        self.collect_retired_buffers();
        let fence = self.submit_fence()?;
        Ok(self.fences.insert(fence))
    }

    fn fence_status(&self, fence: FenceHandle) -> FenceStatus {
        let Some(&vk_fence) = self.fences.get(fence) else {
            return FenceStatus::Error;
        };
        match unsafe { self.ctx.device.get_fence_status(vk_fence) } {
            Ok(true) => FenceStatus::Satisfied,
            Ok(false) => FenceStatus::Pending,
            Err(vk::Result::TIMEOUT) => FenceStatus::Timeout,
            Err(_) => FenceStatus::Error,
        }
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        if let Some(vk_fence) = self.fences.remove(fence) {
            unsafe { self.ctx.device.destroy_fence(vk_fence, None) };
        }
    }

    fn create_buffer_object(
        &mut self,
        size: u64,
        binding: BufferBinding,
        usage: BufferUsageFlags,
    ) -> Result<BufferObjectHandle> {
        unsafe {
            let buffer_create_info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(buffer_usage_flags(binding) | vk::BufferUsageFlags::TRANSFER_DST)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = self.ctx.device.create_buffer(&buffer_create_info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create buffer of size {} bytes: {:?}", size, e))?;

            let requirements = self.ctx.device.get_buffer_memory_requirements(buffer);

            let allocation = match self.ctx.allocator.allocate(&AllocationCreateDesc {
                name: "galaxy3d buffer object",
                requirements,
                location: memory_location(usage),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            }) {
                Ok(allocation) => allocation,
                Err(_e) => {
                    self.ctx.device.destroy_buffer(buffer, None);
                    let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                    engine_error!(SOURCE, "Out of GPU memory for buffer (required: {:.2} MB)", size_mb);
                    return Err(Error::OutOfMemory);
                }
            };

            let (memory, memory_offset) = (allocation.memory(), allocation.offset());
            let object = BufferObject { buffer, allocation: Some(allocation), size };
            if let Err(e) = self.ctx.device.bind_buffer_memory(buffer, memory, memory_offset) {
                self.free_buffer_object(object);
                engine_bail!(SOURCE, "Failed to bind buffer memory: {:?}", e);
            }

            engine_debug!(SOURCE, "Buffer object created ({} bytes, {:?}, {:?})", size, binding, usage);
            Ok(self.buffers.insert(object))
        }
    }

    fn destroy_buffer_object(&mut self, buffer: BufferObjectHandle) {
        let Some(object) = self.buffers.remove(buffer) else {
            return;
        };
        self.mappings.retain(|_, mapping| mapping.buffer != buffer);

        match self.submit_fence() {
            Ok(fence) => self.retired_buffers.push(RetiredBuffer { object, fence }),
            Err(_) => {
                // No fence to wait on: drain the queue instead
                unsafe { self.ctx.device.device_wait_idle().ok() };
                self.free_buffer_object(object);
            }
        }
    }

    fn map_buffer(
        &mut self,
        buffer: BufferObjectHandle,
        offset: u64,
        size: u64,
        access: MapAccessFlags,
    ) -> Result<MappedBufferHandle> {
        let object = self.buffers.get(buffer)
            .ok_or_else(|| Error::InvalidResource("mapping a destroyed buffer".to_string()))?;
        if offset.checked_add(size).map_or(true, |end| end > object.size) {
            engine_bail!(SOURCE, "Mapping {}..+{} past the end of a {} byte buffer", offset, size, object.size);
        }
        if object.allocation.as_ref().and_then(Allocation::mapped_ptr).is_none() {
            return Err(Error::InvalidResource("buffer is not CPU-accessible".to_string()));
        }
        if !access.contains(MapAccessFlags::WRITE) {
            engine_debug!(SOURCE, "Buffer mapped without WRITE access");
        }
        Ok(self.mappings.insert(Mapping { buffer, offset, size }))
    }

    fn unmap_buffer(&mut self, mapped: MappedBufferHandle) {
        // CpuToGpu memory is host-coherent: nothing to flush
        self.mappings.remove(mapped);
    }

    fn copy_to_mapped_buffer(
        &mut self,
        mapped: MappedBufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let mapping = self.mappings.get(mapped)
            .ok_or_else(|| Error::InvalidResource("writing through a released mapping".to_string()))?;
        let length = data.len() as u64;
        if offset.checked_add(length).map_or(true, |end| end > mapping.size) {
            return Err(Error::InvalidResource("write past the end of the mapping".to_string()));
        }
        let start = (mapping.offset + offset) as usize;

        let slice = self.buffers.get_mut(mapping.buffer)
            .and_then(|object| object.allocation.as_mut())
            .and_then(Allocation::mapped_slice_mut)
            .ok_or_else(|| Error::BackendError("Buffer is not CPU-accessible".to_string()))?;
        slice[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        if let Some(program) = self.programs.remove(program) {
            unsafe {
                self.ctx.device.destroy_pipeline(program.pipeline, None);
                self.ctx.device.destroy_pipeline_layout(program.layout, None);
            }
        }
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        if let Some(layout) = self.layouts.remove(layout) {
            unsafe { self.ctx.device.destroy_descriptor_set_layout(layout, None) };
        }
    }
}

impl Drop for VulkanGraphicsDevice {
    fn drop(&mut self) {
        unsafe { self.ctx.device.device_wait_idle().ok() };

        self.collect_retired_buffers();
        for retired in std::mem::take(&mut self.retired_buffers) {
            unsafe { self.ctx.device.destroy_fence(retired.fence, None) };
            self.free_buffer_object(retired.object);
        }

        let leaked = self.buffers.len() + self.programs.len() + self.layouts.len();
        if leaked > 0 {
            engine_warn!(SOURCE, "Vulkan device dropped with {} live object(s)", leaked);
        }
        let buffers: Vec<BufferObject> = self.buffers.drain().map(|(_, object)| object).collect();
        for object in buffers {
            self.free_buffer_object(object);
        }
        unsafe {
            for (_, fence) in self.fences.drain() {
                self.ctx.device.destroy_fence(fence, None);
            }
            for (_, program) in self.programs.drain() {
                self.ctx.device.destroy_pipeline(program.pipeline, None);
                self.ctx.device.destroy_pipeline_layout(program.layout, None);
            }
            for (_, layout) in self.layouts.drain() {
                self.ctx.device.destroy_descriptor_set_layout(layout, None);
            }
        }
        // ctx drops next: allocator, device, instance
    }
}

#[cfg(test)]
#[path = "vulkan_graphics_device_tests.rs"]
mod tests;
