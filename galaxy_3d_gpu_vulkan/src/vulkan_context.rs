/// GpuContext - Vulkan instance, device, queue and allocator
///
/// The GPU resource layer never presents, so the context is created without
/// a surface: one graphics queue is enough to submit fences.

use galaxy_3d_gpu::galaxy3d::{Result, Error};
use galaxy_3d_gpu::engine_error;
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use std::mem::ManuallyDrop;

const SOURCE: &str = "galaxy3d::vulkan";

/// Options for [`GpuContext::new_headless`]
#[derive(Debug, Clone, Copy, Default)]
pub struct VulkanDeviceConfig {
    /// Enable VK_LAYER_KHRONOS_validation
    pub enable_validation: bool,
}

pub struct GpuContext {
    /// Kept alive for the lifetime of the instance
    _entry: ash::Entry,
    instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    /// Dropped BEFORE the device is destroyed
    pub allocator: ManuallyDrop<Allocator>,
}

impl GpuContext {
    /// Create a context on the first GPU exposing a graphics queue
    pub fn new_headless(config: VulkanDeviceConfig) -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load()
                .map_err(|e| {
                    engine_error!(SOURCE, "Failed to load Vulkan library: {:?}", e);
                    Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
                })?;

            let app_info = vk::ApplicationInfo::default()
                .application_name(c"Galaxy3D Application")
                .application_version(vk::make_api_version(0, 1, 0, 0))
                .engine_name(c"Galaxy3D")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            let layer_names = if config.enable_validation {
                vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
            } else {
                vec![]
            };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names);

            let instance = entry
                .create_instance(&create_info, None)
                .map_err(|e| {
                    engine_error!(SOURCE, "Failed to create Vulkan instance: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
                })?;

            match Self::create_device(entry.clone(), instance.clone()) {
                Ok(context) => Ok(context),
                Err(error) => {
                    instance.destroy_instance(None);
                    Err(error)
                }
            }
        }
    }

    unsafe fn create_device(entry: ash::Entry, instance: ash::Instance) -> Result<Self> {
        let physical_devices = instance
            .enumerate_physical_devices()
            .map_err(|e| {
                engine_error!(SOURCE, "Failed to enumerate physical devices: {:?}", e);
                Error::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
            })?;

        let (physical_device, graphics_queue_family) = physical_devices
            .into_iter()
            .find_map(|physical_device| {
                instance
                    .get_physical_device_queue_family_properties(physical_device)
                    .iter()
                    .position(|qf| qf.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                    .map(|index| (physical_device, index as u32))
            })
            .ok_or_else(|| {
                engine_error!(SOURCE, "No Vulkan-capable GPU with a graphics queue found");
                Error::InitializationFailed("No Vulkan-capable GPU found".to_string())
            })?;

        let queue_priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities)];

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos);

        let device = instance
            .create_device(physical_device, &device_create_info, None)
            .map_err(|e| {
                engine_error!(SOURCE, "Failed to create logical device: {:?}", e);
                Error::InitializationFailed(format!("Failed to create device: {:?}", e))
            })?;

        let graphics_queue = device.get_device_queue(graphics_queue_family, 0);

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                engine_error!(SOURCE, "Failed to create GPU allocator: {:?}", e);
                device.destroy_device(None);
                return Err(Error::InitializationFailed(format!("Failed to create allocator: {:?}", e)));
            }
        };

        Ok(Self {
            _entry: entry,
            instance,
            physical_device,
            device,
            graphics_queue,
            graphics_queue_family,
            allocator: ManuallyDrop::new(allocator),
        })
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();

            // Free VkDeviceMemory pages while the device is still alive
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
