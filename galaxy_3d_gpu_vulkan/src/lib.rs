/*!
# Galaxy 3D GPU - Vulkan Backend

Vulkan implementation of the `GraphicsDevice` interface consumed by
galaxy_3d_gpu, using Ash for Vulkan bindings and gpu-allocator for memory
management.

```no_run
use galaxy_3d_gpu::galaxy3d::{Engine, Config};
use galaxy_3d_gpu_vulkan::galaxy3d::{VulkanGraphicsDevice, VulkanDeviceConfig};

let device = VulkanGraphicsDevice::new_headless(VulkanDeviceConfig::default())?;
let engine = Engine::new(device, Config::default())?;
# Ok::<(), galaxy_3d_gpu::galaxy3d::Error>(())
```
*/

mod vulkan_context;
mod vulkan_graphics_device;

pub mod galaxy3d {
    pub use crate::vulkan_context::VulkanDeviceConfig;
    pub use crate::vulkan_graphics_device::{VulkanGraphicsDevice, buffer_usage_flags, memory_location};
}
