/*!
# Galaxy 3D GPU

GPU resource lifecycle for the Galaxy 3D engine.

This crate manages short-lived uniform storage and long-lived compiled
programs across a real-time frame loop, on top of a narrow driver interface
(`GraphicsDevice`) implemented by backend crates (Vulkan, ...).

## Architecture

- **SlabAllocator**: offset/size bookkeeping inside one backing buffer
- **DeferredReclaimQueue**: fences guarding slots the GPU may still read
- **UniformBufferManager**: per-frame reclaim, allocation, growth and mapping
- **RefCountedCache**: key -> (reference count, value) deduplication
- **ProgramCache / DefinitionCache**: compiled programs and parsed material
  definitions shared by refcount
- **Engine**: owns the device, the uniform buffer and both caches

Everything runs on the render thread; none of these types lock internally.
*/

// Internal modules
mod error;
mod engine;
mod config;
pub mod log;
pub mod graphics_device;
pub mod utils;
pub mod uniform;
pub mod material;

// Main galaxy3d namespace module
pub mod galaxy3d {
    // Error types
    pub use crate::error::{Error, Result};

    // Engine session
    pub use crate::engine::Engine;

    // Configuration
    pub use crate::config::{Config, UniformBufferConfig};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
        // Note: engine_* macros are exported at the crate root
    }

    // Driver interface sub-module
    pub mod device {
        pub use crate::graphics_device::{
            GraphicsDevice, FenceHandle, FenceStatus, BufferObjectHandle, MappedBufferHandle,
            ProgramHandle, DescriptorSetLayoutHandle, BufferBinding, BufferUsageFlags, MapAccessFlags,
        };
    }

    // Uniform buffer sub-module
    pub mod uniform {
        pub use crate::uniform::*;
        pub use crate::utils::{SlabAllocator, AllocationId};
    }

    // Material caches sub-module
    pub mod material {
        pub use crate::material::*;
    }

    // Generic containers
    pub mod utils {
        pub use crate::utils::*;
    }
}
