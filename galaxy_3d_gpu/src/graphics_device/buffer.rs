/// Buffer object binding kinds and usage/mapping flags

use bitflags::bitflags;

/// How a buffer object is bound by shaders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferBinding {
    /// Uniform/constant buffer (UBO)
    Uniform,
    /// Storage buffer (SSBO)
    Storage,
}

bitflags! {
    /// Expected update frequency of a buffer object
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsageFlags: u32 {
        /// Written once, read many times
        const STATIC = 1 << 0;
        /// Rewritten most frames
        const DYNAMIC = 1 << 1;
        /// CPU writes while other ranges may still be read by the GPU
        const SHARED_WRITE = 1 << 2;
    }
}

bitflags! {
    /// Access requested when mapping a buffer object
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapAccessFlags: u32 {
        /// CPU writes through the mapping
        const WRITE = 1 << 0;
        /// Previous contents of the mapped range may be discarded
        const INVALIDATE_RANGE = 1 << 1;
    }
}

impl Default for BufferUsageFlags {
    fn default() -> Self {
        BufferUsageFlags::DYNAMIC
    }
}

impl BufferUsageFlags {
    /// Whether the CPU is expected to write this buffer after creation
    pub fn is_host_written(&self) -> bool {
        self.intersects(BufferUsageFlags::DYNAMIC | BufferUsageFlags::SHARED_WRITE)
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
