/// Engine configuration

use crate::error::{Error, Result};
use crate::graphics_device::{BufferBinding, BufferUsageFlags};

/// Shared uniform buffer configuration
#[derive(Debug, Clone)]
pub struct UniformBufferConfig {
    /// Alignment and granularity of every slab slot (power of two).
    /// Should be at least the device's minimum uniform buffer offset alignment.
    pub slot_size: u32,
    /// Size of the first backing buffer, rounded up to `slot_size`
    pub initial_size: u32,
    /// How shaders bind the backing buffer
    pub binding: BufferBinding,
    /// Update frequency hint for the backing buffer
    pub usage: BufferUsageFlags,
}

impl Default for UniformBufferConfig {
    fn default() -> Self {
        Self {
            slot_size: 256,
            initial_size: 16 * 1024,
            binding: BufferBinding::Uniform,
            usage: BufferUsageFlags::DYNAMIC,
        }
    }
}

impl UniformBufferConfig {
    /// Check the configuration can drive a slab allocator
    ///
    /// # Errors
    ///
    /// `InitializationFailed` if `slot_size` is not a power of two, or
    /// `initial_size` is zero or too large once aligned.
    pub fn validate(&self) -> Result<()> {
        if !self.slot_size.is_power_of_two() {
            return Err(Error::InitializationFailed(format!(
                "uniform slot size must be a power of two, got {}",
                self.slot_size
            )));
        }
        if self.initial_size == 0 {
            return Err(Error::InitializationFailed(
                "uniform buffer initial size must not be zero".to_string(),
            ));
        }
        if self.initial_size.checked_next_multiple_of(self.slot_size).is_none() {
            return Err(Error::InitializationFailed(format!(
                "uniform buffer initial size {} overflows once aligned to {}",
                self.initial_size, self.slot_size
            )));
        }
        Ok(())
    }

    /// `initial_size` rounded up to the slot size (call after `validate`)
    pub fn aligned_initial_size(&self) -> u32 {
        self.initial_size.div_ceil(self.slot_size) * self.slot_size
    }
}

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub uniform_buffer: UniformBufferConfig,
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
