/// Parsed material definitions and their cache key
///
/// Parsing the material container is done elsewhere; this layer only owns
/// the result and the device objects it created.

use std::hash::Hasher;
use rustc_hash::FxHasher;

use crate::graphics_device::{GraphicsDevice, DescriptorSetLayoutHandle};
use crate::material::MaterialId;

/// Content hash of a material's source bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionKey(u64);

impl DefinitionKey {
    /// Hash the raw bytes a definition is parsed from
    pub fn from_content(bytes: &[u8]) -> Self {
        let mut hasher = FxHasher::default();
        hasher.write_usize(bytes.len());
        hasher.write(bytes);
        Self(hasher.finish())
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Material definition descriptor
#[derive(Debug, Clone)]
pub struct MaterialDefinitionDesc {
    /// Debug name
    pub name: String,
    /// Material this definition describes
    pub material_id: MaterialId,
    /// Size of one instance's uniform block (bytes)
    pub uniform_block_size: u32,
    /// Number of shading variants available
    pub variant_count: u32,
    /// Layouts created while parsing, owned by the definition from now on
    pub descriptor_set_layouts: Vec<DescriptorSetLayoutHandle>,
}

/// Parsed material definition
#[derive(Debug)]
pub struct MaterialDefinition {
    name: String,
    material_id: MaterialId,
    uniform_block_size: u32,
    variant_count: u32,
    descriptor_set_layouts: Vec<DescriptorSetLayoutHandle>,
}

impl MaterialDefinition {
    pub fn new(desc: MaterialDefinitionDesc) -> Self {
        Self {
            name: desc.name,
            material_id: desc.material_id,
            uniform_block_size: desc.uniform_block_size,
            variant_count: desc.variant_count,
            descriptor_set_layouts: desc.descriptor_set_layouts,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn material_id(&self) -> MaterialId {
        self.material_id
    }

    pub fn uniform_block_size(&self) -> u32 {
        self.uniform_block_size
    }

    pub fn variant_count(&self) -> u32 {
        self.variant_count
    }

    pub fn descriptor_set_layouts(&self) -> &[DescriptorSetLayoutHandle] {
        &self.descriptor_set_layouts
    }

    /// Destroy the device objects owned by this definition
    pub fn terminate(self, device: &mut dyn GraphicsDevice) {
        for layout in self.descriptor_set_layouts {
            device.destroy_descriptor_set_layout(layout);
        }
    }
}
