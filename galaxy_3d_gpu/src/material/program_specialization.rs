/// Program cache key: material, shading variant and specialization constants
///
/// Constants are kept sorted by id with at most one value per id, so two keys
/// built by setting the same constants in a different order compare and hash
/// equal.

use std::hash::{Hash, Hasher};

/// Material identifier inside a material definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u32);

/// Shading variant index, selected outside the GPU resource layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Variant(pub u32);

/// Value of one specialization constant
///
/// Floats compare by bit pattern: `0.0` and `-0.0` are distinct keys and a
/// NaN equals itself.
#[derive(Debug, Clone, Copy)]
pub enum SpecializationValue {
    Int(i32),
    UInt(u32),
    Float(f32),
    Bool(bool),
}

impl SpecializationValue {
    /// 32-bit payload as handed to the pipeline
    pub fn to_bits(&self) -> u32 {
        match *self {
            SpecializationValue::Int(value) => value as u32,
            SpecializationValue::UInt(value) => value,
            SpecializationValue::Float(value) => value.to_bits(),
            SpecializationValue::Bool(value) => value as u32,
        }
    }

    fn kind(&self) -> u8 {
        match self {
            SpecializationValue::Int(_) => 0,
            SpecializationValue::UInt(_) => 1,
            SpecializationValue::Float(_) => 2,
            SpecializationValue::Bool(_) => 3,
        }
    }
}

impl PartialEq for SpecializationValue {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.to_bits() == other.to_bits()
    }
}

impl Eq for SpecializationValue {}

impl Hash for SpecializationValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        self.to_bits().hash(state);
    }
}

/// One specialization constant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpecializationConstant {
    pub id: u32,
    pub value: SpecializationValue,
}

/// Identity of a compiled program in the program cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramSpecialization {
    material_id: MaterialId,
    variant: Variant,
    constants: Vec<SpecializationConstant>,
}

impl ProgramSpecialization {
    /// Key without specialization constants
    pub fn new(material_id: MaterialId, variant: Variant) -> Self {
        Self {
            material_id,
            variant,
            constants: Vec::new(),
        }
    }

    /// Builder form of [`set_constant`](Self::set_constant)
    pub fn with_constant(mut self, id: u32, value: SpecializationValue) -> Self {
        self.set_constant(id, value);
        self
    }

    /// Set constant `id`, replacing any previous value
    pub fn set_constant(&mut self, id: u32, value: SpecializationValue) {
        match self.constants.binary_search_by_key(&id, |constant| constant.id) {
            Ok(index) => self.constants[index].value = value,
            Err(index) => self.constants.insert(index, SpecializationConstant { id, value }),
        }
    }

    pub fn material_id(&self) -> MaterialId {
        self.material_id
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Constants sorted by id
    pub fn constants(&self) -> &[SpecializationConstant] {
        &self.constants
    }

    /// Packed constant payloads in id order (4 bytes each)
    pub fn constant_data(&self) -> Vec<u8> {
        let words: Vec<u32> = self.constants.iter().map(|constant| constant.value.to_bits()).collect();
        bytemuck::cast_slice(&words).to_vec()
    }
}

#[cfg(test)]
#[path = "program_specialization_tests.rs"]
mod tests;
