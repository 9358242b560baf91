/// Material-side caches: parsed definitions and compiled programs

pub mod program_specialization;
pub mod material_definition;
pub mod definition_cache;
pub mod program_cache;

pub use program_specialization::*;
pub use material_definition::*;
pub use definition_cache::DefinitionCache;
pub use program_cache::ProgramCache;
