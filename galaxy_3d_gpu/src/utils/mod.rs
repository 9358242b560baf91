/// Utility containers shared by the GPU resource layer

pub mod slab_allocator;
pub mod ref_counted_cache;

pub use slab_allocator::{SlabAllocator, AllocationId};
pub use ref_counted_cache::{RefCountedCache, CacheStorage, Inline, Boxed, Constructed};
