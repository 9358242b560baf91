/// Shared uniform buffer management
///
/// Slab-allocated uniform storage whose slots are recycled only once the
/// GPU has finished with them.

pub mod deferred_reclaim_queue;
pub mod uniform_client;
pub mod uniform_buffer_manager;

pub use deferred_reclaim_queue::DeferredReclaimQueue;
pub use uniform_client::{UniformClient, UniformBlock};
pub use uniform_buffer_manager::{UniformBufferManager, UniformBufferStats, FramePhase, GROWTH_FACTOR};
