/// Fence-deferred reclamation of slab allocations
///
/// At the end of each frame the ids the GPU will read are tracked together
/// with a fence. Once that fence signals, the ids are handed back through a
/// callback so their GPU locks can be released. Fences complete in
/// submission order, so a signaled fence proves every older fence complete
/// as well, whatever their own status reports.

use std::collections::VecDeque;
use rustc_hash::FxHashSet;

use crate::error::Result;
use crate::graphics_device::{GraphicsDevice, FenceHandle, FenceStatus};
use crate::utils::AllocationId;

const SOURCE: &str = "galaxy3d::DeferredReclaimQueue";

/// A fence and the allocations it protects
#[derive(Debug)]
struct PendingFence {
    fence: FenceHandle,
    ids: FxHashSet<AllocationId>,
}

/// Ordered list of pending fences, oldest first
#[derive(Debug, Default)]
pub struct DeferredReclaimQueue {
    pending: VecDeque<PendingFence>,
}

impl DeferredReclaimQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `ids` behind a new fence covering the work submitted so far
    ///
    /// Does nothing, and creates no fence, when `ids` is empty.
    ///
    /// # Errors
    ///
    /// Propagates fence creation failure from the device.
    pub fn track(
        &mut self,
        device: &mut dyn GraphicsDevice,
        ids: FxHashSet<AllocationId>,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let fence = device.create_fence()?;
        crate::engine_trace!(SOURCE, "Tracking {} allocation(s) behind fence {:?}", ids.len(), fence);
        self.pending.push_back(PendingFence { fence, ids });
        Ok(())
    }

    /// Report every id protected by a completed fence to `on_reclaimed`
    ///
    /// Fences are polled newest to oldest. The newest signaled fence and
    /// every fence older than it are reclaimed, oldest first, and destroyed.
    /// A newest fence in error or timeout with nothing newer signaled is
    /// kept and polled again on the next call.
    pub fn reclaim_completed_resources<F>(&mut self, device: &mut dyn GraphicsDevice, mut on_reclaimed: F)
    where
        F: FnMut(AllocationId),
    {
        let mut newest_signaled = None;
        for (index, pending) in self.pending.iter().enumerate().rev() {
            match device.fence_status(pending.fence) {
                FenceStatus::Satisfied => {
                    newest_signaled = Some(index);
                    break;
                }
                FenceStatus::Pending => {}
                FenceStatus::Timeout => {
                    crate::engine_debug!(SOURCE, "Fence {:?} status query timed out, retrying next frame", pending.fence);
                }
                FenceStatus::Error => {
                    crate::engine_warn!(SOURCE, "Fence {:?} reported an error, retrying next frame", pending.fence);
                }
            }
        }

        let Some(newest_signaled) = newest_signaled else {
            return;
        };

        for (age, pending) in self.pending.drain(..=newest_signaled).enumerate() {
            // Older than a signaled fence: complete, whatever it reports
            if cfg!(debug_assertions) && age < newest_signaled {
                let status = device.fence_status(pending.fence);
                if status != FenceStatus::Satisfied {
                    crate::engine_debug!(
                        SOURCE,
                        "Fence {:?} reports {:?} but a newer fence has signaled, reclaiming anyway",
                        pending.fence,
                        status
                    );
                }
            }

            for &id in &pending.ids {
                on_reclaimed(id);
            }
            device.destroy_fence(pending.fence);
        }
    }

    /// Destroy every tracked fence without reporting its ids
    ///
    /// Only valid when the GPU is known to be idle, or when the allocations
    /// are being discarded wholesale.
    pub fn reset(&mut self, device: &mut dyn GraphicsDevice) {
        for pending in self.pending.drain(..) {
            device.destroy_fence(pending.fence);
        }
    }

    /// Number of fences still waiting to signal
    pub fn pending_fence_count(&self) -> usize {
        self.pending.len()
    }

    /// Total number of ids still waiting on a fence (an id tracked by two
    /// fences counts twice)
    pub fn pending_id_count(&self) -> usize {
        self.pending.iter().map(|pending| pending.ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
#[path = "deferred_reclaim_queue_tests.rs"]
mod tests;
