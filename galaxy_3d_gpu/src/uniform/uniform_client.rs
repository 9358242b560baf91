/// Clients of the shared uniform buffer
///
/// The manager only needs a narrow view of each client: whether it lives in
/// the shared buffer, how many bytes it needs, whether those bytes changed,
/// and which slab allocation it currently holds.

use crate::utils::AllocationId;

/// Per-client view used by `UniformBufferManager`
pub trait UniformClient {
    /// Whether this client is stored in the shared uniform buffer
    ///
    /// Clients answering `false` are skipped entirely.
    fn uses_shared_uniform_buffer(&self) -> bool {
        true
    }

    /// Whether the contents changed since they were last written
    fn is_dirty(&self) -> bool;

    /// Force the contents to be written again (after a move to a new slot)
    fn mark_dirty(&mut self);

    /// Called once the contents have been written to the buffer
    fn clear_dirty(&mut self);

    /// Bytes needed in the buffer
    ///
    /// Contents past `u32::MAX` bytes saturate, which no buffer can hold.
    fn uniform_size(&self) -> u32 {
        u32::try_from(self.contents().len()).unwrap_or(u32::MAX)
    }

    /// CPU copy of the bytes to upload
    fn contents(&self) -> &[u8];

    /// Slab allocation currently held (`UNALLOCATED` if none)
    fn allocation_id(&self) -> AllocationId;

    /// Record the allocation the manager assigned
    fn set_allocation_id(&mut self, id: AllocationId);
}

impl<T: UniformClient + ?Sized> UniformClient for &mut T {
    fn uses_shared_uniform_buffer(&self) -> bool {
        (**self).uses_shared_uniform_buffer()
    }

    fn is_dirty(&self) -> bool {
        (**self).is_dirty()
    }

    fn mark_dirty(&mut self) {
        (**self).mark_dirty()
    }

    fn clear_dirty(&mut self) {
        (**self).clear_dirty()
    }

    fn uniform_size(&self) -> u32 {
        (**self).uniform_size()
    }

    fn contents(&self) -> &[u8] {
        (**self).contents()
    }

    fn allocation_id(&self) -> AllocationId {
        (**self).allocation_id()
    }

    fn set_allocation_id(&mut self, id: AllocationId) {
        (**self).set_allocation_id(id)
    }
}

impl<T: UniformClient + ?Sized> UniformClient for Box<T> {
    fn uses_shared_uniform_buffer(&self) -> bool {
        (**self).uses_shared_uniform_buffer()
    }

    fn is_dirty(&self) -> bool {
        (**self).is_dirty()
    }

    fn mark_dirty(&mut self) {
        (**self).mark_dirty()
    }

    fn clear_dirty(&mut self) {
        (**self).clear_dirty()
    }

    fn uniform_size(&self) -> u32 {
        (**self).uniform_size()
    }

    fn contents(&self) -> &[u8] {
        (**self).contents()
    }

    fn allocation_id(&self) -> AllocationId {
        (**self).allocation_id()
    }

    fn set_allocation_id(&mut self, id: AllocationId) {
        (**self).set_allocation_id(id)
    }
}

/// Uniform block with a CPU shadow copy and a dirty flag
///
/// Starts dirty so its first allocation is written.
#[derive(Debug, Clone)]
pub struct UniformBlock {
    data: Vec<u8>,
    dirty: bool,
    allocation: AllocationId,
}

impl UniformBlock {
    /// Zero-filled block of `size` bytes
    pub fn new(size: usize) -> Self {
        Self::from_bytes(vec![0; size])
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            dirty: true,
            allocation: AllocationId::UNALLOCATED,
        }
    }

    /// Build a block holding the bytes of a `Pod` value
    pub fn from_pod<T: bytemuck::Pod>(value: &T) -> Self {
        Self::from_bytes(bytemuck::bytes_of(value).to_vec())
    }

    /// Overwrite `bytes` at `offset` and mark the block dirty
    ///
    /// # Panics
    ///
    /// If the write runs past the end of the block.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        assert!(
            offset + bytes.len() <= self.data.len(),
            "uniform block write of {} bytes at {} exceeds its {} bytes",
            bytes.len(),
            offset,
            self.data.len()
        );
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.dirty = true;
    }

    /// Overwrite the block with the bytes of a `Pod` value
    pub fn write_pod<T: bytemuck::Pod>(&mut self, offset: usize, value: &T) {
        self.write(offset, bytemuck::bytes_of(value));
    }

    /// Replace the whole contents, possibly changing the size
    pub fn set_contents(&mut self, data: Vec<u8>) {
        self.data = data;
        self.dirty = true;
    }
}

impl UniformClient for UniformBlock {
    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn contents(&self) -> &[u8] {
        &self.data
    }

    fn allocation_id(&self) -> AllocationId {
        self.allocation
    }

    fn set_allocation_id(&mut self, id: AllocationId) {
        self.allocation = id;
    }
}

#[cfg(test)]
#[path = "uniform_client_tests.rs"]
mod tests;
