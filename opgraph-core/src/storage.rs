use crate::{planner::BufferSpec, DType, Result};

/// A buffer handed out by a [`BackendDevice`], addressable as host memory.
pub trait BackendStorage<T: DType>: Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_slice(&self) -> &[T];

    fn as_mut_slice(&mut self) -> &mut [T];
}

/// The explicit execution context of compiled computations.
///
/// A device owns the storage lifecycle: every buffer obtained from
/// [`BackendDevice::alloc`] is given back through [`BackendDevice::free`].
/// Independent devices may coexist in one process.
pub trait BackendDevice<T: DType>: Clone + Send + Sync {
    type Storage: BackendStorage<T>;

    fn name(&self) -> &str;

    /// Reserve zero-initialized storage of at least `buffer.elements` elements.
    fn alloc(&self, buffer: &BufferSpec) -> Result<Self::Storage>;

    fn free(&self, buffer: &BufferSpec, storage: Self::Storage);

    /// Block until all work submitted for this device is complete.
    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}
