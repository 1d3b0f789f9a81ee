use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use crate::{
    planner::BufferSpec,
    storage::{BackendDevice, BackendStorage},
    DType, Error, Result,
};

mod pool;

pub use pool::{BufferPool, PoolMetrics};

#[derive(Clone, Debug, PartialEq)]
pub struct CpuStorage<T: DType>(pub(crate) Vec<T>);

impl<T: DType> CpuStorage<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self(data)
    }

    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T: DType> BackendStorage<T> for CpuStorage<T> {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn as_slice(&self) -> &[T] {
        &self.0
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.0
    }
}

/// Host execution context.
///
/// Clones share the live-byte accounting and, when enabled, the buffer pool,
/// so every computation of one transformer draws from the same pool.
#[derive(Clone, Debug)]
pub struct CpuDevice<T: DType> {
    pool: Option<Arc<Mutex<BufferPool<T>>>>,
    live_bytes: Arc<AtomicUsize>,
}

impl<T: DType> CpuDevice<T> {
    pub fn new() -> Self {
        Self {
            pool: None,
            live_bytes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A device that recycles released buffers across computations.
    pub fn pooled() -> Self {
        Self {
            pool: Some(Arc::new(Mutex::new(BufferPool::new()))),
            live_bytes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    /// Bytes currently held by allocated buffers.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::SeqCst)
    }

    pub fn pool_metrics(&self) -> Result<Option<PoolMetrics>> {
        match &self.pool {
            Some(pool) => Ok(Some(pool.lock()?.metrics())),
            None => Ok(None),
        }
    }
}

impl<T: DType> Default for CpuDevice<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DType> BackendDevice<T> for CpuDevice<T> {
    type Storage = CpuStorage<T>;

    fn name(&self) -> &str {
        "cpu"
    }

    fn alloc(&self, buffer: &BufferSpec) -> Result<Self::Storage> {
        if buffer.elements == 0 {
            return Err(Error::allocation(&buffer.name, "zero-sized buffer"));
        }
        let data = match &self.pool {
            Some(pool) => pool.lock()?.get_buffer(buffer.elements),
            None => vec![T::ZERO; buffer.elements],
        };
        self.live_bytes
            .fetch_add(buffer.size_bytes, Ordering::SeqCst);
        tracing::trace!("allocated `{}` ({} bytes)", buffer.name, buffer.size_bytes);
        Ok(CpuStorage(data))
    }

    fn free(&self, buffer: &BufferSpec, storage: Self::Storage) {
        self.live_bytes
            .fetch_sub(buffer.size_bytes, Ordering::SeqCst);
        if let Some(pool) = &self.pool {
            match pool.lock() {
                Ok(mut pool) => pool.recycle_buffer(storage.0),
                Err(_) => tracing::warn!("buffer pool poisoned, dropping `{}`", buffer.name),
            }
        }
    }
}
