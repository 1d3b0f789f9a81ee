use std::mem;

use crate::DType;

/// Max size of all pooled buffers, in bytes (4 GiB).
const MAX_BUFFERS_SIZE: usize = 4 * 1024 * 1024 * 1024;
/// When total pooled bytes exceed this, trim largest buffers down to this level.
const TRIM_THRESHOLD: usize = MAX_BUFFERS_SIZE / 2;

/// Tracks pool usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Current total capacity of all pooled buffers, in bytes.
    pub current_size: usize,
    /// Number of times a buffer was reused instead of allocated.
    pub hits: usize,
    /// Number of times a new buffer was allocated.
    pub misses: usize,
    /// Number of times a buffer was dropped due to pool size cap.
    pub drops: usize,
}

#[derive(Debug)]
/// Recycles buffers released by one computation for the next one to allocate.
pub struct BufferPool<T> {
    pool: Vec<Vec<T>>,
    /// Usage statistics for this pool.
    pub metrics: PoolMetrics,
}

impl<T: DType> BufferPool<T> {
    pub fn new() -> Self {
        BufferPool {
            pool: Vec::new(),
            metrics: PoolMetrics::default(),
        }
    }

    /// Grab a zeroed Vec of length `len`, reusing the smallest pooled buffer that fits.
    pub fn get_buffer(&mut self, len: usize) -> Vec<T> {
        let mut smallest_found_buf: Option<usize> = None;
        for (i, buf) in self.pool.iter().enumerate() {
            let fits = buf.capacity() >= len;
            let smaller = smallest_found_buf
                .is_none_or(|found| buf.capacity() < self.pool[found].capacity());
            if fits && smaller {
                smallest_found_buf = Some(i);
            }
        }

        let mut buf = if let Some(idx) = smallest_found_buf {
            // record a reuse hit
            self.metrics.hits += 1;
            let buf = self.pool.swap_remove(idx);
            self.metrics.current_size = self
                .metrics
                .current_size
                .saturating_sub(buf.capacity() * mem::size_of::<T>());
            buf
        } else {
            // record an allocation miss
            self.metrics.misses += 1;
            Vec::with_capacity(len)
        };
        buf.clear();
        buf.resize(len, T::ZERO);

        debug_assert_eq!(self.metrics.current_size, self.pooled_bytes());
        buf
    }

    /// Return a Vec back into the pool for reuse.
    pub fn recycle_buffer(&mut self, buf: Vec<T>) {
        let buffer_bytes = buf.capacity() * mem::size_of::<T>();
        if self.metrics.current_size + buffer_bytes <= MAX_BUFFERS_SIZE {
            self.metrics.current_size += buffer_bytes;
            self.pool.push(buf);
            self.trim_excess();
        } else {
            // record a dropped buffer due to cap
            self.metrics.drops += 1;
        }
    }

    /// Remove largest buffers until total pooled bytes ≤ TRIM_THRESHOLD.
    fn trim_excess(&mut self) {
        while self.metrics.current_size > TRIM_THRESHOLD {
            let Some((max_idx, max_bytes)) = self
                .pool
                .iter()
                .map(|b| b.capacity() * mem::size_of::<T>())
                .enumerate()
                .max_by_key(|(_, bytes)| *bytes)
            else {
                break;
            };
            self.pool.swap_remove(max_idx);
            self.metrics.current_size = self.metrics.current_size.saturating_sub(max_bytes);
        }

        debug_assert_eq!(self.metrics.current_size, self.pooled_bytes());
    }

    fn pooled_bytes(&self) -> usize {
        self.pool
            .iter()
            .map(|b| b.capacity() * mem::size_of::<T>())
            .sum()
    }

    /// Returns a snapshot of current pool metrics.
    pub fn metrics(&self) -> PoolMetrics {
        self.metrics.clone()
    }
}

impl<T: DType> Default for BufferPool<T> {
    fn default() -> Self {
        Self::new()
    }
}
