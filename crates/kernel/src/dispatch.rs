//! Batched parallel-for used by every CPU stage.
//!
//! Work items are grouped into fixed-size batches (the CPU analogue of a
//! workgroup). Each call returns only after every batch has retired, which is
//! the barrier between consecutive stages. With the `parallel` feature the
//! batches run on the rayon pool; without it they run in order on the calling
//! thread.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Default number of items per batch.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Parallel-for over `n` items in fixed-size batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatcher {
    batch_size: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl Dispatcher {
    /// Dispatcher with `batch_size` items per batch (at least 1).
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Items per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches needed to cover `n` items.
    pub fn batches(&self, n: usize) -> usize {
        n.div_ceil(self.batch_size)
    }

    /// Run `kernel(i, &mut out[i])` for every slot. Each invocation writes only
    /// its own slot.
    pub fn for_each_slot<T, F>(&self, out: &mut [T], kernel: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        let bs = self.batch_size;
        #[cfg(feature = "parallel")]
        out.par_chunks_mut(bs)
            .enumerate()
            .for_each(|(b, chunk)| run_batch(b * bs, chunk, &kernel));
        #[cfg(not(feature = "parallel"))]
        out.chunks_mut(bs)
            .enumerate()
            .for_each(|(b, chunk)| run_batch(b * bs, chunk, &kernel));
    }

    /// Run `kernel(i)` for `i in 0..n`. For stages that scatter into shared
    /// atomics instead of owning an output slot.
    pub fn for_each_index<F>(&self, n: usize, kernel: F)
    where
        F: Fn(usize) + Sync + Send,
    {
        let bs = self.batch_size;
        let batch = |b: usize| {
            for i in b * bs..((b + 1) * bs).min(n) {
                kernel(i);
            }
        };
        #[cfg(feature = "parallel")]
        (0..self.batches(n)).into_par_iter().for_each(batch);
        #[cfg(not(feature = "parallel"))]
        (0..self.batches(n)).for_each(batch);
    }

    /// Run `kernel(block_index, block)` over consecutive blocks of `block`
    /// items. Used by the sort network, whose blocks play the role of
    /// workgroup shared memory.
    pub fn for_each_block<T, F>(&self, data: &mut [T], block: usize, kernel: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        data.par_chunks_mut(block)
            .enumerate()
            .for_each(|(b, chunk)| kernel(b, chunk));
        #[cfg(not(feature = "parallel"))]
        data.chunks_mut(block)
            .enumerate()
            .for_each(|(b, chunk)| kernel(b, chunk));
    }
}

#[inline]
fn run_batch<T, F: Fn(usize, &mut T)>(base: usize, chunk: &mut [T], kernel: &F) {
    for (k, slot) in chunk.iter_mut().enumerate() {
        kernel(base + k, slot);
    }
}
