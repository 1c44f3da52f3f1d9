//! Bitonic sorting network in the block/transpose formulation.
//!
//! The input of length `N` is viewed as a matrix of `N / B` rows by `B`
//! columns, where `B` is the block size (the analogue of a workgroup's shared
//! memory). Merge levels up to `B` run entirely inside a block. Larger levels
//! transpose the matrix so that the long-distance compare-exchange steps
//! become block-local, sort, transpose back and finish the level inside the
//! blocks again.
//!
//! Preconditions (checked by [`BitonicSorter::new`]):
//! - `B` is a power of two, `B >= 2`;
//! - `N` is a power of two and a multiple of `B`;
//! - `N <= B * B`.

use crate::dispatch::Dispatcher;
use crate::error::SortError;

/// Default block size.
pub const DEFAULT_BLOCK_SIZE: usize = 64;

/// A validated sort network for a fixed length and block size.
#[derive(Debug, Clone)]
pub struct BitonicSorter {
    len: usize,
    block: usize,
    packed: Vec<u64>,
    scratch: Vec<u64>,
}

impl BitonicSorter {
    /// Network for exactly `len` elements with blocks of `block`.
    pub fn new(len: usize, block: usize) -> Result<Self, SortError> {
        validate(len, block)?;
        Ok(Self {
            len,
            block,
            packed: vec![0; len],
            scratch: vec![0; len],
        })
    }

    /// Smallest admissible length that holds `n` elements.
    pub fn padded_len(n: usize, block: usize) -> usize {
        n.max(block).max(1).next_power_of_two()
    }

    /// Element count.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the network sorts zero elements (never true once validated).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Block size.
    pub fn block_size(&self) -> usize {
        self.block
    }

    /// Sort `keys` ascending and apply the same permutation to `values`.
    ///
    /// Pairs are packed as `(key << 32) | value`, so equal keys end up ordered
    /// by value and the result is deterministic.
    ///
    /// # Panics
    /// If either slice length differs from [`Self::len`].
    pub fn sort_pairs(&mut self, dispatcher: &Dispatcher, keys: &mut [u32], values: &mut [u32]) {
        assert_eq!(keys.len(), self.len, "key buffer does not match sort length");
        assert_eq!(values.len(), self.len, "value buffer does not match sort length");

        let (k, v) = (&*keys, &*values);
        dispatcher.for_each_slot(&mut self.packed, |i, slot| {
            *slot = ((k[i] as u64) << 32) | v[i] as u64;
        });

        bitonic_sort(dispatcher, &mut self.packed, &mut self.scratch, self.block);

        let packed = &self.packed;
        dispatcher.for_each_slot(keys, |i, key| *key = (packed[i] >> 32) as u32);
        dispatcher.for_each_slot(values, |i, value| *value = packed[i] as u32);
    }
}

/// Check the network preconditions for `len` elements and block size `block`.
pub fn validate(len: usize, block: usize) -> Result<(), SortError> {
    if block < 2 || !block.is_power_of_two() {
        return Err(SortError::InvalidBlockSize(block));
    }
    if len == 0 || !len.is_power_of_two() || len % block != 0 {
        return Err(SortError::InvalidLength { len, block });
    }
    let max = block * block;
    if len > max {
        return Err(SortError::TooLarge { len, max });
    }
    Ok(())
}

/// Sort `data` ascending in place. `scratch` must have the same length.
///
/// Callers are expected to have validated the length with [`validate`].
pub fn bitonic_sort<T>(dispatcher: &Dispatcher, data: &mut [T], scratch: &mut [T], block: usize)
where
    T: Copy + Ord + Send + Sync,
{
    let n = data.len();
    debug_assert!(validate(n, block).is_ok());
    debug_assert_eq!(scratch.len(), n);

    // Levels that fit inside one block.
    let mut level = 2;
    while level <= block {
        sort_blocks(dispatcher, data, block, level, level);
        level <<= 1;
    }

    // Wider levels: transpose so the long strides become block-local.
    let width = block;
    let height = n / block;
    let mut level = block << 1;
    while level <= n {
        transpose(dispatcher, data, scratch, width, height);
        sort_blocks(dispatcher, scratch, block, level / block, (level & !n) / block);
        transpose(dispatcher, scratch, data, height, width);
        sort_blocks(dispatcher, data, block, block, level);
        level <<= 1;
    }
}

/// Block-local bitonic merge for one level.
///
/// Each compare-exchange sub-step reads a snapshot of the block (the shared
/// memory copy) and every element writes only itself. `mask` selects the sort
/// direction from the global element index.
fn sort_blocks<T>(dispatcher: &Dispatcher, data: &mut [T], block: usize, level: usize, mask: usize)
where
    T: Copy + Ord + Send + Sync,
{
    dispatcher.for_each_block(data, block, |b, chunk| {
        let base = b * block;
        let mut shared = chunk.to_vec();
        let mut j = level >> 1;
        while j > 0 {
            for (gi, out) in chunk.iter_mut().enumerate() {
                let descending = (mask & (base + gi)) != 0;
                let ordered = shared[gi & !j] <= shared[gi | j];
                *out = if ordered == descending { shared[gi ^ j] } else { shared[gi] };
            }
            shared.copy_from_slice(chunk);
            j >>= 1;
        }
    });
}

/// `output[x * height + y] = input[y * width + x]` for a `height x width` input.
fn transpose<T>(dispatcher: &Dispatcher, input: &[T], output: &mut [T], width: usize, height: usize)
where
    T: Copy + Send + Sync,
{
    dispatcher.for_each_slot(output, |i, out| {
        let x = i / height;
        let y = i % height;
        *out = input[y * width + x];
    });
}
