//! Cell-sorted spatial hash for neighbor search.
//!
//! Every tick the hash is rebuilt from scratch:
//!
//! 1. [`SpatialHash::assign_keys`] resets the permutation to identity, the
//!    offsets to empty, and writes one cell key per slot.
//! 2. [`SpatialHash::sort`] orders `(key, particle)` pairs with the bitonic
//!    network into `sorted_keys` / `perm`.
//! 3. [`SpatialHash::build_offsets`] records the first sorted position of
//!    every occupied cell.
//!
//! The layout is plain arrays rather than a `HashMap` so it maps directly onto
//! GPU buffers.

use glam::{IVec3, Vec3};
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::dispatch::Dispatcher;
use crate::error::SetupError;
use crate::particle::{Particle, PositionField};
use crate::sort::BitonicSorter;

/// Numeric sentinel stored for "no cell" (dead particle or padding slot).
pub const SENTINEL_KEY: u32 = u32::MAX;

/// Numeric sentinel stored in the offset table for cells without particles.
pub const EMPTY_OFFSET: u32 = u32::MAX;

/// Linear index of a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey(pub u32);

impl CellKey {
    /// Interpret a stored key, mapping the sentinel to `None`.
    #[inline]
    pub fn from_raw(raw: u32) -> Option<Self> {
        (raw != SENTINEL_KEY).then_some(Self(raw))
    }

    /// Stored representation of an optional key.
    #[inline]
    pub fn to_raw(key: Option<Self>) -> u32 {
        key.map_or(SENTINEL_KEY, |k| k.0)
    }
}

/// Uniform grid over the inner box with cell edge equal to the smoothing
/// length, so the 27 cells around a particle hold every neighbor within `h`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellGrid {
    origin: Vec3,
    cell_size: f32,
    inv_cell_size: f32,
    dims: [u32; 3],
}

impl CellGrid {
    /// Grid covering `[min, max]` with cells of edge `cell_size`.
    pub fn new(min: Vec3, max: Vec3, cell_size: f32) -> Result<Self, SetupError> {
        let extent = max - min;
        let too_many = || {
            SetupError::InvalidGeometry(format!(
                "extent {extent:?} with cell size {cell_size} has too many cells for 32-bit keys"
            ))
        };
        let mut dims = [0u32; 3];
        for (dim, len) in dims.iter_mut().zip(extent.to_array()) {
            let cells = (len as f64 / cell_size as f64).ceil().max(1.0);
            if !cells.is_finite() || cells >= SENTINEL_KEY as f64 {
                return Err(too_many());
            }
            *dim = cells as u32;
        }
        let total = dims
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d as u64))
            .ok_or_else(too_many)?;
        if total >= SENTINEL_KEY as u64 {
            return Err(too_many());
        }
        Ok(Self {
            origin: min,
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            dims,
        })
    }

    /// Grid origin (inner minimum corner).
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Cell edge length.
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Number of cells along each axis.
    pub fn dims(&self) -> [u32; 3] {
        self.dims
    }

    /// Total number of cells.
    pub fn total_cells(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    /// Integer cell coordinates of `pos`, clamped into the grid.
    #[inline]
    pub fn cell_of(&self, pos: Vec3) -> IVec3 {
        let c = ((pos - self.origin) * self.inv_cell_size).floor();
        IVec3::new(
            (c.x.max(0.0) as i32).min(self.dims[0] as i32 - 1),
            (c.y.max(0.0) as i32).min(self.dims[1] as i32 - 1),
            (c.z.max(0.0) as i32).min(self.dims[2] as i32 - 1),
        )
    }

    /// Lexicographic key of in-grid cell coordinates, `None` outside the grid.
    #[inline]
    pub fn key(&self, cell: IVec3) -> Option<CellKey> {
        let [dx, dy, dz] = self.dims.map(|d| d as i32);
        if cell.x < 0 || cell.y < 0 || cell.z < 0 || cell.x >= dx || cell.y >= dy || cell.z >= dz {
            return None;
        }
        Some(CellKey((cell.x + dx * (cell.y + dy * cell.z)) as u32))
    }

    /// Key of the cell containing `pos`.
    #[inline]
    pub fn key_of(&self, pos: Vec3) -> CellKey {
        // cell_of clamps into the grid, so the key always exists
        let c = self.cell_of(pos);
        let [dx, dy, _] = self.dims;
        CellKey(c.x as u32 + dx * (c.y as u32 + dy * c.z as u32))
    }

    /// Keys of the (up to) 27 cells around `pos`, skipping cells outside the grid.
    pub fn neighborhood(&self, pos: Vec3) -> impl Iterator<Item = CellKey> + '_ {
        let center = self.cell_of(pos);
        (-1..=1).flat_map(move |dz| {
            (-1..=1).flat_map(move |dy| {
                (-1..=1).filter_map(move |dx| self.key(center + IVec3::new(dx, dy, dz)))
            })
        })
    }
}

/// Per-tick spatial hash buffers: permutation, cell keys, sorted keys and the
/// cell offset table.
pub struct SpatialHash {
    particle_count: usize,
    /// Slot -> particle index; ordered by cell key after sorting.
    perm: Vec<u32>,
    /// Cell key of the particle at each slot (pre-sort).
    cell_keys: Vec<u32>,
    /// Cell keys in ascending order.
    sorted_keys: Vec<u32>,
    /// First sorted position of each cell, or `EMPTY_OFFSET`.
    offsets: Vec<AtomicU32>,
    sorter: BitonicSorter,
}

impl SpatialHash {
    /// Allocate buffers for `particle_count` particles over `grid`.
    ///
    /// Sort buffers are padded to the next power of two that is at least one
    /// block long; padding slots always carry the sentinel key.
    pub fn new(
        particle_count: usize,
        grid: &CellGrid,
        block_size: usize,
    ) -> Result<Self, SetupError> {
        let capacity = BitonicSorter::padded_len(particle_count, block_size);
        let sorter = BitonicSorter::new(capacity, block_size)?;
        Ok(Self {
            particle_count,
            perm: (0..capacity as u32).collect(),
            cell_keys: vec![SENTINEL_KEY; capacity],
            sorted_keys: vec![SENTINEL_KEY; capacity],
            offsets: (0..grid.total_cells())
                .map(|_| AtomicU32::new(EMPTY_OFFSET))
                .collect(),
            sorter,
        })
    }

    /// Padded length of the sort buffers.
    pub fn capacity(&self) -> usize {
        self.perm.len()
    }

    /// Reset and hash every slot.
    ///
    /// Resets the permutation to identity and the offset table to empty, then
    /// writes the cell key of every live particle. Dead particles and padding
    /// slots receive the sentinel.
    pub fn assign_keys(
        &mut self,
        dispatcher: &Dispatcher,
        grid: &CellGrid,
        particles: &[Particle],
    ) {
        let n = self.particle_count;
        dispatcher.for_each_slot(&mut self.perm, |i, slot| *slot = i as u32);
        dispatcher.for_each_slot(&mut self.offsets, |_, slot| {
            *slot.get_mut() = EMPTY_OFFSET;
        });
        dispatcher.for_each_slot(&mut self.cell_keys, |i, key| {
            *key = match particles.get(i) {
                Some(p) if i < n && p.is_alive() => grid.key_of(Vec3::from_array(p.pos)).0,
                _ => SENTINEL_KEY,
            };
        });
    }

    /// Sort `(cell key, particle index)` pairs by key.
    ///
    /// `cell_keys` is left untouched; the ordered keys land in `sorted_keys`.
    pub fn sort(&mut self, dispatcher: &Dispatcher) {
        self.sorted_keys.copy_from_slice(&self.cell_keys);
        self.sorter
            .sort_pairs(dispatcher, &mut self.sorted_keys, &mut self.perm);
    }

    /// Record the first sorted position of every occupied cell.
    ///
    /// Each boundary position writes a distinct cell, so the relaxed stores
    /// never race; the dispatcher barrier publishes them.
    pub fn build_offsets(&mut self, dispatcher: &Dispatcher) {
        let sorted = &self.sorted_keys;
        let offsets = &self.offsets;
        dispatcher.for_each_index(sorted.len(), |i| {
            let key = sorted[i];
            if key == SENTINEL_KEY {
                return;
            }
            if i == 0 || sorted[i - 1] != key {
                offsets[key as usize].store(i as u32, Ordering::Relaxed);
            }
        });
    }

    /// First sorted position of `key`, `None` for an empty cell.
    #[inline]
    pub fn offset(&self, key: CellKey) -> Option<usize> {
        let raw = self.offsets.get(key.0 as usize)?.load(Ordering::Relaxed);
        (raw != EMPTY_OFFSET).then_some(raw as usize)
    }

    /// Sorted positions holding the members of `key`.
    pub fn cell_range(&self, key: CellKey) -> Range<usize> {
        let Some(start) = self.offset(key) else {
            return 0..0;
        };
        let len = self.sorted_keys[start..]
            .iter()
            .take_while(|&&k| k == key.0)
            .count();
        start..start + len
    }

    /// Visit every particle in the 27 cells around `center` (including the
    /// particle at `center` itself).
    #[inline]
    pub fn for_each_neighbor<F: FnMut(usize)>(&self, grid: &CellGrid, center: Vec3, mut f: F) {
        for key in grid.neighborhood(center) {
            for slot in self.cell_range(key) {
                f(self.perm[slot] as usize);
            }
        }
    }

    /// Visit neighbors of particle `i` within the smoothing radius, reading
    /// positions from `field`. Yields `(j, r_ij, |r_ij|^2)`, including `j == i`.
    #[inline]
    pub fn for_each_in_radius<F: FnMut(usize, Vec3, f32)>(
        &self,
        grid: &CellGrid,
        particles: &[Particle],
        field: PositionField,
        center: Vec3,
        h2: f32,
        mut f: F,
    ) {
        self.for_each_neighbor(grid, center, |j| {
            let (pj, _) = particles[j].state(field);
            let r = center - pj;
            let r2 = r.length_squared();
            if r2 < h2 {
                f(j, r, r2);
            }
        });
    }

    /// Slot -> particle permutation.
    pub fn permutation(&self) -> &[u32] {
        &self.perm
    }

    /// Unsorted cell keys (raw, sentinel for dead/padding).
    pub fn cell_keys(&self) -> &[u32] {
        &self.cell_keys
    }

    /// Sorted cell keys (raw, sentinel for dead/padding).
    pub fn sorted_keys(&self) -> &[u32] {
        &self.sorted_keys
    }

    /// Snapshot of the offset table (raw, `EMPTY_OFFSET` for empty cells).
    pub fn offsets(&self) -> Vec<u32> {
        self.offsets
            .iter()
            .map(|o| o.load(Ordering::Relaxed))
            .collect()
    }
}
