//! Distributed vectors with ghost entries.
//!
//! A [`GhostedVector`] stores the entries owned by the local rank together with read-only
//! copies of selected entries owned by other ranks (ghosts). Writes are only permitted to owned
//! entries. After writing, [`GhostedVector::close`] must be called collectively to refresh the
//! ghost copies before they can be read again.
use crate::comm::{CommError, Communicator};
use log::trace;
use nalgebra::allocator::Allocator;
use nalgebra::{DVector, DefaultAllocator, DimName, OVector};
use rustc_hash::FxHashMap;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VectorError {
    /// Attempt to write to an entry owned by another rank.
    NotOwned { index: usize },
    /// The entry is neither owned by nor ghosted on this rank.
    NotAvailable { index: usize },
    /// Attempt to read a ghost entry after local modifications without an intermediate `close`.
    Unsynchronized { index: usize },
    /// The two vectors do not share the same distribution.
    IncompatibleLayouts,
    LengthMismatch { expected: usize, found: usize },
}

impl Display for VectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorError::NotOwned { index } => write!(f, "Entry {index} is not owned by this rank."),
            VectorError::NotAvailable { index } => write!(f, "Entry {index} is neither owned nor ghosted on this rank."),
            VectorError::Unsynchronized { index } => write!(
                f,
                "Ghost entry {index} is out of date. The vector must be closed before reading ghost entries."
            ),
            VectorError::IncompatibleLayouts => write!(f, "Vectors have incompatible layouts."),
            VectorError::LengthMismatch { expected, found } => {
                write!(f, "Length mismatch: expected {expected} values, found {found}.")
            }
        }
    }
}

impl Error for VectorError {}

/// Describes how a distributed vector is laid out on the local rank.
#[derive(Debug, Clone, PartialEq)]
pub struct DofLayout {
    global_len: usize,
    owned: Range<usize>,
    ghosts: Vec<usize>,
    ghost_lookup: FxHashMap<usize, usize>,
    block_size: usize,
}

impl DofLayout {
    /// # Panics
    ///
    /// Panics if the owned range is out of bounds, if a ghost index is owned or out of bounds,
    /// or if `block_size` is zero.
    pub fn new(global_len: usize, owned: Range<usize>, ghosts: Vec<usize>, block_size: usize) -> Self {
        assert!(block_size > 0, "Block size must be positive.");
        assert!(owned.start <= owned.end && owned.end <= global_len, "Owned range out of bounds.");
        let mut ghost_lookup = FxHashMap::default();
        for (local, &global) in ghosts.iter().enumerate() {
            assert!(global < global_len, "Ghost index {} out of bounds.", global);
            assert!(!owned.contains(&global), "Ghost index {} is owned by this rank.", global);
            ghost_lookup.insert(global, local);
        }
        Self {
            global_len,
            owned,
            ghosts,
            ghost_lookup,
            block_size,
        }
    }

    /// A layout in which the local rank owns every entry.
    pub fn serial(global_len: usize, block_size: usize) -> Self {
        Self::new(global_len, 0..global_len, Vec::new(), block_size)
    }

    pub fn global_len(&self) -> usize {
        self.global_len
    }

    pub fn owned_range(&self) -> Range<usize> {
        self.owned.clone()
    }

    pub fn ghosts(&self) -> &[usize] {
        &self.ghosts
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_owned(&self, index: usize) -> bool {
        self.owned.contains(&index)
    }
}

/// A distributed vector consisting of owned entries and ghost copies.
#[derive(Debug, Clone, PartialEq)]
pub struct GhostedVector {
    layout: Arc<DofLayout>,
    owned: DVector<f64>,
    ghosts: Vec<f64>,
    synchronized: bool,
}

impl GhostedVector {
    pub fn zeros(layout: Arc<DofLayout>) -> Self {
        let owned = DVector::zeros(layout.owned.len());
        let ghosts = vec![0.0; layout.ghosts.len()];
        Self {
            layout,
            owned,
            ghosts,
            synchronized: true,
        }
    }

    /// Creates a vector from the full global array. Every rank must pass the same values.
    pub fn from_global(layout: Arc<DofLayout>, global: &[f64]) -> Result<Self, VectorError> {
        if global.len() != layout.global_len {
            return Err(VectorError::LengthMismatch {
                expected: layout.global_len,
                found: global.len(),
            });
        }
        let owned = DVector::from_column_slice(&global[layout.owned.clone()]);
        let ghosts = layout.ghosts.iter().map(|&i| global[i]).collect();
        Ok(Self {
            layout,
            owned,
            ghosts,
            synchronized: true,
        })
    }

    pub fn layout(&self) -> &Arc<DofLayout> {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.layout.global_len
    }

    pub fn is_empty(&self) -> bool {
        self.layout.global_len == 0
    }

    /// Whether ghost entries reflect the owners' current values.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    pub fn get(&self, index: usize) -> Result<f64, VectorError> {
        if self.layout.is_owned(index) {
            Ok(self.owned[index - self.layout.owned.start])
        } else if let Some(&local) = self.layout.ghost_lookup.get(&index) {
            if self.synchronized {
                Ok(self.ghosts[local])
            } else {
                Err(VectorError::Unsynchronized { index })
            }
        } else {
            Err(VectorError::NotAvailable { index })
        }
    }

    pub fn set(&mut self, index: usize, value: f64) -> Result<(), VectorError> {
        *self.owned_entry_mut(index)? = value;
        Ok(())
    }

    pub fn add(&mut self, index: usize, value: f64) -> Result<(), VectorError> {
        *self.owned_entry_mut(index)? += value;
        Ok(())
    }

    fn owned_entry_mut(&mut self, index: usize) -> Result<&mut f64, VectorError> {
        if !self.layout.is_owned(index) {
            return Err(VectorError::NotOwned { index });
        }
        self.synchronized = false;
        Ok(&mut self.owned[index - self.layout.owned.start])
    }

    /// Reads the `D` values stored for a node of a node-interleaved vector.
    pub fn get_node<D>(&self, node: usize) -> Result<OVector<f64, D>, VectorError>
    where
        D: DimName,
        DefaultAllocator: Allocator<f64, D>,
    {
        let mut values = OVector::<f64, D>::zeros();
        for d in 0..D::dim() {
            values[d] = self.get(node * self.layout.block_size + d)?;
        }
        Ok(values)
    }

    pub fn set_node<D>(&mut self, node: usize, values: &OVector<f64, D>) -> Result<(), VectorError>
    where
        D: DimName,
        DefaultAllocator: Allocator<f64, D>,
    {
        for d in 0..D::dim() {
            self.set(node * self.layout.block_size + d, values[d])?;
        }
        Ok(())
    }

    pub fn owned_values(&self) -> &DVector<f64> {
        &self.owned
    }

    /// Mutable access to the owned entries. Invalidates ghost entries until the next `close`.
    pub fn owned_values_mut(&mut self) -> &mut DVector<f64> {
        self.synchronized = false;
        &mut self.owned
    }

    /// Refreshes ghost entries from their owners. Collective.
    pub fn close<C: Communicator>(&mut self, comm: &C) -> Result<(), CommError> {
        if comm.size() == 1 {
            // Everything is owned, no ghosts to refresh
            self.synchronized = true;
            return Ok(());
        }
        let global = self.gather(comm)?;
        for (ghost, &index) in self.ghosts.iter_mut().zip(&self.layout.ghosts) {
            *ghost = global[index];
        }
        self.synchronized = true;
        trace!("rank {} closed vector with {} ghost entries", comm.rank(), self.ghosts.len());
        Ok(())
    }

    /// Gathers the complete vector on every rank. Collective.
    pub fn localize<C: Communicator>(&self, comm: &C) -> Result<DVector<f64>, CommError> {
        self.gather(comm)
    }

    fn gather<C: Communicator>(&self, comm: &C) -> Result<DVector<f64>, CommError> {
        let mut global = DVector::zeros(self.layout.global_len);
        global
            .rows_mut(self.layout.owned.start, self.layout.owned.len())
            .copy_from(&self.owned);
        comm.sum_reduce("ghost_sync", global.as_mut_slice())?;
        Ok(global)
    }

    /// Scales owned and ghost entries, which leaves the synchronization state unchanged.
    pub fn scale_mut(&mut self, factor: f64) {
        self.owned *= factor;
        for ghost in &mut self.ghosts {
            *ghost *= factor;
        }
    }

    /// Whether both vectors share the same layout, which is required to copy between them.
    pub fn is_compatible_with(&self, other: &GhostedVector) -> bool {
        Arc::ptr_eq(&self.layout, &other.layout) || self.layout == other.layout
    }

    /// Copies all entries, including ghosts and their synchronization state.
    pub fn copy_from(&mut self, other: &GhostedVector) -> Result<(), VectorError> {
        if !self.is_compatible_with(other) {
            return Err(VectorError::IncompatibleLayouts);
        }
        self.owned.copy_from(&other.owned);
        self.ghosts.copy_from_slice(&other.ghosts);
        self.synchronized = other.synchronized;
        Ok(())
    }

    /// Sets every owned and ghost entry to zero.
    pub fn fill_zero(&mut self) {
        self.owned.fill(0.0);
        self.ghosts.iter_mut().for_each(|g| *g = 0.0);
        self.synchronized = true;
    }
}
