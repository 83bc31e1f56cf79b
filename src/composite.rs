//! Composite vectors that aggregate one sub-vector per structure.
//!
//! The constraint solver works on a single vector spanning all structures. A [`CompositeVector`]
//! concatenates the per-structure vectors in registration order, so that sub-vector `i` always
//! belongs to structure `i`. Flat views concatenate the *owned* entries of each sub-vector on the
//! local rank.
use crate::comm::Communicator;
use crate::vector::{GhostedVector, VectorError};
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeVector {
    parts: Vec<GhostedVector>,
}

impl CompositeVector {
    /// Creates a composite vector from per-structure vectors.
    ///
    /// This is a collective operation: every rank must assemble a composite vector at the same
    /// point, even if it owns no entries of some of the parts.
    pub fn assemble<C: Communicator>(parts: Vec<GhostedVector>, comm: &C) -> eyre::Result<Self> {
        comm.barrier("composite_vector_create")?;
        debug!("assembled composite vector with {} sub-vectors", parts.len());
        Ok(Self { parts })
    }

    /// Destroys the composite vector and returns its parts. Collective, see [`Self::assemble`].
    pub fn release<C: Communicator>(self, comm: &C) -> eyre::Result<Vec<GhostedVector>> {
        comm.barrier("composite_vector_destroy")?;
        Ok(self.parts)
    }

    pub fn num_sub_vectors(&self) -> usize {
        self.parts.len()
    }

    pub fn sub_vector(&self, index: usize) -> Option<&GhostedVector> {
        self.parts.get(index)
    }

    pub fn sub_vector_mut(&mut self, index: usize) -> Option<&mut GhostedVector> {
        self.parts.get_mut(index)
    }

    pub fn sub_vectors(&self) -> &[GhostedVector] {
        &self.parts
    }

    /// The number of entries owned by the local rank, summed over all sub-vectors.
    pub fn local_len(&self) -> usize {
        self.parts.iter().map(|part| part.owned_values().len()).sum()
    }

    pub fn scale_mut(&mut self, factor: f64) {
        for part in &mut self.parts {
            part.scale_mut(factor);
        }
    }

    /// Copies all sub-vectors of `other` into `self`.
    pub fn copy_from(&mut self, other: &CompositeVector) -> Result<(), VectorError> {
        if self.parts.len() != other.parts.len() {
            return Err(VectorError::IncompatibleLayouts);
        }
        for (target, source) in self.parts.iter_mut().zip(&other.parts) {
            target.copy_from(source)?;
        }
        Ok(())
    }

    /// Writes `scale` times the owned entries of every sub-vector into `flat`.
    pub fn copy_to_slice(&self, flat: &mut [f64], scale: f64) -> Result<(), VectorError> {
        self.check_flat_len(flat.len())?;
        let mut offset = 0;
        for part in &self.parts {
            let owned = part.owned_values();
            for (target, &value) in flat[offset..offset + owned.len()].iter_mut().zip(owned.iter()) {
                *target = scale * value;
            }
            offset += owned.len();
        }
        Ok(())
    }

    /// Overwrites the owned entries of every sub-vector with the values in `flat`.
    ///
    /// Ghost entries of the sub-vectors are out of date afterwards.
    pub fn copy_from_slice(&mut self, flat: &[f64]) -> Result<(), VectorError> {
        self.check_flat_len(flat.len())?;
        let mut offset = 0;
        for part in &mut self.parts {
            let owned = part.owned_values_mut();
            let n = owned.len();
            owned.copy_from_slice(&flat[offset..offset + n]);
            offset += n;
        }
        Ok(())
    }

    fn check_flat_len(&self, found: usize) -> Result<(), VectorError> {
        let expected = self.local_len();
        if found != expected {
            Err(VectorError::LengthMismatch { expected, found })
        } else {
            Ok(())
        }
    }
}
