//! The interface to the Eulerian flow solver.
//!
//! Interpolation and spreading are carried out by the hierarchy that stores the fluid fields.
//! That hierarchy is owned by the outer integrator and is handed to every operation that needs
//! it, rather than being stored by the constraint layer.
use crate::allocators::SpatialAllocator;
use crate::vector::GhostedVector;
use crate::SpatialDim;
use nalgebra::{DefaultAllocator, OPoint, OVector, Vector3};

/// Transfers data between the Lagrangian mesh of a structure and the Eulerian grid.
pub trait EulerianTransfer<D>
where
    D: SpatialDim,
    DefaultAllocator: SpatialAllocator<D>,
{
    /// Samples the Eulerian velocity at `time` onto the nodes of a structure.
    ///
    /// Implementations write the owned entries of `velocity`.
    fn interpolate_velocity(
        &mut self,
        structure: usize,
        positions: &GhostedVector,
        velocity: &mut GhostedVector,
        time: f64,
    ) -> eyre::Result<()>;

    /// Spreads a Lagrangian force density located at `positions` onto the Eulerian grid.
    fn spread_force(
        &mut self,
        structure: usize,
        positions: &GhostedVector,
        force: &GhostedVector,
        time: f64,
    ) -> eyre::Result<()>;
}

/// A prescribed analytic flow field, without an underlying grid.
///
/// Interpolation evaluates the field at the nodes. Spreading accumulates the nodal force values
/// owned by the local rank per structure, which is useful to check what was transferred.
pub struct AnalyticFlow<F> {
    velocity_field: F,
    spread_totals: Vec<Vector3<f64>>,
    num_spread_calls: usize,
}

impl<F> AnalyticFlow<F> {
    pub fn new(velocity_field: F) -> Self {
        Self {
            velocity_field,
            spread_totals: Vec::new(),
            num_spread_calls: 0,
        }
    }

    /// Sum of all owned nodal force values spread so far for the given structure.
    pub fn spread_total(&self, structure: usize) -> Vector3<f64> {
        self.spread_totals
            .get(structure)
            .copied()
            .unwrap_or_else(Vector3::zeros)
    }

    pub fn num_spread_calls(&self) -> usize {
        self.num_spread_calls
    }
}

impl<D, F> EulerianTransfer<D> for AnalyticFlow<F>
where
    D: SpatialDim,
    F: FnMut(&OPoint<f64, D>, f64) -> OVector<f64, D>,
    DefaultAllocator: SpatialAllocator<D>,
{
    fn interpolate_velocity(
        &mut self,
        _structure: usize,
        positions: &GhostedVector,
        velocity: &mut GhostedVector,
        time: f64,
    ) -> eyre::Result<()> {
        let owned = velocity.layout().owned_range();
        let block_size = velocity.layout().block_size();
        for node in (owned.start / block_size)..(owned.end / block_size) {
            let x = OPoint::from(positions.get_node::<D>(node)?);
            let u = (self.velocity_field)(&x, time);
            velocity.set_node(node, &u)?;
        }
        Ok(())
    }

    fn spread_force(
        &mut self,
        structure: usize,
        _positions: &GhostedVector,
        force: &GhostedVector,
        _time: f64,
    ) -> eyre::Result<()> {
        if self.spread_totals.len() <= structure {
            self.spread_totals.resize(structure + 1, Vector3::zeros());
        }
        let owned = force.layout().owned_range();
        let block_size = force.layout().block_size();
        for node in (owned.start / block_size)..(owned.end / block_size) {
            self.spread_totals[structure] += D::embed(&force.get_node::<D>(node)?);
        }
        self.num_spread_calls += 1;
        Ok(())
    }
}
