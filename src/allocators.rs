//! Helper traits for allocator trait bounds.
use crate::SpatialDim;
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimName, U1};

/// An allocator for a single dimension.
pub trait DimAllocator<D: DimName>:
    Allocator<f64, D>
    + Allocator<f64, D, D>
    + Allocator<f64, U1, D>
    // Used for various functionality like decompositions
    + Allocator<usize, D>
    + Allocator<(usize, usize), D>
{
}

impl<D> DimAllocator<D> for DefaultAllocator
where
    D: DimName,
    DefaultAllocator: Allocator<f64, D>
        + Allocator<f64, D, D>
        + Allocator<f64, U1, D>
        + Allocator<usize, D>
        + Allocator<(usize, usize), D>,
{
}

/// An allocator for a spatial dimension together with its rigid degrees of freedom.
pub trait SpatialAllocator<D: SpatialDim>:
    DimAllocator<D> + Allocator<f64, D::RigidDofDim>
{
}

impl<D> SpatialAllocator<D> for DefaultAllocator
where
    D: SpatialDim,
    DefaultAllocator: DimAllocator<D> + Allocator<f64, D::RigidDofDim>,
{
}
