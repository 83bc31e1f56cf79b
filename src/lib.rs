//! Rigid-body constraint layer for finite-element immersed boundary methods.
//!
//! `cibfe` sits between a Lagrangian structure, discretized with finite elements, and an
//! Eulerian incompressible flow solver. It computes the mass properties and rigid motion of
//! each structure, exchanges constraint forces and velocities with an external constraint
//! solver through [`composite::CompositeVector`]s, and enforces the call order of a time step
//! through [`protocol::TransferProtocol`]. The entry point is [`method::CibFeMethod`].
//!
//! Computations are SPMD: every rank owns a block of each structure's nodes and elements, and
//! all reductions go through a [`comm::Communicator`].
use crate::allocators::SpatialAllocator;
use nalgebra::{DefaultAllocator, DimMin, DimName, OVector, Vector3, U2, U3, U6};

pub mod allocators;
pub mod composite;
pub mod config;
pub mod connectivity;
pub mod element;
pub mod eulerian;
pub mod force;
pub mod kinematics;
pub mod mesh;
pub mod method;
pub mod partition;
pub mod protocol;
pub mod quadrature;
pub mod restart;
pub mod structure;
pub mod vector;

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate nalgebra;

pub mod comm {
    pub use cibfe_comm::*;
}

/// A small, fixed-size dimension.
///
/// Used as a trait alias for various traits frequently needed by generic `cibfe` routines.
pub trait SmallDim: DimName + DimMin<Self, Output = Self> {}

impl<D> SmallDim for D where D: DimName + DimMin<Self, Output = Self> {}

/// A spatial dimension in which rigid structures move, i.e. two or three dimensions.
///
/// Rigid-body quantities (center of mass, angular velocity, inertia) are always stored as
/// three-dimensional quantities. Two-dimensional structures are embedded in the plane `z = 0`,
/// which makes rotations about the `z` axis the only relevant ones.
pub trait SpatialDim: SmallDim {
    /// The number of rigid degrees of freedom: 3 in 2D and 6 in 3D.
    type RigidDofDim: SmallDim;

    /// Packs net linear and angular components into a generalized rigid-body vector.
    ///
    /// Linear components come first, followed by the angular components
    /// (only the `z` component in 2D).
    fn pack_rigid_dofs(linear: &Vector3<f64>, angular: &Vector3<f64>) -> RigidDofVector<Self>
    where
        DefaultAllocator: SpatialAllocator<Self>;

    /// Inverse of [`pack_rigid_dofs`](Self::pack_rigid_dofs).
    fn unpack_rigid_dofs(dofs: &RigidDofVector<Self>) -> (Vector3<f64>, Vector3<f64>)
    where
        DefaultAllocator: SpatialAllocator<Self>;

    /// Embeds a `D`-dimensional vector in three dimensions, padding with zeros.
    fn embed(v: &OVector<f64, Self>) -> Vector3<f64>
    where
        DefaultAllocator: SpatialAllocator<Self>,
    {
        Vector3::from_fn(|i, _| if i < Self::dim() { v[i] } else { 0.0 })
    }

    /// Projects a three-dimensional vector onto the first `D` components.
    fn project(v: &Vector3<f64>) -> OVector<f64, Self>
    where
        DefaultAllocator: SpatialAllocator<Self>,
    {
        OVector::<f64, Self>::from_fn(|i, _| v[i])
    }
}

/// Generalized rigid-body vector (force/torque or velocity) for dimension `D`.
pub type RigidDofVector<D> = OVector<f64, <D as SpatialDim>::RigidDofDim>;

impl SpatialDim for U2 {
    type RigidDofDim = U3;

    fn pack_rigid_dofs(linear: &Vector3<f64>, angular: &Vector3<f64>) -> Vector3<f64> {
        Vector3::new(linear.x, linear.y, angular.z)
    }

    fn unpack_rigid_dofs(dofs: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
        (Vector3::new(dofs[0], dofs[1], 0.0), Vector3::new(0.0, 0.0, dofs[2]))
    }
}

impl SpatialDim for U3 {
    type RigidDofDim = U6;

    fn pack_rigid_dofs(linear: &Vector3<f64>, angular: &Vector3<f64>) -> OVector<f64, U6> {
        OVector::<f64, U6>::from_iterator(linear.iter().chain(angular.iter()).copied())
    }

    fn unpack_rigid_dofs(dofs: &OVector<f64, U6>) -> (Vector3<f64>, Vector3<f64>) {
        (dofs.fixed_rows::<3>(0).into_owned(), dofs.fixed_rows::<3>(3).into_owned())
    }
}
