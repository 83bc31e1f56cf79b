//! Rigid-body kinematics: mass properties of a structure and incremental rigid motion.
//!
//! All rigid-body quantities are three-dimensional. Two-dimensional structures are embedded in
//! the plane `z = 0`, so that their rotations are rotations about the `z` axis.
use crate::allocators::SpatialAllocator;
use crate::comm::Communicator;
use crate::element::{ElementConnectivity, FiniteElement};
use crate::mesh::Mesh;
use crate::vector::{GhostedVector, VectorError};
use crate::SpatialDim;
use eyre::eyre;
use itertools::izip;
use nalgebra::{DefaultAllocator, Matrix3, OPoint, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;

/// Volume, center of mass and moment of inertia of a structure with unit density.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct MassProperties {
    pub volume: f64,
    pub center_of_mass: Vector3<f64>,
    /// The inertia tensor about the center of mass.
    pub moment_of_inertia: Matrix3<f64>,
}

/// The rule used to advance Lagrangian positions over (part of) a time step.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionUpdateRule {
    /// Explicit half step from the current time using current-time velocities.
    ForwardEuler,
    /// Full step using half-time velocities about the current-time center of mass.
    Midpoint,
    /// Not supported for rigid structures, as trapezoidal position updates can not be expressed
    /// as a composition of finite rotations.
    Trapezoidal,
}

impl Display for PositionUpdateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionUpdateRule::ForwardEuler => write!(f, "forward Euler"),
            PositionUpdateRule::Midpoint => write!(f, "midpoint"),
            PositionUpdateRule::Trapezoidal => write!(f, "trapezoidal"),
        }
    }
}

/// Calls `f(x, dv)` for every quadrature point of every local element, with `x` the physical
/// position of the point in the current configuration and `dv = |det(dx/dxi)| w`.
fn visit_current_quadrature_points<D, C>(
    mesh: &Mesh<D, C>,
    local_elements: &[usize],
    positions: &GhostedVector,
    quadrature_strength: usize,
    mut f: impl FnMut(Vector3<f64>, f64),
) -> Result<(), VectorError>
where
    D: SpatialDim,
    C: ElementConnectivity<GeometryDim = D>,
    DefaultAllocator: SpatialAllocator<D>,
{
    let mut nodal_positions = Vec::new();
    for &element_index in local_elements {
        let connectivity = &mesh.connectivity()[element_index];
        nodal_positions.clear();
        for &node in connectivity.vertex_indices() {
            nodal_positions.push(OPoint::from(positions.get_node::<D>(node)?));
        }
        let element = connectivity
            .element_from_local_vertices(&nodal_positions)
            .expect("Connectivity and nodal positions always have the same length.");
        let rule = element.reference_quadrature(quadrature_strength);
        for (w, xi) in rule.iter() {
            let x = element.map_reference_coords(xi);
            let dv = element.reference_jacobian(xi).determinant().abs() * w;
            f(D::embed(&x.coords), dv);
        }
    }
    Ok(())
}

/// Computes the volume, center of mass and inertia tensor of a structure in its current
/// configuration.
///
/// The integrals are evaluated with the element quadrature rules over the local elements of the
/// calling rank and then summed over all ranks. This is a collective operation. The structure
/// must have positive volume, and `positions` must be synchronized.
pub fn compute_center_of_mass_and_inertia<D, C, Comm>(
    mesh: &Mesh<D, C>,
    local_elements: &[usize],
    positions: &GhostedVector,
    quadrature_strength: usize,
    comm: &Comm,
) -> eyre::Result<MassProperties>
where
    D: SpatialDim,
    C: ElementConnectivity<GeometryDim = D>,
    Comm: Communicator,
    DefaultAllocator: SpatialAllocator<D>,
{
    // [x * dv, y * dv, z * dv, dv]
    let mut moments = [0.0; 4];
    visit_current_quadrature_points(mesh, local_elements, positions, quadrature_strength, |x, dv| {
        for d in 0..3 {
            moments[d] += x[d] * dv;
        }
        moments[3] += dv;
    })?;
    comm.sum_reduce("center_of_mass", &mut moments)?;

    let volume = moments[3];
    if !(volume > 0.0) {
        return Err(eyre!("Structure has non-positive volume {volume}."));
    }
    let center_of_mass = Vector3::new(moments[0], moments[1], moments[2]) / volume;

    let mut inertia = Matrix3::zeros();
    visit_current_quadrature_points(mesh, local_elements, positions, quadrature_strength, |x, dv| {
        let r = x - center_of_mass;
        inertia += (Matrix3::identity() * r.norm_squared() - r * r.transpose()) * dv;
    })?;
    comm.sum_reduce("moment_of_inertia", inertia.as_mut_slice())?;

    Ok(MassProperties {
        volume,
        center_of_mass,
        moment_of_inertia: inertia,
    })
}

/// The rotation matrix for rotating with constant angular velocity `omega` over a time `dt`.
///
/// Returns the identity if `|omega|` is below machine precision.
#[rustfmt::skip]
pub fn rotation_matrix_from_angular_velocity(omega: &Vector3<f64>, dt: f64) -> Matrix3<f64> {
    let norm = omega.norm();
    if norm <= f64::EPSILON {
        return Matrix3::identity();
    }
    let e = omega / norm;
    let theta = norm * dt;
    let (s, c) = theta.sin_cos();
    let t = 1.0 - c;
    Matrix3::new(
        c + t * e.x * e.x,       t * e.x * e.y - s * e.z, t * e.x * e.z + s * e.y,
        t * e.x * e.y + s * e.z, c + t * e.y * e.y,       t * e.y * e.z - s * e.x,
        t * e.x * e.z - s * e.y, t * e.y * e.z + s * e.x, c + t * e.z * e.z,
    )
}

/// Rigidly moves a single point: `x_com_new + R (x_old - x_com_old) + translation`.
pub fn advance_position(
    x_old: &Vector3<f64>,
    x_com_old: &Vector3<f64>,
    rotation: &Matrix3<f64>,
    x_com_new: &Vector3<f64>,
    translation: &Vector3<f64>,
) -> Vector3<f64> {
    x_com_new + rotation * (x_old - x_com_old) + translation
}

/// A rigid motion of all nodes of a structure, as applied by [`advance_rigid_positions`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RigidDisplacement {
    pub center_of_mass_old: Vector3<f64>,
    pub rotation: Matrix3<f64>,
    pub center_of_mass_new: Vector3<f64>,
    pub translation: Vector3<f64>,
}

/// Applies a rigid motion to every owned node of `source`, writing the result to `target`.
///
/// Only owned entries of `target` are written. The caller is responsible for closing `target`
/// before its ghost entries are read.
pub fn advance_rigid_positions<D>(
    source: &GhostedVector,
    target: &mut GhostedVector,
    displacement: &RigidDisplacement,
) -> Result<(), VectorError>
where
    D: SpatialDim,
    DefaultAllocator: SpatialAllocator<D>,
{
    if source.layout() != target.layout() {
        return Err(VectorError::IncompatibleLayouts);
    }
    let RigidDisplacement {
        center_of_mass_old,
        rotation,
        center_of_mass_new,
        translation,
    } = displacement;
    let dim = D::dim();
    target
        .owned_values_mut()
        .as_mut_slice()
        .par_chunks_mut(dim)
        .zip(source.owned_values().as_slice().par_chunks(dim))
        .for_each(|(x_new, x_old)| {
            let mut x = Vector3::zeros();
            for (x_d, &x_old_d) in izip!(x.iter_mut(), x_old) {
                *x_d = x_old_d;
            }
            let x = advance_position(&x, center_of_mass_old, rotation, center_of_mass_new, translation);
            x_new.copy_from_slice(&x.as_slice()[..dim]);
        });
    Ok(())
}
