//! Rigid structures and the capabilities that prescribe their velocities.
use crate::allocators::SpatialAllocator;
use crate::element::ElementConnectivity;
use crate::kinematics::MassProperties;
use crate::mesh::Mesh;
use crate::partition::MeshPartition;
use crate::vector::{DofLayout, GhostedVector};
use crate::{RigidDofVector, SpatialDim};
use nalgebra::{DefaultAllocator, Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;

/// Translational and rotational velocity of a rigid body.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RigidVelocity {
    pub translational: Vector3<f64>,
    pub rotational: Vector3<f64>,
}

impl RigidVelocity {
    pub fn new(translational: Vector3<f64>, rotational: Vector3<f64>) -> Self {
        Self {
            translational,
            rotational,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn to_rigid_dofs<D>(&self) -> RigidDofVector<D>
    where
        D: SpatialDim,
        DefaultAllocator: SpatialAllocator<D>,
    {
        D::pack_rigid_dofs(&self.translational, &self.rotational)
    }

    pub fn from_rigid_dofs<D>(dofs: &RigidDofVector<D>) -> Self
    where
        D: SpatialDim,
        DefaultAllocator: SpatialAllocator<D>,
    {
        let (translational, rotational) = D::unpack_rigid_dofs(dofs);
        Self::new(translational, rotational)
    }

    /// The velocity `U + W x r` of a point at offset `r` from the center of mass.
    pub fn velocity_at(&self, r: &Vector3<f64>) -> Vector3<f64> {
        self.translational + self.rotational.cross(r)
    }

    /// The arithmetic mean of two velocities.
    pub fn average(&self, other: &RigidVelocity) -> Self {
        Self::new(
            0.5 * (self.translational + other.translational),
            0.5 * (self.rotational + other.rotational),
        )
    }
}

/// Prescribes the velocity of a structure's center of mass as a function of time.
pub trait CenterOfMassVelocity {
    fn velocity(&self, time: f64) -> RigidVelocity;
}

impl<F> CenterOfMassVelocity for F
where
    F: Fn(f64) -> RigidVelocity,
{
    fn velocity(&self, time: f64) -> RigidVelocity {
        self(time)
    }
}

/// Expands a generalized rigid velocity into a nodal velocity field.
pub trait NodalVelocity<D>
where
    D: SpatialDim,
    DefaultAllocator: SpatialAllocator<D>,
{
    /// Writes the owned entries of `velocity`, given the generalized rigid velocity, the nodal
    /// positions and the center of mass of the structure at `time`.
    fn evaluate(
        &self,
        velocity: &mut GhostedVector,
        rigid_velocity: &RigidDofVector<D>,
        positions: &GhostedVector,
        center_of_mass: &Vector3<f64>,
        time: f64,
    ) -> eyre::Result<()>;
}

/// The nodal velocity of a rigid motion, `u = U + W x (x - x_com)`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RigidMotion;

impl<D> NodalVelocity<D> for RigidMotion
where
    D: SpatialDim,
    DefaultAllocator: SpatialAllocator<D>,
{
    fn evaluate(
        &self,
        velocity: &mut GhostedVector,
        rigid_velocity: &RigidDofVector<D>,
        positions: &GhostedVector,
        center_of_mass: &Vector3<f64>,
        _time: f64,
    ) -> eyre::Result<()> {
        let rigid_velocity = RigidVelocity::from_rigid_dofs::<D>(rigid_velocity);
        let owned = velocity.layout().owned_range();
        let block_size = velocity.layout().block_size();
        for node in (owned.start / block_size)..(owned.end / block_size) {
            let x = D::embed(&positions.get_node::<D>(node)?);
            let u = rigid_velocity.velocity_at(&(x - center_of_mass));
            velocity.set_node(node, &D::project(&u))?;
        }
        Ok(())
    }
}

/// The source of a structure's rigid velocity. Exactly one source is active per structure.
pub enum RigidBodyMotion {
    /// The velocity is determined externally, e.g. by a rigid-body solver.
    Free,
    /// The velocity is prescribed as a function of time.
    Prescribed(Box<dyn CenterOfMassVelocity>),
}

impl RigidBodyMotion {
    pub fn is_prescribed(&self) -> bool {
        matches!(self, RigidBodyMotion::Prescribed(_))
    }
}

impl Debug for RigidBodyMotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RigidBodyMotion::Free => write!(f, "Free"),
            RigidBodyMotion::Prescribed(_) => write!(f, "Prescribed(..)"),
        }
    }
}

/// Everything needed to register a structure with [`CibFeMethod`](crate::method::CibFeMethod).
pub struct StructureDescription<D, C>
where
    D: SpatialDim,
    DefaultAllocator: SpatialAllocator<D>,
{
    pub mesh: Arc<Mesh<D, C>>,
    pub motion: RigidBodyMotion,
    pub nodal_velocity: Box<dyn NodalVelocity<D>>,
    pub initial_velocity: RigidVelocity,
}

impl<D, C> StructureDescription<D, C>
where
    D: SpatialDim,
    DefaultAllocator: SpatialAllocator<D>,
{
    /// A structure whose velocity is supplied externally.
    pub fn free(mesh: Arc<Mesh<D, C>>) -> Self {
        Self {
            mesh,
            motion: RigidBodyMotion::Free,
            nodal_velocity: Box::new(RigidMotion),
            initial_velocity: RigidVelocity::zero(),
        }
    }

    /// A structure whose center-of-mass velocity is prescribed.
    pub fn prescribed(mesh: Arc<Mesh<D, C>>, velocity: impl CenterOfMassVelocity + 'static) -> Self {
        Self {
            mesh,
            motion: RigidBodyMotion::Prescribed(Box::new(velocity)),
            nodal_velocity: Box::new(RigidMotion),
            initial_velocity: RigidVelocity::zero(),
        }
    }

    pub fn with_nodal_velocity(self, nodal_velocity: impl NodalVelocity<D> + 'static) -> Self {
        Self {
            nodal_velocity: Box::new(nodal_velocity),
            ..self
        }
    }

    pub fn with_initial_velocity(self, initial_velocity: RigidVelocity) -> Self {
        Self {
            initial_velocity,
            ..self
        }
    }
}

impl<D, C> Debug for StructureDescription<D, C>
where
    D: SpatialDim,
    C: Debug,
    DefaultAllocator: SpatialAllocator<D>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructureDescription")
            .field("mesh", &self.mesh)
            .field("motion", &self.motion)
            .field("initial_velocity", &self.initial_velocity)
            .finish_non_exhaustive()
    }
}

/// Values of a quantity at the current, half and new time of a step.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct TimeLevels<T> {
    pub current: T,
    pub half: T,
    pub new: T,
}

impl<T: Clone> TimeLevels<T> {
    pub fn uniform(value: T) -> Self {
        Self {
            current: value.clone(),
            half: value.clone(),
            new: value,
        }
    }
}

/// Scratch vectors that only exist during a time step.
#[derive(Debug, Clone)]
pub(crate) struct StepVectors {
    pub x_half: GhostedVector,
    pub x_new: GhostedVector,
    pub f_half: GhostedVector,
    pub u_half: GhostedVector,
    pub u_new: GhostedVector,
    pub u_constrained_half: GhostedVector,
}

/// A registered structure together with its Lagrangian fields.
pub(crate) struct RigidStructure<D, C>
where
    D: SpatialDim,
    DefaultAllocator: SpatialAllocator<D>,
{
    pub mesh: Arc<Mesh<D, C>>,
    pub partition: MeshPartition,
    pub layout: Arc<DofLayout>,
    pub motion: RigidBodyMotion,
    pub nodal_velocity: Box<dyn NodalVelocity<D>>,

    pub positions: GhostedVector,
    pub constraint_force: GhostedVector,
    pub constrained_velocity: GhostedVector,
    pub lagrangian_velocity: GhostedVector,

    pub mass_current: MassProperties,
    pub mass_half: MassProperties,
    pub velocity: TimeLevels<RigidVelocity>,
    pub step: Option<StepVectors>,
}

impl<D, C> RigidStructure<D, C>
where
    D: SpatialDim,
    C: ElementConnectivity<GeometryDim = D>,
    DefaultAllocator: SpatialAllocator<D>,
{
    /// Sets up the fields of a structure on the given rank. Positions start out in the reference
    /// configuration of the mesh.
    pub fn new(description: StructureDescription<D, C>, rank: usize, size: usize) -> eyre::Result<Self> {
        let StructureDescription {
            mesh,
            motion,
            nodal_velocity,
            initial_velocity,
        } = description;
        let partition = MeshPartition::from_mesh(&mesh, rank, size);
        let layout = partition.dof_layout(D::dim());

        let reference_positions: Vec<f64> = mesh
            .vertices()
            .iter()
            .flat_map(|v| v.coords.iter().copied())
            .collect();
        let positions = GhostedVector::from_global(Arc::clone(&layout), &reference_positions)?;
        let zeros = GhostedVector::zeros(Arc::clone(&layout));

        let mass = MassProperties {
            volume: 0.0,
            center_of_mass: Vector3::zeros(),
            moment_of_inertia: Matrix3::zeros(),
        };

        Ok(Self {
            mesh,
            partition,
            layout,
            motion,
            nodal_velocity,
            positions,
            constraint_force: zeros.clone(),
            constrained_velocity: zeros.clone(),
            lagrangian_velocity: zeros,
            mass_current: mass,
            mass_half: mass,
            velocity: TimeLevels::uniform(initial_velocity),
            step: None,
        })
    }
}
