//! The constrained immersed boundary coordinator for rigid finite-element structures.
//!
//! [`CibFeMethod`] owns all registered structures and drives them through a time step:
//!
//! 1. `preprocess_integrate_data` opens the step and allocates the half/new snapshots.
//! 2. `interpolate_velocity` samples the Eulerian velocity onto the structures, if requested.
//! 3. `euler_step` predicts the half-time positions.
//! 4. The constraint solver exchanges data through `set_constraint_force`,
//!    `get_constraint_force`, `compute_net_rigid_generalized_force` and
//!    `set_rigid_body_velocity`, and `spread_force` spreads the constraint force onto the
//!    Eulerian grid. These may repeat.
//! 5. `midpoint_step` computes the new positions with the half-time rigid velocity.
//! 6. `postprocess_integrate_data` commits the step.
//!
//! Every operation is validated by a [`TransferProtocol`], see
//! [`transition`](crate::protocol::transition) for the accepted orders. All operations that touch
//! distributed data are collective and must be called in the same order on every rank.
use crate::allocators::SpatialAllocator;
use crate::comm::Communicator;
use crate::composite::CompositeVector;
use crate::config::CibFeConfig;
use crate::element::ElementConnectivity;
use crate::eulerian::EulerianTransfer;
use crate::force::integrate_generalized_force;
use crate::kinematics::{
    advance_rigid_positions, compute_center_of_mass_and_inertia, rotation_matrix_from_angular_velocity,
    PositionUpdateRule, RigidDisplacement,
};
use crate::protocol::{Phase, ProtocolEvent, ProtocolViolation, TimeLevel, TimestepWindow, TransferProtocol};
use crate::restart::{RestartRecord, StructureRestartData};
use crate::structure::{RigidBodyMotion, RigidStructure, RigidVelocity, StepVectors, StructureDescription};
use crate::vector::{GhostedVector, VectorError};
use crate::{RigidDofVector, SpatialDim};
use eyre::{eyre, WrapErr};
use log::{debug, info, warn};
use nalgebra::{DefaultAllocator, Matrix3, Vector3};

/// A callback invoked before every fluid solve with `(current_time, new_time, cycle)`.
pub type PreFluidSolveCallback = Box<dyn FnMut(f64, f64, usize)>;

pub struct CibFeMethod<D, C, Comm>
where
    D: SpatialDim,
    DefaultAllocator: SpatialAllocator<D>,
{
    config: CibFeConfig,
    comm: Comm,
    structures: Vec<RigidStructure<D, C>>,
    protocol: TransferProtocol,
    constraint_force_current: Option<CompositeVector>,
    constraint_force_new: Option<CompositeVector>,
    pre_fluid_solve_callbacks: Vec<PreFluidSolveCallback>,
    fe_data_initialized: bool,
}

fn check_part(part: usize, count: usize) -> Result<(), ProtocolViolation> {
    if part < count {
        Ok(())
    } else {
        Err(ProtocolViolation::StructureOutOfRange { index: part, count })
    }
}

fn check_sub_vector_count(composite: &CompositeVector, expected: usize) -> Result<(), ProtocolViolation> {
    let found = composite.num_sub_vectors();
    if found != expected {
        Err(ProtocolViolation::SubVectorCountMismatch { expected, found })
    } else {
        Ok(())
    }
}

fn step_vectors_mut(step: &mut Option<StepVectors>, part: usize) -> eyre::Result<&mut StepVectors> {
    step.as_mut()
        .ok_or_else(|| eyre!("Structure {part} has no time step data. Was the step preprocessed?"))
}

fn step_vectors(step: &Option<StepVectors>, part: usize) -> eyre::Result<&StepVectors> {
    step.as_ref()
        .ok_or_else(|| eyre!("Structure {part} has no time step data. Was the step preprocessed?"))
}

impl<D, C, Comm> CibFeMethod<D, C, Comm>
where
    D: SpatialDim,
    C: ElementConnectivity<GeometryDim = D>,
    Comm: Communicator,
    DefaultAllocator: SpatialAllocator<D>,
{
    /// Registers the given structures, in order. Structure `i` corresponds to sub-vector `i` of
    /// every composite vector exchanged with the constraint solver.
    pub fn new(
        config: CibFeConfig,
        structures: Vec<StructureDescription<D, C>>,
        comm: Comm,
    ) -> eyre::Result<Self> {
        config.validate()?;
        let (rank, size) = (comm.rank(), comm.size());
        let structures = structures
            .into_iter()
            .enumerate()
            .map(|(part, description)| {
                RigidStructure::new(description, rank, size)
                    .wrap_err_with(|| format!("{}: failed to set up structure {part}", config.object_name))
            })
            .collect::<eyre::Result<Vec<_>>>()?;
        debug!(
            "{}: registered {} structures on rank {rank} of {size}",
            config.object_name,
            structures.len()
        );
        Ok(Self {
            protocol: TransferProtocol::new(config.time_epsilon),
            config,
            comm,
            structures,
            constraint_force_current: None,
            constraint_force_new: None,
            pre_fluid_solve_callbacks: Vec::new(),
            fe_data_initialized: false,
        })
    }

    pub fn config(&self) -> &CibFeConfig {
        &self.config
    }

    pub fn communicator(&self) -> &Comm {
        &self.comm
    }

    pub fn protocol(&self) -> &TransferProtocol {
        &self.protocol
    }

    pub fn phase(&self) -> Phase {
        self.protocol.phase()
    }

    pub fn num_rigid_structures(&self) -> usize {
        self.structures.len()
    }

    /// The global number of nodes of a structure.
    pub fn num_nodes(&self, part: usize) -> Option<usize> {
        self.structures.get(part).map(|s| s.partition.num_nodes())
    }

    /// The current rigid velocity of a structure.
    pub fn rigid_velocity(&self, part: usize) -> Option<RigidVelocity> {
        self.structures.get(part).map(|s| s.velocity.current)
    }

    /// The rigid velocity of a structure at the half time of the active step, if any.
    pub fn half_rigid_velocity(&self, part: usize) -> Option<RigidVelocity> {
        self.structures.get(part).map(|s| s.velocity.half)
    }

    /// The center of mass at the current time.
    pub fn center_of_mass(&self, part: usize) -> Option<Vector3<f64>> {
        self.structures.get(part).map(|s| s.mass_current.center_of_mass)
    }

    /// The center of mass at the half time, as predicted by the last Euler step.
    pub fn half_center_of_mass(&self, part: usize) -> Option<Vector3<f64>> {
        self.structures.get(part).map(|s| s.mass_half.center_of_mass)
    }

    pub fn moment_of_inertia(&self, part: usize) -> Option<Matrix3<f64>> {
        self.structures.get(part).map(|s| s.mass_current.moment_of_inertia)
    }

    pub fn volume(&self, part: usize) -> Option<f64> {
        self.structures.get(part).map(|s| s.mass_current.volume)
    }

    pub fn positions(&self, part: usize) -> Option<&GhostedVector> {
        self.structures.get(part).map(|s| &s.positions)
    }

    pub fn constraint_force(&self, part: usize) -> Option<&GhostedVector> {
        self.structures.get(part).map(|s| &s.constraint_force)
    }

    pub fn constrained_velocity(&self, part: usize) -> Option<&GhostedVector> {
        self.structures.get(part).map(|s| &s.constrained_velocity)
    }

    pub fn lagrangian_velocity(&self, part: usize) -> Option<&GhostedVector> {
        self.structures.get(part).map(|s| &s.lagrangian_velocity)
    }

    /// Positions at the half time of the active step.
    pub fn half_positions(&self, part: usize) -> Option<&GhostedVector> {
        self.structures
            .get(part)
            .and_then(|s| s.step.as_ref())
            .map(|step| &step.x_half)
    }

    /// Positions at the new time of the active step.
    pub fn new_positions(&self, part: usize) -> Option<&GhostedVector> {
        self.structures
            .get(part)
            .and_then(|s| s.step.as_ref())
            .map(|step| &step.x_new)
    }

    /// The Lagrangian velocity at the half time of the active step.
    pub fn half_lagrangian_velocity(&self, part: usize) -> Option<&GhostedVector> {
        self.structures
            .get(part)
            .and_then(|s| s.step.as_ref())
            .map(|step| &step.u_half)
    }

    /// Creates a zeroed composite vector with one sub-vector per structure, laid out like the
    /// structures' nodal fields. Collective.
    pub fn create_composite_vector(&self) -> eyre::Result<CompositeVector> {
        let parts = self
            .structures
            .iter()
            .map(|s| GhostedVector::zeros(s.layout.clone()))
            .collect();
        CompositeVector::assemble(parts, &self.comm)
    }

    /// Computes the initial mass properties of all structures. Calling it again has no effect.
    /// Collective.
    pub fn initialize_fe_data(&mut self) -> eyre::Result<()> {
        if self.fe_data_initialized {
            return Ok(());
        }
        self.update_mass_properties()?;
        let name = &self.config.object_name;
        for (part, structure) in self.structures.iter().enumerate() {
            debug!(
                "{name}: structure {part} has {} nodes, volume {} and center of mass {:?}",
                structure.partition.num_nodes(),
                structure.mass_current.volume,
                structure.mass_current.center_of_mass.as_slice()
            );
        }
        self.fe_data_initialized = true;
        Ok(())
    }

    /// Computes the mass properties of every structure from its current positions. The half-time
    /// properties are reset to the current ones until the half-time positions are predicted.
    fn update_mass_properties(&mut self) -> eyre::Result<()> {
        let name = &self.config.object_name;
        for (part, structure) in self.structures.iter_mut().enumerate() {
            let mass = compute_center_of_mass_and_inertia(
                &structure.mesh,
                structure.partition.local_elements(),
                &structure.positions,
                self.config.quadrature_order,
                &self.comm,
            )
            .wrap_err_with(|| format!("{name}: failed to compute mass properties of structure {part}"))?;
            structure.mass_current = mass;
            structure.mass_half = mass;
        }
        Ok(())
    }

    /// Opens a time step from `current_time` to `new_time`. Collective.
    ///
    /// Allocates the half and new time snapshots of every structure, initializes the new-time
    /// constraint force with the current one and evaluates prescribed velocities at the current,
    /// half and new time. Free structures start the step with their current velocity. The mass
    /// properties are recomputed from the current positions, and serve as the half-time ones
    /// until [`euler_step`](Self::euler_step) predicts the half-time positions.
    pub fn preprocess_integrate_data(&mut self, current_time: f64, new_time: f64) -> eyre::Result<()> {
        let first_step = !self.fe_data_initialized;
        self.initialize_fe_data()?;
        let name = &self.config.object_name;
        let window = self
            .protocol
            .begin_step(current_time, new_time)
            .wrap_err_with(|| format!("{name}: failed to preprocess time step"))?;
        if !first_step {
            self.update_mass_properties()?;
        }

        for structure in &mut self.structures {
            structure.step = Some(StepVectors {
                x_half: structure.positions.clone(),
                x_new: structure.positions.clone(),
                f_half: structure.constraint_force.clone(),
                u_half: structure.lagrangian_velocity.clone(),
                u_new: structure.lagrangian_velocity.clone(),
                u_constrained_half: structure.constrained_velocity.clone(),
            });

            match &structure.motion {
                RigidBodyMotion::Prescribed(velocity) => {
                    structure.velocity.current = velocity.velocity(window.current);
                    structure.velocity.half = velocity.velocity(window.half);
                    structure.velocity.new = velocity.velocity(window.new);
                }
                RigidBodyMotion::Free => {
                    structure.velocity.half = structure.velocity.current;
                    structure.velocity.new = structure.velocity.current;
                }
            }
        }

        let forces: Vec<_> = self
            .structures
            .iter()
            .map(|s| s.constraint_force.clone())
            .collect();
        self.constraint_force_current = Some(CompositeVector::assemble(forces.clone(), &self.comm)?);
        self.constraint_force_new = Some(CompositeVector::assemble(forces, &self.comm)?);
        Ok(())
    }

    /// Closes the active time step. Collective.
    ///
    /// Positions advance to the new time, the new-time constraint force and the half-time
    /// constrained velocity become the structures' authoritative fields, and the new rigid
    /// velocity becomes the current one.
    pub fn postprocess_integrate_data(&mut self) -> eyre::Result<()> {
        let name = &self.config.object_name;
        self.protocol
            .end_step()
            .wrap_err_with(|| format!("{name}: failed to postprocess time step"))?;

        if let Some(current) = self.constraint_force_current.take() {
            current.release(&self.comm)?;
        }
        let new_forces = match self.constraint_force_new.take() {
            Some(new) => Some(new.release(&self.comm)?),
            None => None,
        };

        for (part, structure) in self.structures.iter_mut().enumerate() {
            let step = structure
                .step
                .take()
                .ok_or_else(|| eyre!("{name}: structure {part} has no time step data to commit"))?;
            structure.positions = step.x_new;
            structure.lagrangian_velocity = step.u_new;
            structure.constrained_velocity = step.u_constrained_half;
            if let Some(force) = new_forces.as_ref().and_then(|forces| forces.get(part)) {
                structure.constraint_force.copy_from(force)?;
            }
            structure.velocity.current = structure.velocity.new;
        }
        Ok(())
    }

    /// Invokes all registered pre-fluid-solve callbacks in registration order.
    pub fn preprocess_solve_fluid_equations(&mut self, current_time: f64, new_time: f64, cycle: usize) {
        for callback in &mut self.pre_fluid_solve_callbacks {
            callback(current_time, new_time, cycle);
        }
    }

    pub fn register_pre_fluid_solve_callback(&mut self, callback: impl FnMut(f64, f64, usize) + 'static) {
        self.pre_fluid_solve_callbacks.push(Box::new(callback));
    }

    /// Marks the Lagrangian velocity at the half time as requested, which makes the next call to
    /// [`interpolate_velocity`](Self::interpolate_velocity) perform the interpolation.
    pub fn request_velocity_interpolation(&mut self, data_time: f64) -> eyre::Result<()> {
        let name = &self.config.object_name;
        self.protocol
            .request_velocity_interpolation(data_time)
            .wrap_err_with(|| format!("{name}: failed to request velocity interpolation"))
    }

    /// Interpolates the Eulerian velocity onto every structure at `data_time`. Collective.
    ///
    /// Does nothing unless an interpolation was requested since the last call.
    pub fn interpolate_velocity<E>(&mut self, eulerian: &mut E, data_time: f64) -> eyre::Result<()>
    where
        E: EulerianTransfer<D> + ?Sized,
    {
        let name = &self.config.object_name;
        let event = ProtocolEvent::InterpolateVelocity;
        let epsilon = self.config.time_epsilon;
        let level = self
            .protocol
            .check(event)
            .and_then(|window| time_level_of(&window, data_time, epsilon, event))
            .wrap_err_with(|| format!("{name}: failed to interpolate velocity"))?;
        let requested = self
            .protocol
            .consume_velocity_request()
            .wrap_err_with(|| format!("{name}: failed to interpolate velocity"))?;
        if !requested {
            return Ok(());
        }

        for (part, structure) in self.structures.iter_mut().enumerate() {
            let RigidStructure {
                positions,
                lagrangian_velocity,
                step,
                ..
            } = structure;
            let step = step_vectors_mut(step, part)?;
            let (x, u) = match level {
                TimeLevel::Current => (&*positions, lagrangian_velocity),
                TimeLevel::Half => (&step.x_half, &mut step.u_half),
                TimeLevel::New => (&step.x_new, &mut step.u_new),
            };
            eulerian
                .interpolate_velocity(part, x, u, data_time)
                .wrap_err_with(|| format!("{name}: velocity interpolation failed for structure {part}"))?;
            u.close(&self.comm)?;
        }
        Ok(())
    }

    /// Copies `scale` times the half-time Lagrangian velocity of every structure into `v`.
    pub fn get_interpolated_velocity(&self, v: &mut CompositeVector, data_time: f64, scale: f64) -> eyre::Result<()> {
        let name = &self.config.object_name;
        self.protocol
            .interpolated_velocity_query(data_time)
            .and_then(|_| check_sub_vector_count(v, self.structures.len()))
            .wrap_err_with(|| format!("{name}: failed to get interpolated velocity"))?;
        for (part, structure) in self.structures.iter().enumerate() {
            let step = step_vectors(&structure.step, part)?;
            let target = v
                .sub_vector_mut(part)
                .ok_or(ProtocolViolation::SubVectorCountMismatch {
                    expected: self.structures.len(),
                    found: part,
                })?;
            target.copy_from(&step.u_half)?;
            target.scale_mut(scale);
        }
        Ok(())
    }

    /// Predicts the half-time positions with the current rigid velocity. Collective.
    ///
    /// Rotates every structure by `0.5 dt W^n` about its current center of mass and translates it
    /// by `0.5 dt U^n`. The half-time mass properties are computed from the predicted positions.
    pub fn euler_step(&mut self, current_time: f64, new_time: f64) -> eyre::Result<()> {
        self.advance_positions(PositionUpdateRule::ForwardEuler, current_time, new_time)
    }

    /// Computes the new-time positions with the half-time rigid velocity. Collective.
    ///
    /// Rotates the current configuration by `dt W^{n+1/2}` about the current center of mass and
    /// translates it by `dt U^{n+1/2}`. Requires a preceding [`euler_step`](Self::euler_step).
    pub fn midpoint_step(&mut self, current_time: f64, new_time: f64) -> eyre::Result<()> {
        self.advance_positions(PositionUpdateRule::Midpoint, current_time, new_time)
    }

    /// Always fails: trapezoidal position updates are inconsistent with finite rotations.
    pub fn trapezoidal_step(&mut self, current_time: f64, new_time: f64) -> eyre::Result<()> {
        self.advance_positions(PositionUpdateRule::Trapezoidal, current_time, new_time)
    }

    fn advance_positions(&mut self, rule: PositionUpdateRule, current_time: f64, new_time: f64) -> eyre::Result<()> {
        let name = &self.config.object_name;
        let event = ProtocolEvent::AdvancePositions(rule);
        let window = self
            .protocol
            .check(event)
            .and_then(|window| {
                for (time, level) in [(current_time, TimeLevel::Current), (new_time, TimeLevel::New)] {
                    if window.match_time(time, &[level], self.config.time_epsilon).is_none() {
                        return Err(ProtocolViolation::TimeMismatch {
                            operation: event,
                            time,
                            window,
                        });
                    }
                }
                Ok(window)
            })
            .and_then(|_| self.protocol.advance_positions(rule))
            .wrap_err_with(|| format!("{name}: failed to advance positions with the {rule} rule"))?;
        let dt = window.dt();

        for (part, structure) in self.structures.iter_mut().enumerate() {
            let step = step_vectors_mut(&mut structure.step, part)?;
            match rule {
                PositionUpdateRule::ForwardEuler => {
                    let mass = structure.mass_current;
                    let velocity = structure.velocity.current;
                    let displacement = RigidDisplacement {
                        center_of_mass_old: mass.center_of_mass,
                        rotation: rotation_matrix_from_angular_velocity(&velocity.rotational, 0.5 * dt),
                        center_of_mass_new: mass.center_of_mass,
                        translation: velocity.translational * (0.5 * dt),
                    };
                    advance_rigid_positions::<D>(&structure.positions, &mut step.x_half, &displacement)?;
                    step.x_half.close(&self.comm)?;

                    structure.mass_half = compute_center_of_mass_and_inertia(
                        &structure.mesh,
                        structure.partition.local_elements(),
                        &step.x_half,
                        self.config.quadrature_order,
                        &self.comm,
                    )
                    .wrap_err_with(|| {
                        format!("{name}: failed to compute half-time mass properties of structure {part}")
                    })?;
                }
                PositionUpdateRule::Midpoint => {
                    let velocity = structure.velocity.half;
                    let center_of_mass = structure.mass_current.center_of_mass;
                    let displacement = RigidDisplacement {
                        center_of_mass_old: center_of_mass,
                        rotation: rotation_matrix_from_angular_velocity(&velocity.rotational, dt),
                        center_of_mass_new: center_of_mass,
                        translation: velocity.translational * dt,
                    };
                    advance_rigid_positions::<D>(&structure.positions, &mut step.x_new, &displacement)?;
                    step.x_new.close(&self.comm)?;
                }
                PositionUpdateRule::Trapezoidal => {
                    unreachable!("Trapezoidal updates are rejected by the protocol.")
                }
            }
        }
        debug!("{name}: advanced positions with the {rule} rule over {window}");
        Ok(())
    }

    /// Constraint forces are supplied by the constraint solver, so there is nothing to compute.
    pub fn compute_lagrangian_force(&mut self, data_time: f64) {
        debug!(
            "{}: skipping Lagrangian force computation at time {data_time}",
            self.config.object_name
        );
    }

    /// Copies `scale` times the constraint force `l` into the half-time force of every
    /// structure and marks the constraint force as available for spreading. Collective.
    ///
    /// `data_time` must be the current or the new time of the step.
    pub fn set_constraint_force(&mut self, l: &CompositeVector, data_time: f64, scale: f64) -> eyre::Result<()> {
        let name = &self.config.object_name;
        check_sub_vector_count(l, self.structures.len())
            .and_then(|_| self.protocol.check_constraint_force(data_time))
            .wrap_err_with(|| format!("{name}: failed to set constraint force"))?;
        for (part, (structure, source)) in self.structures.iter().zip(l.sub_vectors()).enumerate() {
            let step = step_vectors(&structure.step, part)?;
            if !step.f_half.is_compatible_with(source) {
                return Err(VectorError::IncompatibleLayouts)
                    .wrap_err_with(|| format!("{name}: incompatible constraint force for structure {part}"));
            }
        }

        for (part, (structure, source)) in self.structures.iter_mut().zip(l.sub_vectors()).enumerate() {
            let step = step_vectors_mut(&mut structure.step, part)?;
            step.f_half.copy_from(source)?;
            step.f_half.scale_mut(scale);
            step.f_half.close(&self.comm)?;
        }
        self.protocol
            .produce_constraint_force(data_time)
            .wrap_err_with(|| format!("{name}: failed to set constraint force"))?;
        Ok(())
    }

    /// The composite constraint force at the current or new time of the step.
    ///
    /// The new-time composite is committed to the structures by
    /// [`postprocess_integrate_data`](Self::postprocess_integrate_data). If `data_time` matches
    /// neither, a warning is logged and `None` is returned.
    pub fn get_constraint_force(&mut self, data_time: f64) -> eyre::Result<Option<&mut CompositeVector>> {
        let name = &self.config.object_name;
        let level = self
            .protocol
            .constraint_force_query(data_time)
            .wrap_err_with(|| format!("{name}: failed to get constraint force"))?;
        let composite = match level {
            Some(TimeLevel::Current) => self.constraint_force_current.as_mut(),
            Some(TimeLevel::New) => self.constraint_force_new.as_mut(),
            Some(TimeLevel::Half) | None => {
                warn!(
                    "{name}: constraint force requested at time {data_time}, which is neither the \
                     current nor the new time."
                );
                return Ok(None);
            }
        };
        composite
            .map(Some)
            .ok_or_else(|| eyre!("{name}: constraint force vectors have not been allocated"))
    }

    /// Integrates the constraint force `l` of a structure into its net force and torque about
    /// the half-time center of mass. Collective.
    ///
    /// `l` is stored as the structure's half-time force.
    pub fn compute_net_rigid_generalized_force(
        &mut self,
        part: usize,
        l: &GhostedVector,
    ) -> eyre::Result<RigidDofVector<D>> {
        let name = &self.config.object_name;
        let event = ProtocolEvent::ComputeGeneralizedForce;
        check_part(part, self.structures.len())
            .and_then(|_| self.protocol.check(event))
            .wrap_err_with(|| format!("{name}: failed to compute generalized force"))?;

        let structure = &mut self.structures[part];
        let step = step_vectors_mut(&mut structure.step, part)?;
        step.f_half
            .copy_from(l)
            .wrap_err_with(|| format!("{name}: incompatible constraint force for structure {part}"))?;
        step.f_half.close(&self.comm)?;

        let generalized_force = integrate_generalized_force(
            &structure.mesh,
            &structure.mesh,
            structure.partition.local_elements(),
            &step.x_half,
            &step.f_half,
            &structure.mass_half.center_of_mass,
            self.config.quadrature_order,
            &self.comm,
        )
        .wrap_err_with(|| format!("{name}: failed to integrate generalized force of structure {part}"))?;
        self.protocol.record(event)?;
        Ok(generalized_force)
    }

    /// Expands the generalized velocity `u` of a structure into its constrained nodal velocity at
    /// the half-time configuration and copies it into sub-vector `part` of `v`. Collective.
    pub fn set_rigid_body_velocity(
        &mut self,
        part: usize,
        u: &RigidDofVector<D>,
        v: &mut CompositeVector,
    ) -> eyre::Result<()> {
        let name = &self.config.object_name;
        let event = ProtocolEvent::SetRigidBodyVelocity;
        let count = self.structures.len();
        let window = check_part(part, count)
            .and_then(|_| check_sub_vector_count(v, count))
            .and_then(|_| self.protocol.check(event))
            .wrap_err_with(|| format!("{name}: failed to set rigid body velocity"))?;

        let structure = &mut self.structures[part];
        let step = step_vectors_mut(&mut structure.step, part)?;
        structure
            .nodal_velocity
            .evaluate(
                &mut step.u_constrained_half,
                u,
                &step.x_half,
                &structure.mass_half.center_of_mass,
                window.new,
            )
            .wrap_err_with(|| format!("{name}: nodal velocity evaluation failed for structure {part}"))?;
        step.u_constrained_half.close(&self.comm)?;

        let target = v
            .sub_vector_mut(part)
            .ok_or(ProtocolViolation::StructureOutOfRange { index: part, count })?;
        target.copy_from(&step.u_constrained_half)?;
        self.protocol.record(event)?;
        Ok(())
    }

    /// Sets the new-time rigid velocity of a free structure, as solved for by the rigid-body
    /// solver. The half-time velocity becomes the average of the current and new velocity.
    pub fn update_new_rigid_velocity(&mut self, part: usize, u: &RigidDofVector<D>) -> eyre::Result<()> {
        let name = &self.config.object_name;
        check_part(part, self.structures.len())
            .and_then(|_| {
                self.protocol.window().map(|_| ()).ok_or(ProtocolViolation::NotInStep {
                    event: ProtocolEvent::SetRigidBodyVelocity,
                })
            })
            .wrap_err_with(|| format!("{name}: failed to update rigid velocity"))?;
        let structure = &mut self.structures[part];
        if structure.motion.is_prescribed() {
            return Err(ProtocolViolation::PrescribedVelocityOverride { index: part })
                .wrap_err_with(|| format!("{name}: failed to update rigid velocity"));
        }
        let new = RigidVelocity::from_rigid_dofs::<D>(u);
        structure.velocity.new = new;
        structure.velocity.half = structure.velocity.current.average(&new);
        Ok(())
    }

    /// Sets the current rigid velocity of a free structure outside of a time step.
    pub fn set_rigid_velocity(&mut self, part: usize, velocity: RigidVelocity) -> eyre::Result<()> {
        let name = &self.config.object_name;
        check_part(part, self.structures.len()).wrap_err_with(|| format!("{name}: failed to set rigid velocity"))?;
        if self.protocol.phase().is_in_step() {
            return Err(eyre!(
                "{name}: the rigid velocity of structure {part} can not be reset during a time step"
            ));
        }
        let structure = &mut self.structures[part];
        if structure.motion.is_prescribed() {
            return Err(ProtocolViolation::PrescribedVelocityOverride { index: part })
                .wrap_err_with(|| format!("{name}: failed to set rigid velocity"));
        }
        structure.velocity.current = velocity;
        structure.velocity.half = velocity;
        structure.velocity.new = velocity;
        Ok(())
    }

    /// Spreads the half-time constraint force of every structure onto the Eulerian grid.
    /// Collective.
    ///
    /// Does nothing unless a constraint force was set since the last call.
    pub fn spread_force<E>(&mut self, eulerian: &mut E, data_time: f64) -> eyre::Result<()>
    where
        E: EulerianTransfer<D> + ?Sized,
    {
        let name = &self.config.object_name;
        let event = ProtocolEvent::SpreadForce;
        let level = self
            .protocol
            .window()
            .ok_or(ProtocolViolation::NotInStep { event })
            .and_then(|window| time_level_of(&window, data_time, self.config.time_epsilon, event))
            .wrap_err_with(|| format!("{name}: failed to spread force"))?;
        let available = self
            .protocol
            .consume_constraint_force()
            .wrap_err_with(|| format!("{name}: failed to spread force"))?;
        if !available {
            return Ok(());
        }

        for (part, structure) in self.structures.iter().enumerate() {
            let step = step_vectors(&structure.step, part)?;
            let x = match level {
                TimeLevel::Current => &structure.positions,
                TimeLevel::Half => &step.x_half,
                TimeLevel::New => &step.x_new,
            };
            eulerian
                .spread_force(part, x, &step.f_half, data_time)
                .wrap_err_with(|| format!("{name}: force spreading failed for structure {part}"))?;
        }
        Ok(())
    }

    /// Stores the current rigid velocities of all structures.
    pub fn put_to_database(&self) -> RestartRecord {
        let structures = self
            .structures
            .iter()
            .map(|s| StructureRestartData {
                translational_velocity: s.velocity.current.translational.into(),
                rotational_velocity: s.velocity.current.rotational.into(),
            })
            .collect();
        RestartRecord::new(self.config.object_name.clone(), structures)
    }

    /// Restores the current rigid velocities of all structures. Only allowed between steps.
    pub fn restore_from(&mut self, record: &RestartRecord) -> eyre::Result<()> {
        let name = &self.config.object_name;
        if self.protocol.phase().is_in_step() {
            return Err(eyre!("{name}: can not restore from a restart record during a time step"));
        }
        record
            .check_compatible(name, self.structures.len())
            .wrap_err_with(|| format!("{name}: failed to restore from restart record"))?;
        for (structure, data) in self.structures.iter_mut().zip(&record.structures) {
            let velocity = RigidVelocity::new(
                Vector3::from(data.translational_velocity),
                Vector3::from(data.rotational_velocity),
            );
            structure.velocity.current = velocity;
            structure.velocity.half = velocity;
            structure.velocity.new = velocity;
        }
        info!("{name}: restored rigid velocities of {} structures", self.structures.len());
        Ok(())
    }
}

/// Matches `time` against all three levels of the window.
fn time_level_of(
    window: &TimestepWindow,
    time: f64,
    epsilon: f64,
    operation: ProtocolEvent,
) -> Result<TimeLevel, ProtocolViolation> {
    window
        .match_time(time, &[TimeLevel::Current, TimeLevel::Half, TimeLevel::New], epsilon)
        .ok_or(ProtocolViolation::TimeMismatch {
            operation,
            time,
            window: *window,
        })
}
