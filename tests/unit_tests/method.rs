use crate::{find_error, on_clusters};
use cibfe::comm::{Communicator, SerialCommunicator};
use cibfe::composite::CompositeVector;
use cibfe::config::CibFeConfig;
use cibfe::connectivity::{Hex8Connectivity, Quad4Connectivity};
use cibfe::eulerian::AnalyticFlow;
use cibfe::method::CibFeMethod;
use cibfe::mesh::procedural::{create_rectangular_uniform_hex_mesh, create_rectangular_uniform_quad_mesh_2d};
use cibfe::mesh::QuadMesh2d;
use cibfe::protocol::{Phase, ProtocolEvent, ProtocolViolation, Readiness, ReadinessFlag};
use cibfe::restart::{RestartError, RestartRecord};
use cibfe::structure::{RigidVelocity, StructureDescription};
use cibfe::vector::{GhostedVector, VectorError};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DVector, Point2, Point3, Vector2, Vector3, Vector6, U2, U3};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

const DT: f64 = 0.1;
const OMEGA: f64 = 1.0;

/// [-1, 1] x [-0.5, 0.5]
fn rectangle() -> Arc<QuadMesh2d> {
    Arc::new(create_rectangular_uniform_quad_mesh_2d(1.0, 2, 1, 2, &Vector2::new(-1.0, 0.5)))
}

fn spinning(_time: f64) -> RigidVelocity {
    RigidVelocity::new(Vector3::zeros(), Vector3::new(0.0, 0.0, OMEGA))
}

fn spinning_rectangle<Comm: Communicator>(comm: Comm) -> CibFeMethod<U2, Quad4Connectivity, Comm> {
    let structures = vec![StructureDescription::prescribed(rectangle(), spinning)];
    CibFeMethod::new(CibFeConfig::new("cibfe"), structures, comm).unwrap()
}

fn free_rectangle<Comm: Communicator>(comm: Comm, velocity: RigidVelocity) -> CibFeMethod<U2, Quad4Connectivity, Comm> {
    let structures = vec![StructureDescription::free(rectangle()).with_initial_velocity(velocity)];
    CibFeMethod::new(CibFeConfig::new("cibfe"), structures, comm).unwrap()
}

fn rotational_flow() -> AnalyticFlow<impl FnMut(&Point2<f64>, f64) -> Vector2<f64>> {
    AnalyticFlow::new(|x: &Point2<f64>, _t: f64| Vector2::new(-x.y, x.x))
}

fn fill_owned(v: &mut CompositeVector, value: f64) {
    for part in 0..v.num_sub_vectors() {
        v.sub_vector_mut(part).unwrap().owned_values_mut().fill(value);
    }
}

fn rotate(x: &Vector2<f64>, angle: f64) -> Vector2<f64> {
    let (s, c) = angle.sin_cos();
    Vector2::new(c * x.x - s * x.y, s * x.x + c * x.y)
}

fn assert_nodes_eq(actual: &GhostedVector, expected: impl Fn(&Vector2<f64>) -> Vector2<f64>, reference: &QuadMesh2d) {
    let owned = actual.layout().owned_range();
    for node in owned.start / 2..owned.end / 2 {
        let x_ref = reference.vertices()[node].coords;
        assert_matrix_eq!(actual.get_node::<U2>(node).unwrap(), expected(&x_ref), comp = abs, tol = 1e-12);
    }
}

#[test]
fn mass_properties_are_computed_on_initialization() {
    let mut method = spinning_rectangle(SerialCommunicator);
    assert_eq!(method.num_rigid_structures(), 1);
    assert_eq!(method.num_nodes(0), Some(15));
    method.initialize_fe_data().unwrap();
    method.initialize_fe_data().unwrap();
    assert_scalar_eq!(method.volume(0).unwrap(), 2.0, comp = abs, tol = 1e-12);
    assert_matrix_eq!(method.center_of_mass(0).unwrap(), Vector3::zeros(), comp = abs, tol = 1e-12);
    assert_scalar_eq!(method.moment_of_inertia(0).unwrap()[(2, 2)], 5.0 / 6.0, comp = abs, tol = 1e-12);
    assert!(method.volume(1).is_none());
}

#[test]
fn full_step_with_prescribed_rotation() {
    let mesh = rectangle();
    let mut method = spinning_rectangle(SerialCommunicator);
    let mut flow = rotational_flow();
    let half = 0.5 * DT;

    method.preprocess_integrate_data(0.0, DT).unwrap();
    assert_eq!(method.phase(), Phase::Preprocessed);
    assert_eq!(method.half_rigid_velocity(0), Some(spinning(half)));

    method.request_velocity_interpolation(half).unwrap();
    method.interpolate_velocity(&mut flow, half).unwrap();
    assert_nodes_eq(method.half_lagrangian_velocity(0).unwrap(), |x| Vector2::new(-x.y, x.x), &mesh);

    method.euler_step(0.0, DT).unwrap();
    assert_nodes_eq(method.half_positions(0).unwrap(), |x| rotate(x, 0.5 * OMEGA * DT), &mesh);
    assert_matrix_eq!(method.half_center_of_mass(0).unwrap(), Vector3::zeros(), comp = abs, tol = 1e-12);

    method.midpoint_step(0.0, DT).unwrap();
    assert_nodes_eq(method.new_positions(0).unwrap(), |x| rotate(x, OMEGA * DT), &mesh);

    let mut l = method.create_composite_vector().unwrap();
    fill_owned(&mut l, 1.0);
    method.set_constraint_force(&l, DT, 1.0).unwrap();
    method.spread_force(&mut flow, half).unwrap();
    assert_eq!(flow.num_spread_calls(), 1);
    assert_matrix_eq!(flow.spread_total(0), Vector3::new(15.0, 15.0, 0.0), comp = abs, tol = 1e-12);

    let generalized_force = method
        .compute_net_rigid_generalized_force(0, l.sub_vector(0).unwrap())
        .unwrap();
    assert_matrix_eq!(generalized_force, Vector3::new(2.0, 2.0, 0.0), comp = abs, tol = 1e-12);

    let mut v = method.create_composite_vector().unwrap();
    method
        .set_rigid_body_velocity(0, &Vector3::new(1.0, 0.0, 0.5), &mut v)
        .unwrap();
    // u = U + W x r at the half-time configuration
    assert_nodes_eq(
        v.sub_vector(0).unwrap(),
        |x| {
            let r = rotate(x, 0.5 * OMEGA * DT);
            Vector2::new(1.0 - 0.5 * r.y, 0.5 * r.x)
        },
        &mesh,
    );
    assert_eq!(method.phase(), Phase::VelocitySet);

    method.postprocess_integrate_data().unwrap();
    assert_eq!(method.phase(), Phase::Postprocessed);
    assert_nodes_eq(method.positions(0).unwrap(), |x| rotate(x, OMEGA * DT), &mesh);
    assert_eq!(
        method.constrained_velocity(0).unwrap().owned_values(),
        v.sub_vector(0).unwrap().owned_values()
    );
    assert!(method.half_positions(0).is_none());
    assert_eq!(method.rigid_velocity(0), Some(spinning(DT)));
}

#[test]
fn interpolation_without_request_leaves_velocity_unchanged() {
    let mut method = spinning_rectangle(SerialCommunicator);
    let mut flow = rotational_flow();
    let half = 0.5 * DT;
    method.preprocess_integrate_data(0.0, DT).unwrap();
    method.request_velocity_interpolation(half).unwrap();
    method.interpolate_velocity(&mut flow, half).unwrap();
    let interpolated = method.half_lagrangian_velocity(0).unwrap().clone();

    let mut zero_flow = AnalyticFlow::new(|_: &Point2<f64>, _: f64| Vector2::<f64>::zeros());
    method.interpolate_velocity(&mut zero_flow, half).unwrap();
    assert_eq!(method.half_lagrangian_velocity(0).unwrap(), &interpolated);
    assert_eq!(method.phase(), Phase::VelocityInterpolated);

    let mut v = method.create_composite_vector().unwrap();
    method.get_interpolated_velocity(&mut v, half, 2.0).unwrap();
    let expected: DVector<f64> = interpolated.owned_values() * 2.0;
    assert_eq!(v.sub_vector(0).unwrap().owned_values(), &expected);
}

/// Runs a complete step and returns the new positions together with the generalized force.
fn spinning_step<Comm: Communicator>(
    mut method: CibFeMethod<U2, Quad4Connectivity, Comm>,
) -> (DVector<f64>, Vector3<f64>) {
    let mut flow = rotational_flow();
    method.preprocess_integrate_data(0.0, DT).unwrap();
    method.request_velocity_interpolation(0.5 * DT).unwrap();
    method.interpolate_velocity(&mut flow, 0.5 * DT).unwrap();
    method.euler_step(0.0, DT).unwrap();
    method.midpoint_step(0.0, DT).unwrap();
    let mut l = method.create_composite_vector().unwrap();
    fill_owned(&mut l, 1.0);
    method.set_constraint_force(&l, DT, -0.5).unwrap();
    method.spread_force(&mut flow, DT).unwrap();
    let generalized_force = method
        .compute_net_rigid_generalized_force(0, l.sub_vector(0).unwrap())
        .unwrap();
    method.postprocess_integrate_data().unwrap();
    let positions = method
        .positions(0)
        .unwrap()
        .localize(method.communicator())
        .unwrap();
    (positions, generalized_force)
}

#[test]
fn full_step_is_independent_of_number_of_ranks() {
    let (expected_positions, expected_force) = spinning_step(spinning_rectangle(SerialCommunicator));
    for results in on_clusters(|comm| spinning_step(spinning_rectangle(comm))) {
        for (positions, generalized_force) in results {
            assert_matrix_eq!(positions, expected_positions, comp = abs, tol = 1e-12);
            assert_matrix_eq!(generalized_force, expected_force, comp = abs, tol = 1e-12);
        }
    }
}

#[test]
fn prescribed_translation_of_box() {
    let mesh = Arc::new(create_rectangular_uniform_hex_mesh(
        1.0,
        2,
        1,
        1,
        1,
        &Vector3::new(-1.0, -0.5, -0.5),
    ));
    let translation = |_t: f64| RigidVelocity::new(Vector3::new(1.0, 0.0, -2.0), Vector3::zeros());
    let structures = vec![StructureDescription::prescribed(mesh.clone(), translation)];
    let mut method: CibFeMethod<U3, Hex8Connectivity, _> =
        CibFeMethod::new(CibFeConfig::new("box"), structures, SerialCommunicator).unwrap();

    method.preprocess_integrate_data(0.0, DT).unwrap();
    method.euler_step(0.0, DT).unwrap();
    assert_matrix_eq!(
        method.half_center_of_mass(0).unwrap(),
        Vector3::new(0.05, 0.0, -0.1),
        comp = abs,
        tol = 1e-12
    );
    method.midpoint_step(0.0, DT).unwrap();

    let mut l = method.create_composite_vector().unwrap();
    fill_owned(&mut l, 1.0);
    let mut flow = AnalyticFlow::new(|_: &Point3<f64>, _: f64| Vector3::<f64>::zeros());
    method.set_constraint_force(&l, DT, 1.0).unwrap();
    method.spread_force(&mut flow, DT).unwrap();
    let generalized_force = method
        .compute_net_rigid_generalized_force(0, l.sub_vector(0).unwrap())
        .unwrap();
    assert_matrix_eq!(
        generalized_force,
        Vector6::new(2.0, 2.0, 2.0, 0.0, 0.0, 0.0),
        comp = abs,
        tol = 1e-12
    );
    method.postprocess_integrate_data().unwrap();

    let positions = method.positions(0).unwrap();
    for (node, x_ref) in mesh.vertices().iter().enumerate() {
        let expected = x_ref.coords + Vector3::new(0.1, 0.0, -0.2);
        assert_matrix_eq!(positions.get_node::<U3>(node).unwrap(), expected, comp = abs, tol = 1e-12);
    }
}

#[test]
fn free_structure_uses_updated_half_velocity() {
    let mesh = rectangle();
    let mut method = free_rectangle(
        SerialCommunicator,
        RigidVelocity::new(Vector3::new(1.0, 0.0, 0.0), Vector3::zeros()),
    );
    let report = method
        .update_new_rigid_velocity(0, &Vector3::new(3.0, 0.0, 0.0))
        .unwrap_err();
    assert!(matches!(
        find_error::<ProtocolViolation>(&report),
        Some(ProtocolViolation::NotInStep { .. })
    ));

    method.preprocess_integrate_data(0.0, DT).unwrap();
    method.euler_step(0.0, DT).unwrap();
    assert_nodes_eq(method.half_positions(0).unwrap(), |x| x + Vector2::new(0.05, 0.0), &mesh);

    method
        .update_new_rigid_velocity(0, &Vector3::new(3.0, 0.0, 0.0))
        .unwrap();
    let half_velocity = method.half_rigid_velocity(0).unwrap();
    assert_eq!(half_velocity.translational, Vector3::new(2.0, 0.0, 0.0));

    method.midpoint_step(0.0, DT).unwrap();
    assert_nodes_eq(method.new_positions(0).unwrap(), |x| x + Vector2::new(0.2, 0.0), &mesh);
    method.postprocess_integrate_data().unwrap();
    assert_eq!(
        method.rigid_velocity(0).unwrap().translational,
        Vector3::new(3.0, 0.0, 0.0)
    );
}

fn translating_rectangle() -> CibFeMethod<U2, Quad4Connectivity, SerialCommunicator> {
    let translation = |_t: f64| RigidVelocity::new(Vector3::new(1.0, 0.0, 0.0), Vector3::zeros());
    let structures = vec![StructureDescription::prescribed(rectangle(), translation)];
    CibFeMethod::new(CibFeConfig::new("cibfe"), structures, SerialCommunicator).unwrap()
}

fn zero_flow() -> AnalyticFlow<impl FnMut(&Point2<f64>, f64) -> Vector2<f64>> {
    AnalyticFlow::new(|_: &Point2<f64>, _: f64| Vector2::<f64>::zeros())
}

#[test]
fn free_structure_over_several_steps() {
    let mesh = rectangle();
    let mut method = free_rectangle(
        SerialCommunicator,
        RigidVelocity::new(Vector3::new(1.0, 0.0, 0.0), Vector3::zeros()),
    );
    let mut flow = zero_flow();
    let mut center = 0.0;
    let mut velocity = 1.0;
    for step in 0..3 {
        let (current, new) = (step as f64 * DT, (step + 1) as f64 * DT);
        method.preprocess_integrate_data(current, new).unwrap();
        assert_matrix_eq!(
            method.center_of_mass(0).unwrap(),
            Vector3::new(center, 0.0, 0.0),
            comp = abs,
            tol = 1e-12
        );

        method.euler_step(current, new).unwrap();
        let half_center = center + 0.5 * DT * velocity;
        assert_matrix_eq!(
            method.half_center_of_mass(0).unwrap(),
            Vector3::new(half_center, 0.0, 0.0),
            comp = abs,
            tol = 1e-12
        );

        let mut l = method.create_composite_vector().unwrap();
        fill_owned(&mut l, 1.0);
        method.set_constraint_force(&l, new, 1.0).unwrap();
        method.spread_force(&mut flow, new).unwrap();
        let generalized_force = method
            .compute_net_rigid_generalized_force(0, l.sub_vector(0).unwrap())
            .unwrap();
        assert_matrix_eq!(generalized_force, Vector3::new(2.0, 2.0, 0.0), comp = abs, tol = 1e-12);

        // The midpoint update uses the half-time velocity found by the constraint solve
        let new_velocity = velocity + 1.0;
        method
            .update_new_rigid_velocity(0, &Vector3::new(new_velocity, 0.0, 0.0))
            .unwrap();
        method.midpoint_step(current, new).unwrap();
        method.postprocess_integrate_data().unwrap();

        center += DT * 0.5 * (velocity + new_velocity);
        velocity = new_velocity;
        assert_nodes_eq(method.positions(0).unwrap(), |x| x + Vector2::new(center, 0.0), &mesh);
    }
    assert_eq!(
        method.rigid_velocity(0).unwrap().translational,
        Vector3::new(4.0, 0.0, 0.0)
    );
    assert_eq!(flow.num_spread_calls(), 3);
}

#[test]
fn constraint_solve_before_prediction_uses_current_center_of_mass() {
    let mesh = rectangle();
    let mut method = translating_rectangle();
    method.preprocess_integrate_data(0.0, DT).unwrap();
    method.euler_step(0.0, DT).unwrap();
    method.midpoint_step(0.0, DT).unwrap();
    method.postprocess_integrate_data().unwrap();

    method.preprocess_integrate_data(DT, 2.0 * DT).unwrap();
    let center = Vector3::new(DT, 0.0, 0.0);
    assert_matrix_eq!(method.center_of_mass(0).unwrap(), center, comp = abs, tol = 1e-12);
    assert_matrix_eq!(method.half_center_of_mass(0).unwrap(), center, comp = abs, tol = 1e-12);

    let mut l = method.create_composite_vector().unwrap();
    fill_owned(&mut l, 1.0);
    method.set_constraint_force(&l, DT, 1.0).unwrap();
    method.spread_force(&mut zero_flow(), DT).unwrap();
    let generalized_force = method
        .compute_net_rigid_generalized_force(0, l.sub_vector(0).unwrap())
        .unwrap();
    assert_matrix_eq!(generalized_force, Vector3::new(2.0, 2.0, 0.0), comp = abs, tol = 1e-12);

    // A pure rotation about the center of mass of the translated body
    let mut v = method.create_composite_vector().unwrap();
    method
        .set_rigid_body_velocity(0, &Vector3::new(0.0, 0.0, 1.0), &mut v)
        .unwrap();
    assert_nodes_eq(v.sub_vector(0).unwrap(), |x| Vector2::new(-x.y, x.x), &mesh);

    let report = method.euler_step(DT, 2.0 * DT).unwrap_err();
    assert!(matches!(
        find_error::<ProtocolViolation>(&report),
        Some(ProtocolViolation::IllegalTransition {
            from: Phase::VelocitySet,
            event: ProtocolEvent::AdvancePositions(_)
        })
    ));
    method.postprocess_integrate_data().unwrap();
    assert_nodes_eq(method.positions(0).unwrap(), |x| x + Vector2::new(DT, 0.0), &mesh);
}

#[test]
fn out_of_order_operations_are_rejected() {
    let mut method = translating_rectangle();
    method.preprocess_integrate_data(0.0, DT).unwrap();
    let l = method.create_composite_vector().unwrap();

    let report = method
        .compute_net_rigid_generalized_force(0, l.sub_vector(0).unwrap())
        .unwrap_err();
    assert_eq!(
        find_error::<ProtocolViolation>(&report),
        Some(&ProtocolViolation::IllegalTransition {
            from: Phase::Preprocessed,
            event: ProtocolEvent::ComputeGeneralizedForce
        })
    );
    let mut v = method.create_composite_vector().unwrap();
    assert!(method
        .set_rigid_body_velocity(0, &Vector3::zeros(), &mut v)
        .is_err());
    assert!(method.postprocess_integrate_data().is_err());
    assert_eq!(method.phase(), Phase::Preprocessed);

    method.euler_step(0.0, DT).unwrap();
    method.set_constraint_force(&l, DT, 1.0).unwrap();
    assert!(method.euler_step(0.0, DT).is_err());
    let report = method.postprocess_integrate_data().unwrap_err();
    assert!(matches!(
        find_error::<ProtocolViolation>(&report),
        Some(ProtocolViolation::IllegalTransition {
            from: Phase::ForceSet,
            event: ProtocolEvent::Postprocess
        })
    ));

    method
        .compute_net_rigid_generalized_force(0, l.sub_vector(0).unwrap())
        .unwrap();
    let report = method.postprocess_integrate_data().unwrap_err();
    assert_eq!(
        find_error::<ProtocolViolation>(&report),
        Some(&ProtocolViolation::UnconsumedProduction {
            flag: ReadinessFlag::ConstraintForce
        })
    );
    assert!(method.half_positions(0).is_some());

    method.spread_force(&mut zero_flow(), DT).unwrap();
    method.midpoint_step(0.0, DT).unwrap();
    method.postprocess_integrate_data().unwrap();
}

#[test]
fn failed_transfers_leave_the_protocol_state_unchanged() {
    let mut method = spinning_rectangle(SerialCommunicator);
    let mut flow = rotational_flow();
    method.preprocess_integrate_data(0.0, DT).unwrap();
    method.request_velocity_interpolation(0.5 * DT).unwrap();

    let report = method.interpolate_velocity(&mut flow, 0.3 * DT).unwrap_err();
    assert!(matches!(
        find_error::<ProtocolViolation>(&report),
        Some(ProtocolViolation::TimeMismatch { .. })
    ));
    assert_eq!(
        method.protocol().readiness(ReadinessFlag::LagrangianVelocity),
        Readiness::Ready
    );
    assert_eq!(method.phase(), Phase::Preprocessed);
    method.interpolate_velocity(&mut flow, 0.5 * DT).unwrap();
    assert_eq!(method.phase(), Phase::VelocityInterpolated);

    let square = Arc::new(create_rectangular_uniform_quad_mesh_2d(1.0, 1, 1, 1, &Vector2::new(0.0, 1.0)));
    let other: CibFeMethod<U2, Quad4Connectivity, _> = CibFeMethod::new(
        CibFeConfig::new("other"),
        vec![StructureDescription::free(square)],
        SerialCommunicator,
    )
    .unwrap();
    let mut foreign = other.create_composite_vector().unwrap();
    fill_owned(&mut foreign, 1.0);
    let report = method.set_constraint_force(&foreign, DT, 1.0).unwrap_err();
    assert_eq!(find_error::<VectorError>(&report), Some(&VectorError::IncompatibleLayouts));
    assert_eq!(
        method.protocol().readiness(ReadinessFlag::ConstraintForce),
        Readiness::Empty
    );
    assert_eq!(method.phase(), Phase::VelocityInterpolated);

    let l = method.create_composite_vector().unwrap();
    method.set_constraint_force(&l, DT, 1.0).unwrap();
    assert_eq!(method.phase(), Phase::ForceSet);
}

#[test]
fn prescribed_velocity_can_not_be_overridden() {
    let mut method = spinning_rectangle(SerialCommunicator);
    let report = method.set_rigid_velocity(0, RigidVelocity::zero()).unwrap_err();
    assert_eq!(
        find_error::<ProtocolViolation>(&report),
        Some(&ProtocolViolation::PrescribedVelocityOverride { index: 0 })
    );

    method.preprocess_integrate_data(0.0, DT).unwrap();
    let report = method
        .update_new_rigid_velocity(0, &Vector3::zeros())
        .unwrap_err();
    assert_eq!(
        find_error::<ProtocolViolation>(&report),
        Some(&ProtocolViolation::PrescribedVelocityOverride { index: 0 })
    );
}

#[test]
fn trapezoidal_step_is_rejected() {
    let mut method = spinning_rectangle(SerialCommunicator);
    method.preprocess_integrate_data(0.0, DT).unwrap();
    let report = method.trapezoidal_step(0.0, DT).unwrap_err();
    assert!(matches!(
        find_error::<ProtocolViolation>(&report),
        Some(ProtocolViolation::UnsupportedTimeStepping { .. })
    ));
    assert_eq!(method.phase(), Phase::Preprocessed);
}

#[test]
fn midpoint_step_requires_euler_step() {
    let mut method = spinning_rectangle(SerialCommunicator);
    method.preprocess_integrate_data(0.0, DT).unwrap();
    let report = method.midpoint_step(0.0, DT).unwrap_err();
    assert_eq!(
        find_error::<ProtocolViolation>(&report),
        Some(&ProtocolViolation::MidpointWithoutPrediction)
    );
}

#[test]
fn position_updates_check_step_times() {
    let mut method = spinning_rectangle(SerialCommunicator);
    method.preprocess_integrate_data(0.0, DT).unwrap();
    let report = method.euler_step(0.0, 2.0 * DT).unwrap_err();
    assert!(matches!(
        find_error::<ProtocolViolation>(&report),
        Some(ProtocolViolation::TimeMismatch { .. })
    ));
}

#[test]
fn operations_outside_of_a_step_are_rejected() {
    let mut method = spinning_rectangle(SerialCommunicator);
    let report = method.euler_step(0.0, DT).unwrap_err();
    assert!(matches!(
        find_error::<ProtocolViolation>(&report),
        Some(ProtocolViolation::NotInStep { .. })
    ));
    assert!(method.postprocess_integrate_data().is_err());
    assert!(method.get_constraint_force(0.0).is_err());
}

#[test]
fn constraint_force_time_and_count_are_checked() {
    let mut method = spinning_rectangle(SerialCommunicator);
    method.preprocess_integrate_data(0.0, DT).unwrap();

    let l = method.create_composite_vector().unwrap();
    let report = method.set_constraint_force(&l, 0.5 * DT, 1.0).unwrap_err();
    assert!(matches!(
        find_error::<ProtocolViolation>(&report),
        Some(ProtocolViolation::TimeMismatch { .. })
    ));

    let empty = CompositeVector::assemble(Vec::new(), &SerialCommunicator).unwrap();
    let report = method.set_constraint_force(&empty, DT, 1.0).unwrap_err();
    assert_eq!(
        find_error::<ProtocolViolation>(&report),
        Some(&ProtocolViolation::SubVectorCountMismatch { expected: 1, found: 0 })
    );

    let mut v = CompositeVector::assemble(Vec::new(), &SerialCommunicator).unwrap();
    assert!(method.get_interpolated_velocity(&mut v, 0.5 * DT, 1.0).is_err());

    let report = method
        .compute_net_rigid_generalized_force(3, l.sub_vector(0).unwrap())
        .unwrap_err();
    assert_eq!(
        find_error::<ProtocolViolation>(&report),
        Some(&ProtocolViolation::StructureOutOfRange { index: 3, count: 1 })
    );

    method.set_constraint_force(&l, DT, 1.0).unwrap();
    let report = method.set_constraint_force(&l, DT, 1.0).unwrap_err();
    assert!(matches!(
        find_error::<ProtocolViolation>(&report),
        Some(ProtocolViolation::DuplicateProduction { .. })
    ));
}

#[test]
fn spreading_is_skipped_without_constraint_force() {
    let mut method = spinning_rectangle(SerialCommunicator);
    let mut flow = rotational_flow();
    method.preprocess_integrate_data(0.0, DT).unwrap();
    method.spread_force(&mut flow, 0.5 * DT).unwrap();
    assert_eq!(flow.num_spread_calls(), 0);

    let mut l = method.create_composite_vector().unwrap();
    fill_owned(&mut l, 2.0);
    method.set_constraint_force(&l, 0.0, 0.5).unwrap();
    method.spread_force(&mut flow, 0.5 * DT).unwrap();
    method.spread_force(&mut flow, 0.5 * DT).unwrap();
    assert_eq!(flow.num_spread_calls(), 1);
    assert_matrix_eq!(flow.spread_total(0), Vector3::new(15.0, 15.0, 0.0), comp = abs, tol = 1e-12);
}

#[test]
fn constraint_force_at_new_time_is_committed() {
    let mut method = spinning_rectangle(SerialCommunicator);
    method.preprocess_integrate_data(0.0, DT).unwrap();

    assert!(method.get_constraint_force(0.5 * DT).unwrap().is_none());
    assert!(method.get_constraint_force(0.0).unwrap().is_some());
    let new_force = method.get_constraint_force(DT).unwrap().unwrap();
    fill_owned(new_force, 4.0);
    method.euler_step(0.0, DT).unwrap();
    method.midpoint_step(0.0, DT).unwrap();
    method.postprocess_integrate_data().unwrap();

    let force = method.constraint_force(0).unwrap();
    assert!(force.owned_values().iter().all(|&f| f == 4.0));
}

#[test]
fn restart_round_trip() {
    let velocity = RigidVelocity::new(Vector3::new(1.0, 2.0, 0.0), Vector3::new(0.0, 0.0, 3.0));
    let mut method = free_rectangle(SerialCommunicator, RigidVelocity::zero());
    method.set_rigid_velocity(0, velocity).unwrap();

    let record = method.put_to_database();
    assert_eq!(record.object_name, "cibfe");
    assert_eq!(record.structures[0].translational_velocity, [1.0, 2.0, 0.0]);

    let json = record.to_json().unwrap();
    let mut restored = free_rectangle(SerialCommunicator, RigidVelocity::zero());
    restored.restore_from(&RestartRecord::from_json(&json).unwrap()).unwrap();
    assert_eq!(restored.rigid_velocity(0), Some(velocity));
}

#[test]
fn restore_rejects_incompatible_records() {
    let mut method = free_rectangle(SerialCommunicator, RigidVelocity::zero());
    let foreign = RestartRecord::new("other", Vec::new());
    let report = method.restore_from(&foreign).unwrap_err();
    assert!(matches!(
        find_error::<RestartError>(&report),
        Some(RestartError::ObjectNameMismatch { .. })
    ));

    let record = method.put_to_database();
    method.preprocess_integrate_data(0.0, DT).unwrap();
    assert!(method.restore_from(&record).is_err());
}

#[test]
fn pre_fluid_solve_callbacks_run_in_registration_order() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut method = spinning_rectangle(SerialCommunicator);
    for id in 0..2 {
        let calls = Rc::clone(&calls);
        method.register_pre_fluid_solve_callback(move |current, new, cycle| {
            calls.borrow_mut().push((id, current, new, cycle));
        });
    }
    method.preprocess_solve_fluid_equations(0.0, DT, 3);
    assert_eq!(*calls.borrow(), vec![(0, 0.0, DT, 3), (1, 0.0, DT, 3)]);
}
