use crate::mesh::procedural::create_rectangular_uniform_quad_mesh_2d;
use crate::mesh::QuadMesh2d;
use crate::structure::RigidVelocity;
use ::proptest::prelude::*;
use nalgebra::{Point3, Vector2, Vector3};

pub fn vector3() -> impl Strategy<Value = Vector3<f64>> {
    // Keep coordinates small enough that products of a few of them stay well-conditioned
    let range = -10.0..10.0;
    [range.clone(), range.clone(), range].prop_map(|[x, y, z]| Vector3::new(x, y, z))
}

pub fn point3() -> impl Strategy<Value = Point3<f64>> {
    vector3().prop_map(Point3::from)
}

/// Angular velocities that are either exactly zero or bounded away from zero.
pub fn angular_velocity() -> impl Strategy<Value = Vector3<f64>> {
    prop_oneof![
        1 => Just(Vector3::zeros()),
        9 => vector3().prop_filter("angular velocity must not be tiny", |w| w.norm() > 1e-6),
    ]
}

impl Arbitrary for RigidVelocity {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        (vector3(), angular_velocity())
            .prop_map(|(translational, rotational)| RigidVelocity::new(translational, rotational))
            .boxed()
    }
}

/// Uniform rectangular quad meshes with at most `max_cells` cells and at least one cell.
pub fn rectangular_uniform_mesh_strategy(unit_length: f64, max_cells: usize) -> impl Strategy<Value = QuadMesh2d> {
    let max_cells = max_cells.max(1);
    (1..=max_cells)
        .prop_flat_map(move |units_x| (Just(units_x), 1..=(max_cells / units_x).max(1)))
        .prop_map(move |(units_x, units_y)| {
            create_rectangular_uniform_quad_mesh_2d(unit_length, units_x, units_y, 1, &Vector2::new(0.0, 0.0))
        })
}
