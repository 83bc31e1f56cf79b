//! Integration of distributed Lagrangian force densities into net generalized rigid-body forces.
use crate::allocators::SpatialAllocator;
use crate::comm::Communicator;
use crate::element::{ElementConnectivity, FiniteElement};
use crate::mesh::Mesh;
use crate::vector::GhostedVector;
use crate::{RigidDofVector, SpatialDim};
use eyre::eyre;
use nalgebra::{DefaultAllocator, OVector, Vector3};

/// Integrates a force density into the net force and the net torque about `center_of_mass`.
///
/// The position field `x` is interpolated with the basis of `position_mesh` and the force
/// density `f` with the basis of `force_mesh`. Both meshes must discretize the same cells, in the
/// same order and on the same reference domain. Quadrature weights are measured in the reference
/// configuration of `force_mesh`.
///
/// In 2D the result is `[F_x, F_y, tau_z]` with `tau_z = F_y dx - F_x dy`, and in 3D
/// `[F, r x F]` with `r = x - center_of_mass`. The local contributions are summed over all ranks
/// with a single reduction, which makes this a collective operation. Both `x` and `f` must be
/// synchronized.
#[allow(clippy::too_many_arguments)]
pub fn integrate_generalized_force<D, CX, CF, Comm>(
    position_mesh: &Mesh<D, CX>,
    force_mesh: &Mesh<D, CF>,
    local_elements: &[usize],
    x: &GhostedVector,
    f: &GhostedVector,
    center_of_mass: &Vector3<f64>,
    quadrature_strength: usize,
    comm: &Comm,
) -> eyre::Result<RigidDofVector<D>>
where
    D: SpatialDim,
    CX: ElementConnectivity<GeometryDim = D>,
    CF: ElementConnectivity<GeometryDim = D>,
    Comm: Communicator,
    DefaultAllocator: SpatialAllocator<D>,
{
    if position_mesh.num_cells() != force_mesh.num_cells() {
        return Err(eyre!(
            "Position mesh has {} cells, but force mesh has {} cells.",
            position_mesh.num_cells(),
            force_mesh.num_cells()
        ));
    }

    let mut net_force = Vector3::zeros();
    let mut net_torque = Vector3::zeros();

    let mut phi_x = Vec::new();
    let mut phi_f = Vec::new();
    for &element_index in local_elements {
        let x_conn = &position_mesh.connectivity()[element_index];
        let f_conn = &force_mesh.connectivity()[element_index];
        let force_element = f_conn
            .element(force_mesh.vertices())
            .ok_or_else(|| eyre!("Force mesh element {element_index} references vertices out of bounds."))?;
        let position_element = x_conn
            .element(position_mesh.vertices())
            .ok_or_else(|| eyre!("Position mesh element {element_index} references vertices out of bounds."))?;

        phi_x.resize(position_element.num_nodes(), 0.0);
        phi_f.resize(force_element.num_nodes(), 0.0);

        let rule = force_element.reference_quadrature(quadrature_strength);
        for (w, xi) in rule.iter() {
            let jxw = force_element.reference_jacobian(xi).determinant().abs() * w;
            position_element.populate_basis(&mut phi_x, xi);
            force_element.populate_basis(&mut phi_f, xi);

            let mut x_qp = OVector::<f64, D>::zeros();
            for (&phi, &node) in phi_x.iter().zip(x_conn.vertex_indices()) {
                x_qp += x.get_node::<D>(node)? * phi;
            }
            let mut f_qp = OVector::<f64, D>::zeros();
            for (&phi, &node) in phi_f.iter().zip(f_conn.vertex_indices()) {
                f_qp += f.get_node::<D>(node)? * phi;
            }

            let force = D::embed(&f_qp) * jxw;
            let r = D::embed(&x_qp) - center_of_mass;
            net_force += force;
            net_torque += r.cross(&force);
        }
    }

    let mut generalized_force = D::pack_rigid_dofs(&net_force, &net_torque);
    comm.sum_reduce("generalized_force", generalized_force.as_mut_slice())?;
    Ok(generalized_force)
}
