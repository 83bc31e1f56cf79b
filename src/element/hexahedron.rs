use crate::connectivity::Hex8Connectivity;
use crate::element::{phi_linear_1d, phi_linear_1d_grad, ElementConnectivity, FiniteElement};
use crate::quadrature::{hexahedron_gauss, QuadratureRule};
use nalgebra::{Point3, Vector3, U3};
use std::convert::TryInto;

/// Reference coordinates of the nodes: the bottom face counter-clockwise, then the top face.
#[rustfmt::skip]
const HEX8_NODES: [[f64; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [ 1.0, -1.0, -1.0],
    [ 1.0,  1.0, -1.0],
    [-1.0,  1.0, -1.0],
    [-1.0, -1.0,  1.0],
    [ 1.0, -1.0,  1.0],
    [ 1.0,  1.0,  1.0],
    [-1.0,  1.0,  1.0],
];

/// Trilinear hexahedron on the reference cube `[-1, 1]^3`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Hex8Element {
    vertices: [Point3<f64>; 8],
}

impl Hex8Element {
    pub fn from_vertices(vertices: [Point3<f64>; 8]) -> Self {
        Self { vertices }
    }

    pub fn reference() -> Self {
        Self::from_vertices(HEX8_NODES.map(|[x, y, z]| Point3::new(x, y, z)))
    }
}

impl FiniteElement<U3> for Hex8Element {
    fn num_nodes(&self) -> usize {
        8
    }

    fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    fn populate_basis(&self, basis_values: &mut [f64], xi: &Point3<f64>) {
        assert_eq!(basis_values.len(), 8);
        for (phi, [alpha, beta, gamma]) in basis_values.iter_mut().zip(HEX8_NODES) {
            *phi = phi_linear_1d(alpha, xi.x) * phi_linear_1d(beta, xi.y) * phi_linear_1d(gamma, xi.z);
        }
    }

    fn populate_basis_gradients(&self, basis_gradients: &mut [Vector3<f64>], xi: &Point3<f64>) {
        assert_eq!(basis_gradients.len(), 8);
        for (grad, [alpha, beta, gamma]) in basis_gradients.iter_mut().zip(HEX8_NODES) {
            *grad = Vector3::new(
                phi_linear_1d_grad(alpha) * phi_linear_1d(beta, xi.y) * phi_linear_1d(gamma, xi.z),
                phi_linear_1d(alpha, xi.x) * phi_linear_1d_grad(beta) * phi_linear_1d(gamma, xi.z),
                phi_linear_1d(alpha, xi.x) * phi_linear_1d(beta, xi.y) * phi_linear_1d_grad(gamma),
            );
        }
    }

    fn reference_quadrature(&self, strength: usize) -> QuadratureRule<U3> {
        hexahedron_gauss(strength)
    }
}

impl ElementConnectivity for Hex8Connectivity {
    type GeometryDim = U3;
    type Element = Hex8Element;

    fn vertex_indices(&self) -> &[usize] {
        &self.0
    }

    fn element_from_local_vertices(&self, local_vertices: &[Point3<f64>]) -> Option<Hex8Element> {
        let vertices: [Point3<f64>; 8] = local_vertices.try_into().ok()?;
        Some(Hex8Element::from_vertices(vertices))
    }
}
