use crate::connectivity::Quad4Connectivity;
use crate::element::{phi_linear_1d, phi_linear_1d_grad, ElementConnectivity, FiniteElement};
use crate::quadrature::{quadrilateral_gauss, QuadratureRule};
use nalgebra::{Point2, Vector2, U2};
use std::convert::TryInto;

/// Reference coordinates of the nodes, counter-clockwise starting from the lower left corner.
const QUAD4_NODES: [[f64; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];

/// Bilinear quadrilateral on the reference square `[-1, 1]^2`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Quad4Element {
    vertices: [Point2<f64>; 4],
}

impl Quad4Element {
    pub fn from_vertices(vertices: [Point2<f64>; 4]) -> Self {
        Self { vertices }
    }

    pub fn reference() -> Self {
        Self::from_vertices(QUAD4_NODES.map(|[x, y]| Point2::new(x, y)))
    }
}

impl FiniteElement<U2> for Quad4Element {
    fn num_nodes(&self) -> usize {
        4
    }

    fn vertices(&self) -> &[Point2<f64>] {
        &self.vertices
    }

    fn populate_basis(&self, basis_values: &mut [f64], xi: &Point2<f64>) {
        assert_eq!(basis_values.len(), 4);
        for (phi, [alpha, beta]) in basis_values.iter_mut().zip(QUAD4_NODES) {
            *phi = phi_linear_1d(alpha, xi.x) * phi_linear_1d(beta, xi.y);
        }
    }

    fn populate_basis_gradients(&self, basis_gradients: &mut [Vector2<f64>], xi: &Point2<f64>) {
        assert_eq!(basis_gradients.len(), 4);
        for (grad, [alpha, beta]) in basis_gradients.iter_mut().zip(QUAD4_NODES) {
            *grad = Vector2::new(
                phi_linear_1d_grad(alpha) * phi_linear_1d(beta, xi.y),
                phi_linear_1d(alpha, xi.x) * phi_linear_1d_grad(beta),
            );
        }
    }

    fn reference_quadrature(&self, strength: usize) -> QuadratureRule<U2> {
        quadrilateral_gauss(strength)
    }
}

impl ElementConnectivity for Quad4Connectivity {
    type GeometryDim = U2;
    type Element = Quad4Element;

    fn vertex_indices(&self) -> &[usize] {
        &self.0
    }

    fn element_from_local_vertices(&self, local_vertices: &[Point2<f64>]) -> Option<Quad4Element> {
        let vertices: [Point2<f64>; 4] = local_vertices.try_into().ok()?;
        Some(Quad4Element::from_vertices(vertices))
    }
}
