use crate::connectivity::Tri3Connectivity;
use crate::element::{ElementConnectivity, FiniteElement};
use crate::quadrature::{triangle_collapsed_gauss, QuadratureRule};
use nalgebra::{Point2, Vector2, U2};
use std::convert::TryInto;

/// Linear triangle with reference vertices `(-1, -1)`, `(1, -1)` and `(-1, 1)`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Tri3Element {
    vertices: [Point2<f64>; 3],
}

impl Tri3Element {
    pub fn from_vertices(vertices: [Point2<f64>; 3]) -> Self {
        Self { vertices }
    }

    pub fn reference() -> Self {
        Self::from_vertices([Point2::new(-1.0, -1.0), Point2::new(1.0, -1.0), Point2::new(-1.0, 1.0)])
    }
}

impl FiniteElement<U2> for Tri3Element {
    fn num_nodes(&self) -> usize {
        3
    }

    fn vertices(&self) -> &[Point2<f64>] {
        &self.vertices
    }

    fn populate_basis(&self, basis_values: &mut [f64], xi: &Point2<f64>) {
        assert_eq!(basis_values.len(), 3);
        basis_values[0] = -0.5 * (xi.x + xi.y);
        basis_values[1] = 0.5 * (1.0 + xi.x);
        basis_values[2] = 0.5 * (1.0 + xi.y);
    }

    fn populate_basis_gradients(&self, basis_gradients: &mut [Vector2<f64>], _xi: &Point2<f64>) {
        assert_eq!(basis_gradients.len(), 3);
        basis_gradients[0] = Vector2::new(-0.5, -0.5);
        basis_gradients[1] = Vector2::new(0.5, 0.0);
        basis_gradients[2] = Vector2::new(0.0, 0.5);
    }

    fn reference_quadrature(&self, strength: usize) -> QuadratureRule<U2> {
        triangle_collapsed_gauss(strength)
    }
}

impl ElementConnectivity for Tri3Connectivity {
    type GeometryDim = U2;
    type Element = Tri3Element;

    fn vertex_indices(&self) -> &[usize] {
        &self.0
    }

    fn element_from_local_vertices(&self, local_vertices: &[Point2<f64>]) -> Option<Tri3Element> {
        let vertices: [Point2<f64>; 3] = local_vertices.try_into().ok()?;
        Some(Tri3Element::from_vertices(vertices))
    }
}
