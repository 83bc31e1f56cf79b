use crate::connectivity::Tet4Connectivity;
use crate::element::{ElementConnectivity, FiniteElement};
use crate::quadrature::{tetrahedron_collapsed_gauss, QuadratureRule};
use nalgebra::{Point3, Vector3, U3};
use std::convert::TryInto;

/// Linear tetrahedron with reference vertices
/// `(-1, -1, -1)`, `(1, -1, -1)`, `(-1, 1, -1)` and `(-1, -1, 1)`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Tet4Element {
    vertices: [Point3<f64>; 4],
}

impl Tet4Element {
    pub fn from_vertices(vertices: [Point3<f64>; 4]) -> Self {
        Self { vertices }
    }

    pub fn reference() -> Self {
        Self::from_vertices([
            Point3::new(-1.0, -1.0, -1.0),
            Point3::new(1.0, -1.0, -1.0),
            Point3::new(-1.0, 1.0, -1.0),
            Point3::new(-1.0, -1.0, 1.0),
        ])
    }
}

impl FiniteElement<U3> for Tet4Element {
    fn num_nodes(&self) -> usize {
        4
    }

    fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    fn populate_basis(&self, basis_values: &mut [f64], xi: &Point3<f64>) {
        assert_eq!(basis_values.len(), 4);
        basis_values[0] = -0.5 * (1.0 + xi.x + xi.y + xi.z);
        basis_values[1] = 0.5 * (1.0 + xi.x);
        basis_values[2] = 0.5 * (1.0 + xi.y);
        basis_values[3] = 0.5 * (1.0 + xi.z);
    }

    fn populate_basis_gradients(&self, basis_gradients: &mut [Vector3<f64>], _xi: &Point3<f64>) {
        assert_eq!(basis_gradients.len(), 4);
        basis_gradients[0] = Vector3::new(-0.5, -0.5, -0.5);
        basis_gradients[1] = Vector3::new(0.5, 0.0, 0.0);
        basis_gradients[2] = Vector3::new(0.0, 0.5, 0.0);
        basis_gradients[3] = Vector3::new(0.0, 0.0, 0.5);
    }

    fn reference_quadrature(&self, strength: usize) -> QuadratureRule<U3> {
        tetrahedron_collapsed_gauss(strength)
    }
}

impl ElementConnectivity for Tet4Connectivity {
    type GeometryDim = U3;
    type Element = Tet4Element;

    fn vertex_indices(&self) -> &[usize] {
        &self.0
    }

    fn element_from_local_vertices(&self, local_vertices: &[Point3<f64>]) -> Option<Tet4Element> {
        let vertices: [Point3<f64>; 4] = local_vertices.try_into().ok()?;
        Some(Tet4Element::from_vertices(vertices))
    }
}
