//! Isoparametric Lagrange elements of first order.
//!
//! Every element stores the positions of its vertices. Elements are constructed on the fly
//! from either the reference configuration of a mesh or the current positions of a structure,
//! which lets the same connectivity describe both configurations.
use crate::allocators::DimAllocator;
use crate::quadrature::QuadratureRule;
use crate::SmallDim;
use nalgebra::{DefaultAllocator, OMatrix, OPoint, OVector};
use std::fmt::Debug;

mod hexahedron;
mod quadrilateral;
mod tetrahedron;
mod triangle;

pub use hexahedron::*;
pub use quadrilateral::*;
pub use tetrahedron::*;
pub use triangle::*;

/// A finite element whose reference domain has the same dimension as its geometry.
pub trait FiniteElement<D>: Debug
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<D>,
{
    /// Returns the number of nodes in the element.
    fn num_nodes(&self) -> usize;

    /// The positions of the element's nodes, in local order.
    fn vertices(&self) -> &[OPoint<f64, D>];

    /// Evaluates each basis function at the given reference coordinates.
    ///
    /// # Panics
    ///
    /// Panics if `basis_values` does not have exactly one entry per node.
    fn populate_basis(&self, basis_values: &mut [f64], reference_coords: &OPoint<f64, D>);

    /// Evaluates the reference gradient of each basis function at the given reference coordinates.
    ///
    /// # Panics
    ///
    /// Panics if `basis_gradients` does not have exactly one entry per node.
    fn populate_basis_gradients(&self, basis_gradients: &mut [OVector<f64, D>], reference_coords: &OPoint<f64, D>);

    /// A quadrature rule on the reference domain of the element, exact for polynomials of
    /// (total) degree `strength`.
    fn reference_quadrature(&self, strength: usize) -> QuadratureRule<D>;

    /// Maps reference coordinates to physical coordinates.
    fn map_reference_coords(&self, reference_coords: &OPoint<f64, D>) -> OPoint<f64, D> {
        let mut phi = vec![0.0; self.num_nodes()];
        self.populate_basis(&mut phi, reference_coords);
        interpolate(&phi, self.vertices())
    }

    /// The Jacobian `dx/dxi` of the reference-to-physical map.
    fn reference_jacobian(&self, reference_coords: &OPoint<f64, D>) -> OMatrix<f64, D, D> {
        let mut gradients = vec![OVector::<f64, D>::zeros(); self.num_nodes()];
        self.populate_basis_gradients(&mut gradients, reference_coords);
        jacobian(&gradients, self.vertices())
    }
}

/// Connectivity of a single element, i.e. the global indices of its vertices.
pub trait ElementConnectivity: Debug + Clone + Send + Sync
where
    DefaultAllocator: DimAllocator<Self::GeometryDim>,
{
    type GeometryDim: SmallDim;
    type Element: FiniteElement<Self::GeometryDim>;

    /// Global vertex indices, in local element order.
    fn vertex_indices(&self) -> &[usize];

    /// Constructs the element from vertex positions given in local element order.
    ///
    /// Returns `None` if the number of positions does not match the number of element nodes.
    fn element_from_local_vertices(&self, local_vertices: &[OPoint<f64, Self::GeometryDim>]) -> Option<Self::Element>;

    /// Constructs the element by looking up its vertices in a global vertex array.
    ///
    /// Returns `None` if any vertex index is out of bounds.
    fn element(&self, vertices: &[OPoint<f64, Self::GeometryDim>]) -> Option<Self::Element> {
        let local_vertices = self
            .vertex_indices()
            .iter()
            .map(|&idx| vertices.get(idx).cloned())
            .collect::<Option<Vec<_>>>()?;
        self.element_from_local_vertices(&local_vertices)
    }
}

/// Interpolates nodal positions with the given basis values.
pub fn interpolate<D>(basis_values: &[f64], nodal_positions: &[OPoint<f64, D>]) -> OPoint<f64, D>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<D>,
{
    assert_eq!(basis_values.len(), nodal_positions.len());
    let mut x = OVector::<f64, D>::zeros();
    for (phi, x_node) in basis_values.iter().zip(nodal_positions) {
        x += &x_node.coords * *phi;
    }
    OPoint::from(x)
}

/// Computes `sum_i x_i * grad(phi_i)^T` for nodal positions `x_i`.
pub fn jacobian<D>(basis_gradients: &[OVector<f64, D>], nodal_positions: &[OPoint<f64, D>]) -> OMatrix<f64, D, D>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<D>,
{
    assert_eq!(basis_gradients.len(), nodal_positions.len());
    let mut j = OMatrix::<f64, D, D>::zeros();
    for (grad, x_node) in basis_gradients.iter().zip(nodal_positions) {
        j += &x_node.coords * grad.transpose();
    }
    j
}

/// Linear Lagrange basis function on `[-1, 1]` with value 1 at `alpha` and 0 at `-alpha`.
#[inline]
fn phi_linear_1d(alpha: f64, xi: f64) -> f64 {
    0.5 * (1.0 + alpha * xi)
}

/// Derivative of [`phi_linear_1d`].
#[inline]
fn phi_linear_1d_grad(alpha: f64) -> f64 {
    0.5 * alpha
}
