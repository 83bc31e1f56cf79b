use crate::allocators::DimAllocator;
use crate::connectivity::{Hex8Connectivity, Quad4Connectivity, Tet4Connectivity, Tri3Connectivity};
use crate::element::ElementConnectivity;
use crate::SmallDim;
use nalgebra::{DefaultAllocator, OPoint, U2, U3};
use std::iter::once;

pub mod procedural;

/// Index-based data structure for conforming meshes (i.e. no hanging nodes).
///
/// The vertices of the mesh are the nodes of the finite element discretization of a structure,
/// and their positions describe the reference configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh<D, Connectivity>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<D>,
{
    vertices: Vec<OPoint<f64, D>>,
    connectivity: Vec<Connectivity>,
}

pub type TriangleMesh2d = Mesh<U2, Tri3Connectivity>;
pub type QuadMesh2d = Mesh<U2, Quad4Connectivity>;
pub type Tet4Mesh = Mesh<U3, Tet4Connectivity>;
pub type HexMesh = Mesh<U3, Hex8Connectivity>;

impl<D, C> Mesh<D, C>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<D>,
{
    pub fn vertices(&self) -> &[OPoint<f64, D>] {
        &self.vertices
    }

    pub fn connectivity(&self) -> &[C] {
        &self.connectivity
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_cells(&self) -> usize {
        self.connectivity.len()
    }
}

impl<D, C> Mesh<D, C>
where
    D: SmallDim,
    C: ElementConnectivity<GeometryDim = D>,
    DefaultAllocator: DimAllocator<D>,
{
    /// Construct a mesh from vertices and connectivity.
    ///
    /// # Panics
    ///
    /// Panics if any cell references a vertex index out of bounds.
    pub fn from_vertices_and_connectivity(vertices: Vec<OPoint<f64, D>>, connectivity: Vec<C>) -> Self {
        for (cell_index, cell) in connectivity.iter().enumerate() {
            for &vertex_index in cell.vertex_indices() {
                assert!(
                    vertex_index < vertices.len(),
                    "Cell {} references vertex {}, but the mesh only has {} vertices.",
                    cell_index,
                    vertex_index,
                    vertices.len()
                );
            }
        }
        Self { vertices, connectivity }
    }

    /// The element with the given index in its reference configuration.
    pub fn get_element(&self, index: usize) -> Option<C::Element> {
        self.connectivity
            .get(index)
            .and_then(|conn| conn.element(&self.vertices))
    }
}

impl QuadMesh2d {
    /// Splits every quadrilateral along the diagonal from its first to its third vertex.
    pub fn split_into_triangles(self) -> TriangleMesh2d {
        let triangles = self
            .connectivity
            .iter()
            .flat_map(|&Quad4Connectivity([a, b, c, d])| {
                once(Tri3Connectivity([a, b, c])).chain(once(Tri3Connectivity([a, c, d])))
            })
            .collect();
        TriangleMesh2d::from_vertices_and_connectivity(self.vertices, triangles)
    }
}

impl HexMesh {
    /// Splits every hexahedron into six positively oriented tetrahedra sharing the diagonal from
    /// the first to the seventh vertex.
    pub fn split_into_tetrahedra(self) -> Tet4Mesh {
        const KUHN_TETRAHEDRA: [[usize; 4]; 6] = [
            [0, 1, 2, 6],
            [0, 2, 3, 6],
            [0, 3, 7, 6],
            [0, 7, 4, 6],
            [0, 4, 5, 6],
            [0, 5, 1, 6],
        ];
        let tetrahedra = self
            .connectivity
            .iter()
            .flat_map(|Hex8Connectivity(hex)| {
                KUHN_TETRAHEDRA
                    .iter()
                    .map(move |local| Tet4Connectivity(local.map(|i| hex[i])))
            })
            .collect();
        Tet4Mesh::from_vertices_and_connectivity(self.vertices, tetrahedra)
    }
}
