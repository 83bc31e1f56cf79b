use cibfe::allocators::DimAllocator;
use cibfe::connectivity::{Quad4Connectivity, Tri3Connectivity};
use cibfe::element::{ElementConnectivity, FiniteElement};
use cibfe::mesh::procedural::{
    create_rectangular_uniform_hex_mesh, create_rectangular_uniform_quad_mesh_2d, create_rectangular_uniform_tet_mesh,
    create_rectangular_uniform_tri_mesh_2d,
};
use cibfe::mesh::{Mesh, QuadMesh2d};
use cibfe::SmallDim;
use matrixcompare::assert_scalar_eq;
use nalgebra::{DefaultAllocator, Point2, Vector2, Vector3};

/// Sums `|det J| w` over all elements, integrated in the reference configuration of the mesh.
fn mesh_measure<D, C>(mesh: &Mesh<D, C>) -> f64
where
    D: SmallDim,
    C: ElementConnectivity<GeometryDim = D>,
    DefaultAllocator: DimAllocator<D>,
{
    (0..mesh.num_cells())
        .map(|i| {
            let element = mesh.get_element(i).unwrap();
            element
                .reference_quadrature(2)
                .iter()
                .map(|(w, xi)| {
                    let det = element.reference_jacobian(xi).determinant();
                    assert!(det > 0.0, "element {i} is inverted");
                    det * w
                })
                .sum::<f64>()
        })
        .sum()
}

#[test]
fn rectangular_uniform_quad_mesh_layout() {
    let mesh = create_rectangular_uniform_quad_mesh_2d(1.0, 2, 1, 2, &Vector2::new(-1.0, 0.5));
    assert_eq!(mesh.num_cells(), 8);
    assert_eq!(mesh.num_vertices(), 15);
    assert_eq!(mesh.vertices()[0], Point2::new(-1.0, 0.5));
    assert_eq!(mesh.vertices()[14], Point2::new(1.0, -0.5));
    // The first cell is the top-left one, with counter-clockwise vertices
    assert_eq!(mesh.connectivity()[0], Quad4Connectivity([5, 6, 1, 0]));
    assert_scalar_eq!(mesh_measure(&mesh), 2.0, comp = abs, tol = 1e-12);
}

#[test]
fn rectangular_uniform_quad_mesh_with_zero_units_is_empty() {
    let mesh = create_rectangular_uniform_quad_mesh_2d(1.0, 0, 3, 2, &Vector2::zeros());
    assert_eq!(mesh.num_cells(), 0);
    assert_eq!(mesh.num_vertices(), 0);
}

#[test]
fn quad_mesh_split_into_triangles() {
    let quads = QuadMesh2d::from_vertices_and_connectivity(
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ],
        vec![Quad4Connectivity([0, 1, 2, 3])],
    );
    let triangles = quads.split_into_triangles();
    assert_eq!(
        triangles.connectivity(),
        &[Tri3Connectivity([0, 1, 2]), Tri3Connectivity([0, 2, 3])]
    );
    assert_scalar_eq!(mesh_measure(&triangles), 1.0, comp = abs, tol = 1e-14);
}

#[test]
fn rectangular_uniform_tri_mesh_covers_rectangle() {
    let mesh = create_rectangular_uniform_tri_mesh_2d(0.5, 3, 2, 2, &Vector2::new(0.0, 1.0));
    assert_eq!(mesh.num_cells(), 2 * 6 * 4);
    assert_scalar_eq!(mesh_measure(&mesh), 1.5, comp = abs, tol = 1e-12);
}

#[test]
fn rectangular_uniform_hex_and_tet_meshes_cover_box() {
    let origin = Vector3::new(-1.0, -0.5, -0.5);
    let hex = create_rectangular_uniform_hex_mesh(1.0, 2, 1, 1, 2, &origin);
    assert_eq!(hex.num_cells(), 4 * 2 * 2);
    assert_eq!(hex.num_vertices(), 5 * 3 * 3);
    assert_scalar_eq!(mesh_measure(&hex), 2.0, comp = abs, tol = 1e-12);

    let tet = create_rectangular_uniform_tet_mesh(1.0, 2, 1, 1, 2, &origin);
    assert_eq!(tet.num_cells(), 6 * hex.num_cells());
    assert_scalar_eq!(mesh_measure(&tet), 2.0, comp = abs, tol = 1e-12);
}

#[test]
#[should_panic]
fn mesh_with_out_of_bounds_connectivity_panics() {
    QuadMesh2d::from_vertices_and_connectivity(vec![Point2::origin(); 3], vec![Quad4Connectivity([0, 1, 2, 3])]);
}
