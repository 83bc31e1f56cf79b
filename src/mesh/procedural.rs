//! Basic procedural mesh generation routines.
use crate::connectivity::{Hex8Connectivity, Quad4Connectivity};
use crate::mesh::{HexMesh, QuadMesh2d, Tet4Mesh, TriangleMesh2d};
use nalgebra::{Point2, Point3, Vector2, Vector3};

/// Generates an axis-aligned rectangular uniform mesh given a unit length,
/// dimensions as multipliers of the unit length and the number of cells per unit length.
///
/// Vertices are laid out row by row, starting from `top_left` and moving in the positive `x`
/// and negative `y` directions.
pub fn create_rectangular_uniform_quad_mesh_2d(
    unit_length: f64,
    units_x: usize,
    units_y: usize,
    cells_per_unit: usize,
    top_left: &Vector2<f64>,
) -> QuadMesh2d {
    if cells_per_unit == 0 || units_x == 0 || units_y == 0 {
        return QuadMesh2d::from_vertices_and_connectivity(Vec::new(), Vec::new());
    }

    let cell_size = unit_length / cells_per_unit as f64;
    let num_cells_x = units_x * cells_per_unit;
    let num_cells_y = units_y * cells_per_unit;
    let num_vertices_x = num_cells_x + 1;
    let num_vertices_y = num_cells_y + 1;

    let to_global_vertex_index = |i, j| num_vertices_x * j + i;

    let mut vertices = Vec::with_capacity(num_vertices_x * num_vertices_y);
    for j in 0..num_vertices_y {
        for i in 0..num_vertices_x {
            let v = top_left + Vector2::new(i as f64, -(j as f64)) * cell_size;
            vertices.push(Point2::from(v));
        }
    }

    let mut cells = Vec::with_capacity(num_cells_x * num_cells_y);
    for j in 0..num_cells_y {
        for i in 0..num_cells_x {
            cells.push(Quad4Connectivity([
                to_global_vertex_index(i, j + 1),
                to_global_vertex_index(i + 1, j + 1),
                to_global_vertex_index(i + 1, j),
                to_global_vertex_index(i, j),
            ]));
        }
    }

    QuadMesh2d::from_vertices_and_connectivity(vertices, cells)
}

/// Same as [`create_rectangular_uniform_quad_mesh_2d`], with every quadrilateral split into
/// two triangles.
pub fn create_rectangular_uniform_tri_mesh_2d(
    unit_length: f64,
    units_x: usize,
    units_y: usize,
    cells_per_unit: usize,
    top_left: &Vector2<f64>,
) -> TriangleMesh2d {
    create_rectangular_uniform_quad_mesh_2d(unit_length, units_x, units_y, cells_per_unit, top_left)
        .split_into_triangles()
}

/// Generates an axis-aligned box of uniform hexahedra whose minimum corner is `origin`.
pub fn create_rectangular_uniform_hex_mesh(
    unit_length: f64,
    units_x: usize,
    units_y: usize,
    units_z: usize,
    cells_per_unit: usize,
    origin: &Vector3<f64>,
) -> HexMesh {
    if cells_per_unit == 0 || units_x == 0 || units_y == 0 || units_z == 0 {
        return HexMesh::from_vertices_and_connectivity(Vec::new(), Vec::new());
    }

    let cell_size = unit_length / cells_per_unit as f64;
    let num_cells_x = units_x * cells_per_unit;
    let num_cells_y = units_y * cells_per_unit;
    let num_cells_z = units_z * cells_per_unit;
    let num_vertices_x = num_cells_x + 1;
    let num_vertices_y = num_cells_y + 1;
    let num_vertices_z = num_cells_z + 1;

    let idx = |i: usize, j: usize, k: usize| (num_vertices_x * num_vertices_y) * k + num_vertices_x * j + i;

    let mut vertices = Vec::with_capacity(num_vertices_x * num_vertices_y * num_vertices_z);
    for k in 0..num_vertices_z {
        for j in 0..num_vertices_y {
            for i in 0..num_vertices_x {
                let v = origin + Vector3::new(i as f64, j as f64, k as f64) * cell_size;
                vertices.push(Point3::from(v));
            }
        }
    }

    let mut cells = Vec::with_capacity(num_cells_x * num_cells_y * num_cells_z);
    for k in 0..num_cells_z {
        for j in 0..num_cells_y {
            for i in 0..num_cells_x {
                cells.push(Hex8Connectivity([
                    idx(i, j, k),
                    idx(i + 1, j, k),
                    idx(i + 1, j + 1, k),
                    idx(i, j + 1, k),
                    idx(i, j, k + 1),
                    idx(i + 1, j, k + 1),
                    idx(i + 1, j + 1, k + 1),
                    idx(i, j + 1, k + 1),
                ]));
            }
        }
    }

    HexMesh::from_vertices_and_connectivity(vertices, cells)
}

/// Same as [`create_rectangular_uniform_hex_mesh`], with every hexahedron split into six
/// tetrahedra.
pub fn create_rectangular_uniform_tet_mesh(
    unit_length: f64,
    units_x: usize,
    units_y: usize,
    units_z: usize,
    cells_per_unit: usize,
    origin: &Vector3<f64>,
) -> Tet4Mesh {
    create_rectangular_uniform_hex_mesh(unit_length, units_x, units_y, units_z, cells_per_unit, origin)
        .split_into_tetrahedra()
}
