//! Basic procedural mesh generation routines.
use crate::mesh::Mesh2d;
use crate::Real;
use fenris_nested_vec::NestedVec;
use nalgebra::{Point2, Vector2};

pub fn create_unit_square_uniform_tri_mesh_2d<T>(cells_per_dim: usize) -> Mesh2d<T>
where
    T: Real,
{
    create_rectangular_uniform_tri_mesh_2d(T::one(), 1, 1, cells_per_dim, &Vector2::zeros())
}

/// Generates an axis-aligned rectangular uniform triangle mesh given a unit length,
/// dimensions as multipliers of the unit length and the number of cells per unit length.
///
/// Each square cell is split into two counter-clockwise triangles along its diagonal from the
/// bottom-left to the top-right corner. Vertices are numbered row by row starting from
/// `bottom_left`.
pub fn create_rectangular_uniform_tri_mesh_2d<T>(
    unit_length: T,
    units_x: usize,
    units_y: usize,
    cells_per_unit: usize,
    bottom_left: &Vector2<T>,
) -> Mesh2d<T>
where
    T: Real,
{
    let mut vertices = Vec::new();
    let mut cells = NestedVec::new();

    if cells_per_unit > 0 && units_x > 0 && units_y > 0 {
        let cell_size = unit_length / T::from_usize(cells_per_unit).expect("Must be able to fit usize in T");
        let num_cells_x = units_x * cells_per_unit;
        let num_cells_y = units_y * cells_per_unit;

        let to_global_vertex_index = |i, j| (num_cells_x + 1) * j + i;

        for j in 0..=num_cells_y {
            for i in 0..=num_cells_x {
                let i_as_t = T::from_usize(i).expect("Must be able to fit usize in T");
                let j_as_t = T::from_usize(j).expect("Must be able to fit usize in T");
                let v = bottom_left + Vector2::new(i_as_t, j_as_t) * cell_size;
                vertices.push(Point2::from(v));
            }
        }

        for j in 0..num_cells_y {
            for i in 0..num_cells_x {
                let v00 = to_global_vertex_index(i, j);
                let v10 = to_global_vertex_index(i + 1, j);
                let v11 = to_global_vertex_index(i + 1, j + 1);
                let v01 = to_global_vertex_index(i, j + 1);
                cells.push(&[v00, v10, v11]);
                cells.push(&[v00, v11, v01]);
            }
        }
    }

    Mesh2d::try_from_vertices_and_cells(vertices, cells).expect("Generated connectivity is always in bounds")
}
