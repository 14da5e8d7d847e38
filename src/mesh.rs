use crate::error::MpcError;
use fenris_nested_vec::NestedVec;
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimName, OPoint, Scalar, U2, U3};
use serde::{Deserialize, Serialize};

pub mod procedural;

/// Index-based mesh with cells of arbitrary arity.
///
/// Cells are stored in compressed form: the vertex indices of all cells are stored contiguously,
/// delimited by an offsets array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub struct Mesh<T: Scalar, D>
where
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    // serde's not able correctly determine the necessary trait bounds in this case,
    // so write our own
    #[serde(bound(
        serialize = "<DefaultAllocator as Allocator<T, D>>::Buffer: Serialize",
        deserialize = "<DefaultAllocator as Allocator<T, D>>::Buffer: Deserialize<'de>"
    ))]
    vertices: Vec<OPoint<T, D>>,
    cells: NestedVec<usize>,
}

pub type Mesh2d<T> = Mesh<T, U2>;
pub type Mesh3d<T> = Mesh<T, U3>;

impl<T, D> Mesh<T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    /// Construct a mesh from vertices and cells.
    ///
    /// # Errors
    ///
    /// Returns [`MpcError::MalformedMesh`] if a cell references a vertex out of bounds.
    pub fn try_from_vertices_and_cells(vertices: Vec<OPoint<T, D>>, cells: NestedVec<usize>) -> Result<Self, MpcError> {
        let num_vertices = vertices.len();
        for (cell_index, cell) in cells.iter().enumerate() {
            if let Some(vertex) = cell.iter().find(|&&v| v >= num_vertices) {
                return Err(MpcError::MalformedMesh(format!(
                    "cell {cell_index} references vertex {vertex}, but the mesh has {num_vertices} vertices"
                )));
            }
        }
        Ok(Self { vertices, cells })
    }

    /// Construct a mesh from vertices and the raw CSR arrays of cell connectivity.
    ///
    /// The vertices of cell `i` are `connectivity[offsets[i] .. offsets[i + 1]]`.
    pub fn try_from_vertices_and_csr(
        vertices: Vec<OPoint<T, D>>,
        connectivity: Vec<usize>,
        offsets: Vec<usize>,
    ) -> Result<Self, MpcError> {
        let cells = NestedVec::try_from_offsets_and_data(offsets, connectivity).map_err(MpcError::mesh_offsets)?;
        Self::try_from_vertices_and_cells(vertices, cells)
    }

    pub fn vertices(&self) -> &[OPoint<T, D>] {
        &self.vertices
    }

    pub fn cells(&self) -> &NestedVec<usize> {
        &self.cells
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cell_vertices(&self, cell: usize) -> Option<&[usize]> {
        self.cells.get(cell)
    }

    /// Gather the coordinates of the vertices of `cell` into `output`.
    ///
    /// # Errors
    ///
    /// Returns [`MpcError::GeometryArityMismatch`] if `output` does not have exactly one entry
    /// per vertex of the cell, and [`MpcError::MalformedMesh`] if the cell does not exist.
    pub fn populate_cell_vertices(&self, output: &mut [OPoint<T, D>], cell: usize) -> Result<(), MpcError> {
        let cell_vertices = self.cell_vertices(cell).ok_or_else(|| {
            MpcError::MalformedMesh(format!("cell {cell} out of bounds for mesh with {} cells", self.num_cells()))
        })?;
        if cell_vertices.len() != output.len() {
            return Err(MpcError::GeometryArityMismatch {
                cell,
                expected: output.len(),
                actual: cell_vertices.len(),
            });
        }
        for (x, &v) in output.iter_mut().zip(cell_vertices) {
            // Vertex indices are validated on construction
            x.clone_from(&self.vertices[v]);
        }
        Ok(())
    }
}
