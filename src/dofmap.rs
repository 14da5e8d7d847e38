use crate::error::MpcError;
use crate::mesh::Mesh;
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimName, Scalar};
use serde::{Deserialize, Serialize};

/// Maps `(cell, local dof)` to a dof index in process-local storage.
///
/// Every cell has the same number of dofs. Local dof indices are interpreted through an
/// [`IndexMap`](crate::index_map::IndexMap): owned dofs first, then ghosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DofMap {
    dofs: Vec<usize>,
    dofs_per_cell: usize,
}

impl DofMap {
    /// Construct a dof map from a flat array with `dofs_per_cell` entries per cell.
    pub fn try_new(dofs: Vec<usize>, dofs_per_cell: usize) -> Result<Self, MpcError> {
        if dofs_per_cell == 0 {
            if !dofs.is_empty() {
                return Err(MpcError::MalformedDofMap(
                    "non-empty dof map with zero dofs per cell".to_string(),
                ));
            }
        } else if dofs.len() % dofs_per_cell != 0 {
            return Err(MpcError::MalformedDofMap(format!(
                "{} dofs is not a multiple of {} dofs per cell",
                dofs.len(),
                dofs_per_cell
            )));
        }
        Ok(Self { dofs, dofs_per_cell })
    }

    /// The dof map of a linear Lagrange space, in which the dofs of a cell are its vertex indices.
    ///
    /// All cells of the mesh must have the same number of vertices.
    pub fn from_mesh_vertices<T, D>(mesh: &Mesh<T, D>) -> Result<Self, MpcError>
    where
        T: Scalar,
        D: DimName,
        DefaultAllocator: Allocator<T, D>,
    {
        let dofs_per_cell = mesh.cells().first().map(|cell| cell.len()).unwrap_or(0);
        if let Some((cell, vertices)) = mesh
            .cells()
            .iter()
            .enumerate()
            .find(|(_, vertices)| vertices.len() != dofs_per_cell)
        {
            return Err(MpcError::MalformedDofMap(format!(
                "cell {cell} has {} vertices, expected {dofs_per_cell}",
                vertices.len()
            )));
        }
        let dofs = mesh.cells().iter_array_elements().copied().collect();
        Self::try_new(dofs, dofs_per_cell)
    }

    pub fn dofs_per_cell(&self) -> usize {
        self.dofs_per_cell
    }

    pub fn num_cells(&self) -> usize {
        if self.dofs_per_cell == 0 {
            0
        } else {
            self.dofs.len() / self.dofs_per_cell
        }
    }

    pub fn cell_dofs(&self, cell: usize) -> Option<&[usize]> {
        let begin = cell.checked_mul(self.dofs_per_cell)?;
        self.dofs.get(begin..begin + self.dofs_per_cell)
    }

    /// Iterate over the dofs of each cell, in cell order.
    pub fn iter(&self) -> impl '_ + Iterator<Item = &[usize]> {
        // chunks_exact does not accept a zero chunk size, in which case there are no cells anyway
        self.dofs.chunks_exact(self.dofs_per_cell.max(1))
    }

    pub fn dofs(&self) -> &[usize] {
        &self.dofs
    }
}
