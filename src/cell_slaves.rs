//! Lookup of the constrained (slave) dofs present in each cell.
use crate::constraint::ConstraintTable;
use crate::dofmap::DofMap;
use crate::error::MpcError;
use crate::index_map::IndexMap;
use fenris_nested_vec::NestedVec;
use log::debug;
use serde::{Deserialize, Serialize};

/// A slave dof as seen from a particular cell.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellSlave {
    /// Position of the dof within the cell's local ordering.
    pub local_dof: usize,
    /// Position of the slave in the [`ConstraintTable`].
    pub slave_position: usize,
}

/// The cells that contain at least one slave dof, and which slaves they contain.
///
/// Cells are stored in ascending order. For each cell, the slaves are stored in the order
/// they appear in the constraint table, with their local position in the cell resolved up front
/// so that assembly never has to search the cell's dofs. A slave that occupies several local
/// positions of a cell has one entry per position, ordered by position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CellSlaveIndexParts")]
pub struct CellSlaveIndex {
    cells: Vec<usize>,
    slaves: NestedVec<CellSlave>,
}

/// Unvalidated serialized form of [`CellSlaveIndex`].
#[derive(Deserialize)]
struct CellSlaveIndexParts {
    cells: Vec<usize>,
    slaves: NestedVec<CellSlave>,
}

impl TryFrom<CellSlaveIndexParts> for CellSlaveIndex {
    type Error = MpcError;

    fn try_from(parts: CellSlaveIndexParts) -> Result<Self, Self::Error> {
        let CellSlaveIndexParts { cells, slaves } = parts;
        if cells.len() != slaves.len() {
            return Err(MpcError::MalformedCellSlaveIndex(format!(
                "{} cells but {} slave lists",
                cells.len(),
                slaves.len()
            )));
        }
        check_strictly_ascending(&cells)?;
        Ok(Self { cells, slaves })
    }
}

fn check_strictly_ascending(cells: &[usize]) -> Result<(), MpcError> {
    if let Some(window) = cells.windows(2).find(|w| w[0] >= w[1]) {
        return Err(MpcError::MalformedCellSlaveIndex(format!(
            "cells must be strictly ascending, but {} is followed by {}",
            window[0], window[1]
        )));
    }
    Ok(())
}

impl CellSlaveIndex {
    /// Build the index from caller-supplied CSR arrays.
    ///
    /// `slave_cells` lists the cells containing slaves in strictly ascending order. The global
    /// indices of the slaves in `slave_cells[i]` are `cell_to_slave[offsets[i] .. offsets[i + 1]]`.
    ///
    /// # Errors
    ///
    /// - [`MpcError::MalformedCellSlaveIndex`] for malformed CSR arrays, cells out of order or
    ///   out of range of the dof map, and slaves repeated within a cell.
    /// - [`MpcError::UnknownSlave`] if a listed slave is not in the constraint table.
    /// - [`MpcError::SlaveNotInCell`] if no dof of the cell maps to the listed slave.
    pub fn try_from_csr<T>(
        slave_cells: Vec<usize>,
        cell_to_slave: Vec<usize>,
        offsets: Vec<usize>,
        dofmap: &DofMap,
        index_map: &IndexMap,
        constraints: &ConstraintTable<T>,
    ) -> Result<Self, MpcError> {
        if offsets.len() != slave_cells.len() + 1 {
            return Err(MpcError::MalformedCellSlaveIndex(format!(
                "expected {} offsets for {} cells, got {}",
                slave_cells.len() + 1,
                slave_cells.len(),
                offsets.len()
            )));
        }
        check_strictly_ascending(&slave_cells)?;
        let global_slaves =
            NestedVec::try_from_offsets_and_data(offsets, cell_to_slave).map_err(MpcError::cell_slave_offsets)?;

        let mut slaves = NestedVec::new();
        for (&cell, cell_global_slaves) in slave_cells.iter().zip(global_slaves.iter()) {
            let cell_dofs = dofmap.cell_dofs(cell).ok_or_else(|| {
                MpcError::MalformedCellSlaveIndex(format!(
                    "cell {cell} is out of range for a dof map with {} cells",
                    dofmap.num_cells()
                ))
            })?;

            let mut resolved = Vec::with_capacity(cell_global_slaves.len());
            for &slave in cell_global_slaves {
                let slave_position = constraints
                    .slave_position(slave)
                    .ok_or(MpcError::UnknownSlave { slave })?;
                let num_resolved = resolved.len();
                resolved.extend(
                    local_dofs_of(cell_dofs, index_map, slave).map(|local_dof| CellSlave {
                        local_dof,
                        slave_position,
                    }),
                );
                if resolved.len() == num_resolved {
                    return Err(MpcError::SlaveNotInCell { slave, cell });
                }
            }

            // Process slaves in table order regardless of the order they were listed in
            resolved.sort_unstable_by_key(|s| (s.slave_position, s.local_dof));
            if let Some(window) = resolved.windows(2).find(|w| w[0] == w[1]) {
                return Err(MpcError::MalformedCellSlaveIndex(format!(
                    "slave {} is listed more than once for cell {cell}",
                    constraints.slaves()[window[0].slave_position]
                )));
            }
            slaves.push(&resolved);
        }

        Ok(Self {
            cells: slave_cells,
            slaves,
        })
    }

    /// Build the index by scanning the dofs of every cell in the dof map.
    ///
    /// # Errors
    ///
    /// Returns [`MpcError::DofOutOfBounds`] if a cell references a dof outside local storage.
    pub fn compute<T>(
        dofmap: &DofMap,
        index_map: &IndexMap,
        constraints: &ConstraintTable<T>,
    ) -> Result<Self, MpcError> {
        let mut cells = Vec::new();
        let mut slaves = NestedVec::new();
        let mut cell_slaves = Vec::new();

        if !constraints.is_empty() {
            for (cell, cell_dofs) in dofmap.iter().enumerate() {
                cell_slaves.clear();
                for (local_dof, &dof) in cell_dofs.iter().enumerate() {
                    let global = index_map
                        .local_to_global(dof)
                        .ok_or(MpcError::DofOutOfBounds {
                            cell,
                            dof,
                            local_size: index_map.local_size(),
                        })?;
                    if let Some(slave_position) = constraints.slave_position(global) {
                        cell_slaves.push(CellSlave {
                            local_dof,
                            slave_position,
                        });
                    }
                }

                if !cell_slaves.is_empty() {
                    // Stable sort keeps repeated occurrences of a slave in local order
                    cell_slaves.sort_by_key(|s| s.slave_position);
                    cells.push(cell);
                    slaves.push(&cell_slaves);
                }
            }
        }

        debug!(
            "Computed cell-to-slave index: {} of {} cells contain slaves",
            cells.len(),
            dofmap.num_cells()
        );

        Ok(Self { cells, slaves })
    }

    /// The slaves contained in `cell`, or `None` if the cell contains no slaves.
    pub fn cell_slaves(&self, cell: usize) -> Option<&[CellSlave]> {
        let idx = self.cells.binary_search(&cell).ok()?;
        self.slaves.get(idx)
    }

    /// The cells that contain slaves, in ascending order.
    pub fn cells(&self) -> &[usize] {
        &self.cells
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = (usize, &[CellSlave])> {
        self.cells.iter().copied().zip(self.slaves.iter())
    }
}

fn local_dofs_of<'a>(
    cell_dofs: &'a [usize],
    index_map: &'a IndexMap,
    global: usize,
) -> impl 'a + Iterator<Item = usize> {
    cell_dofs
        .iter()
        .enumerate()
        .filter(move |&(_, &dof)| index_map.local_to_global(dof) == Some(global))
        .map(|(local_dof, _)| local_dof)
}
