//! Assembly of global vectors under multi-point constraints.
use crate::assembly::local::ElementVectorAssembler;
use crate::cell_slaves::CellSlave;
use crate::constraint::{ConstraintTable, MultiPointConstraint};
use crate::error::MpcError;
use crate::index_map::IndexMap;
use crate::Real;
use log::{debug, trace, warn};
use nalgebra::{DVector, DVectorSliceMut, Scalar};
use rayon::iter::{IndexedParallelIterator, IntoParallelRefMutIterator, ParallelIterator};
use std::cell::RefCell;
use std::cmp::{max, min};
use thread_local::ThreadLocal;

/// An assembler for vectors with slave dofs eliminated by multi-point constraints.
///
/// Cells are processed in ascending order. For each cell, the local vector is computed, the
/// contributions of the cell's slave dofs are redistributed to their masters, and the remaining
/// local vector is added to the output.
#[derive(Debug)]
pub struct MpcVectorAssembler<T: Scalar> {
    // All members are buffers that help prevent unnecessary allocations
    // when assembling multiple vectors with the same assembler
    workspace: RefCell<MpcAssemblerWorkspace<T>>,
}

impl<T: Scalar> Default for MpcVectorAssembler<T> {
    fn default() -> Self {
        Self {
            workspace: RefCell::new(MpcAssemblerWorkspace::default()),
        }
    }
}

#[derive(Debug, Clone)]
struct MpcAssemblerWorkspace<T: Scalar> {
    element_dofs: Vec<usize>,
    element_vector: Vec<T>,
    // Unmodified copy of the local vector, taken before slave entries are zeroed
    element_vector_snapshot: Vec<T>,
}

impl<T: Scalar> Default for MpcAssemblerWorkspace<T> {
    fn default() -> Self {
        Self {
            element_dofs: Vec::new(),
            element_vector: Vec::new(),
            element_vector_snapshot: Vec::new(),
        }
    }
}

impl<T: Real> MpcVectorAssembler<T> {
    /// Assemble a new vector of length `index_map.local_size()`.
    pub fn assemble_vector(
        &self,
        element_assembler: &dyn ElementVectorAssembler<T>,
        mpc: &MultiPointConstraint<T>,
        index_map: &IndexMap,
    ) -> eyre::Result<DVector<T>> {
        let mut output = DVector::zeros(index_map.local_size());
        self.assemble_into(&mut output, element_assembler, mpc, index_map)?;
        Ok(output)
    }

    /// Add the constrained contributions of all cells to `output`.
    ///
    /// `output` is local storage as described by `index_map`. It is not zeroed, and contributions
    /// to ghost slots are left for the caller to send to their owners.
    ///
    /// # Errors
    ///
    /// Fails on the first cell that produces an error. The output is then in an unspecified,
    /// partially assembled state and must not be used.
    pub fn assemble_into<'a>(
        &self,
        output: impl Into<DVectorSliceMut<'a, T>>,
        element_assembler: &dyn ElementVectorAssembler<T>,
        mpc: &MultiPointConstraint<T>,
        index_map: &IndexMap,
    ) -> eyre::Result<()> {
        let mut output: DVectorSliceMut<T> = output.into();
        check_output_size(output.len(), index_map)?;
        let output = output.as_mut_slice();

        debug!(
            "Assembling constrained vector over {} cells ({} with slaves)",
            element_assembler.num_elements(),
            mpc.cell_slaves().num_cells()
        );

        // Reuse previously allocated buffers
        let ws = &mut *self.workspace.borrow_mut();
        for cell in 0..element_assembler.num_elements() {
            assemble_cell_into(output, ws, cell, element_assembler, mpc, index_map)?;
        }

        Ok(())
    }
}

/// A parallel assembler for vectors with slave dofs eliminated by multi-point constraints.
///
/// The cells are split into contiguous chunks of a fixed size. Each chunk is assembled into its
/// own buffer, and the buffers are added to the output in chunk order. The result therefore only
/// depends on the chunk size, not on the number of threads, but may differ from the serial
/// assembler in the last bits due to floating-point summation order.
///
/// Chunks are processed in batches of `rayon::current_num_threads()` chunks, and each batch is
/// added to the output before the next one starts. At most that many buffers of length
/// `index_map.local_size()` are alive at any time.
#[derive(Debug)]
pub struct MpcParAssembler<T: Scalar + Send> {
    workspace: ThreadLocal<RefCell<MpcAssemblerWorkspace<T>>>,
    chunk_size: usize,
}

impl<T: Scalar + Send> Default for MpcParAssembler<T> {
    fn default() -> Self {
        Self {
            workspace: Default::default(),
            chunk_size: 1024,
        }
    }
}

impl<T: Scalar + Send> MpcParAssembler<T> {
    /// Use chunks of the given number of cells. A chunk size of zero is treated as one.
    ///
    /// Every chunk is added to the output as a full-length buffer, so small chunks make the
    /// reduction dominate the cost of assembly.
    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        Self {
            chunk_size: max(chunk_size, 1),
            ..self
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl<T: Real> MpcParAssembler<T> {
    pub fn assemble_vector(
        &self,
        element_assembler: &(dyn Sync + ElementVectorAssembler<T>),
        mpc: &MultiPointConstraint<T>,
        index_map: &IndexMap,
    ) -> eyre::Result<DVector<T>> {
        let mut output = DVector::zeros(index_map.local_size());
        self.assemble_into(&mut output, element_assembler, mpc, index_map)?;
        Ok(output)
    }

    /// Add the constrained contributions of all cells to `output`.
    ///
    /// See [`MpcVectorAssembler::assemble_into`].
    pub fn assemble_into<'a>(
        &self,
        output: impl Into<DVectorSliceMut<'a, T>>,
        element_assembler: &(dyn Sync + ElementVectorAssembler<T>),
        mpc: &MultiPointConstraint<T>,
        index_map: &IndexMap,
    ) -> eyre::Result<()> {
        let mut output: DVectorSliceMut<T> = output.into();
        check_output_size(output.len(), index_map)?;
        let output = output.as_mut_slice();

        let num_cells = element_assembler.num_elements();
        let chunk_size = self.chunk_size;
        let num_chunks = (num_cells + chunk_size - 1) / chunk_size;
        let local_size = index_map.local_size();

        debug!(
            "Assembling constrained vector over {} cells ({} with slaves) in {} chunks",
            num_cells,
            mpc.cell_slaves().num_cells(),
            num_chunks
        );

        let batch_size = min(max(rayon::current_num_threads(), 1), max(num_chunks, 1));
        let mut partial_outputs = vec![vec![T::zero(); local_size]; batch_size];

        for batch_begin in (0..num_chunks).step_by(batch_size) {
            let batch_len = min(batch_size, num_chunks - batch_begin);
            partial_outputs[..batch_len]
                .par_iter_mut()
                .enumerate()
                .try_for_each(|(i, partial_output)| -> eyre::Result<()> {
                    let ws = &mut *self.workspace.get_or_default().borrow_mut();
                    partial_output.fill(T::zero());
                    let begin = (batch_begin + i) * chunk_size;
                    let end = min(begin + chunk_size, num_cells);
                    for cell in begin..end {
                        assemble_cell_into(partial_output, ws, cell, element_assembler, mpc, index_map)?;
                    }
                    Ok(())
                })?;

            // Sequential reduction in chunk order
            for partial_output in &partial_outputs[..batch_len] {
                for (out, &partial) in output.iter_mut().zip(partial_output) {
                    *out += partial;
                }
            }
        }

        Ok(())
    }
}

fn check_output_size(len: usize, index_map: &IndexMap) -> Result<(), MpcError> {
    if len != index_map.local_size() {
        return Err(MpcError::OutputSizeMismatch {
            expected: index_map.local_size(),
            actual: len,
        });
    }
    Ok(())
}

fn assemble_cell_into<T, Assembler>(
    output: &mut [T],
    ws: &mut MpcAssemblerWorkspace<T>,
    cell: usize,
    element_assembler: &Assembler,
    mpc: &MultiPointConstraint<T>,
    index_map: &IndexMap,
) -> eyre::Result<()>
where
    T: Real,
    Assembler: ?Sized + ElementVectorAssembler<T>,
{
    let dof_count = element_assembler.element_dof_count(cell);
    ws.element_dofs.resize(dof_count, usize::MAX);
    element_assembler.populate_element_dofs(&mut ws.element_dofs, cell);
    if let Some(&dof) = ws.element_dofs.iter().find(|&&dof| dof >= output.len()) {
        return Err(MpcError::DofOutOfBounds {
            cell,
            dof,
            local_size: output.len(),
        }
        .into());
    }

    ws.element_vector.clear();
    ws.element_vector.resize(dof_count, T::zero());
    let element_vector = DVectorSliceMut::from_slice(&mut ws.element_vector, dof_count);
    element_assembler.assemble_element_vector_into(cell, element_vector)?;

    if let Some(cell_slaves) = mpc.cell_slaves().cell_slaves(cell) {
        trace!("Redistributing {} slave(s) of cell {}", cell_slaves.len(), cell);
        check_cell_slaves_match_dofs(cell, cell_slaves, &ws.element_dofs, mpc.table(), index_map)?;
        ws.element_vector_snapshot.clear();
        ws.element_vector_snapshot
            .extend_from_slice(&ws.element_vector);
        redistribute_cell_slaves(
            output,
            &mut ws.element_vector,
            &ws.element_vector_snapshot,
            cell,
            cell_slaves,
            mpc.table(),
            index_map,
        )?;
    }

    scatter_local_to_global(output, &ws.element_vector, &ws.element_dofs);
    Ok(())
}

/// Check that every slave listed for `cell` is the global index of its local dof.
fn check_cell_slaves_match_dofs<T>(
    cell: usize,
    cell_slaves: &[CellSlave],
    element_dofs: &[usize],
    table: &ConstraintTable<T>,
    index_map: &IndexMap,
) -> Result<(), MpcError> {
    for cell_slave in cell_slaves {
        let slave = *table
            .slaves()
            .get(cell_slave.slave_position)
            .ok_or_else(|| {
                MpcError::MalformedCellSlaveIndex(format!(
                    "cell {cell} refers to slave position {}, which does not exist",
                    cell_slave.slave_position
                ))
            })?;
        let global = element_dofs
            .get(cell_slave.local_dof)
            .and_then(|&dof| index_map.local_to_global(dof));
        if global != Some(slave) {
            return Err(MpcError::SlaveNotInCell { slave, cell });
        }
    }
    Ok(())
}

/// Redistribute the contributions of a cell's slave dofs to their masters.
///
/// For every slave of the cell, and every `(master, c)` pair of that slave in table order,
/// `c * snapshot[local_dof]` is added to the master's slot in `output`. Pairs in which the
/// master is the slave itself are skipped with a warning. Once at least one pair has been
/// applied, the slave's entry in `local` is zeroed, so that scattering `local` does not also add
/// the redirected contribution to the slave itself. A slave with no applicable pair keeps its
/// contribution.
///
/// `snapshot` must be a copy of `local` as computed by the element kernel.
///
/// # Errors
///
/// - [`MpcError::UnresolvedIndex`] if a master is neither owned nor a ghost.
/// - [`MpcError::MalformedCellSlaveIndex`] if a slave refers to a local dof or table entry that
///   does not exist.
/// - [`MpcError::OutputSizeMismatch`] if a resolved slot is out of bounds for `output`.
pub fn redistribute_cell_slaves<T: Real>(
    output: &mut [T],
    local: &mut [T],
    snapshot: &[T],
    cell: usize,
    cell_slaves: &[CellSlave],
    table: &ConstraintTable<T>,
    index_map: &IndexMap,
) -> Result<(), MpcError> {
    for cell_slave in cell_slaves {
        let CellSlave {
            local_dof,
            slave_position,
        } = *cell_slave;
        let malformed = || {
            MpcError::MalformedCellSlaveIndex(format!(
                "cell {cell} refers to local dof {local_dof} and slave position {slave_position}, \
                 which do not exist"
            ))
        };
        let slave = *table.slaves().get(slave_position).ok_or_else(malformed)?;
        let masters = table.masters(slave_position).ok_or_else(malformed)?;
        let slave_value = *snapshot.get(local_dof).ok_or_else(malformed)?;

        let mut redistributed = false;
        for (master, coefficient) in masters {
            if master == slave {
                warn!("Skipping self-referential constraint of slave {slave} in cell {cell}");
                continue;
            }
            let slot = index_map.global_to_local(master)?;
            let len = output.len();
            let target = output
                .get_mut(slot)
                .ok_or(MpcError::OutputSizeMismatch {
                    expected: index_map.local_size(),
                    actual: len,
                })?;
            *target += coefficient * slave_value;
            redistributed = true;
        }

        if redistributed {
            *local.get_mut(local_dof).ok_or_else(malformed)? = T::zero();
        }
    }
    Ok(())
}

/// Add a local vector to the global vector at the given local storage indices.
///
/// # Panics
///
/// Panics if `local` and `indices` have different lengths, or if an index is out of bounds.
pub fn scatter_local_to_global<T: Real>(output: &mut [T], local: &[T], indices: &[usize]) {
    assert_eq!(local.len(), indices.len(), "Local vector and indices must have the same length");
    for (&value, &index) in local.iter().zip(indices) {
        output[index] += value;
    }
}
