//! Error types for constrained assembly.
use fenris_nested_vec::OffsetsError;
use thiserror::Error;

/// Errors produced while validating inputs to, or running, constrained assembly.
///
/// Every variant is fatal for the assembly call that produced it: the output vector must be
/// considered unusable. Self-referential constraints are not errors; they are skipped
/// with a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MpcError {
    #[error("malformed constraint table: {0}")]
    MalformedConstraintTable(String),
    #[error("malformed cell-to-slave index: {0}")]
    MalformedCellSlaveIndex(String),
    #[error("malformed dof map: {0}")]
    MalformedDofMap(String),
    #[error("malformed per-cell data: {0}")]
    MalformedCellData(String),
    #[error("malformed mesh: {0}")]
    MalformedMesh(String),
    #[error("invalid index map: {0}")]
    InvalidIndexMap(String),
    #[error("global index {global} is neither owned nor a ghost on this rank")]
    UnresolvedIndex { global: usize },
    #[error("slave {slave} is not present in the constraint table")]
    UnknownSlave { slave: usize },
    #[error("slave {slave} is listed for cell {cell}, but none of the cell's dofs maps to it")]
    SlaveNotInCell { slave: usize, cell: usize },
    #[error("dof {dof} of cell {cell} is out of bounds for local storage of size {local_size}")]
    DofOutOfBounds { cell: usize, dof: usize, local_size: usize },
    #[error("output has length {actual}, but the index map requires {expected}")]
    OutputSizeMismatch { expected: usize, actual: usize },
    #[error("cell {cell} has {actual} vertices, but the kernel expects {expected}")]
    GeometryArityMismatch { cell: usize, expected: usize, actual: usize },
}

impl MpcError {
    pub(crate) fn constraint_offsets(err: OffsetsError) -> Self {
        Self::MalformedConstraintTable(err.to_string())
    }

    pub(crate) fn cell_slave_offsets(err: OffsetsError) -> Self {
        Self::MalformedCellSlaveIndex(err.to_string())
    }

    pub(crate) fn mesh_offsets(err: OffsetsError) -> Self {
        Self::MalformedMesh(err.to_string())
    }
}
