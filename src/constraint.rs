//! Storage for linear multi-point constraints.
use crate::cell_slaves::CellSlaveIndex;
use crate::error::MpcError;
use fenris_nested_vec::NestedVec;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::iter::Zip;
use std::slice;

/// An immutable table of slave dofs and the masters they are redistributed to.
///
/// Slave `i` (in the order of [`slaves`](Self::slaves)) is constrained as
/// `u_slave = sum_k c_k u_{master_k}` for its pairs `(master_k, c_k)`. All indices are
/// *global* dof indices. Chains of masters are expected to be flattened already, i.e. no master
/// is itself a slave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "ConstraintTableParts<T>",
    bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>")
)]
pub struct ConstraintTable<T> {
    slaves: Vec<usize>,
    masters: NestedVec<usize>,
    // Aligned with the flat data of `masters`
    coefficients: Vec<T>,
    #[serde(skip)]
    slave_positions: FxHashMap<usize, usize>,
}

/// Unvalidated serialized form of [`ConstraintTable`].
#[derive(Deserialize)]
struct ConstraintTableParts<T> {
    slaves: Vec<usize>,
    masters: NestedVec<usize>,
    coefficients: Vec<T>,
}

impl<T> TryFrom<ConstraintTableParts<T>> for ConstraintTable<T> {
    type Error = MpcError;

    fn try_from(parts: ConstraintTableParts<T>) -> Result<Self, Self::Error> {
        let (offsets, masters) = parts.masters.into_offsets_and_data();
        Self::try_from_csr(parts.slaves, masters, parts.coefficients, offsets)
    }
}

impl<T> Default for ConstraintTable<T> {
    fn default() -> Self {
        Self {
            slaves: Vec::new(),
            masters: NestedVec::new(),
            coefficients: Vec::new(),
            slave_positions: FxHashMap::default(),
        }
    }
}

impl<T> ConstraintTable<T> {
    /// Construct a constraint table from raw CSR arrays.
    ///
    /// The masters and coefficients of slave `i` are found in the half-open range
    /// `offsets[i] .. offsets[i + 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`MpcError::MalformedConstraintTable`] if `offsets` does not have
    /// `slaves.len() + 1` entries, is not non-decreasing, its last entry does not match the
    /// number of masters, the masters and coefficients differ in length, or a slave appears twice.
    pub fn try_from_csr(
        slaves: Vec<usize>,
        masters: Vec<usize>,
        coefficients: Vec<T>,
        offsets: Vec<usize>,
    ) -> Result<Self, MpcError> {
        if offsets.len() != slaves.len() + 1 {
            return Err(MpcError::MalformedConstraintTable(format!(
                "expected {} offsets for {} slaves, got {}",
                slaves.len() + 1,
                slaves.len(),
                offsets.len()
            )));
        }
        if masters.len() != coefficients.len() {
            return Err(MpcError::MalformedConstraintTable(format!(
                "{} masters but {} coefficients",
                masters.len(),
                coefficients.len()
            )));
        }
        let masters = NestedVec::try_from_offsets_and_data(offsets, masters).map_err(MpcError::constraint_offsets)?;

        let mut slave_positions = FxHashMap::default();
        for (position, &slave) in slaves.iter().enumerate() {
            if slave_positions.insert(slave, position).is_some() {
                return Err(MpcError::MalformedConstraintTable(format!(
                    "slave {slave} appears more than once"
                )));
            }
        }

        Ok(Self {
            slaves,
            masters,
            coefficients,
            slave_positions,
        })
    }

    /// Construct a constraint table from `(slave, [(master, coefficient)])` entries, kept in the
    /// given order.
    pub fn from_constraints<I, M>(constraints: I) -> Result<Self, MpcError>
    where
        I: IntoIterator<Item = (usize, M)>,
        M: IntoIterator<Item = (usize, T)>,
    {
        let mut slaves = Vec::new();
        let mut masters = Vec::new();
        let mut coefficients = Vec::new();
        let mut offsets = vec![0];
        for (slave, slave_masters) in constraints {
            slaves.push(slave);
            for (master, coefficient) in slave_masters {
                masters.push(master);
                coefficients.push(coefficient);
            }
            offsets.push(masters.len());
        }
        Self::try_from_csr(slaves, masters, coefficients, offsets)
    }

    /// Global indices of all slaves, in table order.
    pub fn slaves(&self) -> &[usize] {
        &self.slaves
    }

    pub fn num_slaves(&self) -> usize {
        self.slaves.len()
    }

    /// Total number of (master, coefficient) pairs over all slaves.
    pub fn num_masters(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }

    pub fn offsets(&self) -> &[usize] {
        self.masters.offsets()
    }

    /// Position of the given global slave index in the table.
    pub fn slave_position(&self, slave: usize) -> Option<usize> {
        self.slave_positions.get(&slave).copied()
    }

    /// The masters of the slave at `slave_position`, paired with their coefficients.
    pub fn masters(&self, slave_position: usize) -> Option<ConstraintMasters<'_, T>> {
        let range = self.masters.range(slave_position)?;
        let masters = self.masters.get(slave_position)?;
        let coefficients = self.coefficients.get(range)?;
        Some(ConstraintMasters {
            inner: masters.iter().zip(coefficients),
        })
    }

    /// Iterate over `(slave, masters)` for all slaves in table order.
    pub fn iter(&self) -> impl '_ + Iterator<Item = (usize, ConstraintMasters<'_, T>)> {
        self.slaves.iter().enumerate().map(move |(position, &slave)| {
            let masters = self
                .masters(position)
                .expect("Offsets are validated on construction");
            (slave, masters)
        })
    }
}

/// Iterator over the `(master, coefficient)` pairs of a single slave.
#[derive(Debug, Clone)]
pub struct ConstraintMasters<'a, T> {
    inner: Zip<slice::Iter<'a, usize>, slice::Iter<'a, T>>,
}

impl<'a, T: Copy> Iterator for ConstraintMasters<'a, T> {
    type Item = (usize, T);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(&master, &coefficient)| (master, coefficient))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, T: Copy> ExactSizeIterator for ConstraintMasters<'a, T> {}

/// A constraint table together with the cells its slaves appear in.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiPointConstraint<T> {
    table: ConstraintTable<T>,
    cell_slaves: CellSlaveIndex,
}

impl<T> MultiPointConstraint<T> {
    /// Combine a constraint table with a cell-to-slave index built for it.
    ///
    /// # Errors
    ///
    /// Returns [`MpcError::MalformedCellSlaveIndex`] if the index refers to a slave position
    /// that does not exist in the table. Whether each listed local dof actually maps to its
    /// slave depends on the dof map, and is checked during assembly.
    pub fn try_from_table_and_cell_slaves(
        table: ConstraintTable<T>,
        cell_slaves: CellSlaveIndex,
    ) -> Result<Self, MpcError> {
        for (cell, slaves) in cell_slaves.iter() {
            if let Some(s) = slaves
                .iter()
                .find(|s| s.slave_position >= table.num_slaves())
            {
                return Err(MpcError::MalformedCellSlaveIndex(format!(
                    "cell {cell} refers to slave position {}, but the table has {} slaves",
                    s.slave_position,
                    table.num_slaves()
                )));
            }
        }
        Ok(Self { table, cell_slaves })
    }

    pub fn table(&self) -> &ConstraintTable<T> {
        &self.table
    }

    pub fn cell_slaves(&self) -> &CellSlaveIndex {
        &self.cell_slaves
    }
}
