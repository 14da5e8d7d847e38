use fenris_mpc::assembly::global::{
    redistribute_cell_slaves, scatter_local_to_global, MpcParAssembler, MpcVectorAssembler,
};
use fenris_mpc::assembly::local::{ElementDofAssembler, ElementVectorAssembler};
use fenris_mpc::cell_slaves::{CellSlave, CellSlaveIndex};
use fenris_mpc::constraint::{ConstraintTable, MultiPointConstraint};
use fenris_mpc::dofmap::DofMap;
use fenris_mpc::error::MpcError;
use fenris_mpc::index_map::IndexMap;
use matrixcompare::assert_matrix_eq;
use nalgebra::{DVector, DVectorSliceMut};

/// Element assembler that returns prescribed element vectors.
struct MockElementAssembler {
    dofmap: DofMap,
    element_vectors: Vec<Vec<f64>>,
}

impl ElementDofAssembler for MockElementAssembler {
    fn num_elements(&self) -> usize {
        self.dofmap.num_cells()
    }

    fn element_dof_count(&self, element_index: usize) -> usize {
        self.dofmap.element_dof_count(element_index)
    }

    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize) {
        self.dofmap.populate_element_dofs(output, element_index)
    }
}

impl ElementVectorAssembler<f64> for MockElementAssembler {
    fn assemble_element_vector_into(&self, element_index: usize, mut output: DVectorSliceMut<f64>) -> eyre::Result<()> {
        output.copy_from_slice(&self.element_vectors[element_index]);
        Ok(())
    }
}

fn constrain(
    dofmap: &DofMap,
    index_map: &IndexMap,
    constraints: Vec<(usize, Vec<(usize, f64)>)>,
) -> MultiPointConstraint<f64> {
    let table = ConstraintTable::from_constraints(constraints).unwrap();
    let cell_slaves = CellSlaveIndex::compute(dofmap, index_map, &table).unwrap();
    MultiPointConstraint::try_from_table_and_cell_slaves(table, cell_slaves).unwrap()
}

#[test]
fn single_cell_slave_is_redistributed_to_master() {
    let assembler = MockElementAssembler {
        dofmap: DofMap::try_new(vec![0, 1, 2], 3).unwrap(),
        element_vectors: vec![vec![1.0, 2.0, 3.0]],
    };
    let index_map = IndexMap::serial(3);
    let mpc = constrain(&assembler.dofmap, &index_map, vec![(2, vec![(0, 0.25)])]);

    let f = MpcVectorAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap();
    let expected = DVector::from_column_slice(&[1.75, 2.0, 0.0]);
    assert_matrix_eq!(f, expected, comp = float);
}

#[test]
fn slave_with_multiple_masters() {
    let assembler = MockElementAssembler {
        dofmap: DofMap::try_new(vec![3, 0, 1], 3).unwrap(),
        element_vectors: vec![vec![4.0, 1.0, 1.0]],
    };
    let index_map = IndexMap::serial(4);
    let mpc = constrain(&assembler.dofmap, &index_map, vec![(3, vec![(0, 0.5), (1, 0.25), (2, -1.0)])]);

    let f = MpcVectorAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap();
    let expected = DVector::from_column_slice(&[3.0, 2.0, -4.0, 0.0]);
    assert_matrix_eq!(f, expected, comp = float);
}

#[test]
fn master_in_another_cell_only_receives_redirected_contribution() {
    // Cell 0 contains slave 1, whose master 3 only appears in cell 1
    let assembler = MockElementAssembler {
        dofmap: DofMap::try_new(vec![0, 1, 2, 3], 2).unwrap(),
        element_vectors: vec![vec![1.0, 2.0], vec![10.0, 20.0]],
    };
    let index_map = IndexMap::serial(4);
    let mpc = constrain(&assembler.dofmap, &index_map, vec![(1, vec![(3, 2.0)])]);

    let f = MpcVectorAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap();
    let expected = DVector::from_column_slice(&[1.0, 0.0, 10.0, 24.0]);
    assert_matrix_eq!(f, expected, comp = float);
}

#[test]
fn self_referential_master_is_skipped() {
    let assembler = MockElementAssembler {
        dofmap: DofMap::try_new(vec![0, 1, 2], 3).unwrap(),
        element_vectors: vec![vec![1.0, 2.0, 3.0]],
    };
    let index_map = IndexMap::serial(3);
    let mpc = constrain(&assembler.dofmap, &index_map, vec![(2, vec![(2, 1.0), (1, 1.0)])]);

    let f = MpcVectorAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap();
    let expected = DVector::from_column_slice(&[1.0, 5.0, 0.0]);
    assert_matrix_eq!(f, expected, comp = float);

    // A slave whose only master is itself keeps its contribution
    let mpc = constrain(&assembler.dofmap, &index_map, vec![(2, vec![(2, 1.0)])]);
    let f = MpcVectorAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap();
    let expected = DVector::from_column_slice(&[1.0, 2.0, 3.0]);
    assert_matrix_eq!(f, expected, comp = float);
}

#[test]
fn slave_without_masters_keeps_its_contribution() {
    let assembler = MockElementAssembler {
        dofmap: DofMap::try_new(vec![0, 1, 2], 3).unwrap(),
        element_vectors: vec![vec![1.0, 2.0, 3.0]],
    };
    let index_map = IndexMap::serial(3);
    let mpc = constrain(&assembler.dofmap, &index_map, vec![(0, vec![])]);

    let f = MpcVectorAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap();
    let expected = DVector::from_column_slice(&[1.0, 2.0, 3.0]);
    assert_matrix_eq!(f, expected, comp = float);
}

#[test]
fn repeated_slave_dof_is_redistributed_per_occurrence() {
    // The cell references dof 2 at local positions 0 and 2
    let assembler = MockElementAssembler {
        dofmap: DofMap::try_new(vec![2, 0, 2], 3).unwrap(),
        element_vectors: vec![vec![1.0, 2.0, 3.0]],
    };
    let index_map = IndexMap::serial(3);
    let mpc = constrain(&assembler.dofmap, &index_map, vec![(2, vec![(0, 0.5)])]);
    assert_eq!(mpc.cell_slaves().cell_slaves(0).unwrap().len(), 2);

    let f = MpcVectorAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap();
    let expected = DVector::from_column_slice(&[4.0, 0.0, 0.0]);
    assert_matrix_eq!(f, expected, comp = float);

    let f_par = MpcParAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap();
    assert_matrix_eq!(f_par, expected, comp = float);
}

#[test]
fn cell_slave_index_built_for_another_table_is_an_error() {
    let assembler = MockElementAssembler {
        dofmap: DofMap::try_new(vec![0, 1, 2], 3).unwrap(),
        element_vectors: vec![vec![1.0, 2.0, 3.0]],
    };
    let index_map = IndexMap::serial(3);
    let table_for_slave_2 = ConstraintTable::from_constraints(vec![(2, vec![(0, 0.5)])]).unwrap();
    let cell_slaves = CellSlaveIndex::compute(&assembler.dofmap, &index_map, &table_for_slave_2).unwrap();

    // Same slave position, but a different slave
    let table = ConstraintTable::from_constraints(vec![(1, vec![(0, 0.5)])]).unwrap();
    let mpc = MultiPointConstraint::try_from_table_and_cell_slaves(table, cell_slaves.clone()).unwrap();
    let expected_err = MpcError::SlaveNotInCell { slave: 1, cell: 0 };
    let err = MpcVectorAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap_err();
    assert_eq!(err.downcast_ref::<MpcError>(), Some(&expected_err));
    let err = MpcParAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap_err();
    assert_eq!(err.downcast_ref::<MpcError>(), Some(&expected_err));

    // Slave position out of range of the table
    let two_slaves = ConstraintTable::from_constraints(vec![(1, vec![(0, 1.0)]), (2, vec![(0, 1.0)])]).unwrap();
    let cell_slaves = CellSlaveIndex::compute(&assembler.dofmap, &index_map, &two_slaves).unwrap();
    let one_slave = ConstraintTable::from_constraints(vec![(1, vec![(0, 1.0)])]).unwrap();
    assert!(matches!(
        MultiPointConstraint::try_from_table_and_cell_slaves(one_slave, cell_slaves),
        Err(MpcError::MalformedCellSlaveIndex(_))
    ));
}

#[test]
fn assemble_into_accumulates() {
    let assembler = MockElementAssembler {
        dofmap: DofMap::try_new(vec![0, 1, 2], 3).unwrap(),
        element_vectors: vec![vec![1.0, 2.0, 3.0]],
    };
    let index_map = IndexMap::serial(3);
    let mpc = constrain(&assembler.dofmap, &index_map, vec![(2, vec![(0, 0.25)])]);

    let mut f = DVector::repeat(3, 1.0);
    MpcVectorAssembler::default()
        .assemble_into(&mut f, &assembler, &mpc, &index_map)
        .unwrap();
    let expected = DVector::from_column_slice(&[2.75, 3.0, 1.0]);
    assert_matrix_eq!(f, expected, comp = float);
}

#[test]
fn unconstrained_assembly_is_plain_scatter() {
    let assembler = MockElementAssembler {
        dofmap: DofMap::try_new(vec![0, 1, 2, 1, 3, 2], 3).unwrap(),
        element_vectors: vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
    };
    let index_map = IndexMap::serial(4);
    let mpc = constrain(&assembler.dofmap, &index_map, vec![]);

    let f = MpcVectorAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap();
    let expected = DVector::from_column_slice(&[1.0, 6.0, 9.0, 5.0]);
    assert_matrix_eq!(f, expected, comp = float);
}

#[test]
fn unresolved_master_is_an_error() {
    let assembler = MockElementAssembler {
        dofmap: DofMap::try_new(vec![0, 1, 2], 3).unwrap(),
        element_vectors: vec![vec![1.0, 2.0, 3.0]],
    };
    let index_map = IndexMap::try_new(0..3, vec![]).unwrap();
    let mpc = constrain(&assembler.dofmap, &index_map, vec![(2, vec![(50, 1.0)])]);

    let err = MpcVectorAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap_err();
    assert_eq!(err.downcast_ref::<MpcError>(), Some(&MpcError::UnresolvedIndex { global: 50 }));

    let err = MpcParAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap_err();
    assert_eq!(err.downcast_ref::<MpcError>(), Some(&MpcError::UnresolvedIndex { global: 50 }));
}

#[test]
fn output_size_mismatch_is_an_error() {
    let assembler = MockElementAssembler {
        dofmap: DofMap::try_new(vec![0, 1, 2], 3).unwrap(),
        element_vectors: vec![vec![1.0, 2.0, 3.0]],
    };
    let index_map = IndexMap::serial(3);
    let mpc = constrain(&assembler.dofmap, &index_map, vec![]);

    let mut f = DVector::zeros(4);
    let err = MpcVectorAssembler::default()
        .assemble_into(&mut f, &assembler, &mpc, &index_map)
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<MpcError>(),
        Some(&MpcError::OutputSizeMismatch { expected: 3, actual: 4 })
    );

    let err = MpcParAssembler::default()
        .assemble_into(&mut f, &assembler, &mpc, &index_map)
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<MpcError>(),
        Some(&MpcError::OutputSizeMismatch { expected: 3, actual: 4 })
    );
}

#[test]
fn dof_out_of_bounds_is_an_error() {
    let assembler = MockElementAssembler {
        dofmap: DofMap::try_new(vec![0, 1, 2, 1, 7, 2], 3).unwrap(),
        element_vectors: vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
    };
    let index_map = IndexMap::serial(4);
    let mpc =
        MultiPointConstraint::try_from_table_and_cell_slaves(ConstraintTable::default(), CellSlaveIndex::default())
            .unwrap();

    let err = MpcVectorAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<MpcError>(),
        Some(&MpcError::DofOutOfBounds {
            cell: 1,
            dof: 7,
            local_size: 4
        })
    );
}

#[test]
fn parallel_assembly_matches_serial_assembly() {
    let num_cells = 10;
    let dofs: Vec<usize> = (0..num_cells).flat_map(|cell| [cell, cell + 1]).collect();
    let element_vectors = (0..num_cells)
        .map(|cell| vec![cell as f64 + 1.0, 0.5 * cell as f64])
        .collect();
    let assembler = MockElementAssembler {
        dofmap: DofMap::try_new(dofs, 2).unwrap(),
        element_vectors,
    };
    let index_map = IndexMap::serial(num_cells + 1);
    let mpc = constrain(
        &assembler.dofmap,
        &index_map,
        vec![(3, vec![(0, 0.5), (10, 0.5)]), (7, vec![(6, 1.0)])],
    );

    let f_serial = MpcVectorAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap();
    for chunk_size in [1, 2, 3, 7, 10, 20] {
        let par_assembler = MpcParAssembler::default().with_chunk_size(chunk_size);
        let f_par = par_assembler
            .assemble_vector(&assembler, &mpc, &index_map)
            .unwrap();
        assert_matrix_eq!(f_par, f_serial, comp = abs, tol = 1e-12);

        // Reproducible for a fixed chunk size
        let f_par_again = par_assembler
            .assemble_vector(&assembler, &mpc, &index_map)
            .unwrap();
        assert_eq!(f_par, f_par_again);
    }
}

#[test]
fn chunk_size_is_at_least_one() {
    let assembler = MpcParAssembler::<f64>::default().with_chunk_size(0);
    assert_eq!(assembler.chunk_size(), 1);
    assert!(MpcParAssembler::<f64>::default().chunk_size() >= 1);
}

#[test]
fn redistribute_cell_slaves_directly() {
    let table = ConstraintTable::from_constraints(vec![(5, vec![(0, 2.0), (4, 1.0)])]).unwrap();
    let index_map = IndexMap::try_new(0..3, vec![4, 5]).unwrap();
    let mut output = vec![0.0; 5];
    let snapshot = vec![1.0, 3.0];
    let mut local = snapshot.clone();
    let cell_slaves = [CellSlave {
        local_dof: 1,
        slave_position: 0,
    }];

    redistribute_cell_slaves(&mut output, &mut local, &snapshot, 0, &cell_slaves, &table, &index_map).unwrap();
    // Master 4 is the ghost at slot 3
    assert_eq!(output, vec![6.0, 0.0, 0.0, 3.0, 0.0]);
    assert_eq!(local, vec![1.0, 0.0]);

    let bad_slaves = [CellSlave {
        local_dof: 2,
        slave_position: 0,
    }];
    assert!(matches!(
        redistribute_cell_slaves(&mut output, &mut local, &snapshot, 0, &bad_slaves, &table, &index_map),
        Err(MpcError::MalformedCellSlaveIndex(_))
    ));
}

#[test]
fn scatter_local_to_global_adds_repeated_indices() {
    let mut output = vec![1.0; 3];
    scatter_local_to_global(&mut output, &[1.0, 2.0, 3.0], &[2, 0, 2]);
    assert_eq!(output, vec![3.0, 1.0, 5.0]);
}

#[test]
#[should_panic]
fn scatter_local_to_global_panics_on_length_mismatch() {
    let mut output = vec![0.0; 3];
    scatter_local_to_global(&mut output, &[1.0, 2.0], &[0]);
}

#[test]
fn master_at_lower_end_of_owned_range_is_owned() {
    // Rank owns globals 10..14, stored in local slots 0..4
    let assembler = MockElementAssembler {
        dofmap: DofMap::try_new(vec![1, 2, 3], 3).unwrap(),
        element_vectors: vec![vec![1.0, 2.0, 4.0]],
    };
    let index_map = IndexMap::try_new(10..14, vec![]).unwrap();
    let mpc = constrain(&assembler.dofmap, &index_map, vec![(13, vec![(10, 0.5)])]);

    let f = MpcVectorAssembler::default()
        .assemble_vector(&assembler, &mpc, &index_map)
        .unwrap();
    let expected = DVector::from_column_slice(&[2.0, 1.0, 2.0, 0.0]);
    assert_matrix_eq!(f, expected, comp = float);
}
