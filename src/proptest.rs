use crate::constraint::ConstraintTable;
use crate::index_map::{GhostLookup, IndexMap};
use crate::mesh::procedural::create_rectangular_uniform_tri_mesh_2d;
use crate::mesh::Mesh2d;
use ::proptest::collection::vec;
use ::proptest::prelude::*;
use ::proptest::sample::select;
use nalgebra::Vector2;
use rustc_hash::FxHashSet;
use std::cmp::max;

// Returns a strategy in which each value is a triplet (cells_per_unit, units_x, units_y)
// such that cells_per_unit^2 * units_x * units_y <= max_squares
fn rectangular_uniform_mesh_cell_distribution_strategy(
    max_squares: usize,
) -> impl Strategy<Value = (usize, usize, usize)> {
    let max_cells_per_unit = f64::floor(f64::sqrt(max_squares as f64)) as usize;
    (1..=max(1, max_cells_per_unit))
        .prop_flat_map(move |cells_per_unit| {
            (Just(cells_per_unit), 0..=max_squares / (cells_per_unit * cells_per_unit))
        })
        .prop_flat_map(move |(cells_per_unit, units_x)| {
            let units_y_strategy = 0..=max_squares / (cells_per_unit * cells_per_unit * max(1, units_x));
            (Just(cells_per_unit), Just(units_x), units_y_strategy)
        })
}

/// Rectangular triangle meshes with at most `max_cells` triangles.
pub fn rectangular_uniform_tri_mesh_strategy(
    unit_length: f64,
    max_cells: usize,
) -> impl Strategy<Value = Mesh2d<f64>> {
    rectangular_uniform_mesh_cell_distribution_strategy(max_cells / 2).prop_map(
        move |(cells_per_unit, units_x, units_y)| {
            let bottom_left = Vector2::new(0.0, 0.0);
            create_rectangular_uniform_tri_mesh_2d(unit_length, units_x, units_y, cells_per_unit, &bottom_left)
        },
    )
}

/// Index maps with up to `max_owned` owned indices and up to `max_ghosts` ghosts, using either
/// ghost lookup strategy.
pub fn index_map_strategy(max_owned: usize, max_ghosts: usize) -> impl Strategy<Value = IndexMap> {
    let lookup = prop_oneof![Just(GhostLookup::Linear), Just(GhostLookup::Sorted)];
    (0..100usize, 0..=max_owned, vec(0..1000usize, 0..=max_ghosts), lookup).prop_map(
        |(lo, num_owned, candidates, lookup)| {
            let owned = lo..lo + num_owned;
            let mut seen = FxHashSet::default();
            let ghosts = candidates
                .into_iter()
                .filter(|ghost| !owned.contains(ghost) && seen.insert(*ghost))
                .collect();
            IndexMap::try_new_with_lookup(owned, ghosts, lookup).expect("Ghosts are valid by construction")
        },
    )
}

/// Constraint tables over the dofs `0 .. num_dofs`.
///
/// Each dof is a slave with probability one half. Slaves get up to `max_masters` masters drawn
/// from the non-slave dofs, so that no master is itself a slave.
pub fn constraint_table_strategy(num_dofs: usize, max_masters: usize) -> impl Strategy<Value = ConstraintTable<f64>> {
    vec(any::<bool>(), num_dofs).prop_flat_map(move |is_slave| {
        let (slaves, free): (Vec<usize>, Vec<usize>) = (0..is_slave.len()).partition(|&dof| is_slave[dof]);
        let masters_strategy = if free.is_empty() {
            Just(Vec::new()).boxed()
        } else {
            vec((select(free), -2.0..2.0), 0..=max_masters).boxed()
        };
        let num_slaves = slaves.len();
        vec(masters_strategy, num_slaves).prop_map(move |masters| {
            ConstraintTable::from_constraints(slaves.iter().copied().zip(masters))
                .expect("Slaves are unique by construction")
        })
    })
}

/// Triangle meshes with at most `max_cells` cells, together with constraints on their vertices.
pub fn constrained_tri_mesh_strategy(
    max_cells: usize,
    max_masters: usize,
) -> impl Strategy<Value = (Mesh2d<f64>, ConstraintTable<f64>)> {
    rectangular_uniform_tri_mesh_strategy(1.0, max_cells).prop_flat_map(move |mesh| {
        let num_vertices = mesh.vertices().len();
        (Just(mesh), constraint_table_strategy(num_vertices, max_masters))
    })
}
