//! Finite element vector assembly under linear multi-point constraints.
//!
//! Degrees of freedom designated as *slaves* do not receive contributions of their own. Instead,
//! their cell-local contributions are redistributed, weighted by constraint coefficients, to
//! *master* dofs that may be owned by the calling rank or be ghosts owned by another rank.
//!
//! The main entry points are [`assembly::global::MpcVectorAssembler`] and its parallel
//! counterpart [`assembly::global::MpcParAssembler`], which consume
//!
//! - an [`ElementVectorAssembler`](assembly::local::ElementVectorAssembler) producing local
//!   vectors, typically an [`ElementKernelAssembler`](assembly::local::ElementKernelAssembler)
//!   evaluating an [`ElementKernel`](kernel::ElementKernel) on a [`Mesh`](mesh::Mesh),
//! - a [`MultiPointConstraint`](constraint::MultiPointConstraint), and
//! - an [`IndexMap`](index_map::IndexMap) describing the owned range and ghosts of the rank.
use nalgebra::RealField;

pub mod assembly;
pub mod cell_slaves;
pub mod constraint;
pub mod dofmap;
pub mod error;
pub mod index_map;
pub mod kernel;
pub mod mesh;

pub(crate) mod workspace;

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate fenris_nested_vec as nested_vec;
pub extern crate nalgebra;

/// Real scalar types supported by the assemblers.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}
