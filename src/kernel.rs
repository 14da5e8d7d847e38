//! Element kernels: the per-cell numerical routines that produce local vectors.
use crate::Real;
use eyre::eyre;
use nalgebra::allocator::Allocator;
use nalgebra::{DefaultAllocator, DimName, Matrix2, OPoint, Scalar, U2};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

/// Permutation encodings describing how a cell and its facets are oriented relative to their
/// reference configuration.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellPermutation {
    pub facet: i32,
    pub cell: i32,
}

impl CellPermutation {
    pub fn new(facet: i32, cell: i32) -> Self {
        Self { facet, cell }
    }
}

/// A routine that computes the local vector of a single cell.
///
/// The kernel must be deterministic and must not have side effects beyond writing to `output`.
/// Its numerical output is not validated.
pub trait ElementKernel<T, D>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    /// The length of the local vector, i.e. the number of dofs per cell.
    fn num_dofs(&self) -> usize;

    /// The number of cell vertices the kernel expects in its geometry input.
    fn num_geometry_nodes(&self) -> usize;

    /// Compute the local vector of a cell into `output`.
    ///
    /// `output` has length [`num_dofs`](Self::num_dofs) and is zeroed before the call.
    /// `geometry` holds the coordinates of the cell vertices.
    fn tabulate(
        &self,
        output: &mut [T],
        coefficients: &[T],
        constants: &[T],
        geometry: &[OPoint<T, D>],
        permutation: &CellPermutation,
    ) -> eyre::Result<()>;
}

impl<'a, T, D, K> ElementKernel<T, D> for &'a K
where
    T: Scalar,
    D: DimName,
    K: ?Sized + ElementKernel<T, D>,
    DefaultAllocator: Allocator<T, D>,
{
    fn num_dofs(&self) -> usize {
        K::num_dofs(self)
    }

    fn num_geometry_nodes(&self) -> usize {
        K::num_geometry_nodes(self)
    }

    fn tabulate(
        &self,
        output: &mut [T],
        coefficients: &[T],
        constants: &[T],
        geometry: &[OPoint<T, D>],
        permutation: &CellPermutation,
    ) -> eyre::Result<()> {
        K::tabulate(self, output, coefficients, constants, geometry, permutation)
    }
}

/// A kernel defined by a closure.
#[derive(Debug, Clone)]
pub struct FnKernel<F> {
    num_dofs: usize,
    num_geometry_nodes: usize,
    function: F,
}

impl<F> FnKernel<F> {
    pub fn new(num_dofs: usize, num_geometry_nodes: usize, function: F) -> Self {
        Self {
            num_dofs,
            num_geometry_nodes,
            function,
        }
    }
}

impl<T, D, F> ElementKernel<T, D> for FnKernel<F>
where
    T: Scalar,
    D: DimName,
    F: Fn(&mut [T], &[T], &[T], &[OPoint<T, D>], &CellPermutation) -> eyre::Result<()>,
    DefaultAllocator: Allocator<T, D>,
{
    fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    fn num_geometry_nodes(&self) -> usize {
        self.num_geometry_nodes
    }

    fn tabulate(
        &self,
        output: &mut [T],
        coefficients: &[T],
        constants: &[T],
        geometry: &[OPoint<T, D>],
        permutation: &CellPermutation,
    ) -> eyre::Result<()> {
        (self.function)(output, coefficients, constants, geometry, permutation)
    }
}

/// A kernel that writes the same local vector for every cell, regardless of geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantKernel<T> {
    values: Vec<T>,
    num_geometry_nodes: usize,
}

impl<T> ConstantKernel<T> {
    pub fn new(values: Vec<T>, num_geometry_nodes: usize) -> Self {
        Self {
            values,
            num_geometry_nodes,
        }
    }
}

impl<T, D> ElementKernel<T, D> for ConstantKernel<T>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn num_dofs(&self) -> usize {
        self.values.len()
    }

    fn num_geometry_nodes(&self) -> usize {
        self.num_geometry_nodes
    }

    fn tabulate(
        &self,
        output: &mut [T],
        _coefficients: &[T],
        _constants: &[T],
        _geometry: &[OPoint<T, D>],
        _permutation: &CellPermutation,
    ) -> eyre::Result<()> {
        output.clone_from_slice(&self.values);
        Ok(())
    }
}

/// The load vector of a constant source term on linear (3-node) triangles.
///
/// Each vertex receives `f |K| / 3`, where `|K|` is the triangle area and
/// `f = constants[0] * coefficients[0]`. Missing constants or coefficients are taken as one.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct LinearTriangleSourceKernel;

impl<T> ElementKernel<T, U2> for LinearTriangleSourceKernel
where
    T: Real,
{
    fn num_dofs(&self) -> usize {
        3
    }

    fn num_geometry_nodes(&self) -> usize {
        3
    }

    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    fn tabulate(
        &self,
        output: &mut [T],
        coefficients: &[T],
        constants: &[T],
        geometry: &[OPoint<T, U2>],
        _permutation: &CellPermutation,
    ) -> eyre::Result<()> {
        let [x0, x1, x2] = match geometry {
            [x0, x1, x2] => [x0, x1, x2],
            _ => return Err(eyre!("expected 3 triangle vertices, got {}", geometry.len())),
        };
        if output.len() != 3 {
            return Err(eyre!("expected local vector of length 3, got {}", output.len()));
        }

        let jacobian = Matrix2::from_columns(&[x1 - x0, x2 - x0]);
        let area = 0.5 * jacobian.determinant().abs();
        let f = constants.first().copied().unwrap_or(1.0) * coefficients.first().copied().unwrap_or(1.0);

        for value in output.iter_mut() {
            *value = f * area / 3.0;
        }
        Ok(())
    }
}
