//! Evaluation of local (per-cell) vectors.
use crate::dofmap::DofMap;
use crate::error::MpcError;
use crate::kernel::{CellPermutation, ElementKernel};
use crate::mesh::Mesh;
use crate::workspace::{with_thread_local_workspace, Workspace};
use crate::Real;
use eyre::WrapErr;
use nalgebra::allocator::Allocator;
use nalgebra::{DVectorSliceMut, DefaultAllocator, DimName, OPoint, Scalar};
use std::cell::RefCell;

pub trait ElementDofAssembler {
    fn num_elements(&self) -> usize;

    fn element_dof_count(&self, element_index: usize) -> usize;

    /// Write the local storage indices of the element's dofs into `output`.
    ///
    /// `output` must have length [`element_dof_count`](Self::element_dof_count).
    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize);
}

pub trait ElementVectorAssembler<T: Scalar>: ElementDofAssembler {
    /// Compute the local vector of the element into `output`, which is zeroed beforehand.
    fn assemble_element_vector_into(&self, element_index: usize, output: DVectorSliceMut<T>) -> eyre::Result<()>;
}

impl ElementDofAssembler for DofMap {
    fn num_elements(&self) -> usize {
        self.num_cells()
    }

    fn element_dof_count(&self, _element_index: usize) -> usize {
        self.dofs_per_cell()
    }

    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize) {
        let dofs = self
            .cell_dofs(element_index)
            .expect("Element index must be in bounds");
        output.copy_from_slice(dofs);
    }
}

thread_local! { static KERNEL_WORKSPACE: RefCell<Workspace> = RefCell::new(Workspace::default()) }

/// Evaluates an [`ElementKernel`] on the cells of a mesh.
///
/// For every cell, the coordinates of its vertices are gathered from the mesh and passed to the
/// kernel together with the cell's coefficients, the global constants and the cell's
/// permutation info.
pub struct ElementKernelAssembler<'a, T, D, Kernel>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    mesh: &'a Mesh<T, D>,
    dofmap: &'a DofMap,
    kernel: &'a Kernel,
    coefficients: &'a [T],
    coefficients_per_cell: usize,
    constants: &'a [T],
    permutations: Option<&'a [CellPermutation]>,
}

impl<'a, T, D, Kernel> ElementKernelAssembler<'a, T, D, Kernel>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    pub fn mesh(&self) -> &'a Mesh<T, D> {
        self.mesh
    }

    pub fn dofmap(&self) -> &'a DofMap {
        self.dofmap
    }

    pub fn kernel(&self) -> &'a Kernel {
        self.kernel
    }

    /// The coefficients passed to the kernel for the given cell.
    pub fn cell_coefficients(&self, cell: usize) -> &'a [T] {
        let begin = cell * self.coefficients_per_cell;
        &self.coefficients[begin..begin + self.coefficients_per_cell]
    }

    pub fn cell_permutation(&self, cell: usize) -> CellPermutation {
        self.permutations
            .map(|permutations| permutations[cell])
            .unwrap_or_default()
    }
}

impl<'a, T, D, Kernel> ElementDofAssembler for ElementKernelAssembler<'a, T, D, Kernel>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    fn num_elements(&self) -> usize {
        self.dofmap.num_elements()
    }

    fn element_dof_count(&self, element_index: usize) -> usize {
        self.dofmap.element_dof_count(element_index)
    }

    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize) {
        self.dofmap.populate_element_dofs(output, element_index)
    }
}

impl<'a, T, D, Kernel> ElementVectorAssembler<T> for ElementKernelAssembler<'a, T, D, Kernel>
where
    T: Real,
    D: DimName,
    Kernel: ElementKernel<T, D>,
    DefaultAllocator: Allocator<T, D>,
{
    fn assemble_element_vector_into(&self, element_index: usize, mut output: DVectorSliceMut<T>) -> eyre::Result<()> {
        with_thread_local_workspace(&KERNEL_WORKSPACE, |geometry: &mut Vec<OPoint<T, D>>| -> eyre::Result<()> {
            geometry.resize(self.kernel.num_geometry_nodes(), OPoint::origin());
            self.mesh.populate_cell_vertices(geometry, element_index)?;

            output.fill(T::zero());
            self.kernel
                .tabulate(
                    output.as_mut_slice(),
                    self.cell_coefficients(element_index),
                    self.constants,
                    geometry,
                    &self.cell_permutation(element_index),
                )
                .wrap_err_with(|| format!("Element kernel failed on cell {element_index}"))
        })
    }
}

/// Builder for [`ElementKernelAssembler`].
///
/// The mesh, dof map and kernel are required. Coefficients, constants and permutations are
/// optional and default to empty arrays and zero permutations.
pub struct ElementKernelAssemblerBuilder<'a, T, MeshRef, DofMapRef, KernelRef> {
    mesh: MeshRef,
    dofmap: DofMapRef,
    kernel: KernelRef,
    coefficients: &'a [T],
    coefficients_per_cell: usize,
    constants: &'a [T],
    permutations: Option<&'a [CellPermutation]>,
}

impl<'a, T> ElementKernelAssemblerBuilder<'a, T, (), (), ()> {
    pub fn new() -> Self {
        Self {
            mesh: (),
            dofmap: (),
            kernel: (),
            coefficients: &[],
            coefficients_per_cell: 0,
            constants: &[],
            permutations: None,
        }
    }
}

impl<'a, T> Default for ElementKernelAssemblerBuilder<'a, T, (), (), ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T, MeshRef, DofMapRef, KernelRef> ElementKernelAssemblerBuilder<'a, T, MeshRef, DofMapRef, KernelRef> {
    pub fn with_mesh<D>(
        self,
        mesh: &'a Mesh<T, D>,
    ) -> ElementKernelAssemblerBuilder<'a, T, &'a Mesh<T, D>, DofMapRef, KernelRef>
    where
        T: Scalar,
        D: DimName,
        DefaultAllocator: Allocator<T, D>,
    {
        ElementKernelAssemblerBuilder {
            mesh,
            dofmap: self.dofmap,
            kernel: self.kernel,
            coefficients: self.coefficients,
            coefficients_per_cell: self.coefficients_per_cell,
            constants: self.constants,
            permutations: self.permutations,
        }
    }

    pub fn with_dofmap(
        self,
        dofmap: &'a DofMap,
    ) -> ElementKernelAssemblerBuilder<'a, T, MeshRef, &'a DofMap, KernelRef> {
        ElementKernelAssemblerBuilder {
            mesh: self.mesh,
            dofmap,
            kernel: self.kernel,
            coefficients: self.coefficients,
            coefficients_per_cell: self.coefficients_per_cell,
            constants: self.constants,
            permutations: self.permutations,
        }
    }

    pub fn with_kernel<Kernel>(
        self,
        kernel: &'a Kernel,
    ) -> ElementKernelAssemblerBuilder<'a, T, MeshRef, DofMapRef, &'a Kernel> {
        ElementKernelAssemblerBuilder {
            mesh: self.mesh,
            dofmap: self.dofmap,
            kernel,
            coefficients: self.coefficients,
            coefficients_per_cell: self.coefficients_per_cell,
            constants: self.constants,
            permutations: self.permutations,
        }
    }

    /// Per-cell coefficients, stored contiguously with `per_cell` values for each cell.
    pub fn with_coefficients(self, coefficients: &'a [T], per_cell: usize) -> Self {
        Self {
            coefficients,
            coefficients_per_cell: per_cell,
            ..self
        }
    }

    pub fn with_constants(self, constants: &'a [T]) -> Self {
        Self { constants, ..self }
    }

    /// One permutation per cell.
    pub fn with_cell_permutations(self, permutations: &'a [CellPermutation]) -> Self {
        Self {
            permutations: Some(permutations),
            ..self
        }
    }
}

impl<'a, T, D, Kernel> ElementKernelAssemblerBuilder<'a, T, &'a Mesh<T, D>, &'a DofMap, &'a Kernel>
where
    T: Scalar,
    D: DimName,
    Kernel: ElementKernel<T, D>,
    DefaultAllocator: Allocator<T, D>,
{
    /// Check the inputs for consistency and build the assembler.
    ///
    /// # Errors
    ///
    /// - [`MpcError::MalformedDofMap`] if the dof map does not have one row per mesh cell, or its
    ///   row length does not match the kernel's local vector length.
    /// - [`MpcError::MalformedCellData`] if coefficients or permutations are not sized per cell.
    pub fn build(self) -> Result<ElementKernelAssembler<'a, T, D, Kernel>, MpcError> {
        let num_cells = self.mesh.num_cells();
        if self.dofmap.num_cells() != num_cells {
            return Err(MpcError::MalformedDofMap(format!(
                "dof map has {} cells, but the mesh has {num_cells}",
                self.dofmap.num_cells()
            )));
        }
        // An empty dof map cannot know its row length
        if num_cells > 0 && self.dofmap.dofs_per_cell() != self.kernel.num_dofs() {
            return Err(MpcError::MalformedDofMap(format!(
                "dof map has {} dofs per cell, but the kernel produces {} values",
                self.dofmap.dofs_per_cell(),
                self.kernel.num_dofs()
            )));
        }
        if self.coefficients.len() != self.coefficients_per_cell * num_cells {
            return Err(MpcError::MalformedCellData(format!(
                "{} coefficients do not match {} per cell for {num_cells} cells",
                self.coefficients.len(),
                self.coefficients_per_cell
            )));
        }
        if let Some(permutations) = self.permutations {
            if permutations.len() != num_cells {
                return Err(MpcError::MalformedCellData(format!(
                    "{} cell permutations for {num_cells} cells",
                    permutations.len()
                )));
            }
        }

        Ok(ElementKernelAssembler {
            mesh: self.mesh,
            dofmap: self.dofmap,
            kernel: self.kernel,
            coefficients: self.coefficients,
            coefficients_per_cell: self.coefficients_per_cell,
            constants: self.constants,
            permutations: self.permutations,
        })
    }
}
