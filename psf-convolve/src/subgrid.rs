//! Masked convolution at supersampled resolution
//!
//! For each active coarse pixel the fine-resolution convolution is evaluated
//! at each of its `f × f` fine pixels and the values are summed into the
//! coarse cell, which matches the block sum of [`crate::resample::downsample`].

use ndarray::{Array2, ArrayView2};

use crate::config::ExecutionOptions;
use crate::direct::{convolve_at, SourceGate};
use crate::error::{ConvolutionError, Result};
use crate::kernel::validate_kernel;
use crate::masked::{check_compute_mask, ActivePixels};

/// Subgrid convolver bound to one fine kernel, factor and pair of masks.
#[derive(Debug, Clone)]
pub struct SubgridConvolver {
    kernel: Array2<f64>,
    factor: usize,
    active: ActivePixels,
    compute_mask: Option<Array2<bool>>,
    execution: ExecutionOptions,
}

impl SubgridConvolver {
    /// Bind a fine cropped kernel to coarse active and compute masks.
    ///
    /// # Errors
    /// Configuration error for a zero factor or a kernel that is not square,
    /// odd, finite and non-negative; shape mismatch when the compute mask
    /// does not match the active mask.
    pub fn new(
        kernel: Array2<f64>,
        factor: usize,
        active_mask: ArrayView2<bool>,
        compute_mask: Option<ArrayView2<bool>>,
        execution: ExecutionOptions,
    ) -> Result<Self> {
        if factor == 0 {
            return Err(ConvolutionError::configuration(
                "supersampling factor must be at least 1",
            ));
        }
        validate_kernel(kernel.view())?;
        check_compute_mask(compute_mask, active_mask.dim())?;
        Ok(Self {
            kernel,
            factor,
            active: ActivePixels::from_mask(active_mask),
            compute_mask: compute_mask.map(|m| m.to_owned()),
            execution,
        })
    }

    /// Fine kernel applied inside active blocks.
    pub fn kernel(&self) -> ArrayView2<'_, f64> {
        self.kernel.view()
    }

    /// Active coarse pixels.
    pub fn active(&self) -> &ActivePixels {
        &self.active
    }

    /// Fine image shape this convolver accepts.
    pub fn fine_shape(&self) -> (usize, usize) {
        let (rows, cols) = self.active.shape();
        (rows * self.factor, cols * self.factor)
    }

    /// Convolve a fine image inside the active blocks and block-sum to coarse.
    ///
    /// # Errors
    /// Shape mismatch when `image_fine` is not the fine counterpart of the mask grid.
    pub fn convolve(&self, image_fine: ArrayView2<f64>) -> Result<Array2<f64>> {
        if image_fine.dim() != self.fine_shape() {
            return Err(ConvolutionError::shape_mismatch(
                "fine image",
                self.fine_shape(),
                image_fine.dim(),
            ));
        }

        let f = self.factor;
        let kernel = self.kernel.view();
        let gate = SourceGate::new(self.compute_mask.as_ref().map(|m| m.view()), f);
        Ok(self.active.fill(&self.execution, |ci, cj| {
            let mut block = 0.0;
            for p in ci * f..(ci + 1) * f {
                for q in cj * f..(cj + 1) * f {
                    block += convolve_at(&image_fine, &kernel, p, q, &gate);
                }
            }
            block
        }))
    }
}

/// One-shot subgrid convolution.
pub fn convolve_subgrid(
    image_fine: ArrayView2<f64>,
    kernel_fine_cropped: ArrayView2<f64>,
    active_mask: ArrayView2<bool>,
    factor: usize,
    compute_mask: Option<ArrayView2<bool>>,
) -> Result<Array2<f64>> {
    SubgridConvolver::new(
        kernel_fine_cropped.to_owned(),
        factor,
        active_mask,
        compute_mask,
        ExecutionOptions::sequential(),
    )?
    .convolve(image_fine)
}
