//! Direct convolution restricted to a set of active output pixels
//!
//! The cost scales with the number of active pixels times the kernel
//! footprint and does not depend on the image size. Output pixels outside
//! the active mask are zero.

use ndarray::{Array2, ArrayView2, Zip};
use rayon::prelude::*;

use crate::config::{ExecutionOptions, LoopStrategy};
use crate::direct::{convolve_at, SourceGate};
use crate::error::{ConvolutionError, Result};
use crate::kernel::validate_kernel;

/// Active output coordinates, precomputed once from a boolean mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePixels {
    mask: Array2<bool>,
    coords: Vec<(usize, usize)>,
}

impl ActivePixels {
    /// Collect the `true` entries of `mask` in row-major order.
    pub fn from_mask(mask: ArrayView2<bool>) -> Self {
        let coords = mask
            .indexed_iter()
            .filter_map(|(idx, &active)| active.then_some(idx))
            .collect();
        Self {
            mask: mask.to_owned(),
            coords,
        }
    }

    /// Grid shape of the mask.
    pub fn shape(&self) -> (usize, usize) {
        self.mask.dim()
    }

    /// Number of active pixels.
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    /// True when no pixel is active.
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Active coordinates in row-major order.
    pub fn coords(&self) -> &[(usize, usize)] {
        &self.coords
    }

    /// Mask the coordinates were collected from.
    pub fn mask(&self) -> ArrayView2<'_, bool> {
        self.mask.view()
    }

    /// Evaluate `value` at every active pixel; all other pixels are zero.
    ///
    /// Each output cell is written by exactly one evaluation, so the result
    /// does not depend on the execution options.
    pub(crate) fn fill<F>(&self, execution: &ExecutionOptions, value: F) -> Array2<f64>
    where
        F: Fn(usize, usize) -> f64 + Sync + Send,
    {
        let mut output = Array2::zeros(self.shape());

        match execution.loop_strategy {
            LoopStrategy::ActiveList => {
                let values: Vec<f64> = if execution.parallel {
                    self.coords.par_iter().map(|&(i, j)| value(i, j)).collect()
                } else {
                    self.coords.iter().map(|&(i, j)| value(i, j)).collect()
                };
                for (&(i, j), v) in self.coords.iter().zip(values) {
                    output[[i, j]] = v;
                }
            }
            LoopStrategy::MaskScan => {
                let zip = Zip::indexed(&mut output).and(&self.mask);
                if execution.parallel {
                    zip.par_for_each(|(i, j), out, &active| {
                        if active {
                            *out = value(i, j);
                        }
                    });
                } else {
                    zip.for_each(|(i, j), out, &active| {
                        if active {
                            *out = value(i, j);
                        }
                    });
                }
            }
        }

        output
    }
}

/// Check that an optional compute mask matches the active grid.
pub(crate) fn check_compute_mask(
    compute_mask: Option<ArrayView2<bool>>,
    shape: (usize, usize),
) -> Result<()> {
    match compute_mask {
        Some(mask) if mask.dim() != shape => Err(ConvolutionError::shape_mismatch(
            "compute mask",
            shape,
            mask.dim(),
        )),
        _ => Ok(()),
    }
}

/// Masked direct convolver bound to one kernel and one pair of masks.
#[derive(Debug, Clone)]
pub struct MaskedConvolver {
    kernel: Array2<f64>,
    active: ActivePixels,
    compute_mask: Option<Array2<bool>>,
    execution: ExecutionOptions,
}

impl MaskedConvolver {
    /// Bind a cropped kernel to the active and compute masks.
    ///
    /// # Errors
    /// Configuration error when the kernel is not square, odd, finite and
    /// non-negative; shape mismatch when the compute mask does not match the
    /// active mask.
    pub fn new(
        kernel: Array2<f64>,
        active_mask: ArrayView2<bool>,
        compute_mask: Option<ArrayView2<bool>>,
        execution: ExecutionOptions,
    ) -> Result<Self> {
        validate_kernel(kernel.view())?;
        check_compute_mask(compute_mask, active_mask.dim())?;
        Ok(Self {
            kernel,
            active: ActivePixels::from_mask(active_mask),
            compute_mask: compute_mask.map(|m| m.to_owned()),
            execution,
        })
    }

    /// Kernel applied at active pixels.
    pub fn kernel(&self) -> ArrayView2<'_, f64> {
        self.kernel.view()
    }

    /// Active output pixels.
    pub fn active(&self) -> &ActivePixels {
        &self.active
    }

    /// Convolve `image` at the active pixels.
    ///
    /// # Errors
    /// Shape mismatch when `image` does not match the mask grid.
    pub fn convolve(&self, image: ArrayView2<f64>) -> Result<Array2<f64>> {
        if image.dim() != self.active.shape() {
            return Err(ConvolutionError::shape_mismatch(
                "image",
                self.active.shape(),
                image.dim(),
            ));
        }

        let kernel = self.kernel.view();
        let gate = SourceGate::new(self.compute_mask.as_ref().map(|m| m.view()), 1);
        Ok(self.active.fill(&self.execution, |i, j| {
            convolve_at(&image, &kernel, i, j, &gate)
        }))
    }
}

/// One-shot masked convolution.
///
/// Sources excluded by `compute_mask` contribute nothing; kernel weights are
/// used as given and never renormalized.
pub fn convolve_masked(
    image: ArrayView2<f64>,
    kernel_cropped: ArrayView2<f64>,
    active_mask: ArrayView2<bool>,
    compute_mask: Option<ArrayView2<bool>>,
) -> Result<Array2<f64>> {
    MaskedConvolver::new(
        kernel_cropped.to_owned(),
        active_mask,
        compute_mask,
        ExecutionOptions::sequential(),
    )?
    .convolve(image)
}
