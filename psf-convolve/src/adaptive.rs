//! Adaptive multi-resolution convolution
//!
//! Combines three passes into one coarse image:
//!
//! 1. FFT convolution of the downsampled image with the coarse kernel over
//!    the full field,
//! 2. fine-resolution masked convolution at the active pixels, block-summed
//!    to coarse,
//! 3. coarse-resolution masked convolution at the same active pixels.
//!
//! The result is `1 + 2 − 3`. Outside the active mask passes 2 and 3 are zero
//! and the result is the plain coarse convolution. Inside it, pass 3 removes
//! the coarse contribution of the cropped kernel footprint from pass 1 and
//! pass 2 replaces it with the fine-resolution one.

use log::debug;
use ndarray::{Array2, ArrayView2, Zip};

use crate::config::{AdaptiveConvolutionConfig, ExecutionOptions};
use crate::error::{ConvolutionError, Result};
use crate::fft::FftConvolver;
use crate::kernel::{crop, SupersamplingFactor};
use crate::masked::{check_compute_mask, MaskedConvolver};
use crate::resample::downsample;
use crate::subgrid::SubgridConvolver;

/// The three intermediate passes of one adaptive convolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionParts {
    /// FFT convolution of the downsampled image over the full field
    pub full_field: Array2<f64>,
    /// Fine-resolution contribution at active pixels
    pub fine_partial: Array2<f64>,
    /// Coarse-resolution contribution at active pixels
    pub coarse_partial: Array2<f64>,
}

impl ConvolutionParts {
    /// `full_field + fine_partial − coarse_partial`
    pub fn combine(&self) -> Array2<f64> {
        let mut out = self.full_field.clone();
        Zip::from(&mut out)
            .and(&self.fine_partial)
            .and(&self.coarse_partial)
            .for_each(|o, &fine, &coarse| *o += fine - coarse);
        out
    }
}

/// Configured adaptive convolution engine.
///
/// Kernels, masks and sub-convolvers are fixed at construction; convolving
/// takes `&self` and can be repeated for any number of images of the
/// configured fine shape.
#[derive(Clone)]
pub struct AdaptiveConvolution {
    factor: SupersamplingFactor,
    coarse_shape: (usize, usize),
    execution: ExecutionOptions,
    full_field: FftConvolver,
    fine_partial: SubgridConvolver,
    coarse_partial: MaskedConvolver,
}

impl AdaptiveConvolution {
    /// Build the engine.
    ///
    /// # Arguments
    /// * `kernel_super` - PSF at supersampled resolution, odd size, summing to one
    /// * `active_mask` - Coarse pixels that receive the fine-resolution correction
    /// * `compute_mask` - Coarse pixels allowed to contribute to the masked
    ///   passes, all pixels when `None`
    /// * `config` - Supersampling factor, masked kernel footprint and execution hints
    ///
    /// # Errors
    /// * Configuration error for an invalid factor, kernel or crop size
    /// * Shape mismatch when the compute mask does not match the active mask
    pub fn new(
        kernel_super: ArrayView2<f64>,
        active_mask: ArrayView2<bool>,
        compute_mask: Option<ArrayView2<bool>>,
        config: &AdaptiveConvolutionConfig,
    ) -> Result<Self> {
        let factor = SupersamplingFactor::new(config.supersampling_factor)?;
        let coarse_shape = active_mask.dim();
        check_compute_mask(compute_mask, coarse_shape)?;

        let kernel_fine = factor.align_fine_kernel(kernel_super)?;
        let kernel_coarse = factor.average_to_coarse(kernel_super)?;

        let supersampling_size = config.supersampling_size.unwrap_or(kernel_coarse.nrows());
        let kernel_coarse_cropped = crop(kernel_coarse.view(), supersampling_size)?;
        let kernel_fine_cropped = crop(
            kernel_fine.view(),
            factor.fine_crop_size(supersampling_size),
        )?;

        let execution = config.execution;
        let full_field = FftConvolver::new(
            kernel_coarse,
            coarse_shape,
            execution.fft_strategy,
            execution.parallel,
        );
        let fine_partial = SubgridConvolver::new(
            kernel_fine_cropped,
            factor.get(),
            active_mask,
            compute_mask,
            execution,
        )?;
        let coarse_partial =
            MaskedConvolver::new(kernel_coarse_cropped, active_mask, compute_mask, execution)?;

        debug!(
            "Adaptive convolution: {:?}, coarse grid {:?}, kernels {}→{} (masked {}→{}), {} active pixels",
            factor,
            coarse_shape,
            kernel_super.nrows(),
            full_field.kernel().nrows(),
            fine_partial.kernel().nrows(),
            coarse_partial.kernel().nrows(),
            coarse_partial.active().len()
        );

        Ok(Self {
            factor,
            coarse_shape,
            execution,
            full_field,
            fine_partial,
            coarse_partial,
        })
    }

    /// Supersampling factor.
    pub fn factor(&self) -> SupersamplingFactor {
        self.factor
    }

    /// Output grid shape.
    pub fn coarse_shape(&self) -> (usize, usize) {
        self.coarse_shape
    }

    /// Accepted input grid shape.
    pub fn fine_shape(&self) -> (usize, usize) {
        let f = self.factor.get();
        (self.coarse_shape.0 * f, self.coarse_shape.1 * f)
    }

    /// Coarse kernel used by the full-field pass.
    pub fn kernel_coarse(&self) -> ArrayView2<'_, f64> {
        self.full_field.kernel()
    }

    /// Cropped coarse kernel used by the coarse masked pass.
    pub fn kernel_coarse_cropped(&self) -> ArrayView2<'_, f64> {
        self.coarse_partial.kernel()
    }

    /// Cropped fine kernel used by the subgrid pass.
    pub fn kernel_fine_cropped(&self) -> ArrayView2<'_, f64> {
        self.fine_partial.kernel()
    }

    /// Number of active coarse pixels.
    pub fn active_pixel_count(&self) -> usize {
        self.coarse_partial.active().len()
    }

    /// Convolve a supersampled image onto the coarse grid.
    ///
    /// # Errors
    /// Shape mismatch when `image_fine` is not of [`Self::fine_shape`]; this
    /// is checked before any computation.
    pub fn convolve(&self, image_fine: ArrayView2<f64>) -> Result<Array2<f64>> {
        Ok(self.convolve_parts(image_fine)?.combine())
    }

    /// Run the three passes without combining them.
    pub fn convolve_parts(&self, image_fine: ArrayView2<f64>) -> Result<ConvolutionParts> {
        if image_fine.dim() != self.fine_shape() {
            return Err(ConvolutionError::shape_mismatch(
                "fine image",
                self.fine_shape(),
                image_fine.dim(),
            ));
        }

        let image_coarse = downsample(image_fine, self.factor.get())?;
        let image_coarse = image_coarse.view();

        let full_field = || self.full_field.convolve(image_coarse);
        let fine_partial = || self.fine_partial.convolve(image_fine);
        let coarse_partial = || self.coarse_partial.convolve(image_coarse);

        let (full_field, (fine_partial, coarse_partial)) = if self.execution.parallel {
            rayon::join(full_field, || rayon::join(fine_partial, coarse_partial))
        } else {
            (full_field(), (fine_partial(), coarse_partial()))
        };

        Ok(ConvolutionParts {
            full_field,
            fine_partial: fine_partial?,
            coarse_partial: coarse_partial?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FftStrategy, LoopStrategy};
    use crate::kernel::gaussian_kernel;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_image(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((rows, cols), |_| rng.gen_range(0.0..1.0))
    }

    #[test]
    fn test_kernel_layout_odd_factor() {
        let kernel = gaussian_kernel(15, 3.0);
        let mask = Array2::from_elem((10, 10), false);
        let config = AdaptiveConvolutionConfig::new(3).with_supersampling_size(3);
        let engine = AdaptiveConvolution::new(kernel.view(), mask.view(), None, &config).unwrap();

        assert_eq!(engine.factor(), SupersamplingFactor::Odd(3));
        assert_eq!(engine.kernel_coarse().dim(), (5, 5));
        assert_eq!(engine.kernel_coarse_cropped().dim(), (3, 3));
        assert_eq!(engine.kernel_fine_cropped().dim(), (9, 9));
        assert_eq!(engine.fine_shape(), (30, 30));
        assert_eq!(engine.active_pixel_count(), 0);
    }

    #[test]
    fn test_kernel_layout_even_factor() {
        let kernel = gaussian_kernel(7, 1.5);
        let mask = Array2::from_elem((6, 8), true);
        let config = AdaptiveConvolutionConfig::new(2);
        let engine = AdaptiveConvolution::new(kernel.view(), mask.view(), None, &config).unwrap();

        assert_eq!(engine.factor(), SupersamplingFactor::Even(2));
        assert_eq!(engine.kernel_coarse().dim(), (5, 5));
        assert_eq!(engine.kernel_coarse_cropped().dim(), (5, 5));
        assert_eq!(engine.kernel_fine_cropped().dim(), (9, 9));
        assert_abs_diff_eq!(engine.kernel_fine_cropped().sum(), 1.0, epsilon = 1e-12);
        assert_eq!(engine.coarse_shape(), (6, 8));
        assert_eq!(engine.active_pixel_count(), 48);
    }

    #[test]
    fn test_construction_errors() {
        let mask = Array2::from_elem((4, 4), false);

        let even_kernel = Array2::from_elem((4, 4), 1.0 / 16.0);
        assert!(matches!(
            AdaptiveConvolution::new(
                even_kernel.view(),
                mask.view(),
                None,
                &AdaptiveConvolutionConfig::new(1)
            ),
            Err(ConvolutionError::Configuration { .. })
        ));

        let kernel = gaussian_kernel(7, 1.0);
        // 7 is not a multiple of 3
        assert!(matches!(
            AdaptiveConvolution::new(
                kernel.view(),
                mask.view(),
                None,
                &AdaptiveConvolutionConfig::new(3)
            ),
            Err(ConvolutionError::Configuration { .. })
        ));
        assert!(AdaptiveConvolution::new(
            kernel.view(),
            mask.view(),
            None,
            &AdaptiveConvolutionConfig::new(0)
        )
        .is_err());

        for size in [2, 9] {
            let config = AdaptiveConvolutionConfig::new(1).with_supersampling_size(size);
            assert!(matches!(
                AdaptiveConvolution::new(kernel.view(), mask.view(), None, &config),
                Err(ConvolutionError::Configuration { .. })
            ));
        }

        let compute = Array2::from_elem((4, 3), true);
        assert!(matches!(
            AdaptiveConvolution::new(
                kernel.view(),
                mask.view(),
                Some(compute.view()),
                &AdaptiveConvolutionConfig::new(1)
            ),
            Err(ConvolutionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_combine_is_elementwise() {
        let parts = ConvolutionParts {
            full_field: Array2::from_elem((2, 2), 1.0),
            fine_partial: Array2::from_elem((2, 2), 0.5),
            coarse_partial: Array2::from_elem((2, 2), 0.25),
        };
        assert_eq!(parts.combine(), Array2::from_elem((2, 2), 1.25));
    }

    #[test]
    fn test_execution_hints_do_not_change_result() {
        let kernel = gaussian_kernel(9, 1.6);
        let mask = Array2::from_shape_fn((8, 9), |(i, j)| (i * 3 + j) % 4 == 0);
        let compute = Array2::from_shape_fn((8, 9), |(i, j)| i + j > 2);
        let image = random_image(24, 27, 77);

        let baseline = AdaptiveConvolution::new(
            kernel.view(),
            mask.view(),
            Some(compute.view()),
            &AdaptiveConvolutionConfig::new(3).with_execution(ExecutionOptions::sequential()),
        )
        .unwrap()
        .convolve(image.view())
        .unwrap();

        for parallel in [false, true] {
            for loop_strategy in [LoopStrategy::ActiveList, LoopStrategy::MaskScan] {
                for fft_strategy in [FftStrategy::Dynamic, FftStrategy::Static, FftStrategy::Direct]
                {
                    let execution = ExecutionOptions {
                        parallel,
                        loop_strategy,
                        fft_strategy,
                    };
                    let config = AdaptiveConvolutionConfig::new(3).with_execution(execution);
                    let out = AdaptiveConvolution::new(
                        kernel.view(),
                        mask.view(),
                        Some(compute.view()),
                        &config,
                    )
                    .unwrap()
                    .convolve(image.view())
                    .unwrap();

                    for (a, b) in out.iter().zip(baseline.iter()) {
                        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
                    }
                }
            }
        }
    }
}
