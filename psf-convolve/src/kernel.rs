//! PSF kernel resampling between supersampled and pixel resolution
//!
//! A PSF is supplied at the supersampled (fine) resolution. The pixel
//! (coarse) kernel is derived from it by block averaging, and both kernels
//! can be cropped to a smaller centered footprint for the masked passes.
//!
//! Odd and even supersampling factors are genuinely different problems. For
//! an odd factor the fine kernel center lies at the center of a block, so
//! plain block averaging keeps the peak centered. For an even factor a
//! centered block would have to start half-way through a fine pixel; the
//! fine samples on block borders are therefore split between neighbouring
//! coarse cells (halves on edges, quarters on corners).

use log::{debug, warn};
use ndarray::{s, Array2, ArrayView2};

use crate::error::{ConvolutionError, Result};

/// Relative flux deviation above which kernel resampling logs a warning.
pub const FLUX_TOLERANCE: f64 = 1e-6;

/// Integer ratio between fine and coarse grid resolution along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupersamplingFactor {
    /// Odd factor, including the degenerate factor 1.
    Odd(usize),
    /// Even factor.
    Even(usize),
}

impl SupersamplingFactor {
    /// Classify an integer factor.
    ///
    /// # Errors
    /// Returns a configuration error for a factor of zero.
    pub fn new(factor: usize) -> Result<Self> {
        match factor {
            0 => Err(ConvolutionError::configuration(
                "supersampling factor must be at least 1",
            )),
            f if f % 2 == 0 => Ok(Self::Even(f)),
            f => Ok(Self::Odd(f)),
        }
    }

    /// The raw factor.
    pub fn get(&self) -> usize {
        match *self {
            Self::Odd(f) | Self::Even(f) => f,
        }
    }

    /// Side length of the coarse kernel derived from a fine kernel of `fine_size`.
    ///
    /// For an odd factor the fine size must be an exact multiple of the
    /// factor. For an even factor the result is the smallest odd `n` with
    /// `n * f - 1 >= fine_size`.
    pub fn coarse_kernel_size(&self, fine_size: usize) -> Result<usize> {
        match *self {
            Self::Odd(f) => {
                if fine_size % f != 0 {
                    return Err(ConvolutionError::configuration(format!(
                        "kernel size {fine_size} is not a multiple of supersampling factor {f}"
                    )));
                }
                Ok(fine_size / f)
            }
            Self::Even(f) => {
                let mut coarse = (fine_size + 1).div_ceil(f);
                if coarse % 2 == 0 {
                    coarse += 1;
                }
                Ok(coarse)
            }
        }
    }

    /// Side length the fine kernel is padded to before averaging.
    pub fn aligned_fine_size(&self, fine_size: usize) -> Result<usize> {
        let coarse = self.coarse_kernel_size(fine_size)?;
        Ok(match *self {
            Self::Odd(_) => fine_size,
            Self::Even(f) => coarse * f - 1,
        })
    }

    /// Odd fine crop size covering the footprint of `coarse_size` coarse pixels.
    ///
    /// Zero for a zero `coarse_size`, which [`crop`] rejects.
    pub fn fine_crop_size(&self, coarse_size: usize) -> usize {
        match *self {
            Self::Odd(f) => coarse_size * f,
            Self::Even(f) => (coarse_size * f).saturating_sub(1),
        }
    }

    /// Zero-pad a validated fine kernel to the size the averaging scheme tiles.
    pub fn align_fine_kernel(&self, kernel_super: ArrayView2<f64>) -> Result<Array2<f64>> {
        validate_kernel(kernel_super)?;
        let target = self.aligned_fine_size(kernel_super.nrows())?;
        pad(kernel_super, target)
    }

    /// Derive the coarse kernel from a supersampled kernel.
    ///
    /// The block mean is rescaled by `f²`, so the coarse kernel carries the
    /// same total flux as the fine one. A deviation above [`FLUX_TOLERANCE`]
    /// is logged as a warning but not treated as an error.
    ///
    /// # Errors
    /// Configuration error when the kernel is not square, odd, finite and
    /// non-negative, or when an odd factor does not divide the kernel size.
    pub fn average_to_coarse(&self, kernel_super: ArrayView2<f64>) -> Result<Array2<f64>> {
        let fine = self.align_fine_kernel(kernel_super)?;
        let coarse_size = self.coarse_kernel_size(kernel_super.nrows())?;

        let binning = self.binning_matrix(coarse_size);
        let mut coarse = binning.dot(&fine).dot(&binning.t());

        let f = self.get() as f64;
        coarse *= f * f;

        let deviation = flux_deviation(kernel_super, coarse.view());
        if deviation > FLUX_TOLERANCE {
            warn!(
                "Coarse kernel flux deviates from supersampled kernel by {:.3e} (factor {})",
                deviation,
                self.get()
            );
        } else {
            debug!(
                "Averaged {}x{} kernel to {}x{} with {:?}",
                kernel_super.nrows(),
                kernel_super.ncols(),
                coarse_size,
                coarse_size,
                self
            );
        }

        Ok(coarse)
    }

    /// Per-axis averaging weights, shape `(coarse_size, aligned_fine_size)`.
    ///
    /// Applying the matrix on both sides, `B · K · Bᵀ`, gives the block mean.
    fn binning_matrix(&self, coarse_size: usize) -> Array2<f64> {
        let f = self.get();
        let weight = 1.0 / f as f64;

        match *self {
            Self::Odd(_) => {
                let mut binning = Array2::zeros((coarse_size, coarse_size * f));
                for c in 0..coarse_size {
                    binning
                        .slice_mut(s![c, c * f..(c + 1) * f])
                        .fill(weight);
                }
                binning
            }
            Self::Even(_) => {
                let fine_size = coarse_size * f - 1;
                let mut binning = Array2::zeros((coarse_size, fine_size));
                for p in 0..fine_size {
                    let (c, phase) = (p / f, p % f);
                    if phase < f - 1 {
                        binning[[c, p]] = weight;
                    } else {
                        // Straddles the border between cells c and c + 1
                        binning[[c, p]] = 0.5 * weight;
                        binning[[c + 1, p]] = 0.5 * weight;
                    }
                }
                binning
            }
        }
    }
}

/// Relative difference between the total flux of two kernels.
///
/// Falls back to the absolute difference when the reference sums to zero.
pub fn flux_deviation(reference: ArrayView2<f64>, resampled: ArrayView2<f64>) -> f64 {
    let expected = reference.sum();
    let actual = resampled.sum();
    if expected == 0.0 {
        actual.abs()
    } else {
        ((actual - expected) / expected).abs()
    }
}

/// Check that a kernel is square, odd-sized, finite and non-negative.
pub fn validate_kernel(kernel: ArrayView2<f64>) -> Result<()> {
    let (rows, cols) = kernel.dim();
    if rows == 0 || rows != cols {
        return Err(ConvolutionError::configuration(format!(
            "kernel must be square and non-empty, got {rows}x{cols}"
        )));
    }
    if rows % 2 == 0 {
        return Err(ConvolutionError::configuration(format!(
            "kernel size {rows} must be odd"
        )));
    }
    if let Some(bad) = kernel.iter().find(|v| !v.is_finite() || **v < 0.0) {
        return Err(ConvolutionError::configuration(format!(
            "kernel weights must be finite and non-negative, found {bad}"
        )));
    }
    Ok(())
}

/// Centered `target_size × target_size` sub-array of an odd-sized kernel.
///
/// # Errors
/// Configuration error when `target_size` is zero, even, or larger than the kernel.
pub fn crop(kernel: ArrayView2<f64>, target_size: usize) -> Result<Array2<f64>> {
    let (rows, cols) = kernel.dim();
    if rows % 2 == 0 || cols % 2 == 0 {
        return Err(ConvolutionError::configuration(format!(
            "cannot crop an even-sized {rows}x{cols} kernel around its center"
        )));
    }
    if target_size == 0 || target_size % 2 == 0 {
        return Err(ConvolutionError::configuration(format!(
            "crop size {target_size} must be odd and positive"
        )));
    }
    if target_size > rows || target_size > cols {
        return Err(ConvolutionError::configuration(format!(
            "crop size {target_size} exceeds kernel size {rows}x{cols}"
        )));
    }

    let r0 = (rows - target_size) / 2;
    let c0 = (cols - target_size) / 2;
    Ok(kernel
        .slice(s![r0..r0 + target_size, c0..c0 + target_size])
        .to_owned())
}

/// Embed an odd-sized kernel at the center of a zero `target_size` square.
pub fn pad(kernel: ArrayView2<f64>, target_size: usize) -> Result<Array2<f64>> {
    let (rows, cols) = kernel.dim();
    if target_size % 2 == 0 || rows % 2 == 0 || cols % 2 == 0 {
        return Err(ConvolutionError::configuration(format!(
            "cannot center a {rows}x{cols} kernel in a {target_size} square"
        )));
    }
    if target_size < rows || target_size < cols {
        return Err(ConvolutionError::configuration(format!(
            "pad size {target_size} is smaller than kernel size {rows}x{cols}"
        )));
    }

    let r0 = (target_size - rows) / 2;
    let c0 = (target_size - cols) / 2;
    let mut padded = Array2::zeros((target_size, target_size));
    padded
        .slice_mut(s![r0..r0 + rows, c0..c0 + cols])
        .assign(&kernel);
    Ok(padded)
}

/// Rescale a kernel so its weights sum to one.
pub fn normalize(kernel: ArrayView2<f64>) -> Result<Array2<f64>> {
    let sum = kernel.sum();
    if !sum.is_finite() || sum <= 0.0 {
        return Err(ConvolutionError::configuration(format!(
            "kernel sum {sum} cannot be normalized"
        )));
    }
    Ok(kernel.mapv(|v| v / sum))
}

/// Create a normalized Gaussian kernel
///
/// # Arguments
/// * `size` - Size of the kernel (must be odd)
/// * `sigma` - Standard deviation of the Gaussian in kernel pixels
pub fn gaussian_kernel(size: usize, sigma: f64) -> Array2<f64> {
    assert!(size % 2 == 1, "Kernel size must be odd");

    let center = (size / 2) as f64;
    let kernel = Array2::from_shape_fn((size, size), |(i, j)| {
        let y = i as f64 - center;
        let x = j as f64 - center;
        (-(x * x + y * y) / (2.0 * sigma * sigma)).exp()
    });

    let sum = kernel.sum();
    kernel.mapv(|v| v / sum)
}
