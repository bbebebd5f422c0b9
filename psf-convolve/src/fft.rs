//! Full-field FFT convolution on the coarse grid
//!
//! Linear convolution through zero padding to `(H + K_r − 1, W + K_c − 1)`
//! and a row–column 2D transform built from `rustfft` 1D plans. The output is
//! the centered `(H, W)` window, which is exactly the zero-boundary "same"
//! convolution computed by [`crate::direct::convolve2d`].

use std::sync::Arc;

use log::debug;
use ndarray::{Array2, ArrayView2};
use rustfft::{num_complex::Complex64, Fft, FftPlanner};

use crate::config::FftStrategy;
use crate::direct;

/// Forward and inverse plans for one padded shape.
#[derive(Clone)]
struct Plans {
    rows: usize,
    cols: usize,
    row_forward: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl Plans {
    fn new(rows: usize, cols: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            rows,
            cols,
            row_forward: planner.plan_fft_forward(cols),
            col_forward: planner.plan_fft_forward(rows),
            row_inverse: planner.plan_fft_inverse(cols),
            col_inverse: planner.plan_fft_inverse(rows),
        }
    }

    fn forward(&self, data: &mut [Complex64]) {
        self.row_forward.process(data);
        transform_columns(data, self.rows, self.cols, self.col_forward.as_ref());
    }

    fn inverse(&self, data: &mut [Complex64]) {
        self.row_inverse.process(data);
        transform_columns(data, self.rows, self.cols, self.col_inverse.as_ref());
    }
}

/// Apply a 1D transform down every column of a row-major buffer.
fn transform_columns(data: &mut [Complex64], rows: usize, cols: usize, fft: &dyn Fft<f64>) {
    let mut column = vec![Complex64::default(); rows];
    for c in 0..cols {
        for (r, value) in column.iter_mut().enumerate() {
            *value = data[r * cols + c];
        }
        fft.process(&mut column);
        for (r, value) in column.iter().enumerate() {
            data[r * cols + c] = *value;
        }
    }
}

/// Copy a real array into the top-left corner of a zeroed complex buffer.
fn embed(array: &ArrayView2<f64>, rows: usize, cols: usize) -> Vec<Complex64> {
    let mut buffer = vec![Complex64::default(); rows * cols];
    for ((i, j), &v) in array.indexed_iter() {
        buffer[i * cols + j] = Complex64::new(v, 0.0);
    }
    buffer
}

/// Kernel spectrum for one image shape.
#[derive(Clone)]
struct KernelSpectrum {
    image_shape: (usize, usize),
    plans: Plans,
    values: Vec<Complex64>,
}

impl KernelSpectrum {
    fn new(kernel: &ArrayView2<f64>, image_shape: (usize, usize)) -> Self {
        let (ker_rows, ker_cols) = kernel.dim();
        let rows = image_shape.0 + ker_rows - 1;
        let cols = image_shape.1 + ker_cols - 1;

        let plans = Plans::new(rows, cols);
        let mut values = embed(kernel, rows, cols);
        plans.forward(&mut values);

        Self {
            image_shape,
            plans,
            values,
        }
    }
}

/// Convolve an image with a kernel through the FFT, zero boundary, same size.
pub fn convolve_fft(image: ArrayView2<f64>, kernel: ArrayView2<f64>) -> Array2<f64> {
    if image.is_empty() || kernel.is_empty() {
        return Array2::zeros(image.dim());
    }
    let spectrum = KernelSpectrum::new(&kernel, image.dim());
    convolve_with_spectrum(&image, kernel.dim(), &spectrum)
}

fn convolve_with_spectrum(
    image: &ArrayView2<f64>,
    kernel_dim: (usize, usize),
    spectrum: &KernelSpectrum,
) -> Array2<f64> {
    let plans = &spectrum.plans;
    let (rows, cols) = (plans.rows, plans.cols);

    let mut buffer = embed(image, rows, cols);
    plans.forward(&mut buffer);
    for (value, k) in buffer.iter_mut().zip(spectrum.values.iter()) {
        *value *= *k;
    }
    plans.inverse(&mut buffer);

    // rustfft leaves the inverse unnormalized
    let scale = 1.0 / (rows * cols) as f64;
    let (off_r, off_c) = (kernel_dim.0 / 2, kernel_dim.1 / 2);
    Array2::from_shape_fn(image.dim(), |(i, j)| {
        buffer[(i + off_r) * cols + (j + off_c)].re * scale
    })
}

/// Full-field convolver bound to one coarse kernel.
#[derive(Clone)]
pub struct FftConvolver {
    kernel: Array2<f64>,
    strategy: FftStrategy,
    parallel: bool,
    spectrum: Option<KernelSpectrum>,
}

impl FftConvolver {
    /// Create a convolver for images of `image_shape`.
    ///
    /// With [`FftStrategy::Static`] the kernel spectrum is computed here and
    /// reused by every call on an image of that shape.
    pub fn new(
        kernel: Array2<f64>,
        image_shape: (usize, usize),
        strategy: FftStrategy,
        parallel: bool,
    ) -> Self {
        let spectrum = match strategy {
            FftStrategy::Static if !kernel.is_empty() && image_shape.0 * image_shape.1 > 0 => {
                debug!(
                    "Precomputing {}x{} kernel spectrum for {:?} image",
                    kernel.nrows(),
                    kernel.ncols(),
                    image_shape
                );
                Some(KernelSpectrum::new(&kernel.view(), image_shape))
            }
            _ => None,
        };

        Self {
            kernel,
            strategy,
            parallel,
            spectrum,
        }
    }

    /// Kernel applied by this convolver.
    pub fn kernel(&self) -> ArrayView2<'_, f64> {
        self.kernel.view()
    }

    /// Strategy selected at construction.
    pub fn strategy(&self) -> FftStrategy {
        self.strategy
    }

    /// Convolve a full coarse image.
    pub fn convolve(&self, image: ArrayView2<f64>) -> Array2<f64> {
        match (self.strategy, &self.spectrum) {
            (FftStrategy::Direct, _) => {
                direct::convolve2d(image, self.kernel.view(), self.parallel)
            }
            (FftStrategy::Static, Some(spectrum)) if spectrum.image_shape == image.dim() => {
                convolve_with_spectrum(&image, self.kernel.dim(), spectrum)
            }
            _ => convolve_fft(image, self.kernel.view()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direct::convolve2d;
    use crate::kernel::gaussian_kernel;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_image(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((rows, cols), |_| rng.gen_range(0.0..10.0))
    }

    #[test]
    fn test_matches_direct_convolution() {
        let image = random_image(19, 24, 7);
        let kernel = gaussian_kernel(7, 1.5);

        let fft = convolve_fft(image.view(), kernel.view());
        let direct = convolve2d(image.view(), kernel.view(), false);
        for (a, b) in fft.iter().zip(direct.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_asymmetric_kernel_orientation() {
        let image = random_image(8, 9, 3);
        let kernel = array![[0.0, 0.1, 0.0], [0.0, 0.2, 0.5], [0.2, 0.0, 0.0]];

        let fft = convolve_fft(image.view(), kernel.view());
        let direct = convolve2d(image.view(), kernel.view(), false);
        for (a, b) in fft.iter().zip(direct.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_kernel_larger_than_image() {
        let image = random_image(3, 4, 11);
        let kernel = gaussian_kernel(9, 2.0);

        let fft = convolve_fft(image.view(), kernel.view());
        let direct = convolve2d(image.view(), kernel.view(), false);
        assert_eq!(fft.dim(), (3, 4));
        for (a, b) in fft.iter().zip(direct.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_box_blur_of_uniform_image() {
        let image = Array2::ones((5, 5));
        let kernel = Array2::from_elem((3, 3), 1.0 / 9.0);
        let out = convolve_fft(image.view(), kernel.view());

        assert_abs_diff_eq!(out[[2, 2]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out[[0, 2]], 6.0 / 9.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out[[4, 4]], 4.0 / 9.0, epsilon = 1e-12);
    }

    #[test]
    fn test_strategies_agree() {
        let image = random_image(16, 12, 42);
        let kernel = gaussian_kernel(5, 1.0);

        let dynamic = FftConvolver::new(kernel.clone(), (16, 12), FftStrategy::Dynamic, false);
        let fixed = FftConvolver::new(kernel.clone(), (16, 12), FftStrategy::Static, false);
        let direct = FftConvolver::new(kernel.clone(), (16, 12), FftStrategy::Direct, true);

        let a = dynamic.convolve(image.view());
        let b = fixed.convolve(image.view());
        let c = direct.convolve(image.view());
        assert_eq!(a, b);
        for (x, y) in a.iter().zip(c.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_static_falls_back_on_other_shapes() {
        let kernel = gaussian_kernel(3, 0.7);
        let convolver = FftConvolver::new(kernel.clone(), (10, 10), FftStrategy::Static, false);

        let image = random_image(6, 5, 1);
        let out = convolver.convolve(image.view());
        let expected = convolve_fft(image.view(), kernel.view());
        assert_eq!(out, expected);
    }

    #[test]
    fn test_empty_image() {
        let image = Array2::<f64>::zeros((0, 4));
        let out = convolve_fft(image.view(), gaussian_kernel(3, 1.0).view());
        assert_eq!(out.dim(), (0, 4));
    }
}
