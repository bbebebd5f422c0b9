//! Direct-space 2D convolution
//!
//! Every pass in this crate uses the same orientation as the FFT pass (a
//! true convolution, kernel flipped) with zero boundary:
//!
//! `out[i, j] = Σ k[a, b] · img[i + r − a, j + c − b]`
//!
//! where `(r, c)` is the kernel center. The per-pixel sum always runs rows
//! outer, columns inner, so any two passes that evaluate the same pixel with
//! the same kernel produce bit-identical values.

use ndarray::{Array2, ArrayView2, Zip};

/// Decides which source pixels may contribute to a convolution sum.
///
/// The mask lives on the coarse grid; `factor` maps fine source coordinates
/// onto it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SourceGate<'a> {
    mask: Option<ArrayView2<'a, bool>>,
    factor: usize,
}

impl<'a> SourceGate<'a> {
    pub(crate) fn new(mask: Option<ArrayView2<'a, bool>>, factor: usize) -> Self {
        Self { mask, factor }
    }

    pub(crate) fn open() -> Self {
        Self::new(None, 1)
    }

    #[inline]
    fn allows(&self, row: usize, col: usize) -> bool {
        self.mask
            .map_or(true, |mask| mask[[row / self.factor, col / self.factor]])
    }
}

/// Convolution sum at a single output pixel.
#[inline]
pub(crate) fn convolve_at(
    image: &ArrayView2<f64>,
    kernel: &ArrayView2<f64>,
    row: usize,
    col: usize,
    gate: &SourceGate,
) -> f64 {
    let (img_rows, img_cols) = image.dim();
    let (ker_rows, ker_cols) = kernel.dim();
    let pad_rows = (ker_rows / 2) as isize;
    let pad_cols = (ker_cols / 2) as isize;

    let mut sum = 0.0;
    for ki in 0..ker_rows {
        let img_row = row as isize + pad_rows - ki as isize;
        if img_row < 0 || img_row >= img_rows as isize {
            continue;
        }
        for kj in 0..ker_cols {
            let img_col = col as isize + pad_cols - kj as isize;
            if img_col < 0 || img_col >= img_cols as isize {
                continue;
            }
            let (r, c) = (img_row as usize, img_col as usize);
            if gate.allows(r, c) {
                sum += kernel[[ki, kj]] * image[[r, c]];
            }
        }
    }
    sum
}

/// Perform a zero-padded 2D convolution keeping the input size
///
/// # Arguments
/// * `image` - Input image
/// * `kernel` - Odd-sized convolution kernel
/// * `parallel` - Evaluate output rows on the rayon pool
///
/// # Returns
/// * Convolved image with the same shape as `image`
pub fn convolve2d(image: ArrayView2<f64>, kernel: ArrayView2<f64>, parallel: bool) -> Array2<f64> {
    let mut output = Array2::zeros(image.dim());
    let gate = SourceGate::open();

    let zip = Zip::indexed(&mut output);
    if parallel {
        zip.par_for_each(|(i, j), out| {
            *out = convolve_at(&image, &kernel, i, j, &gate);
        });
    } else {
        zip.for_each(|(i, j), out| {
            *out = convolve_at(&image, &kernel, i, j, &gate);
        });
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::gaussian_kernel;
    use ndarray::array;

    #[test]
    fn test_convolution_identity() {
        let image = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let kernel = array![[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]];

        let output = convolve2d(image.view(), kernel.view(), false);
        assert_eq!(output, image);
    }

    #[test]
    fn test_kernel_is_flipped() {
        let image = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        // Weight right of center moves flux one pixel to the right
        let kernel = array![[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 0.0, 0.0]];

        let output = convolve2d(image.view(), kernel.view(), false);
        let expected = array![[0.0, 1.0, 2.0], [0.0, 4.0, 5.0], [0.0, 7.0, 8.0]];
        assert_eq!(output, expected);
    }

    #[test]
    fn test_zero_boundary_box_blur() {
        let image = Array2::ones((5, 5));
        let kernel = Array2::from_elem((3, 3), 1.0 / 9.0);

        let output = convolve2d(image.view(), kernel.view(), false);
        assert!((output[[2, 2]] - 1.0).abs() < 1e-12);
        assert!((output[[0, 2]] - 6.0 / 9.0).abs() < 1e-12);
        assert!((output[[0, 0]] - 4.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let image = Array2::from_shape_fn((17, 23), |(i, j)| ((i * 31 + j * 7) % 13) as f64);
        let kernel = gaussian_kernel(5, 1.0);

        let seq = convolve2d(image.view(), kernel.view(), false);
        let par = convolve2d(image.view(), kernel.view(), true);
        assert_eq!(seq, par);
    }

    #[test]
    fn test_gate_blocks_sources() {
        let image = Array2::ones((4, 4));
        let kernel = Array2::from_elem((3, 3), 1.0);
        let mask = array![[true, false], [false, false]];
        let gate = SourceGate::new(Some(mask.view()), 2);

        // Only the top-left 2x2 fine block may contribute
        let value = convolve_at(&image.view(), &kernel.view(), 1, 1, &gate);
        assert_eq!(value, 4.0);
        let value = convolve_at(&image.view(), &kernel.view(), 3, 3, &gate);
        assert_eq!(value, 0.0);
    }
}
