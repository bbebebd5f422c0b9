//! Flux-conserving resampling between the fine and coarse image grids
//!
//! Fine pixel `(p, q)` belongs to coarse pixel `(p / f, q / f)`. Images hold
//! flux per pixel, not surface brightness, so downsampling sums blocks and
//! upsampling spreads each coarse value evenly over its block.

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{ConvolutionError, Result};

/// Block-sum a fine image down to the coarse grid.
///
/// # Errors
/// Shape mismatch when either axis of `image_fine` is not a multiple of `factor`.
pub fn downsample(image_fine: ArrayView2<f64>, factor: usize) -> Result<Array2<f64>> {
    let (rows, cols) = image_fine.dim();
    if factor == 0 {
        return Err(ConvolutionError::configuration(
            "supersampling factor must be at least 1",
        ));
    }
    if rows % factor != 0 || cols % factor != 0 {
        return Err(ConvolutionError::shape_mismatch(
            "fine image",
            (rows.next_multiple_of(factor), cols.next_multiple_of(factor)),
            (rows, cols),
        ));
    }
    if factor == 1 {
        return Ok(image_fine.to_owned());
    }

    let mut coarse = Array2::zeros((rows / factor, cols / factor));
    for (ci, band) in image_fine
        .axis_chunks_iter(Axis(0), factor)
        .enumerate()
    {
        for (cj, block) in band.axis_chunks_iter(Axis(1), factor).enumerate() {
            coarse[[ci, cj]] = block.sum();
        }
    }
    Ok(coarse)
}

/// Spread each coarse pixel evenly over its `factor × factor` fine block.
///
/// This is the flux-conserving inverse of [`downsample`].
pub fn upsample(image_coarse: ArrayView2<f64>, factor: usize) -> Result<Array2<f64>> {
    if factor == 0 {
        return Err(ConvolutionError::configuration(
            "supersampling factor must be at least 1",
        ));
    }
    let (rows, cols) = image_coarse.dim();
    let share = 1.0 / (factor * factor) as f64;
    Ok(Array2::from_shape_fn(
        (rows * factor, cols * factor),
        |(p, q)| image_coarse[[p / factor, q / factor]] * share,
    ))
}

/// Expand a coarse boolean mask to fine resolution.
///
/// Each fine pixel takes the value of its parent coarse pixel.
pub fn expand_mask(mask: ArrayView2<bool>, factor: usize) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    Array2::from_shape_fn((rows * factor, cols * factor), |(p, q)| {
        mask[[p / factor, q / factor]]
    })
}
