//! psf-convolve - Adaptive multi-resolution PSF convolution
//!
//! Surface-brightness models are often evaluated on a supersampled grid so
//! that sharp structure is resolved, but convolving the whole supersampled
//! field with the PSF is expensive. This crate convolves at pixel resolution
//! everywhere and only corrects a caller-supplied set of active pixels with
//! a supersampled convolution:
//!
//! - **Kernel resampling** - coarse kernel from a supersampled PSF, with
//!   separate odd and even supersampling schemes, cropping and padding
//! - **Grid resampling** - flux-conserving block sums between grids
//! - **Full-field convolution** - zero-padded FFT convolution
//! - **Masked convolution** - direct convolution at active pixels only, at
//!   pixel and at supersampled resolution
//! - **Adaptive convolution** - the combination of the three passes
//!
//! # Example
//!
//! ```
//! use ndarray::Array2;
//! use psf_convolve::{gaussian_kernel, AdaptiveConvolution, AdaptiveConvolutionConfig};
//!
//! // 2x supersampled PSF, 5x5 pixel image with one active pixel
//! let kernel_super = gaussian_kernel(9, 1.5);
//! let mut active = Array2::from_elem((5, 5), false);
//! active[[2, 2]] = true;
//!
//! let config = AdaptiveConvolutionConfig::new(2);
//! let engine = AdaptiveConvolution::new(kernel_super.view(), active.view(), None, &config)?;
//!
//! let mut image_fine = Array2::zeros((10, 10));
//! image_fine[[4, 5]] = 100.0;
//! let image = engine.convolve(image_fine.view())?;
//! assert_eq!(image.dim(), (5, 5));
//! # Ok::<(), psf_convolve::ConvolutionError>(())
//! ```

pub mod adaptive;
pub mod config;
pub mod direct;
pub mod error;
pub mod fft;
pub mod kernel;
pub mod masked;
pub mod resample;
pub mod subgrid;

// Re-export commonly used types
pub use adaptive::{AdaptiveConvolution, ConvolutionParts};
pub use config::{AdaptiveConvolutionConfig, ExecutionOptions, FftStrategy, LoopStrategy};
pub use direct::convolve2d;
pub use error::{ConvolutionError, Result};
pub use fft::{convolve_fft, FftConvolver};
pub use kernel::{crop, gaussian_kernel, normalize, pad, SupersamplingFactor, FLUX_TOLERANCE};
pub use masked::{convolve_masked, ActivePixels, MaskedConvolver};
pub use resample::{downsample, expand_mask, upsample};
pub use subgrid::{convolve_subgrid, SubgridConvolver};
