//! Construction-time configuration for the adaptive convolution engine
//!
//! Execution hints only change how the work is scheduled, never the result.

use serde::{Deserialize, Serialize};

/// How masked passes walk the active pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoopStrategy {
    /// Iterate a coordinate list built once from the active mask.
    #[default]
    ActiveList,
    /// Scan the full mask on every call.
    MaskScan,
}

/// How the full-field pass is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FftStrategy {
    /// Plan and transform the kernel on every call.
    #[default]
    Dynamic,
    /// Transform the kernel once for the configured image shape.
    Static,
    /// Dense direct-space convolution, cheaper for very small kernels.
    Direct,
}

/// Scheduling hints for the convolution passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Run the passes and per-pixel loops on the rayon thread pool
    pub parallel: bool,
    /// Active pixel iteration for the masked passes
    pub loop_strategy: LoopStrategy,
    /// Full-field convolution method
    pub fft_strategy: FftStrategy,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            loop_strategy: LoopStrategy::ActiveList,
            fft_strategy: FftStrategy::Dynamic,
        }
    }
}

impl ExecutionOptions {
    /// Single-threaded execution with otherwise default settings.
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }
}

/// Configuration for [`crate::AdaptiveConvolution`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptiveConvolutionConfig {
    /// Fine pixels per coarse pixel along each axis
    pub supersampling_factor: usize,
    /// Odd side length, in coarse pixels, of the kernel used by the masked
    /// passes. `None` uses the full coarse kernel.
    #[serde(default)]
    pub supersampling_size: Option<usize>,
    /// Scheduling hints
    #[serde(default)]
    pub execution: ExecutionOptions,
}

impl AdaptiveConvolutionConfig {
    /// Configuration with the full kernel footprint and default execution.
    pub fn new(supersampling_factor: usize) -> Self {
        Self {
            supersampling_factor,
            supersampling_size: None,
            execution: ExecutionOptions::default(),
        }
    }

    /// Restrict the masked passes to a `size × size` coarse kernel footprint.
    pub fn with_supersampling_size(mut self, size: usize) -> Self {
        self.supersampling_size = Some(size);
        self
    }

    /// Replace the execution hints.
    pub fn with_execution(mut self, execution: ExecutionOptions) -> Self {
        self.execution = execution;
        self
    }
}
