//! Convolution algorithm selection.
//!
//! A [`ConvEngine`] owns an explicit [`ConvEngineConfig`] and picks one of the
//! [`ConvBackend`] implementations per call, keyed on the kernel's total weight count.
//! There is no process-wide engine state: two engines with different configs can run
//! side by side.

use crate::error::{EngineError, Result};
use crate::ops::conv::{self, Conv2DConfig, DEFAULT_BLOCK_SIZE};
use crate::tensor::{FeatureMap, Kernel};

/// Below this many kernel weights the serial path wins over spawning workers.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 10_000;

/// A convolution implementation. All implementations compute the same function;
/// they differ only in loop order and scheduling.
pub trait ConvBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn conv2d(
        &self,
        input: &FeatureMap,
        kernel: &Kernel,
        bias: &[f32],
        config: Conv2DConfig,
    ) -> Result<FeatureMap>;
}

/// Serial direct convolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectBackend;

impl ConvBackend for DirectBackend {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn conv2d(
        &self,
        input: &FeatureMap,
        kernel: &Kernel,
        bias: &[f32],
        config: Conv2DConfig,
    ) -> Result<FeatureMap> {
        conv::conv2d(input, kernel, bias, config)
    }
}

/// Cache-blocked convolution.
#[derive(Debug, Clone, Copy)]
pub struct TiledBackend {
    pub block_size: usize,
}

impl Default for TiledBackend {
    fn default() -> Self {
        TiledBackend {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl ConvBackend for TiledBackend {
    fn name(&self) -> &'static str {
        "tiled"
    }

    fn conv2d(
        &self,
        input: &FeatureMap,
        kernel: &Kernel,
        bias: &[f32],
        config: Conv2DConfig,
    ) -> Result<FeatureMap> {
        conv::conv2d_tiled(input, kernel, bias, config, self.block_size)
    }
}

/// Filter-parallel convolution on a per-call worker pool.
#[cfg(feature = "parallel")]
#[derive(Debug, Clone, Copy)]
pub struct ParallelBackend {
    pub num_workers: usize,
}

#[cfg(feature = "parallel")]
impl ConvBackend for ParallelBackend {
    fn name(&self) -> &'static str {
        "filter-parallel"
    }

    fn conv2d(
        &self,
        input: &FeatureMap,
        kernel: &Kernel,
        bias: &[f32],
        config: Conv2DConfig,
    ) -> Result<FeatureMap> {
        conv::conv2d_parallel(input, kernel, bias, config, self.num_workers)
    }
}

/// Which path [`ConvEngine::conv2d`] takes for a given kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvStrategy {
    Direct,
    FilterParallel { workers: usize },
    Tiled { block_size: usize },
}

impl ConvStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConvStrategy::Direct => "direct",
            ConvStrategy::FilterParallel { .. } => "filter-parallel",
            ConvStrategy::Tiled { .. } => "tiled",
        }
    }
}

/// Engine settings, passed explicitly instead of living in shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvEngineConfig {
    /// Allow the filter-parallel path (also requires the `parallel` feature and >1 core).
    pub use_parallel: bool,
    /// Worker count for the parallel path; `None` picks `min(available cores, filters)`.
    pub num_workers: Option<usize>,
    /// Tile edge for the tiled path; 0 means [`DEFAULT_BLOCK_SIZE`].
    pub block_size: usize,
    /// Kernels with fewer weights than this always run serially.
    pub parallel_threshold: usize,
}

impl Default for ConvEngineConfig {
    fn default() -> Self {
        ConvEngineConfig {
            use_parallel: true,
            num_workers: None,
            block_size: DEFAULT_BLOCK_SIZE,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl ConvEngineConfig {
    pub fn with_parallel(mut self, use_parallel: bool) -> Self {
        self.use_parallel = use_parallel;
        self
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = Some(num_workers);
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConvEngine {
    config: ConvEngineConfig,
}

impl ConvEngine {
    pub fn new(config: ConvEngineConfig) -> Self {
        ConvEngine { config }
    }

    pub fn config(&self) -> &ConvEngineConfig {
        &self.config
    }

    /// Chooses a strategy from `filters * channels * size²`.
    pub fn select_strategy(&self, kernel: &Kernel) -> ConvStrategy {
        let total_weights = kernel.total_weights();
        if total_weights < self.config.parallel_threshold {
            return ConvStrategy::Direct;
        }
        let cpus = conv::available_cpus();
        if cfg!(feature = "parallel") && self.config.use_parallel && cpus > 1 {
            let workers = self
                .config
                .num_workers
                .unwrap_or(cpus)
                .clamp(1, kernel.filters().max(1));
            return ConvStrategy::FilterParallel { workers };
        }
        let block_size = if self.config.block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            self.config.block_size
        };
        ConvStrategy::Tiled { block_size }
    }

    /// The backend that runs `strategy`.
    pub fn backend_for(&self, strategy: ConvStrategy) -> Box<dyn ConvBackend> {
        match strategy {
            ConvStrategy::Direct => Box::new(DirectBackend),
            #[cfg(feature = "parallel")]
            ConvStrategy::FilterParallel { workers } => Box::new(ParallelBackend {
                num_workers: workers,
            }),
            #[cfg(not(feature = "parallel"))]
            ConvStrategy::FilterParallel { .. } => Box::new(TiledBackend::default()),
            ConvStrategy::Tiled { block_size } => Box::new(TiledBackend { block_size }),
        }
    }

    /// Runs a convolution on the strategy picked by [`ConvEngine::select_strategy`].
    pub fn conv2d(
        &self,
        input: &FeatureMap,
        kernel: &Kernel,
        bias: &[f32],
        config: Conv2DConfig,
    ) -> Result<FeatureMap> {
        let strategy = self.select_strategy(kernel);
        let backend = self.backend_for(strategy);
        log::debug!(
            "ConvEngine::conv2d: {} weights -> {} ({:?})",
            kernel.total_weights(),
            backend.name(),
            strategy
        );
        match backend.conv2d(input, kernel, bias, config) {
            Err(EngineError::WorkerPool(msg)) => {
                log::warn!(
                    "ConvEngine::conv2d: worker pool unavailable ({}), falling back to tiled path",
                    msg
                );
                TiledBackend {
                    block_size: self.config.block_size,
                }
                .conv2d(input, kernel, bias, config)
            }
            other => other,
        }
    }
}

impl ConvBackend for ConvEngine {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn conv2d(
        &self,
        input: &FeatureMap,
        kernel: &Kernel,
        bias: &[f32],
        config: Conv2DConfig,
    ) -> Result<FeatureMap> {
        ConvEngine::conv2d(self, input, kernel, bias, config)
    }
}
