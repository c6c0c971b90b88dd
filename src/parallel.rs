//! Parallel processing configuration
//!
//! Tools process one file at a time; within a file the element-wise grid
//! kernels (masking, differencing) run on Rayon's global pool, which is
//! configured here.

use crate::errors::{NoahMpError, Result};
use rayon::ThreadPoolBuilder;
use tracing::info;

/// Configuration for parallel processing
#[derive(Debug, Clone, Default)]
pub struct ParallelConfig {
    pub num_threads: Option<usize>,
}

impl ParallelConfig {
    /// Set up the global Rayon thread pool with the specified configuration
    pub fn setup_global_pool(&self) -> Result<()> {
        if let Some(num_threads) = self.num_threads {
            ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
                .map_err(|e| {
                    NoahMpError::ThreadPool(format!(
                        "Failed to initialize thread pool with {} threads: {}",
                        num_threads, e
                    ))
                })?;
            info!("configured grid kernels with {} threads", num_threads);
        }
        Ok(())
    }

    /// Get the current number of threads being used
    pub fn current_threads(&self) -> usize {
        rayon::current_num_threads()
    }

    /// Create a configuration that uses all available CPU cores
    pub fn all_cores() -> Self {
        Self {
            num_threads: Some(num_cpus::get()),
        }
    }

    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
        }
    }
}
