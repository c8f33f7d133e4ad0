//! Parallel processing configuration
//!
//! Sizing of the rayon pool that runs slice operations, and a snapshot of
//! the parallelism the host offers.

use crate::errors::{Result, SlicerError};
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Configuration for the compute pool
#[derive(Debug, Clone, Default)]
pub struct ParallelConfig {
    /// Number of compute threads; `None` means one per CPU core
    pub num_threads: Option<usize>,
}

impl ParallelConfig {
    pub fn new(num_threads: Option<usize>) -> Self {
        Self { num_threads }
    }

    /// One compute thread per logical core
    pub fn all_cores() -> Self {
        Self::new(Some(num_cpus::get()))
    }

    /// Exactly `num_threads` compute threads; zero means one per core
    pub fn with_threads(num_threads: usize) -> Self {
        Self::new(Some(num_threads))
    }

    /// Number of threads a pool built from this configuration will have
    pub fn resolved_threads(&self) -> usize {
        self.num_threads
            .filter(|&n| n > 0)
            .unwrap_or_else(num_cpus::get)
            .max(1)
    }

    /// Build a dedicated thread pool, leaving rayon's global pool untouched
    pub fn build_pool(&self) -> Result<ThreadPool> {
        let num_threads = self.resolved_threads();
        ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("zslicer-compute-{}", i))
            .build()
            .map_err(|e| {
                SlicerError::ThreadPoolError(format!(
                    "Failed to initialize thread pool with {} threads: {}",
                    num_threads, e
                ))
            })
    }
}

/// Snapshot of the parallelism the host offers
pub fn get_parallel_info() -> ParallelInfo {
    let available_parallelism = std::thread::available_parallelism().map_or(1, |p| p.get());
    ParallelInfo {
        current_threads: rayon::current_num_threads(),
        available_cores: num_cpus::get(),
        physical_cores: num_cpus::get_physical(),
        available_parallelism,
    }
}

/// Host parallelism as seen by rayon and the OS
#[derive(Debug, Clone)]
pub struct ParallelInfo {
    /// Threads in rayon's global pool; executors use their own pool
    pub current_threads: usize,
    pub available_cores: usize,
    pub physical_cores: usize,
    /// May be lower than `available_cores` under a cgroup CPU quota
    pub available_parallelism: usize,
}

impl ParallelInfo {
    pub fn print_info(&self) {
        println!("📊 Host parallelism:");
        println!(
            "   Cores: {} logical, {} physical",
            self.available_cores, self.physical_cores
        );
        println!("   Available parallelism: {}", self.available_parallelism);
        println!("   Rayon global pool: {} threads", self.current_threads);
    }
}
