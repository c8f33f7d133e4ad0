//! zslicer: lazy slice-wise analysis of chunked arrays
//!
//! zslicer applies an expensive per-slice analysis function to a range of
//! coordinates along one axis of a large chunked array. Slices are read on
//! demand, analysed concurrently, and returned tagged with the coordinate they
//! came from.
//!
//! ## Pipeline
//!
//! 1. A [`LazyArray`](data_source::LazyArray) exposes shape and dtype and reads
//!    only the chunks a selection touches.
//! 2. A [`TaskGraphBuilder`](graph::TaskGraphBuilder) turns `(center, radius)`
//!    into a [`TaskGraph`](graph::TaskGraph) of deferred tasks. Nothing is
//!    read yet.
//! 3. A [`ParallelExecutor`](executor::ParallelExecutor) runs the graph:
//!    bounded concurrent fetches, slice operations on a rayon pool.
//! 4. A [`ResultStore`](results::ResultStore) holds the outcomes in submission
//!    order, each carrying its coordinate.
//!
//! ## Module Organization
//!
//! - [`data_source`]: the lazy array abstraction and an in-memory backend
//! - [`zarr_io`]: local Zarr v2 stores (lazy chunk reader, chunked writer)
//! - [`selection`]: coordinates and per-axis selectors
//! - [`operation`]: the slice operation trait
//! - [`statistics`]: built-in whole-slice statistics
//! - [`graph`]: task graph construction
//! - [`executor`]: parallel execution and failure policies
//! - [`results`]: ordered, coordinate-tagged results
//! - [`parallel`]: compute pool configuration
//! - [`errors`]: centralized error handling
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use ndarray::{ArrayD, IxDyn};
//! use zslicer::prelude::*;
//!
//! // Every element of slice z holds the value z
//! let data = ArrayD::from_shape_fn(IxDyn(&[1, 2, 10, 4, 4]), |idx| idx[2] as f32);
//! let array = Arc::new(InMemoryArray::new("volume", data));
//! let operation = Arc::new(from_fn(|slice: &ArrayD<f32>| {
//!     Ok::<_, SlicerError>(slice.mean().unwrap_or(f32::NAN) * 10.0)
//! }));
//!
//! let graph = TaskGraphBuilder::new(array, operation, 2)?.build(5, 2)?;
//! let executor = ParallelExecutor::new(ExecutorConfig::new().with_threads(2))?;
//! let results = executor.run_blocking(graph)?;
//!
//! let pairs: Vec<(f32, usize)> = results.pairs().map(|(v, c)| (*v, c.index())).collect();
//! assert_eq!(pairs, vec![(30.0, 3), (40.0, 4), (50.0, 5), (60.0, 6)]);
//! # Ok::<(), zslicer::SlicerError>(())
//! ```

// Core modules
pub mod data_source;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod operation;
pub mod parallel;
pub mod results;
pub mod selection;
pub mod statistics;
pub mod zarr_io;

// Direct re-exports for the public API
pub use data_source::{ArrayMetadata, InMemoryArray, LazyArray};
pub use errors::{BoxError, Result, SlicerError};
pub use executor::{ExecutorConfig, FailurePolicy, ParallelExecutor};
pub use graph::{Task, TaskGraph, TaskGraphBuilder};
pub use operation::{from_fn, FnOperation, SliceOperation};
pub use parallel::{get_parallel_info, ParallelConfig, ParallelInfo};
pub use results::{ResultStore, RunSummary, SliceResult, TaskOutcome};
pub use selection::{AxisSelection, Coordinate, Selector};
pub use statistics::{StatOperation, StatisticalReduction};
pub use zarr_io::{ZarrArray, ZarrReader, ZarrSource, ZarrWriter};

// High-level convenience API
pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::data_source::{ArrayMetadata, InMemoryArray, LazyArray};
    pub use crate::errors::{Result, SlicerError};
    pub use crate::executor::{ExecutorConfig, FailurePolicy, ParallelExecutor};
    pub use crate::graph::{TaskGraph, TaskGraphBuilder};
    pub use crate::operation::{from_fn, SliceOperation};
    pub use crate::parallel::ParallelConfig;
    pub use crate::results::{ResultStore, SliceResult, TaskOutcome};
    pub use crate::selection::{AxisSelection, Coordinate, Selector};
    pub use crate::statistics::StatOperation;
    pub use crate::zarr_io::{ZarrArray, ZarrReader, ZarrSource, ZarrWriter};
}
