//! Centralized error handling for zslicer
//!
//! Every failure that can be attributed to a single unit of work carries the
//! [`Coordinate`] of that unit, so callers can tell which slice failed without
//! relying on the position of an outcome in a result sequence.

use crate::selection::Coordinate;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by caller-supplied slice operations
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for zslicer operations
#[derive(Debug, Error)]
pub enum SlicerError {
    /// Requested coordinates fall outside the extent of an axis
    #[error("range [{start}, {end}) exceeds extent {extent} of axis {axis}")]
    Range {
        axis: usize,
        start: i64,
        end: i64,
        extent: usize,
    },

    /// Selector does not match the array it is applied to
    #[error("invalid selection: {message}")]
    InvalidSelection { message: String },

    /// Reading the slice at a coordinate failed
    #[error("fetch failed at coordinate {coordinate}: {source}")]
    Fetch {
        coordinate: Coordinate,
        #[source]
        source: Box<SlicerError>,
    },

    /// The slice operation returned an error (or panicked) for a coordinate
    #[error("operation failed at coordinate {coordinate}: {source}")]
    Operation {
        coordinate: Coordinate,
        #[source]
        source: BoxError,
    },

    /// A task did not complete within the configured per-task timeout
    #[error("task at coordinate {coordinate} timed out after {timeout:?}")]
    TaskTimeout {
        coordinate: Coordinate,
        timeout: Duration,
    },

    /// The compute pool dropped a task before it reported back
    #[error("task at coordinate {coordinate} was cancelled")]
    Cancelled { coordinate: Coordinate },

    /// Array not found in a Zarr store
    #[error("Array '{array}' not found in store")]
    ArrayNotFound { array: String },

    /// Zarr metadata or chunk decoding errors
    #[error("Zarr error: {0}")]
    ZarrError(String),

    /// Thread pool configuration error
    #[error("Thread pool error: {0}")]
    ThreadPoolError(String),

    /// I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Array shape or dimension error
    #[error("Array error: {0}")]
    ArrayError(#[from] ndarray::ShapeError),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

impl SlicerError {
    /// Coordinate of the task this error is attributed to, if any
    pub fn coordinate(&self) -> Option<Coordinate> {
        match self {
            SlicerError::Fetch { coordinate, .. }
            | SlicerError::Operation { coordinate, .. }
            | SlicerError::TaskTimeout { coordinate, .. }
            | SlicerError::Cancelled { coordinate } => Some(*coordinate),
            _ => None,
        }
    }

    /// True for errors produced by a single task rather than by the run setup
    pub fn is_task_error(&self) -> bool {
        self.coordinate().is_some()
    }
}

impl From<String> for SlicerError {
    fn from(error: String) -> Self {
        SlicerError::Generic(error)
    }
}

impl From<&str> for SlicerError {
    fn from(error: &str) -> Self {
        SlicerError::Generic(error.to_string())
    }
}

/// Result type alias for zslicer operations
pub type Result<T> = std::result::Result<T, SlicerError>;
