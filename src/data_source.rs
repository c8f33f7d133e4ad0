//! Lazy array abstraction consumed by the task graph and executor
//!
//! A [`LazyArray`] exposes shape and dtype without touching data, and reads
//! only the part of the array covered by a [`Selector`] on demand. Backends
//! live in their own modules; [`InMemoryArray`] is the trivial one.

use crate::errors::Result;
use crate::selection::Selector;
use async_trait::async_trait;
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Axis, Slice};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::ops::Range;

/// Metadata for array-like data
#[derive(Debug, Clone)]
pub struct ArrayMetadata {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
    pub chunks: Vec<usize>,
    pub dimensions: Vec<String>,
    pub attributes: HashMap<String, JsonValue>,
}

impl ArrayMetadata {
    /// Metadata for an unchunked array with default dimension names
    pub fn new(name: impl Into<String>, shape: Vec<usize>, dtype: impl Into<String>) -> Self {
        let dimensions = default_dimension_names(shape.len());
        Self {
            name: name.into(),
            chunks: shape.clone(),
            shape,
            dtype: dtype.into(),
            dimensions,
            attributes: HashMap::new(),
        }
    }

    /// Number of axes
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Index of the axis called `name`
    pub fn axis_of(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d == name)
    }

    /// Print array metadata in a formatted way
    pub fn print(&self) {
        println!("Array: {}", self.name);
        println!("  Shape: {:?}", self.shape);
        println!("  Dimensions: {:?}", self.dimensions);
        println!("  Data type: {}", self.dtype);
        println!("  Chunks: {:?}", self.chunks);
        println!("  Attributes:");
        for (key, value) in &self.attributes {
            println!("    {}: {}", key, value);
        }
    }
}

pub(crate) fn default_dimension_names(rank: usize) -> Vec<String> {
    (0..rank).map(|i| format!("dim_{}", i)).collect()
}

/// A multi-dimensional array whose data is read on demand
///
/// Implementations must return identical data for identical selectors for the
/// duration of a run, and a fetch either yields the complete slice or an
/// error. Fetches take `&self` and may be issued concurrently.
#[async_trait]
pub trait LazyArray: Send + Sync {
    /// Array metadata; never performs I/O
    fn metadata(&self) -> &ArrayMetadata;

    /// Per-axis extents
    fn shape(&self) -> &[usize] {
        &self.metadata().shape
    }

    /// Element type descriptor of the stored data
    fn dtype(&self) -> &str {
        &self.metadata().dtype
    }

    /// Read the dense sub-array covered by `selector`
    ///
    /// Axes fixed by an index are dropped from the result.
    async fn fetch(&self, selector: &Selector) -> Result<ArrayD<f32>>;
}

/// Fully materialised array served through the [`LazyArray`] interface
#[derive(Debug, Clone)]
pub struct InMemoryArray {
    metadata: ArrayMetadata,
    data: ArrayD<f32>,
}

impl InMemoryArray {
    /// Wrap an existing array
    pub fn new(name: impl Into<String>, data: ArrayD<f32>) -> Self {
        let metadata = ArrayMetadata::new(name, data.shape().to_vec(), "<f4");
        Self { metadata, data }
    }

    /// Name the dimensions of the array
    ///
    /// # Errors
    ///
    /// Returns an error if the number of names does not match the rank.
    pub fn with_dimensions(mut self, dimensions: Vec<String>) -> Result<Self> {
        if dimensions.len() != self.metadata.rank() {
            return Err(crate::errors::SlicerError::InvalidSelection {
                message: format!(
                    "{} dimension names given for an array of rank {}",
                    dimensions.len(),
                    self.metadata.rank()
                ),
            });
        }
        self.metadata.dimensions = dimensions;
        Ok(self)
    }

    /// The underlying data
    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }
}

#[async_trait]
impl LazyArray for InMemoryArray {
    fn metadata(&self) -> &ArrayMetadata {
        &self.metadata
    }

    async fn fetch(&self, selector: &Selector) -> Result<ArrayD<f32>> {
        selector.validate(self.shape())?;
        Ok(select(self.data.view(), selector))
    }
}

/// Apply `selector` to a view; the selector must already be validated
pub(crate) fn select(data: ArrayViewD<'_, f32>, selector: &Selector) -> ArrayD<f32> {
    let ranges = selector.ranges(data.shape());
    let mut view = data;
    narrow(&mut view, &ranges);
    for (axis, _) in selector.index_axes_descending() {
        view = view.index_axis_move(Axis(axis), 0);
    }
    view.to_owned()
}

/// Restrict every axis of a view to the given half-open ranges
pub(crate) fn narrow(view: &mut ArrayViewD<'_, f32>, ranges: &[Range<usize>]) {
    for (axis, range) in ranges.iter().enumerate() {
        view.slice_axis_inplace(Axis(axis), Slice::from(range.start..range.end));
    }
}

/// Mutable counterpart of [`narrow`]
pub(crate) fn narrow_mut(view: &mut ArrayViewMutD<'_, f32>, ranges: &[Range<usize>]) {
    for (axis, range) in ranges.iter().enumerate() {
        view.slice_axis_inplace(Axis(axis), Slice::from(range.start..range.end));
    }
}
