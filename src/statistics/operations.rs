//! Whole-slice statistics and their operation impl

use crate::errors::{BoxError, Result, SlicerError};
use crate::operation::SliceOperation;
use ndarray::ArrayD;
use std::str::FromStr;

/// Supported statistical operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatOperation {
    /// Arithmetic mean
    Mean,
    /// Sum of values
    Sum,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
}

impl StatOperation {
    /// Get the string representation of the operation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Min => "minimum",
            Self::Max => "maximum",
        }
    }
}

impl FromStr for StatOperation {
    type Err = SlicerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "sum" => Ok(Self::Sum),
            "min" | "minimum" => Ok(Self::Min),
            "max" | "maximum" => Ok(Self::Max),
            other => Err(SlicerError::Generic(format!(
                "Unknown statistic '{other}', expected one of mean, sum, min, max"
            ))),
        }
    }
}

/// Trait for arrays that can be reduced to a single statistic
pub trait StatisticalReduction {
    /// Reduce every element to one value
    fn reduce_all(&self, operation: StatOperation) -> f32;
}

impl StatisticalReduction for ArrayD<f32> {
    fn reduce_all(&self, operation: StatOperation) -> f32 {
        match operation {
            StatOperation::Mean => super::reductions::parallel_mean(self),
            StatOperation::Sum => super::reductions::parallel_sum(self),
            StatOperation::Min => super::reductions::parallel_min(self),
            StatOperation::Max => super::reductions::parallel_max(self),
        }
    }
}

impl SliceOperation for StatOperation {
    type Output = f32;

    fn apply(&self, slice: &ArrayD<f32>) -> std::result::Result<f32, BoxError> {
        Ok(slice.reduce_all(*self))
    }
}
