//! Built-in slice statistics
//!
//! Whole-slice reductions (mean, sum, min, max) usable directly as a
//! [`SliceOperation`](crate::operation::SliceOperation).
//!
//! # Organization
//!
//! - [`operations`]: the [`StatOperation`] selector and its operation impl
//! - [`reductions`]: parallel reduction kernels

pub mod operations;
pub mod reductions;

pub use operations::{StatOperation, StatisticalReduction};
pub use reductions::{parallel_max, parallel_mean, parallel_min, parallel_sum};
