//! Coordinates and per-axis selectors
//!
//! A [`Selector`] describes which part of an N-dimensional array to read:
//! one [`AxisSelection`] per axis. Axes selected with [`AxisSelection::Index`]
//! are dropped from the fetched array; all other axes are kept in order.

use crate::errors::{Result, SlicerError};
use std::fmt;
use std::ops::Range;

/// Index as a signed value for range errors, saturating at `i64::MAX`
pub(crate) fn signed(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Position of one unit of work along the analysed axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coordinate(pub usize);

impl Coordinate {
    /// The raw index along the analysed axis
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<usize> for Coordinate {
    fn from(value: usize) -> Self {
        Coordinate(value)
    }
}

/// Selection applied to a single axis
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxisSelection {
    /// Fix the axis at one index; the axis is removed from the output
    Index(usize),
    /// Half-open range `[start, end)`; the axis is kept
    Range(usize, usize),
    /// Whole axis
    Full,
}

impl AxisSelection {
    /// Half-open index range this selection covers on an axis of `extent`
    fn bounds(&self, extent: usize) -> (usize, usize) {
        match *self {
            AxisSelection::Index(i) => (i, i.saturating_add(1)),
            AxisSelection::Range(start, end) => (start, end),
            AxisSelection::Full => (0, extent),
        }
    }
}

/// One [`AxisSelection`] per array axis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    axes: Vec<AxisSelection>,
}

impl Selector {
    /// Selector covering the full extent of every axis of a `rank`-dimensional array
    #[must_use]
    pub fn full(rank: usize) -> Self {
        Self {
            axes: vec![AxisSelection::Full; rank],
        }
    }

    /// Build a selector from explicit per-axis selections
    #[must_use]
    pub fn new(axes: Vec<AxisSelection>) -> Self {
        Self { axes }
    }

    /// Replace the selection on `axis`
    ///
    /// # Errors
    ///
    /// Returns an error if `axis` is not an axis of this selector.
    pub fn set(&mut self, axis: usize, selection: AxisSelection) -> Result<()> {
        let rank = self.axes.len();
        let slot = self.axes.get_mut(axis).ok_or_else(|| SlicerError::InvalidSelection {
            message: format!("axis {axis} is out of bounds for rank {rank}"),
        })?;
        *slot = selection;
        Ok(())
    }

    /// Copy of this selector with `axis` fixed at `index`
    ///
    /// # Errors
    ///
    /// Returns an error if `axis` is not an axis of this selector.
    pub fn with_index(&self, axis: usize, index: usize) -> Result<Self> {
        let mut selector = self.clone();
        selector.set(axis, AxisSelection::Index(index))?;
        Ok(selector)
    }

    /// Per-axis selections
    #[must_use]
    pub fn axes(&self) -> &[AxisSelection] {
        &self.axes
    }

    /// Number of axes this selector addresses
    #[must_use]
    pub fn rank(&self) -> usize {
        self.axes.len()
    }

    /// Check the selector against an array shape
    ///
    /// # Errors
    ///
    /// Returns [`SlicerError::InvalidSelection`] on rank mismatch or an inverted
    /// range, and [`SlicerError::Range`] when an index or range
    /// exceeds the axis extent.
    pub fn validate(&self, shape: &[usize]) -> Result<()> {
        if self.axes.len() != shape.len() {
            return Err(SlicerError::InvalidSelection {
                message: format!(
                    "selector has {} axes but array has {}",
                    self.axes.len(),
                    shape.len()
                ),
            });
        }

        for (axis, (selection, &extent)) in self.axes.iter().zip(shape).enumerate() {
            match *selection {
                AxisSelection::Index(i) if i >= extent => {
                    return Err(SlicerError::Range {
                        axis,
                        start: signed(i),
                        end: signed(i).saturating_add(1),
                        extent,
                    });
                }
                AxisSelection::Range(start, end) if start > end => {
                    return Err(SlicerError::InvalidSelection {
                        message: format!("range {start}..{end} on axis {axis} is inverted"),
                    });
                }
                AxisSelection::Range(start, end) if end > extent => {
                    return Err(SlicerError::Range {
                        axis,
                        start: signed(start),
                        end: signed(end),
                        extent,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Per-axis half-open ranges covered by this selector, before index axes are dropped
    #[must_use]
    pub fn ranges(&self, shape: &[usize]) -> Vec<Range<usize>> {
        self.axes
            .iter()
            .zip(shape)
            .map(|(selection, &extent)| {
                let (start, end) = selection.bounds(extent);
                start..end
            })
            .collect()
    }

    /// Shape of the array returned by a fetch with this selector
    #[must_use]
    pub fn output_shape(&self, shape: &[usize]) -> Vec<usize> {
        self.axes
            .iter()
            .zip(shape)
            .filter(|(selection, _)| !matches!(selection, AxisSelection::Index(_)))
            .map(|(selection, &extent)| {
                let (start, end) = selection.bounds(extent);
                end - start
            })
            .collect()
    }

    /// Axes fixed by an index, in descending order so they can be removed one by one
    pub(crate) fn index_axes_descending(&self) -> Vec<(usize, usize)> {
        let mut fixed: Vec<(usize, usize)> = self
            .axes
            .iter()
            .enumerate()
            .filter_map(|(axis, selection)| match *selection {
                AxisSelection::Index(i) => Some((axis, i)),
                _ => None,
            })
            .collect();
        fixed.reverse();
        fixed
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, selection) in self.axes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match selection {
                AxisSelection::Index(idx) => write!(f, "{idx}")?,
                AxisSelection::Range(start, end) => write!(f, "{start}:{end}")?,
                AxisSelection::Full => write!(f, ":")?,
            }
        }
        write!(f, "]")
    }
}
