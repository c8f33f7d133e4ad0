//! Deferred task graphs
//!
//! A [`TaskGraphBuilder`] turns a coordinate range along one axis of a
//! [`LazyArray`] into a [`TaskGraph`]: an ordered list of [`Task`]s, each
//! recording which slice to fetch. The array and the operation are shared by
//! the whole graph. Building reads only the array's shape; no slice is fetched
//! and no operation runs until an executor consumes the graph.
//!
//! Range validation is eager. Coordinates outside the axis extent are
//! rejected at build time with [`SlicerError::Range`].

use crate::data_source::LazyArray;
use crate::errors::{Result, SlicerError};
use crate::operation::SliceOperation;
use crate::selection::{signed, AxisSelection, Coordinate, Selector};
use log::debug;
use std::collections::HashSet;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// One unit of deferred work: fetch the slice at `coordinate`, then analyse it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    index: usize,
    coordinate: Coordinate,
    selector: Selector,
}

impl Task {
    /// Position of the task in its graph
    pub fn index(&self) -> usize {
        self.index
    }

    /// Coordinate along the analysed axis
    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    /// Selector the task will fetch
    pub fn selector(&self) -> &Selector {
        &self.selector
    }
}

/// Ordered, read-only collection of tasks sharing one array and one operation
pub struct TaskGraph<A: ?Sized, Op: ?Sized> {
    array: Arc<A>,
    operation: Arc<Op>,
    axis: usize,
    tasks: Vec<Task>,
}

impl<A: ?Sized, Op: ?Sized> Clone for TaskGraph<A, Op> {
    fn clone(&self) -> Self {
        Self {
            array: Arc::clone(&self.array),
            operation: Arc::clone(&self.operation),
            axis: self.axis,
            tasks: self.tasks.clone(),
        }
    }
}

impl<A: ?Sized, Op: ?Sized> fmt::Debug for TaskGraph<A, Op> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGraph")
            .field("axis", &self.axis)
            .field("tasks", &self.tasks)
            .finish_non_exhaustive()
    }
}

impl<A: ?Sized, Op: ?Sized> TaskGraph<A, Op> {
    /// Tasks in submission order
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Coordinates of the tasks in submission order
    pub fn coordinates(&self) -> Vec<Coordinate> {
        self.tasks.iter().map(Task::coordinate).collect()
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True if the graph holds no task
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Axis the coordinates index
    pub fn axis(&self) -> usize {
        self.axis
    }

    /// Array the tasks read from
    pub fn array(&self) -> &Arc<A> {
        &self.array
    }

    /// Operation applied to every slice
    pub fn operation(&self) -> &Arc<Op> {
        &self.operation
    }

    pub(crate) fn into_parts(self) -> (Arc<A>, Arc<Op>, Vec<Task>) {
        (self.array, self.operation, self.tasks)
    }
}

/// Builds [`TaskGraph`]s along one axis of an array
pub struct TaskGraphBuilder<A: ?Sized, Op: ?Sized> {
    array: Arc<A>,
    operation: Arc<Op>,
    axis: usize,
    template: Selector,
}

impl<A, Op> TaskGraphBuilder<A, Op>
where
    A: LazyArray + ?Sized,
    Op: SliceOperation + ?Sized,
{
    /// Builder analysing `axis` of `array`; every other axis is read in full
    ///
    /// # Errors
    ///
    /// Returns an error if `axis` is not an axis of the array.
    pub fn new(array: Arc<A>, operation: Arc<Op>, axis: usize) -> Result<Self> {
        let rank = array.shape().len();
        if axis >= rank {
            return Err(SlicerError::InvalidSelection {
                message: format!("axis {axis} is out of bounds for array of rank {rank}"),
            });
        }
        let template = Selector::full(rank);
        Ok(Self {
            array,
            operation,
            axis,
            template,
        })
    }

    /// Builder analysing the axis called `name`
    ///
    /// # Errors
    ///
    /// Returns an error if the array has no dimension with that name.
    pub fn for_dimension(array: Arc<A>, operation: Arc<Op>, name: &str) -> Result<Self> {
        let axis = array
            .metadata()
            .axis_of(name)
            .ok_or_else(|| SlicerError::InvalidSelection {
                message: format!(
                    "dimension '{name}' not found in array '{}'",
                    array.metadata().name
                ),
            })?;
        Self::new(array, operation, axis)
    }

    /// Pin another axis to a single index for every task
    ///
    /// # Errors
    ///
    /// Returns an error if `axis` is the analysed axis or `index` is out of range.
    pub fn fix(self, axis: usize, index: usize) -> Result<Self> {
        self.with_selection(axis, AxisSelection::Index(index))
    }

    /// Set the selection of another axis for every task
    ///
    /// # Errors
    ///
    /// Returns an error if `axis` is the analysed axis or the selection does
    /// not fit the array.
    pub fn with_selection(mut self, axis: usize, selection: AxisSelection) -> Result<Self> {
        if axis == self.axis {
            return Err(SlicerError::InvalidSelection {
                message: format!("axis {axis} is the analysed axis and cannot be pinned"),
            });
        }
        self.template.set(axis, selection)?;
        self.template.validate(self.array.shape())?;
        Ok(self)
    }

    /// Axis the builder enumerates
    pub fn axis(&self) -> usize {
        self.axis
    }

    fn extent(&self) -> usize {
        self.array.shape()[self.axis]
    }

    /// Tasks for coordinates `[center - radius, center + radius)`
    ///
    /// Produces exactly `2 * radius` strictly increasing coordinates. A zero
    /// radius yields an empty graph for any `center`.
    ///
    /// # Errors
    ///
    /// Returns [`SlicerError::Range`] if a non-empty range starts below zero
    /// or ends past the axis extent.
    pub fn build(&self, center: usize, radius: usize) -> Result<TaskGraph<A, Op>> {
        if radius == 0 {
            return self.assemble(Vec::new());
        }
        let extent = self.extent();
        match (center.checked_sub(radius), center.checked_add(radius)) {
            (Some(start), Some(end)) if end <= extent => self.build_range(start..end),
            _ => Err(SlicerError::Range {
                axis: self.axis,
                start: signed(center).saturating_sub(signed(radius)),
                end: signed(center).saturating_add(signed(radius)),
                extent,
            }),
        }
    }

    /// Tasks for every coordinate in `range`, in increasing order
    ///
    /// # Errors
    ///
    /// Returns an error if the range is inverted or exceeds the axis extent.
    pub fn build_range(&self, range: Range<usize>) -> Result<TaskGraph<A, Op>> {
        let extent = self.extent();
        if range.start > range.end {
            return Err(SlicerError::InvalidSelection {
                message: format!("range {}..{} is inverted", range.start, range.end),
            });
        }
        if range.end > extent {
            return Err(SlicerError::Range {
                axis: self.axis,
                start: signed(range.start),
                end: signed(range.end),
                extent,
            });
        }
        self.assemble(range)
    }

    /// Tasks for arbitrary coordinates, kept in the order given
    ///
    /// # Errors
    ///
    /// Returns an error if a coordinate is out of range or repeated.
    pub fn build_coordinates<I>(&self, coordinates: I) -> Result<TaskGraph<A, Op>>
    where
        I: IntoIterator<Item = usize>,
    {
        let extent = self.extent();
        let coordinates: Vec<usize> = coordinates.into_iter().collect();
        let mut seen = HashSet::with_capacity(coordinates.len());

        for &c in &coordinates {
            if c >= extent {
                return Err(SlicerError::Range {
                    axis: self.axis,
                    start: signed(c),
                    end: signed(c).saturating_add(1),
                    extent,
                });
            }
            if !seen.insert(c) {
                return Err(SlicerError::InvalidSelection {
                    message: format!("coordinate {c} appears more than once"),
                });
            }
        }
        self.assemble(coordinates)
    }

    fn assemble<I>(&self, coordinates: I) -> Result<TaskGraph<A, Op>>
    where
        I: IntoIterator<Item = usize>,
    {
        let tasks = coordinates
            .into_iter()
            .enumerate()
            .map(|(index, c)| -> Result<Task> {
                Ok(Task {
                    index,
                    coordinate: Coordinate(c),
                    selector: self.template.with_index(self.axis, c)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Built task graph over '{}' axis {}: {} task(s)",
            self.array.metadata().name,
            self.axis,
            tasks.len()
        );

        Ok(TaskGraph {
            array: Arc::clone(&self.array),
            operation: Arc::clone(&self.operation),
            axis: self.axis,
            tasks,
        })
    }
}
