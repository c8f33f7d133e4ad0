//! Coordinate-tagged results of a run
//!
//! Results are addressed by the position of their task in the submitted
//! graph, never by coordinate value. Every entry carries its coordinate so
//! consumers never have to infer it from the position.

use crate::errors::{Result, SlicerError};
use crate::selection::Coordinate;
use chrono::{DateTime, Utc};
use std::ops::Index;
use std::time::Duration;

/// Successful output of one task
#[derive(Debug, Clone, PartialEq)]
pub struct SliceResult<O> {
    /// Position of the task in the submitted graph
    pub index: usize,
    /// Coordinate the slice was taken at
    pub coordinate: Coordinate,
    /// Output of the slice operation
    pub value: O,
}

/// Outcome of one task, success or failure
#[derive(Debug)]
pub struct TaskOutcome<O> {
    pub index: usize,
    pub coordinate: Coordinate,
    pub outcome: Result<O>,
}

impl<O> TaskOutcome<O> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&O> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&SlicerError> {
        self.outcome.as_ref().err()
    }

    /// Convert into a [`SliceResult`], surfacing the task's error
    pub fn into_result(self) -> Result<SliceResult<O>> {
        let TaskOutcome {
            index,
            coordinate,
            outcome,
        } = self;
        outcome.map(|value| SliceResult {
            index,
            coordinate,
            value,
        })
    }
}

/// Bookkeeping for a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl RunSummary {
    /// Print the summary in a formatted way
    pub fn print(&self) {
        println!(
            "📊 Run started {}: {} task(s), {} succeeded, {} failed in {:.3}s",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.submitted,
            self.succeeded,
            self.failed,
            self.elapsed.as_secs_f64()
        );
    }
}

/// Outcomes of a run in submission order; read-only once returned
#[derive(Debug)]
pub struct ResultStore<O> {
    outcomes: Vec<TaskOutcome<O>>,
    summary: RunSummary,
}

impl<O> ResultStore<O> {
    pub(crate) fn new(
        outcomes: Vec<TaskOutcome<O>>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_ok()).count();
        let summary = RunSummary {
            started_at,
            elapsed,
            submitted: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
        };
        Self { outcomes, summary }
    }

    /// Number of outcomes; always equals the number of submitted tasks
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Outcome of the task submitted at position `index`
    pub fn get(&self, index: usize) -> Option<&TaskOutcome<O>> {
        self.outcomes.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TaskOutcome<O>> {
        self.outcomes.iter()
    }

    pub fn outcomes(&self) -> &[TaskOutcome<O>] {
        &self.outcomes
    }

    /// Outcome for `coordinate`, if it was part of the run
    pub fn find(&self, coordinate: Coordinate) -> Option<&TaskOutcome<O>> {
        self.outcomes.iter().find(|o| o.coordinate == coordinate)
    }

    /// Coordinates in submission order
    pub fn coordinates(&self) -> Vec<Coordinate> {
        self.outcomes.iter().map(|o| o.coordinate).collect()
    }

    /// `(value, coordinate)` pairs of the successful tasks, in submission order
    pub fn pairs(&self) -> impl Iterator<Item = (&O, Coordinate)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|o| o.value().map(|v| (v, o.coordinate)))
    }

    /// Successful outcomes
    pub fn successes(&self) -> impl Iterator<Item = &TaskOutcome<O>> + '_ {
        self.outcomes.iter().filter(|o| o.is_ok())
    }

    /// Failed outcomes
    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome<O>> + '_ {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// All results in submission order, or the first failure in submission order
    pub fn into_results(self) -> Result<Vec<SliceResult<O>>> {
        self.outcomes
            .into_iter()
            .map(TaskOutcome::into_result)
            .collect()
    }
}

impl<O> Index<usize> for ResultStore<O> {
    type Output = TaskOutcome<O>;

    fn index(&self, index: usize) -> &TaskOutcome<O> {
        &self.outcomes[index]
    }
}

impl<'a, O> IntoIterator for &'a ResultStore<O> {
    type Item = &'a TaskOutcome<O>;
    type IntoIter = std::slice::Iter<'a, TaskOutcome<O>>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.iter()
    }
}
