//! Tests for parallel execution, ordering and failure policies

use async_trait::async_trait;
use futures::StreamExt;
use ndarray::{ArrayD, IxDyn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use zslicer::prelude::*;
use zslicer::{BoxError, FnOperation};

/// Volume of shape (1, 2, 10, 4, 4) whose slice z holds the value z everywhere
fn volume() -> ArrayD<f32> {
    ArrayD::from_shape_fn(IxDyn(&[1, 2, 10, 4, 4]), |idx| idx[2] as f32)
}

/// The z value a slice of [`volume`] was taken at
fn slice_z(slice: &ArrayD<f32>) -> usize {
    slice.iter().next().copied().unwrap_or(f32::NAN) as usize
}

fn times_ten() -> FnOperation<usize> {
    from_fn(|slice: &ArrayD<f32>| Ok::<_, BoxError>(slice_z(slice) * 10))
}

fn coordinate_of(selector: &Selector, axis: usize) -> usize {
    match selector.axes()[axis] {
        AxisSelection::Index(c) => c,
        _ => usize::MAX,
    }
}

/// Wraps an in-memory array, counting fetches and optionally delaying or failing some
struct InstrumentedArray {
    inner: InMemoryArray,
    fetches: AtomicUsize,
    slow: Option<(usize, Duration)>,
    failing: Option<usize>,
    panicking: Option<usize>,
}

impl InstrumentedArray {
    fn new() -> Self {
        Self {
            inner: InMemoryArray::new("volume", volume()),
            fetches: AtomicUsize::new(0),
            slow: None,
            failing: None,
            panicking: None,
        }
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LazyArray for InstrumentedArray {
    fn metadata(&self) -> &ArrayMetadata {
        self.inner.metadata()
    }

    async fn fetch(&self, selector: &Selector) -> zslicer::Result<ArrayD<f32>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let z = coordinate_of(selector, 2);
        if let Some((slow_z, delay)) = self.slow {
            if z == slow_z {
                tokio::time::sleep(delay).await;
            }
        }
        if self.panicking == Some(z) {
            panic!("decoder bug at z={}", z);
        }
        if self.failing == Some(z) {
            return Err(SlicerError::ZarrError(format!("chunk for z={} unreadable", z)));
        }
        self.inner.fetch(selector).await
    }
}

fn executor(policy: FailurePolicy) -> ParallelExecutor {
    ParallelExecutor::new(ExecutorConfig::new().with_threads(4).with_policy(policy)).unwrap()
}

#[tokio::test]
async fn test_end_to_end_example() -> Result<()> {
    let array = Arc::new(InstrumentedArray::new());
    let graph = TaskGraphBuilder::new(Arc::clone(&array), Arc::new(times_ten()), 2)?.build(5, 2)?;
    assert_eq!(array.fetches(), 0);

    let results = executor(FailurePolicy::FailFast).run(graph).await?;
    let pairs: Vec<(usize, Coordinate)> = results.pairs().map(|(v, c)| (*v, c)).collect();
    assert_eq!(
        pairs,
        vec![
            (30, Coordinate(3)),
            (40, Coordinate(4)),
            (50, Coordinate(5)),
            (60, Coordinate(6)),
        ]
    );
    assert_eq!(array.fetches(), 4);

    let summary = results.summary();
    assert_eq!((summary.submitted, summary.succeeded, summary.failed), (4, 4, 0));
    Ok(())
}

#[tokio::test]
async fn test_results_follow_submission_order() -> Result<()> {
    // Earlier slices take longer, so completion order is roughly reversed
    let slow_first = Arc::new(from_fn(|slice: &ArrayD<f32>| {
        let z = slice_z(slice);
        std::thread::sleep(Duration::from_millis(((10 - z) * 25) as u64));
        Ok::<_, BoxError>(z)
    }));
    let array = Arc::new(InMemoryArray::new("volume", volume()));
    let builder = TaskGraphBuilder::new(array, slow_first, 2)?;
    let executor =
        ParallelExecutor::new(ExecutorConfig::new().with_threads(10).with_max_in_flight(10))?;

    let mut arrival = Vec::new();
    let mut stream = Box::pin(executor.run_stream(builder.build(5, 5)?));
    while let Some(outcome) = stream.next().await {
        assert_eq!(outcome.value().copied(), Some(outcome.coordinate.index()));
        arrival.push(outcome.coordinate.index());
    }
    assert_eq!(arrival.len(), 10);
    assert_ne!(arrival, (0..10).collect::<Vec<_>>());

    let results = executor.run(builder.build(5, 5)?).await?.into_results()?;
    assert_eq!(results.len(), 10);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.index, i);
        assert_eq!(result.coordinate, Coordinate(i));
        assert_eq!(result.value, i);
    }
    Ok(())
}

#[tokio::test]
async fn test_unordered_coordinates_keep_their_tags() -> Result<()> {
    let array = Arc::new(InMemoryArray::new("volume", volume()));
    let graph = TaskGraphBuilder::new(array, Arc::new(times_ten()), 2)?.build_coordinates([8, 1, 4])?;

    let results = executor(FailurePolicy::FailFast).run(graph).await?;
    assert_eq!(results.coordinates(), vec![Coordinate(8), Coordinate(1), Coordinate(4)]);
    assert_eq!(results[1].value(), Some(&10));
    assert_eq!(results.find(Coordinate(8)).and_then(|o| o.value()), Some(&80));
    assert!(results.find(Coordinate(0)).is_none());
    Ok(())
}

#[tokio::test]
async fn test_run_is_idempotent() -> Result<()> {
    let array = Arc::new(InMemoryArray::new("volume", volume()));
    let graph = TaskGraphBuilder::new(array, Arc::new(StatOperation::Mean), 2)?.build(4, 3)?;
    let executor = executor(FailurePolicy::FailFast);

    let first: Vec<f32> = executor.run(graph.clone()).await?.pairs().map(|(v, _)| *v).collect();
    let second: Vec<f32> = executor.run(graph).await?.pairs().map(|(v, _)| *v).collect();
    assert_eq!(first, second);
    assert_eq!(first, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    Ok(())
}

#[tokio::test]
async fn test_empty_graph_runs_without_fetching() -> Result<()> {
    let array = Arc::new(InstrumentedArray::new());
    let graph = TaskGraphBuilder::new(Arc::clone(&array), Arc::new(times_ten()), 2)?.build(5, 0)?;
    assert!(graph.is_empty());

    let results = executor(FailurePolicy::BestEffort).run(graph.clone()).await?;
    assert!(results.is_empty());
    assert_eq!(results.summary().submitted, 0);

    let streamed: Vec<_> = executor(FailurePolicy::FailFast).run_stream(graph).collect().await;
    assert!(streamed.is_empty());
    assert_eq!(array.fetches(), 0);
    Ok(())
}

fn fails_at_four() -> FnOperation<usize> {
    from_fn(|slice: &ArrayD<f32>| {
        let z = slice_z(slice);
        if z == 4 {
            Err::<usize, BoxError>("segmentation diverged".into())
        } else {
            Ok(z * 10)
        }
    })
}

#[tokio::test]
async fn test_fail_fast_surfaces_first_error() -> Result<()> {
    let array = Arc::new(InMemoryArray::new("volume", volume()));
    let graph = TaskGraphBuilder::new(array, Arc::new(fails_at_four()), 2)?.build(5, 5)?;

    match executor(FailurePolicy::FailFast).run(graph).await {
        Err(SlicerError::Operation { coordinate, source }) => {
            assert_eq!(coordinate, Coordinate(4));
            assert_eq!(source.to_string(), "segmentation diverged");
        }
        other => panic!("Expected Operation error, got {:?}", other.map(|s| s.len())),
    }
    Ok(())
}

#[tokio::test]
async fn test_best_effort_reports_every_task() -> Result<()> {
    let array = Arc::new(InMemoryArray::new("volume", volume()));
    let graph = TaskGraphBuilder::new(array, Arc::new(fails_at_four()), 2)?.build(5, 5)?;

    let results = executor(FailurePolicy::BestEffort).run(graph).await?;
    assert_eq!(results.len(), 10);

    let failures: Vec<_> = results.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].index, 4);
    assert_eq!(failures[0].coordinate, Coordinate(4));
    assert_eq!(failures[0].error().and_then(|e| e.coordinate()), Some(Coordinate(4)));

    for outcome in results.successes() {
        assert_eq!(outcome.value(), Some(&(outcome.coordinate.index() * 10)));
    }
    assert_eq!(results.summary().failed, 1);
    assert_eq!(results.summary().succeeded, 9);
    assert!(results.into_results().is_err());
    Ok(())
}

#[tokio::test]
async fn test_stream_stops_after_failure_under_fail_fast() -> Result<()> {
    let array = Arc::new(InMemoryArray::new("volume", volume()));
    let graph = TaskGraphBuilder::new(array, Arc::new(fails_at_four()), 2)?.build(5, 5)?;

    let outcomes: Vec<_> = executor(FailurePolicy::FailFast).run_stream(graph).collect().await;
    let last = outcomes.last().expect("at least the failing outcome");
    assert_eq!(last.coordinate, Coordinate(4));
    assert!(!last.is_ok());
    assert!(outcomes[..outcomes.len() - 1].iter().all(|o| o.is_ok()));

    let unique: HashSet<_> = outcomes.iter().map(|o| o.index).collect();
    assert_eq!(unique.len(), outcomes.len());
    Ok(())
}

#[tokio::test]
async fn test_stream_reports_all_under_best_effort() -> Result<()> {
    let array = Arc::new(InMemoryArray::new("volume", volume()));
    let graph = TaskGraphBuilder::new(array, Arc::new(fails_at_four()), 2)?.build(5, 5)?;

    let outcomes: Vec<_> = executor(FailurePolicy::BestEffort).run_stream(graph).collect().await;
    let mut indices: Vec<usize> = outcomes.iter().map(|o| o.index).collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..10).collect::<Vec<_>>());
    assert_eq!(outcomes.iter().filter(|o| !o.is_ok()).count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_fetch_errors_are_attributed() -> Result<()> {
    let mut instrumented = InstrumentedArray::new();
    instrumented.failing = Some(3);
    let array = Arc::new(instrumented);
    let graph = TaskGraphBuilder::new(array, Arc::new(times_ten()), 2)?.build(5, 2)?;

    let results = executor(FailurePolicy::BestEffort).run(graph).await?;
    assert_eq!(results.len(), 4);
    match results[0].error() {
        Some(SlicerError::Fetch { coordinate, source }) => {
            assert_eq!(*coordinate, Coordinate(3));
            assert!(matches!(**source, SlicerError::ZarrError(_)));
        }
        other => panic!("Expected Fetch error, got {:?}", other),
    }
    assert_eq!(results[1].value(), Some(&40));
    Ok(())
}

#[tokio::test]
async fn test_task_timeout() -> Result<()> {
    let mut instrumented = InstrumentedArray::new();
    instrumented.slow = Some((5, Duration::from_secs(5)));
    let array = Arc::new(instrumented);
    let graph = TaskGraphBuilder::new(array, Arc::new(times_ten()), 2)?.build(5, 2)?;

    let executor = ParallelExecutor::new(
        ExecutorConfig::new()
            .with_threads(2)
            .with_task_timeout(Duration::from_millis(100))
            .with_policy(FailurePolicy::BestEffort),
    )?;
    let results = executor.run(graph).await?;

    assert_eq!(results.len(), 4);
    assert!(matches!(
        results[2].error(),
        Some(SlicerError::TaskTimeout { coordinate: Coordinate(5), .. })
    ));
    assert_eq!(results.failures().count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_panicking_operation_is_reported() -> Result<()> {
    let panics_at_two = Arc::new(from_fn(|slice: &ArrayD<f32>| {
        let z = slice_z(slice);
        if z == 2 {
            panic!("bad slice {}", z);
        }
        Ok::<_, BoxError>(z)
    }));
    let array = Arc::new(InMemoryArray::new("volume", volume()));
    let graph = TaskGraphBuilder::new(array, panics_at_two, 2)?.build_range(0..4)?;

    let results = executor(FailurePolicy::BestEffort).run(graph).await?;
    assert_eq!(results.len(), 4);
    match results[2].error() {
        Some(error) if matches!(error, SlicerError::Operation { .. }) => {
            assert!(error.to_string().contains("panicked"));
            assert!(error.to_string().contains("bad slice 2"));
        }
        other => panic!("Expected Operation error, got {:?}", other),
    }
    assert_eq!(results.successes().count(), 3);
    Ok(())
}

#[tokio::test]
async fn test_panicking_fetch_is_reported() -> Result<()> {
    let mut instrumented = InstrumentedArray::new();
    instrumented.panicking = Some(4);
    let array = Arc::new(instrumented);
    let graph = TaskGraphBuilder::new(array, Arc::new(times_ten()), 2)?.build(5, 2)?;

    let results = executor(FailurePolicy::BestEffort).run(graph).await?;
    assert_eq!(results.len(), 4);
    match results[1].error() {
        Some(SlicerError::Fetch { coordinate, source }) => {
            assert_eq!(*coordinate, Coordinate(4));
            assert!(source.to_string().contains("decoder bug at z=4"));
        }
        other => panic!("Expected Fetch error, got {:?}", other),
    }
    let values: Vec<usize> = results.pairs().map(|(v, _)| *v).collect();
    assert_eq!(values, vec![30, 50, 60]);
    Ok(())
}

#[tokio::test]
async fn test_run_can_be_spawned() -> Result<()> {
    let array = Arc::new(InMemoryArray::new("volume", volume()));
    let boxed_errors = Arc::new(from_fn(|slice: &ArrayD<f32>| {
        Ok::<_, BoxError>(slice_z(slice) + 1)
    }));
    let graph = TaskGraphBuilder::new(array, boxed_errors, 2)?.build(5, 2)?;
    let executor = executor(FailurePolicy::FailFast);

    let handle = tokio::spawn(async move { executor.run(graph).await });
    let results = handle.await.expect("run task joined")?;
    let values: Vec<usize> = results.pairs().map(|(v, _)| *v).collect();
    assert_eq!(values, vec![4, 5, 6, 7]);
    Ok(())
}

#[tokio::test]
async fn test_timed_out_compute_keeps_its_slot() -> Result<()> {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (running_op, peak_op) = (Arc::clone(&running), Arc::clone(&peak));

    let sluggish = Arc::new(from_fn(move |slice: &ArrayD<f32>| {
        let now = running_op.fetch_add(1, Ordering::SeqCst) + 1;
        peak_op.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(150));
        running_op.fetch_sub(1, Ordering::SeqCst);
        Ok::<_, BoxError>(slice_z(slice))
    }));
    let array = Arc::new(InMemoryArray::new("volume", volume()));
    let graph = TaskGraphBuilder::new(array, sluggish, 2)?.build_range(0..4)?;

    let executor = ParallelExecutor::new(
        ExecutorConfig::new()
            .with_threads(4)
            .with_max_in_flight(1)
            .with_task_timeout(Duration::from_millis(30))
            .with_policy(FailurePolicy::BestEffort),
    )?;
    let results = executor.run(graph).await?;

    assert_eq!(results.len(), 4);
    assert!(results
        .iter()
        .all(|o| matches!(o.error(), Some(SlicerError::TaskTimeout { .. }))));
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_bounded_in_flight() -> Result<()> {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (running_op, peak_op) = (Arc::clone(&running), Arc::clone(&peak));

    let tracked = Arc::new(from_fn(move |slice: &ArrayD<f32>| {
        let now = running_op.fetch_add(1, Ordering::SeqCst) + 1;
        peak_op.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(20));
        running_op.fetch_sub(1, Ordering::SeqCst);
        Ok::<_, BoxError>(slice_z(slice))
    }));
    let array = Arc::new(InMemoryArray::new("volume", volume()));
    let graph = TaskGraphBuilder::new(array, tracked, 2)?.build(5, 5)?;

    let executor =
        ParallelExecutor::new(ExecutorConfig::new().with_threads(8).with_max_in_flight(2))?;
    assert_eq!(executor.max_in_flight(), 2);
    assert_eq!(executor.compute_threads(), 8);

    let results = executor.run(graph).await?;
    assert_eq!(results.len(), 10);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    Ok(())
}

#[test]
fn test_run_blocking() -> Result<()> {
    let array = Arc::new(InMemoryArray::new("volume", volume()));
    let graph = TaskGraphBuilder::new(array, Arc::new(StatOperation::Max), 2)?.build(2, 2)?;

    let executor = ParallelExecutor::new(ExecutorConfig::new().with_threads(2))?;
    assert_eq!(executor.policy(), FailurePolicy::FailFast);
    assert_eq!(executor.max_in_flight(), 4);

    let results = executor.run_blocking(graph)?.into_results()?;
    let values: Vec<f32> = results.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0]);
    Ok(())
}
