//! Parallel execution of task graphs
//!
//! Every task fetches its slice through the graph's [`LazyArray`] and then runs
//! the [`SliceOperation`] on a dedicated rayon pool. Fetches are async and
//! overlap freely. A semaphore bounds how many tasks are in flight at once.
//!
//! Completion order is arbitrary. [`ParallelExecutor::run`] reassembles
//! outcomes in submission order; [`ParallelExecutor::run_stream`] yields them
//! as they complete, each tagged with its index and coordinate.
//!
//! # Failure policy
//!
//! The [`FailurePolicy`] is fixed per executor and applies to every run:
//!
//! - [`FailurePolicy::FailFast`]: the first failed task ends the run with its
//!   error, which carries the failing coordinate. Tasks still in flight are
//!   dropped; operations already running on the pool finish in the background
//!   and their results are discarded.
//! - [`FailurePolicy::BestEffort`]: every task reports exactly one outcome and
//!   failures are returned in place, next to the successes.

use crate::data_source::LazyArray;
use crate::errors::{Result, SlicerError};
use crate::graph::{Task, TaskGraph};
use crate::operation::SliceOperation;
use crate::parallel::ParallelConfig;
use crate::results::{ResultStore, TaskOutcome};
use chrono::Utc;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use futures::FutureExt;
use log::{debug, info, warn};
use rayon::ThreadPool;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};

/// How a run reacts to a failed task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Abort on the first failure and surface its error
    #[default]
    FailFast,
    /// Run every task and report failures alongside successes
    BestEffort,
}

/// Configuration of a [`ParallelExecutor`]
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Compute pool sizing
    pub parallel: ParallelConfig,
    /// Upper bound on tasks fetching or computing at once; defaults to twice
    /// the number of compute threads
    pub max_in_flight: Option<usize>,
    /// Limit on the time a single task may take, fetch included
    ///
    /// A task that times out during compute keeps its in-flight slot until
    /// the operation returns on the pool, so compute never exceeds
    /// `max_in_flight`.
    pub task_timeout: Option<Duration>,
    pub policy: FailurePolicy,
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.parallel = ParallelConfig::with_threads(num_threads);
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Runs task graphs on a bounded worker pool
pub struct ParallelExecutor {
    config: ExecutorConfig,
    pool: Arc<ThreadPool>,
    max_in_flight: usize,
}

impl ParallelExecutor {
    /// Create an executor with its own compute pool
    ///
    /// # Errors
    ///
    /// Returns [`SlicerError::ThreadPoolError`] if the pool cannot be built.
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        let pool = config.parallel.build_pool()?;
        let max_in_flight = config
            .max_in_flight
            .filter(|&n| n > 0)
            .unwrap_or_else(|| pool.current_num_threads() * 2)
            .max(1);

        debug!(
            "Executor ready: {} compute thread(s), {} task(s) in flight, policy {:?}",
            pool.current_num_threads(),
            max_in_flight,
            config.policy
        );

        Ok(Self {
            config,
            pool: Arc::new(pool),
            max_in_flight,
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn policy(&self) -> FailurePolicy {
        self.config.policy
    }

    /// Number of threads running slice operations
    pub fn compute_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Upper bound on concurrently running tasks
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Run every task and collect the outcomes in submission order
    ///
    /// Under [`FailurePolicy::BestEffort`] the store holds one outcome per
    /// task. Under [`FailurePolicy::FailFast`] every outcome in the store is a
    /// success.
    ///
    /// # Errors
    ///
    /// Under [`FailurePolicy::FailFast`], the first task error, with its
    /// coordinate attached.
    pub async fn run<A, Op>(&self, graph: TaskGraph<A, Op>) -> Result<ResultStore<Op::Output>>
    where
        A: LazyArray + ?Sized + 'static,
        Op: SliceOperation + ?Sized + 'static,
    {
        let started_at = Utc::now();
        let clock = Instant::now();
        let submitted = graph.len();
        info!(
            "Running {} task(s) with up to {} in flight",
            submitted, self.max_in_flight
        );

        let mut pending = self.dispatch(graph);
        let mut slots: Vec<Option<TaskOutcome<Op::Output>>> = (0..submitted).map(|_| None).collect();

        while let Some(TaskOutcome {
            index,
            coordinate,
            outcome,
        }) = pending.next().await
        {
            let outcome = match outcome {
                Err(error) if self.config.policy == FailurePolicy::FailFast => {
                    warn!("Task {} at coordinate {} failed, aborting run: {}", index, coordinate, error);
                    let abandoned = pending.len();
                    drop(pending);
                    if abandoned > 0 {
                        debug!("Abandoned {} in-flight task(s)", abandoned);
                    }
                    return Err(error);
                }
                Err(error) => {
                    warn!("Task {} at coordinate {} failed: {}", index, coordinate, error);
                    Err(error)
                }
                ok => ok,
            };

            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(TaskOutcome {
                    index,
                    coordinate,
                    outcome,
                });
            }
        }

        let outcomes = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| SlicerError::Generic(format!("task {} produced no outcome", index)))
            })
            .collect::<Result<Vec<_>>>()?;

        let store = ResultStore::new(outcomes, started_at, clock.elapsed());
        info!(
            "Run finished: {} succeeded, {} failed in {:?}",
            store.summary().succeeded,
            store.summary().failed,
            store.summary().elapsed
        );
        Ok(store)
    }

    /// Stream outcomes as tasks complete
    ///
    /// Each item is tagged with its submission index and coordinate. Under
    /// [`FailurePolicy::FailFast`] the stream ends right after the first
    /// failed outcome. Dropping the stream abandons the remaining tasks.
    pub fn run_stream<A, Op>(&self, graph: TaskGraph<A, Op>) -> impl Stream<Item = TaskOutcome<Op::Output>>
    where
        A: LazyArray + ?Sized + 'static,
        Op: SliceOperation + ?Sized + 'static,
    {
        let mut pending = self.dispatch(graph);
        let fail_fast = self.config.policy == FailurePolicy::FailFast;

        async_stream::stream! {
            while let Some(outcome) = pending.next().await {
                let stop = fail_fast && !outcome.is_ok();
                if let Some(error) = outcome.error() {
                    warn!("Task {} at coordinate {} failed: {}", outcome.index, outcome.coordinate, error);
                }
                yield outcome;
                if stop {
                    break;
                }
            }
        }
    }

    /// Blocking variant of [`run`](Self::run) for callers outside an async runtime
    ///
    /// Must not be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run), plus I/O errors from building the runtime.
    pub fn run_blocking<A, Op>(&self, graph: TaskGraph<A, Op>) -> Result<ResultStore<Op::Output>>
    where
        A: LazyArray + ?Sized + 'static,
        Op: SliceOperation + ?Sized + 'static,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run(graph))
    }

    fn dispatch<A, Op>(
        &self,
        graph: TaskGraph<A, Op>,
    ) -> FuturesUnordered<impl Future<Output = TaskOutcome<Op::Output>>>
    where
        A: LazyArray + ?Sized + 'static,
        Op: SliceOperation + ?Sized + 'static,
    {
        let (array, operation, tasks) = graph.into_parts();
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));

        tasks
            .into_iter()
            .map(|task| {
                run_task(
                    Arc::clone(&array),
                    Arc::clone(&operation),
                    Arc::clone(&self.pool),
                    Arc::clone(&semaphore),
                    self.config.task_timeout,
                    task,
                )
            })
            .collect()
    }
}

async fn run_task<A, Op>(
    array: Arc<A>,
    operation: Arc<Op>,
    pool: Arc<ThreadPool>,
    semaphore: Arc<Semaphore>,
    timeout: Option<Duration>,
    task: Task,
) -> TaskOutcome<Op::Output>
where
    A: LazyArray + ?Sized + 'static,
    Op: SliceOperation + ?Sized + 'static,
{
    let index = task.index();
    let coordinate = task.coordinate();

    let outcome = match semaphore.acquire_owned().await {
        Ok(permit) => {
            let work = execute(array.as_ref(), operation, &pool, &task, permit);
            match timeout {
                Some(limit) => tokio::time::timeout(limit, work)
                    .await
                    .unwrap_or_else(|_| {
                        Err(SlicerError::TaskTimeout {
                            coordinate,
                            timeout: limit,
                        })
                    }),
                None => work.await,
            }
        }
        Err(_) => Err(SlicerError::Cancelled { coordinate }),
    };

    TaskOutcome {
        index,
        coordinate,
        outcome,
    }
}

async fn execute<A, Op>(
    array: &A,
    operation: Arc<Op>,
    pool: &ThreadPool,
    task: &Task,
    permit: OwnedSemaphorePermit,
) -> Result<Op::Output>
where
    A: LazyArray + ?Sized,
    Op: SliceOperation + ?Sized + 'static,
{
    let coordinate = task.coordinate();
    debug!("Fetching {} for coordinate {}", task.selector(), coordinate);

    let slice = match AssertUnwindSafe(array.fetch(task.selector()))
        .catch_unwind()
        .await
    {
        Ok(fetched) => fetched.map_err(|e| SlicerError::Fetch {
            coordinate,
            source: Box::new(e),
        })?,
        Err(payload) => {
            return Err(SlicerError::Fetch {
                coordinate,
                source: Box::new(SlicerError::Generic(format!(
                    "fetch panicked: {}",
                    panic_message(payload)
                ))),
            })
        }
    };

    let (tx, rx) = oneshot::channel();
    pool.spawn(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| operation.apply(&slice)));
        // Held until compute returns, even if the task already timed out
        drop(permit);
        // The receiver is gone if the run was abandoned; the result is dropped
        let _ = tx.send(outcome);
    });

    match rx.await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(source))) => Err(SlicerError::Operation { coordinate, source }),
        Ok(Err(payload)) => Err(SlicerError::Operation {
            coordinate,
            source: format!("operation panicked: {}", panic_message(payload)).into(),
        }),
        Err(_) => Err(SlicerError::Cancelled { coordinate }),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
