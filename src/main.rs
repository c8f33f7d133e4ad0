//! Entry point for the zslicer application.
//! Handles CLI parsing, opens the Zarr array and dispatches the slice-wise analysis.

use anyhow::{bail, Context};
use clap::Parser;
use std::sync::Arc;
use zslicer::prelude::*;
use zslicer::zarr_io::list_zarr_arrays;
use zslicer::get_parallel_info;

mod cli;

use cli::Args;

fn resolve_axis(metadata: &ArrayMetadata, axis: &str) -> anyhow::Result<usize> {
    if let Ok(index) = axis.parse::<usize>() {
        return Ok(index);
    }
    metadata
        .axis_of(axis)
        .with_context(|| format!("Dimension '{}' not found in array '{}'", axis, metadata.name))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let default_level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    if args.list_arrays {
        for name in list_zarr_arrays(&args.store).await? {
            println!("{}", name);
        }
        return Ok(());
    }

    let Some(array_name) = args.array.as_deref() else {
        bail!("--array is required unless --list-arrays is given");
    };

    let reader = ZarrReader::new(ZarrSource::from_path_str(&args.store)?).await?;
    let array = Arc::new(reader.open_array(array_name).await?);
    println!("Successfully opened Zarr array: {}/{}", &args.store, array_name);

    if args.describe {
        array.metadata().print();
        return Ok(());
    }

    let axis = resolve_axis(array.metadata(), &args.axis)?;
    let mut builder = TaskGraphBuilder::new(Arc::clone(&array), Arc::new(args.op), axis)?;
    for (fixed_axis, index) in &args.fixed {
        builder = builder.fix(resolve_axis(array.metadata(), fixed_axis)?, *index)?;
    }
    let graph = builder.build(args.center, args.radius)?;

    let mut config = ExecutorConfig::new().with_policy(if args.best_effort {
        FailurePolicy::BestEffort
    } else {
        FailurePolicy::FailFast
    });
    config.parallel = ParallelConfig::new(args.threads);
    config.max_in_flight = args.max_in_flight;
    config.task_timeout = args.timeout_ms;

    let executor = ParallelExecutor::new(config)?;
    if args.verbose {
        get_parallel_info().print_info();
    }
    println!(
        "⚡ Computing {} for {} slice(s) along axis {} across {} threads",
        args.op.as_str(),
        graph.len(),
        axis,
        executor.compute_threads()
    );

    let results = executor.run(graph).await?;
    for outcome in &results {
        match &outcome.outcome {
            Ok(value) => println!("{:>8}  {}", outcome.coordinate, value),
            Err(error) => println!("{:>8}  ❌ {}", outcome.coordinate, error),
        }
    }
    results.summary().print();

    Ok(())
}
