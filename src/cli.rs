//! Defines command-line interface options using `clap` for the zslicer application.

use clap::Parser;
use std::time::Duration;
use zslicer::StatOperation;

/// Apply a statistic to every slice of a coordinate range in a Zarr array
#[derive(Parser, Debug)]
#[command(
    name = "zslicer",
    version,
    about = "Lazy, parallel slice-wise analysis of local Zarr arrays"
)]
pub struct Args {
    /// Path to the Zarr store
    #[arg(short, long)]
    pub store: String,

    /// Array inside the store
    #[arg(short, long)]
    pub array: Option<String>,

    /// Axis to slice along, as an index or a dimension name
    #[arg(long, default_value = "0")]
    pub axis: String,

    /// Centre coordinate of the range
    #[arg(long, default_value_t = 0)]
    pub center: usize,

    /// Half-width of the range; coordinates [center - radius, center + radius) are analysed
    #[arg(long, default_value_t = 0)]
    pub radius: usize,

    /// Pin another axis to an index, formatted as <axis>=<index>. May be repeated.
    #[arg(long = "fix", value_parser = parse_fix_arg)]
    pub fixed: Vec<(String, usize)>,

    /// Statistic computed for every slice: mean, sum, min or max
    #[arg(long, default_value = "mean", value_parser = parse_stat_arg)]
    pub op: StatOperation,

    /// Number of compute threads. Defaults to number of CPU cores.
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Maximum number of slices fetched or analysed at once
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Per-slice timeout in milliseconds
    #[arg(long, value_parser = parse_millis_arg)]
    pub timeout_ms: Option<Duration>,

    /// Report failed slices alongside results instead of aborting on the first failure
    #[arg(long, default_value_t = false)]
    pub best_effort: bool,

    /// List all arrays in the store
    #[arg(long)]
    pub list_arrays: bool,

    /// Print the metadata of the selected array
    #[arg(long)]
    pub describe: bool,

    /// Enable verbose output.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

fn parse_fix_arg(s: &str) -> Result<(String, usize), String> {
    let parts: Vec<&str> = s.split('=').collect();
    match parts.as_slice() {
        [axis, index] if !axis.is_empty() => {
            let index = index
                .parse::<usize>()
                .map_err(|_| format!("Invalid index '{}' for axis '{}'", index, axis))?;
            Ok((axis.to_string(), index))
        }
        _ => Err("Invalid format: Expected '<axis>=<index>'.".to_string()),
    }
}

fn parse_stat_arg(s: &str) -> Result<StatOperation, String> {
    s.parse::<StatOperation>().map_err(|e| e.to_string())
}

fn parse_millis_arg(s: &str) -> Result<Duration, String> {
    s.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| format!("Invalid timeout '{}': expected milliseconds", s))
}
