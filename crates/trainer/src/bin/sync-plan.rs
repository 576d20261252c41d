//! Print the partition and interval plan every worker derives for an epoch
//!
//! ```text
//! sync-plan <total_subsets> <workers> <k> <batch_size> [items_per_subset]
//! ```

use std::process::ExitCode;

use data_shard::WorkerPlan;
use runtime_core::config::PartitionConfig;
use runtime_core::telemetry::init_tracing;

const USAGE: &str = "usage: sync-plan <total_subsets> <workers> <k> <batch_size> [items_per_subset]";

fn arg<T: std::str::FromStr>(args: &[String], index: usize, name: &str) -> Result<T, String> {
    let raw = args
        .get(index)
        .ok_or_else(|| format!("missing <{}>\n{}", name, USAGE))?;
    raw.parse()
        .map_err(|_| format!("<{}> is not a valid number: {:?}", name, raw))
}

fn run(args: &[String]) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let total: u64 = arg(args, 1, "total_subsets")?;
    let workers: u32 = arg(args, 2, "workers")?;
    let k: u32 = arg(args, 3, "k")?;
    let batch_size: u32 = arg(args, 4, "batch_size")?;
    let items_per_subset: u64 = if args.len() > 5 {
        arg(args, 5, "items_per_subset")?
    } else {
        PartitionConfig::default().items_per_subset
    };

    tracing::debug!(total, workers, k, batch_size, items_per_subset, "Deriving plans");

    let plans = (0..workers)
        .map(|worker| WorkerPlan::derive(total, workers, worker, k, batch_size, items_per_subset))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(serde_json::to_string_pretty(&plans)?)
}

fn main() -> ExitCode {
    init_tracing("sync_plan=info,data_shard=info");

    let args: Vec<String> = std::env::args().collect();
    match run(&args) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("sync-plan: {}", e);
            ExitCode::FAILURE
        }
    }
}
