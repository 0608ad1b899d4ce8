use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use mesh_tiler::config::CliArgs;
use mesh_tiler::pipeline::{Pipeline, RunOptions};

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Init tracing
    let filter = if args.verbose {
        EnvFilter::new("mesh_tiler=debug")
    } else {
        EnvFilter::new("mesh_tiler=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let options = RunOptions {
        dry_run: args.dry_run,
        validate: args.validate,
    };
    let request = args.to_request()?;

    match Pipeline::run(&request, options) {
        Ok(result) => {
            println!(
                "Done: task {} {} with {} tiles in {:.2}s ({})",
                result.task_id,
                result.status,
                result.tile_count,
                result.duration.as_secs_f64(),
                result.output_prefix
            );
            Ok(())
        }
        Err(e) => {
            error!(%e, "Pipeline failed");
            Err(anyhow::anyhow!(e)).context("mesh-tiler pipeline failed")
        }
    }
}
