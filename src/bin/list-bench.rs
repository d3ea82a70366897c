use anyhow::{Context, Result};
use clap::Parser;
use ordered_lists::harness::{run_bench, BenchConfig};

fn main() -> Result<()> {
    let config = BenchConfig::parse();
    let report = run_bench(&config).with_context(|| format!("{:?} list benchmark failed", config.list))?;
    print!("{report}");
    Ok(())
}
