//! Stage two of the store build: sort one bucket into its block file.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use ovlstore::{sort_bucket, SorterConfig};

#[derive(Parser)]
#[command(
    name = "ovs-sort",
    version,
    about = "Sort one bucket of a store build into its final block file"
)]
struct Args {
    /// Store directory holding the bucketize output
    #[arg(short = 'o', long = "output")]
    store: PathBuf,

    /// Which bucket to sort, 1-based
    #[arg(short = 'j', long)]
    bucket: u32,

    /// Total number of buckets
    #[arg(short = 'F', long = "files")]
    num_buckets: u32,

    /// Number of bucketize jobs that ran
    #[arg(short = 'J', long = "jobs")]
    num_jobs: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let sorted = sort_bucket(&SorterConfig {
        store: args.store,
        bucket: args.bucket,
        num_buckets: args.num_buckets,
        num_jobs: args.num_jobs,
    })?;
    println!("bucket {:04}: sorted {sorted} overlaps", args.bucket);
    Ok(())
}
