//! Stage three of the store build: merge segment indexes and seal.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use ovlstore::{merge_segments, MergerConfig};

#[derive(Parser)]
#[command(
    name = "ovs-index",
    version,
    about = "Merge sorted segments into the final store index"
)]
struct Args {
    /// Store directory holding the sorted segments
    #[arg(short = 'o', long = "output")]
    store: PathBuf,

    /// Number of sorted buckets to merge
    #[arg(short = 'F', long = "files")]
    num_buckets: u32,

    /// Read-count bound; the index covers every ID up to it
    #[arg(short = 'm', long = "max-iid")]
    max_iid: u32,

    /// Delete build intermediates once the index verifies clean
    #[arg(long)]
    delete: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let info = merge_segments(&MergerConfig {
        store: args.store,
        num_buckets: args.num_buckets,
        max_iid: args.max_iid,
        delete_intermediates: args.delete,
    })?;
    println!(
        "store sealed: {} overlaps over reads {}..{}",
        info.num_overlaps(),
        info.smallest_iid(),
        info.largest_iid()
    );
    Ok(())
}
