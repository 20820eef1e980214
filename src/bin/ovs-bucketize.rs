//! Stage one of the store build: fan overlapper output into ID buckets.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use ovlstore::{Bucketizer, BucketizerConfig, FilterMode, FragmentInfo, Partition};

#[derive(Parser)]
#[command(
    name = "ovs-bucketize",
    version,
    about = "Split overlapper output into sorted-store buckets"
)]
struct Args {
    /// Store directory to build into
    #[arg(short = 'o', long = "output")]
    store: PathBuf,

    /// This job's number, 1-based; each input batch gets its own
    #[arg(short = 'j', long)]
    job: u32,

    /// Read-count bound; overlap IDs must be strictly below it
    #[arg(short = 'm', long = "max-iid")]
    max_iid: u32,

    /// Split the ID space into this many buckets
    #[arg(short = 'F', long = "files", conflicts_with = "memory_mb")]
    files: Option<u32>,

    /// Size buckets so each sorts within this many megabytes
    #[arg(short = 'M', long = "memory")]
    memory_mb: Option<u64>,

    /// Drop raw overlaps above this corrected error rate
    #[arg(short = 'e', long = "max-error")]
    max_error: Option<f64>,

    /// Keep only overlaps usable for read trimming
    #[arg(long, conflicts_with = "dup")]
    trim: bool,

    /// Keep only duplicate-detection candidates
    #[arg(long)]
    dup: bool,

    /// Fragment library table (iid library skip), required for --dup
    #[arg(long = "frag-libs")]
    frag_libs: Option<PathBuf>,

    /// Compress slice files with zstd
    #[arg(long)]
    compress: bool,

    /// Overlapper output files; '-' reads stdin
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

/// Soft open-file limit for this process; the POSIX floor when it cannot
/// be read.
fn max_open_files() -> usize {
    std::fs::read_to_string("/proc/self/limits")
        .ok()
        .and_then(|limits| {
            limits
                .lines()
                .find(|l| l.starts_with("Max open files"))
                .and_then(|l| l.split_whitespace().nth(3)?.parse().ok())
        })
        .unwrap_or(1024)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let partition = match (args.files, args.memory_mb) {
        (Some(n), _) => Partition::Files(n),
        (None, Some(mb)) => Partition::MemoryBytes(mb << 20),
        (None, None) => Partition::Files(1),
    };
    let filter = if args.trim {
        FilterMode::Trim
    } else if args.dup {
        FilterMode::Dedup
    } else {
        FilterMode::All
    };
    let frags = args
        .frag_libs
        .as_ref()
        .map(FragmentInfo::from_tsv)
        .transpose()?;

    let mut bucketizer = Bucketizer::new(
        BucketizerConfig {
            store: args.store,
            job: args.job,
            max_iid: args.max_iid,
            partition,
            max_error_rate: args.max_error,
            filter,
            compress: args.compress,
            max_open_files: max_open_files(),
        },
        args.inputs,
        frags,
    )?;
    println!(
        "{} buckets of {} IDs each",
        bucketizer.num_slices(),
        bucketizer.iid_per_bucket()
    );
    bucketizer.run()?;
    let saved = bucketizer.finish()?;
    println!("bucketized {saved} overlaps");
    Ok(())
}
