//! Checks a store index for gaps and decreases in the ID sequence.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use ovlstore::test_index;

#[derive(Parser)]
#[command(
    name = "ovs-verify",
    version,
    about = "Verify a store index is dense and monotone"
)]
struct Args {
    /// Store directory to check
    #[arg(short = 't', long = "test")]
    store: PathBuf,

    /// Write a repaired copy to idx.fixed
    #[arg(short = 'f', long = "fix")]
    fix: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let errors = test_index(&args.store, args.fix)?;
    if errors > 0 {
        bail!("index has {errors} bad entries");
    }
    println!("index is clean");
    Ok(())
}
