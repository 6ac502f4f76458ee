//! Geo-objects generation binary.
//!
//! Joins the regions hierarchy with the intermediate feature file and
//! writes the geo-objects key-value storage plus the POI id side stream.

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cedar::{generate_geo_objects, GenerateParams};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "generate")]
#[command(about = "Generate the geo-objects key-value storage")]
struct Args {
    /// Regions locality index produced by the regions generator
    #[arg(long)]
    regions_index: PathBuf,

    /// Regions key-value file produced by the regions generator
    #[arg(long)]
    regions_kv: PathBuf,

    /// Intermediate feature file; rewritten in place
    #[arg(long)]
    features: PathBuf,

    /// Output file of POI ids to add to the locality index
    #[arg(long)]
    out_poi_ids: PathBuf,

    /// Output geo-objects key-value file
    #[arg(long)]
    out_kv: PathBuf,

    /// Worker threads for the parallel scans (default: CPU cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Log per-record skip diagnostics
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    let threads = args.threads.unwrap_or_else(|| {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });

    let ok = generate_geo_objects(GenerateParams {
        regions_index: args.regions_index,
        regions_kv: args.regions_kv,
        features: args.features,
        out_poi_ids: args.out_poi_ids,
        out_kv: args.out_kv,
        verbose: args.verbose,
        threads,
    });

    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
