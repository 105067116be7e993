//! fpl2bag - Convert Fixposition .fpl logs into ROS bags
//!
//! Reads the framed telemetry stream of an .fpl recording, registers the
//! topic declarations it carries and writes every message record into a
//! ROS bag v2.0 file.

use anyhow::{bail, Context, Result};
use clap::Parser;
use fplbag_core::bag::MAX_CHUNK_THRESHOLD;
use fplbag_core::{convert, BagConfig, BagWriter, Compression, ConvertStats, SourceReader};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, Level};
use tracing_subscriber::EnvFilter;

/// Convert an .fpl recording into a ROS bag
#[derive(Parser, Debug)]
#[command(name = "fpl2bag")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to input .fpl file
    #[arg(short, long, value_name = "INPUT_FPL")]
    input: PathBuf,

    /// Path to output .bag file
    #[arg(short, long, value_name = "OUTPUT_BAG")]
    output: PathBuf,

    /// Force overwrite existing output
    #[arg(short, long)]
    force: bool,

    /// Compress output bag (-c lz4, -cc bz2)
    #[arg(short, long, action = clap::ArgAction::Count)]
    compress: u8,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Uncompressed bag chunk size in KiB
    #[arg(
        long,
        value_name = "KIB",
        default_value_t = 768,
        value_parser = clap::value_parser!(u32).range(1..=MAX_CHUNK_THRESHOLD_KIB)
    )]
    chunk_threshold: u32,
}

/// Largest `--chunk-threshold` value
const MAX_CHUNK_THRESHOLD_KIB: i64 = (MAX_CHUNK_THRESHOLD / 1024) as i64;

impl Cli {
    fn verbosity(&self) -> i16 {
        i16::from(self.verbose) - i16::from(self.quiet)
    }

    fn bag_config(&self) -> BagConfig {
        BagConfig::new()
            .compression(Compression::from_level(self.compress))
            .chunk_threshold(self.chunk_threshold as usize * 1024)
    }
}

fn level_for(verbosity: i16) -> Level {
    match verbosity {
        i16::MIN..=-1 => Level::WARN,
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = level_for(cli.verbosity());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    info!("Extracting {} to {}", cli.input.display(), cli.output.display());

    match run(&cli) {
        Ok(stats) => {
            info!("Summary: {stats}");
            info!("Done");
            Ok(())
        }
        Err(e) => {
            error!("Failed");
            Err(e)
        }
    }
}

/// Converts `cli.input` into `cli.output`
fn run(cli: &Cli) -> Result<ConvertStats> {
    check_output(&cli.output, cli.force)?;

    let mut reader = SourceReader::open(&cli.input)
        .with_context(|| format!("Failed to open input file: {}", cli.input.display()))?;

    let config = cli.bag_config();
    debug!(
        "Compression {}, chunk threshold {} bytes",
        config.compression.name(),
        config.chunk_threshold
    );
    let mut writer = BagWriter::create(&cli.output, config)
        .with_context(|| format!("Failed to create output file: {}", cli.output.display()))?;

    let stats = convert(&mut reader, &mut writer)
        .with_context(|| format!("Failed to convert {}", cli.input.display()))?;
    writer
        .close()
        .with_context(|| format!("Failed to finalize output file: {}", cli.output.display()))?;

    Ok(stats)
}

/// Refuses to replace an existing output unless forced
fn check_output(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "Output bag already exists: {} (use --force to overwrite)",
            output.display()
        );
    }
    Ok(())
}
