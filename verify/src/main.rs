use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ddcapture_core::verify::verify_test_pattern;

/// Verifies a capture made with the device's deterministic test-pattern mode.
#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
struct Args {
    /// Path to the 10-bit packed test-pattern capture to verify
    #[arg(long)]
    source_sample_file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let report = verify_test_pattern(&args.source_sample_file)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("verification failed")?;

    log::info!(
        "verified {} samples, wrap length L={}, initial value {}",
        report.samples_checked,
        report.wrap_length,
        report.initial_value
    );
    println!(
        "OK: {} samples verified (L={}, initial={})",
        report.samples_checked, report.wrap_length, report.initial_value
    );
    Ok(())
}
