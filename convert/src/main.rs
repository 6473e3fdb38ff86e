use std::path::PathBuf;

use anyhow::{ensure, Context};
use clap::Parser;
use ddcapture_core::convert::{convert, ConvertOutcome, ConvertRequest};
use ddcapture_core::format::OutputFormat;

/// Packs or unpacks between the 10-bit packed and 16-bit signed capture formats.
#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
struct Args {
    /// Input file path
    #[arg(short, long)]
    input: PathBuf,

    /// Output file path
    #[arg(short, long)]
    output: PathBuf,

    /// Pack a 16-bit signed file down to 10-bit packed
    #[arg(long, conflicts_with = "unpack")]
    pack: bool,

    /// Unpack a 10-bit packed file to 16-bit signed
    #[arg(long, conflicts_with = "pack")]
    unpack: bool,

    /// Verbose debug logging
    #[arg(short, long)]
    debug: bool,

    /// Start of the conversion window, in seconds
    #[arg(long, default_value_t = 0.0)]
    start_seconds: f64,

    /// End of the conversion window, in seconds; defaults to end of file
    #[arg(long)]
    end_seconds: Option<f64>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.debug {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    ensure!(
        args.pack ^ args.unpack,
        "exactly one of --pack or --unpack must be given"
    );

    let (input_format, output_format) = if args.unpack {
        (OutputFormat::TenBitPacked, OutputFormat::SixteenBitSigned)
    } else {
        (OutputFormat::SixteenBitSigned, OutputFormat::TenBitPacked)
    };

    let req = ConvertRequest {
        input_path: args.input,
        input_format,
        output_path: args.output,
        output_format,
        start_seconds: args.start_seconds,
        end_seconds: args.end_seconds,
    };

    let outcome = convert(
        &req,
        |pct| log::info!("conversion progress: {:.1}%", pct),
        || false,
    )
    .map_err(|e| anyhow::anyhow!("{}", e))
    .context("conversion failed")?;

    match outcome {
        ConvertOutcome::Completed => {
            log::info!("conversion completed");
            Ok(())
        }
        ConvertOutcome::Cancelled => {
            anyhow::bail!("conversion was cancelled");
        }
    }
}
