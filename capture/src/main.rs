use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use clap::Parser;
use ddcapture_core::config::Config;
use ddcapture_core::session::{CaptureSession, CaptureStatus, SessionParams};
use ddcapture_core::sink::FileSink;
use ddcapture_core::source::LibusbSource;
use ddcapture_core::usb;

/// Captures a 40 MSa/s RF stream from a DomesdayDuplicator-class sampler to disk.
#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
struct Args {
    /// Output file path
    output: PathBuf,

    /// Optional TOML config file overriding buffer/transfer geometry
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the default USB vendor ID
    #[arg(long)]
    vendor_id: Option<u16>,

    /// Override the default USB product ID
    #[arg(long)]
    product_id: Option<u16>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path).context("loading config")?,
        None => Config::default(),
    };
    if let Some(vid) = args.vendor_id {
        config.vendor_id = vid;
    }
    if let Some(pid) = args.product_id {
        config.product_id = pid;
    }
    config.validate().context("validating config")?;

    let handle = Arc::new(
        usb::open_device(config.vendor_id, config.product_id)
            .context("opening capture device")?,
    );

    let source = Arc::new(LibusbSource::new(
        handle.clone(),
        usb::BULK_IN_ENDPOINT,
        config.transfer_size,
        config.simultaneous_transfers,
    ));
    let stream_control = Arc::new(UsbStreamControl { handle });
    let sink = Arc::new(FileSink::create(&args.output).context("opening output file")?);

    let params = SessionParams {
        disk_buffer_count: config.disk_buffer_count,
        disk_buffer_bytes: config.disk_buffer_bytes(),
        transfers_per_disk_buffer: config.transfers_per_disk_buffer,
        simultaneous_transfers: config.simultaneous_transfers,
        format: config.output_format,
    };

    let session = CaptureSession::start(params, source, stream_control, sink)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("starting capture session")?;

    log::info!("capture running, writing to {:?}; press Ctrl-C to stop", args.output);

    let stopping = Arc::new(AtomicBool::new(false));
    let stopping_for_handler = stopping.clone();
    ctrlc::set_handler(move || {
        stopping_for_handler.store(true, Ordering::Release);
    })
    .context("installing Ctrl-C handler")?;

    while !stopping.load(Ordering::Acquire) && session.status() == CaptureStatus::Running {
        std::thread::sleep(Duration::from_millis(200));
    }

    session.stop().map_err(|e| anyhow::anyhow!("{}", e)).context("stopping capture")?;

    if session.status() == CaptureStatus::Failed {
        bail!(
            "capture failed: {}",
            session
                .last_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".into())
        );
    }
    if session.has_overflowed() {
        bail!("disk buffer ring overflowed; written prefix is valid but capture is incomplete");
    }

    log::info!("capture completed");
    Ok(())
}

struct UsbStreamControl {
    handle: Arc<rusb::DeviceHandle<rusb::Context>>,
}

impl ddcapture_core::session::StreamControl for UsbStreamControl {
    fn enable(&self) -> ddcapture_core::CaptureResult<()> {
        usb::enable_streaming(&self.handle)
    }

    fn disable(&self) -> ddcapture_core::CaptureResult<()> {
        usb::disable_streaming(&self.handle)
    }
}
