//! Capture-session configuration (spec §6 "Configuration").
//!
//! Values here tune the pipeline's shape: buffer sizing, transfer
//! concurrency, and output format. None of it touches GUI preferences or
//! player-remote state, which are out of scope. Loaded from an optional TOML
//! file; any field not present falls back to its default.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, CaptureResult};
use crate::format::OutputFormat;

/// USB bulk transfer payload size in bytes. Matches the device's native
/// packet multiple; changing it changes throughput/latency tradeoffs only.
pub const TRANSFER_SIZE: usize = 16384 * 16;

/// Number of transfers kept simultaneously in flight with libusb.
pub const SIMULTANEOUS_TRANSFERS: usize = 16;

/// Number of transfers that fill one disk buffer.
pub const TRANSFERS_PER_DISK_BUFFER: usize = 256;

/// Number of disk buffers in the ring.
pub const DISK_BUFFER_COUNT: usize = 4;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transfer_size: usize,
    pub simultaneous_transfers: usize,
    pub transfers_per_disk_buffer: usize,
    pub disk_buffer_count: usize,
    pub output_format: OutputFormat,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            transfer_size: TRANSFER_SIZE,
            simultaneous_transfers: SIMULTANEOUS_TRANSFERS,
            transfers_per_disk_buffer: TRANSFERS_PER_DISK_BUFFER,
            disk_buffer_count: DISK_BUFFER_COUNT,
            output_format: OutputFormat::default(),
            vendor_id: 0x1d50,
            product_id: 0x603b,
        }
    }
}

impl Config {
    /// Loads config from a TOML file, falling back to defaults for any key
    /// the file omits. Missing file is not an error; a malformed one is.
    pub fn load(path: &Path) -> CaptureResult<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = fs::read_to_string(path)
            .map_err(|e| CaptureError::MalformedInput(format!("reading {:?}: {}", path, e)))?;
        toml::from_str(&text)
            .map_err(|e| CaptureError::MalformedInput(format!("parsing {:?}: {}", path, e)))
    }

    /// Disk buffer size in bytes, derived from the transfer geometry.
    pub fn disk_buffer_bytes(&self) -> usize {
        self.transfer_size * self.transfers_per_disk_buffer
    }

    pub fn validate(&self) -> CaptureResult<()> {
        if self.simultaneous_transfers == 0 {
            return Err(CaptureError::MalformedInput(
                "simultaneous_transfers must be > 0".into(),
            ));
        }
        if self.transfers_per_disk_buffer % self.simultaneous_transfers != 0 {
            return Err(CaptureError::MalformedInput(
                "transfers_per_disk_buffer must be a multiple of simultaneous_transfers".into(),
            ));
        }
        if self.disk_buffer_count < 2 {
            return Err(CaptureError::MalformedInput(
                "disk_buffer_count must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let cfg = Config::load(Path::new("/nonexistent/ddcapture.toml")).unwrap();
        assert_eq!(cfg.transfer_size, TRANSFER_SIZE);
    }

    #[test]
    fn rejects_misaligned_geometry() {
        let mut cfg = Config::default();
        cfg.transfers_per_disk_buffer = 250;
        assert!(cfg.validate().is_err());
    }
}
