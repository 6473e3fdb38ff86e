//! Device discovery and vendor control transfers, grounded in the teacher's
//! `usb_device.rs` open/claim pattern and the original capture tool's
//! streaming enable/disable commands.

use std::time::Duration;

use log::{info, warn};
use rusb::{Context, DeviceHandle, UsbContext};

use crate::error::{CaptureError, CaptureResult};

pub const DEFAULT_VENDOR_ID: u16 = 0x1d50;
pub const DEFAULT_PRODUCT_ID: u16 = 0x603b;
pub const BULK_IN_ENDPOINT: u8 = 0x81;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);
const STREAMING_REQUEST_TYPE: u8 = 0x40;
const STREAMING_REQUEST: u8 = 0xb5;

/// Opens the sampler by VID/PID and claims interface 0.
pub fn open_device(vendor_id: u16, product_id: u16) -> CaptureResult<DeviceHandle<Context>> {
    let context = Context::new()
        .map_err(|e| CaptureError::DeviceOpenFailed(format!("creating libusb context: {}", e)))?;

    let handle = context
        .open_device_with_vid_pid(vendor_id, product_id)
        .ok_or_else(|| {
            CaptureError::DeviceOpenFailed(format!(
                "no device with VID {:#06x} PID {:#06x}",
                vendor_id, product_id
            ))
        })?;

    if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
        warn!("could not enable auto-detach of kernel driver: {}", e);
    }

    handle.claim_interface(0).map_err(|e| {
        CaptureError::InterfaceClaimFailed(format!(
            "{} (device may be connected to a USB 2.0 port)",
            e
        ))
    })?;

    info!(
        "opened device {:#06x}:{:#06x}, claimed interface 0",
        vendor_id, product_id
    );
    Ok(handle)
}

/// Issues the vendor control transfer that tells the device to start
/// streaming sample data on the bulk IN endpoint.
pub fn enable_streaming(handle: &DeviceHandle<Context>) -> CaptureResult<()> {
    send_streaming_request(handle, 0x01)
}

/// Inverse of [`enable_streaming`]; tells the device to stop.
pub fn disable_streaming(handle: &DeviceHandle<Context>) -> CaptureResult<()> {
    send_streaming_request(handle, 0x00)
}

fn send_streaming_request(handle: &DeviceHandle<Context>, w_value: u16) -> CaptureResult<()> {
    handle
        .write_control(
            STREAMING_REQUEST_TYPE,
            STREAMING_REQUEST,
            w_value,
            0,
            &[],
            CONTROL_TIMEOUT,
        )
        .map_err(|e| {
            CaptureError::SubmitFailed(format!(
                "streaming control transfer (wValue={:#x}) failed: {}",
                w_value, e
            ))
        })?;
    Ok(())
}
