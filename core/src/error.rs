//! Error kinds surfaced at the capture session boundary (spec: ERROR HANDLING DESIGN).
//!
//! These are the reasons a session can fail. The first one observed by any actor
//! is latched into the session's `last_error` slot and nothing overwrites it.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CaptureError {
    #[error("failed to open USB device: {0}")]
    DeviceOpenFailed(String),

    #[error("failed to claim USB interface 0 (often a USB 2.0 port): {0}")]
    InterfaceClaimFailed(String),

    #[error("memory allocation failed")]
    AllocFailed,

    #[error("USB transfer submission failed: {0}")]
    SubmitFailed(String),

    #[error("USB transfer completed with error status: {0}")]
    TransferError(String),

    #[error("disk buffer ring overflow - disk write throughput could not keep up")]
    DiskBufferOverflow,

    #[error("failed to open output file: {0}")]
    OutputOpenFailed(String),

    #[error("failed to write output file: {0}")]
    WriteFailed(String),

    #[error("failed to flush output file: {0}")]
    FlushFailed(String),

    #[error(
        "test pattern verification failed at sample {index}: expected {expected}, got {got}"
    )]
    TestVerifyFailed {
        index: u64,
        expected: u16,
        got: u16,
    },

    #[error("malformed input: {0}")]
    MalformedInput(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;
