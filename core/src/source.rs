//! C2 transfer source: submits and resubmits USB bulk transfers against the
//! sampler using libusb's asynchronous API directly, since `rusb`'s
//! synchronous calls can't keep `simultaneous_transfers` requests in flight
//! at once. Grounded in the original capture loop's `libusb_fill_bulk_transfer`
//! / `libusb_submit_transfer` / completion-callback structure.

use std::ffi::c_void;
use std::panic::catch_unwind;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, warn};
use rusb::{Context, DeviceHandle, UsbContext};

use crate::error::{CaptureError, CaptureResult};
use crate::ring::{TransferSink, TransferSource};

const LIBUSB_TRANSFER_TYPE_BULK: u8 = 3;
const LIBUSB_TRANSFER_COMPLETED: i32 = 0;
const LIBUSB_TRANSFER_SHORT_NOT_OK: u8 = 1 << 2;
const SUBMIT_TIMEOUT_MS: u32 = 1000;
const EVENT_POLL_TIMEOUT_SECS: u64 = 1;

struct CallbackContext {
    sink: Weak<dyn TransferSink>,
    in_flight: Arc<AtomicUsize>,
    stopping: Arc<AtomicBool>,
}

/// A libusb-backed [`TransferSource`] driving `simultaneous_transfers`
/// concurrent bulk-in requests against one endpoint. The device handle is
/// shared (`Arc`) with the session's [`crate::session::StreamControl`], since
/// both need it at once: this source for the raw transfer pointer, the
/// control side for the vendor enable/disable requests.
pub struct LibusbSource {
    handle: Arc<DeviceHandle<Context>>,
    endpoint: u8,
    transfer_size: usize,
    simultaneous_transfers: usize,
    in_flight: Arc<AtomicUsize>,
    stopping: Arc<AtomicBool>,
    // Raw libusb_transfer pointers kept alive for the duration of the
    // capture so they can be freed once draining completes.
    transfers: Mutex<Vec<*mut libusb1_sys::libusb_transfer>>,
    event_thread: Mutex<Option<JoinHandle<()>>>,
}

// Safety: the raw transfer pointers are only touched from the libusb event
// thread (inside callbacks libusb itself invokes) and during setup/teardown,
// which are mutually exclusive with the event loop running.
unsafe impl Send for LibusbSource {}
unsafe impl Sync for LibusbSource {}

impl LibusbSource {
    pub fn new(
        handle: Arc<DeviceHandle<Context>>,
        endpoint: u8,
        transfer_size: usize,
        simultaneous_transfers: usize,
    ) -> LibusbSource {
        LibusbSource {
            handle,
            endpoint,
            transfer_size,
            simultaneous_transfers,
            in_flight: Arc::new(AtomicUsize::new(0)),
            stopping: Arc::new(AtomicBool::new(false)),
            transfers: Mutex::new(Vec::new()),
            event_thread: Mutex::new(None),
        }
    }

    fn context(&self) -> Context {
        self.handle.context().clone()
    }
}

extern "C" fn transfer_callback(transfer: *mut libusb1_sys::libusb_transfer) {
    let result = catch_unwind(|| {
        // Safety: libusb guarantees `transfer` and its `user_data` are valid
        // for the duration of this call.
        unsafe {
            let ctx = &*((*transfer).user_data as *const CallbackContext);
            let status = (*transfer).status;
            let actual_len = (*transfer).actual_length as usize;
            let buf = std::slice::from_raw_parts((*transfer).buffer, actual_len);

            if let Some(sink) = ctx.sink.upgrade() {
                if status == LIBUSB_TRANSFER_COMPLETED {
                    if let Err(e) = sink.on_transfer_complete(buf) {
                        warn!("transfer sink rejected completed transfer: {}", e);
                        sink.on_transfer_error(e);
                    }
                } else {
                    error!("USB transfer completed with status {}", status);
                    sink.on_transfer_error(CaptureError::TransferError(format!(
                        "libusb status {}",
                        status
                    )));
                }
            }

            ctx.in_flight.fetch_sub(1, Ordering::AcqRel);

            if !ctx.stopping.load(Ordering::Acquire) {
                let rc = libusb1_sys::libusb_submit_transfer(transfer);
                if rc == 0 {
                    ctx.in_flight.fetch_add(1, Ordering::AcqRel);
                } else if let Some(sink) = ctx.sink.upgrade() {
                    sink.on_transfer_error(CaptureError::SubmitFailed(format!(
                        "resubmit failed with libusb error {}",
                        rc
                    )));
                }
            }
        }
    });

    if result.is_err() {
        error!("panic unwound out of USB transfer callback; capture will stall");
    }
}

impl TransferSource for LibusbSource {
    fn start(self: Arc<Self>, sink: Weak<dyn TransferSink>) -> CaptureResult<()> {
        let raw_handle = self.handle.as_raw();
        let mut transfers = Vec::with_capacity(self.simultaneous_transfers);

        for _ in 0..self.simultaneous_transfers {
            // Safety: libusb_alloc_transfer(0) is the documented way to
            // allocate a non-isochronous transfer.
            let transfer = unsafe { libusb1_sys::libusb_alloc_transfer(0) };
            if transfer.is_null() {
                for t in &transfers {
                    unsafe { libusb1_sys::libusb_free_transfer(*t) };
                }
                return Err(CaptureError::AllocFailed);
            }

            let buffer = vec![0u8; self.transfer_size].into_boxed_slice();
            let buffer_ptr = Box::into_raw(buffer) as *mut u8;

            let cb_ctx = Box::into_raw(Box::new(CallbackContext {
                sink: sink.clone(),
                in_flight: self.in_flight.clone(),
                stopping: self.stopping.clone(),
            })) as *mut c_void;

            unsafe {
                (*transfer).dev_handle = raw_handle;
                (*transfer).flags = LIBUSB_TRANSFER_SHORT_NOT_OK;
                (*transfer).endpoint = self.endpoint;
                (*transfer).transfer_type = LIBUSB_TRANSFER_TYPE_BULK;
                (*transfer).timeout = SUBMIT_TIMEOUT_MS;
                (*transfer).length = self.transfer_size as i32;
                (*transfer).callback = transfer_callback;
                (*transfer).user_data = cb_ctx;
                (*transfer).buffer = buffer_ptr;
                (*transfer).num_iso_packets = 0;
            }

            transfers.push(transfer);
        }

        for t in &transfers {
            let rc = unsafe { libusb1_sys::libusb_submit_transfer(*t) };
            if rc != 0 {
                self.stopping.store(true, Ordering::Release);
                return Err(CaptureError::SubmitFailed(format!(
                    "initial submit failed with libusb error {}",
                    rc
                )));
            }
            self.in_flight.fetch_add(1, Ordering::AcqRel);
        }

        *self.transfers.lock().unwrap() = transfers;

        let ctx = self.context();
        let stopping = self.stopping.clone();
        let in_flight = self.in_flight.clone();
        let handle = std::thread::spawn(move || {
            debug!("USB event thread started");
            loop {
                let timeout = Duration::from_secs(EVENT_POLL_TIMEOUT_SECS);
                if let Err(e) = ctx.handle_events(Some(timeout)) {
                    error!("libusb_handle_events failed: {}", e);
                    break;
                }
                if stopping.load(Ordering::Acquire) && in_flight.load(Ordering::Acquire) == 0 {
                    break;
                }
            }
            debug!("USB event thread exiting");
        });
        *self.event_thread.lock().unwrap() = Some(handle);

        Ok(())
    }

    fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    fn is_drained(&self) -> bool {
        self.stopping.load(Ordering::Acquire) && self.in_flight.load(Ordering::Acquire) == 0
    }
}

impl Drop for LibusbSource {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.event_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        for t in self.transfers.lock().unwrap().drain(..) {
            unsafe {
                let buf_ptr = (*t).buffer;
                let buf_len = (*t).length as usize;
                let cb_ctx = (*t).user_data as *mut CallbackContext;
                libusb1_sys::libusb_free_transfer(t);
                drop(Box::from_raw(std::slice::from_raw_parts_mut(buf_ptr, buf_len) as *mut [u8]));
                drop(Box::from_raw(cb_ctx));
            }
        }
    }
}

/// In-memory [`TransferSource`] for tests: replays a fixed sequence of
/// buffers synchronously from `start`, with no real concurrency.
pub struct SimulatedSource {
    chunks: Vec<Vec<u8>>,
    fail_at: Option<usize>,
}

impl SimulatedSource {
    pub fn new(chunks: Vec<Vec<u8>>) -> SimulatedSource {
        SimulatedSource { chunks, fail_at: None }
    }

    pub fn with_failure_at(chunks: Vec<Vec<u8>>, fail_at: usize) -> SimulatedSource {
        SimulatedSource { chunks, fail_at: Some(fail_at) }
    }
}

impl TransferSource for SimulatedSource {
    fn start(self: Arc<Self>, sink: Weak<dyn TransferSink>) -> CaptureResult<()> {
        let Some(sink) = sink.upgrade() else {
            return Ok(());
        };
        for (i, chunk) in self.chunks.iter().enumerate() {
            if self.fail_at == Some(i) {
                sink.on_transfer_error(CaptureError::TransferError("simulated failure".into()));
                break;
            }
            sink.on_transfer_complete(chunk)?;
        }
        Ok(())
    }

    fn stop(&self) {}

    fn is_drained(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::diskbuffer::DiskBufferRing;
    use crate::ring::TransferRing;

    #[test]
    fn simulated_source_feeds_ring() {
        let disk_buffers = Arc::new(DiskBufferRing::new(2, 16));
        let ring = Arc::new(TransferRing::new(disk_buffers, 2, 0));
        let source = Arc::new(SimulatedSource::new(vec![vec![1, 2], vec![3, 4]]));
        let sink: Weak<dyn TransferSink> = Arc::downgrade(&(ring.clone() as Arc<dyn TransferSink>));
        source.start(sink).unwrap();
        assert_eq!(ring.disk_buffers().get(0).filled_bytes(), &[1, 2, 3, 4]);
    }
}
