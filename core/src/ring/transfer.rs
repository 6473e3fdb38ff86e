//! C2: the transfer ring. Sits between the USB source and the disk buffer
//! ring (C3, [`DiskBufferRing`]), replaying the completion-routing logic of
//! the original capture loop: each completed transfer's bytes are appended
//! to the current disk buffer; when a buffer fills, the ring acquires the
//! next one and flags an overflow if that buffer isn't Empty yet.
//!
//! The first `simultaneous_transfers` completions are a "flush" phase: the
//! device delivers hardware-pipeline garbage for its initial burst. Those
//! bytes are written into buffer 0 like any other completion, but once the
//! flush phase ends its fill offset is reset to zero so the first real
//! transfer overwrites the garbage from the start of the buffer, exactly as
//! spec'd ("reusing slots 0..N-1 ... and overwrit[ing] them once real data
//! starts") rather than being appended after it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{CaptureError, CaptureResult};
use crate::ring::diskbuffer::DiskBufferRing;

/// Sink for completed USB transfers, implemented by [`TransferRing`].
pub trait TransferSink: Send + Sync {
    /// Delivers one completed transfer's payload, in submission order.
    fn on_transfer_complete(&self, data: &[u8]) -> CaptureResult<()>;
    /// Reports a transfer that completed with a non-success status.
    fn on_transfer_error(&self, err: CaptureError);
}

/// Source of USB transfers, implemented by the libusb-backed source and by
/// test doubles.
pub trait TransferSource: Send + Sync {
    /// Submits the initial burst of transfers and keeps resubmitting
    /// completed ones, delivering each to `sink`, until `stop()` is called
    /// or an unrecoverable error is reported.
    fn start(self: Arc<Self>, sink: Weak<dyn TransferSink>) -> CaptureResult<()>;

    /// Requests that no further transfers be submitted once those already
    /// in flight complete. Idempotent.
    fn stop(&self);

    /// True once every previously submitted transfer has completed.
    fn is_drained(&self) -> bool;
}

/// Routes completed transfer bytes into a [`DiskBufferRing`].
pub struct TransferRing {
    ring: Arc<DiskBufferRing>,
    transfers_per_disk_buffer: usize,
    simultaneous_transfers: usize,

    current_buffer: AtomicUsize,
    transfer_count_in_buffer: AtomicUsize,
    flush_counter: AtomicUsize,
    overflowed: AtomicBool,
    failed: AtomicBool,
}

impl TransferRing {
    pub fn new(
        ring: Arc<DiskBufferRing>,
        transfers_per_disk_buffer: usize,
        simultaneous_transfers: usize,
    ) -> TransferRing {
        ring.begin_at_start();
        TransferRing {
            ring,
            transfers_per_disk_buffer,
            simultaneous_transfers,
            current_buffer: AtomicUsize::new(0),
            transfer_count_in_buffer: AtomicUsize::new(0),
            flush_counter: AtomicUsize::new(0),
            overflowed: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        }
    }

    pub fn has_overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// The disk buffer ring this routes into, exposed so the writer side can
    /// enumerate it independent of the transfer-routing path.
    pub fn disk_buffers(&self) -> &Arc<DiskBufferRing> {
        &self.ring
    }

    fn advance_buffer(&self) -> CaptureResult<()> {
        let prev = self.current_buffer.load(Ordering::Relaxed);
        match self.ring.publish_and_acquire_next(prev) {
            Ok(next) => {
                self.current_buffer.store(next, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                self.overflowed.store(true, Ordering::Release);
                Err(e)
            }
        }
    }
}

impl TransferSink for TransferRing {
    fn on_transfer_complete(&self, data: &[u8]) -> CaptureResult<()> {
        if self.failed.load(Ordering::Acquire) {
            return Ok(());
        }

        // During the initial flush phase (the first `simultaneous_transfers`
        // completions), write to buffer 0 like normal but discard the result:
        // once the phase ends, reset its fill offset so real data overwrites
        // this garbage instead of being appended after it.
        if self.flush_counter.load(Ordering::Relaxed) < self.simultaneous_transfers {
            let idx = self.current_buffer.load(Ordering::Relaxed);
            unsafe { self.ring.get(idx).write_at_offset(data) };
            let flushed = self.flush_counter.fetch_add(1, Ordering::Relaxed) + 1;
            if flushed == self.simultaneous_transfers {
                self.ring.get(idx).reset_fill_offset();
            }
            return Ok(());
        }

        let idx = self.current_buffer.load(Ordering::Relaxed);
        unsafe { self.ring.get(idx).write_at_offset(data) };

        let count = self.transfer_count_in_buffer.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.transfers_per_disk_buffer {
            self.transfer_count_in_buffer.store(0, Ordering::Relaxed);
            self.advance_buffer()?;
        }
        Ok(())
    }

    fn on_transfer_error(&self, _err: CaptureError) {
        self.failed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::diskbuffer::BufferState;

    fn make_ring(buf_count: usize, transfers_per_buffer: usize, simultaneous: usize, cap: usize) -> TransferRing {
        let ring = Arc::new(DiskBufferRing::new(buf_count, cap));
        TransferRing::new(ring, transfers_per_buffer, simultaneous)
    }

    #[test]
    fn fills_and_advances_buffers() {
        let ring = make_ring(2, 2, 1, 4);
        // flush phase: written then discarded, buffer 0 stays Filling at offset 0.
        ring.on_transfer_complete(&[0xAA, 0xAA]).unwrap();
        assert_eq!(ring.disk_buffers().get(0).state(), BufferState::Filling);

        // two real completions fill buffer 0 to its quota, rolling to buffer 1.
        ring.on_transfer_complete(&[1, 2]).unwrap();
        ring.on_transfer_complete(&[3, 4]).unwrap();
        assert_eq!(ring.disk_buffers().get(0).state(), BufferState::Full);
        assert_eq!(ring.disk_buffers().get(0).filled_bytes(), &[1, 2, 3, 4]);
        assert_eq!(ring.disk_buffers().get(1).state(), BufferState::Filling);
    }

    /// Regression test for a bug where flush-phase bytes were never
    /// discarded: real transfers were appended after them instead of
    /// overwriting from offset 0, eventually writing past the end of a
    /// buffer sized for exactly `transfers_per_disk_buffer` transfers.
    #[test]
    fn flush_phase_garbage_is_overwritten_not_appended() {
        let payload_len = 2;
        let simultaneous = 3;
        let quota = 4;
        let cap = payload_len * quota;
        let ring = make_ring(2, quota, simultaneous, cap);

        for _ in 0..simultaneous {
            ring.on_transfer_complete(&[0xAA, 0xAA]).unwrap();
        }
        assert_eq!(ring.disk_buffers().get(0).state(), BufferState::Filling);

        for i in 0..quota {
            let b = (i as u8) * 2;
            ring.on_transfer_complete(&[b, b + 1]).unwrap();
        }

        assert_eq!(ring.disk_buffers().get(0).state(), BufferState::Full);
        assert_eq!(
            ring.disk_buffers().get(0).filled_bytes(),
            &[0, 1, 2, 3, 4, 5, 6, 7]
        );
        assert_eq!(ring.disk_buffers().get(1).state(), BufferState::Filling);
    }

    #[test]
    fn overflow_detected_when_next_buffer_still_full() {
        let ring = make_ring(2, 1, 0, 8);
        ring.on_transfer_complete(&[1]).unwrap(); // fills+advances to buffer 1
        assert_eq!(ring.disk_buffers().get(1).state(), BufferState::Filling);
        // buffer 0 is Full and never drained; next advance should overflow.
        let err = ring.on_transfer_complete(&[2]).unwrap_err();
        assert!(matches!(err, CaptureError::DiskBufferOverflow));
        assert!(ring.has_overflowed());
    }
}
