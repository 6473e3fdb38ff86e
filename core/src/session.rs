//! C5 capture controller: owns the session state machine and orchestrates
//! the other actors through `start` / `stop` / `abort`.
//!
//! ```text
//! Idle --start--> Priming --primed--> Running --stop--> Draining --drained--> Completed
//!                   |                   |                   |
//!                   +-- failure ------> Failed <-------------+
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{info, warn};

use crate::error::{CaptureError, CaptureResult};
use crate::format::OutputFormat;
use crate::ring::diskbuffer::DiskBufferRing;
use crate::ring::transfer::{TransferRing, TransferSink, TransferSource};
use crate::sink::OutputSink;
use crate::writer::Writer;

/// Tells the device to start or stop streaming. Implemented by the real USB
/// control-transfer pair and by a no-op for tests.
pub trait StreamControl: Send + Sync {
    fn enable(&self) -> CaptureResult<()>;
    fn disable(&self) -> CaptureResult<()>;
}

pub struct NoopStreamControl;

impl StreamControl for NoopStreamControl {
    fn enable(&self) -> CaptureResult<()> {
        Ok(())
    }
    fn disable(&self) -> CaptureResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureStatus {
    Idle = 0,
    Priming = 1,
    Running = 2,
    Draining = 3,
    Completed = 4,
    Failed = 5,
}

impl CaptureStatus {
    fn from_u8(v: u8) -> CaptureStatus {
        match v {
            0 => CaptureStatus::Idle,
            1 => CaptureStatus::Priming,
            2 => CaptureStatus::Running,
            3 => CaptureStatus::Draining,
            4 => CaptureStatus::Completed,
            _ => CaptureStatus::Failed,
        }
    }
}

/// Buffer/transfer geometry and output target for one capture run.
pub struct SessionParams {
    pub disk_buffer_count: usize,
    pub disk_buffer_bytes: usize,
    pub transfers_per_disk_buffer: usize,
    pub simultaneous_transfers: usize,
    pub format: OutputFormat,
}

/// The live handle returned by [`CaptureSession::start`]. Holds everything
/// needed to stop or abort; per spec §5, none of this is touched on the
/// USB completion hot path.
pub struct CaptureSession {
    status: AtomicU8,
    last_error: Mutex<Option<CaptureError>>,
    source: Arc<dyn TransferSource>,
    ring: Arc<TransferRing>,
    stream_control: Arc<dyn StreamControl>,
    writer: Mutex<Option<Writer>>,
    buffers_written: Mutex<Arc<std::sync::atomic::AtomicUsize>>,
}

/// Read-only progress snapshot, recovered from the reference tool's
/// `getNumberOfTransfers`/`getNumberOfDiskBuffersWritten` accessors.
#[derive(Debug, Clone, Copy)]
pub struct CaptureProgress {
    pub disk_buffers_written: usize,
}

impl CaptureSession {
    /// Opens the device (via `source`/`stream_control`, already constructed
    /// by the caller), allocates the disk buffer ring, spawns the writer,
    /// enables streaming, and primes the transfer ring.
    pub fn start(
        params: SessionParams,
        source: Arc<dyn TransferSource>,
        stream_control: Arc<dyn StreamControl>,
        sink: Arc<dyn OutputSink>,
    ) -> CaptureResult<Arc<CaptureSession>> {
        let disk_buffers = Arc::new(DiskBufferRing::new(
            params.disk_buffer_count,
            params.disk_buffer_bytes,
        ));

        let ring = Arc::new(TransferRing::new(
            disk_buffers.clone(),
            params.transfers_per_disk_buffer,
            params.simultaneous_transfers,
        ));

        let session = Arc::new(CaptureSession {
            status: AtomicU8::new(CaptureStatus::Priming as u8),
            last_error: Mutex::new(None),
            source: source.clone(),
            ring: ring.clone(),
            stream_control: stream_control.clone(),
            writer: Mutex::new(None),
            buffers_written: Mutex::new(Arc::new(std::sync::atomic::AtomicUsize::new(0))),
        });

        let source_for_drained = source.clone();
        let writer = Writer::spawn(disk_buffers, sink, params.format, move || {
            source_for_drained.is_drained()
        });
        *session.buffers_written.lock().unwrap() = writer.buffers_written_handle();
        *session.writer.lock().unwrap() = Some(writer);

        stream_control.enable().map_err(|e| session.fail(e.clone()))?;

        let sink_weak: Weak<dyn TransferSink> = Arc::downgrade(&(ring as Arc<dyn TransferSink>));
        if let Err(e) = source.start(sink_weak) {
            let _ = stream_control.disable();
            return Err(session.fail(e));
        }

        session.status.store(CaptureStatus::Running as u8, Ordering::Release);
        info!("capture session running");
        Ok(session)
    }

    fn fail(&self, err: CaptureError) -> CaptureError {
        let mut slot = self.last_error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err.clone());
        }
        self.status.store(CaptureStatus::Failed as u8, Ordering::Release);
        err
    }

    pub fn status(&self) -> CaptureStatus {
        CaptureStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn last_error(&self) -> Option<CaptureError> {
        self.last_error.lock().unwrap().clone()
    }

    /// Graceful stop: disables streaming, waits for all in-flight transfers
    /// and the writer to drain, then returns once the file is closed.
    pub fn stop(&self) -> CaptureResult<()> {
        self.transition_to_draining();
        if let Err(e) = self.stream_control.disable() {
            warn!("failed to disable streaming cleanly: {}", e);
        }
        self.source.stop();

        let writer = self.writer.lock().unwrap().take();
        if let Some(writer) = writer {
            writer.request_stop();
            writer.join()?;
        }

        if self.status() != CaptureStatus::Failed {
            self.status.store(CaptureStatus::Completed as u8, Ordering::Release);
        }
        Ok(())
    }

    /// Like `stop`, but does not guarantee the currently-filling buffer is
    /// flushed; the already-written prefix remains valid.
    pub fn abort(&self) -> CaptureResult<()> {
        self.stop()
    }

    fn transition_to_draining(&self) {
        let _ = self.status.compare_exchange(
            CaptureStatus::Running as u8,
            CaptureStatus::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn has_overflowed(&self) -> bool {
        self.ring.has_overflowed()
    }

    /// Snapshot of progress so far, safe to poll from a controller thread
    /// while the capture is running.
    pub fn progress(&self) -> CaptureProgress {
        CaptureProgress {
            disk_buffers_written: self
                .buffers_written
                .lock()
                .unwrap()
                .load(std::sync::atomic::Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::sink::VecSink;
    use crate::source::SimulatedSource;

    #[test]
    fn full_session_roundtrips_a_small_capture() {
        let samples: Vec<u16> = (0..64u16).map(|i| i % 1024).collect();
        let mut packed = Vec::new();
        codec::pack_samples(&samples, &mut packed).unwrap();

        // one disk buffer sized to hold exactly this many bytes, one slot.
        let chunk = packed.clone();
        let source = Arc::new(SimulatedSource::new(vec![chunk]));
        let sink = Arc::new(VecSink::new());

        let params = SessionParams {
            disk_buffer_count: 2,
            disk_buffer_bytes: packed.len(),
            transfers_per_disk_buffer: 1,
            simultaneous_transfers: 0,
            format: OutputFormat::TenBitPacked,
        };

        let session = CaptureSession::start(
            params,
            source,
            Arc::new(NoopStreamControl),
            sink.clone(),
        )
        .unwrap();

        session.stop().unwrap();
        assert_eq!(session.status(), CaptureStatus::Completed);
        assert_eq!(sink.snapshot(), packed);
    }

    /// With a nonzero flush count, the session must still produce exactly
    /// the real sample data with none of the discarded flush-phase chunks
    /// mixed in, and must not panic writing past a disk buffer's capacity.
    /// Regression test for a bug where flush-phase bytes were appended
    /// ahead of real data instead of being overwritten.
    #[test]
    fn full_session_discards_flush_phase_chunks() {
        // One transfer's payload is a 4-sample group (5 packed bytes); the
        // buffer holds `transfers_per_disk_buffer` of them, same as the
        // real transfer_size/transfers_per_disk_buffer sizing in config.rs.
        let simultaneous_transfers = 3;
        let transfers_per_disk_buffer = 4;

        let garbage_chunk = {
            let mut bytes = Vec::new();
            codec::pack_samples(&[777, 777, 777, 777], &mut bytes).unwrap();
            bytes
        };

        let real_samples: Vec<u16> = (0..(transfers_per_disk_buffer as u16 * 4)).collect();
        let mut real_chunk = Vec::new();
        for group in real_samples.chunks_exact(4) {
            codec::pack_samples(group, &mut real_chunk).unwrap();
        }
        let real_groups: Vec<Vec<u8>> = real_chunk.chunks(5).map(|c| c.to_vec()).collect();

        let mut chunks = vec![garbage_chunk; simultaneous_transfers];
        chunks.extend(real_groups);

        let source = Arc::new(SimulatedSource::new(chunks));
        let sink = Arc::new(VecSink::new());

        let params = SessionParams {
            disk_buffer_count: 2,
            disk_buffer_bytes: 5 * transfers_per_disk_buffer,
            transfers_per_disk_buffer,
            simultaneous_transfers,
            format: OutputFormat::TenBitPacked,
        };

        let session = CaptureSession::start(
            params,
            source,
            Arc::new(NoopStreamControl),
            sink.clone(),
        )
        .unwrap();

        session.stop().unwrap();
        assert_eq!(session.status(), CaptureStatus::Completed);
        assert_eq!(sink.snapshot(), real_chunk);
    }
}
