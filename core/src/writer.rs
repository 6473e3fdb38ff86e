//! C4 writer task: drains full disk buffers in ring order, applies the
//! session's codec, and writes to the output sink. Runs on its own thread
//! and is the only actor allowed to block (spec §5).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

use crate::codec;
use crate::error::{CaptureError, CaptureResult};
use crate::format::OutputFormat;
use crate::ring::diskbuffer::DiskBufferRing;
use crate::sink::OutputSink;

const POLL_INTERVAL: Duration = Duration::from_micros(100);

pub struct Writer {
    handle: Option<JoinHandle<CaptureResult<()>>>,
    shutting_down: Arc<AtomicBool>,
    buffers_written: Arc<AtomicUsize>,
}

impl Writer {
    /// Spawns the writer thread. Once [`Writer::request_stop`] has been
    /// called, the writer keeps draining any already-`Full` buffers; once
    /// none remain full and `source_drained()` reports true, it flushes the
    /// sink and exits.
    pub fn spawn(
        ring: Arc<DiskBufferRing>,
        sink: Arc<dyn OutputSink>,
        format: OutputFormat,
        source_drained: impl Fn() -> bool + Send + 'static,
    ) -> Writer {
        let shutting_down = Arc::new(AtomicBool::new(false));
        let buffers_written = Arc::new(AtomicUsize::new(0));
        let shutdown_flag = shutting_down.clone();
        let written_counter = buffers_written.clone();

        let handle = thread::spawn(move || -> CaptureResult<()> {
            let mut consumer = 0usize;
            let mut scratch = Vec::new();
            loop {
                // `take_for_writing` (C3's spec.md §4.3 operation) is a
                // non-blocking check; the short-poll retry loop itself lives
                // here, on the writer thread, since only this thread also
                // needs to observe `shutdown_flag`/`source_drained`.
                if let Some(buf) = ring.take_for_writing(consumer) {
                    scratch.clear();
                    encode_buffer(buf.filled_bytes(), format, &mut scratch)?;
                    sink.write_all(&scratch)?;
                    ring.release(consumer);
                    written_counter.fetch_add(1, Ordering::Relaxed);
                    consumer = (consumer + 1) % ring.len();
                    continue;
                }

                if shutdown_flag.load(Ordering::Acquire) && source_drained() {
                    debug!("writer observed drained source with no buffers pending, flushing");
                    sink.flush()?;
                    return Ok(());
                }

                thread::sleep(POLL_INTERVAL);
            }
        });

        Writer {
            handle: Some(handle),
            shutting_down,
            buffers_written,
        }
    }

    /// Tells the writer a shutdown is underway; it keeps draining full
    /// buffers but will exit once the source reports fully drained and no
    /// buffer remains full.
    pub fn request_stop(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    pub fn buffers_written(&self) -> usize {
        self.buffers_written.load(Ordering::Relaxed)
    }

    /// A cloneable handle to the buffers-written counter that outlives this
    /// `Writer` value, so callers can keep polling progress after taking
    /// ownership of `self` for `join`.
    pub fn buffers_written_handle(&self) -> Arc<AtomicUsize> {
        self.buffers_written.clone()
    }

    /// Blocks until the writer thread exits, returning its terminal result.
    pub fn join(mut self) -> CaptureResult<()> {
        match self.handle.take() {
            Some(h) => h
                .join()
                .unwrap_or_else(|_| Err(CaptureError::WriteFailed("writer thread panicked".into()))),
            None => Ok(()),
        }
    }
}

fn encode_buffer(raw: &[u8], format: OutputFormat, out: &mut Vec<u8>) -> CaptureResult<()> {
    match format {
        OutputFormat::TenBitPacked => {
            out.extend_from_slice(raw);
            Ok(())
        }
        OutputFormat::SixteenBitSigned => {
            let mut samples = Vec::new();
            codec::unpack_bytes(raw, &mut samples)?;
            codec::encode_16_signed(&samples, out);
            Ok(())
        }
        OutputFormat::TenBitDecimated => {
            let mut samples = Vec::new();
            codec::unpack_bytes(raw, &mut samples)?;
            let decimated = codec::decimate_4to1(&samples);
            codec::pack_samples(&decimated, out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::VecSink;
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    #[test]
    fn drains_a_full_buffer_then_stops() {
        let ring = Arc::new(DiskBufferRing::new(1, 20));
        ring.begin_at_start();
        unsafe { ring.get(0).write_at_offset(&[0u8; 20]) };
        ring.publish(0);

        let sink = Arc::new(VecSink::new());
        let drained_flag = Arc::new(StdAtomicBool::new(false));
        let drained_for_closure = drained_flag.clone();

        let writer = Writer::spawn(
            ring,
            sink.clone(),
            OutputFormat::TenBitPacked,
            move || drained_for_closure.load(Ordering::Acquire),
        );

        // give the writer a moment to drain the one full buffer
        std::thread::sleep(Duration::from_millis(20));
        writer.request_stop();
        drained_flag.store(true, Ordering::Release);
        writer.join().unwrap();

        assert_eq!(sink.snapshot().len(), 20);
    }
}
