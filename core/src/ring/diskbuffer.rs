//! C3: the disk buffer ring. A small number of large buffers cycle between
//! "being filled by USB completions" and "being drained by the writer
//! thread". Transitions are the only synchronization point; the byte
//! contents are touched without locks by whichever side currently owns the
//! buffer (spec §4.3/§5 "No locks on the hot path").

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{CaptureError, CaptureResult};

/// Lifecycle of one disk buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BufferState {
    /// Available to receive completed transfer data.
    Empty = 0,
    /// Currently receiving transfer data; not yet full.
    Filling = 1,
    /// Full; waiting for the writer thread.
    Full = 2,
}

impl BufferState {
    fn from_u8(v: u8) -> BufferState {
        match v {
            0 => BufferState::Empty,
            1 => BufferState::Filling,
            2 => BufferState::Full,
            _ => unreachable!("invalid buffer state byte"),
        }
    }
}

/// One fixed-size buffer plus its state machine.
///
/// `bytes` is only ever touched by one logical owner at a time (the
/// completion handler while Filling, the writer while Full), which the state
/// transitions enforce; `UnsafeCell` lets that owner write without going
/// through a lock.
pub struct DiskBuffer {
    bytes: UnsafeCell<Box<[u8]>>,
    state: AtomicU8,
    /// Bytes written so far this fill cycle.
    fill_len: AtomicUsize,
}

// Safety: access to `bytes` is serialized by the Acquire/Release transitions
// on `state`; only one side ever holds logical write access at a time.
unsafe impl Sync for DiskBuffer {}

impl DiskBuffer {
    pub fn new(capacity: usize) -> DiskBuffer {
        DiskBuffer {
            bytes: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
            state: AtomicU8::new(BufferState::Empty as u8),
            fill_len: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> BufferState {
        BufferState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn capacity(&self) -> usize {
        // Safety: length never changes after construction.
        unsafe { (*self.bytes.get()).len() }
    }

    /// Begins a fill cycle: Empty -> Filling. Must be called by exactly one
    /// actor (the completion handler) before any byte writes.
    pub fn begin_fill(&self) {
        debug_assert_eq!(self.state(), BufferState::Empty);
        self.fill_len.store(0, Ordering::Relaxed);
        self.state.store(BufferState::Filling as u8, Ordering::Release);
    }

    /// Appends `data` at the current fill offset. Only valid while Filling
    /// and only from the completion-handler side.
    ///
    /// # Safety
    /// Caller must ensure this buffer is in the `Filling` state and that no
    /// other thread is concurrently writing or reading its bytes.
    pub unsafe fn write_at_offset(&self, data: &[u8]) {
        let offset = self.fill_len.load(Ordering::Relaxed);
        let slice = &mut *self.bytes.get();
        slice[offset..offset + data.len()].copy_from_slice(data);
        self.fill_len.store(offset + data.len(), Ordering::Relaxed);
    }

    /// Discards bytes written so far this fill cycle without changing state,
    /// so the next `write_at_offset` starts over at offset 0. Used once the
    /// transfer ring's flush phase ends, so the first real transfer
    /// overwrites the flush-phase garbage instead of being appended after it.
    pub fn reset_fill_offset(&self) {
        debug_assert_eq!(self.state(), BufferState::Filling);
        self.fill_len.store(0, Ordering::Relaxed);
    }

    /// Marks Filling -> Full. The Release ordering publishes every byte
    /// written during this fill cycle to the writer thread's next Acquire.
    pub fn mark_full(&self) {
        debug_assert_eq!(self.state(), BufferState::Filling);
        self.state.store(BufferState::Full as u8, Ordering::Release);
    }

    /// Reads the filled region. Only valid while Full and only from the
    /// writer side.
    pub fn filled_bytes(&self) -> &[u8] {
        debug_assert_eq!(self.state(), BufferState::Full);
        let len = self.fill_len.load(Ordering::Relaxed);
        // Safety: state is Full, so the completion handler is done writing
        // and the Acquire load of `state` above happens-after its Release.
        unsafe { &(*self.bytes.get())[..len] }
    }

    /// Marks Full -> Empty once the writer has consumed the contents.
    pub fn mark_empty(&self) {
        debug_assert_eq!(self.state(), BufferState::Full);
        self.fill_len.store(0, Ordering::Relaxed);
        self.state.store(BufferState::Empty as u8, Ordering::Release);
    }
}

/// C3: a bounded ring of `K` disk buffers. The producer (transfer ring) and
/// consumer (writer) pointers advance independently, both modulo `K`
/// (spec §4.3); this type owns the buffer allocation and the four
/// operations spec.md §4.3 names, so the state-transition rules live in one
/// place instead of being reimplemented at each call site.
pub struct DiskBufferRing {
    buffers: Vec<Arc<DiskBuffer>>,
}

impl DiskBufferRing {
    pub fn new(count: usize, buffer_bytes: usize) -> DiskBufferRing {
        let buffers = (0..count).map(|_| Arc::new(DiskBuffer::new(buffer_bytes))).collect();
        DiskBufferRing { buffers }
    }

    /// Derives `K` from a configured byte budget, as spec.md §3 allows
    /// implementations to do, never going below 2 (a ring of one buffer
    /// can't overlap filling with draining) and defaulting toward the
    /// reference `K = 4` when the budget divides that evenly.
    pub fn from_budget(byte_budget: usize, buffer_bytes: usize) -> DiskBufferRing {
        let count = (byte_budget / buffer_bytes.max(1)).max(2);
        DiskBufferRing::new(count, buffer_bytes)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffers(&self) -> &[Arc<DiskBuffer>] {
        &self.buffers
    }

    pub fn get(&self, idx: usize) -> &Arc<DiskBuffer> {
        &self.buffers[idx]
    }

    /// Begins filling buffer 0, the ring's initial state.
    pub fn begin_at_start(&self) {
        self.buffers[0].begin_fill();
    }

    /// `acquire_for_fill()`: returns `idx` if it's `Empty` and begins
    /// filling it, else `DiskBufferOverflow` — the writer hasn't kept up.
    /// Never blocks; safe to call from the USB completion path.
    pub fn acquire_for_fill(&self, idx: usize) -> CaptureResult<usize> {
        if self.buffers[idx].state() != BufferState::Empty {
            return Err(CaptureError::DiskBufferOverflow);
        }
        self.buffers[idx].begin_fill();
        Ok(idx)
    }

    /// `publish(full_buffer)`: marks `idx` `Full`, invoked once its last
    /// transfer slot completes.
    pub fn publish(&self, idx: usize) {
        self.buffers[idx].mark_full();
    }

    /// Publishes `full_idx` and acquires the next ring slot for filling, the
    /// combined operation the transfer ring performs every time a buffer's
    /// transfer quota is reached.
    pub fn publish_and_acquire_next(&self, full_idx: usize) -> CaptureResult<usize> {
        self.publish(full_idx);
        self.acquire_for_fill((full_idx + 1) % self.buffers.len())
    }

    /// `take_for_writing()`: non-blocking check of whether `idx` is ready
    /// to be drained. The writer thread owns the short-polling retry loop
    /// (spec §5); this just reports the current state.
    pub fn take_for_writing(&self, idx: usize) -> Option<&Arc<DiskBuffer>> {
        let buf = &self.buffers[idx];
        if buf.state() == BufferState::Full {
            Some(buf)
        } else {
            None
        }
    }

    /// `release(buffer)`: mark `Empty` once the writer has consumed it.
    pub fn release(&self, idx: usize) {
        self.buffers[idx].mark_empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_round_trip() {
        let buf = DiskBuffer::new(16);
        assert_eq!(buf.state(), BufferState::Empty);
        buf.begin_fill();
        assert_eq!(buf.state(), BufferState::Filling);
        unsafe { buf.write_at_offset(&[1, 2, 3]) };
        unsafe { buf.write_at_offset(&[4, 5]) };
        buf.mark_full();
        assert_eq!(buf.state(), BufferState::Full);
        assert_eq!(buf.filled_bytes(), &[1, 2, 3, 4, 5]);
        buf.mark_empty();
        assert_eq!(buf.state(), BufferState::Empty);
    }

    #[test]
    fn ring_cycles_a_buffer_through_acquire_publish_take_release() {
        let ring = DiskBufferRing::new(2, 8);
        ring.begin_at_start();
        unsafe { ring.get(0).write_at_offset(&[1, 2, 3]) };

        let next = ring.publish_and_acquire_next(0).unwrap();
        assert_eq!(next, 1);
        assert_eq!(ring.get(0).state(), BufferState::Full);
        assert_eq!(ring.get(1).state(), BufferState::Filling);

        let ready = ring.take_for_writing(0).unwrap();
        assert_eq!(ready.filled_bytes(), &[1, 2, 3]);
        ring.release(0);
        assert_eq!(ring.get(0).state(), BufferState::Empty);
        assert!(ring.take_for_writing(0).is_none());
    }

    #[test]
    fn acquire_for_fill_overflows_when_not_empty() {
        let ring = DiskBufferRing::new(2, 8);
        ring.begin_at_start();
        ring.publish(0);
        // buffer 1 was never drained, so acquiring it again must overflow.
        ring.acquire_for_fill(1).unwrap();
        let err = ring.acquire_for_fill(1).unwrap_err();
        assert!(matches!(err, CaptureError::DiskBufferOverflow));
    }

    #[test]
    fn from_budget_never_goes_below_two_buffers() {
        let ring = DiskBufferRing::from_budget(1, 1024);
        assert_eq!(ring.len(), 2);
    }
}
