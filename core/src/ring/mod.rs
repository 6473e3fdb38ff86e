//! Ring buffers for the capture pipeline: C2 (transfer routing) and C3
//! (disk buffers awaiting write).

pub mod diskbuffer;
pub mod transfer;

pub use diskbuffer::{BufferState, DiskBuffer, DiskBufferRing};
pub use transfer::{TransferRing, TransferSink, TransferSource};
