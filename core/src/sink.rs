//! Output sinks for the writer (C4): where converted bytes ultimately land.
//! A trait so the writer and converter can be driven in tests without
//! touching the filesystem.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{CaptureError, CaptureResult};

/// Buffer size for `FileSink`'s `BufWriter`, chosen to comfortably hold one
/// packed disk-buffer write without an extra syscall per write_all call.
const FILE_SINK_BUF_SIZE: usize = 1 << 20;

pub trait OutputSink: Send + Sync {
    fn write_all(&self, data: &[u8]) -> CaptureResult<()>;
    fn flush(&self) -> CaptureResult<()>;
}

/// Writes to a plain file, opened truncate-create at construction, through a
/// `BufWriter` matching the teacher's own debug-file writer.
pub struct FileSink {
    file: Mutex<BufWriter<File>>,
}

impl FileSink {
    pub fn create(path: &Path) -> CaptureResult<FileSink> {
        let file = File::create(path)
            .map_err(|e| CaptureError::OutputOpenFailed(format!("{:?}: {}", path, e)))?;
        Ok(FileSink {
            file: Mutex::new(BufWriter::with_capacity(FILE_SINK_BUF_SIZE, file)),
        })
    }
}

impl OutputSink for FileSink {
    fn write_all(&self, data: &[u8]) -> CaptureResult<()> {
        let mut file = self.file.lock().unwrap();
        file.write_all(data)
            .map_err(|e| CaptureError::WriteFailed(e.to_string()))
    }

    fn flush(&self) -> CaptureResult<()> {
        let mut file = self.file.lock().unwrap();
        file.flush().map_err(|e| CaptureError::FlushFailed(e.to_string()))
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct VecSink {
    data: Mutex<Vec<u8>>,
}

impl VecSink {
    pub fn new() -> VecSink {
        VecSink::default()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data.into_inner().unwrap()
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

impl OutputSink for VecSink {
    fn write_all(&self, data: &[u8]) -> CaptureResult<()> {
        self.data.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn flush(&self) -> CaptureResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_sink_accumulates() {
        let sink = VecSink::new();
        sink.write_all(&[1, 2]).unwrap();
        sink.write_all(&[3]).unwrap();
        assert_eq!(sink.snapshot(), vec![1, 2, 3]);
    }
}
