//! C6 test-pattern verifier: reads a capture made with the device's
//! self-test mode and confirms every sample is exactly one more than the
//! last, modulo a wrap length `L` auto-detected from the first wrap
//! (grounded in `analysetestdata.cpp`'s `testDataMax` detection).

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::info;

use crate::codec;
use crate::error::{CaptureError, CaptureResult};
use crate::format::OutputFormat;

const CHUNK_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyReport {
    pub samples_checked: u64,
    /// The wrap length detected from the first wrap: 1021 or 1024.
    pub wrap_length: u16,
    pub initial_value: u16,
}

/// Verifies a 10-bit packed test-pattern capture. Fails on the first sample
/// that isn't `(prev + 1) mod L`, where `L` is discovered the first time the
/// sequence wraps back toward zero.
pub fn verify_test_pattern(path: &Path) -> CaptureResult<VerifyReport> {
    let mut file = File::open(path)
        .map_err(|e| CaptureError::OutputOpenFailed(format!("{:?}: {}", path, e)))?;

    let mut wrap_length: Option<u16> = None;
    let mut prev: Option<u16> = None;
    let mut initial_value = 0u16;
    let mut index = 0u64;
    let mut buf = vec![0u8; CHUNK_BYTES - (CHUNK_BYTES % 5)];
    let mut samples = Vec::new();

    loop {
        let read = read_up_to(&mut file, &mut buf)
            .map_err(|e| CaptureError::MalformedInput(e.to_string()))?;
        if read == 0 {
            break;
        }
        if read % 5 != 0 {
            return Err(CaptureError::MalformedInput(format!(
                "file length is not a multiple of 5 bytes at offset ~{}",
                index
            )));
        }

        samples.clear();
        codec::unpack_bytes(&buf[..read], &mut samples)?;

        for &current in &samples {
            match prev {
                None => {
                    initial_value = current;
                }
                Some(p) => {
                    if wrap_length.is_none() && current == 0 && (p == 1021 || p == 1024) {
                        wrap_length = Some(p + 1);
                        info!("detected test pattern wrap length L={}", p + 1);
                    }

                    let expected = match wrap_length {
                        Some(l) => (p + 1) % l,
                        None => p + 1,
                    };
                    if current != expected {
                        return Err(CaptureError::TestVerifyFailed {
                            index,
                            expected,
                            got: current,
                        });
                    }
                }
            }
            prev = Some(current);
            index += 1;
        }
    }

    Ok(VerifyReport {
        samples_checked: index,
        wrap_length: wrap_length.unwrap_or(1024),
        initial_value,
    })
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// Convenience for capture pipelines that want to verify a file encoded in a
/// non-packed format; decodes to samples first.
pub fn verify_test_pattern_with_format(path: &Path, format: OutputFormat) -> CaptureResult<VerifyReport> {
    if format == OutputFormat::TenBitPacked {
        return verify_test_pattern(path);
    }
    let bytes = std::fs::read(path)
        .map_err(|e| CaptureError::OutputOpenFailed(format!("{:?}: {}", path, e)))?;
    let mut samples = Vec::new();
    match format {
        OutputFormat::SixteenBitSigned => codec::decode_16_signed(&bytes, &mut samples)?,
        OutputFormat::TenBitDecimated => codec::unpack_bytes(&bytes, &mut samples)?,
        OutputFormat::TenBitPacked => unreachable!(),
    }
    verify_samples(&samples)
}

fn verify_samples(samples: &[u16]) -> CaptureResult<VerifyReport> {
    let mut wrap_length: Option<u16> = None;
    let mut prev: Option<u16> = None;
    let mut initial_value = 0u16;

    for (index, &current) in samples.iter().enumerate() {
        match prev {
            None => initial_value = current,
            Some(p) => {
                if wrap_length.is_none() && current == 0 && (p == 1021 || p == 1024) {
                    wrap_length = Some(p + 1);
                }
                let expected = match wrap_length {
                    Some(l) => (p + 1) % l,
                    None => p + 1,
                };
                if current != expected {
                    return Err(CaptureError::TestVerifyFailed {
                        index: index as u64,
                        expected,
                        got: current,
                    });
                }
            }
        }
        prev = Some(current);
    }

    Ok(VerifyReport {
        samples_checked: samples.len() as u64,
        wrap_length: wrap_length.unwrap_or(1024),
        initial_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_pattern(path: &Path, len: usize, wrap: u16) {
        let samples: Vec<u16> = (0..len as u16).map(|i| i % wrap).collect();
        let mut bytes = Vec::new();
        codec::pack_samples(&samples, &mut bytes).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn detects_wrap_1024() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.lds");
        write_pattern(&path, 4096, 1024);
        let report = verify_test_pattern(&path).unwrap();
        assert_eq!(report.wrap_length, 1024);
        assert_eq!(report.initial_value, 0);
        assert_eq!(report.samples_checked, 4096);
    }

    #[test]
    fn detects_wrap_1021() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.lds");
        write_pattern(&path, 4092, 1021);
        let report = verify_test_pattern(&path).unwrap();
        assert_eq!(report.wrap_length, 1021);
    }

    #[test]
    fn flags_a_broken_sample() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.lds");
        let mut samples: Vec<u16> = (0..64u16).collect();
        samples[10] = 999;
        let mut bytes = Vec::new();
        codec::pack_samples(&samples, &mut bytes).unwrap();
        std::fs::write(&path, bytes).unwrap();

        let err = verify_test_pattern(&path).unwrap_err();
        assert!(matches!(err, CaptureError::TestVerifyFailed { index: 10, .. }));
    }
}
