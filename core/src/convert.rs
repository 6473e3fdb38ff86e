//! C6 offline converter: streams a captured file between the packed,
//! decimated, and 16-bit signed formats in fixed-size chunks, reporting
//! progress and respecting a cancel signal.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use log::info;

use crate::codec;
use crate::error::{CaptureError, CaptureResult};
use crate::format::{OutputFormat, SAMPLE_RATE_HZ};

/// Samples processed per chunk; keeps memory bounded on multi-gigabyte files.
pub const CHUNK_SAMPLES: u64 = 10_240_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertOutcome {
    Completed,
    Cancelled,
}

pub struct ConvertRequest {
    pub input_path: PathBuf,
    pub input_format: OutputFormat,
    pub output_path: PathBuf,
    pub output_format: OutputFormat,
    /// Start of the window, in seconds from the start of the capture.
    pub start_seconds: f64,
    /// End of the window, in seconds; `None` means "to EOF", matching the
    /// reference converter's handling of a requested end time past the
    /// data actually present.
    pub end_seconds: Option<f64>,
}

/// Converts the requested `[start_seconds, end_seconds)` window of
/// `req.input_path` from `input_format` to `output_format`, writing
/// `req.output_path`. Calls `progress` with a 0..=100 percentage after each
/// chunk and polls `cancelled` before starting each chunk.
pub fn convert(
    req: &ConvertRequest,
    mut progress: impl FnMut(f64),
    mut cancelled: impl FnMut() -> bool,
) -> CaptureResult<ConvertOutcome> {
    let mut input = File::open(&req.input_path)
        .map_err(|e| CaptureError::OutputOpenFailed(format!("{:?}: {}", req.input_path, e)))?;
    let file_len = input
        .metadata()
        .map_err(|e| CaptureError::MalformedInput(e.to_string()))?
        .len();
    let total_samples = req.input_format.decode_sample_count(file_len);

    if total_samples == 0 {
        // An empty input produces an empty output, not an error (spec.md §8
        // boundary behavior), regardless of the requested window.
        File::create(&req.output_path)
            .map_err(|e| CaptureError::OutputOpenFailed(format!("{:?}: {}", req.output_path, e)))?;
        return Ok(ConvertOutcome::Completed);
    }

    let start_sample = req
        .input_format
        .round_down_to_group(seconds_to_samples(req.start_seconds).min(total_samples));
    let end_sample = match req.end_seconds {
        Some(s) => seconds_to_samples(s).min(total_samples),
        None => total_samples,
    };
    if end_sample <= start_sample {
        return Err(CaptureError::MalformedInput(format!(
            "empty or inverted conversion window [{}, {})",
            start_sample, end_sample
        )));
    }

    let byte_offset = req.input_format.encode_size(start_sample);
    input
        .seek(SeekFrom::Start(byte_offset))
        .map_err(|e| CaptureError::MalformedInput(e.to_string()))?;

    let mut output = File::create(&req.output_path)
        .map_err(|e| CaptureError::OutputOpenFailed(format!("{:?}: {}", req.output_path, e)))?;

    let total = end_sample - start_sample;
    let mut remaining = total;
    let mut processed = 0u64;
    let mut in_buf = Vec::new();
    let mut samples = Vec::new();
    let mut out_buf = Vec::new();

    info!(
        "converting {} samples ({:?} -> {:?})",
        total, req.input_format, req.output_format
    );

    while remaining > 0 {
        if cancelled() {
            return Ok(ConvertOutcome::Cancelled);
        }

        let this_chunk = remaining.min(CHUNK_SAMPLES);
        let read_len = req.input_format.encode_size(this_chunk) as usize;
        in_buf.clear();
        in_buf.resize(read_len, 0);
        input
            .read_exact(&mut in_buf)
            .map_err(|e| CaptureError::MalformedInput(e.to_string()))?;

        samples.clear();
        decode_chunk(&in_buf, req.input_format, &mut samples)?;

        out_buf.clear();
        encode_chunk(&samples, req.output_format, &mut out_buf)?;

        output
            .write_all(&out_buf)
            .map_err(|e| CaptureError::WriteFailed(e.to_string()))?;

        processed += this_chunk;
        remaining -= this_chunk;
        progress(processed as f64 / total as f64 * 100.0);
    }

    output
        .flush()
        .map_err(|e| CaptureError::FlushFailed(e.to_string()))?;
    Ok(ConvertOutcome::Completed)
}

fn seconds_to_samples(seconds: f64) -> u64 {
    (seconds * SAMPLE_RATE_HZ as f64).round() as u64
}

fn decode_chunk(bytes: &[u8], format: OutputFormat, out: &mut Vec<u16>) -> CaptureResult<()> {
    match format {
        OutputFormat::TenBitPacked | OutputFormat::TenBitDecimated => codec::unpack_bytes(bytes, out),
        OutputFormat::SixteenBitSigned => codec::decode_16_signed(bytes, out),
    }
}

fn encode_chunk(samples: &[u16], format: OutputFormat, out: &mut Vec<u8>) -> CaptureResult<()> {
    match format {
        OutputFormat::TenBitPacked => codec::pack_samples(samples, out),
        OutputFormat::SixteenBitSigned => {
            codec::encode_16_signed(samples, out);
            Ok(())
        }
        OutputFormat::TenBitDecimated => {
            let decimated = codec::decimate_4to1(samples);
            codec::pack_samples(&decimated, out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn converts_packed_to_sixteen_bit_and_back() {
        let dir = tempdir().unwrap();
        let samples: Vec<u16> = (0..1024u16).cycle().take(4000).collect();
        let mut packed = Vec::new();
        codec::pack_samples(&samples, &mut packed).unwrap();

        let input_path = dir.path().join("in.lds");
        std::fs::write(&input_path, &packed).unwrap();

        let mid_path = dir.path().join("mid.raw");
        let req = ConvertRequest {
            input_path: input_path.clone(),
            input_format: OutputFormat::TenBitPacked,
            output_path: mid_path.clone(),
            output_format: OutputFormat::SixteenBitSigned,
            start_seconds: 0.0,
            end_seconds: None,
        };
        let outcome = convert(&req, |_| {}, || false).unwrap();
        assert_eq!(outcome, ConvertOutcome::Completed);

        let back_path = dir.path().join("back.lds");
        let req2 = ConvertRequest {
            input_path: mid_path,
            input_format: OutputFormat::SixteenBitSigned,
            output_path: back_path.clone(),
            output_format: OutputFormat::TenBitPacked,
            start_seconds: 0.0,
            end_seconds: None,
        };
        convert(&req2, |_| {}, || false).unwrap();

        let round_tripped = std::fs::read(&back_path).unwrap();
        assert_eq!(round_tripped, packed);
    }

    /// Regression test: an empty input file must produce a zero-length
    /// output, not a `MalformedInput` error from the empty window.
    #[test]
    fn empty_input_produces_empty_output() {
        let dir = tempdir().unwrap();
        let input_path = dir.path().join("empty.lds");
        std::fs::write(&input_path, []).unwrap();

        let output_path = dir.path().join("out.raw");
        let req = ConvertRequest {
            input_path,
            input_format: OutputFormat::TenBitPacked,
            output_path: output_path.clone(),
            output_format: OutputFormat::SixteenBitSigned,
            start_seconds: 0.0,
            end_seconds: None,
        };
        let outcome = convert(&req, |_| {}, || false).unwrap();
        assert_eq!(outcome, ConvertOutcome::Completed);
        assert_eq!(std::fs::metadata(&output_path).unwrap().len(), 0);
    }

    #[test]
    fn cancel_signal_stops_early() {
        let dir = tempdir().unwrap();
        let samples: Vec<u16> = vec![0; 4];
        let mut packed = Vec::new();
        codec::pack_samples(&samples, &mut packed).unwrap();
        let input_path = dir.path().join("in.lds");
        std::fs::write(&input_path, &packed).unwrap();

        let req = ConvertRequest {
            input_path,
            input_format: OutputFormat::TenBitPacked,
            output_path: dir.path().join("out.lds"),
            output_format: OutputFormat::TenBitPacked,
            start_seconds: 0.0,
            end_seconds: None,
        };
        let outcome = convert(&req, |_| {}, || true).unwrap();
        assert_eq!(outcome, ConvertOutcome::Cancelled);
    }
}
