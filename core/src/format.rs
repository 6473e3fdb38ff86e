//! Output format definitions (spec §6 "Output file formats").

use serde::{Deserialize, Serialize};

/// One of the three on-disk sample encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputFormat {
    /// Canonical lossless layout: 4 samples packed into 5 bytes. Extension `.lds`.
    TenBitPacked,
    /// Little-endian i16, `(u - 512) * 64`. Extension `.raw`.
    SixteenBitSigned,
    /// Packed 10-bit, keeping one sample in four. Used for CD-format archival.
    TenBitDecimated,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::TenBitPacked
    }
}

pub const SAMPLE_RATE_HZ: u64 = 40_000_000;

impl OutputFormat {
    /// Conventional file extension for this format.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::TenBitPacked => "lds",
            OutputFormat::SixteenBitSigned => "raw",
            OutputFormat::TenBitDecimated => "lds",
        }
    }

    /// Number of output bytes produced by encoding `sample_count` input samples.
    ///
    /// For the packed formats this assumes `sample_count` is already a whole
    /// number of 4-sample groups (16-sample groups for the decimated form);
    /// callers that don't control that invariant should round down first.
    pub fn encode_size(self, sample_count: u64) -> u64 {
        match self {
            OutputFormat::TenBitPacked => sample_count * 5 / 4,
            OutputFormat::SixteenBitSigned => sample_count * 2,
            OutputFormat::TenBitDecimated => (sample_count / 16) * 5,
        }
    }

    /// Largest whole number of samples this format can decode from `byte_len` bytes.
    pub fn decode_sample_count(self, byte_len: u64) -> u64 {
        match self {
            OutputFormat::TenBitPacked => (byte_len / 5) * 4,
            OutputFormat::SixteenBitSigned => byte_len / 2,
            OutputFormat::TenBitDecimated => (byte_len / 5) * 4,
        }
    }

    /// Rounds a sample offset down to the start of its enclosing group, so a
    /// seek to a non-aligned offset in a packed file lands on a group boundary
    /// (spec §8 "Boundary behaviors").
    pub fn round_down_to_group(self, sample_offset: u64) -> u64 {
        match self {
            OutputFormat::TenBitPacked => (sample_offset / 4) * 4,
            OutputFormat::SixteenBitSigned => sample_offset,
            OutputFormat::TenBitDecimated => (sample_offset / 16) * 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_bit_packed_size() {
        assert_eq!(OutputFormat::TenBitPacked.encode_size(4), 5);
        assert_eq!(OutputFormat::TenBitPacked.encode_size(40_000_000), 50_000_000);
    }

    #[test]
    fn sixteen_bit_size() {
        assert_eq!(OutputFormat::SixteenBitSigned.encode_size(0), 0);
        assert_eq!(OutputFormat::SixteenBitSigned.encode_size(3), 6);
    }

    #[test]
    fn round_down_group() {
        assert_eq!(OutputFormat::TenBitPacked.round_down_to_group(7), 4);
        assert_eq!(OutputFormat::TenBitPacked.round_down_to_group(8), 8);
    }
}
