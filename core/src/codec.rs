//! Bit codec (C1): reversible 10-bit packed <-> 16-bit signed scaling, and the
//! packed <-> unpacked byte transforms that the writer and converter build on.
//!
//! Pure functions, no I/O. Operates on whole disk-buffer-sized slices in the
//! hot path; the public entry points here work on arbitrary slices so tests
//! and the converter can drive them in small or large chunks.

use crate::error::{CaptureError, CaptureResult};

/// Packs four 10-bit samples (low 10 bits significant) into 5 bytes.
#[inline]
pub fn pack_group(w: [u16; 4]) -> [u8; 5] {
    let (w0, w1, w2, w3) = (w[0] as u32, w[1] as u32, w[2] as u32, w[3] as u32);
    [
        ((w0 >> 2) & 0xFF) as u8,
        (((w0 & 0x3) << 6) | ((w1 >> 4) & 0x3F)) as u8,
        (((w1 & 0xF) << 4) | ((w2 >> 6) & 0x0F)) as u8,
        (((w2 & 0x3F) << 2) | ((w3 >> 8) & 0x03)) as u8,
        (w3 & 0xFF) as u8,
    ]
}

/// Inverse of [`pack_group`].
#[inline]
pub fn unpack_group(b: [u8; 5]) -> [u16; 4] {
    let (b0, b1, b2, b3, b4) = (
        b[0] as u32,
        b[1] as u32,
        b[2] as u32,
        b[3] as u32,
        b[4] as u32,
    );
    [
        ((b0 << 2) | (b1 >> 6)) as u16,
        (((b1 & 0x3F) << 4) | (b2 >> 4)) as u16,
        (((b2 & 0x0F) << 6) | (b3 >> 2)) as u16,
        (((b3 & 0x03) << 8) | b4) as u16,
    ]
}

/// Packs a whole sample slice. `samples.len()` must be a multiple of 4.
pub fn pack_samples(samples: &[u16], out: &mut Vec<u8>) -> CaptureResult<()> {
    if samples.len() % 4 != 0 {
        return Err(CaptureError::MalformedInput(format!(
            "sample count {} is not a multiple of 4",
            samples.len()
        )));
    }
    out.reserve(samples.len() * 5 / 4);
    for group in samples.chunks_exact(4) {
        let packed = pack_group([group[0], group[1], group[2], group[3]]);
        out.extend_from_slice(&packed);
    }
    Ok(())
}

/// Unpacks a whole byte slice in the 10-bit packed format. `bytes.len()` must
/// be a multiple of 5.
pub fn unpack_bytes(bytes: &[u8], out: &mut Vec<u16>) -> CaptureResult<()> {
    if bytes.len() % 5 != 0 {
        return Err(CaptureError::MalformedInput(format!(
            "byte length {} is not a multiple of 5",
            bytes.len()
        )));
    }
    out.reserve(bytes.len() / 5 * 4);
    for group in bytes.chunks_exact(5) {
        let unpacked = unpack_group([group[0], group[1], group[2], group[3], group[4]]);
        out.extend_from_slice(&unpacked);
    }
    Ok(())
}

/// `u in [0, 1023] -> s = (u - 512) * 64`, exactly reversible.
#[inline]
pub fn scale_to_16(u: u16) -> i16 {
    (((u as i32) - 512) * 64) as i16
}

/// Inverse of [`scale_to_16`].
#[inline]
pub fn unscale_from_16(s: i16) -> u16 {
    (((s as i32) / 64) + 512) as u16
}

/// Encodes a sample slice as little-endian signed 16-bit words.
pub fn encode_16_signed(samples: &[u16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for &u in samples {
        out.extend_from_slice(&scale_to_16(u).to_le_bytes());
    }
}

/// Decodes little-endian signed 16-bit words back to 10-bit unsigned samples.
/// `bytes.len()` must be a multiple of 2.
pub fn decode_16_signed(bytes: &[u8], out: &mut Vec<u16>) -> CaptureResult<()> {
    if bytes.len() % 2 != 0 {
        return Err(CaptureError::MalformedInput(format!(
            "byte length {} is not a multiple of 2",
            bytes.len()
        )));
    }
    out.reserve(bytes.len() / 2);
    for pair in bytes.chunks_exact(2) {
        let s = i16::from_le_bytes([pair[0], pair[1]]);
        out.push(unscale_from_16(s));
    }
    Ok(())
}

/// Keeps one sample in four: the samples at offsets 0, 4, 8, 12 of each
/// 16-sample chunk. A trailing partial chunk of fewer than 16 samples is
/// dropped entirely rather than partially decimated (spec §8 "Boundary
/// behaviors").
pub fn decimate_4to1(samples: &[u16]) -> Vec<u16> {
    let whole_chunks = samples.len() / 16;
    let mut out = Vec::with_capacity(whole_chunks * 4);
    for chunk in samples.chunks_exact(16) {
        out.push(chunk[0]);
        out.push(chunk[4]);
        out.push(chunk[8]);
        out.push(chunk[12]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn pack_unpack_known_values() {
        let packed = pack_group([0, 0, 0, 0]);
        assert_eq!(packed, [0, 0, 0, 0, 0]);
        assert_eq!(unpack_group(packed), [0, 0, 0, 0]);

        let packed = pack_group([1023, 1023, 1023, 1023]);
        assert_eq!(unpack_group(packed), [1023, 1023, 1023, 1023]);
    }

    #[test]
    fn scale_edge_values() {
        assert_eq!(scale_to_16(0).to_le_bytes(), [0x00, 0x80]);
        assert_eq!(scale_to_16(512).to_le_bytes(), [0x00, 0x00]);
        assert_eq!(scale_to_16(1023).to_le_bytes(), [0xC0, 0x7F]);

        assert_eq!(unscale_from_16(scale_to_16(0)), 0);
        assert_eq!(unscale_from_16(scale_to_16(512)), 512);
        assert_eq!(unscale_from_16(scale_to_16(1023)), 1023);
    }

    #[test]
    fn decimate_short_input_is_empty() {
        let samples: Vec<u16> = (0..15).collect();
        assert!(decimate_4to1(&samples).is_empty());
    }

    #[test]
    fn decimate_keeps_expected_offsets() {
        let samples: Vec<u16> = (0..32).collect();
        assert_eq!(decimate_4to1(&samples), vec![0, 4, 8, 12, 16, 20, 24, 28]);
    }

    #[test]
    fn malformed_lengths_rejected() {
        let mut out = Vec::new();
        assert!(pack_samples(&[1, 2, 3], &mut out).is_err());
        let mut out16 = Vec::new();
        assert!(unpack_bytes(&[1, 2, 3], &mut out16).is_err());
    }

    proptest! {
        #[test]
        fn pack_unpack_roundtrip(w0 in 0u16..1024, w1 in 0u16..1024, w2 in 0u16..1024, w3 in 0u16..1024) {
            let packed = pack_group([w0, w1, w2, w3]);
            prop_assert_eq!(unpack_group(packed), [w0, w1, w2, w3]);
        }

        #[test]
        fn scale_unscale_roundtrip(u in 0u16..1024) {
            prop_assert_eq!(unscale_from_16(scale_to_16(u)), u);
        }

        #[test]
        fn pack_then_unpack_bytes_roundtrip(samples in proptest::collection::vec(0u16..1024, 0..64).prop_map(|mut v| {
            while v.len() % 4 != 0 { v.push(0); }
            v
        })) {
            let mut bytes = Vec::new();
            pack_samples(&samples, &mut bytes).unwrap();
            let mut back = Vec::new();
            unpack_bytes(&bytes, &mut back).unwrap();
            prop_assert_eq!(back, samples);
        }

        #[test]
        fn unpack_then_pack_bytes_is_identity(bytes in proptest::collection::vec(any::<u8>(), 0..65).prop_map(|mut v| {
            while v.len() % 5 != 0 { v.push(0); }
            v
        })) {
            let mut samples = Vec::new();
            unpack_bytes(&bytes, &mut samples).unwrap();
            let mut back = Vec::new();
            pack_samples(&samples, &mut back).unwrap();
            prop_assert_eq!(back, bytes);
        }
    }
}
