//! Quantized error-rate codec.
//!
//! Error rates are stored as a 12-bit fixed-point value with 0.01%
//! resolution, giving a representable range of 0.0000 to 0.4095 fraction
//! error. The quantization is lossy by design and must round-trip exactly
//! for encode -> decode -> encode.

use crate::MAX_EVALUE;

/// Quantization scale: one count per 0.01% error.
pub const ERATE_SCALE: f64 = 10000.0;

/// Encodes a fraction-error in `[0, 1]` as a quantized quality value.
///
/// Values at or above the representable ceiling silently saturate to
/// [`MAX_EVALUE`]; no error is signaled. This is a documented quirk kept
/// for compatibility with existing stores.
#[must_use]
pub fn encode_quality(fraction_error: f64) -> u16 {
    if fraction_error < decode_quality(MAX_EVALUE) {
        (fraction_error * ERATE_SCALE + 0.5) as u16
    } else {
        MAX_EVALUE
    }
}

/// Decodes a quantized quality value back to a fraction-error.
///
/// Exact inverse of [`encode_quality`] at codec resolution.
#[must_use]
pub fn decode_quality(evalue: u16) -> f64 {
    f64::from(evalue) / ERATE_SCALE
}
