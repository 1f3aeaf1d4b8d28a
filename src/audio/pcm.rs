//! # PCM16 Conversion and Wire Encoding
//!
//! Converts between the floating-point samples used by capture and playback
//! devices and the base64 PCM16 little-endian payloads used on the wire.
//!
//! ## Conversions:
//! - **Outbound**: `f32` in [-1.0, 1.0] → multiply by 32768 → clamp to the i16
//!   range → truncate → little-endian bytes → base64
//! - **Inbound**: base64 → little-endian bytes → i16 → divide by 32768 → `f32`
//!
//! Encoding 1.0 yields 32767 (clamped) and -1.0 yields -32768. Any value that
//! survives the clamp round-trips within 1/32768.

use crate::error::{AppError, AppResult};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Scale between the i16 and f32 sample domains.
pub const PCM16_SCALE: f32 = 32768.0;

/// MIME type tag for raw PCM16 at the given sample rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Extract the `rate=` parameter from a PCM MIME type, if any.
///
/// `"audio/pcm;rate=24000"` → `Some(24000)`, `"audio/pcm"` → `None`.
pub fn sample_rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Convert one floating-point sample to PCM16.
///
/// Non-finite input maps to silence rather than to a full-scale click.
pub fn float_to_pcm16(sample: f32) -> i16 {
    if !sample.is_finite() {
        return 0;
    }
    let scaled = sample * PCM16_SCALE;
    scaled.clamp(-32768.0, 32767.0) as i16 // `as` truncates toward zero
}

/// Convert one PCM16 sample to floating point.
pub fn pcm16_to_float(sample: i16) -> f32 {
    sample as f32 / PCM16_SCALE
}

/// Serialize floating-point samples as PCM16 little-endian bytes.
pub fn float_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Writing into a Vec cannot fail
        let _ = bytes.write_i16::<LittleEndian>(float_to_pcm16(sample));
    }
    bytes
}

/// Parse PCM16 little-endian bytes into floating-point samples.
///
/// ## Errors:
/// An odd byte count cannot be a sequence of 16-bit samples and is rejected
/// as a decode error instead of silently dropping the trailing byte.
pub fn pcm16_bytes_to_float(bytes: &[u8]) -> AppResult<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(AppError::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(pcm16_to_float(sample));
    }
    Ok(samples)
}

/// Encode floating-point samples as a base64 PCM16 payload.
pub fn encode_pcm16_base64(samples: &[f32]) -> String {
    B64.encode(float_to_pcm16_bytes(samples))
}

/// Decode a base64 PCM16 payload into floating-point samples.
pub fn decode_pcm16_base64(data: &str) -> AppResult<Vec<f32>> {
    let bytes = B64
        .decode(data.trim())
        .map_err(|e| AppError::Decode(format!("invalid base64 audio payload: {}", e)))?;
    pcm16_bytes_to_float(&bytes)
}

/// Duration in seconds of `sample_count` mono samples at `sample_rate`.
pub fn duration_seconds(sample_count: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f64 / sample_rate as f64
}
