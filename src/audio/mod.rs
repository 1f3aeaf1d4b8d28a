//! # Audio Module
//!
//! Everything between raw samples and the realtime channel.
//!
//! ## Key Components:
//! - **pcm**: float ↔ PCM16 little-endian ↔ base64 conversions
//! - **capture**: capture source/provider traits and the configured device
//! - **playback**: the gapless playback scheduler and playback sink traits
//! - **recorder**: a playback sink that mixes onto a timeline and saves a WAV
//!
//! ## Audio Formats:
//! - **Outbound (capture)**: 16kHz mono, sent as `audio/pcm;rate=16000`
//! - **Inbound (playback)**: 24kHz mono PCM16 unless the frame says otherwise
//! - **Encoding**: 16-bit little-endian signed integers, base64 on the wire

pub mod capture;
pub mod pcm;
pub mod playback;
pub mod recorder;
