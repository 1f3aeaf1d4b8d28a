//! # Spark Live
//!
//! Realtime voice chat between a child and the "Professor Spark" persona,
//! backed by the Gemini Live bidirectional streaming API.
//!
//! ## Modules:
//! - **audio**: PCM16 codec, capture sources, gapless playback scheduling
//! - **live**: wire protocol and WebSocket transport
//! - **session**: session lifecycle, capture pump, inbound pipeline
//! - **config** / **state** / **error**: the ambient service plumbing
//! - **handlers** / **health** / **middleware**: the local HTTP control surface

pub mod audio;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod live;
pub mod middleware;
pub mod session;
pub mod state;
