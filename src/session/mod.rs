//! # Voice Session
//!
//! The realtime voice session: lifecycle state machine, the outbound capture
//! pump, the inbound decode-and-schedule pipeline and the controller that
//! ties them to one realtime channel.
//!
//! ## Key Components:
//! - **controller**: `start()` / `stop()` / status, at most one session
//! - **worker**: the single consumer task of a running session
//! - **inbound**: decode + gapless scheduling of reply audio
//! - **outbound**: capture chunks → outbound frames
//! - **state**: states, status lines, counters and snapshots

pub mod controller;
pub mod inbound;
pub mod outbound;
pub mod state;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::LiveController;
pub use state::{SessionSnapshot, SessionState};
