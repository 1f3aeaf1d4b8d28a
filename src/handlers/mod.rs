pub mod chat;
pub mod config;

pub use chat::*;
pub use config::*;
