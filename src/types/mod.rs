//! Core type definitions for the OTA safeguard system

mod log_level;
mod log_target;

pub use log_level::LogLevel;
pub use log_target::LogTarget;
