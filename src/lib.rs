// src/lib.rs

pub mod config;
pub mod payslip;
pub mod settings;
pub mod source;
pub mod store;
pub mod vision;

/// Error type of the I/O-facing layers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
