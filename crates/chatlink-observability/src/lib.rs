//! # chatlink-observability
//!
//! Structured logging for chatlink.
//!
//! Every crate in the workspace logs through `tracing` with structured
//! fields (`generation`, `attempt`, `code`, `delay_ms`, ...). This crate
//! installs the subscriber: human-readable text by default, JSON for log
//! shippers (ELK, Loki, CloudWatch). Levels are configurable per component.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, LogConfig};
