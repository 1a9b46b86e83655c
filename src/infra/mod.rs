//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod http_flusher;
pub mod telemetry;
