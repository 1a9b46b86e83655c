//! Application services: listener wiring and event replay.

pub mod error;
pub mod replay;
pub mod service;
