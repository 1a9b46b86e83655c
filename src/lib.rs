pub mod application;
pub mod config;
pub mod flush;
pub mod infra;
