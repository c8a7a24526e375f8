//! MMBOT: Market-making job engine for DEX-listed tokens
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod venue;
pub mod engine;
pub mod storage;
pub mod api;
