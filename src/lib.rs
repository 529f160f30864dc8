//! clipshrink - video compression tool
//!
//! This library crate exposes the application layer for integration testing.

pub mod compress;
pub mod config;
pub mod report;
