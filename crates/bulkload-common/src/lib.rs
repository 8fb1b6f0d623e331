//! Shared error handling and logging for the bulkload workspace.
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! # Overview
//!
//! This crate provides the pieces every bulkload workspace member needs:
//!
//! - **Error Handling**: the [`LoadError`] taxonomy and [`Result`] alias
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{LoadError, Result};
