//! Structured logging facility for arbor
//!
//! This module provides a canonical logging facility with:
//! - Single initialization point via `init(profile)`
//! - Structured logging macros (`log_op_start!`, `log_op_end!`, `log_op_error!`)
//! - Test capture mode for deterministic assertions
//!
//! Boundary operations (model compilation, instance creation, generic
//! instantiation, persistence) own their start/end events. Lower layers
//! (action dispatch, view recomputation, hook firing) only emit
//! `tracing::debug!`/`trace!` events inside the per-action span.
//!
//! # Usage
//!
//! ```rust
//! use arbor_core::logging_facility::{init, Profile};
//!
//! // Initialize once at application startup
//! init(Profile::Development);
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
