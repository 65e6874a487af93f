//! Reliability patterns for job execution
//!
//! This module provides:
//! - [`BackoffPolicy`] - Fixed or exponential delay between attempts
//! - [`RetryClassification`] - Which failures a queue retries

mod backoff;
mod classify;

pub use backoff::{jittered, BackoffKind, BackoffPolicy};
pub use classify::RetryClassification;
