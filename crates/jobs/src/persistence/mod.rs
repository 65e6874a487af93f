//! Persistence layer for job orchestration
//!
//! This module provides:
//! - [`JobStore`] trait for job state and queue flags
//! - [`InMemoryJobStore`] for testing and local development
//! - [`PostgresJobStore`] for production
//! - [`ConnectionManager`] owning the shared store connection

mod connection;
mod memory;
mod postgres;
mod store;

pub use connection::{ConnectionManager, StoreConfig, MEMORY_STORE_URL};
pub use memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;
pub use store::{
    clamp_progress, ClaimedJob, CleanPolicy, FailureOutcome, JobCounts, JobOptions, JobRecord,
    JobState, JobStore, NewJob, StallOutcome, StalledJob, StoreError, STALLED_FAILURE_REASON,
};
