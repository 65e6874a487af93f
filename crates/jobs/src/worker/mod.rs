//! Worker pools executing queued jobs
//!
//! This module provides:
//! - [`Worker`] - Consumer pool for one queue with bounded concurrency
//! - [`Processor`] - Contract implemented by the domain code doing the work
//! - [`JobContext`] - Progress, heartbeat and cancellation for a running job
//! - [`PollerConfig`] - Job polling with adaptive backoff
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Worker                              │
//! │  ┌─────────────┐              ┌─────────────────────────┐   │
//! │  │  JobPoller  │              │  Stalled job checker    │   │
//! │  │  (adaptive) │              │  (stalled_interval)     │   │
//! │  └──────┬──────┘              └─────────────────────────┘   │
//! │         │                                                    │
//! │         ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │       Job runs (Semaphore, `concurrency` slots)      │    │
//! │  │  [Job 1] [Job 2] ... [Job N] -> Processor::process   │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod context;
mod poller;
mod pool;
mod processor;

pub use context::{ContextError, JobContext};
pub use poller::{JobPoller, PollerConfig};
pub use pool::{Worker, WorkerError, WorkerStatus};
pub use processor::{processor_fn, JobInput, Processor, ProcessorError};
