//! Named queues
//!
//! This module provides:
//! - [`QueueDefinition`] and [`RetentionPolicy`] - Immutable per-queue settings
//! - [`Queue`] - Producer handle accepting new jobs
//! - [`QueueManager`] - Registry of every queue with its producer and worker

mod definition;
mod producer;
mod registry;

pub use definition::{QueueDefinition, RetentionPolicy, MAX_ATTEMPTS, MAX_PRIORITY};
pub use producer::{EnqueueOptions, JobHandle, Queue};
pub use registry::{QueueManager, RegistryOptions};
