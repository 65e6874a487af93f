//! Per-queue job lifecycle events
//!
//! Every registered queue gets its own broadcast channel. Consumers call
//! [`EventBus::subscribe`] for the queue they care about; the bus also owns
//! one dispatcher task that logs every event. Closing the bus stops the
//! dispatcher and drops all senders, which ends every subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::QueueError;

/// Default per-queue channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// What happened to a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    Started {
        attempts_made: u32,
    },
    Progress {
        progress: u8,
    },
    Completed {
        result: serde_json::Value,
    },
    /// Failed attempt scheduled for another run
    Retrying {
        attempts_made: u32,
        delay_ms: u64,
        reason: String,
    },
    Failed {
        attempts_made: u32,
        reason: String,
    },
    Stalled {
        stalled_count: u32,
        requeued: bool,
    },
    Removed,
}

impl JobEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
            Self::Retrying { .. } => "retrying",
            Self::Failed { .. } => "failed",
            Self::Stalled { .. } => "stalled",
            Self::Removed => "removed",
        }
    }
}

/// A lifecycle transition of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub queue: String,
    pub job_id: Uuid,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: JobEventKind,
}

impl JobEvent {
    pub fn new(queue: impl Into<String>, job_id: Uuid, kind: JobEventKind) -> Self {
        Self {
            queue: queue.into(),
            job_id,
            at: Utc::now(),
            kind,
        }
    }
}

/// Typed per-queue event channels
pub struct EventBus {
    channels: RwLock<HashMap<String, broadcast::Sender<JobEvent>>>,
    capacity: usize,
    closed: AtomicBool,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Create a bus with channels for the given queues
    pub fn new<I, S>(queues: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let capacity = capacity.max(1);
        let channels = queues
            .into_iter()
            .map(|name| (name.into(), broadcast::channel(capacity).0))
            .collect();

        Self {
            channels: RwLock::new(channels),
            capacity,
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            dispatcher: Mutex::new(None),
        }
    }

    /// Channel capacity per queue
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish an event; dropped silently when nobody listens or the bus is closed
    pub fn publish(&self, event: JobEvent) {
        if self.is_closed() {
            return;
        }
        if let Some(sender) = self.channels.read().get(&event.queue) {
            // An error only means there are no receivers right now
            let _ = sender.send(event);
        }
    }

    /// Subscribe to one queue's events
    pub fn subscribe(&self, queue: &str) -> Result<broadcast::Receiver<JobEvent>, QueueError> {
        if self.is_closed() {
            return Err(QueueError::QueueClosed(queue.to_string()));
        }
        self.channels
            .read()
            .get(queue)
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))
    }

    /// Number of live subscriptions on a queue, dispatcher included
    pub fn receiver_count(&self, queue: &str) -> usize {
        self.channels
            .read()
            .get(queue)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Start the logging dispatcher; a second call is a no-op
    pub fn start_dispatcher(&self) {
        let mut slot = self.dispatcher.lock();
        if slot.is_some() || self.is_closed() {
            return;
        }

        let receivers: Vec<_> = self
            .channels
            .read()
            .values()
            .map(broadcast::Sender::subscribe)
            .collect();

        let streams = receivers.into_iter().map(|rx| {
            Box::pin(stream::unfold(rx, |mut rx| async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => return Some((event, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Event dispatcher lagged behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }))
        });
        let mut events = stream::select_all(streams);
        let shutdown = self.shutdown.clone();

        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = events.next() => match next {
                        Some(event) => log_event(&event),
                        None => break,
                    },
                }
            }
            debug!("Event dispatcher exited");
        }));
    }

    /// Stop the dispatcher and end every subscription; idempotent
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shutdown.cancel();
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Event dispatcher task failed: {}", e);
            }
        }

        // Dropping the senders closes every receiver
        self.channels.write().clear();
        info!("Event bus closed");
    }
}

fn log_event(event: &JobEvent) {
    let queue = event.queue.as_str();
    let job_id = event.job_id;
    match &event.kind {
        JobEventKind::Started { attempts_made } => {
            debug!(queue, %job_id, attempts_made, "Job started");
        }
        JobEventKind::Progress { progress } => {
            debug!(queue, %job_id, progress, "Job progress");
        }
        JobEventKind::Completed { .. } => info!(queue, %job_id, "Job completed"),
        JobEventKind::Retrying {
            attempts_made,
            delay_ms,
            reason,
        } => {
            warn!(queue, %job_id, attempts_made, delay_ms, reason = %reason, "Job failed, will retry");
        }
        JobEventKind::Failed {
            attempts_made,
            reason,
        } => {
            error!(queue, %job_id, attempts_made, reason = %reason, "Job failed");
        }
        JobEventKind::Stalled {
            stalled_count,
            requeued,
        } => {
            warn!(queue, %job_id, stalled_count, requeued, "Job stalled");
        }
        JobEventKind::Removed => info!(queue, %job_id, "Job removed"),
    }
}
