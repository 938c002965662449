//! Progress notification channel
//!
//! One bounded broadcast channel per job plus the last published event.
//! Publishing never waits: a subscriber that falls more than `capacity`
//! events behind loses the oldest ones. New subscribers first receive the
//! last published event, then every later one.

use futures::Stream;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;
use uuid::Uuid;

use crate::types::ProgressEvent;

struct JobChannel {
    tx: broadcast::Sender<ProgressEvent>,
    last: Option<ProgressEvent>,
}

/// Per-job progress publisher
pub struct ProgressHub {
    capacity: usize,
    channels: Mutex<HashMap<Uuid, JobChannel>>,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<Uuid, JobChannel>> {
        // Entries stay consistent under panic: each update is a single insert
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the channel for a job with its initial snapshot
    pub fn register(&self, event: ProgressEvent) {
        let (tx, _) = broadcast::channel(self.capacity);
        self.channels().insert(
            event.job_id,
            JobChannel {
                tx,
                last: Some(event),
            },
        );
    }

    /// Publish an event. Never blocks; events with no subscriber are dropped.
    pub fn publish(&self, event: ProgressEvent) {
        let mut channels = self.channels();
        let Some(channel) = channels.get_mut(&event.job_id) else {
            debug!(job_id = %event.job_id, "Progress for unregistered job dropped");
            return;
        };
        channel.last = Some(event.clone());
        // Err only means nobody is listening right now
        let _ = channel.tx.send(event);
    }

    /// Most recent event for a job
    pub fn latest(&self, job_id: Uuid) -> Option<ProgressEvent> {
        self.channels().get(&job_id).and_then(|c| c.last.clone())
    }

    /// Subscribe to a job; `None` if the job is unknown
    pub fn subscribe(&self, job_id: Uuid) -> Option<ProgressSubscription> {
        let channels = self.channels();
        let channel = channels.get(&job_id)?;
        Some(ProgressSubscription {
            job_id,
            replay: channel.last.clone(),
            rx: channel.tx.subscribe(),
            finished: false,
        })
    }

    /// Drop a job's channel; open subscriptions end after draining
    pub fn remove(&self, job_id: Uuid) {
        self.channels().remove(&job_id);
    }

    pub fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.channels()
            .get(&job_id)
            .map(|c| c.tx.receiver_count())
            .unwrap_or(0)
    }
}

/// Receiving side of one subscription. Dropping it unsubscribes.
pub struct ProgressSubscription {
    job_id: Uuid,
    replay: Option<ProgressEvent>,
    rx: broadcast::Receiver<ProgressEvent>,
    finished: bool,
}

impl ProgressSubscription {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Next event; `None` after a terminal-status event has been delivered
    /// or once the job's channel is gone.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }
        if let Some(event) = self.replay.take() {
            self.finished = event.status.is_terminal();
            return Some(event);
        }

        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    self.finished = event.status.is_terminal();
                    return Some(event);
                },
                Err(RecvError::Lagged(skipped)) => {
                    debug!(job_id = %self.job_id, skipped, "Progress subscriber lagged");
                },
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                },
            }
        }
    }

    /// Stop receiving events
    pub fn unsubscribe(self) {}

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}
