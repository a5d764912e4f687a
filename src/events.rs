//! Notifications about poll lifecycle changes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};
use uuid::Uuid;

/// Default broadcast capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Snapshot of an option at the time of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTally {
    pub id: Uuid,
    pub label: String,
    pub votes: usize,
}

/// What happened to a poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PollEventKind {
    Started {
        options: Vec<OptionTally>,
        ends_at: DateTime<Utc>,
    },
    /// The backend assigned the poll its id
    Registered { poll_id: i64 },
    Concluded {
        winner: Option<String>,
        tally: Vec<OptionTally>,
    },
    /// Dropped without running an action
    Discarded { reason: String },
}

/// A lifecycle notification for one poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollEvent {
    pub poll: Uuid,
    pub caption: String,
    #[serde(flatten)]
    pub kind: PollEventKind,
    pub timestamp: DateTime<Utc>,
}

impl PollEvent {
    pub fn new(poll: Uuid, caption: impl Into<String>, kind: PollEventKind) -> Self {
        Self {
            poll,
            caption: caption.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            PollEventKind::Started { .. } => "started",
            PollEventKind::Registered { .. } => "registered",
            PollEventKind::Concluded { .. } => "concluded",
            PollEventKind::Discarded { .. } => "discarded",
        }
    }
}

/// Counters kept by the bus
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollEventStats {
    pub published: u64,
    /// Published while nobody was listening
    pub unobserved: u64,
    pub kind_counts: HashMap<String, u64>,
}

/// Broadcasts poll events to any number of listeners
#[derive(Clone)]
pub struct PollEventBus {
    sender: broadcast::Sender<PollEvent>,
    stats: Arc<RwLock<PollEventStats>>,
}

impl Default for PollEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl PollEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            stats: Arc::new(RwLock::new(PollEventStats::default())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event, returning how many listeners received it
    pub async fn publish(&self, event: PollEvent) -> usize {
        let kind = event.kind_name();
        trace!(poll = %event.poll, kind, "Publishing poll event");

        let receivers = match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(kind, "No listeners for poll event");
                0
            }
        };

        let mut stats = self.stats.write().await;
        stats.published += 1;
        if receivers == 0 {
            stats.unobserved += 1;
        }
        *stats.kind_counts.entry(kind.to_string()).or_insert(0) += 1;

        receivers
    }

    pub async fn stats(&self) -> PollEventStats {
        self.stats.read().await.clone()
    }

    pub async fn reset_stats(&self) {
        *self.stats.write().await = PollEventStats::default();
    }
}
