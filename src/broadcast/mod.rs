//! Progress broadcaster.
//!
//! Fans every committed delta out to the live subscribers of an
//! investigation. A new subscriber first receives a `current_state` snapshot
//! so it can join at any point in the lifecycle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::stages::Stage;
use crate::state::{Investigation, ReasoningStep, Route, Status};

/// Event pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Snapshot replayed to a new subscriber.
    CurrentState {
        status: Status,
        total_signals: usize,
        total_investigations: usize,
        total_reports: usize,
        total_errors: usize,
        progress_messages: Vec<String>,
        reasoning_trace: Vec<ReasoningStep>,
    },
    /// One per merged stage delta.
    Progress {
        stage: Stage,
        status: Status,
        route: Option<Route>,
        total_signals: usize,
        total_investigations: usize,
        total_reports: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Steps carried by the same delta, sent after its progress event.
    Reasoning {
        stage: Stage,
        steps: Vec<ReasoningStep>,
    },
    /// The investigation failed.
    Error {
        message: String,
    },
}

impl ProgressEvent {
    /// Snapshot event for a joining subscriber.
    pub fn current_state(inv: &Investigation) -> Self {
        ProgressEvent::CurrentState {
            status: inv.status,
            total_signals: inv.counters.total_signals,
            total_investigations: inv.counters.total_investigations,
            total_reports: inv.counters.total_reports,
            total_errors: inv.errors.len(),
            progress_messages: inv.progress_messages.clone(),
            reasoning_trace: inv.reasoning_trace.clone(),
        }
    }

    /// Progress event reflecting `inv` after a merge.
    pub fn progress(stage: Stage, inv: &Investigation, message: Option<String>) -> Self {
        ProgressEvent::Progress {
            stage,
            status: inv.status,
            route: inv.route,
            total_signals: inv.counters.total_signals,
            total_investigations: inv.counters.total_investigations,
            total_reports: inv.counters.total_reports,
            message,
        }
    }

    /// Event type tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::CurrentState { .. } => "current_state",
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Reasoning { .. } => "reasoning",
            ProgressEvent::Error { .. } => "error",
        }
    }
}

/// Stream handed to a subscriber. Ends when the investigation terminates.
pub type EventStream = UnboundedReceiverStream<ProgressEvent>;

/// Subscriber registry keyed by investigation id.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: Mutex<HashMap<String, Vec<UnboundedSender<ProgressEvent>>>>,
}

impl Broadcaster {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<UnboundedSender<ProgressEvent>>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a subscriber and replay `snapshot` to it.
    ///
    /// Callers must hold the store's lock on `snapshot` so that no delta can
    /// be committed between the replay and the registration. A subscriber to
    /// a finished investigation gets the snapshot and an ended stream.
    pub fn register(&self, id: &str, snapshot: &Investigation) -> EventStream {
        let (tx, rx) = unbounded_channel();
        let _ = tx.send(ProgressEvent::current_state(snapshot));

        if !snapshot.status.is_terminal() {
            let mut subscribers = self.lock();
            let entry = subscribers.entry(id.to_string()).or_default();
            entry.push(tx);
            debug!(investigation_id = %id, subscribers = entry.len(), "Subscriber registered");
        }

        UnboundedReceiverStream::new(rx)
    }

    /// Send `events` in order to every subscriber, pruning closed ones.
    pub fn publish(&self, id: &str, events: &[ProgressEvent]) {
        let mut subscribers = self.lock();
        let Some(senders) = subscribers.get_mut(id) else {
            return;
        };

        let before = senders.len();
        senders.retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
        let pruned = before - senders.len();
        if pruned > 0 {
            debug!(investigation_id = %id, pruned, "Pruned disconnected subscribers");
        }
        if senders.is_empty() {
            subscribers.remove(id);
        }
    }

    /// Drop every subscriber of `id`, ending their streams.
    pub fn close(&self, id: &str) {
        if let Some(senders) = self.lock().remove(id) {
            debug!(investigation_id = %id, subscribers = senders.len(), "Closed subscriber streams");
        }
    }

    /// Live subscribers of `id`.
    pub fn subscriber_count(&self, id: &str) -> usize {
        self.lock().get(id).map_or(0, Vec::len)
    }
}
