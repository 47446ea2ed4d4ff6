//! Orchestration events for subscribers (progress bars, toasts, logs).
//!
//! Components publish on an [`EventBus`]; any number of subscribers can
//! receive every event independently. Publishing never blocks and never
//! fails: with no subscribers the event is dropped.

use serde::Serialize;
use testdeck_core::test_result::{RunSummary, TestResult};
use testdeck_core::types::{DbId, TaskRef};
use tokio::sync::broadcast;

use crate::poll_session::PollReport;

/// A state change in one of the orchestration components.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    /// A non-terminal status poll was observed.
    PollProgress {
        job_id: DbId,
        attempt: u32,
        /// Completion percentage (0-100).
        progress: u8,
    },

    /// A poll session reached its terminal outcome.
    PollFinished { report: PollReport },

    /// The orchestrator is about to execute an item.
    ItemStarted {
        task: TaskRef,
        item_id: DbId,
        /// 0-based position within the run.
        position: usize,
        total: usize,
    },

    /// An item was classified.
    ItemFinished {
        task: TaskRef,
        item_id: DbId,
        result: TestResult,
        position: usize,
        total: usize,
    },

    /// A full run completed (or was stopped).
    RunFinished { task: TaskRef, summary: RunSummary },

    /// Pending edits of a task were written.
    FlushSucceeded { task: TaskRef, entities: usize },

    /// A flush failed; the edits stay buffered for the next attempt.
    FlushFailed {
        task: TaskRef,
        entities: usize,
        error: String,
    },

    /// Persisted results of a task were reloaded after an item finished.
    ResultsReloaded { task: TaskRef, records: usize },
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out channel for [`OrchestrationEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestrationEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed events are dropped and
    /// slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: OrchestrationEvent) {
        // A send error only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
