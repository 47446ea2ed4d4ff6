//! Debounced, context-scoped write buffer for case-result edits.
//!
//! Edits are staged synchronously and merged per entity. A single background
//! task owns the trailing debounce deadline: every `stage` pushes the deadline
//! out, and one bulk write per context goes out once edits stop arriving.
//!
//! Buffers are kept per context ([`TaskRef`]). Switching context flushes
//! first; if that flush fails, the old buffer stays parked under its own
//! context and is retried by every later flush, so edits can neither leak
//! into the new context nor be dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use testdeck_core::error::OrchestrationError;
use testdeck_core::remote::{RemoteError, ResultStore};
use testdeck_core::types::{DbId, TaskRef};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::buffer::PendingBuffer;
use crate::config::CoalescerConfig;
use crate::events::{EventBus, OrchestrationEvent};

/// Errors returned by [`WriteCoalescer`] flushes.
#[derive(Debug, thiserror::Error)]
pub enum CoalescerError {
    /// The bulk write failed; the edits were put back into the buffer.
    #[error("Failed to persist {entities} pending edit(s) for task {task}: {source}")]
    Persistence {
        task: TaskRef,
        entities: usize,
        source: RemoteError,
    },

    #[error("Write coalescer is closed")]
    Closed,
}

impl CoalescerError {
    /// The orchestration-level view of a failed write, if this is one.
    pub fn into_orchestration_error(self) -> Option<OrchestrationError> {
        match self {
            Self::Persistence {
                task,
                entities,
                source,
            } => Some(OrchestrationError::PersistenceFailure {
                task,
                entities,
                reason: source.to_string(),
            }),
            Self::Closed => None,
        }
    }
}

#[derive(Default)]
struct BufferState {
    active: Option<TaskRef>,
    pending: BTreeMap<TaskRef, PendingBuffer>,
    deadline: Option<Instant>,
    closed: bool,
}

struct Shared<S> {
    store: Arc<S>,
    config: CoalescerConfig,
    events: EventBus,
    /// Never held across an await.
    state: Mutex<BufferState>,
    /// Wakes the debounce task when the deadline changes.
    rearm: Notify,
    /// Serializes flushes so an older snapshot never lands after a newer one.
    flush_gate: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

/// Coalesces field edits into debounced bulk writes.
///
/// Must be created inside a tokio runtime. Dropping the coalescer stops its
/// debounce task; call [`close`](Self::close) first to flush what is pending.
pub struct WriteCoalescer<S> {
    shared: Arc<Shared<S>>,
}

impl<S: ResultStore + 'static> WriteCoalescer<S> {
    pub fn new(store: Arc<S>, config: CoalescerConfig, events: EventBus) -> Self {
        let shared = Arc::new(Shared {
            store,
            config,
            events,
            state: Mutex::new(BufferState::default()),
            rearm: Notify::new(),
            flush_gate: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(debounce_loop(Arc::clone(&shared)));
        Self { shared }
    }
}

impl<S: ResultStore> WriteCoalescer<S> {
    pub fn active_context(&self) -> Option<TaskRef> {
        self.shared.lock().active
    }

    /// Number of entities with unsaved edits, across every context.
    pub fn pending_entities(&self) -> usize {
        self.shared.lock().pending.values().map(PendingBuffer::len).sum()
    }

    /// Unsaved edits of one context.
    pub fn pending_for(&self, task: TaskRef) -> PendingBuffer {
        self.shared
            .lock()
            .pending
            .get(&task)
            .cloned()
            .unwrap_or_default()
    }

    /// Merge one field edit into the active context and re-arm the deadline.
    pub fn stage(&self, entity: DbId, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let Some(task) = self.active_context() else {
            tracing::warn!(entity, field = %field, "No active task, dropping edit");
            return;
        };
        self.stage_in(task, entity, field, value);
    }

    /// Merge one field edit into the buffer of `task`, whichever context is
    /// active, and re-arm the deadline.
    pub fn stage_in(
        &self,
        task: TaskRef,
        entity: DbId,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) {
        let field = field.into();
        {
            let mut state = self.shared.lock();
            if state.closed {
                tracing::warn!(task = %task, entity, field = %field, "Coalescer closed, dropping edit");
                return;
            }
            state
                .pending
                .entry(task)
                .or_default()
                .stage(entity, field, value.into());
            state.deadline = Some(Instant::now() + self.shared.config.debounce);
        }
        self.shared.rearm.notify_one();
    }

    /// Pre-populate an entity with its full record. Does not arm the deadline.
    pub fn seed(&self, entity: DbId, fields: Map<String, Value>) {
        let mut state = self.shared.lock();
        if state.closed {
            return;
        }
        let Some(task) = state.active else {
            tracing::warn!(entity, "No active task, dropping seed");
            return;
        };
        state.pending.entry(task).or_default().seed(entity, fields);
    }

    /// Discard every unsaved edit of every context and cancel the deadline.
    ///
    /// Returns the number of entities whose edits were dropped.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut state = self.shared.lock();
            state.deadline = None;
            let pending = std::mem::take(&mut state.pending);
            pending.values().map(PendingBuffer::len).sum()
        };
        self.shared.rearm.notify_one();
        if dropped > 0 {
            tracing::warn!(entities = dropped, "Discarded unsaved edits");
        }
        dropped
    }

    /// Write every pending edit now.
    pub async fn flush(&self) -> Result<(), CoalescerError> {
        if self.shared.lock().closed {
            return Err(CoalescerError::Closed);
        }
        self.shared.flush().await
    }

    /// Flush pending edits, then make `next` the active context.
    ///
    /// `next` becomes active even when the flush fails; the failed edits stay
    /// parked under their own context and the error is returned.
    pub async fn switch_context(&self, next: TaskRef) -> Result<(), CoalescerError> {
        let previous = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(CoalescerError::Closed);
            }
            state.deadline = None;
            state.active
        };
        self.shared.rearm.notify_one();

        let result = self.shared.flush().await;
        self.shared.lock().active = Some(next);
        tracing::info!(
            previous = ?previous,
            next = %next,
            "Switched task context",
        );
        result
    }

    /// Stop the debounce task and flush whatever is pending.
    pub async fn close(&self) -> Result<(), CoalescerError> {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.deadline = None;
        }
        self.shared.shutdown.cancel();
        self.shared.flush().await
    }
}

impl<S> Drop for WriteCoalescer<S> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl<S> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: ResultStore> Shared<S> {
    async fn flush(&self) -> Result<(), CoalescerError> {
        let _gate = self.flush_gate.lock().await;

        let snapshots: Vec<(TaskRef, PendingBuffer)> = {
            let mut state = self.lock();
            std::mem::take(&mut state.pending)
                .into_iter()
                .filter(|(_, buffer)| !buffer.is_empty())
                .collect()
        };

        let mut first_error = None;
        for (task, snapshot) in snapshots {
            if let Err(e) = self.write(task, snapshot).await {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn write(&self, task: TaskRef, snapshot: PendingBuffer) -> Result<(), CoalescerError> {
        let entities = snapshot.len();
        match self.store.save_results(task, snapshot.to_records()).await {
            Ok(()) => {
                tracing::debug!(task = %task, entities, "Flushed pending edits");
                self.events
                    .publish(OrchestrationEvent::FlushSucceeded { task, entities });
                Ok(())
            }
            Err(e) => {
                self.lock()
                    .pending
                    .entry(task)
                    .or_default()
                    .restore_under(snapshot);
                tracing::warn!(
                    task = %task,
                    entities,
                    error = %e,
                    "Flush failed, edits kept for the next attempt",
                );
                self.events.publish(OrchestrationEvent::FlushFailed {
                    task,
                    entities,
                    error: e.to_string(),
                });
                Err(CoalescerError::Persistence {
                    task,
                    entities,
                    source: e,
                })
            }
        }
    }
}

/// Services the trailing deadline until the coalescer shuts down.
async fn debounce_loop<S: ResultStore>(shared: Arc<Shared<S>>) {
    loop {
        let deadline = shared.lock().deadline;
        match deadline {
            None => {
                tokio::select! {
                    _ = shared.shutdown.cancelled() => return,
                    _ = shared.rearm.notified() => {}
                }
            }
            Some(at) => {
                tokio::select! {
                    _ = shared.shutdown.cancelled() => return,
                    _ = shared.rearm.notified() => {}
                    _ = tokio::time::sleep_until(at) => {
                        let due = {
                            let mut state = shared.lock();
                            let due = state.deadline == Some(at);
                            if due {
                                state.deadline = None;
                            }
                            due
                        };
                        // Failures are already logged and published.
                        if due {
                            let _ = shared.flush().await;
                        }
                    }
                }
            }
        }
    }
}
