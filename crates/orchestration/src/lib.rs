//! Asynchronous operation orchestration for TestDeck.
//!
//! - [`poller::StatusPoller`]: tracks a document-conversion job until it
//!   reaches a terminal outcome, with retry, stall and ceiling handling.
//! - [`executor::ExecutionOrchestrator`]: runs test cases one at a time
//!   against the remote executor and summarizes the results.
//! - [`coalescer::WriteCoalescer`]: merges rapid field edits per case and
//!   flushes them to the result store on a trailing debounce.
//! - [`workspace::TaskWorkspace`]: switches the active task, flushing
//!   pending edits before the next task is loaded.
//! - [`events`]: progress and lifecycle events for subscribers.

pub mod buffer;
pub mod coalescer;
pub mod config;
pub mod events;
pub mod executor;
pub mod poll_session;
pub mod poller;
pub mod workspace;

pub use coalescer::{CoalescerError, WriteCoalescer};
pub use config::{CoalescerConfig, OrchestratorConfig, PollConfig};
pub use events::{EventBus, OrchestrationEvent};
pub use executor::ExecutionOrchestrator;
pub use poll_session::{ExhaustionReason, PollOutcome, PollReport, PollState, Severity};
pub use poller::{PollError, PollHandle, StatusPoller};
pub use workspace::TaskWorkspace;
