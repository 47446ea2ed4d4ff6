//! In-memory fakes of the remote seams shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use testdeck_core::conversion::{ConversionStatus, JobStatusResponse};
use testdeck_core::remote::{
    ExecuteItemResponse, ItemExecutor, JobStatusSource, RemoteError, ResultRecord, ResultStore,
};
use testdeck_core::types::{DbId, TaskRef};
use testdeck_orchestration::{
    CoalescerConfig, EventBus, ExecutionOrchestrator, OrchestratorConfig, WriteCoalescer,
};
use uuid::Uuid;

pub fn task(project_id: DbId) -> TaskRef {
    TaskRef::new(project_id, Uuid::new_v4())
}

pub fn processing(progress: u8) -> Result<JobStatusResponse, RemoteError> {
    Ok(JobStatusResponse::new(ConversionStatus::Processing, progress))
}

pub fn completed() -> Result<JobStatusResponse, RemoteError> {
    Ok(JobStatusResponse::new(ConversionStatus::Completed, 100))
}

pub fn transient() -> Result<JobStatusResponse, RemoteError> {
    Err(RemoteError::Transport("connection reset".into()))
}

// ---------------------------------------------------------------------------
// Status source
// ---------------------------------------------------------------------------

/// Answers status calls from a script; the last entry repeats forever.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<JobStatusResponse, RemoteError>>>,
    last: Mutex<Option<Result<JobStatusResponse, RemoteError>>>,
    calls: AtomicU32,
    latency: Duration,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<JobStatusResponse, RemoteError>>) -> Self {
        Self::with_latency(script, Duration::ZERO)
    }

    pub fn with_latency(
        script: Vec<Result<JobStatusResponse, RemoteError>>,
        latency: Duration,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
            latency,
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl JobStatusSource for ScriptedSource {
    async fn start_conversion(&self, _job_id: DbId) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn fetch_status(&self, _job_id: DbId) -> Result<JobStatusResponse, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(response) => {
                *last = Some(response.clone());
                response
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(RemoteError::Decode("empty script".into()))),
        }
    }
}

// ---------------------------------------------------------------------------
// Item executor
// ---------------------------------------------------------------------------

/// Executor with per-item answers (OK by default) and a call log.
#[derive(Default)]
pub struct RecordingExecutor {
    answers: HashMap<DbId, Result<ExecuteItemResponse, RemoteError>>,
    latency: Duration,
    calls: Mutex<Vec<DbId>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, item_id: DbId, answer: Result<ExecuteItemResponse, RemoteError>) -> Self {
        self.answers.insert(item_id, answer);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<DbId> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl ItemExecutor for RecordingExecutor {
    async fn execute_item(
        &self,
        _task: TaskRef,
        item_id: DbId,
    ) -> Result<ExecuteItemResponse, RemoteError> {
        self.calls.lock().unwrap().push(item_id);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.answers
            .get(&item_id)
            .cloned()
            .unwrap_or_else(|| Ok(ExecuteItemResponse::ok()))
    }
}

// ---------------------------------------------------------------------------
// Result store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Save(TaskRef, Vec<ResultRecord>),
    Load(TaskRef),
}

/// Row store that merges partial records, logs every call and can be told
/// to fail upcoming saves.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<TaskRef, BTreeMap<DbId, Map<String, Value>>>>,
    ops: Mutex<Vec<StoreOp>>,
    failures: AtomicUsize,
    save_latency: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_save_latency(latency: Duration) -> Self {
        Self {
            save_latency: latency,
            ..Default::default()
        }
    }

    /// Make the next `n` saves fail.
    pub fn fail_next_saves(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().unwrap().clone()
    }

    /// Successful saves, in order.
    pub fn saves(&self) -> Vec<(TaskRef, Vec<ResultRecord>)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                StoreOp::Save(task, records) => Some((task, records)),
                StoreOp::Load(_) => None,
            })
            .collect()
    }

    pub fn loads(&self) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, StoreOp::Load(_)))
            .count()
    }

    pub fn field(&self, task: TaskRef, case_id: DbId, field: &str) -> Option<Value> {
        self.rows
            .lock()
            .unwrap()
            .get(&task)
            .and_then(|rows| rows.get(&case_id))
            .and_then(|row| row.get(field).cloned())
    }
}

impl ResultStore for MemoryStore {
    async fn save_results(
        &self,
        task: TaskRef,
        records: Vec<ResultRecord>,
    ) -> Result<(), RemoteError> {
        if !self.save_latency.is_zero() {
            tokio::time::sleep(self.save_latency).await;
        }
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RemoteError::Api {
                status: 503,
                body: "unavailable".into(),
            });
        }

        let mut rows = self.rows.lock().unwrap();
        let task_rows = rows.entry(task).or_default();
        for record in &records {
            let row = task_rows.entry(record.case_id).or_default();
            for (field, value) in &record.fields {
                row.insert(field.clone(), value.clone());
            }
        }
        self.ops.lock().unwrap().push(StoreOp::Save(task, records));
        Ok(())
    }

    async fn load_results(&self, task: TaskRef) -> Result<Vec<ResultRecord>, RemoteError> {
        self.ops.lock().unwrap().push(StoreOp::Load(task));
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .get(&task)
            .map(|rows| {
                rows.iter()
                    .map(|(&case_id, fields)| ResultRecord {
                        case_id,
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn coalescer(store: &Arc<MemoryStore>, events: &EventBus) -> Arc<WriteCoalescer<MemoryStore>> {
    Arc::new(WriteCoalescer::new(
        Arc::clone(store),
        CoalescerConfig::default(),
        events.clone(),
    ))
}

pub fn orchestrator(
    executor: &Arc<RecordingExecutor>,
    store: &Arc<MemoryStore>,
    events: &EventBus,
) -> Arc<ExecutionOrchestrator<RecordingExecutor, MemoryStore>> {
    Arc::new(ExecutionOrchestrator::new(
        Arc::clone(executor),
        Arc::clone(store),
        coalescer(store, events),
        OrchestratorConfig::default(),
        events.clone(),
    ))
}
