//! Sequential execution of a task's test cases.
//!
//! [`ExecutionOrchestrator`] walks the items of a run one at a time: items
//! without a script are blocked without a remote call, everything else is
//! executed remotely and classified. Each result is persisted through the
//! [`WriteCoalescer`] and reloaded before the next item starts, so a run
//! interrupted after item k still shows results for items 1..k.

use std::sync::Arc;

use testdeck_core::remote::{ItemExecutor, ResultStore};
use testdeck_core::test_result::{
    ExecutionItem, RunSummary, TestResult, FIELD_BUG_ID, FIELD_REMARK, FIELD_TEST_RESULT,
};
use testdeck_core::types::TaskRef;
use tokio_util::sync::CancellationToken;

use crate::coalescer::WriteCoalescer;
use crate::config::OrchestratorConfig;
use crate::events::{EventBus, OrchestrationEvent};

/// Runs execution items in strict order, never two at a time.
pub struct ExecutionOrchestrator<E, S> {
    executor: Arc<E>,
    store: Arc<S>,
    coalescer: Arc<WriteCoalescer<S>>,
    config: OrchestratorConfig,
    events: EventBus,
    /// Held for the whole of a run or a single execution.
    run_gate: tokio::sync::Mutex<()>,
}

impl<E: ItemExecutor, S: ResultStore> ExecutionOrchestrator<E, S> {
    pub fn new(
        executor: Arc<E>,
        store: Arc<S>,
        coalescer: Arc<WriteCoalescer<S>>,
        config: OrchestratorConfig,
        events: EventBus,
    ) -> Self {
        Self {
            executor,
            store,
            coalescer,
            config,
            events,
            run_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn coalescer(&self) -> &Arc<WriteCoalescer<S>> {
        &self.coalescer
    }

    /// Execute every item of `task` in order.
    ///
    /// Remote failures mark the item `NG` and the run goes on. Cancelling
    /// `cancel` stops the run before the next item; items never reached are
    /// counted as `nr` and left untouched.
    pub async fn run(
        &self,
        task: TaskRef,
        items: &mut [ExecutionItem],
        cancel: &CancellationToken,
    ) -> RunSummary {
        let _gate = self.run_gate.lock().await;

        let total = items.len();
        let mut summary = RunSummary {
            total,
            ..Default::default()
        };
        tracing::info!(task = %task, total, "Execution run started");

        for (position, item) in items.iter_mut().enumerate() {
            if cancel.is_cancelled() {
                summary.nr = total - position;
                tracing::info!(
                    task = %task,
                    executed = position,
                    remaining = summary.nr,
                    "Execution run stopped",
                );
                break;
            }
            let result = self.execute_one(task, item, position, total).await;
            summary.record(result);
        }

        tracing::info!(
            task = %task,
            total = summary.total,
            ok = summary.ok,
            ng = summary.ng,
            block = summary.block,
            nr = summary.nr,
            "Execution run finished",
        );
        self.events
            .publish(OrchestrationEvent::RunFinished { task, summary });
        summary
    }

    /// Execute one item outside a run. Waits for any run in progress.
    pub async fn execute_single(&self, task: TaskRef, item: &mut ExecutionItem) -> TestResult {
        let _gate = self.run_gate.lock().await;
        self.execute_one(task, item, 0, 1).await
    }

    async fn execute_one(
        &self,
        task: TaskRef,
        item: &mut ExecutionItem,
        position: usize,
        total: usize,
    ) -> TestResult {
        let item_id = item.item_id;
        self.events.publish(OrchestrationEvent::ItemStarted {
            task,
            item_id,
            position,
            total,
        });

        let result = if item.has_executable_script {
            let (result, failure) = match self.executor.execute_item(task, item_id).await {
                Ok(response) => {
                    let result = response.classify();
                    let failure = (result != TestResult::Ok).then(|| result.to_string());
                    (result, failure)
                }
                Err(e) => {
                    tracing::warn!(task = %task, item_id, error = %e, "Item execution failed");
                    (TestResult::Ng, Some(e.to_string()))
                }
            };
            if let Some(lang) = self.config.auto_remark {
                item.remark = Some(lang.execution_remark(failure.is_none(), failure.as_deref()));
            }
            result
        } else {
            tracing::debug!(task = %task, item_id, "No executable script, blocking item");
            TestResult::Block
        };

        item.result = result;
        tracing::debug!(
            task = %task,
            item_id,
            position = position + 1,
            total,
            result = result.as_str(),
            "Item finished",
        );

        self.persist(task, item).await;
        self.events.publish(OrchestrationEvent::ItemFinished {
            task,
            item_id,
            result,
            position,
            total,
        });
        result
    }

    /// Stage the item's result under `task`, write it now and reload the
    /// task's results. The coalescer's active context is left alone.
    async fn persist(&self, task: TaskRef, item: &ExecutionItem) {
        let id = item.item_id;
        self.coalescer
            .stage_in(task, id, FIELD_TEST_RESULT, item.result.as_str());
        if let Some(bug_id) = &item.bug_id {
            self.coalescer.stage_in(task, id, FIELD_BUG_ID, bug_id.as_str());
        }
        if let Some(remark) = &item.remark {
            self.coalescer.stage_in(task, id, FIELD_REMARK, remark.as_str());
        }

        // The coalescer keeps failed edits for the next flush.
        if let Err(e) = self.coalescer.flush().await {
            tracing::warn!(task = %task, item_id = item.item_id, error = %e, "Result not persisted yet");
        }

        match self.store.load_results(task).await {
            Ok(records) => {
                self.events.publish(OrchestrationEvent::ResultsReloaded {
                    task,
                    records: records.len(),
                });
            }
            Err(e) => {
                tracing::warn!(task = %task, error = %e, "Failed to reload results");
            }
        }
    }
}
