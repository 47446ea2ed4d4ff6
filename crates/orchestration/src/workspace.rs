//! Task-scoped editing session on top of the [`WriteCoalescer`].

use std::sync::Arc;

use serde_json::Value;
use testdeck_core::remote::{RemoteError, ResultRecord, ResultStore};
use testdeck_core::types::TaskRef;

use crate::coalescer::{CoalescerError, WriteCoalescer};

/// Opens tasks and routes result edits to the coalescer.
///
/// Opening a task always flushes the previous task's edits before the new
/// task's results are loaded.
pub struct TaskWorkspace<S> {
    store: Arc<S>,
    coalescer: Arc<WriteCoalescer<S>>,
}

impl<S: ResultStore> TaskWorkspace<S> {
    pub fn new(store: Arc<S>, coalescer: Arc<WriteCoalescer<S>>) -> Self {
        Self { store, coalescer }
    }

    pub fn current_task(&self) -> Option<TaskRef> {
        self.coalescer.active_context()
    }

    /// Switch to `task` and load its persisted results.
    ///
    /// A failed flush of the previous task does not prevent the switch: its
    /// edits stay buffered under that task and go out with the next flush.
    pub async fn open_task(&self, task: TaskRef) -> Result<Vec<ResultRecord>, RemoteError> {
        if let Err(e) = self.coalescer.switch_context(task).await {
            tracing::warn!(task = %task, error = %e, "Previous task not fully saved");
        }
        let records = self.store.load_results(task).await?;
        tracing::info!(task = %task, records = records.len(), "Task opened");
        Ok(records)
    }

    /// Edit one field of a loaded record.
    ///
    /// The full record is seeded first so the bulk write carries the whole
    /// row, with the edited field on top.
    pub fn edit(&self, record: &ResultRecord, field: &str, value: impl Into<Value>) {
        self.coalescer.seed(record.case_id, record.fields.clone());
        self.coalescer.stage(record.case_id, field, value);
    }

    /// Write the open task's pending edits now.
    pub async fn save(&self) -> Result<(), CoalescerError> {
        self.coalescer.flush().await
    }

    /// Flush on teardown. Edits staged afterwards are discarded.
    pub async fn close(&self) -> Result<(), CoalescerError> {
        self.coalescer.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::config::CoalescerConfig;
    use crate::events::EventBus;

    #[derive(Default)]
    struct MemoryStore {
        saves: Mutex<Vec<Vec<ResultRecord>>>,
    }

    impl ResultStore for MemoryStore {
        async fn save_results(
            &self,
            _task: TaskRef,
            records: Vec<ResultRecord>,
        ) -> Result<(), RemoteError> {
            self.saves.lock().unwrap().push(records);
            Ok(())
        }

        async fn load_results(&self, _task: TaskRef) -> Result<Vec<ResultRecord>, RemoteError> {
            Ok(vec![ResultRecord::new(1)
                .with_field("test_result", "NR")
                .with_field("bug_id", "")])
        }
    }

    fn workspace() -> (TaskWorkspace<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let coalescer = Arc::new(WriteCoalescer::new(
            Arc::clone(&store),
            CoalescerConfig::default(),
            EventBus::default(),
        ));
        (TaskWorkspace::new(Arc::clone(&store), coalescer), store)
    }

    #[tokio::test(start_paused = true)]
    async fn edit_writes_full_row_with_new_value() {
        let (workspace, store) = workspace();
        let task = TaskRef::new(3, Uuid::new_v4());
        let records = workspace.open_task(task).await.unwrap();
        assert_eq!(workspace.current_task(), Some(task));

        workspace.edit(&records[0], "bug_id", "BUG-42");
        workspace.save().await.unwrap();

        let saves = store.saves.lock().unwrap();
        assert_eq!(saves.len(), 1);
        let row = &saves[0][0];
        assert_eq!(row.get("bug_id"), Some(&json!("BUG-42")));
        assert_eq!(row.get("test_result"), Some(&json!("NR")));
    }

    #[tokio::test(start_paused = true)]
    async fn close_flushes_pending_edits() {
        let (workspace, store) = workspace();
        let task = TaskRef::new(3, Uuid::new_v4());
        let records = workspace.open_task(task).await.unwrap();
        workspace.edit(&records[0], "remark", "checked");

        workspace.close().await.unwrap();
        assert_eq!(store.saves.lock().unwrap().len(), 1);
    }
}
