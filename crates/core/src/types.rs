use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Backend primary keys (documents, case results, projects).
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifies one execution task: the context whose results are being edited
/// and executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskRef {
    pub project_id: DbId,
    pub task_uuid: Uuid,
}

impl TaskRef {
    pub fn new(project_id: DbId, task_uuid: Uuid) -> Self {
        Self {
            project_id,
            task_uuid,
        }
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.task_uuid)
    }
}
