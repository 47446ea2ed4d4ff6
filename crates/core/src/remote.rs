//! Remote-call seams used by the orchestration layer.
//!
//! Three backend capabilities are abstracted as traits so the orchestration
//! logic can be driven by the HTTP client in production and by in-memory
//! fakes in tests:
//!
//! - [`JobStatusSource`]: start a conversion and read its status.
//! - [`ItemExecutor`]: execute a single test case remotely.
//! - [`ResultStore`]: bulk-write and reload persisted case results.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::conversion::JobStatusResponse;
use crate::test_result::{
    ExecutionItem, TestResult, FIELD_BUG_ID, FIELD_REMARK, FIELD_SCRIPT_CODE, FIELD_TEST_RESULT,
};
use crate::types::{DbId, TaskRef};

// ---------------------------------------------------------------------------
// RemoteError
// ---------------------------------------------------------------------------

/// HTTP status the backend uses for "already in progress" conflicts.
pub const STATUS_CONFLICT: u16 = 409;
/// HTTP status for a missing resource.
pub const STATUS_NOT_FOUND: u16 = 404;

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The request never produced a response (network, DNS, TLS, timeout).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-2xx status.
    #[error("Remote API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// HTTP status code, when the backend answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Execute-item response
// ---------------------------------------------------------------------------

/// Body returned by the single-case execute endpoint. Each count is 0 or 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteItemResponse {
    #[serde(default)]
    pub ok_count: u32,
    #[serde(default)]
    pub ng_count: u32,
    #[serde(default)]
    pub block_count: u32,
}

impl ExecuteItemResponse {
    pub fn ok() -> Self {
        Self {
            ok_count: 1,
            ..Default::default()
        }
    }

    pub fn ng() -> Self {
        Self {
            ng_count: 1,
            ..Default::default()
        }
    }

    pub fn block() -> Self {
        Self {
            block_count: 1,
            ..Default::default()
        }
    }

    /// Map the counts onto a result code.
    ///
    /// NG takes precedence over Block, Block over OK. A response with every
    /// count at zero carries no verdict and is treated as NG.
    pub fn classify(&self) -> TestResult {
        if self.ng_count > 0 {
            TestResult::Ng
        } else if self.block_count > 0 {
            TestResult::Block
        } else if self.ok_count > 0 {
            TestResult::Ok
        } else {
            TestResult::Ng
        }
    }
}

// ---------------------------------------------------------------------------
// ResultRecord
// ---------------------------------------------------------------------------

/// Partial case-result record keyed by `case_id`.
///
/// Only the fields present in `fields` are written; the bulk endpoint merges
/// them into the stored row, so re-sending a record is a no-op change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub case_id: DbId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ResultRecord {
    pub fn new(case_id: DbId) -> Self {
        Self {
            case_id,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Decoded `test_result` field, if present and well-formed.
    pub fn test_result(&self) -> Option<TestResult> {
        self.fields
            .get(FIELD_TEST_RESULT)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Build the execution item for this record.
    ///
    /// The case is executable when it carries a non-blank `script_code`.
    /// Blank `bug_id` / `remark` strings are treated as absent.
    pub fn to_execution_item(&self, display_index: u32) -> ExecutionItem {
        let text = |field: &str| {
            self.get(field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        ExecutionItem {
            item_id: self.case_id,
            has_executable_script: text(FIELD_SCRIPT_CODE).is_some(),
            result: self.test_result().unwrap_or_default(),
            bug_id: text(FIELD_BUG_ID),
            remark: text(FIELD_REMARK),
            display_index,
        }
    }
}

// ---------------------------------------------------------------------------
// Remote traits
// ---------------------------------------------------------------------------

/// Source of conversion-job status (the remote job API).
pub trait JobStatusSource: Send + Sync {
    /// Ask the backend to start converting document `job_id`.
    fn start_conversion(&self, job_id: DbId)
        -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Read the current status of conversion job `job_id`.
    fn fetch_status(
        &self,
        job_id: DbId,
    ) -> impl Future<Output = Result<JobStatusResponse, RemoteError>> + Send;
}

/// Remote executor that runs exactly one test case per call.
pub trait ItemExecutor: Send + Sync {
    fn execute_item(
        &self,
        task: TaskRef,
        item_id: DbId,
    ) -> impl Future<Output = Result<ExecuteItemResponse, RemoteError>> + Send;
}

/// Durable storage for case results (the persistence API).
pub trait ResultStore: Send + Sync {
    /// Bulk-write partial records for one task.
    fn save_results(
        &self,
        task: TaskRef,
        records: Vec<ResultRecord>,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Load every persisted record of one task.
    fn load_results(
        &self,
        task: TaskRef,
    ) -> impl Future<Output = Result<Vec<ResultRecord>, RemoteError>> + Send;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_single_counts() {
        assert_eq!(ExecuteItemResponse::ok().classify(), TestResult::Ok);
        assert_eq!(ExecuteItemResponse::ng().classify(), TestResult::Ng);
        assert_eq!(ExecuteItemResponse::block().classify(), TestResult::Block);
    }

    #[test]
    fn classify_without_verdict_is_ng() {
        assert_eq!(ExecuteItemResponse::default().classify(), TestResult::Ng);
    }

    #[test]
    fn classify_prefers_ng_over_ok() {
        let response = ExecuteItemResponse {
            ok_count: 1,
            ng_count: 1,
            block_count: 0,
        };
        assert_eq!(response.classify(), TestResult::Ng);
    }

    #[test]
    fn result_record_serializes_flat() {
        let record = ResultRecord::new(12)
            .with_field(FIELD_TEST_RESULT, "OK")
            .with_field("remark", "fine");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"case_id": 12, "test_result": "OK", "remark": "fine"})
        );
    }

    #[test]
    fn result_record_decodes_test_result() {
        let record: ResultRecord =
            serde_json::from_str(r#"{"case_id": 3, "test_result": "Block", "bug_id": ""}"#)
                .unwrap();
        assert_eq!(record.case_id, 3);
        assert_eq!(record.test_result(), Some(TestResult::Block));
        assert!(!record.fields.contains_key("case_id"));
    }

    #[test]
    fn execution_item_from_record() {
        let record = ResultRecord::new(21)
            .with_field(FIELD_SCRIPT_CODE, "await page.goto(url);")
            .with_field(FIELD_TEST_RESULT, "NG")
            .with_field(FIELD_BUG_ID, "  ")
            .with_field(FIELD_REMARK, "timeout on login");
        let item = record.to_execution_item(4);
        assert_eq!(item.item_id, 21);
        assert!(item.has_executable_script);
        assert_eq!(item.result, TestResult::Ng);
        assert_eq!(item.bug_id, None);
        assert_eq!(item.remark.as_deref(), Some("timeout on login"));
        assert_eq!(item.display_index, 4);

        let manual = ResultRecord::new(22).with_field(FIELD_SCRIPT_CODE, "");
        assert!(!manual.to_execution_item(1).has_executable_script);
        assert_eq!(manual.to_execution_item(1).result, TestResult::NotRun);
    }

    #[test]
    fn api_error_exposes_status() {
        let err = RemoteError::Api {
            status: STATUS_CONFLICT,
            body: "busy".into(),
        };
        assert_eq!(err.status(), Some(409));
        assert_eq!(RemoteError::Transport("reset".into()).status(), None);
    }
}
