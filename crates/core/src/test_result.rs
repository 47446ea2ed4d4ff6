//! Test-case results, execution items and run summaries.
//!
//! Provides the [`TestResult`] codes stored per case, the [`ExecutionItem`]
//! the orchestrator mutates while a run progresses, the derived
//! [`RunSummary`] statistics, and the localized auto-execution remarks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::DbId;

// ---------------------------------------------------------------------------
// Result field names (keys of a persisted result record)
// ---------------------------------------------------------------------------

/// Result code field (`NR`, `OK`, `NG`, `Block`).
pub const FIELD_TEST_RESULT: &str = "test_result";
/// Linked defect identifier.
pub const FIELD_BUG_ID: &str = "bug_id";
/// Free-form tester remark.
pub const FIELD_REMARK: &str = "remark";
/// Script attached to the case; empty when the case cannot run automatically.
pub const FIELD_SCRIPT_CODE: &str = "script_code";

// ---------------------------------------------------------------------------
// TestResult
// ---------------------------------------------------------------------------

/// Outcome recorded for one test case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestResult {
    /// Not run.
    #[default]
    #[serde(rename = "NR")]
    NotRun,
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "NG")]
    Ng,
    /// Could not be executed (e.g. no script attached).
    #[serde(rename = "Block")]
    Block,
}

impl TestResult {
    /// Wire representation of the result code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRun => "NR",
            Self::Ok => "OK",
            Self::Ng => "NG",
            Self::Block => "Block",
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ExecutionItem
// ---------------------------------------------------------------------------

/// One test case scheduled for execution within a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionItem {
    /// Case-result row id; also the key of its persisted result record.
    pub item_id: DbId,
    pub has_executable_script: bool,
    #[serde(default)]
    pub result: TestResult,
    #[serde(default)]
    pub bug_id: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
    /// 1-based position shown in the task table.
    pub display_index: u32,
}

impl ExecutionItem {
    pub fn new(item_id: DbId, has_executable_script: bool, display_index: u32) -> Self {
        Self {
            item_id,
            has_executable_script,
            result: TestResult::NotRun,
            bug_id: None,
            remark: None,
            display_index,
        }
    }
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// Aggregate statistics over a set of results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub ok: usize,
    pub ng: usize,
    pub block: usize,
    pub nr: usize,
}

impl RunSummary {
    /// Build a summary from persisted results; `NR` entries count as `nr`.
    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = TestResult>,
    {
        let mut summary = Self::default();
        for result in results {
            summary.total += 1;
            summary.record(result);
        }
        summary
    }

    /// Count one result without touching `total`.
    pub fn record(&mut self, result: TestResult) {
        match result {
            TestResult::Ok => self.ok += 1,
            TestResult::Ng => self.ng += 1,
            TestResult::Block => self.block += 1,
            TestResult::NotRun => self.nr += 1,
        }
    }

    /// Results that were actually produced (`total - nr`).
    pub fn executed(&self) -> usize {
        self.total.saturating_sub(self.nr)
    }

    /// Share of executed items, rounded to a whole percent.
    pub fn progress_percent(&self) -> u32 {
        rounded_percent(self.executed(), self.total)
    }

    /// Share of executed items that passed, rounded to a whole percent.
    pub fn pass_rate_percent(&self) -> u32 {
        rounded_percent(self.ok, self.executed())
    }
}

fn rounded_percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((part * 200 + whole) / (whole * 2)) as u32
}

// ---------------------------------------------------------------------------
// Auto-execution remarks
// ---------------------------------------------------------------------------

/// Language used for remarks written by automatic execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemarkLanguage {
    #[default]
    Cn,
    Jp,
    En,
}

impl RemarkLanguage {
    /// Parse a task display-language code. Unknown codes fall back to `cn`,
    /// matching how tasks without a language are treated.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "jp" => Self::Jp,
            "en" => Self::En,
            _ => Self::Cn,
        }
    }

    /// Remark recorded after an automatic execution.
    pub fn execution_remark(self, success: bool, error: Option<&str>) -> String {
        let error = error.unwrap_or_default();
        match (self, success) {
            (Self::Cn, true) => "自动执行成功".to_string(),
            (Self::Jp, true) => "自動実行成功".to_string(),
            (Self::En, true) => "Auto execution succeeded".to_string(),
            (Self::Cn, false) => format!("自动执行失败: {error}"),
            (Self::Jp, false) => format!("自動実行失敗: {error}"),
            (Self::En, false) => format!("Auto execution failed: {error}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
