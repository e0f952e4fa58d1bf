//! Answer records and export snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version stamped on every answer record.
pub const ANSWER_VERSION: u32 = 1;

/// Version of the export snapshot format. Bump whenever `IndexedAnswer`
/// changes shape.
pub const EXPORT_SCHEMA_VERSION: u32 = 4;

/// The learner session the facade is storing answers for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
  /// Activity answers are scoped to
  pub activity_id: String,
  /// Run the learner is working in; keys plugin state documents
  pub run_key: String,
}

impl Session {
  pub fn new(activity_id: impl Into<String>, run_key: impl Into<String>) -> Self {
    Self {
      activity_id: activity_id.into(),
      run_key: run_key.into(),
    }
  }
}

fn answer_version() -> u32 {
  ANSWER_VERSION
}

/// Exportable answer for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerMetadata {
  #[serde(default = "answer_version")]
  pub version: u32,
  /// Stable across edits of the same answer
  pub id: String,
  #[serde(rename = "type")]
  pub answer_type: String,
  pub question_id: String,
  pub question_type: String,
  pub answer: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub answer_text: Option<String>,
  #[serde(default)]
  pub submitted: Option<bool>,
  /// JSON-encoded `ReportState`
  pub report_state: String,
}

/// Answer as stored locally, stamped with its activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedAnswer {
  #[serde(flatten)]
  pub meta: AnswerMetadata,
  pub activity: String,
}

/// Canonical wrapper around an interactive's raw state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportState {
  pub mode: String,
  pub authored_state: String,
  /// JSON-encoded raw interactive state
  pub interactive_state: String,
  pub version: u32,
}

/// Answer handed to watchers: the record plus the recovered raw state.
#[derive(Debug, Clone, PartialEq)]
pub struct WrappedAnswer {
  pub meta: AnswerMetadata,
  pub interactive_state: Value,
}

/// Exported answers of one activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSnapshot {
  pub activity: String,
  pub filename: String,
  pub version: u32,
  pub answers: Vec<IndexedAnswer>,
}
