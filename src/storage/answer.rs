//! Deriving answer records from interactive runtime state.

use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use uuid::Uuid;

use super::types::{AnswerMetadata, ReportState, WrappedAnswer, ANSWER_VERSION};

/// Question type used when the authored state declares none.
pub const DEFAULT_QUESTION_TYPE: &str = "iframe_interactive";
/// Answer type used when the runtime state declares none.
pub const DEFAULT_ANSWER_TYPE: &str = "interactive_state";

/// Embeddable kinds whose reference ids map to answer question ids.
const EMBEDDABLE_KINDS: &[(&str, &str)] = &[
  ("ManagedInteractive", "managed_interactive"),
  ("MwInteractive", "mw_interactive"),
];

/// Authored configuration of an interactive embeddable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddableConfig {
  /// Reference id, e.g. `123-ManagedInteractive`
  pub ref_id: String,
  /// JSON authored state, possibly empty
  pub authored_state: String,
}

impl EmbeddableConfig {
  pub fn new(ref_id: impl Into<String>, authored_state: impl Into<String>) -> Self {
    Self {
      ref_id: ref_id.into(),
      authored_state: authored_state.into(),
    }
  }

  /// The `questionType` declared in the authored state.
  pub fn question_type(&self) -> String {
    serde_json::from_str::<Value>(&self.authored_state)
      .ok()
      .and_then(|v| v.get("questionType")?.as_str().map(String::from))
      .unwrap_or_else(|| DEFAULT_QUESTION_TYPE.to_string())
  }
}

fn is_numeric_id(s: &str) -> bool {
  !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// `123-ManagedInteractive` -> `managed_interactive_123`. Other shapes pass
/// through unchanged.
pub fn ref_id_to_answers_question_id(ref_id: &str) -> String {
  if let Some((id, kind)) = ref_id.split_once('-') {
    if is_numeric_id(id) {
      if let Some((_, prefix)) = EMBEDDABLE_KINDS.iter().find(|(k, _)| *k == kind) {
        return format!("{}_{}", prefix, id);
      }
    }
  }
  ref_id.to_string()
}

/// `managed_interactive_123` -> `123-ManagedInteractive`. Other shapes pass
/// through unchanged.
pub fn answers_question_id_to_ref_id(question_id: &str) -> String {
  for (kind, prefix) in EMBEDDABLE_KINDS {
    if let Some(id) = question_id
      .strip_prefix(prefix)
      .and_then(|rest| rest.strip_prefix('_'))
    {
      if is_numeric_id(id) {
        return format!("{}-{}", id, kind);
      }
    }
  }
  question_id.to_string()
}

/// Build the answer record for an interactive's current state.
///
/// The id of `prior` is reused when given, so repeated saves of the same
/// question update one record.
pub fn answer_with_metadata(
  state: &Value,
  embeddable: &EmbeddableConfig,
  prior: Option<&AnswerMetadata>,
) -> Result<AnswerMetadata> {
  let interactive_state = serde_json::to_string(state)
    .map_err(|e| eyre!("Failed to serialize interactive state: {}", e))?;
  let report_state = serde_json::to_string(&ReportState {
    mode: "report".into(),
    authored_state: embeddable.authored_state.clone(),
    interactive_state,
    version: ANSWER_VERSION,
  })
  .map_err(|e| eyre!("Failed to serialize report state: {}", e))?;

  let field = |name: &str| state.get(name).cloned().unwrap_or(Value::Null);
  let text = state
    .get("answerText")
    .and_then(Value::as_str)
    .map(String::from);
  let answer_type = state
    .get("answerType")
    .and_then(Value::as_str)
    .unwrap_or(DEFAULT_ANSWER_TYPE)
    .to_string();

  let (answer, answer_text) = match answer_type.as_str() {
    "open_response_answer" => (
      Value::String(text.clone().unwrap_or_default()),
      Some(text.unwrap_or_default()),
    ),
    "image_question_answer" => (
      json!({"text": field("answerText"), "image_url": field("answerImageUrl")}),
      text,
    ),
    "multiple_choice_answer" => (json!({"choice_ids": field("selectedChoiceIds")}), None),
    _ => (Value::String(report_state.clone()), None),
  };

  Ok(AnswerMetadata {
    version: ANSWER_VERSION,
    id: prior
      .map(|p| p.id.clone())
      .unwrap_or_else(|| Uuid::new_v4().to_string()),
    answer_type,
    question_id: ref_id_to_answers_question_id(&embeddable.ref_id),
    question_type: embeddable.question_type(),
    answer,
    answer_text,
    submitted: state.get("submitted").and_then(Value::as_bool),
    report_state,
  })
}

/// Recover the raw interactive state embedded in a stored answer.
pub fn doc_to_wrapped_answer(meta: AnswerMetadata) -> Result<WrappedAnswer> {
  let report: ReportState = serde_json::from_str(&meta.report_state)
    .map_err(|e| eyre!("Failed to parse report state of answer {}: {}", meta.id, e))?;
  let interactive_state = serde_json::from_str(&report.interactive_state)
    .map_err(|e| eyre!("Failed to parse interactive state of answer {}: {}", meta.id, e))?;

  Ok(WrappedAnswer {
    meta,
    interactive_state,
  })
}
