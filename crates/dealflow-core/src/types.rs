use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted row: a JSON object keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Identifier of one plan run. Audit records are keyed by it.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message sent to an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

/// A streaming delta from the LLM.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text content.
    TextDelta(String),
    /// The response is complete.
    Stop(StopReason),
    /// Usage information.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },
}

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Tool definition, as advertised to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Context passed to tools during execution.
#[derive(Clone)]
pub struct ToolContext {
    pub run_id: RunId,
    /// Owner of the mailbox/calendar the tool acts on.
    pub user_id: Option<String>,
    pub store: Option<Arc<dyn crate::traits::PersistenceStore>>,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("run_id", &self.run_id)
            .field("user_id", &self.user_id)
            .field("store", &self.store.is_some())
            .finish()
    }
}

/// A reference resolved to its value, handed to the backend for a reasoning step.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedInput {
    /// Input name, or `step N output` for a prior step.
    pub label: String,
    pub value: serde_json::Value,
}

/// What a backend call produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendOutput {
    pub value: serde_json::Value,
    #[serde(default)]
    pub summary: Option<String>,
}

impl BackendOutput {
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

/// Why a step failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepFailureKind {
    Backend,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepFailure {
    pub kind: StepFailureKind,
    pub message: String,
}

/// Outcome of one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    /// `reasoning` or `tool:<name>`.
    pub action_kind: String,
    pub raw_output: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
    pub elapsed_ms: u64,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// One audited agent action. Append-only: never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_id: Uuid,
    pub run_id: String,
    pub summary: String,
    pub actor: String,
    pub details: serde_json::Value,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

impl ActionRecord {
    /// Build a fresh record for a completed step. Each call mints a new id.
    pub fn for_step(run_id: &RunId, result: &StepResult) -> Self {
        Self {
            action_id: Uuid::new_v4(),
            run_id: run_id.0.clone(),
            summary: result
                .summary
                .clone()
                .unwrap_or_else(|| format!("Completed step {}", result.step_index)),
            actor: "agent".to_string(),
            details: serde_json::json!({
                "step_index": result.step_index,
                "kind": result.action_kind,
                "output": result.raw_output,
            }),
            kind: result.action_kind.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle events emitted by the plan executor.
#[derive(Debug, Clone)]
pub enum PlanEvent {
    RunStarted {
        run_id: RunId,
        plan: String,
    },
    StepStarted {
        run_id: RunId,
        step_index: usize,
        action_kind: String,
    },
    StepCompleted {
        run_id: RunId,
        step_index: usize,
        summary: Option<String>,
        output: serde_json::Value,
        elapsed_ms: u64,
    },
    StepFailed {
        run_id: RunId,
        step_index: usize,
        failure: StepFailure,
    },
    /// The final output did not conform to the plan's schema.
    SchemaMismatch {
        run_id: RunId,
        issues: Vec<String>,
    },
    RunComplete {
        run_id: RunId,
        succeeded: bool,
        steps: usize,
        elapsed_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(summary: Option<&str>) -> StepResult {
        StepResult {
            step_index: 1,
            action_kind: "tool:mail_search".into(),
            raw_output: serde_json::json!({"total": 2}),
            summary: summary.map(String::from),
            error: None,
            elapsed_ms: 5,
        }
    }

    #[test]
    fn test_action_record_ids_are_fresh() {
        let run = RunId::from_string("msg-1");
        let a = ActionRecord::for_step(&run, &result(Some("found 2")));
        let b = ActionRecord::for_step(&run, &result(Some("found 2")));
        assert_ne!(a.action_id, b.action_id);
        assert_eq!(a.actor, "agent");
        assert_eq!(a.kind, "tool:mail_search");
        assert_eq!(a.summary, "found 2");
        assert_eq!(a.details["step_index"], 1);
    }

    #[test]
    fn test_action_record_default_summary() {
        let a = ActionRecord::for_step(&RunId::new(), &result(None));
        assert_eq!(a.summary, "Completed step 1");
    }

    #[test]
    fn test_step_result_serialization_skips_empty() {
        let json = serde_json::to_string(&result(None)).unwrap();
        assert!(!json.contains("summary"));
        assert!(!json.contains("error"));
    }
}
