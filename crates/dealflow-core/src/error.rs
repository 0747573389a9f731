use thiserror::Error;

#[derive(Debug, Error)]
pub enum DealflowError {
    // Plan construction errors
    #[error("Duplicate plan input name: {0}")]
    DuplicateInputName(String),

    #[error("Dangling reference in step {step}: {reference}")]
    DanglingReference { step: usize, reference: String },

    // Execution errors
    #[error("Plan input not bound: {0}")]
    UnboundInput(String),

    #[error("Backend call failed: {0}")]
    Backend(String),

    #[error("Backend timeout after {timeout_secs}s in step {step}")]
    BackendTimeout { step: usize, timeout_secs: u64 },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Schema validation failed: {}", .0.join("; "))]
    SchemaValidation(Vec<String>),

    #[error("Audit write failed: {0}")]
    AuditWrite(String),

    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DealflowError {
    /// Whether this error belongs to plan construction or input binding,
    /// i.e. it was raised before any backend call or side effect.
    pub fn is_pre_execution(&self) -> bool {
        matches!(
            self,
            Self::DuplicateInputName(_) | Self::DanglingReference { .. } | Self::UnboundInput(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DealflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_validation_message_joins_issues() {
        let err = DealflowError::SchemaValidation(vec!["a missing".into(), "b wrong".into()]);
        assert_eq!(err.to_string(), "Schema validation failed: a missing; b wrong");
    }

    #[test]
    fn test_pre_execution_classification() {
        assert!(DealflowError::UnboundInput("context".into()).is_pre_execution());
        assert!(DealflowError::DanglingReference {
            step: 2,
            reference: "step 5".into()
        }
        .is_pre_execution());
        assert!(!DealflowError::Cancelled.is_pre_execution());
        assert!(!DealflowError::Backend("boom".into()).is_pre_execution());
    }
}
