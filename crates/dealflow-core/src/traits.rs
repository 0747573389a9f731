use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// LLM client: multi-provider streaming.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Tool: a named capability a plan step can invoke.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (referenced by plan steps).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// The external reasoning/tool backend a plan runs against.
///
/// The executor never looks past this contract: one call per step, an opaque
/// value back, or an error that aborts the run.
pub trait ReasoningBackend: Send + Sync + 'static {
    /// Run a reasoning step over its resolved references.
    fn reason<'a>(
        &'a self,
        instructions: &'a str,
        inputs: &'a [ResolvedInput],
    ) -> BoxFuture<'a, Result<BackendOutput>>;

    /// Invoke a named tool with resolved arguments.
    fn invoke_tool<'a>(
        &'a self,
        tool_name: &'a str,
        args: serde_json::Map<String, serde_json::Value>,
        ctx: ToolContext,
    ) -> BoxFuture<'a, Result<BackendOutput>>;
}

/// Best-effort, append-only per-step log.
pub trait AuditSink: Send + Sync + 'static {
    /// Record one completed step. Errors are the caller's to swallow.
    fn record<'a>(&'a self, run_id: &'a RunId, result: &'a StepResult) -> BoxFuture<'a, Result<()>>;
}

/// Row persistence for emails, profiles and audit actions.
pub trait PersistenceStore: Send + Sync + 'static {
    /// Append a row. Keyed by its `id` field, or a fresh UUID when absent.
    fn insert(&self, table: &str, row: Row) -> BoxFuture<'_, Result<()>>;

    /// Insert or replace rows keyed by the value of `conflict_key`.
    fn upsert(&self, table: &str, rows: Vec<Row>, conflict_key: &str) -> BoxFuture<'_, Result<()>>;

    /// Fetch a row by key.
    fn get(&self, table: &str, key: &str) -> BoxFuture<'_, Result<Option<Row>>>;

    /// List rows in insertion order, optionally filtered by exact field match.
    fn list(
        &self,
        table: &str,
        filter: Option<(&str, &str)>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Row>>>;
}
