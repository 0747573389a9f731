use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use tracing::debug;

use dealflow_core::config::ModelConfig;
use dealflow_core::error::{DealflowError, Result};
use dealflow_core::traits::{LlmClient, ReasoningBackend};
use dealflow_core::types::{BackendOutput, ChatMessage, ResolvedInput, StreamDelta, ToolContext};
use dealflow_tools::ToolRegistry;

use crate::plan::executor::truncate_chars;
use crate::repair::repair;

const SYSTEM_PROMPT: &str = "You are an assistant working for a content creator. \
You read brand collaboration emails, compare them with the creator's preferences, \
and draft replies. Follow the task instructions exactly. When the task asks for \
JSON, reply with a single JSON value and nothing else.";

const SUMMARY_MAX_CHARS: usize = 200;

/// Production backend: reasoning steps go to an LLM, tool steps to the registry.
pub struct AgentBackend {
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
    tools: Arc<ToolRegistry>,
}

impl AgentBackend {
    pub fn new(llm: Arc<dyn LlmClient>, model: ModelConfig, tools: Arc<ToolRegistry>) -> Self {
        Self { llm, model, tools }
    }
}

/// The user message for a reasoning step: labeled context, then the task.
pub fn build_prompt(instructions: &str, inputs: &[ResolvedInput]) -> String {
    let mut prompt = String::new();
    if !inputs.is_empty() {
        prompt.push_str("## Context Data\n\n");
        for input in inputs {
            let rendered = match &input.value {
                serde_json::Value::String(s) => s.clone(),
                other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
            };
            prompt.push_str(&format!("### {}\n{}\n\n", input.label, rendered));
        }
    }
    prompt.push_str("## Task\n\n");
    prompt.push_str(instructions.trim());
    prompt
}

fn first_line_summary(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("```"))
        .map(|l| truncate_chars(l, SUMMARY_MAX_CHARS))
}

impl ReasoningBackend for AgentBackend {
    fn reason<'a>(
        &'a self,
        instructions: &'a str,
        inputs: &'a [ResolvedInput],
    ) -> BoxFuture<'a, Result<BackendOutput>> {
        Box::pin(async move {
            let messages = vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(build_prompt(instructions, inputs)),
            ];

            let mut stream = self.llm.chat_stream(&self.model, messages).await?;
            let mut reply = String::new();
            while let Some(delta) = stream.next().await {
                match delta? {
                    StreamDelta::TextDelta(text) => reply.push_str(&text),
                    StreamDelta::Usage {
                        input_tokens,
                        output_tokens,
                    } => debug!(input_tokens, output_tokens, "LLM usage"),
                    StreamDelta::Stop(reason) => debug!(?reason, "LLM stream stopped"),
                }
            }

            if reply.trim().is_empty() {
                return Err(DealflowError::Backend("model returned an empty reply".into()));
            }

            let summary = first_line_summary(&reply);
            let mut output = BackendOutput::new(serde_json::Value::String(reply));
            output.summary = summary;
            Ok(output)
        })
    }

    fn invoke_tool<'a>(
        &'a self,
        tool_name: &'a str,
        args: serde_json::Map<String, serde_json::Value>,
        ctx: ToolContext,
    ) -> BoxFuture<'a, Result<BackendOutput>> {
        Box::pin(async move {
            // Reasoning replies arrive as text; tools get the structured value.
            let args: serde_json::Map<String, serde_json::Value> =
                args.into_iter().map(|(k, v)| (k, repair(&v))).collect();
            let result = self
                .tools
                .execute(tool_name, serde_json::Value::Object(args), ctx)
                .await?;

            if result.is_error {
                return Err(DealflowError::Backend(format!("{}: {}", tool_name, result.content)));
            }

            let value = serde_json::from_str::<serde_json::Value>(&result.content)
                .unwrap_or(serde_json::Value::String(result.content));
            let summary = match value.get("total").and_then(|t| t.as_u64()) {
                Some(total) => format!("{} returned {} results", tool_name, total),
                None => format!("{} completed", tool_name),
            };
            Ok(BackendOutput::new(value).with_summary(summary))
        })
    }
}
