use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use dealflow_core::error::{DealflowError, Result};
use dealflow_core::traits::ReasoningBackend;
use dealflow_core::types::{BackendOutput, ResolvedInput, ToolContext};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Scripted {
    Output(BackendOutput),
    Fail(String),
    /// Never resolves; the caller's timeout or cancellation must end it.
    Hang,
}

/// A call the backend received, in order.
#[derive(Debug, Clone)]
pub enum RecordedCall {
    Reason {
        instructions: String,
        inputs: Vec<ResolvedInput>,
    },
    Tool {
        name: String,
        args: serde_json::Map<String, serde_json::Value>,
        user_id: Option<String>,
    },
}

/// Backend that replays queued replies in order and records every call.
/// Reasoning and tool calls share one queue.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that returns each value in turn.
    pub fn with_outputs(values: impl IntoIterator<Item = serde_json::Value>) -> Self {
        values.into_iter().fold(Self::new(), |b, v| b.returns(v))
    }

    pub fn returns(self, value: serde_json::Value) -> Self {
        self.push(Scripted::Output(BackendOutput::new(value)))
    }

    pub fn returns_with_summary(self, value: serde_json::Value, summary: &str) -> Self {
        self.push(Scripted::Output(BackendOutput::new(value).with_summary(summary)))
    }

    pub fn fails(self, message: &str) -> Self {
        self.push(Scripted::Fail(message.to_string()))
    }

    pub fn hangs(self) -> Self {
        self.push(Scripted::Hang)
    }

    fn push(self, reply: Scripted) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Instructions of every reasoning call, in order.
    pub fn instructions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Reason { instructions, .. } => Some(instructions),
                RecordedCall::Tool { .. } => None,
            })
            .collect()
    }

    /// Names of every tool invoked, in order.
    pub fn tool_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Tool { name, .. } => Some(name),
                RecordedCall::Reason { .. } => None,
            })
            .collect()
    }

    fn next(&self, call: RecordedCall) -> Scripted {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Scripted::Fail("script exhausted".into()))
    }
}

async fn play(reply: Scripted) -> Result<BackendOutput> {
    match reply {
        Scripted::Output(output) => Ok(output),
        Scripted::Fail(message) => Err(DealflowError::Backend(message)),
        Scripted::Hang => {
            futures::future::pending::<()>().await;
            Err(DealflowError::Backend("unreachable".into()))
        }
    }
}

impl ReasoningBackend for ScriptedBackend {
    fn reason<'a>(
        &'a self,
        instructions: &'a str,
        inputs: &'a [ResolvedInput],
    ) -> BoxFuture<'a, Result<BackendOutput>> {
        let reply = self.next(RecordedCall::Reason {
            instructions: instructions.to_string(),
            inputs: inputs.to_vec(),
        });
        Box::pin(play(reply))
    }

    fn invoke_tool<'a>(
        &'a self,
        tool_name: &'a str,
        args: serde_json::Map<String, serde_json::Value>,
        ctx: ToolContext,
    ) -> BoxFuture<'a, Result<BackendOutput>> {
        let reply = self.next(RecordedCall::Tool {
            name: tool_name.to_string(),
            args,
            user_id: ctx.user_id,
        });
        Box::pin(play(reply))
    }
}
