use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::json;
use uuid::Uuid;

use dealflow_core::error::{DealflowError, Result};
use dealflow_core::traits::Tool;
use dealflow_core::types::{ToolContext, ToolResult};

/// Appends a follow-up event to the user's calendar (`calendar_events` table).
pub struct CalendarScheduleTool {
    timeout_secs: u64,
}

impl CalendarScheduleTool {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

fn optional_str(input: &serde_json::Value, key: &str) -> serde_json::Value {
    match &input[key] {
        serde_json::Value::Null => serde_json::Value::Null,
        serde_json::Value::String(s) => json!(s),
        other => json!(other.to_string()),
    }
}

/// Accepts either a bare id or a whole email row.
fn email_id(input: &serde_json::Value) -> serde_json::Value {
    match &input["email_id"] {
        serde_json::Value::Object(map) => map
            .get("email_id")
            .or_else(|| map.get("id"))
            .cloned()
            .unwrap_or(serde_json::Value::Null),
        _ => optional_str(input, "email_id"),
    }
}

impl Tool for CalendarScheduleTool {
    fn name(&self) -> &str {
        "calendar_schedule"
    }

    fn description(&self) -> &str {
        "Schedule a follow-up calendar event, optionally linked to an email."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "start": { "type": "string", "description": "ISO8601 start time" },
                "notes": { "type": "string" },
                "email_id": { "type": "string" }
            },
            "required": ["title"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let store = ctx.store.as_ref().ok_or_else(|| DealflowError::ToolExecution {
                tool: "calendar_schedule".into(),
                message: "No store available".into(),
            })?;

            // Reasoning output may hand over a whole parsed email; fall back to its subject.
            let title = match &input["title"] {
                serde_json::Value::String(s) if !s.trim().is_empty() => s.clone(),
                serde_json::Value::Object(map) => match map.get("subject").and_then(|s| s.as_str()) {
                    Some(subject) => format!("Follow up: {}", subject),
                    None => "Follow up".to_string(),
                },
                serde_json::Value::Null => {
                    return Err(DealflowError::ToolValidation(
                        "calendar_schedule: 'title' is required".into(),
                    ))
                }
                other => other.to_string(),
            };

            let event = json!({
                "id": Uuid::new_v4().to_string(),
                "user_id": ctx.user_id,
                "run_id": ctx.run_id.0,
                "title": title,
                "start": optional_str(&input, "start"),
                "notes": optional_str(&input, "notes"),
                "email_id": email_id(&input),
                "created_at": Utc::now().to_rfc3339(),
            });

            let row = event.as_object().cloned().unwrap_or_default();
            store.insert("calendar_events", row).await?;

            Ok(ToolResult::success(event.to_string()))
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}
