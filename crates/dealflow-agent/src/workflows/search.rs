//! Search-Collaboration-Emails: query, search, filter, structure.

use serde_json::{json, Value};

use dealflow_core::error::Result;

use crate::output_validator::OutputSchema;
use crate::plan::{Plan, PlanBuilder, StepRef};

pub const PLAN_NAME: &str = "search_collaboration_emails";

const DERIVE_QUERY: &str = "\
Write one mailbox search query that finds collaboration or brand deal requests \
sent to the creator described in the context during the last 30 days. Use plain \
keywords joined with OR, for example: collaboration OR sponsorship OR partnership. \
Bias the keywords toward the creator's niche. Reply with the query only.";

const SEARCH: &str = "Run the search query against the creator's mailbox.";

const FILTER: &str = "\
From the search results keep only emails that are genuine collaboration or brand \
deal requests intended for the creator and sent by another party. The sender must \
clearly propose a partnership, sponsorship, brand deal, or collaboration.

Exclude:
- Newsletters, notifications, or automated emails.
- Emails sent by the creator, or not addressed to the creator directly.
- Emails that only mention collaboration terms without an intent to start a deal.

Reply with a JSON array of the kept emails, each with its email_id and a short \
`intent` note.";

const STRUCTURE: &str = "\
Restructure the kept emails into the required JSON object. Use the search results \
for the message details and the context to judge relevance.

Required keys and types:
{
  \"emails\": [
    {
      \"email_id\": \"string\",
      \"from_name\": \"string\",
      \"from_email\": \"string\",
      \"subject\": \"string\",
      \"snippet\": \"string, one or two lines\",
      \"received_at\": \"ISO8601 string\",
      \"thread_link\": \"string\",
      \"labels\": [\"brand\" | \"offer\" | \"sponsored\" | \"negotiation\"],
      \"tags\": [\"optional category tags\"],
      \"relevance_score\": 0-1,
      \"confidence\": 0-1,
      \"first_received\": \"ISO8601 string\",
      \"last_received\": \"ISO8601 string\",
      \"ui_actions\": [\"start_colab_process\"],
      \"notes\": \"optional string\"
    }
  ],
  \"summary\": {
    \"total_found\": 0,
    \"by_label\": { \"brand\": 0 },
    \"top_senders\": [{ \"email\": \"\", \"count\": 0 }]
  }
}

Reply with the JSON object only.";

fn unit_interval() -> Value {
    json!({ "type": "number", "minimum": 0, "maximum": 1 })
}

fn string_list() -> Value {
    json!({ "type": "array", "items": { "type": "string" } })
}

/// One email in the search result.
pub fn email_item_schema() -> Value {
    json!({
        "type": "object",
        "required": [
            "email_id", "from_name", "from_email", "subject", "snippet",
            "received_at", "thread_link", "labels", "relevance_score",
            "confidence", "first_received", "last_received", "ui_actions"
        ],
        "properties": {
            "email_id": { "type": "string" },
            "from_name": { "type": "string" },
            "from_email": { "type": "string" },
            "subject": { "type": "string" },
            "snippet": { "type": "string" },
            "received_at": { "type": "string" },
            "thread_link": { "type": "string" },
            "labels": string_list(),
            "tags": string_list(),
            "relevance_score": unit_interval(),
            "confidence": unit_interval(),
            "first_received": { "type": "string" },
            "last_received": { "type": "string" },
            "ui_actions": string_list(),
            "notes": { "type": "string" }
        }
    })
}

pub fn result_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "SearchColabEmailsResponse",
        "type": "object",
        "required": ["emails", "summary"],
        "properties": {
            "emails": { "type": "array", "items": email_item_schema() },
            "summary": {
                "type": "object",
                "required": ["total_found", "by_label", "top_senders"],
                "properties": {
                    "total_found": { "type": "integer", "minimum": 0 },
                    "by_label": {
                        "type": "object",
                        "additionalProperties": { "type": "integer", "minimum": 0 }
                    },
                    "top_senders": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["email", "count"],
                            "properties": {
                                "email": { "type": "string" },
                                "count": { "type": "integer", "minimum": 0 }
                            }
                        }
                    }
                }
            }
        }
    })
}

pub fn build() -> Result<Plan> {
    let context = StepRef::input("context");
    PlanBuilder::new(PLAN_NAME)
        .input("context", "The creator's stored profile and preferences")?
        .reasoning(DERIVE_QUERY, [context.clone()])?
        .tool(SEARCH, "mail_search", [("query", StepRef::step(0))])?
        .reasoning(FILTER, [StepRef::step(1), context.clone()])?
        .reasoning(STRUCTURE, [StepRef::step(1), StepRef::step(2), context])?
        .build(OutputSchema::new("search_colab_emails", result_schema())?, true)
}
