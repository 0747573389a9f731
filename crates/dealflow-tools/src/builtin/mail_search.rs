use futures::future::BoxFuture;
use serde_json::json;

use dealflow_core::error::{DealflowError, Result};
use dealflow_core::traits::Tool;
use dealflow_core::types::{Row, ToolContext, ToolResult};

/// Fields searched for query terms.
const TEXT_FIELDS: &[&str] = &[
    "subject",
    "snippet",
    "body",
    "from_name",
    "from_email",
    "notes",
];

/// Mail-provider date operators carry no text to match.
const DATE_OPERATORS: &[&str] = &["newer_than", "older_than", "after", "before"];

/// Searches the user's ingested mailbox (`emails` table).
pub struct MailSearchTool {
    max_results: usize,
    timeout_secs: u64,
}

impl MailSearchTool {
    pub fn new(max_results: usize, timeout_secs: u64) -> Self {
        Self {
            max_results,
            timeout_secs,
        }
    }
}

/// A parsed query: lowercase terms, and whether any one term suffices.
#[derive(Debug, PartialEq)]
struct Query {
    terms: Vec<String>,
    any: bool,
}

fn parse_query(raw: &str) -> Query {
    let mut terms = Vec::new();
    let mut any = false;

    for token in raw.split_whitespace() {
        if token == "OR" {
            any = true;
            continue;
        }
        if token == "AND" {
            continue;
        }
        let token = match token.split_once(':') {
            Some((op, _)) if DATE_OPERATORS.contains(&op) => continue,
            Some((_, value)) => value,
            None => token,
        };
        let term: String = token
            .trim_matches(|c: char| matches!(c, '(' | ')' | '"' | '\'' | ',' | '{' | '}'))
            .to_lowercase();
        if !term.is_empty() {
            terms.push(term);
        }
    }

    Query { terms, any }
}

fn haystack(row: &Row) -> String {
    let mut text = String::new();
    for field in TEXT_FIELDS {
        if let Some(v) = row.get(*field).and_then(|v| v.as_str()) {
            text.push_str(&v.to_lowercase());
            text.push('\n');
        }
    }
    if let Some(labels) = row.get("labels").and_then(|v| v.as_array()) {
        for label in labels.iter().filter_map(|l| l.as_str()) {
            text.push_str(&label.to_lowercase());
            text.push('\n');
        }
    }
    text
}

fn matches(query: &Query, row: &Row) -> bool {
    if query.terms.is_empty() {
        return true;
    }
    let text = haystack(row);
    if query.any {
        query.terms.iter().any(|t| text.contains(t.as_str()))
    } else {
        query.terms.iter().all(|t| text.contains(t.as_str()))
    }
}

impl Tool for MailSearchTool {
    fn name(&self) -> &str {
        "mail_search"
    }

    fn description(&self) -> &str {
        "Search the user's mailbox. Every query term must appear in the message \
         (subject, snippet, body, sender, labels) unless terms are joined with OR. \
         Returns matching messages newest-ingested last."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search terms"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of messages to return"
                }
            },
            "required": ["query"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let store = ctx.store.as_ref().ok_or_else(|| DealflowError::ToolExecution {
                tool: "mail_search".into(),
                message: "No store available".into(),
            })?;

            let raw_query = match &input["query"] {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => {
                    return Err(DealflowError::ToolValidation("mail_search: 'query' is required".into()))
                }
                other => other.to_string(),
            };
            let limit = input["limit"]
                .as_u64()
                .map(|l| (l as usize).min(self.max_results))
                .unwrap_or(self.max_results);

            let query = parse_query(&raw_query);
            let filter = ctx.user_id.as_deref().map(|uid| ("user_id", uid));
            let rows = store.list("emails", filter, usize::MAX).await?;

            let matched: Vec<Row> = rows.into_iter().filter(|r| matches(&query, r)).collect();
            let total = matched.len();
            let messages: Vec<Row> = matched.into_iter().take(limit).collect();

            Ok(ToolResult::success(
                json!({ "messages": messages, "total": total }).to_string(),
            ))
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}
