//! Analyze-Collaboration-Email: parse, match, decide, schedule, draft, assemble.
//!
//! The three outcomes are drafted by one step whose instructions spell out every
//! branch. The executor has no conditional edge; the final schema ties each
//! `next_action` to the optional fields it must (or must not) carry.

use serde_json::{json, Value};

use dealflow_core::error::Result;

use crate::output_validator::OutputSchema;
use crate::plan::{Plan, PlanBuilder, StepRef};

pub const PLAN_NAME: &str = "analyze_collaboration_email";

pub const NEXT_ACTIONS: [&str; 3] = ["ready_to_proceed", "need_clarification", "reject"];

const PARSE: &str = "\
Parse the selected collaboration email into a JSON object `email_parsed` with keys: \
sender, sender_email, brand, subject, offer_summary, proposed_deliverables, \
compensation_terms, exclusivity, deadlines, attachments, thread_link, received_at. \
Use null for anything the email does not state. Reply with the JSON object only.";

const MATCH: &str = "\
Compare the parsed offer with the creator's preferences (tone, min_comp, \
allowed_exclusivity, timeline_limits, deliverable_format). Reply with a JSON object \
`analysis`: {\"fit\": \"high\" | \"medium\" | \"low\", \"relevance_notes\": string, \
\"missing_info\": [string], \"risk_flags\": [string]}.";

const DECIDE: &str = "\
Based on the analysis choose exactly one next action:
- ready_to_proceed: the offer fits and a contract can be prepared.
- need_clarification: the offer may fit but information is missing or ambiguous.
- reject: the offer does not fit.
Reply with a JSON object {\"next_action\": ..., \"confidence_score\": 0-1, \
\"rationale\": string, \"next_steps\": [string]}.";

const SCHEDULE: &str = "Schedule a follow-up calendar event for the selected email.";

const DRAFT: &str = "\
Draft the outputs for the chosen next action. Follow only the branch that matches \
`next_action`.

ready_to_proceed:
- `temporary_contract_draft` with summary_terms, payment_terms, deliverables, \
milestones, timeline, acceptance_criteria and basic clauses (IP, termination, \
exclusivity). Keep it creator-friendly and editable.
- `suggested_reply` {subject, body} that embeds the contract, lists next steps and \
offers points for negotiation.
- `ui_actions`: [\"preview_contract\", \"send_contract_and_email\", \"save_draft\", \
\"schedule_meeting\", \"edit_terms\"].

need_clarification:
- `clarifying_questions` targeting the missing or ambiguous fields.
- `suggested_reply` {subject, body} asking for the clarifications.
- `ui_actions`: [\"send_questions\", \"save_draft\", \"escalate_to_human\"].

reject:
- `suggested_reply` {subject, body}: a concise, polite decline that explains the \
reasons and may offer alternatives. Do not draft a contract.
- `ui_actions`: [\"send_decline\", \"save_note\"].

Never commit the creator to anything requiring payment or a signature. Reply with \
a JSON object holding only the fields for the chosen branch.";

const ASSEMBLE: &str = "\
Assemble the final result as one JSON object with keys: email_parsed, analysis, \
next_action, confidence_score, rationale, suggested_reply, temporary_contract_draft \
(ready_to_proceed only), clarifying_questions (need_clarification only), ui_actions, \
autonomous_actions (the side tasks already performed, such as the scheduled \
follow-up), assumptions, next_steps. Omit keys that do not apply to the chosen \
action. Reply with the JSON object only.";

fn string_list() -> Value {
    json!({ "type": "array", "items": { "type": "string" } })
}

fn when_action(action: &str, then: Value) -> Value {
    json!({
        "if": {
            "properties": { "next_action": { "const": action } },
            "required": ["next_action"]
        },
        "then": then
    })
}

pub fn result_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "CollaborationAnalysis",
        "type": "object",
        "required": [
            "email_parsed", "analysis", "next_action", "confidence_score",
            "suggested_reply", "autonomous_actions", "assumptions", "next_steps"
        ],
        "properties": {
            "email_parsed": { "type": "object" },
            "analysis": {
                "type": "object",
                "required": ["fit", "missing_info", "risk_flags"],
                "properties": {
                    "fit": { "enum": ["high", "medium", "low"] },
                    "relevance_notes": { "type": "string" },
                    "missing_info": string_list(),
                    "risk_flags": string_list()
                }
            },
            "next_action": { "enum": NEXT_ACTIONS },
            "confidence_score": { "type": "number", "minimum": 0, "maximum": 1 },
            "rationale": { "type": "string" },
            "suggested_reply": {
                "type": "object",
                "required": ["subject", "body"],
                "properties": {
                    "subject": { "type": "string" },
                    "body": { "type": "string" }
                }
            },
            "temporary_contract_draft": { "type": "object" },
            "clarifying_questions": string_list(),
            "ui_actions": string_list(),
            "autonomous_actions": { "type": "array" },
            "assumptions": string_list(),
            "next_steps": string_list()
        },
        "allOf": [
            when_action("ready_to_proceed", json!({ "required": ["temporary_contract_draft"] })),
            when_action("need_clarification", json!({ "required": ["clarifying_questions"] })),
            when_action("reject", json!({ "not": { "required": ["temporary_contract_draft"] } }))
        ]
    })
}

pub fn build() -> Result<Plan> {
    let email = StepRef::input("email_data");
    let prefs = StepRef::input("user_preferences");
    PlanBuilder::new(PLAN_NAME)
        .input("email_data", "The selected email row")?
        .input("user_preferences", "The creator's stored preferences")?
        .reasoning(PARSE, [email.clone()])?
        .reasoning(MATCH, [StepRef::step(0), prefs])?
        .reasoning(DECIDE, [StepRef::step(0), StepRef::step(1)])?
        .tool(
            SCHEDULE,
            "calendar_schedule",
            [("title", StepRef::step(0)), ("email_id", email)],
        )?
        .reasoning(
            DRAFT,
            [StepRef::step(0), StepRef::step(1), StepRef::step(2), StepRef::step(3)],
        )?
        .reasoning(ASSEMBLE, (0..5).map(StepRef::step))?
        .build(OutputSchema::new("collaboration_analysis", result_schema())?, true)
}
