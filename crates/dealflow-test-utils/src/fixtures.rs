//! Backend replies and stored rows for the two collaboration workflows.

use serde_json::{json, Value};

pub fn profile(user_id: &str) -> Value {
    json!({
        "user_id": user_id,
        "niche": "tech",
        "audience": "developers",
        "preferences": {
            "tone": "friendly",
            "min_comp": 1500,
            "allowed_exclusivity": "none",
            "timeline_limits": "4 weeks",
            "deliverable_format": ["video", "short"]
        }
    })
}

pub fn stored_email(user_id: &str, email_id: &str) -> Value {
    json!({
        "email_id": email_id,
        "user_id": user_id,
        "from_name": "Dana Reyes",
        "from_email": "dana@acme.io",
        "subject": "Paid collaboration: Acme keyboards",
        "snippet": "We'd like to sponsor a dedicated video on your channel.",
        "received_at": "2026-10-01T09:30:00Z",
        "thread_link": "https://mail.example.com/t/abc123",
        "labels": ["brand", "sponsored"]
    })
}

fn email_item(id: &str, sender: &str, labels: &[&str], score: f64) -> Value {
    json!({
        "email_id": id,
        "from_name": sender,
        "from_email": format!("{}@brand.example", sender.to_lowercase()),
        "subject": format!("Collaboration with {}", sender),
        "snippet": "We'd love to partner with you on an upcoming launch.",
        "received_at": "2026-10-01T09:30:00Z",
        "thread_link": format!("https://mail.example.com/t/{}", id),
        "labels": labels,
        "relevance_score": score,
        "confidence": 0.9,
        "first_received": "2026-10-01T09:30:00Z",
        "last_received": "2026-10-02T11:00:00Z",
        "ui_actions": ["start_colab_process"]
    })
}

pub fn search_query() -> Value {
    json!("collaboration OR sponsorship OR partnership")
}

pub fn raw_messages() -> Value {
    json!({
        "messages": [
            {"email_id": "m1", "from_name": "Acme", "subject": "Collaboration with Acme", "snippet": "Sponsored video?"},
            {"email_id": "m2", "from_name": "Globex", "subject": "Collaboration with Globex", "snippet": "Partnership idea"}
        ],
        "total": 2
    })
}

pub fn filtered_pair() -> Value {
    json!([
        {"email_id": "m1", "intent": "sponsorship"},
        {"email_id": "m2", "intent": "partnership"}
    ])
}

/// Two summaries that share the `brand` label.
pub fn search_result() -> Value {
    json!({
        "emails": [
            email_item("m1", "Acme", &["brand", "sponsored"], 0.92),
            email_item("m2", "Globex", &["brand"], 0.81)
        ],
        "summary": {
            "total_found": 2,
            "by_label": {"brand": 2, "sponsored": 1},
            "top_senders": [
                {"email": "acme@brand.example", "count": 1},
                {"email": "globex@brand.example", "count": 1}
            ]
        }
    })
}

/// Replies for the four search steps, in order.
pub fn search_script() -> Vec<Value> {
    vec![search_query(), raw_messages(), filtered_pair(), search_result()]
}

pub fn parsed_email() -> Value {
    json!({
        "sender": "Dana Reyes",
        "sender_email": "dana@acme.io",
        "brand": "Acme",
        "subject": "Paid collaboration: Acme keyboards",
        "offer_summary": "One dedicated video reviewing the Acme K2 keyboard",
        "proposed_deliverables": ["1 dedicated video"],
        "compensation_terms": "$500 flat",
        "exclusivity": "90 days category exclusivity",
        "deadlines": "2026-10-20",
        "attachments": [],
        "thread_link": "https://mail.example.com/t/abc123",
        "received_at": "2026-10-01T09:30:00Z"
    })
}

pub fn analysis() -> Value {
    json!({
        "fit": "low",
        "relevance_notes": "Compensation below minimum; exclusivity not allowed.",
        "missing_info": [],
        "risk_flags": ["below_min_comp", "exclusivity"]
    })
}

pub fn decision(next_action: &str) -> Value {
    json!({"next_action": next_action, "confidence_score": 0.86})
}

pub fn calendar_event() -> Value {
    json!({"id": "evt-1", "title": "Follow up: Paid collaboration: Acme keyboards"})
}

/// A schema-conformant analysis result for the given branch.
pub fn analysis_result(next_action: &str) -> Value {
    let mut value = json!({
        "email_parsed": parsed_email(),
        "analysis": analysis(),
        "next_action": next_action,
        "confidence_score": 0.86,
        "rationale": "Decision follows from preference fit.",
        "suggested_reply": {
            "subject": "Re: Paid collaboration: Acme keyboards",
            "body": "Hi Dana, thanks for reaching out."
        },
        "autonomous_actions": ["calendar_schedule"],
        "assumptions": ["Creator preferences are current"],
        "next_steps": ["Review the drafted reply"]
    });

    let extra = match next_action {
        "ready_to_proceed" => json!({
            "temporary_contract_draft": {
                "summary_terms": "One dedicated video",
                "payment_terms": "$2000 net 15"
            },
            "ui_actions": ["preview_contract", "send_contract_and_email", "save_draft", "schedule_meeting", "edit_terms"]
        }),
        "need_clarification" => json!({
            "clarifying_questions": ["What is the budget?"],
            "ui_actions": ["send_questions", "save_draft", "escalate_to_human"]
        }),
        _ => json!({"ui_actions": ["send_decline", "save_note"]}),
    };
    if let (Some(obj), Value::Object(extra)) = (value.as_object_mut(), extra) {
        obj.extend(extra);
    }
    value
}

/// Replies for the six analysis steps, in order. The final reply is fenced text.
pub fn analysis_script(next_action: &str) -> Vec<Value> {
    let drafted = json!({"suggested_reply": analysis_result(next_action)["suggested_reply"].clone()});
    vec![
        parsed_email(),
        analysis(),
        decision(next_action),
        calendar_event(),
        drafted,
        Value::String(format!(
            "Here is the result:\n```json\n{}\n```",
            analysis_result(next_action)
        )),
    ]
}
