//! Full pipelines: LLM-backed reasoning, real tools, SQLite persistence.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use dealflow_agent::{AgentBackend, CollabService, PlanExecutor, StoreAuditSink, Workflows};
use dealflow_core::config::{ExecutorConfig, ModelConfig, ToolsConfig};
use dealflow_core::error::Result;
use dealflow_core::traits::{LlmClient, PersistenceStore};
use dealflow_core::types::{ChatMessage, StopReason, StreamDelta};
use dealflow_memory::SqliteStore;
use dealflow_test_utils::{fixtures, FailingSink};
use dealflow_tools::ToolRegistry;

/// Replies with queued texts, one per chat request, and keeps every prompt.
struct QueuedLlm {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl QueuedLlm {
    fn new(replies: impl IntoIterator<Item = String>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl LlmClient for QueuedLlm {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        if let Some(last) = messages.last() {
            self.prompts.lock().unwrap().push(last.text.clone());
        }
        let reply = self.replies.lock().unwrap().pop_front().unwrap_or_default();
        let deltas = vec![
            Ok(StreamDelta::TextDelta(reply)),
            Ok(StreamDelta::Stop(StopReason::EndTurn)),
        ];
        Box::pin(async move { Ok(Box::pin(futures::stream::iter(deltas)) as BoxStream<'_, _>) })
    }
}

fn model() -> ModelConfig {
    ModelConfig {
        provider: "gemini".into(),
        model_id: "gemini-2.0-flash".into(),
        api_key: None,
        base_url: None,
        max_tokens: 1024,
        temperature: 0.0,
        retry: None,
    }
}

fn fenced(value: &Value) -> String {
    format!("Result below.\n```json\n{}\n```", serde_json::to_string_pretty(value).unwrap())
}

fn service(llm: Arc<QueuedLlm>, store: Arc<dyn PersistenceStore>) -> CollabService {
    let tools = Arc::new(ToolRegistry::with_builtins(&ToolsConfig::default()));
    let backend = Arc::new(AgentBackend::new(llm, model(), tools));
    let executor = PlanExecutor::new(backend, ExecutorConfig::default())
        .with_audit_sink(Arc::new(StoreAuditSink::new(store.clone())));
    CollabService::new(Arc::new(executor), store, Workflows::new().unwrap())
}

async fn seed(store: &Arc<dyn PersistenceStore>, table: &str, key: &str, rows: Vec<Value>) {
    let rows = rows.into_iter().filter_map(|r| r.as_object().cloned()).collect();
    store.upsert(table, rows, key).await.unwrap();
}

fn sqlite(dir: &tempfile::TempDir) -> Arc<dyn PersistenceStore> {
    Arc::new(SqliteStore::open(&dir.path().join("dealflow.db")).unwrap())
}

#[tokio::test]
async fn test_search_runs_mail_search_over_stored_mailbox() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite(&dir);
    seed(&store, "profiles", "user_id", vec![fixtures::profile("u1")]).await;
    seed(
        &store,
        "emails",
        "email_id",
        vec![
            fixtures::stored_email("u1", "inbox-1"),
            json!({"email_id": "inbox-2", "user_id": "u1", "subject": "Your weekly digest", "snippet": "Top stories"}),
            json!({"email_id": "inbox-3", "user_id": "u2", "subject": "Sponsorship for u2", "snippet": "Not yours"}),
        ],
    )
    .await;

    let llm = QueuedLlm::new([
        "sponsor OR collaboration".to_string(),
        fenced(&fixtures::filtered_pair()),
        fenced(&fixtures::search_result()),
    ]);
    let service = service(llm.clone(), store.clone());

    let envelope = service
        .search_emails("u1", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(envelope.value["summary"]["total_found"], 2);

    // The filter step saw only the caller's matching mail.
    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[1].contains("inbox-1"));
    assert!(!prompts[1].contains("inbox-2"));
    assert!(!prompts[1].contains("inbox-3"));
    assert!(prompts[1].contains("### context"));

    // Returned emails are stored for the caller; search is not audited.
    let emails = service.list_emails("u1", 50).await.unwrap();
    assert!(emails.iter().any(|e| e["email_id"] == "m1"));
    assert!(emails.iter().any(|e| e["email_id"] == "m2"));
    assert!(store.list("actions", None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_analysis_schedules_follow_up_and_audits_every_step() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite(&dir);
    seed(&store, "profiles", "user_id", vec![fixtures::profile("u1")]).await;
    seed(&store, "emails", "email_id", vec![fixtures::stored_email("u1", "e1")]).await;

    let llm = QueuedLlm::new([
        fenced(&fixtures::parsed_email()),
        fenced(&fixtures::analysis()),
        fenced(&fixtures::decision("reject")),
        fenced(&json!({"suggested_reply": {"subject": "Re: Acme", "body": "Thanks, but no."}})),
        fenced(&fixtures::analysis_result("reject")),
    ]);
    let service = service(llm.clone(), store.clone());

    let envelope = service
        .analyze_email("u1", "e1", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(envelope.value["next_action"], "reject");
    assert!(envelope.value.get("temporary_contract_draft").is_none());
    assert!(envelope.value["suggested_reply"].is_object());

    // Preferences, not the whole profile, reach the matching step.
    let prompts = llm.prompts();
    assert!(prompts[1].contains("### user_preferences"));
    assert!(prompts[1].contains("min_comp"));

    let events = store.list("calendar_events", Some(("user_id", "u1")), 10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["title"], "Follow up: Paid collaboration: Acme keyboards");
    assert_eq!(events[0]["email_id"], "e1");

    let messages = store.list("messages", Some(("email_id", "e1")), 10).await.unwrap();
    assert_eq!(messages.len(), 1);
    let run_id = messages[0]["id"].as_str().unwrap().to_string();

    let actions = store.list("actions", Some(("run_id", &run_id)), 10).await.unwrap();
    assert_eq!(actions.len(), 6);
    assert!(actions.iter().any(|a| a["kind"] == "tool:calendar_schedule"));
    let ids: HashSet<&str> = actions.iter().filter_map(|a| a["action_id"].as_str()).collect();
    assert_eq!(ids.len(), 6);
}

#[tokio::test]
async fn test_audit_failure_leaves_run_untouched() {
    let store: Arc<dyn PersistenceStore> = Arc::new(dealflow_memory::MemoryStore::new());
    seed(&store, "emails", "email_id", vec![fixtures::stored_email("u1", "e1")]).await;

    let backend = Arc::new(dealflow_test_utils::ScriptedBackend::with_outputs(
        fixtures::analysis_script("need_clarification"),
    ));
    let sink = Arc::new(FailingSink::new());
    let executor =
        PlanExecutor::new(backend, ExecutorConfig::default()).with_audit_sink(sink.clone());
    let service = CollabService::new(Arc::new(executor), store, Workflows::new().unwrap());

    let envelope = service
        .analyze_email("u1", "e1", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(envelope.value, fixtures::analysis_result("need_clarification"));
    assert_eq!(sink.attempts(), 6);
}

#[tokio::test]
async fn test_cancelled_run_reports_cancellation() {
    let store: Arc<dyn PersistenceStore> = Arc::new(dealflow_memory::MemoryStore::new());
    seed(&store, "profiles", "user_id", vec![fixtures::profile("u1")]).await;

    let backend = Arc::new(dealflow_test_utils::ScriptedBackend::new().hangs());
    let executor = PlanExecutor::new(backend, ExecutorConfig::default());
    let service = CollabService::new(Arc::new(executor), store, Workflows::new().unwrap());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = service.search_emails("u1", cancel).await.unwrap_err();
    assert!(matches!(err, dealflow_core::error::DealflowError::Cancelled));
}
