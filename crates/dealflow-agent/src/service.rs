use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dealflow_core::config::LogConfig;
use dealflow_core::error::{DealflowError, Result};
use dealflow_core::event::EventBus;
use dealflow_core::traits::PersistenceStore;
use dealflow_core::types::{Row, RunId};

use crate::plan::{Plan, PlanExecutor, PlanRun, RunContext};
use crate::run_log::RunLogger;
use crate::workflows::Workflows;

pub const PROFILES_TABLE: &str = "profiles";
pub const EMAILS_TABLE: &str = "emails";
pub const MESSAGES_TABLE: &str = "messages";

/// Success payload returned to callers: the final value plus its summary.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub value: Value,
    pub summary: Option<String>,
}

impl Envelope {
    fn from_run(run: PlanRun) -> Self {
        Self {
            value: run.final_value.unwrap_or(Value::Null),
            summary: run.final_summary,
        }
    }
}

/// Binds stored rows to the workflows, runs them, and persists the results.
pub struct CollabService {
    executor: Arc<PlanExecutor>,
    store: Arc<dyn PersistenceStore>,
    workflows: Workflows,
    run_log: Option<(Arc<EventBus>, LogConfig)>,
}

impl CollabService {
    pub fn new(executor: Arc<PlanExecutor>, store: Arc<dyn PersistenceStore>, workflows: Workflows) -> Self {
        Self {
            executor,
            store,
            workflows,
            run_log: None,
        }
    }

    /// Write a JSONL log per run. `bus` must be the executor's event bus.
    pub fn with_run_log(mut self, bus: Arc<EventBus>, config: LogConfig) -> Self {
        if config.enabled {
            self.run_log = Some((bus, config));
        }
        self
    }

    pub fn workflows(&self) -> &Workflows {
        &self.workflows
    }

    pub fn store(&self) -> &Arc<dyn PersistenceStore> {
        &self.store
    }

    /// Search the user's ingested mailbox and upsert the collaboration emails found.
    pub async fn search_emails(&self, user_id: &str, cancel: CancellationToken) -> Result<Envelope> {
        let profile = self
            .store
            .get(PROFILES_TABLE, user_id)
            .await?
            .ok_or_else(|| DealflowError::NotFound(format!("profile for user {}", user_id)))?;

        let mut inputs = BTreeMap::new();
        inputs.insert("context".to_string(), Value::Object(profile));

        let audit = self.executor.config().audit_search;
        let ctx = self.context(RunId::new(), user_id, audit, cancel);
        let run = self.succeeded(self.run(&self.workflows.search, inputs, ctx).await?)?;

        let emails = self
            .merge_into_mailbox(tagged_emails(run.final_value.as_ref(), user_id), user_id)
            .await?;
        if emails.is_empty() {
            warn!(user_id, "Search produced no storable emails");
        } else {
            let count = emails.len();
            self.store.upsert(EMAILS_TABLE, emails, "email_id").await?;
            info!(user_id, count, "Stored collaboration emails");
        }

        Ok(Envelope::from_run(run))
    }

    /// Analyze one stored email against the user's preferences.
    ///
    /// The run id doubles as the id of the `messages` row holding the result.
    pub async fn analyze_email(
        &self,
        user_id: &str,
        email_id: &str,
        cancel: CancellationToken,
    ) -> Result<Envelope> {
        let email = self
            .store
            .get(EMAILS_TABLE, email_id)
            .await?
            .filter(|row| owned_by(row, user_id))
            .ok_or_else(|| DealflowError::NotFound(format!("email {}", email_id)))?;

        let preferences = self
            .store
            .get(PROFILES_TABLE, user_id)
            .await?
            .and_then(|mut profile| profile.remove("preferences"))
            .unwrap_or_else(|| json!({}));

        let mut inputs = BTreeMap::new();
        inputs.insert("email_data".to_string(), Value::Object(email));
        inputs.insert("user_preferences".to_string(), preferences);

        let message_id = RunId::new();
        let audit = self.executor.config().audit_analysis;
        let ctx = self.context(message_id.clone(), user_id, audit, cancel);
        let run = self.run(&self.workflows.analyze, inputs, ctx).await?;

        let status = if run.succeeded() { "succeeded" } else { "failed" };
        let message = json!({
            "id": message_id.0,
            "user_id": user_id,
            "email_id": email_id,
            "status": status,
            "value": run.final_value,
            "summary": run.final_summary,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });
        if let Value::Object(row) = message {
            self.store.insert(MESSAGES_TABLE, row).await?;
        }

        Ok(Envelope::from_run(self.succeeded(run)?))
    }

    pub async fn list_emails(&self, user_id: &str, limit: usize) -> Result<Vec<Row>> {
        self.store
            .list(EMAILS_TABLE, Some(("user_id", user_id)), limit)
            .await
    }

    /// Replace the user's profile. `user_id` always comes from the caller's identity.
    pub async fn upsert_profile(&self, user_id: &str, profile: Value) -> Result<Row> {
        let Value::Object(mut row) = profile else {
            return Err(DealflowError::ToolValidation("profile must be a JSON object".into()));
        };
        row.insert("user_id".into(), json!(user_id));
        self.store
            .upsert(PROFILES_TABLE, vec![row.clone()], "user_id")
            .await?;
        Ok(row)
    }

    /// Layer search summaries over the stored rows they describe.
    ///
    /// Rows owned by another user are left untouched; fields the summary
    /// omits (such as `body`) keep their ingested values.
    async fn merge_into_mailbox(&self, emails: Vec<Row>, user_id: &str) -> Result<Vec<Row>> {
        let mut merged = Vec::with_capacity(emails.len());
        for summary in emails {
            let Some(email_id) = email_key(&summary) else {
                continue;
            };
            match self.store.get(EMAILS_TABLE, &email_id).await? {
                Some(existing) if !owned_by(&existing, user_id) => {
                    warn!(user_id, email_id = %email_id, "Search result names another user's email, skipped");
                }
                Some(mut existing) => {
                    existing.extend(summary);
                    merged.push(existing);
                }
                None => merged.push(summary),
            }
        }
        Ok(merged)
    }

    fn context(&self, run_id: RunId, user_id: &str, audit: bool, cancel: CancellationToken) -> RunContext {
        RunContext::new(run_id)
            .with_audit(audit)
            .with_cancel(cancel)
            .with_user(user_id)
            .with_store(self.store.clone())
    }

    /// Execute with optional run logging.
    async fn run(
        &self,
        plan: &Arc<Plan>,
        inputs: BTreeMap<String, Value>,
        ctx: RunContext,
    ) -> Result<PlanRun> {
        let log_cancel = CancellationToken::new();
        let logger = self.spawn_run_log(&ctx.run_id, log_cancel.clone());

        let result = self.executor.execute(plan, inputs, ctx).await;
        if let Some(handle) = logger {
            // Every event of this run is already on the bus; the logger drains and stops.
            log_cancel.cancel();
            handle.await.ok();
        }

        result
    }

    /// A failed run becomes the matching error.
    fn succeeded(&self, run: PlanRun) -> Result<PlanRun> {
        match run.failure_error(self.executor.config().step_timeout_secs) {
            Some(e) => Err(e),
            None => Ok(run),
        }
    }

    fn spawn_run_log(&self, run_id: &RunId, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let (bus, config) = self.run_log.as_ref()?;
        let logger = RunLogger::new(config.log_dir(), config.level);
        Some(tokio::spawn(logger.run(bus.subscribe(), run_id.clone(), cancel)))
    }
}

fn owned_by(row: &Row, user_id: &str) -> bool {
    match row.get("user_id").and_then(|u| u.as_str()) {
        Some(owner) => owner == user_id,
        None => true,
    }
}

fn email_key(row: &Row) -> Option<String> {
    match row.get("email_id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Email objects from a search result, tagged with their owner.
fn tagged_emails(value: Option<&Value>, user_id: &str) -> Vec<Row> {
    let Some(emails) = value.and_then(|v| v.get("emails")).and_then(|e| e.as_array()) else {
        return Vec::new();
    };
    emails
        .iter()
        .filter_map(|e| e.as_object())
        .filter(|e| email_key(e).is_some())
        .map(|e| {
            let mut row = e.clone();
            row.insert("user_id".into(), json!(user_id));
            row
        })
        .collect()
}
