use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dealflow_core::config::ExecutorConfig;
use dealflow_core::error::{DealflowError, Result};
use dealflow_core::event::EventBus;
use dealflow_core::traits::{AuditSink, PersistenceStore, ReasoningBackend};
use dealflow_core::types::{
    BackendOutput, PlanEvent, ResolvedInput, RunId, StepFailure, StepFailureKind, StepResult,
    ToolContext,
};

use super::step::{Plan, Step, StepKind, StepRef};
use crate::repair::repair;

const SUMMARY_MAX_CHARS: usize = 200;

/// Per-run settings supplied by the caller.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: RunId,
    /// Offer each completed step to the audit sink.
    pub audit: bool,
    pub cancel: CancellationToken,
    /// Owner of the data tool steps act on.
    pub user_id: Option<String>,
    pub store: Option<Arc<dyn PersistenceStore>>,
}

impl RunContext {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            audit: false,
            cancel: CancellationToken::new(),
            user_id: None,
            store: None,
        }
    }

    pub fn with_audit(mut self, audit: bool) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_store(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.store = Some(store);
        self
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("audit", &self.audit)
            .field("user_id", &self.user_id)
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(RunId::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// The record of one execution. Never mutated after it is returned.
#[derive(Debug, Clone)]
pub struct PlanRun {
    pub plan: Arc<Plan>,
    pub run_id: RunId,
    pub bound_inputs: BTreeMap<String, serde_json::Value>,
    /// Completed steps, in order.
    pub step_results: Vec<StepResult>,
    /// The step that aborted the run, with its error populated.
    pub failed_step: Option<StepResult>,
    /// Repaired output of the final step; `None` when the run failed.
    pub final_value: Option<serde_json::Value>,
    pub final_summary: Option<String>,
    pub status: RunStatus,
    /// Final-output schema violations. Non-empty does not mean failure.
    pub schema_issues: Vec<String>,
    pub elapsed_ms: u64,
}

impl PlanRun {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// The failure that aborted the run, if any.
    pub fn failure(&self) -> Option<(usize, &StepFailure)> {
        let failed = self.failed_step.as_ref()?;
        failed.error.as_ref().map(|e| (failed.step_index, e))
    }

    /// Convert a failed run into the matching error.
    pub fn failure_error(&self, step_timeout_secs: u64) -> Option<DealflowError> {
        self.failure().map(|(step, f)| match f.kind {
            StepFailureKind::Cancelled => DealflowError::Cancelled,
            StepFailureKind::Timeout => DealflowError::BackendTimeout {
                step,
                timeout_secs: step_timeout_secs,
            },
            StepFailureKind::Backend => {
                DealflowError::Backend(format!("step {}: {}", step, f.message))
            }
        })
    }
}

/// Runs plans against a reasoning backend, one step at a time.
pub struct PlanExecutor {
    backend: Arc<dyn ReasoningBackend>,
    config: ExecutorConfig,
    audit_sink: Option<Arc<dyn AuditSink>>,
    event_bus: Option<Arc<EventBus>>,
}

impl PlanExecutor {
    pub fn new(backend: Arc<dyn ReasoningBackend>, config: ExecutorConfig) -> Self {
        Self {
            backend,
            config,
            audit_sink: None,
            event_bus: None,
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn publish(&self, event: PlanEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    /// Execute a plan.
    ///
    /// Returns `Err` only for a missing input binding, before any backend call.
    /// Backend failures, timeouts, and cancellation yield a `Failed` run.
    pub async fn execute(
        &self,
        plan: &Arc<Plan>,
        bound_inputs: BTreeMap<String, serde_json::Value>,
        ctx: RunContext,
    ) -> Result<PlanRun> {
        if let Some(missing) = plan.input_names().find(|n| !bound_inputs.contains_key(*n)) {
            return Err(DealflowError::UnboundInput(missing.to_string()));
        }

        let start = Instant::now();
        let run_id = ctx.run_id.clone();
        info!(run_id = %run_id, plan = %plan.name, steps = plan.steps.len(), "Plan run started");
        self.publish(PlanEvent::RunStarted {
            run_id: run_id.clone(),
            plan: plan.name.clone(),
        });

        let sink = self.audit_sink.as_ref().filter(|_| ctx.audit);
        let mut pending_audits: Vec<JoinHandle<()>> = Vec::new();
        let mut step_results: Vec<StepResult> = Vec::with_capacity(plan.steps.len());
        let mut failed_step: Option<StepResult> = None;

        for step in &plan.steps {
            let action_kind = step.action_kind();
            debug!(run_id = %run_id, step = step.index, kind = %action_kind, "Step started");
            self.publish(PlanEvent::StepStarted {
                run_id: run_id.clone(),
                step_index: step.index,
                action_kind: action_kind.clone(),
            });

            let step_start = Instant::now();
            let outcome = self.run_step(step, &bound_inputs, &step_results, &ctx).await;
            let elapsed_ms = step_start.elapsed().as_millis() as u64;

            match outcome {
                Ok(output) => {
                    let result = StepResult {
                        step_index: step.index,
                        action_kind,
                        raw_output: output.value,
                        summary: output.summary,
                        error: None,
                        elapsed_ms,
                    };
                    self.publish(PlanEvent::StepCompleted {
                        run_id: run_id.clone(),
                        step_index: step.index,
                        summary: result.summary.clone(),
                        output: result.raw_output.clone(),
                        elapsed_ms,
                    });

                    if let Some(sink) = sink {
                        pending_audits.push(spawn_audit(sink.clone(), run_id.clone(), result.clone()));
                    }
                    step_results.push(result);
                }
                Err(failure) => {
                    error!(
                        run_id = %run_id,
                        step = step.index,
                        kind = ?failure.kind,
                        error = %failure.message,
                        "Step failed, aborting run"
                    );
                    self.publish(PlanEvent::StepFailed {
                        run_id: run_id.clone(),
                        step_index: step.index,
                        failure: failure.clone(),
                    });
                    failed_step = Some(StepResult {
                        step_index: step.index,
                        action_kind,
                        raw_output: serde_json::Value::Null,
                        summary: None,
                        error: Some(failure),
                        elapsed_ms,
                    });
                    break;
                }
            }
        }

        // Audit writes overlap later steps but settle before the run is handed back.
        for handle in futures::future::join_all(pending_audits).await {
            if let Err(e) = handle {
                warn!(run_id = %run_id, error = %e, "Audit task did not complete");
            }
        }

        let failed = failed_step.is_some();
        let mut final_value = None;
        let mut final_summary = None;
        let mut schema_issues = Vec::new();

        if !failed {
            if let Some(last) = step_results.last() {
                let repaired = repair(&last.raw_output);
                let validation = plan.final_output_schema.validate(&repaired);
                if !validation.is_valid() {
                    schema_issues = validation.issues().to_vec();
                    warn!(
                        run_id = %run_id,
                        schema = plan.final_output_schema.name(),
                        issues = schema_issues.len(),
                        "Final output does not match schema"
                    );
                    self.publish(PlanEvent::SchemaMismatch {
                        run_id: run_id.clone(),
                        issues: schema_issues.clone(),
                    });
                }
                if plan.summarize {
                    final_summary = last.summary.clone().or_else(|| summarize_value(&repaired));
                }
                final_value = Some(repaired);
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let status = if failed {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };
        info!(
            run_id = %run_id,
            plan = %plan.name,
            status = ?status,
            steps = step_results.len(),
            elapsed_ms,
            "Plan run finished"
        );
        self.publish(PlanEvent::RunComplete {
            run_id: run_id.clone(),
            succeeded: !failed,
            steps: step_results.len(),
            elapsed_ms,
        });

        Ok(PlanRun {
            plan: plan.clone(),
            run_id,
            bound_inputs,
            step_results,
            failed_step,
            final_value,
            final_summary,
            status,
            schema_issues,
            elapsed_ms,
        })
    }

    /// Call the backend for one step under the step timeout, racing cancellation.
    async fn run_step(
        &self,
        step: &Step,
        bound_inputs: &BTreeMap<String, serde_json::Value>,
        prior: &[StepResult],
        ctx: &RunContext,
    ) -> std::result::Result<BackendOutput, StepFailure> {
        let timeout = self.config.step_timeout();
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(StepFailure {
                kind: StepFailureKind::Cancelled,
                message: "run cancelled".into(),
            }),
            result = tokio::time::timeout(timeout, self.dispatch(step, bound_inputs, prior, ctx)) => {
                match result {
                    Ok(outcome) => outcome,
                    Err(_) => Err(StepFailure {
                        kind: StepFailureKind::Timeout,
                        message: format!("backend call exceeded {}s", timeout.as_secs()),
                    }),
                }
            }
        }
    }

    async fn dispatch(
        &self,
        step: &Step,
        bound_inputs: &BTreeMap<String, serde_json::Value>,
        prior: &[StepResult],
        ctx: &RunContext,
    ) -> std::result::Result<BackendOutput, StepFailure> {
        match step.kind {
            StepKind::Reasoning => {
                let inputs = step
                    .references
                    .iter()
                    .map(|r| {
                        resolve(r, bound_inputs, prior).map(|value| ResolvedInput {
                            label: r.label(),
                            value,
                        })
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                self.backend
                    .reason(&step.instructions, &inputs)
                    .await
                    .map_err(failure_from)
            }
            StepKind::ToolInvocation => {
                let tool_name = step.tool_name.as_deref().unwrap_or_default();
                let mut args = serde_json::Map::new();
                for (key, r) in step.tool_args.iter().flatten() {
                    args.insert(key.clone(), resolve(r, bound_inputs, prior)?);
                }
                let tool_ctx = ToolContext {
                    run_id: ctx.run_id.clone(),
                    user_id: ctx.user_id.clone(),
                    store: ctx.store.clone(),
                };
                self.backend
                    .invoke_tool(tool_name, args, tool_ctx)
                    .await
                    .map_err(failure_from)
            }
        }
    }
}

/// Look up a reference among bound inputs and completed steps.
fn resolve(
    r: &StepRef,
    bound_inputs: &BTreeMap<String, serde_json::Value>,
    prior: &[StepResult],
) -> std::result::Result<serde_json::Value, StepFailure> {
    let value = match r {
        StepRef::Input(name) => bound_inputs.get(name),
        StepRef::Step(index) => prior.get(*index).map(|p| &p.raw_output),
    };
    value.cloned().ok_or_else(|| StepFailure {
        kind: StepFailureKind::Backend,
        message: format!("unresolved reference to {}", r),
    })
}

fn spawn_audit(sink: Arc<dyn AuditSink>, run_id: RunId, result: StepResult) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = sink.record(&run_id, &result).await {
            warn!(
                run_id = %run_id,
                step = result.step_index,
                error = %e,
                "Audit write failed"
            );
        }
    })
}

fn failure_from(e: DealflowError) -> StepFailure {
    let kind = match e {
        DealflowError::Cancelled => StepFailureKind::Cancelled,
        DealflowError::BackendTimeout { .. } | DealflowError::ToolTimeout { .. } => {
            StepFailureKind::Timeout
        }
        _ => StepFailureKind::Backend,
    };
    StepFailure {
        kind,
        message: e.to_string(),
    }
}

/// First non-empty line of a textual rendering, capped in length.
pub(crate) fn summarize_value(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => return None,
        other => other.to_string(),
    };
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    Some(truncate_chars(line, SUMMARY_MAX_CHARS))
}

pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &s[..byte_idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use dealflow_test_utils::{FailingSink, RecordedCall, RecordingSink, ScriptedBackend};

    use crate::output_validator::OutputSchema;
    use crate::plan::PlanBuilder;

    fn config(step_timeout_secs: u64) -> ExecutorConfig {
        ExecutorConfig {
            step_timeout_secs,
            ..ExecutorConfig::default()
        }
    }

    fn object_schema() -> OutputSchema {
        OutputSchema::new(
            "object",
            json!({"type": "object", "required": ["done"]}),
        )
        .unwrap()
    }

    /// input `x`; four reasoning steps, each reading the one before.
    fn four_step_plan() -> Arc<Plan> {
        Arc::new(
            PlanBuilder::new("four")
                .input("x", "seed")
                .unwrap()
                .reasoning("s0", [StepRef::input("x")])
                .unwrap()
                .reasoning("s1", [StepRef::step(0)])
                .unwrap()
                .reasoning("s2", [StepRef::step(1), StepRef::input("x")])
                .unwrap()
                .reasoning("s3", [StepRef::step(2)])
                .unwrap()
                .build(object_schema(), true)
                .unwrap(),
        )
    }

    fn inputs() -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([("x".to_string(), json!({"seed": 1}))])
    }

    fn audited() -> RunContext {
        RunContext::new(RunId::from_string("run-1")).with_audit(true)
    }

    #[tokio::test]
    async fn test_unbound_input_makes_no_backend_calls() {
        let backend = Arc::new(ScriptedBackend::with_outputs(vec![json!(1); 4]));
        let executor = PlanExecutor::new(backend.clone(), config(5));

        let err = executor
            .execute(&four_step_plan(), BTreeMap::new(), RunContext::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DealflowError::UnboundInput(name) if name == "x"));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_successful_run_resolves_references_in_order() {
        let backend = Arc::new(ScriptedBackend::with_outputs(vec![
            json!("a"),
            json!("b"),
            json!("c"),
            json!("```json\n{\"done\": true}\n```"),
        ]));
        let sink = Arc::new(RecordingSink::new());
        let executor = PlanExecutor::new(backend.clone(), config(5)).with_audit_sink(sink.clone());

        let run = executor.execute(&four_step_plan(), inputs(), audited()).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.step_results.len(), 4);
        assert_eq!(run.final_value, Some(json!({"done": true})));
        assert!(run.schema_issues.is_empty());
        assert_eq!(run.final_summary.as_deref(), Some("{\"done\":true}"));
        assert_eq!(sink.step_indices().len(), 4);

        let calls = backend.calls();
        match &calls[2] {
            RecordedCall::Reason { instructions, inputs } => {
                assert_eq!(instructions, "s2");
                assert_eq!(inputs[0].label, "step 1 output");
                assert_eq!(inputs[0].value, json!("b"));
                assert_eq!(inputs[1].label, "x");
                assert_eq!(inputs[1].value, json!({"seed": 1}));
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backend_failure_at_step_two_aborts() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .returns(json!("a"))
                .returns(json!("b"))
                .fails("upstream 503")
                .returns(json!({"done": true})),
        );
        let sink = Arc::new(RecordingSink::new());
        let executor = PlanExecutor::new(backend.clone(), config(5)).with_audit_sink(sink.clone());

        let run = executor.execute(&four_step_plan(), inputs(), audited()).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(backend.call_count(), 3);
        assert_eq!(run.step_results.len(), 2);
        assert!(run.step_results.iter().all(|r| r.succeeded()));
        let (step, failure) = run.failure().unwrap();
        assert_eq!(step, 2);
        assert_eq!(failure.kind, StepFailureKind::Backend);
        assert!(failure.message.contains("upstream 503"));
        assert!(run.final_value.is_none());

        let mut recorded = sink.step_indices();
        recorded.sort_unstable();
        assert_eq!(recorded, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_change_outcome() {
        let outputs = vec![json!("a"), json!("b"), json!("c"), json!({"done": true})];
        let sink = Arc::new(FailingSink::new());
        let executor = PlanExecutor::new(Arc::new(ScriptedBackend::with_outputs(outputs.clone())), config(5))
            .with_audit_sink(sink.clone());
        let with_failing = executor.execute(&four_step_plan(), inputs(), audited()).await.unwrap();

        let plain = PlanExecutor::new(Arc::new(ScriptedBackend::with_outputs(outputs)), config(5));
        let without = plain.execute(&four_step_plan(), inputs(), audited()).await.unwrap();

        assert_eq!(with_failing.status, RunStatus::Succeeded);
        assert_eq!(with_failing.status, without.status);
        assert_eq!(with_failing.final_value, without.final_value);
        assert_eq!(sink.attempts(), 4);
    }

    #[tokio::test]
    async fn test_audit_is_opt_in_per_run() {
        let sink = Arc::new(RecordingSink::new());
        let executor = PlanExecutor::new(
            Arc::new(ScriptedBackend::with_outputs(vec![json!(1), json!(2), json!(3), json!({"done": 1})])),
            config(5),
        )
        .with_audit_sink(sink.clone());

        executor
            .execute(&four_step_plan(), inputs(), RunContext::default())
            .await
            .unwrap();
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_audit_writes_settle_before_return() {
        let sink = Arc::new(RecordingSink::with_delay(Duration::from_secs(2)));
        let executor = PlanExecutor::new(
            Arc::new(ScriptedBackend::with_outputs(vec![json!(1), json!(2), json!(3), json!({"done": 1})])),
            config(5),
        )
        .with_audit_sink(sink.clone());

        let run = executor.execute(&four_step_plan(), inputs(), audited()).await.unwrap();
        assert!(run.succeeded());
        assert_eq!(sink.count(), 4);
        assert!(sink.records().iter().all(|(id, _)| id.0 == "run-1"));
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_not_fatal() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let executor = PlanExecutor::new(
            Arc::new(ScriptedBackend::with_outputs(vec![
                json!(1),
                json!(2),
                json!(3),
                json!("Sorry, here is {\"partial\": true}"),
            ])),
            config(5),
        )
        .with_event_bus(bus);

        let run = executor.execute(&four_step_plan(), inputs(), RunContext::default()).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.final_value, Some(json!({"partial": true})));
        assert!(!run.schema_issues.is_empty());

        let mut saw_mismatch = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, PlanEvent::SchemaMismatch { .. }) {
                saw_mismatch = true;
            }
        }
        assert!(saw_mismatch);
    }

    #[tokio::test]
    async fn test_unparseable_final_output_kept_raw() {
        let executor = PlanExecutor::new(
            Arc::new(ScriptedBackend::with_outputs(vec![
                json!(1),
                json!(2),
                json!(3),
                json!("not json at all"),
            ])),
            config(5),
        );
        let run = executor.execute(&four_step_plan(), inputs(), RunContext::default()).await.unwrap();
        assert!(run.succeeded());
        assert_eq!(run.final_value, Some(json!("not json at all")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_fails_run() {
        let backend = Arc::new(ScriptedBackend::new().returns(json!("a")).hangs());
        let sink = Arc::new(RecordingSink::new());
        let executor = PlanExecutor::new(backend.clone(), config(3)).with_audit_sink(sink.clone());

        let run = executor.execute(&four_step_plan(), inputs(), audited()).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        let (step, failure) = run.failure().unwrap();
        assert_eq!(step, 1);
        assert_eq!(failure.kind, StepFailureKind::Timeout);
        assert_eq!(backend.call_count(), 2);
        assert_eq!(run.step_results.len(), 1);
        assert_eq!(sink.count(), 1);
        assert!(matches!(
            run.failure_error(3),
            Some(DealflowError::BackendTimeout { step: 1, timeout_secs: 3 })
        ));
    }

    #[tokio::test]
    async fn test_cancellation_propagates_to_in_flight_call() {
        let backend = Arc::new(ScriptedBackend::new().returns(json!("a")).hangs());
        let executor = PlanExecutor::new(backend, config(600));
        let cancel = CancellationToken::new();
        let ctx = RunContext::default().with_cancel(cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let run = executor.execute(&four_step_plan(), inputs(), ctx).await.unwrap();
        canceller.await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failure().unwrap().1.kind, StepFailureKind::Cancelled);
        assert!(matches!(run.failure_error(600), Some(DealflowError::Cancelled)));
    }

    #[tokio::test]
    async fn test_tool_step_receives_resolved_args_and_context() {
        let plan = Arc::new(
            PlanBuilder::new("tool")
                .input("context", "profile")
                .unwrap()
                .reasoning("derive query", [StepRef::input("context")])
                .unwrap()
                .tool("search", "mail_search", [("query", StepRef::step(0))])
                .unwrap()
                .build(OutputSchema::new("any", json!({})).unwrap(), false)
                .unwrap(),
        );
        let backend = Arc::new(ScriptedBackend::with_outputs(vec![
            json!("collab"),
            json!({"messages": [], "total": 0}),
        ]));
        let executor = PlanExecutor::new(backend.clone(), config(5));

        let run = executor
            .execute(
                &plan,
                BTreeMap::from([("context".to_string(), json!({"niche": "tech"}))]),
                RunContext::default().with_user("u1"),
            )
            .await
            .unwrap();

        assert!(run.succeeded());
        assert!(run.final_summary.is_none());
        assert_eq!(run.step_results[1].action_kind, "tool:mail_search");
        match &backend.calls()[1] {
            RecordedCall::Tool { name, args, user_id } => {
                assert_eq!(name, "mail_search");
                assert_eq!(args["query"], json!("collab"));
                assert_eq!(user_id.as_deref(), Some("u1"));
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_runs_share_plan_and_sink() {
        let plan = four_step_plan();
        let sink = Arc::new(RecordingSink::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let plan = plan.clone();
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                let backend = Arc::new(ScriptedBackend::with_outputs(vec![
                    json!(i),
                    json!(i),
                    json!(i),
                    json!({"done": i}),
                ]));
                let executor = PlanExecutor::new(backend, config(5)).with_audit_sink(sink);
                executor
                    .execute(&plan, inputs(), RunContext::new(RunId::from_string(&format!("r{i}"))).with_audit(true))
                    .await
                    .unwrap()
            }));
        }
        for (i, h) in handles.into_iter().enumerate() {
            let run = h.await.unwrap();
            assert_eq!(run.final_value, Some(json!({"done": i})));
        }
        assert_eq!(sink.count(), 32);
    }

    #[test]
    fn test_summarize_value() {
        assert_eq!(summarize_value(&json!("\n  Parsed offer from Acme\nmore")).as_deref(), Some("Parsed offer from Acme"));
        assert!(summarize_value(&json!(null)).is_none());
        let long = "x".repeat(300);
        assert_eq!(summarize_value(&json!(long)).unwrap().chars().count(), 203);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll...");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
