use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use dealflow_core::types::{PlanEvent, RunId};

use crate::plan::executor::truncate_chars;

/// JSONL run logger.
///
/// Subscribes to the EventBus and appends one JSON object per line for a
/// single run to `{log_dir}/{run_id}/{timestamp}.jsonl`. Lines already
/// written survive a crash mid-run.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// `level` controls verbosity: 1=run summary, 2=step boundaries, 3=step output previews.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Write entries for `run_id` until its RunComplete or cancellation.
    ///
    /// Take the receiver from `EventBus::subscribe` before the run starts so
    /// that no early event is missed.
    pub async fn run(
        self,
        mut rx: broadcast::Receiver<PlanEvent>,
        run_id: RunId,
        cancel: CancellationToken,
    ) {
        let run_dir = self.log_dir.join(&run_id.0);
        if let Err(e) = tokio::fs::create_dir_all(&run_dir).await {
            error!(error = %e, "Failed to create log directory");
            return;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = run_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");
        let mut writer = BufWriter::new(file);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.drain(&mut rx, &run_id, &mut writer).await;
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if self.write_event(&mut writer, &event, &run_id).await {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
    }

    /// Write whatever is still buffered for this run without waiting for more.
    async fn drain(
        &self,
        rx: &mut broadcast::Receiver<PlanEvent>,
        run_id: &RunId,
        writer: &mut BufWriter<File>,
    ) {
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    if self.write_event(writer, &event, run_id).await {
                        return;
                    }
                }
                Err(TryRecvError::Lagged(n)) => {
                    debug!(skipped = n, "RunLogger lagged while draining");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return,
            }
        }
    }

    /// Append `event` if it belongs to `run_id`. Returns true once logging is done.
    async fn write_event(&self, writer: &mut BufWriter<File>, event: &PlanEvent, run_id: &RunId) -> bool {
        if event_run_id(event) != run_id {
            return false;
        }
        if let Some(entry) = self.event_to_entry(event) {
            if let Ok(json) = serde_json::to_string(&entry) {
                let line = format!("{}\n", json);
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    error!(error = %e, "Failed to write log entry");
                    return true;
                }
                if let Err(e) = writer.flush().await {
                    error!(error = %e, "Failed to flush log");
                }
            }
        }
        matches!(event, PlanEvent::RunComplete { .. })
    }

    /// Convert a PlanEvent to a log entry (None if filtered by level).
    fn event_to_entry(&self, event: &PlanEvent) -> Option<LogEntry> {
        let entry = |event_type: &str, step: Option<usize>, detail: Option<serde_json::Value>| LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id: event_run_id(event).0.clone(),
            event_type: event_type.to_string(),
            step,
            detail,
        };

        match event {
            // L1: run summary, failures, and schema mismatches
            PlanEvent::RunStarted { plan, .. } => {
                Some(entry("run_started", None, Some(serde_json::json!({ "plan": plan }))))
            }
            PlanEvent::RunComplete {
                succeeded,
                steps,
                elapsed_ms,
                ..
            } => Some(entry(
                "run_complete",
                None,
                Some(serde_json::json!({
                    "succeeded": succeeded,
                    "steps": steps,
                    "elapsed_ms": elapsed_ms,
                })),
            )),
            PlanEvent::StepFailed {
                step_index, failure, ..
            } => Some(entry(
                "step_failed",
                Some(*step_index),
                Some(serde_json::json!({ "kind": failure.kind, "message": failure.message })),
            )),
            PlanEvent::SchemaMismatch { issues, .. } => Some(entry(
                "schema_mismatch",
                None,
                Some(serde_json::json!({ "issues": issues })),
            )),

            // L2: step boundaries
            PlanEvent::StepStarted {
                step_index,
                action_kind,
                ..
            } if self.level >= 2 => Some(entry(
                "step_started",
                Some(*step_index),
                Some(serde_json::json!({ "kind": action_kind })),
            )),
            PlanEvent::StepCompleted {
                step_index,
                summary,
                output,
                elapsed_ms,
                ..
            } if self.level >= 2 => {
                let mut detail = serde_json::json!({
                    "summary": summary,
                    "elapsed_ms": elapsed_ms,
                });
                // L3: output preview
                if self.level >= 3 {
                    detail["output_preview"] = serde_json::Value::String(truncate_json(output, 500));
                }
                Some(entry("step_completed", Some(*step_index), Some(detail)))
            }

            _ => None,
        }
    }
}

fn event_run_id(event: &PlanEvent) -> &RunId {
    match event {
        PlanEvent::RunStarted { run_id, .. }
        | PlanEvent::StepStarted { run_id, .. }
        | PlanEvent::StepCompleted { run_id, .. }
        | PlanEvent::StepFailed { run_id, .. }
        | PlanEvent::SchemaMismatch { run_id, .. }
        | PlanEvent::RunComplete { run_id, .. } => run_id,
    }
}

/// Truncate a JSON value for logging.
fn truncate_json(value: &serde_json::Value, max_chars: usize) -> String {
    let s = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    truncate_chars(&s, max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use dealflow_core::event::EventBus;
    use dealflow_core::types::{StepFailure, StepFailureKind};

    fn completed(run: &str) -> PlanEvent {
        PlanEvent::StepCompleted {
            run_id: RunId::from_string(run),
            step_index: 0,
            summary: Some("parsed".into()),
            output: serde_json::json!({"brand": "Acme"}),
            elapsed_ms: 4,
        }
    }

    #[test]
    fn test_entry_format_skips_empty_fields() {
        let logger = RunLogger::new(PathBuf::from("/tmp"), 1);
        let entry = logger
            .event_to_entry(&PlanEvent::RunStarted {
                run_id: RunId::from_string("r1"),
                plan: "search".into(),
            })
            .unwrap();
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"run_started\""));
        assert!(json.contains("\"r1\""));
        assert!(!json.contains("\"step\""));
    }

    #[test]
    fn test_event_level_filtering() {
        let l1 = RunLogger::new(PathBuf::from("/tmp"), 1);
        let l2 = RunLogger::new(PathBuf::from("/tmp"), 2);
        let l3 = RunLogger::new(PathBuf::from("/tmp"), 3);

        let failed = PlanEvent::StepFailed {
            run_id: RunId::from_string("r"),
            step_index: 2,
            failure: StepFailure {
                kind: StepFailureKind::Backend,
                message: "boom".into(),
            },
        };
        assert!(l1.event_to_entry(&failed).is_some());
        assert!(l1.event_to_entry(&completed("r")).is_none());

        let e2 = l2.event_to_entry(&completed("r")).unwrap();
        assert!(e2.detail.as_ref().unwrap().get("output_preview").is_none());

        let e3 = l3.event_to_entry(&completed("r")).unwrap();
        assert_eq!(e3.detail.unwrap()["output_preview"], "{\"brand\":\"Acme\"}");
    }

    #[test]
    fn test_truncate_json() {
        let value = serde_json::json!({"key": "a very long string that should be truncated"});
        let result = truncate_json(&value, 20);
        assert_eq!(result.chars().count(), 23);
        assert!(result.ends_with("..."));
    }

    #[tokio::test]
    async fn test_writes_only_its_run_and_stops_on_complete() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::default());
        let run_id = RunId::from_string("mine");

        let logger = RunLogger::new(dir.path().to_path_buf(), 2);
        let handle = tokio::spawn(logger.run(bus.subscribe(), run_id.clone(), CancellationToken::new()));

        bus.publish(PlanEvent::RunStarted {
            run_id: run_id.clone(),
            plan: "search".into(),
        });
        bus.publish(completed("other"));
        bus.publish(completed("mine"));
        bus.publish(PlanEvent::RunComplete {
            run_id: run_id.clone(),
            succeeded: true,
            steps: 1,
            elapsed_ms: 9,
        });
        handle.await.unwrap();

        let run_dir = dir.path().join("mine");
        let file = std::fs::read_dir(&run_dir).unwrap().next().unwrap().unwrap().path();
        let content = std::fs::read_to_string(file).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event_type"], "run_started");
        assert_eq!(lines[1]["event_type"], "step_completed");
        assert_eq!(lines[2]["event_type"], "run_complete");
        assert!(lines.iter().all(|l| l["run_id"] == "mine"));
    }

    #[tokio::test]
    async fn test_cancel_stops_logger_after_lagging_past_run_complete() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::new(2));
        let run_id = RunId::from_string("mine");
        let rx = bus.subscribe();

        bus.publish(PlanEvent::RunComplete {
            run_id: run_id.clone(),
            succeeded: true,
            steps: 1,
            elapsed_ms: 9,
        });
        for _ in 0..4 {
            bus.publish(completed("other"));
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let logger = RunLogger::new(dir.path().to_path_buf(), 2);
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            logger.run(rx, run_id, cancel),
        )
        .await
        .expect("logger kept waiting for a RunComplete it lagged past");
    }

    #[tokio::test]
    async fn test_cancel_drains_buffered_events() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::default());
        let run_id = RunId::from_string("mine");
        let rx = bus.subscribe();

        bus.publish(PlanEvent::RunStarted {
            run_id: run_id.clone(),
            plan: "search".into(),
        });
        bus.publish(completed("mine"));

        let cancel = CancellationToken::new();
        cancel.cancel();
        RunLogger::new(dir.path().to_path_buf(), 2)
            .run(rx, run_id, cancel)
            .await;

        let run_dir = dir.path().join("mine");
        let file = std::fs::read_dir(&run_dir).unwrap().next().unwrap().unwrap().path();
        let content = std::fs::read_to_string(file).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
