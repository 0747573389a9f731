use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use dealflow_core::error::{DealflowError, Result};
use dealflow_core::traits::AuditSink;
use dealflow_core::types::{RunId, StepResult};

/// Sink that keeps every record it is offered.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<(RunId, StepResult)>>,
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each write sleeps first, so a caller returning early would miss it.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    pub fn records(&self) -> Vec<(RunId, StepResult)> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Step indices recorded, in arrival order.
    pub fn step_indices(&self) -> Vec<usize> {
        self.records().iter().map(|(_, r)| r.step_index).collect()
    }
}

impl AuditSink for RecordingSink {
    fn record<'a>(&'a self, run_id: &'a RunId, result: &'a StepResult) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Ok(mut records) = self.records.lock() {
                records.push((run_id.clone(), result.clone()));
            }
            Ok(())
        })
    }
}

/// Sink whose every write fails.
#[derive(Default)]
pub struct FailingSink {
    attempts: AtomicUsize,
}

impl FailingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl AuditSink for FailingSink {
    fn record<'a>(&'a self, _run_id: &'a RunId, _result: &'a StepResult) -> BoxFuture<'a, Result<()>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(DealflowError::AuditWrite("sink unavailable".into())) })
    }
}
