use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use dealflow_core::error::{DealflowError, Result};
use dealflow_core::traits::{AuditSink, PersistenceStore};
use dealflow_core::types::{ActionRecord, RunId, StepResult};

/// Table audit records are appended to.
pub const ACTIONS_TABLE: &str = "actions";

/// Appends one [`ActionRecord`] per completed step to the `actions` table.
pub struct StoreAuditSink {
    store: Arc<dyn PersistenceStore>,
}

impl StoreAuditSink {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self { store }
    }
}

impl AuditSink for StoreAuditSink {
    fn record<'a>(&'a self, run_id: &'a RunId, result: &'a StepResult) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let record = ActionRecord::for_step(run_id, result);
            let mut row = match serde_json::to_value(&record)? {
                serde_json::Value::Object(map) => map,
                _ => return Err(DealflowError::AuditWrite("action record is not an object".into())),
            };
            row.insert("id".into(), serde_json::Value::String(record.action_id.to_string()));

            self.store
                .insert(ACTIONS_TABLE, row)
                .await
                .map_err(|e| DealflowError::AuditWrite(e.to_string()))?;

            debug!(run_id = %run_id, step = result.step_index, action_id = %record.action_id, "Audited step");
            Ok(())
        })
    }
}
