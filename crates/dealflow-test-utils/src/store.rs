use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;

use dealflow_core::error::{DealflowError, Result};
use dealflow_core::traits::PersistenceStore;
use dealflow_core::types::Row;

/// Store whose every operation fails.
#[derive(Default)]
pub struct FailingStore {
    calls: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T: Send + 'static>(&self) -> BoxFuture<'_, Result<T>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(DealflowError::Database("store unavailable".into())) })
    }
}

impl PersistenceStore for FailingStore {
    fn insert(&self, _table: &str, _row: Row) -> BoxFuture<'_, Result<()>> {
        self.fail()
    }

    fn upsert(&self, _table: &str, _rows: Vec<Row>, _conflict_key: &str) -> BoxFuture<'_, Result<()>> {
        self.fail()
    }

    fn get(&self, _table: &str, _key: &str) -> BoxFuture<'_, Result<Option<Row>>> {
        self.fail()
    }

    fn list(
        &self,
        _table: &str,
        _filter: Option<(&str, &str)>,
        _limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Row>>> {
        self.fail()
    }
}
