use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use dealflow_core::error::{DealflowError, Result};
use dealflow_core::traits::PersistenceStore;
use dealflow_core::types::Row;

use crate::row::{conflict_key_of, ensure_id, matches_filter};

#[derive(Default)]
struct Table {
    order: Vec<String>,
    rows: HashMap<String, Row>,
}

impl Table {
    fn put(&mut self, key: String, row: Row) {
        if self.rows.insert(key.clone(), row).is_none() {
            self.order.push(key);
        }
    }
}

/// Process-local store for `storage.mode = "memory"` and tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceStore for MemoryStore {
    fn insert(&self, table: &str, row: Row) -> BoxFuture<'_, Result<()>> {
        let table = table.to_string();
        let mut row = row;

        Box::pin(async move {
            let key = ensure_id(&mut row);
            let mut tables = self.tables.write().await;
            let entry = tables.entry(table.clone()).or_default();
            if entry.rows.contains_key(&key) {
                return Err(DealflowError::Database(format!(
                    "duplicate key '{}' in table '{}'",
                    key, table
                )));
            }
            entry.put(key, row);
            Ok(())
        })
    }

    fn upsert(&self, table: &str, rows: Vec<Row>, conflict_key: &str) -> BoxFuture<'_, Result<()>> {
        let table = table.to_string();
        let conflict_key = conflict_key.to_string();

        Box::pin(async move {
            let keyed = rows
                .into_iter()
                .map(|row| conflict_key_of(&row, &conflict_key).map(|key| (key, row)))
                .collect::<Result<Vec<_>>>()?;

            let mut tables = self.tables.write().await;
            let entry = tables.entry(table).or_default();
            for (key, row) in keyed {
                entry.put(key, row);
            }
            Ok(())
        })
    }

    fn get(&self, table: &str, key: &str) -> BoxFuture<'_, Result<Option<Row>>> {
        let table = table.to_string();
        let key = key.to_string();

        Box::pin(async move {
            let tables = self.tables.read().await;
            Ok(tables.get(&table).and_then(|t| t.rows.get(&key).cloned()))
        })
    }

    fn list(
        &self,
        table: &str,
        filter: Option<(&str, &str)>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Row>>> {
        let table = table.to_string();
        let filter = filter.map(|(f, v)| (f.to_string(), v.to_string()));

        Box::pin(async move {
            let tables = self.tables.read().await;
            let Some(t) = tables.get(&table) else {
                return Ok(Vec::new());
            };
            let filter = filter.as_ref().map(|(f, v)| (f.as_str(), v.as_str()));
            Ok(t.order
                .iter()
                .filter_map(|key| t.rows.get(key))
                .filter(|row| matches_filter(row, filter))
                .take(limit)
                .cloned()
                .collect())
        })
    }
}
