use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use tracing::debug;

use dealflow_core::error::{DealflowError, Result};
use dealflow_core::traits::PersistenceStore;
use dealflow_core::types::Row;

use crate::row::{conflict_key_of, ensure_id};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS rows (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        table_name TEXT NOT NULL,
        row_key TEXT NOT NULL,
        data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(table_name, row_key)
    );

    CREATE INDEX IF NOT EXISTS idx_rows_table ON rows(table_name, id);";

/// SQLite-backed row store. Every logical table lives in one `rows` table
/// keyed by `(table_name, row_key)` with a JSON payload.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: impl std::fmt::Display) -> DealflowError {
    DealflowError::Database(e.to_string())
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DealflowError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // WAL lets readers proceed while an audit append is in flight
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn parse_row(data: &str) -> Result<Row> {
    match serde_json::from_str::<serde_json::Value>(data)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(DealflowError::Database("stored row is not a JSON object".into())),
    }
}

impl PersistenceStore for SqliteStore {
    fn insert(&self, table: &str, row: Row) -> BoxFuture<'_, Result<()>> {
        let table = table.to_string();
        let mut row = row;

        Box::pin(async move {
            let key = ensure_id(&mut row);
            let data = serde_json::to_string(&row)?;
            let now = Utc::now().to_rfc3339();

            let conn = self.conn.lock().map_err(db_err)?;
            conn.execute(
                "INSERT INTO rows (table_name, row_key, data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![table, key, data, now],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    fn upsert(&self, table: &str, rows: Vec<Row>, conflict_key: &str) -> BoxFuture<'_, Result<()>> {
        let table = table.to_string();
        let conflict_key = conflict_key.to_string();

        Box::pin(async move {
            let mut prepared = Vec::with_capacity(rows.len());
            for row in &rows {
                let key = conflict_key_of(row, &conflict_key)?;
                prepared.push((key, serde_json::to_string(row)?));
            }
            let now = Utc::now().to_rfc3339();

            let mut conn = self.conn.lock().map_err(db_err)?;
            let tx = conn.transaction().map_err(db_err)?;
            for (key, data) in &prepared {
                tx.execute(
                    "INSERT INTO rows (table_name, row_key, data, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)
                     ON CONFLICT(table_name, row_key)
                     DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                    params![table, key, data, now],
                )
                .map_err(db_err)?;
            }
            tx.commit().map_err(db_err)?;

            debug!(table = %table, rows = prepared.len(), "Upserted rows");
            Ok(())
        })
    }

    fn get(&self, table: &str, key: &str) -> BoxFuture<'_, Result<Option<Row>>> {
        let table = table.to_string();
        let key = key.to_string();

        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;
            let mut stmt = conn
                .prepare("SELECT data FROM rows WHERE table_name = ?1 AND row_key = ?2")
                .map_err(db_err)?;
            let mut rows = stmt.query(params![table, key]).map_err(db_err)?;

            match rows.next().map_err(db_err)? {
                Some(row) => {
                    let data: String = row.get(0).map_err(db_err)?;
                    Ok(Some(parse_row(&data)?))
                }
                None => Ok(None),
            }
        })
    }

    fn list(
        &self,
        table: &str,
        filter: Option<(&str, &str)>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Row>>> {
        let table = table.to_string();
        let filter = filter.map(|(field, value)| (format!("$.{}", field), value.to_string()));

        Box::pin(async move {
            let conn = self.conn.lock().map_err(db_err)?;

            let data: Vec<String> = match &filter {
                Some((path, value)) => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT data FROM rows
                             WHERE table_name = ?1 AND CAST(json_extract(data, ?2) AS TEXT) = ?3
                             ORDER BY id ASC LIMIT ?4",
                        )
                        .map_err(db_err)?;
                    let rows = stmt
                        .query_map(params![table, path, value, limit as i64], |row| row.get(0))
                        .map_err(db_err)?;
                    rows.collect::<std::result::Result<_, _>>().map_err(db_err)?
                }
                None => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT data FROM rows WHERE table_name = ?1
                             ORDER BY id ASC LIMIT ?2",
                        )
                        .map_err(db_err)?;
                    let rows = stmt
                        .query_map(params![table, limit as i64], |row| row.get(0))
                        .map_err(db_err)?;
                    rows.collect::<std::result::Result<_, _>>().map_err(db_err)?
                }
            };

            data.iter().map(|d| parse_row(d)).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: serde_json::Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert("actions", row(json!({"id": "a1", "summary": "parsed email"})))
            .await
            .unwrap();

        let got = store.get("actions", "a1").await.unwrap().unwrap();
        assert_eq!(got["summary"], "parsed email");
        assert!(store.get("actions", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_mints_id_and_rejects_duplicates() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert("actions", row(json!({"summary": "x"}))).await.unwrap();
        let listed = store.list("actions", None, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0]["id"].is_string());

        store.insert("actions", row(json!({"id": "dup"}))).await.unwrap();
        assert!(store.insert("actions", row(json!({"id": "dup"}))).await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_replaces_on_conflict_key() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .upsert(
                "emails",
                vec![
                    row(json!({"email_id": "e1", "subject": "Brand deal"})),
                    row(json!({"email_id": "e2", "subject": "Sponsorship"})),
                ],
                "email_id",
            )
            .await
            .unwrap();
        store
            .upsert(
                "emails",
                vec![row(json!({"email_id": "e1", "subject": "Brand deal (updated)"}))],
                "email_id",
            )
            .await
            .unwrap();

        let all = store.list("emails", None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["subject"], "Brand deal (updated)");
    }

    #[tokio::test]
    async fn test_upsert_missing_key_fails_without_partial_write() {
        let store = SqliteStore::in_memory().unwrap();
        let result = store
            .upsert(
                "emails",
                vec![row(json!({"email_id": "e1"})), row(json!({"subject": "no key"}))],
                "email_id",
            )
            .await;
        assert!(result.is_err());
        assert!(store.list("emails", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .upsert(
                "emails",
                vec![
                    row(json!({"email_id": "e1", "user_id": "u1"})),
                    row(json!({"email_id": "e2", "user_id": "u2"})),
                    row(json!({"email_id": "e3", "user_id": "u1"})),
                ],
                "email_id",
            )
            .await
            .unwrap();

        let u1 = store.list("emails", Some(("user_id", "u1")), 10).await.unwrap();
        assert_eq!(u1.len(), 2);
        assert_eq!(u1[1]["email_id"], "e3");
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dealflow.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert("messages", row(json!({"id": "m1"}))).await.unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.get("messages", "m1").await.unwrap().is_some());
    }
}
