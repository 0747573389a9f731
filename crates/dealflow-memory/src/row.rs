use dealflow_core::error::{DealflowError, Result};
use dealflow_core::types::Row;
use uuid::Uuid;

/// Render a key column value as the row key. Only strings and numbers qualify.
pub(crate) fn key_of(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Key for an appended row: its `id`, minted when absent.
pub(crate) fn ensure_id(row: &mut Row) -> String {
    if let Some(key) = key_of(row, "id") {
        return key;
    }
    let id = Uuid::new_v4().to_string();
    row.insert("id".to_string(), serde_json::Value::String(id.clone()));
    id
}

pub(crate) fn conflict_key_of(row: &Row, conflict_key: &str) -> Result<String> {
    key_of(row, conflict_key).ok_or_else(|| {
        DealflowError::Database(format!("row is missing conflict key '{}'", conflict_key))
    })
}

pub(crate) fn matches_filter(row: &Row, filter: Option<(&str, &str)>) -> bool {
    match filter {
        None => true,
        Some((field, expected)) => key_of(row, field).as_deref() == Some(expected),
    }
}
