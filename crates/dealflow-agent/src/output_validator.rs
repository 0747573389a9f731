use std::fmt;
use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use serde::{Serialize, Serializer};

use dealflow_core::error::{DealflowError, Result};

/// A compiled JSON Schema (draft 7) that a plan's final output is checked against.
#[derive(Clone)]
pub struct OutputSchema {
    name: String,
    raw: serde_json::Value,
    compiled: Arc<JSONSchema>,
}

/// Result of output validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Valid,
    Invalid { issues: Vec<String> },
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn issues(&self) -> &[String] {
        match self {
            ValidationResult::Valid => &[],
            ValidationResult::Invalid { issues } => issues,
        }
    }
}

impl OutputSchema {
    /// Compile a schema. An invalid schema is a configuration error.
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Result<Self> {
        let name = name.into();
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema)
            .map_err(|e| DealflowError::Config(format!("invalid schema '{}': {}", name, e)))?;

        Ok(Self {
            name,
            raw: schema,
            compiled: Arc::new(compiled),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }

    /// Check a value, collecting every violation as `path: message`.
    pub fn validate(&self, value: &serde_json::Value) -> ValidationResult {
        match self.compiled.validate(value) {
            Ok(()) => ValidationResult::Valid,
            Err(errors) => {
                let issues = errors
                    .map(|e| {
                        let path = e.instance_path.to_string();
                        if path.is_empty() {
                            format!("(root): {}", e)
                        } else {
                            format!("{}: {}", path, e)
                        }
                    })
                    .collect();
                ValidationResult::Invalid { issues }
            }
        }
    }
}

impl fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSchema").field("name", &self.name).finish()
    }
}

impl Serialize for OutputSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}
