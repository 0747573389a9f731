//! The two collaboration workflows. Built once and shared across runs.

pub mod analyze;
pub mod search;

use std::sync::Arc;

use dealflow_core::error::Result;

use crate::plan::Plan;

#[derive(Debug, Clone)]
pub struct Workflows {
    pub search: Arc<Plan>,
    pub analyze: Arc<Plan>,
}

impl Workflows {
    pub fn new() -> Result<Self> {
        Ok(Self {
            search: Arc::new(search::build()?),
            analyze: Arc::new(analyze::build()?),
        })
    }

    pub fn all(&self) -> [&Arc<Plan>; 2] {
        [&self.search, &self.analyze]
    }
}
