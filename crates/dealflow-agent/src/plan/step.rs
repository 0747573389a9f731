use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::output_validator::OutputSchema;

/// A named placeholder the caller binds before execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanInput {
    pub name: String,
    pub description: String,
}

/// Where a step reads a value from: a declared input or an earlier step's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRef {
    Input(String),
    Step(usize),
}

impl StepRef {
    pub fn input(name: impl Into<String>) -> Self {
        StepRef::Input(name.into())
    }

    pub fn step(index: usize) -> Self {
        StepRef::Step(index)
    }

    /// Label shown to the backend next to the resolved value.
    pub fn label(&self) -> String {
        match self {
            StepRef::Input(name) => name.clone(),
            StepRef::Step(index) => format!("step {} output", index),
        }
    }
}

impl fmt::Display for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepRef::Input(name) => write!(f, "input '{}'", name),
            StepRef::Step(index) => write!(f, "step {}", index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Reasoning,
    ToolInvocation,
}

/// One unit of work. Constructed only by [`super::PlanBuilder`].
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub index: usize,
    pub kind: StepKind,
    pub instructions: String,
    pub references: Vec<StepRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<BTreeMap<String, StepRef>>,
}

impl Step {
    /// `reasoning` or `tool:<name>`, as recorded in step results and audit rows.
    pub fn action_kind(&self) -> String {
        match (&self.kind, &self.tool_name) {
            (StepKind::ToolInvocation, Some(name)) => format!("tool:{}", name),
            (StepKind::ToolInvocation, None) => "tool".to_string(),
            (StepKind::Reasoning, _) => "reasoning".to_string(),
        }
    }

    /// Every reference this step reads, including tool arguments.
    pub fn dependencies(&self) -> impl Iterator<Item = &StepRef> {
        self.references
            .iter()
            .chain(self.tool_args.iter().flat_map(|args| args.values()))
    }
}

/// An immutable, validated pipeline. Shared read-only across runs.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub name: String,
    pub inputs: Vec<PlanInput>,
    pub steps: Vec<Step>,
    pub final_output_schema: OutputSchema,
    pub summarize: bool,
}

impl Plan {
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|i| i.name.as_str())
    }

    pub fn final_step(&self) -> Option<&Step> {
        self.steps.last()
    }
}
