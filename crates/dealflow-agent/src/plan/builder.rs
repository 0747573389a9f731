use std::collections::BTreeMap;

use dealflow_core::error::{DealflowError, Result};

use super::step::{Plan, PlanInput, Step, StepKind, StepRef};
use crate::output_validator::OutputSchema;

/// Fluent plan construction. Every reference is checked when its step is
/// appended, so a built [`Plan`] can never hold a forward, self, or dangling
/// reference.
///
/// ```ignore
/// let plan = PlanBuilder::new("search")
///     .input("context", "creator profile")?
///     .reasoning("Derive a query", [StepRef::input("context")])?
///     .tool("Run it", "mail_search", [("query", StepRef::step(0))])?
///     .build(schema, true)?;
/// ```
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    name: String,
    inputs: Vec<PlanInput>,
    steps: Vec<Step>,
}

impl PlanBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Declare an input. Names are unique per plan.
    pub fn input(mut self, name: impl Into<String>, description: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if self.inputs.iter().any(|i| i.name == name) {
            return Err(DealflowError::DuplicateInputName(name));
        }
        self.inputs.push(PlanInput {
            name,
            description: description.into(),
        });
        Ok(self)
    }

    /// Append a reasoning step over the given references.
    pub fn reasoning(
        mut self,
        instructions: impl Into<String>,
        references: impl IntoIterator<Item = StepRef>,
    ) -> Result<Self> {
        let index = self.steps.len();
        let references: Vec<StepRef> = references.into_iter().collect();
        self.check_refs(index, references.iter())?;

        self.steps.push(Step {
            index,
            kind: StepKind::Reasoning,
            instructions: instructions.into(),
            references,
            tool_name: None,
            tool_args: None,
        });
        Ok(self)
    }

    /// Append a tool step whose arguments are bound from references.
    pub fn tool<K: Into<String>>(
        mut self,
        instructions: impl Into<String>,
        tool_name: impl Into<String>,
        args: impl IntoIterator<Item = (K, StepRef)>,
    ) -> Result<Self> {
        let index = self.steps.len();
        let args: BTreeMap<String, StepRef> = args.into_iter().map(|(k, r)| (k.into(), r)).collect();
        self.check_refs(index, args.values())?;

        self.steps.push(Step {
            index,
            kind: StepKind::ToolInvocation,
            instructions: instructions.into(),
            references: Vec::new(),
            tool_name: Some(tool_name.into()),
            tool_args: Some(args),
        });
        Ok(self)
    }

    /// Produce an immutable plan. The builder is left untouched.
    pub fn build(&self, final_output_schema: OutputSchema, summarize: bool) -> Result<Plan> {
        if self.steps.is_empty() {
            return Err(DealflowError::Config(format!("plan '{}' has no steps", self.name)));
        }
        Ok(Plan {
            name: self.name.clone(),
            inputs: self.inputs.clone(),
            steps: self.steps.clone(),
            final_output_schema,
            summarize,
        })
    }

    /// Drop all declared inputs and steps, keeping the name.
    pub fn reset(&mut self) {
        self.inputs.clear();
        self.steps.clear();
    }

    fn check_refs<'a>(&self, index: usize, refs: impl Iterator<Item = &'a StepRef>) -> Result<()> {
        for r in refs {
            let ok = match r {
                StepRef::Input(name) => self.inputs.iter().any(|i| &i.name == name),
                StepRef::Step(target) => *target < index,
            };
            if !ok {
                return Err(DealflowError::DanglingReference {
                    step: index,
                    reference: r.to_string(),
                });
            }
        }
        Ok(())
    }
}
