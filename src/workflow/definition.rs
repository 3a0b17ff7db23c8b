//! Workflow definitions and the built-in template table
//!
//! A workflow is an ordered list of steps executed under one of three fixed
//! topologies. Definitions are immutable; the built-in templates below are
//! the only source of workflows (user-defined workflows are out of scope).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::agent::AgentRole;

/// Execution topology for a workflow's steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPattern {
    /// Steps run one at a time in list order, each seeing prior outputs
    Sequential,
    /// Steps run concurrently and independently
    Parallel,
    /// Steps run concurrently, then an aggregator synthesizes the outputs
    FanOut,
}

impl fmt::Display for WorkflowPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowPattern::Sequential => "sequential",
            WorkflowPattern::Parallel => "parallel",
            WorkflowPattern::FanOut => "fan-out",
        };
        write!(f, "{}", name)
    }
}

/// One step of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub role: AgentRole,
    /// Explicit prompt for this step; the workflow's initial prompt applies
    /// when absent
    #[serde(default)]
    pub input: Option<String>,
}

impl WorkflowStep {
    pub fn new(role: AgentRole) -> Self {
        Self { role, input: None }
    }

    pub fn with_input(role: AgentRole, input: impl Into<String>) -> Self {
        Self {
            role,
            input: Some(input.into()),
        }
    }
}

/// Immutable description of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub pattern: WorkflowPattern,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        pattern: WorkflowPattern,
        steps: Vec<WorkflowStep>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            pattern,
            steps,
        }
    }
}

/// Built-in workflow templates
pub fn templates() -> Vec<WorkflowDefinition> {
    vec![
        WorkflowDefinition::new(
            "feature",
            "Feature development",
            WorkflowPattern::Sequential,
            vec![
                WorkflowStep::new(AgentRole::Planner),
                WorkflowStep::new(AgentRole::Implementer),
                WorkflowStep::new(AgentRole::Tester),
            ],
        ),
        WorkflowDefinition::new(
            "survey",
            "Parallel investigation",
            WorkflowPattern::Parallel,
            vec![
                WorkflowStep::new(AgentRole::Scout),
                WorkflowStep::new(AgentRole::Reviewer),
                WorkflowStep::new(AgentRole::Tester),
            ],
        ),
        WorkflowDefinition::new(
            "council",
            "Multi-perspective recommendation",
            WorkflowPattern::FanOut,
            vec![
                WorkflowStep::new(AgentRole::Planner),
                WorkflowStep::new(AgentRole::Scout),
                WorkflowStep::new(AgentRole::Reviewer),
                WorkflowStep::new(AgentRole::Aggregator),
            ],
        ),
    ]
}

/// Look up a built-in template by id
pub fn find_template(id: &str) -> Option<WorkflowDefinition> {
    templates().into_iter().find(|t| t.id == id)
}
