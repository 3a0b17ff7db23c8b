//! Agent roles identify the worker profiles the orchestrator can run

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// The closed set of agent roles.
///
/// Roles are used as map keys throughout the orchestrator (execution state,
/// accounting, conversation sessions), so the set is fixed for the lifetime
/// of the process. Unknown role names are a parse error.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Task planning and breakdown
    Planner,
    /// Fast reconnaissance and code/context search
    Scout,
    /// Primary implementation work
    Implementer,
    /// Critical review of produced work
    Reviewer,
    /// Test authoring and verification
    Tester,
    /// Synthesizes parallel outputs into one recommendation
    Aggregator,
}

impl AgentRole {
    /// All roles, in display order.
    pub const ALL: [AgentRole; 6] = [
        AgentRole::Planner,
        AgentRole::Scout,
        AgentRole::Implementer,
        AgentRole::Reviewer,
        AgentRole::Tester,
        AgentRole::Aggregator,
    ];

    /// Stable machine name for this role
    pub fn name(&self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Scout => "scout",
            AgentRole::Implementer => "implementer",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Tester => "tester",
            AgentRole::Aggregator => "aggregator",
        }
    }

    /// Whether this role synthesizes the outputs of other roles
    pub fn is_aggregator(&self) -> bool {
        matches!(self, AgentRole::Aggregator)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for AgentRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "planner" | "plan" => Ok(AgentRole::Planner),
            "scout" | "search" | "searcher" => Ok(AgentRole::Scout),
            "implementer" | "implement" | "builder" => Ok(AgentRole::Implementer),
            "reviewer" | "review" => Ok(AgentRole::Reviewer),
            "tester" | "test" | "validator" => Ok(AgentRole::Tester),
            "aggregator" | "aggregate" => Ok(AgentRole::Aggregator),
            other => Err(Error::Agent(format!("unknown agent role: {}", other))),
        }
    }
}

/// Model tier for cost/capability tradeoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Fast, cheaper models
    Fast,
    /// Strong reasoning models
    Strong,
}

impl ModelTier {
    /// Get the default model name for this tier
    pub fn default_model(&self) -> &'static str {
        match self {
            ModelTier::Fast => "sonnet",
            ModelTier::Strong => "opus",
        }
    }
}

/// Response verbosity hint passed through to the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Terse,
    Normal,
    Verbose,
}
