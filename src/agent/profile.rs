//! Agent profiles and the registry that resolves them
//!
//! A profile is the immutable description of one worker configuration:
//! role, instructions, capability list, and model hints. The registry merges
//! the built-in table with optional user overrides (override wins on role
//! collision).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::role::{AgentRole, ModelTier, Verbosity};

/// Immutable descriptor for one agent worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Role this profile serves
    pub role: AgentRole,
    /// Human-readable name used in prompts and UI
    pub display_name: String,
    /// System instructions sent to the worker
    pub instructions: String,
    /// Capabilities (tool names) granted to the worker
    pub capabilities: Vec<String>,
    /// Explicit model identifier, overrides the tier hint
    #[serde(default)]
    pub model: Option<String>,
    /// Model tier hint when no explicit model is set
    #[serde(default)]
    pub tier: Option<ModelTier>,
    /// Response verbosity hint
    #[serde(default)]
    pub verbosity: Option<Verbosity>,
    /// Cap on worker output tokens
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

impl AgentProfile {
    /// Resolve the model identifier for this profile, falling back to the
    /// tier default and finally the given orchestrator default.
    pub fn resolved_model<'a>(&'a self, default_model: &'a str) -> &'a str {
        if let Some(model) = &self.model {
            return model;
        }
        if let Some(tier) = self.tier {
            return tier.default_model();
        }
        default_model
    }
}

/// Partial profile used in configuration files; unset fields keep the
/// built-in value for that role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverride {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tier: Option<ModelTier>,
    #[serde(default)]
    pub verbosity: Option<Verbosity>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

/// Registry of agent profiles keyed by role
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    profiles: HashMap<AgentRole, AgentProfile>,
}

impl AgentRegistry {
    /// Registry containing only the built-in profile table
    pub fn builtin() -> Self {
        Self::from_profiles(builtin_profiles())
    }

    /// Registry over an explicit profile list (last entry wins per role)
    pub fn from_profiles(list: Vec<AgentProfile>) -> Self {
        let mut profiles = HashMap::new();
        for profile in list {
            profiles.insert(profile.role, profile);
        }
        Self { profiles }
    }

    /// Built-ins merged with user overrides; an override wins field-by-field
    /// on role collision.
    pub fn with_overrides(overrides: &HashMap<AgentRole, ProfileOverride>) -> Self {
        let mut registry = Self::builtin();
        for (role, over) in overrides {
            if let Some(profile) = registry.profiles.get_mut(role) {
                if let Some(name) = &over.display_name {
                    profile.display_name = name.clone();
                }
                if let Some(instructions) = &over.instructions {
                    profile.instructions = instructions.clone();
                }
                if let Some(capabilities) = &over.capabilities {
                    profile.capabilities = capabilities.clone();
                }
                if over.model.is_some() {
                    profile.model = over.model.clone();
                }
                if over.tier.is_some() {
                    profile.tier = over.tier;
                }
                if over.verbosity.is_some() {
                    profile.verbosity = over.verbosity;
                }
                if over.max_output_tokens.is_some() {
                    profile.max_output_tokens = over.max_output_tokens;
                }
            }
        }
        registry
    }

    /// Look up the profile for a role
    pub fn get(&self, role: AgentRole) -> Option<&AgentProfile> {
        self.profiles.get(&role)
    }

    /// All registered profiles in role order
    pub fn profiles(&self) -> Vec<&AgentProfile> {
        let mut list: Vec<_> = self.profiles.values().collect();
        list.sort_by_key(|p| p.role);
        list
    }
}

fn builtin_profiles() -> Vec<AgentProfile> {
    vec![
        AgentProfile {
            role: AgentRole::Planner,
            display_name: "Planner".to_string(),
            instructions: "You are a planning specialist. Break the task into \
                           concrete, ordered steps with clear acceptance criteria. \
                           Do not write implementation code."
                .to_string(),
            capabilities: vec!["read".to_string(), "bash".to_string()],
            model: None,
            tier: Some(ModelTier::Strong),
            verbosity: None,
            max_output_tokens: None,
        },
        AgentProfile {
            role: AgentRole::Scout,
            display_name: "Scout".to_string(),
            instructions: "You are a reconnaissance specialist. Locate the code, \
                           documents, and context relevant to the task and report \
                           findings concisely with file references."
                .to_string(),
            capabilities: vec!["read".to_string(), "grep".to_string()],
            model: None,
            tier: Some(ModelTier::Fast),
            verbosity: Some(Verbosity::Terse),
            max_output_tokens: None,
        },
        AgentProfile {
            role: AgentRole::Implementer,
            display_name: "Implementer".to_string(),
            instructions: "You are an implementation specialist. Make the change \
                           described in the task, keeping edits minimal and \
                           consistent with the surrounding code."
                .to_string(),
            capabilities: vec![
                "read".to_string(),
                "write".to_string(),
                "edit".to_string(),
                "bash".to_string(),
            ],
            model: None,
            tier: Some(ModelTier::Strong),
            verbosity: None,
            max_output_tokens: None,
        },
        AgentProfile {
            role: AgentRole::Reviewer,
            display_name: "Reviewer".to_string(),
            instructions: "You are a code review specialist. Identify defects, \
                           risks, and simplifications in the presented work. Be \
                           specific and actionable."
                .to_string(),
            capabilities: vec!["read".to_string(), "grep".to_string()],
            model: None,
            tier: Some(ModelTier::Fast),
            verbosity: None,
            max_output_tokens: None,
        },
        AgentProfile {
            role: AgentRole::Tester,
            display_name: "Tester".to_string(),
            instructions: "You are a testing specialist. Write or run the tests \
                           that verify the task outcome and report failures with \
                           enough detail to fix them."
                .to_string(),
            capabilities: vec!["read".to_string(), "bash".to_string()],
            model: None,
            tier: Some(ModelTier::Fast),
            verbosity: None,
            max_output_tokens: None,
        },
        AgentProfile {
            role: AgentRole::Aggregator,
            display_name: "Aggregator".to_string(),
            instructions: "You are a synthesis specialist. Combine the outputs of \
                           other agents into a single coherent recommendation, \
                           reconciling any conflicts between them."
                .to_string(),
            capabilities: vec!["read".to_string()],
            model: None,
            tier: Some(ModelTier::Strong),
            verbosity: None,
            max_output_tokens: None,
        },
    ]
}
