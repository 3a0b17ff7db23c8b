//! Configuration loading and management

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::accounting::Budget;
use crate::agent::{AgentRegistry, AgentRole, ProfileOverride};
use crate::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Worker backend configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Retry policy for agent invocations
    #[serde(default)]
    pub retry: RetryConfig,

    /// Daily token budget
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Per-role profile overrides merged over the built-in table
    #[serde(default)]
    pub agents: HashMap<AgentRole, ProfileOverride>,

    /// Directory for persisted state (accounting snapshot)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".troupe")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            retry: RetryConfig::default(),
            budget: BudgetConfig::default(),
            agents: HashMap::new(),
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Load configuration from file or default locations
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(PathBuf::from)
            .or_else(|| {
                // Try .troupe/config.toml in current directory
                let local = PathBuf::from(".troupe/config.toml");
                if local.exists() {
                    return Some(local);
                }

                // Try ~/.troupe/config.toml
                dirs::home_dir().map(|h| h.join(".troupe/config.toml"))
            });

        match config_path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(&p)?;
                let config: Config = toml::from_str(&content)?;
                Ok(config)
            }
            _ => Ok(Config::default()),
        }
    }

    /// Agent registry with this configuration's overrides applied
    pub fn registry(&self) -> AgentRegistry {
        AgentRegistry::with_overrides(&self.agents)
    }

    /// Budget to hand the accounting store, if one is configured
    pub fn budget(&self) -> Option<Budget> {
        if self.budget.daily_limit == 0 {
            return None;
        }
        Some(Budget {
            daily_limit: self.budget.daily_limit,
            warn_fraction: self.budget.warn_fraction,
            enabled: self.budget.enabled,
        })
    }

    /// Path of the persisted accounting snapshot
    pub fn accounting_path(&self) -> PathBuf {
        self.data_dir.join("accounting.json")
    }
}

/// Worker backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Command line of the agent CLI, e.g. "claude" or
    /// "~/bin/claude --settings strict.json"
    #[serde(default = "default_worker_command")]
    pub command: String,

    /// Model used when a profile carries no model or tier hint
    #[serde(default = "default_worker_model")]
    pub default_model: String,

    /// Skip permission prompts (dangerous but needed for unattended runs)
    #[serde(default)]
    pub dangerously_skip_permissions: bool,
}

fn default_worker_command() -> String {
    "claude".to_string()
}

fn default_worker_model() -> String {
    "sonnet".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: default_worker_command(),
            default_model: default_worker_model(),
            dangerously_skip_permissions: false,
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

/// Daily token budget configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Tokens allowed per sliding 24h window; 0 disables budgeting entirely
    #[serde(default)]
    pub daily_limit: u64,

    /// Fraction of the limit at which a warning fires
    #[serde(default = "default_warn_fraction")]
    pub warn_fraction: f64,

    /// Whether threshold events fire
    #[serde(default)]
    pub enabled: bool,
}

fn default_warn_fraction() -> f64 {
    0.8
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit: 0,
            warn_fraction: default_warn_fraction(),
            enabled: false,
        }
    }
}

/// Initialize the .troupe directory with a default configuration
pub fn init() -> Result<()> {
    let data_dir = default_data_dir();

    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
    }

    let config_path = data_dir.join("config.toml");
    if !config_path.exists() {
        let default_config = Config::default();
        let config_str = toml::to_string_pretty(&default_config)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(&config_path, config_str)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.worker.command, "claude");
        assert_eq!(config.retry.max_retries, 2);
        assert!(config.budget().is_none());
        assert_eq!(config.data_dir, PathBuf::from(".troupe"));
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            data_dir = ".troupe"

            [worker]
            command = "claude --settings strict.json"
            default_model = "opus"
            dangerously_skip_permissions = true

            [retry]
            max_retries = 4

            [budget]
            daily_limit = 500000
            warn_fraction = 0.9
            enabled = true

            [agents.scout]
            model = "haiku"
            display_name = "Pathfinder"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.worker.default_model, "opus");
        assert!(config.worker.dangerously_skip_permissions);
        assert_eq!(config.retry.max_retries, 4);

        let budget = config.budget().unwrap();
        assert_eq!(budget.daily_limit, 500_000);
        assert!((budget.warn_fraction - 0.9).abs() < 1e-9);
        assert!(budget.enabled);

        let registry = config.registry();
        let scout = registry.get(AgentRole::Scout).unwrap();
        assert_eq!(scout.model.as_deref(), Some("haiku"));
        assert_eq!(scout.display_name, "Pathfinder");
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: Config = toml::from_str("[retry]\nmax_retries = 0\n").unwrap();
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.worker.command, "claude");
        assert!((config.budget.warn_fraction - 0.8).abs() < 1e-9);
    }
}
