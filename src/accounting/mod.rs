//! Token usage and cost accounting
//!
//! One process-wide [`AccountingStore`] aggregates token usage and cost
//! per agent role and in total, maintains a sliding daily counter against an
//! optional budget, and persists its snapshot after every write through an
//! injected [`SnapshotStore`].

mod persist;

pub use persist::{JsonSnapshotStore, MemorySnapshotStore, SnapshotStore};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::agent::AgentRole;
use crate::events::{Event, EventBus};
use crate::worker::TokenUsage;

/// Per-model prices in currency units per million tokens (input, output)
const MODEL_PRICES: &[(&str, f64, f64)] = &[
    ("opus", 15.0, 75.0),
    ("sonnet", 3.0, 15.0),
    ("haiku", 0.25, 1.25),
];

/// Pricing applied when a model id matches no table entry
const FALLBACK_MODEL: &str = "sonnet";

/// Price per 1M input/output tokens for a model id.
///
/// Model ids are matched by substring ("claude-sonnet-4" matches "sonnet");
/// unknown ids fall back to the default model's pricing.
pub fn model_pricing(model_id: &str) -> (f64, f64) {
    let lower = model_id.to_lowercase();
    for (name, input, output) in MODEL_PRICES {
        if lower.contains(name) {
            return (*input, *output);
        }
    }
    MODEL_PRICES
        .iter()
        .find(|(name, _, _)| *name == FALLBACK_MODEL)
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or((0.0, 0.0))
}

/// Daily token budget configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// Tokens allowed per sliding 24h window
    pub daily_limit: u64,
    /// Fraction of the limit at which a warning fires (e.g. 0.8)
    pub warn_fraction: f64,
    pub enabled: bool,
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Cumulative accounting state, persisted as a flat structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingSnapshot {
    /// Totals across every role
    #[serde(default)]
    pub totals: TokenUsage,
    /// Totals per role; sums to `totals` at every observation point
    #[serde(default)]
    pub per_role: HashMap<AgentRole, TokenUsage>,
    /// Number of recorded invocations
    #[serde(default)]
    pub session_count: u64,
    /// Tokens used since the last daily reset
    #[serde(default)]
    pub daily_tokens: u64,
    #[serde(default = "now")]
    pub last_daily_reset: DateTime<Utc>,
    /// Re-stamped to "now" whenever a snapshot is loaded
    #[serde(default = "now")]
    pub session_started_at: DateTime<Utc>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub budget: Option<Budget>,
}

impl Default for AccountingSnapshot {
    fn default() -> Self {
        Self {
            totals: TokenUsage::default(),
            per_role: HashMap::new(),
            session_count: 0,
            daily_tokens: 0,
            last_daily_reset: now(),
            session_started_at: now(),
            last_updated: None,
            budget: None,
        }
    }
}

/// Process-wide token and cost accounting
pub struct AccountingStore {
    snapshot: Mutex<AccountingSnapshot>,
    persist: Arc<dyn SnapshotStore>,
    events: Arc<EventBus>,
}

impl AccountingStore {
    /// Build the store, restoring any persisted snapshot.
    ///
    /// The restored `session_started_at` is always replaced with the current
    /// time, and a budget supplied here replaces whatever the snapshot
    /// carried.
    pub fn new(
        persist: Arc<dyn SnapshotStore>,
        events: Arc<EventBus>,
        budget: Option<Budget>,
    ) -> Self {
        let mut snapshot = persist.load().unwrap_or_default();
        snapshot.session_started_at = Utc::now();
        if budget.is_some() {
            snapshot.budget = budget;
        }
        Self {
            snapshot: Mutex::new(snapshot),
            persist,
            events,
        }
    }

    /// Record one invocation's usage for `role`.
    ///
    /// Computes cost from the price table when the worker did not supply
    /// one, lazily resets the daily counter after 24 hours, updates all
    /// aggregates, emits a budget event when past a threshold, and persists
    /// the snapshot.
    pub fn record_usage(&self, role: AgentRole, usage: TokenUsage, model_id: &str) {
        let mut usage = usage;
        if usage.cost.is_none() {
            let (input_price, output_price) = model_pricing(model_id);
            usage.cost = Some(
                usage.input_tokens as f64 / 1_000_000.0 * input_price
                    + usage.output_tokens as f64 / 1_000_000.0 * output_price,
            );
        }

        let (persisted, budget_event) = {
            let mut snapshot = self.snapshot.lock().unwrap();
            let now = Utc::now();

            // Lazy daily reset: evaluated only on write, never on a timer
            if now - snapshot.last_daily_reset > Duration::hours(24) {
                debug!("Daily token counter reset");
                snapshot.daily_tokens = 0;
                snapshot.last_daily_reset = now;
            }

            snapshot.totals.add(&usage);
            snapshot.per_role.entry(role).or_default().add(&usage);
            snapshot.session_count += 1;
            snapshot.daily_tokens += usage.total_tokens;
            snapshot.last_updated = Some(now);

            let budget_event = snapshot
                .budget
                .filter(|b| b.enabled && b.daily_limit > 0)
                .and_then(|budget| {
                    let fraction = snapshot.daily_tokens as f64 / budget.daily_limit as f64;
                    if fraction >= 1.0 {
                        Some(Event::BudgetExceeded {
                            daily_tokens: snapshot.daily_tokens,
                            daily_limit: budget.daily_limit,
                        })
                    } else if fraction >= budget.warn_fraction {
                        Some(Event::BudgetWarning {
                            daily_tokens: snapshot.daily_tokens,
                            daily_limit: budget.daily_limit,
                            fraction,
                        })
                    } else {
                        None
                    }
                });

            (snapshot.clone(), budget_event)
        };

        if let Err(e) = self.persist.save(&persisted) {
            warn!("Failed to persist accounting snapshot: {}", e);
        }
        if let Some(event) = budget_event {
            self.events.emit(event);
        }

        debug!(
            role = %role,
            model_id = model_id,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost = usage.cost,
            "Recorded usage"
        );
    }

    /// Current snapshot
    pub fn snapshot(&self) -> AccountingSnapshot {
        self.snapshot.lock().unwrap().clone()
    }

    /// Zero every counter and re-stamp the session/reset timestamps.
    /// Budget configuration is untouched.
    pub fn reset_all(&self) {
        let persisted = {
            let mut snapshot = self.snapshot.lock().unwrap();
            let budget = snapshot.budget;
            *snapshot = AccountingSnapshot {
                budget,
                ..AccountingSnapshot::default()
            };
            snapshot.clone()
        };
        if let Err(e) = self.persist.save(&persisted) {
            warn!("Failed to persist accounting snapshot: {}", e);
        }
    }

    #[cfg(test)]
    fn set_last_daily_reset(&self, at: DateTime<Utc>) {
        self.snapshot.lock().unwrap().last_daily_reset = at;
    }

    #[cfg(test)]
    fn set_daily_tokens(&self, tokens: u64) {
        self.snapshot.lock().unwrap().daily_tokens = tokens;
    }
}
