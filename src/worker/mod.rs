//! Worker abstraction for language-model backends
//!
//! The orchestrator core never talks to a model directly; it depends on the
//! narrow [`Worker`] contract: given an agent profile and a prompt,
//! asynchronously produce an outcome with a success flag, output text,
//! optional error, optional token usage, and an optional continuation
//! session id. Partial output is surfaced through a chunk callback while the
//! invocation is in flight.

mod cli;

pub use cli::CliWorker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::agent::AgentProfile;
use crate::Result;

/// Token counts reported by one worker invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens sent to the model
    pub input_tokens: u64,
    /// Tokens received from the model
    pub output_tokens: u64,
    /// Total tokens
    pub total_tokens: u64,
    /// Cost in currency units, when the backend reports one
    #[serde(default)]
    pub cost: Option<f64>,
}

impl TokenUsage {
    /// Usage from input/output counts; total is derived.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            cost: None,
        }
    }

    /// Additively fold another usage record into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        self.cost = match (self.cost, other.cost) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
    }
}

/// Final result of one worker invocation
#[derive(Debug, Clone, Default)]
pub struct WorkerOutcome {
    /// Whether the worker reported success
    pub success: bool,
    /// Complete output text
    pub output: String,
    /// Error description when the worker failed
    pub error: Option<String>,
    /// Subprocess exit code, when the backend is process-based
    pub exit_code: Option<i32>,
    /// Token usage, when the backend reported or estimated it
    pub usage: Option<TokenUsage>,
    /// Continuation session id for reusing worker-side context
    pub session_id: Option<String>,
}

impl WorkerOutcome {
    /// A failed outcome carrying only an error description
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Callback receiving partial output chunks as the worker produces them
pub type ChunkSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Core worker contract
#[async_trait]
pub trait Worker: Send + Sync {
    /// Name of this worker backend
    fn name(&self) -> &str;

    /// Run one invocation for `profile` with `prompt`.
    ///
    /// `resume` carries a continuation session id from a prior invocation of
    /// the same role, letting the backend skip re-sending system context.
    /// Each partial output chunk is forwarded to `on_chunk` before the final
    /// outcome resolves. A cancelled token asks the backend to abort; the
    /// outcome returned afterwards is unspecified and callers resolve the
    /// race in favor of their own stop handling.
    ///
    /// `Err` means the invocation could not run at all (spawn failure); a
    /// worker-reported failure is `Ok` with `success == false`. Both are
    /// retryable from the caller's perspective.
    async fn invoke(
        &self,
        profile: &AgentProfile,
        prompt: &str,
        resume: Option<&str>,
        on_chunk: ChunkSink<'_>,
        cancel: CancellationToken,
    ) -> Result<WorkerOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_new_derives_total() {
        let usage = TokenUsage::new(100, 40);
        assert_eq!(usage.total_tokens, 140);
        assert_eq!(usage.cost, None);
    }

    #[test]
    fn test_usage_add_is_additive() {
        let mut a = TokenUsage::new(100, 40);
        a.add(&TokenUsage::new(10, 5));
        assert_eq!(a.input_tokens, 110);
        assert_eq!(a.output_tokens, 45);
        assert_eq!(a.total_tokens, 155);
    }

    #[test]
    fn test_usage_add_cost_handling() {
        let mut a = TokenUsage {
            cost: Some(0.5),
            ..TokenUsage::new(1, 1)
        };
        a.add(&TokenUsage {
            cost: Some(0.25),
            ..TokenUsage::new(1, 1)
        });
        assert_eq!(a.cost, Some(0.75));

        let mut b = TokenUsage::new(1, 1);
        b.add(&TokenUsage {
            cost: Some(0.25),
            ..TokenUsage::new(1, 1)
        });
        assert_eq!(b.cost, Some(0.25));
    }
}
