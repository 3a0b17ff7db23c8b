//! Per-agent task execution with retry
//!
//! The runner is the unit of work the workflow patterns are built from: one
//! call resolves the profile, drives the worker invocation, mirrors progress
//! into the state store, and feeds reported token usage to accounting.
//! Failures are retried with a rebuilt prompt up to the configured maximum;
//! a stopped invocation is never retried.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::profile::AgentRegistry;
use super::role::AgentRole;
use crate::accounting::AccountingStore;
use crate::session::SessionTracker;
use crate::state::StateStore;
use crate::worker::{TokenUsage, Worker, WorkerOutcome};

/// Final result of one (possibly retried) agent execution
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub usage: Option<TokenUsage>,
    /// Continuation id for reusing the worker-side session later
    pub continuation_session_id: Option<String>,
}

impl TaskResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            usage: None,
            continuation_session_id: None,
        }
    }
}

/// Executes single agent invocations against the worker contract
pub struct AgentTaskRunner {
    registry: Arc<AgentRegistry>,
    worker: Arc<dyn Worker>,
    state: Arc<StateStore>,
    accounting: Arc<AccountingStore>,
    sessions: Arc<SessionTracker>,
    /// Retries allowed after the first attempt
    max_retries: u32,
    /// Model used when a profile has no model or tier hint
    default_model: String,
}

impl AgentTaskRunner {
    pub fn new(
        registry: Arc<AgentRegistry>,
        worker: Arc<dyn Worker>,
        state: Arc<StateStore>,
        accounting: Arc<AccountingStore>,
        sessions: Arc<SessionTracker>,
        max_retries: u32,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            worker,
            state,
            accounting,
            sessions,
            max_retries,
            default_model: default_model.into(),
        }
    }

    /// Run `role` with `prompt`, retrying failed attempts up to the
    /// configured maximum.
    ///
    /// Each attempt overwrites the role's execution state, so observers see
    /// the retry count and timestamps of the latest attempt only. A missing
    /// profile fails immediately without touching any store.
    pub async fn execute(&self, role: AgentRole, prompt: &str) -> TaskResult {
        let Some(profile) = self.registry.get(role) else {
            return TaskResult::failed(format!("no profile registered for role {}", role));
        };
        let profile = profile.clone();
        let model = profile.resolved_model(&self.default_model).to_string();

        let mut attempt: u32 = 0;
        let mut current_prompt = prompt.to_string();

        // Bounded retry loop carrying (attempt, last error, current prompt)
        loop {
            let cancel = CancellationToken::new();
            self.state.begin_run(role, attempt, cancel.clone());
            debug!("Running agent {} (attempt {})", role, attempt);

            let resume = self.sessions.continuation_id(role);
            let state = self.state.clone();
            let mut on_chunk = move |chunk: &str| state.append_output(role, chunk);

            let outcome = match self
                .worker
                .invoke(
                    &profile,
                    &current_prompt,
                    resume.as_deref(),
                    &mut on_chunk,
                    cancel.clone(),
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => WorkerOutcome::failed(format!("worker invocation failed: {}", e)),
            };

            if cancel.is_cancelled() {
                // stop() already forced the state to Stopped; whatever the
                // worker eventually reported loses the race.
                info!("Agent {} stopped", role);
                return TaskResult {
                    success: false,
                    output: outcome.output,
                    error: Some("stopped".to_string()),
                    usage: None,
                    continuation_session_id: None,
                };
            }

            self.state.finish_run(
                role,
                outcome.success,
                outcome.output.clone(),
                outcome.error.clone(),
                outcome.usage,
            );
            if let Some(usage) = outcome.usage {
                self.accounting.record_usage(role, usage, &model);
            }

            if outcome.success {
                self.sessions.record_exchange(
                    role,
                    &current_prompt,
                    &outcome.output,
                    outcome.session_id.as_deref(),
                    outcome.usage,
                );
                info!("Agent {} completed", role);
                return TaskResult {
                    success: true,
                    output: outcome.output,
                    error: None,
                    usage: outcome.usage,
                    continuation_session_id: outcome.session_id,
                };
            }

            let error = outcome
                .error
                .clone()
                .unwrap_or_else(|| "worker reported failure".to_string());

            if attempt < self.max_retries {
                attempt += 1;
                warn!(
                    "Agent {} failed: {} - retry attempt {} of {}",
                    role, error, attempt, self.max_retries
                );
                current_prompt = build_retry_prompt(
                    &profile.instructions,
                    &current_prompt,
                    &error,
                    attempt,
                    self.max_retries,
                );
                continue;
            }

            warn!("Agent {} failed after {} attempts: {}", role, attempt + 1, error);
            return TaskResult {
                success: false,
                output: outcome.output,
                error: Some(error),
                usage: outcome.usage,
                continuation_session_id: outcome.session_id,
            };
        }
    }
}

/// Rebuild the prompt for a retry, embedding the instructions, the prompt
/// that failed, and the error it failed with.
fn build_retry_prompt(
    instructions: &str,
    failed_prompt: &str,
    error: &str,
    attempt: u32,
    max_retries: u32,
) -> String {
    format!(
        "Retry attempt {attempt} of {max_retries}.\n\n\
         The previous attempt failed with:\n{error}\n\n\
         Agent instructions:\n{instructions}\n\n\
         Previous prompt:\n{failed_prompt}\n\n\
         Address the failure and complete the task."
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::accounting::MemorySnapshotStore;
    use crate::agent::AgentProfile;
    use crate::events::EventBus;
    use crate::state::AgentStatus;
    use crate::worker::ChunkSink;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Worker that replays a scripted list of outcomes
    pub(crate) struct ScriptedWorker {
        outcomes: Mutex<VecDeque<WorkerOutcome>>,
        pub calls: AtomicUsize,
        pub prompts: Mutex<Vec<String>>,
        /// Chunks streamed before each outcome resolves
        pub chunks: Vec<String>,
        /// Park until cancelled instead of resolving
        pub wait_for_cancel: bool,
    }

    impl ScriptedWorker {
        pub fn new(outcomes: Vec<WorkerOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
                chunks: Vec::new(),
                wait_for_cancel: false,
            }
        }

        pub fn ok(output: &str) -> WorkerOutcome {
            WorkerOutcome {
                success: true,
                output: output.to_string(),
                ..Default::default()
            }
        }

        pub fn err(error: &str) -> WorkerOutcome {
            WorkerOutcome::failed(error)
        }
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(
            &self,
            _profile: &AgentProfile,
            prompt: &str,
            _resume: Option<&str>,
            on_chunk: ChunkSink<'_>,
            cancel: CancellationToken,
        ) -> crate::Result<WorkerOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());

            if self.wait_for_cancel {
                cancel.cancelled().await;
                return Ok(WorkerOutcome::failed("cancelled"));
            }

            for chunk in &self.chunks {
                on_chunk(chunk);
            }

            Ok(self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| WorkerOutcome::failed("script exhausted")))
        }
    }

    pub(crate) struct Fixture {
        pub events: Arc<EventBus>,
        pub state: Arc<StateStore>,
        pub accounting: Arc<AccountingStore>,
        pub sessions: Arc<SessionTracker>,
    }

    impl Fixture {
        pub fn new() -> Self {
            let events = Arc::new(EventBus::new());
            let state = Arc::new(StateStore::new(events.clone()));
            let accounting = Arc::new(AccountingStore::new(
                Arc::new(MemorySnapshotStore::new()),
                events.clone(),
                None,
            ));
            Self {
                events,
                state,
                accounting,
                sessions: Arc::new(SessionTracker::new()),
            }
        }

        pub fn runner(&self, worker: Arc<dyn Worker>, max_retries: u32) -> AgentTaskRunner {
            AgentTaskRunner::new(
                Arc::new(AgentRegistry::builtin()),
                worker,
                self.state.clone(),
                self.accounting.clone(),
                self.sessions.clone(),
                max_retries,
                "sonnet",
            )
        }
    }

    #[tokio::test]
    async fn test_missing_profile_fails_without_state_mutation() {
        let fx = Fixture::new();
        let worker = Arc::new(ScriptedWorker::new(vec![ScriptedWorker::ok("unused")]));
        let runner = AgentTaskRunner::new(
            Arc::new(AgentRegistry::from_profiles(vec![])),
            worker.clone(),
            fx.state.clone(),
            fx.accounting.clone(),
            fx.sessions.clone(),
            3,
            "sonnet",
        );

        let result = runner.execute(AgentRole::Planner, "plan this").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no profile"));
        assert!(fx.state.agent_state(AgentRole::Planner).is_none());
        assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_updates_state_and_accounting() {
        let fx = Fixture::new();
        let mut outcome = ScriptedWorker::ok("all done");
        outcome.usage = Some(TokenUsage::new(100, 40));
        outcome.session_id = Some("sess-1".to_string());
        let worker = Arc::new(ScriptedWorker::new(vec![outcome]));
        let runner = fx.runner(worker, 2);

        let result = runner.execute(AgentRole::Scout, "find it").await;
        assert!(result.success);
        assert_eq!(result.output, "all done");
        assert_eq!(result.continuation_session_id.as_deref(), Some("sess-1"));

        let state = fx.state.agent_state(AgentRole::Scout).unwrap();
        assert_eq!(state.status, AgentStatus::Completed);
        assert_eq!(state.retry_count, 0);

        let snapshot = fx.accounting.snapshot();
        assert_eq!(snapshot.totals.total_tokens, 140);
        assert_eq!(
            fx.sessions.continuation_id(AgentRole::Scout).as_deref(),
            Some("sess-1")
        );
    }

    #[tokio::test]
    async fn test_partial_chunks_reach_state() {
        let fx = Fixture::new();
        let mut worker = ScriptedWorker::new(vec![ScriptedWorker::ok("ab")]);
        worker.chunks = vec!["a".to_string(), "b".to_string()];
        let runner = fx.runner(Arc::new(worker), 0);

        // Subscribe before running so every chunk notification is observed
        let mut rx = fx.events.subscribe();
        let result = runner.execute(AgentRole::Scout, "go").await;
        assert!(result.success);

        let mut notifications = 0;
        while rx.try_recv().is_ok() {
            notifications += 1;
        }
        // begin + 2 chunks + finish
        assert_eq!(notifications, 4);
    }

    #[tokio::test]
    async fn test_fails_n_times_then_succeeds() {
        let fx = Fixture::new();
        let worker = Arc::new(ScriptedWorker::new(vec![
            ScriptedWorker::err("boom 1"),
            ScriptedWorker::err("boom 2"),
            ScriptedWorker::ok("third time lucky"),
        ]));
        let runner = fx.runner(worker.clone(), 3);

        let result = runner.execute(AgentRole::Tester, "run tests").await;
        assert!(result.success);
        assert_eq!(worker.calls.load(Ordering::SeqCst), 3);

        // State reflects the final (second retry) attempt
        let state = fx.state.agent_state(AgentRole::Tester).unwrap();
        assert_eq!(state.retry_count, 2);
        assert_eq!(state.status, AgentStatus::Completed);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_failure() {
        let fx = Fixture::new();
        let worker = Arc::new(ScriptedWorker::new(vec![
            ScriptedWorker::err("boom 1"),
            ScriptedWorker::err("boom 2"),
        ]));
        let runner = fx.runner(worker.clone(), 1);

        let result = runner.execute(AgentRole::Tester, "run tests").await;
        assert!(!result.success);
        // max retries 1 = two attempts total
        assert_eq!(worker.calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.error.as_deref(), Some("boom 2"));
        assert_eq!(
            fx.state.agent_state(AgentRole::Tester).unwrap().status,
            AgentStatus::Error
        );
    }

    #[tokio::test]
    async fn test_retry_prompt_embeds_failure_context() {
        let fx = Fixture::new();
        let worker = Arc::new(ScriptedWorker::new(vec![
            ScriptedWorker::err("missing file"),
            ScriptedWorker::ok("fixed"),
        ]));
        let runner = fx.runner(worker.clone(), 2);

        runner.execute(AgentRole::Implementer, "build the thing").await;

        let prompts = worker.prompts.lock().unwrap();
        assert_eq!(prompts[0], "build the thing");
        assert!(prompts[1].contains("Retry attempt 1 of 2"));
        assert!(prompts[1].contains("missing file"));
        assert!(prompts[1].contains("build the thing"));
        // The profile instructions ride along on the rebuilt prompt
        assert!(prompts[1].contains("implementation specialist"));
    }

    #[tokio::test]
    async fn test_stop_wins_and_suppresses_retry() {
        let fx = Fixture::new();
        let mut worker = ScriptedWorker::new(vec![]);
        worker.wait_for_cancel = true;
        let worker = Arc::new(worker);
        let runner = Arc::new(fx.runner(worker.clone(), 5));

        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.execute(AgentRole::Scout, "long task").await })
        };

        // Let the invocation start, then stop it
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        fx.state.stop(AgentRole::Scout);

        let result = handle.await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("stopped"));
        // One attempt only: a stopped run is never retried
        assert_eq!(worker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            fx.state.agent_state(AgentRole::Scout).unwrap().status,
            AgentStatus::Stopped
        );
    }
}
