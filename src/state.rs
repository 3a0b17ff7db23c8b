//! Observable execution state for agents and workflows
//!
//! The [`StateStore`] is the authoritative record of what every agent and
//! workflow is doing right now. Every mutation emits a typed event through
//! the injected [`EventBus`]; observers never poll. The store also owns the
//! per-role cancellation handles that `stop` and `stop_all` act on.
//!
//! One live execution record per role: starting a role that is already
//! running overwrites the previous record without cancelling its worker.
//! Callers that want cancel-and-replace must call [`StateStore::stop`] first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::agent::AgentRole;
use crate::events::{Event, EventBus};
use crate::worker::TokenUsage;

/// Execution status of a single agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// No run has started since creation or the last clear
    Idle,
    /// A worker invocation is in flight
    Running,
    /// Last run finished successfully
    Completed,
    /// Last run failed
    Error,
    /// Last run was cancelled
    Stopped,
}

/// Live execution record for one agent role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionState {
    pub role: AgentRole,
    pub status: AgentStatus,
    /// Output accumulated so far (partial while running, final afterwards)
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Retry attempt the record reflects (0 = first attempt)
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

/// Execution status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Idle,
    Running,
    Completed,
    Error,
}

/// Live execution record for one workflow id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionState {
    /// Workflow definition id
    pub id: String,
    /// Unique id for this particular run
    pub run_id: Uuid,
    pub status: WorkflowStatus,
    /// Index of the step in flight; meaningful for sequential runs only
    #[serde(default)]
    pub current_step: usize,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Flat serialized form of the store for optional external persistence
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateSnapshot {
    #[serde(default)]
    agents: Vec<AgentExecutionState>,
    #[serde(default)]
    workflows: Vec<WorkflowExecutionState>,
}

#[derive(Default)]
struct Inner {
    agents: HashMap<AgentRole, AgentExecutionState>,
    workflows: HashMap<String, WorkflowExecutionState>,
    cancellations: HashMap<AgentRole, CancellationToken>,
}

/// Observable store of agent and workflow execution state
pub struct StateStore {
    inner: Mutex<Inner>,
    events: Arc<EventBus>,
}

impl StateStore {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    /// Record the start of a run attempt for `role`, overwriting any prior
    /// record, and register its cancellation handle.
    pub fn begin_run(&self, role: AgentRole, retry_count: u32, cancel: CancellationToken) {
        let state = {
            let mut inner = self.inner.lock().unwrap();
            let state = AgentExecutionState {
                role,
                status: AgentStatus::Running,
                output: String::new(),
                error: None,
                started_at: Some(Utc::now()),
                finished_at: None,
                retry_count,
                usage: None,
            };
            inner.agents.insert(role, state.clone());
            inner.cancellations.insert(role, cancel);
            state
        };
        self.events.emit(Event::RoleStateChanged { state });
    }

    /// Append a partial output chunk to a running role and notify observers.
    pub fn append_output(&self, role: AgentRole, chunk: &str) {
        let state = {
            let mut inner = self.inner.lock().unwrap();
            match inner.agents.get_mut(&role) {
                Some(state) => {
                    state.output.push_str(chunk);
                    state.clone()
                }
                None => return,
            }
        };
        self.events.emit(Event::RoleStateChanged { state });
    }

    /// Record the end of a run attempt.
    ///
    /// If the role was stopped while the worker was in flight, the record
    /// stays `Stopped` no matter what the worker reported: the race between
    /// a stop and a late completion resolves in favor of the stop.
    pub fn finish_run(
        &self,
        role: AgentRole,
        success: bool,
        output: String,
        error: Option<String>,
        usage: Option<TokenUsage>,
    ) {
        let state = {
            let mut inner = self.inner.lock().unwrap();
            inner.cancellations.remove(&role);
            match inner.agents.get_mut(&role) {
                Some(state) => {
                    state.finished_at = Some(Utc::now());
                    if state.status != AgentStatus::Stopped {
                        state.status = if success {
                            AgentStatus::Completed
                        } else {
                            AgentStatus::Error
                        };
                        state.output = output;
                        state.error = error;
                        state.usage = usage;
                    }
                    state.clone()
                }
                None => return,
            }
        };
        self.events.emit(Event::RoleStateChanged { state });
    }

    /// Cancel and forget the role's in-flight invocation, forcing its state
    /// to `Stopped`. A role that is not running is left untouched.
    pub fn stop(&self, role: AgentRole) {
        let state = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(cancel) = inner.cancellations.remove(&role) {
                cancel.cancel();
            }
            match inner.agents.get_mut(&role) {
                Some(state) if state.status == AgentStatus::Running => {
                    state.status = AgentStatus::Stopped;
                    state.finished_at = Some(Utc::now());
                    state.clone()
                }
                _ => return,
            }
        };
        debug!("Stopped agent {}", role);
        self.events.emit(Event::RoleStateChanged { state });
    }

    /// Stop every role that is currently running.
    pub fn stop_all(&self) {
        let running: Vec<AgentRole> = {
            let inner = self.inner.lock().unwrap();
            inner
                .agents
                .values()
                .filter(|s| s.status == AgentStatus::Running)
                .map(|s| s.role)
                .collect()
        };
        for role in running {
            self.stop(role);
        }
    }

    /// Delete a role's execution record entirely.
    pub fn clear(&self, role: AgentRole) {
        let existed = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(cancel) = inner.cancellations.remove(&role) {
                cancel.cancel();
            }
            inner.agents.remove(&role).is_some()
        };
        if existed {
            self.events.emit(Event::RoleStateCleared { role });
        }
    }

    /// Drop every agent and workflow record and cancel all handles.
    pub fn reset_all(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            for cancel in inner.cancellations.values() {
                cancel.cancel();
            }
            inner.cancellations.clear();
            inner.agents.clear();
            inner.workflows.clear();
        }
        self.events.emit(Event::AllStatesReset);
    }

    /// Snapshot of one agent's state
    pub fn agent_state(&self, role: AgentRole) -> Option<AgentExecutionState> {
        self.inner.lock().unwrap().agents.get(&role).cloned()
    }

    /// Snapshots of every agent state, in role order
    pub fn agent_states(&self) -> Vec<AgentExecutionState> {
        let mut states: Vec<_> = self.inner.lock().unwrap().agents.values().cloned().collect();
        states.sort_by_key(|s| s.role);
        states
    }

    /// Create a fresh running record for a workflow id, replacing any prior
    /// record for the same id (re-running never resumes).
    pub fn begin_workflow(&self, id: &str) -> WorkflowExecutionState {
        let state = WorkflowExecutionState {
            id: id.to_string(),
            run_id: Uuid::new_v4(),
            status: WorkflowStatus::Running,
            current_step: 0,
            started_at: Some(Utc::now()),
            finished_at: None,
        };
        self.inner
            .lock()
            .unwrap()
            .workflows
            .insert(id.to_string(), state.clone());
        self.events.emit(Event::WorkflowStateChanged {
            state: state.clone(),
        });
        state
    }

    /// Advance the current step index of a sequential workflow.
    pub fn set_current_step(&self, id: &str, step: usize) {
        let state = {
            let mut inner = self.inner.lock().unwrap();
            match inner.workflows.get_mut(id) {
                Some(state) => {
                    state.current_step = step;
                    state.clone()
                }
                None => return,
            }
        };
        self.events.emit(Event::WorkflowStateChanged { state });
    }

    /// Finalize a workflow record as completed or errored.
    pub fn finish_workflow(&self, id: &str, success: bool) {
        let state = {
            let mut inner = self.inner.lock().unwrap();
            match inner.workflows.get_mut(id) {
                Some(state) => {
                    state.status = if success {
                        WorkflowStatus::Completed
                    } else {
                        WorkflowStatus::Error
                    };
                    state.finished_at = Some(Utc::now());
                    state.clone()
                }
                None => return,
            }
        };
        self.events.emit(Event::WorkflowStateChanged { state });
    }

    /// Snapshot of one workflow's state
    pub fn workflow_state(&self, id: &str) -> Option<WorkflowExecutionState> {
        self.inner.lock().unwrap().workflows.get(id).cloned()
    }

    /// Export the full store as a flat JSON structure.
    pub fn export(&self) -> String {
        let snapshot = {
            let inner = self.inner.lock().unwrap();
            let mut agents: Vec<_> = inner.agents.values().cloned().collect();
            agents.sort_by_key(|s| s.role);
            let mut workflows: Vec<_> = inner.workflows.values().cloned().collect();
            workflows.sort_by(|a, b| a.id.cmp(&b.id));
            StateSnapshot { agents, workflows }
        };
        // A snapshot of plain data types serializes infallibly
        serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".to_string())
    }

    /// Import a previously exported snapshot, replacing current records.
    ///
    /// A malformed snapshot is logged and ignored; the store keeps its prior
    /// contents. Returns whether the import was applied.
    pub fn import(&self, json: &str) -> bool {
        let snapshot: StateSnapshot = match serde_json::from_str(json) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ignoring malformed state snapshot: {}", e);
                return false;
            }
        };

        {
            let mut inner = self.inner.lock().unwrap();
            inner.agents = snapshot
                .agents
                .into_iter()
                .map(|state| (state.role, state))
                .collect();
            inner.workflows = snapshot
                .workflows
                .into_iter()
                .map(|state| (state.id.clone(), state))
                .collect();
        }
        self.events.emit(Event::AllStatesReset);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (Arc<EventBus>, StateStore) {
        let events = Arc::new(EventBus::new());
        let store = StateStore::new(events.clone());
        (events, store)
    }

    #[test]
    fn test_begin_and_finish_run() {
        let (_, store) = store();
        store.begin_run(AgentRole::Scout, 0, CancellationToken::new());

        let state = store.agent_state(AgentRole::Scout).unwrap();
        assert_eq!(state.status, AgentStatus::Running);
        assert!(state.started_at.is_some());

        store.finish_run(
            AgentRole::Scout,
            true,
            "found it".to_string(),
            None,
            Some(TokenUsage::new(10, 5)),
        );
        let state = store.agent_state(AgentRole::Scout).unwrap();
        assert_eq!(state.status, AgentStatus::Completed);
        assert_eq!(state.output, "found it");
        assert!(state.finished_at.is_some());
    }

    #[test]
    fn test_partial_output_accumulates_and_notifies() {
        let (events, store) = store();
        let mut rx = events.subscribe();

        store.begin_run(AgentRole::Scout, 0, CancellationToken::new());
        store.append_output(AgentRole::Scout, "hello ");
        store.append_output(AgentRole::Scout, "world");

        assert_eq!(store.agent_state(AgentRole::Scout).unwrap().output, "hello world");

        // begin + two chunks = three notifications
        let mut seen = 0;
        while rx.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_stop_running_role() {
        let (_, store) = store();
        let cancel = CancellationToken::new();
        store.begin_run(AgentRole::Tester, 0, cancel.clone());

        store.stop(AgentRole::Tester);
        assert!(cancel.is_cancelled());
        assert_eq!(
            store.agent_state(AgentRole::Tester).unwrap().status,
            AgentStatus::Stopped
        );

        // Handle is gone: a second stop is a no-op
        store.stop(AgentRole::Tester);
    }

    #[test]
    fn test_stop_idle_role_is_noop() {
        let (events, store) = store();
        let mut rx = events.subscribe();

        store.stop(AgentRole::Planner);
        assert!(store.agent_state(AgentRole::Planner).is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_wins_over_late_completion() {
        let (_, store) = store();
        store.begin_run(AgentRole::Implementer, 0, CancellationToken::new());
        store.stop(AgentRole::Implementer);

        // The worker resolves afterwards claiming success; stop wins
        store.finish_run(
            AgentRole::Implementer,
            true,
            "late output".to_string(),
            None,
            None,
        );
        let state = store.agent_state(AgentRole::Implementer).unwrap();
        assert_eq!(state.status, AgentStatus::Stopped);
        assert_ne!(state.output, "late output");
    }

    #[test]
    fn test_stop_all_only_touches_running() {
        let (_, store) = store();
        store.begin_run(AgentRole::Scout, 0, CancellationToken::new());
        store.begin_run(AgentRole::Tester, 0, CancellationToken::new());
        store.finish_run(AgentRole::Tester, true, "ok".to_string(), None, None);

        store.stop_all();
        assert_eq!(store.agent_states().len(), 2);
        assert_eq!(
            store.agent_state(AgentRole::Scout).unwrap().status,
            AgentStatus::Stopped
        );
        assert_eq!(
            store.agent_state(AgentRole::Tester).unwrap().status,
            AgentStatus::Completed
        );
    }

    #[test]
    fn test_clear_and_reset_emit_events() {
        let (events, store) = store();
        store.begin_run(AgentRole::Scout, 0, CancellationToken::new());
        store.begin_workflow("feature");
        let mut rx = events.subscribe();

        store.clear(AgentRole::Scout);
        assert!(store.agent_state(AgentRole::Scout).is_none());
        assert!(matches!(
            rx.try_recv().unwrap(),
            Event::RoleStateCleared { role: AgentRole::Scout }
        ));

        store.reset_all();
        assert!(store.workflow_state("feature").is_none());
        assert!(matches!(rx.try_recv().unwrap(), Event::AllStatesReset));
    }

    #[test]
    fn test_workflow_records_are_fresh_per_run() {
        let (_, store) = store();
        let first = store.begin_workflow("feature");
        store.finish_workflow("feature", true);

        let second = store.begin_workflow("feature");
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(
            store.workflow_state("feature").unwrap().status,
            WorkflowStatus::Running
        );
    }

    #[test]
    fn test_export_import_round_trip() {
        let (_, store) = store();
        store.begin_run(AgentRole::Scout, 1, CancellationToken::new());
        store.finish_run(AgentRole::Scout, false, String::new(), Some("boom".to_string()), None);
        store.begin_workflow("feature");

        let exported = store.export();

        let (_, restored) = self::store();
        assert!(restored.import(&exported));
        let state = restored.agent_state(AgentRole::Scout).unwrap();
        assert_eq!(state.status, AgentStatus::Error);
        assert_eq!(state.error.as_deref(), Some("boom"));
        assert!(restored.workflow_state("feature").is_some());
    }

    #[test]
    fn test_malformed_import_leaves_store_unchanged() {
        let (_, store) = store();
        store.begin_run(AgentRole::Scout, 0, CancellationToken::new());

        assert!(!store.import("{ not json"));
        assert_eq!(
            store.agent_state(AgentRole::Scout).unwrap().status,
            AgentStatus::Running
        );
    }
}
