//! Workflow execution
//!
//! Dispatches a [`WorkflowDefinition`] to one of the three pattern
//! algorithms, using the [`AgentTaskRunner`] as the unit of work and the
//! [`StateStore`] for lifecycle bookkeeping. The returned map holds the
//! output of every step that succeeded; its key order carries no meaning.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::definition::{WorkflowDefinition, WorkflowPattern, WorkflowStep};
use crate::agent::{AgentRegistry, AgentRole, AgentTaskRunner};
use crate::events::{Event, EventBus};
use crate::state::StateStore;
use crate::{Error, Result};

/// Runs workflow definitions against the agent task runner
pub struct WorkflowExecutor {
    runner: Arc<AgentTaskRunner>,
    registry: Arc<AgentRegistry>,
    state: Arc<StateStore>,
    events: Arc<EventBus>,
}

impl WorkflowExecutor {
    pub fn new(
        runner: Arc<AgentTaskRunner>,
        registry: Arc<AgentRegistry>,
        state: Arc<StateStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            runner,
            registry,
            state,
            events,
        }
    }

    /// Execute `definition` with `initial_prompt`.
    ///
    /// Sequential failures are fatal: the error propagates and the workflow
    /// record ends in `Error`. Parallel and fan-out runs always complete;
    /// failed steps are simply absent from the returned map, so callers
    /// compare map size against step count to detect partial failure.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        initial_prompt: &str,
    ) -> Result<HashMap<AgentRole, String>> {
        info!(
            "Starting workflow {} ({} pattern, {} steps)",
            definition.id,
            definition.pattern,
            definition.steps.len()
        );
        self.state.begin_workflow(&definition.id);

        let result = match definition.pattern {
            WorkflowPattern::Sequential => self.run_sequential(definition, initial_prompt).await,
            WorkflowPattern::Parallel => {
                Ok(self.run_parallel(&definition.steps, initial_prompt).await)
            }
            WorkflowPattern::FanOut => Ok(self.run_fan_out(definition, initial_prompt).await),
        };

        match result {
            Ok(outputs) => {
                self.state.finish_workflow(&definition.id, true);
                info!(
                    "Workflow {} completed with {} outputs",
                    definition.id,
                    outputs.len()
                );
                self.events.emit(Event::WorkflowCompleted {
                    id: definition.id.clone(),
                    outputs: outputs.clone(),
                });
                Ok(outputs)
            }
            Err(e) => {
                self.state.finish_workflow(&definition.id, false);
                warn!("Workflow {} failed: {}", definition.id, e);
                Err(e)
            }
        }
    }

    /// Steps run one at a time; the first failure aborts the rest.
    ///
    /// The prompt sent to each step is the step's own input (or the original
    /// initial prompt) with a context block of all prior outputs appended.
    /// The preceding step's output is never substituted as the next step's
    /// primary instruction.
    async fn run_sequential(
        &self,
        definition: &WorkflowDefinition,
        initial_prompt: &str,
    ) -> Result<HashMap<AgentRole, String>> {
        let mut collected: Vec<(AgentRole, String)> = Vec::new();
        let mut outputs = HashMap::new();

        for (index, step) in definition.steps.iter().enumerate() {
            self.state.set_current_step(&definition.id, index);

            let mut prompt = step
                .input
                .clone()
                .unwrap_or_else(|| initial_prompt.to_string());
            if !collected.is_empty() {
                prompt.push_str(&self.context_block(&collected));
            }

            let result = self.runner.execute(step.role, &prompt).await;
            if !result.success {
                let error = result
                    .error
                    .unwrap_or_else(|| "agent reported failure".to_string());
                return Err(Error::Workflow(format!(
                    "step {} ({}) failed: {}",
                    index + 1,
                    step.role,
                    error
                )));
            }

            collected.push((step.role, result.output.clone()));
            outputs.insert(step.role, result.output);
        }

        Ok(outputs)
    }

    /// All steps submitted concurrently and awaited with settle-all
    /// semantics: no step's failure or slowness affects the others. Only
    /// successful outputs enter the map.
    async fn run_parallel(
        &self,
        steps: &[WorkflowStep],
        initial_prompt: &str,
    ) -> HashMap<AgentRole, String> {
        let invocations = steps.iter().map(|step| {
            let role = step.role;
            let prompt = step
                .input
                .clone()
                .unwrap_or_else(|| initial_prompt.to_string());
            async move { (role, self.runner.execute(role, &prompt).await) }
        });

        let settled = join_all(invocations).await;

        let mut outputs = HashMap::new();
        for (role, result) in settled {
            if result.success {
                outputs.insert(role, result.output);
            } else {
                debug!("Omitting failed step {} from workflow output", role);
            }
        }
        outputs
    }

    /// Parallel over the non-aggregator steps, then one synthesis pass.
    async fn run_fan_out(
        &self,
        definition: &WorkflowDefinition,
        initial_prompt: &str,
    ) -> HashMap<AgentRole, String> {
        let workers: Vec<WorkflowStep> = definition
            .steps
            .iter()
            .filter(|step| !step.role.is_aggregator())
            .cloned()
            .collect();

        let mut outputs = self.run_parallel(&workers, initial_prompt).await;
        if outputs.is_empty() {
            info!("No step succeeded; skipping aggregation");
            return outputs;
        }

        let prompt = self.synthesis_prompt(&outputs, initial_prompt);
        let result = self.runner.execute(AgentRole::Aggregator, &prompt).await;
        if result.success {
            outputs.insert(AgentRole::Aggregator, result.output);
        } else {
            warn!("Aggregation failed; returning unsynthesized outputs");
        }
        outputs
    }

    /// Fenced listing of prior agents' outputs, appended to sequential
    /// prompts.
    fn context_block(&self, collected: &[(AgentRole, String)]) -> String {
        let mut block = String::from("\n\n## Context from earlier agents\n");
        for (role, output) in collected {
            block.push_str(&format!(
                "\n### {}\n\n```\n{}\n```\n",
                self.display_name(*role),
                output
            ));
        }
        block
    }

    /// Prompt asking the aggregator to reconcile every collected output.
    fn synthesis_prompt(
        &self,
        outputs: &HashMap<AgentRole, String>,
        initial_prompt: &str,
    ) -> String {
        let mut roles: Vec<AgentRole> = outputs.keys().copied().collect();
        roles.sort();

        let mut prompt = format!(
            "Several agents worked independently on this task:\n\n{}\n\nTheir outputs follow.\n",
            initial_prompt
        );
        for role in roles {
            prompt.push_str(&format!(
                "\n### {}\n\n```\n{}\n```\n",
                self.display_name(role),
                outputs[&role]
            ));
        }
        prompt.push_str(
            "\nReconcile any conflicts between these outputs and produce a \
             single unified recommendation.",
        );
        prompt
    }

    fn display_name(&self, role: AgentRole) -> String {
        self.registry
            .get(role)
            .map(|profile| profile.display_name.clone())
            .unwrap_or_else(|| role.to_string())
    }
}
