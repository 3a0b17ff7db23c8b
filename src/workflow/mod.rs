//! Workflow orchestration
//!
//! A workflow runs a list of agent steps under one of three fixed
//! topologies:
//!
//! - **Sequential**: one step at a time, each later step seeing prior
//!   outputs as appended context; the first failure aborts the run.
//! - **Parallel**: all steps at once, independently; failures are tolerated
//!   and simply missing from the result map.
//! - **Fan-out**: parallel steps followed by a single aggregation step that
//!   synthesizes the collected outputs into one recommendation.

pub mod definition;
pub mod executor;

pub use definition::{find_template, templates, WorkflowDefinition, WorkflowPattern, WorkflowStep};
pub use executor::WorkflowExecutor;
