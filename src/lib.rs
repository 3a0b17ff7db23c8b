//! Troupe: role-based agent orchestration
//!
//! A tight Rust binary that runs a troupe of language-model agents (each a
//! named profile with its own instructions and capabilities) across three
//! fixed execution topologies, with per-step retry, cancellation, live
//! state observation, and token/cost accounting.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          WorkflowExecutor               │
//! │  sequential | parallel | fan-out        │
//! └────────────────────┬────────────────────┘
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │          AgentTaskRunner                │
//! │  resolve profile → invoke → retry       │
//! └──────┬──────────────────────┬───────────┘
//!        ▼                      ▼
//! ┌─────────────┐      ┌─────────────────┐
//! │ StateStore  │      │ AccountingStore │
//! │ (observable)│      │ (tokens, cost)  │
//! └─────────────┘      └─────────────────┘
//! ```
//!
//! Every store is explicitly constructed and injected; change notification
//! flows through a single [`events::EventBus`] that the UI front-end
//! subscribes to.

pub mod accounting;
pub mod agent;
pub mod config;
pub mod events;
pub mod session;
pub mod state;
pub mod worker;
pub mod workflow;

// Re-exports for convenience
pub use accounting::{AccountingSnapshot, AccountingStore, Budget};
pub use agent::{AgentProfile, AgentRegistry, AgentRole, AgentTaskRunner, TaskResult};
pub use config::Config;
pub use events::{Event, EventBus};
pub use session::SessionTracker;
pub use state::{AgentExecutionState, StateStore, WorkflowExecutionState};
pub use worker::{CliWorker, TokenUsage, Worker, WorkerOutcome};
pub use workflow::{WorkflowDefinition, WorkflowExecutor, WorkflowPattern};

/// Crate-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
