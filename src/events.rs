//! Change notification for the observer/UI surface
//!
//! The stores publish typed events through an explicit subscriber registry.
//! Emission is synchronous and in-order: every subscriber live at the moment
//! of emission receives the event before `emit` returns. Subscribers whose
//! receiving end has been dropped are pruned on the next emit.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::agent::AgentRole;
use crate::state::{AgentExecutionState, WorkflowExecutionState};

/// Events published by the orchestrator stores
#[derive(Debug, Clone)]
pub enum Event {
    /// An agent's execution state changed (start, partial output, completion)
    RoleStateChanged { state: AgentExecutionState },
    /// An agent's execution state was explicitly cleared
    RoleStateCleared { role: AgentRole },
    /// A workflow's execution state changed
    WorkflowStateChanged { state: WorkflowExecutionState },
    /// Every agent and workflow state was reset
    AllStatesReset,
    /// A workflow's pattern ran to completion
    WorkflowCompleted {
        id: String,
        outputs: HashMap<AgentRole, String>,
    },
    /// Daily token usage crossed the configured warning fraction
    BudgetWarning {
        daily_tokens: u64,
        daily_limit: u64,
        fraction: f64,
    },
    /// Daily token usage reached or passed the daily limit
    BudgetExceeded { daily_tokens: u64, daily_limit: u64 },
}

/// Subscriber registry the stores publish through
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber. Events emitted after this call are
    /// delivered to the returned receiver in emission order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Deliver an event to every current subscriber, dropping any whose
    /// receiver has gone away.
    pub fn emit(&self, event: Event) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers (primarily for diagnostics)
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(Event::AllStatesReset);
        bus.emit(Event::RoleStateCleared {
            role: AgentRole::Scout,
        });

        assert!(matches!(rx.try_recv().unwrap(), Event::AllStatesReset));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Event::RoleStateCleared { role: AgentRole::Scout }
        ));
    }

    #[test]
    fn test_dropped_subscriber_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);

        bus.emit(Event::AllStatesReset);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.emit(Event::AllStatesReset);

        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
