// Node state machine and background loop supervision.
//
// INVARIANTS:
// 1. Every state change goes through `NodeState::can_transition_to`
// 2. A loop iteration that panics is logged and the loop keeps its schedule
// 3. Loops stop only when the shutdown channel fires or its sender is dropped

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use foldmesh_core::{now_millis, FoldMeshError, NodeState};
use futures::FutureExt;
use log::{error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::metrics::BoundedHistory;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: NodeState,
    pub to: NodeState,
    pub at: u64,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    node_id: String,
    state: NodeState,
    transitions: BoundedHistory<Transition>,
}

impl Lifecycle {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            state: NodeState::Initializing,
            transitions: BoundedHistory::new(),
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Move to `next`. Returns the previous state.
    pub fn transition(&mut self, next: NodeState) -> Result<NodeState, FoldMeshError> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(FoldMeshError::InvalidTransition {
                from: from.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.transitions.push(Transition { from, to: next, at: now_millis() });
        info!("[Lifecycle] node {} {} -> {}", self.node_id, from, next);
        Ok(from)
    }

    pub fn transitions(&self) -> Vec<Transition> {
        self.transitions.entries()
    }

    pub fn trim_history(&mut self, limit: usize) -> usize {
        self.transitions.trim(limit)
    }
}

/// Spawn a periodic loop that runs `tick` every `period` until shutdown.
///
/// The first tick fires one full period after spawning.
pub fn spawn_supervised<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let period = period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("[Lifecycle] {} loop shutting down", name);
                    break;
                }
                _ = interval.tick() => {
                    if let Err(panic) = AssertUnwindSafe(tick()).catch_unwind().await {
                        error!("[Lifecycle] {} loop iteration panicked: {}", name, panic_message(panic.as_ref()));
                    }
                }
            }
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
