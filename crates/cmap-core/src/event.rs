use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::{AgencyAddress, AgentId};

/// Where a routed message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    Local,
    Remote,
}

/// Lifecycle and routing events published inside one agency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Agent lifecycle ────────────────────────────────────────
    AgentStarted {
        agent_id: AgentId,
    },
    AgentTerminated {
        agent_id: AgentId,
    },
    AgentCrashed {
        agent_id: AgentId,
        reason: String,
    },

    // ── Message routing ────────────────────────────────────────
    MessageRouted {
        sender: AgentId,
        receiver: AgentId,
        route: RouteKind,
    },
    MessageDropped {
        sender: AgentId,
        receiver: AgentId,
        reason: String,
    },
    RemoteAgencyDiscovered {
        address: AgencyAddress,
    },
    DeliveryFailed {
        address: AgencyAddress,
        receiver: AgentId,
        reason: String,
    },

    // ── System ─────────────────────────────────────────────────
    Shutdown,
}

/// A broadcast-based event bus for agency-wide pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
