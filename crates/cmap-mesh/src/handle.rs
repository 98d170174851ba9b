use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cmap_core::{AclMessage, AgencyError, AgentDescriptor, AgentId, AgentState, Result, Status};

/// Current lifecycle state of an agent and when it was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateRecord {
    pub state: AgentState,
    pub since: DateTime<Utc>,
}

impl StateRecord {
    fn now(state: AgentState) -> Self {
        Self {
            state,
            since: Utc::now(),
        }
    }
}

/// Routing table entry for one running agent.
///
/// Cloning is cheap; all clones share the inbox, the state cell and the kill
/// token. The `instance` id tells apart two contexts that carried the same
/// agent id. Whoever hosts the agent watches the kill token and tears the
/// context down when it fires.
#[derive(Clone)]
pub struct AgentHandle {
    descriptor: Arc<AgentDescriptor>,
    instance: Uuid,
    inbox: mpsc::Sender<AclMessage>,
    state: Arc<watch::Sender<StateRecord>>,
    kill: CancellationToken,
}

impl AgentHandle {
    pub fn new(descriptor: AgentDescriptor, inbox: mpsc::Sender<AclMessage>) -> Self {
        let (state, _) = watch::channel(StateRecord::now(AgentState::Starting));
        Self {
            descriptor: Arc::new(descriptor),
            instance: Uuid::new_v4(),
            inbox,
            state: Arc::new(state),
            kill: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> AgentId {
        self.descriptor.id
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> StateRecord {
        *self.state.borrow()
    }

    pub fn status(&self) -> Status {
        let record = self.state();
        Status::new(record.state, record.since)
    }

    /// Move to `state`. Terminal states are sticky, and reaching one fires
    /// the kill token.
    pub fn set_state(&self, state: AgentState) {
        self.state.send_if_modified(|current| {
            if is_terminal(current.state) || current.state == state {
                return false;
            }
            *current = StateRecord::now(state);
            true
        });
        if is_terminal(state) {
            self.kill.cancel();
        }
    }

    pub fn is_terminal(&self) -> bool {
        is_terminal(self.state().state)
    }

    /// Resolves once the agent reached `Terminated` or `Crashed`.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|record| is_terminal(record.state)).await;
    }

    pub fn watch_state(&self) -> watch::Receiver<StateRecord> {
        self.state.subscribe()
    }

    /// Push into the inbox, waiting while it is full. Gives up as soon as
    /// the agent is being terminated.
    pub async fn deliver(&self, msg: AclMessage) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.kill.cancelled() => Err(AgencyError::InboxClosed(self.id())),
            sent = self.inbox.send(msg) => sent.map_err(|_| AgencyError::InboxClosed(self.id())),
        }
    }

    /// Mark the agent `Terminating` and fire the kill token.
    pub fn terminate(&self) {
        self.set_state(AgentState::Terminating);
        self.kill.cancel();
    }

    pub fn kill_token(&self) -> CancellationToken {
        self.kill.clone()
    }
}

fn is_terminal(state: AgentState) -> bool {
    matches!(state, AgentState::Terminated | AgentState::Crashed)
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.id())
            .field("instance", &self.instance)
            .field("state", &self.state().state)
            .finish()
    }
}
