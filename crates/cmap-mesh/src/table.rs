use std::collections::HashMap;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use cmap_core::{AclMessage, AgencyAddress, AgencyError, AgentId, Event, Result};

use crate::delivery::DeliveryContext;
use crate::handle::AgentHandle;

/// How long an ended agent's last state stays queryable.
const RETIRED_TTL_SECS: i64 = 60;

/// Outbound queue of one remote agency.
#[derive(Clone, Debug)]
pub struct RemoteRoute {
    address: AgencyAddress,
    queue: mpsc::Sender<AclMessage>,
}

impl RemoteRoute {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether both routes feed the same delivery worker.
    pub fn same_queue(&self, other: &RemoteRoute) -> bool {
        self.queue.same_channel(&other.queue)
    }

    /// Enqueue for the agency's delivery worker, waiting while the queue is full.
    pub async fn send(&self, msg: AclMessage) -> Result<()> {
        self.queue.send(msg).await.map_err(|_| AgencyError::Delivery {
            address: self.address.clone(),
            reason: "delivery worker stopped".into(),
        })
    }
}

/// Where a receiver currently lives, as far as the table knows.
#[derive(Debug, Clone)]
pub enum Resolution {
    Local(AgentHandle),
    RemoteKnown(RemoteRoute),
    Unknown,
}

#[derive(Default)]
struct TableInner {
    local: HashMap<AgentId, AgentHandle>,
    retired: HashMap<AgentId, AgentHandle>,
    remote_agents: HashMap<AgentId, RemoteRoute>,
    remote_agencies: HashMap<AgencyAddress, RemoteRoute>,
}

impl TableInner {
    fn retire(&mut self, handle: AgentHandle) {
        self.prune_retired();
        self.retired.insert(handle.id(), handle);
    }

    /// Drop ended agents whose final state is older than the TTL.
    fn prune_retired(&mut self) {
        let cutoff = Utc::now() - Duration::seconds(RETIRED_TTL_SECS);
        self.retired.retain(|_, h| {
            let record = h.state();
            !(h.is_terminal() && record.since < cutoff)
        });
    }
}

/// The agency's routing state: local agents, learned remote agents and one
/// delivery queue per remote agency.
///
/// An agent id is either local or remote, never both. All mutations happen
/// under one lock; callers receive clones and do their waiting outside it.
pub struct RoutingTable {
    inner: Mutex<TableInner>,
    delivery: DeliveryContext,
}

impl RoutingTable {
    pub fn new(delivery: DeliveryContext) -> Self {
        Self {
            inner: Mutex::new(TableInner::default()),
            delivery,
        }
    }

    // ── Local agents ───────────────────────────────────────────

    /// Insert a local agent. Any remote route learned for its id is forgotten.
    pub fn register_local(&self, handle: AgentHandle) -> Result<()> {
        let id = handle.id();
        let mut inner = self.inner.lock();
        if inner.local.contains_key(&id) {
            return Err(AgencyError::DuplicateAgent(id));
        }
        if inner.remote_agents.remove(&id).is_some() {
            debug!(agent_id = id, "agent moved in, dropping remote route");
        }
        inner.retired.remove(&id);
        inner.local.insert(id, handle);
        Ok(())
    }

    /// Remove a local agent and stop its context.
    pub fn unregister_local(&self, id: AgentId) -> Result<AgentHandle> {
        let handle = {
            let mut inner = self.inner.lock();
            let handle = inner.local.remove(&id).ok_or(AgencyError::AgentNotFound(id))?;
            inner.retire(handle.clone());
            handle
        };
        handle.terminate();
        info!(agent_id = id, "agent removed");
        Ok(handle)
    }

    /// Remove the entry for `id` only if it still belongs to `instance`.
    pub fn remove_instance(&self, id: AgentId, instance: Uuid) -> Option<AgentHandle> {
        let mut inner = self.inner.lock();
        let handle = match inner.local.get(&id) {
            Some(h) if h.instance() == instance => inner.local.remove(&id)?,
            _ => return None,
        };
        inner.retire(handle.clone());
        Some(handle)
    }

    /// Handle of an agent that left the table within the last minute.
    pub fn retired_handle(&self, id: AgentId) -> Option<AgentHandle> {
        let mut inner = self.inner.lock();
        inner.prune_retired();
        inner.retired.get(&id).cloned()
    }

    pub fn local_handle(&self, id: AgentId) -> Option<AgentHandle> {
        self.inner.lock().local.get(&id).cloned()
    }

    pub fn is_local(&self, id: AgentId) -> bool {
        self.inner.lock().local.contains_key(&id)
    }

    /// All local agents, ordered by id.
    pub fn local_snapshot(&self) -> Vec<AgentHandle> {
        let mut handles: Vec<AgentHandle> = self.inner.lock().local.values().cloned().collect();
        handles.sort_by_key(|h| h.id());
        handles
    }

    /// Empty the local table, returning the removed handles.
    pub fn drain_local(&self) -> Vec<AgentHandle> {
        let mut inner = self.inner.lock();
        let mut handles: Vec<AgentHandle> = inner.local.drain().map(|(_, h)| h).collect();
        for h in &handles {
            inner.retire(h.clone());
        }
        drop(inner);
        handles.sort_by_key(|h| h.id());
        handles
    }

    // ── Lookup ─────────────────────────────────────────────────

    pub fn resolve(&self, id: AgentId) -> Resolution {
        let inner = self.inner.lock();
        if let Some(h) = inner.local.get(&id) {
            return Resolution::Local(h.clone());
        }
        match inner.remote_agents.get(&id) {
            Some(route) => Resolution::RemoteKnown(route.clone()),
            None => Resolution::Unknown,
        }
    }

    // ── Remote agents ──────────────────────────────────────────

    /// Record that `id` lives at `address`.
    ///
    /// The first time an address is seen a queue and a delivery worker are
    /// created for it; later calls reuse them. Fails with `AlreadyLocal` when
    /// the agent was registered locally in the meantime.
    pub fn learn_remote(&self, id: AgentId, address: &str) -> Result<RemoteRoute> {
        let (route, new_queue) = {
            let mut inner = self.inner.lock();
            if inner.local.contains_key(&id) {
                return Err(AgencyError::AlreadyLocal(id));
            }
            let (route, new_queue) = match inner.remote_agencies.get(address) {
                Some(route) => (route.clone(), None),
                None => {
                    let (tx, rx) = mpsc::channel(self.delivery.queue_capacity);
                    let route = RemoteRoute {
                        address: address.to_string(),
                        queue: tx,
                    };
                    inner
                        .remote_agencies
                        .insert(address.to_string(), route.clone());
                    (route, Some(rx))
                }
            };
            inner.remote_agents.insert(id, route.clone());
            (route, new_queue)
        };

        if let Some(rx) = new_queue {
            info!(address, "discovered remote agency");
            self.delivery.spawn_worker(address.to_string(), rx);
            self.delivery.events.publish(Event::RemoteAgencyDiscovered {
                address: address.to_string(),
            });
        }
        debug!(agent_id = id, address, "learned remote agent");
        Ok(route)
    }

    pub fn remote_route(&self, id: AgentId) -> Option<RemoteRoute> {
        self.inner.lock().remote_agents.get(&id).cloned()
    }

    /// Addresses of all remote agencies with a delivery worker, sorted.
    pub fn remote_agencies(&self) -> Vec<AgencyAddress> {
        let mut addrs: Vec<AgencyAddress> =
            self.inner.lock().remote_agencies.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    pub fn local_count(&self) -> usize {
        self.inner.lock().local.len()
    }

    pub fn remote_agent_count(&self) -> usize {
        self.inner.lock().remote_agents.len()
    }
}
