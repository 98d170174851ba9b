//! Agent execution contexts.
//!
//! Each agent's [`AgentBehavior`] runs outside the agency's worker threads,
//! on its own thread or in its own process (see [`crate::host`]). The
//! handle is registered before the context is launched, so a context that
//! loses a duplicate-id race never runs. A supervisor task awaits each
//! context and cleans up after it, whether it returned, failed, panicked or
//! was killed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use cmap_core::{
    AclMessage, AgencyError, AgentDescriptor, AgentId, AgentState, Counter, Event, EventBus, Graph,
    LogSink, LogTopic, MasId, Metrics, Result, Service,
};
use cmap_mesh::{AgentHandle, RoutingTable};

use crate::host::{self, AgentHost, Outcome};
use crate::process::InitFrame;
use crate::services::AgentServices;

/// User logic of an agent.
///
/// `run` owns the context for the agent's whole life. Returning `Ok` ends
/// the agent normally, returning `Err` or panicking marks it crashed.
#[async_trait]
pub trait AgentBehavior: Send + Sync + 'static {
    async fn run(&self, ctx: AgentContext) -> Result<()>;
}

/// Picks the behaviour for a newly created agent.
pub trait AgentFactory: Send + Sync {
    fn create(&self, descriptor: &AgentDescriptor) -> Arc<dyn AgentBehavior>;
}

/// The multi-agent system an agency belongs to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasInfo {
    pub mas_id: MasId,
    pub name: String,
    pub custom: String,
}

/// What an agent sees of the agency.
pub struct AgentContext {
    descriptor: AgentDescriptor,
    mas: Arc<MasInfo>,
    inbox: mpsc::Receiver<AclMessage>,
    outbound: mpsc::Sender<AclMessage>,
    sink: LogSink,
    services: AgentServices,
    /// Runtime the service clients were built on. Their connection pools
    /// are bound to it, so service calls are spawned there.
    io: Handle,
}

impl AgentContext {
    /// Must be called inside a tokio runtime.
    pub fn new(
        descriptor: AgentDescriptor,
        mas: Arc<MasInfo>,
        inbox: mpsc::Receiver<AclMessage>,
        outbound: mpsc::Sender<AclMessage>,
        sink: LogSink,
        services: AgentServices,
    ) -> Self {
        Self {
            descriptor,
            mas,
            inbox,
            outbound,
            sink,
            services,
            io: Handle::current(),
        }
    }

    pub fn id(&self) -> AgentId {
        self.descriptor.id
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn mas_id(&self) -> MasId {
        self.mas.mas_id
    }

    pub fn mas_name(&self) -> &str {
        &self.mas.name
    }

    pub fn mas_custom(&self) -> &str {
        &self.mas.custom
    }

    /// Wait for the next inbound message. `None` once the agent is deregistered.
    pub async fn recv(&mut self) -> Option<AclMessage> {
        self.inbox.recv().await
    }

    pub fn try_recv(&mut self) -> Option<AclMessage> {
        self.inbox.try_recv().ok()
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<AclMessage> {
        tokio::time::timeout(timeout, self.inbox.recv())
            .await
            .ok()
            .flatten()
    }

    /// Queue a message for routing. Sender and timestamp are filled in.
    pub async fn send(&self, mut msg: AclMessage) -> Result<()> {
        msg.sender = self.descriptor.id;
        msg.timestamp = Utc::now();
        self.outbound
            .send(msg)
            .await
            .map_err(|_| AgencyError::AgentFailed {
                id: self.descriptor.id,
                reason: "outbound queue closed".into(),
            })
    }

    pub fn log(&self, topic: LogTopic, message: impl Into<String>, data: impl Into<String>) {
        self.sink.log(self.descriptor.id, topic, message, data);
    }

    pub fn record(&self, name: impl Into<String>, value: f64) {
        self.sink.record(self.descriptor.id, name, value);
    }

    // ── Platform services ──────────────────────────────────────

    async fn on_io<T, F>(&self, fut: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.io
            .spawn(fut)
            .await
            .map_err(|e| AgencyError::AgentFailed {
                id: self.descriptor.id,
                reason: format!("service call aborted: {e}"),
            })?
    }

    /// Persist the agent's state so a later context can pick it up.
    pub async fn save_state(&self, state: impl Into<String>) -> Result<()> {
        let (store, mas, id, state) = (
            self.services.state.clone(),
            self.mas_id(),
            self.id(),
            state.into(),
        );
        self.on_io(async move { store.save(mas, id, state).await })
            .await
    }

    /// Last saved state, or `None` if the agent never saved any.
    pub async fn load_state(&self) -> Result<Option<String>> {
        let (store, mas, id) = (self.services.state.clone(), self.mas_id(), self.id());
        self.on_io(async move { store.load(mas, id).await }).await
    }

    /// Publish a service offered by this agent. Returns it with its id.
    pub async fn register_service(&self, mut service: Service) -> Result<Service> {
        service.agent_id = self.id();
        let (registry, mas) = (self.services.registry.clone(), self.mas_id());
        self.on_io(async move { registry.register(mas, service).await })
            .await
    }

    pub async fn find_services(&self, desc: impl Into<String>) -> Result<Vec<Service>> {
        let (registry, mas, desc) = (self.services.registry.clone(), self.mas_id(), desc.into());
        self.on_io(async move { registry.search(mas, &desc).await })
            .await
    }

    /// Services matching `desc` within `dist` of `node_id`.
    pub async fn find_local_services(
        &self,
        desc: impl Into<String>,
        node_id: i32,
        dist: f64,
    ) -> Result<Vec<Service>> {
        let (registry, mas, desc) = (self.services.registry.clone(), self.mas_id(), desc.into());
        self.on_io(async move { registry.search_local(mas, &desc, node_id, dist).await })
            .await
    }

    pub async fn deregister_service(&self, service_id: impl Into<String>) -> Result<()> {
        let (registry, mas, svc) = (
            self.services.registry.clone(),
            self.mas_id(),
            service_id.into(),
        );
        self.on_io(async move { registry.deregister(mas, &svc).await })
            .await
    }

    pub async fn publish_graph(&self, graph: Graph) -> Result<()> {
        let (registry, mas) = (self.services.registry.clone(), self.mas_id());
        self.on_io(async move { registry.put_graph(mas, graph).await })
            .await
    }

    pub async fn graph(&self) -> Result<Option<Graph>> {
        let (registry, mas) = (self.services.registry.clone(), self.mas_id());
        self.on_io(async move { registry.graph(mas).await }).await
    }
}

// ── Spawning and supervision ───────────────────────────────────

/// Creates agent contexts and registers them in the routing table.
#[derive(Clone)]
pub struct AgentSpawner {
    table: Arc<RoutingTable>,
    factory: Arc<dyn AgentFactory>,
    mas: Arc<MasInfo>,
    outbound: mpsc::Sender<AclMessage>,
    sink: LogSink,
    events: EventBus,
    metrics: Metrics,
    inbox_capacity: usize,
    host: AgentHost,
    services: AgentServices,
}

impl AgentSpawner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        table: Arc<RoutingTable>,
        factory: Arc<dyn AgentFactory>,
        mas: Arc<MasInfo>,
        outbound: mpsc::Sender<AclMessage>,
        sink: LogSink,
        events: EventBus,
        metrics: Metrics,
        inbox_capacity: usize,
    ) -> Self {
        Self {
            table,
            factory,
            mas,
            outbound,
            sink,
            events,
            metrics,
            inbox_capacity: inbox_capacity.max(1),
            host: AgentHost::default(),
            services: AgentServices::default(),
        }
    }

    pub fn with_host(mut self, host: AgentHost) -> Self {
        self.host = host;
        self
    }

    pub fn with_services(mut self, services: AgentServices) -> Self {
        self.services = services;
        self
    }

    /// Start a context for `descriptor`. Fails with `DuplicateAgent` if the
    /// id is already running here; the rejected context never starts.
    pub fn spawn(&self, descriptor: AgentDescriptor) -> Result<AgentHandle> {
        let id = descriptor.id;
        let (inbox_tx, inbox_rx) = mpsc::channel(self.inbox_capacity);
        let handle = AgentHandle::new(descriptor.clone(), inbox_tx);
        if let Err(e) = self.table.register_local(handle.clone()) {
            warn!(agent_id = id, "rejected agent creation: {}", e);
            return Err(e);
        }

        let launched = match &self.host {
            AgentHost::Thread => {
                let behavior = self.factory.create(&descriptor);
                let ctx = AgentContext::new(
                    descriptor,
                    self.mas.clone(),
                    inbox_rx,
                    self.outbound.clone(),
                    self.sink.clone(),
                    self.services.clone(),
                );
                host::launch_thread(behavior, ctx, handle.kill_token())
            }
            AgentHost::Process(command) => {
                let init = InitFrame {
                    descriptor,
                    mas: (*self.mas).clone(),
                    logger: self.sink.config(),
                    services: command.services.clone(),
                    inbox_capacity: self.inbox_capacity,
                };
                host::launch_process(
                    command,
                    init,
                    inbox_rx,
                    self.outbound.clone(),
                    self.sink.clone(),
                    handle.kill_token(),
                )
            }
        };
        let outcome = match launched {
            Ok(outcome) => outcome,
            Err(e) => {
                handle.set_state(AgentState::Crashed);
                self.table.remove_instance(id, handle.instance());
                error!(agent_id = id, error = %e, "failed to launch agent");
                return Err(e);
            }
        };

        handle.set_state(AgentState::Running);
        tokio::spawn(supervise(handle.clone(), outcome, self.clone()));

        self.metrics.inc(Counter::AgentsStarted);
        self.events.publish(Event::AgentStarted { agent_id: id });
        self.sink.log(id, LogTopic::Status, "agent started", "");
        info!(agent_id = id, "agent started");
        Ok(handle)
    }
}

async fn supervise(
    handle: AgentHandle,
    outcome: oneshot::Receiver<Outcome>,
    spawner: AgentSpawner,
) {
    let id = handle.id();
    let failure = match outcome.await {
        Ok(Outcome::Returned) | Ok(Outcome::Killed) => None,
        Ok(Outcome::Failed(reason)) => Some(reason),
        Err(_) => Some("agent host went away".to_string()),
    };

    match failure {
        None => {
            handle.set_state(AgentState::Terminated);
            spawner.table.remove_instance(id, handle.instance());
            spawner.metrics.inc(Counter::AgentsTerminated);
            spawner.events.publish(Event::AgentTerminated { agent_id: id });
            spawner.sink.log(id, LogTopic::Status, "agent terminated", "");
            info!(agent_id = id, "agent terminated");
        }
        Some(reason) => {
            handle.set_state(AgentState::Crashed);
            spawner.table.remove_instance(id, handle.instance());
            spawner.metrics.inc(Counter::AgentsCrashed);
            error!(agent_id = id, reason = %reason, "agent crashed");
            spawner
                .sink
                .log(id, LogTopic::Error, "agent crashed", reason.clone());
            spawner.events.publish(Event::AgentCrashed {
                agent_id: id,
                reason,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmap_core::{GraphEdge, LoggerConfig};

    fn context(id: AgentId) -> (AgentContext, mpsc::Sender<AclMessage>, mpsc::Receiver<AclMessage>) {
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, out_rx) = mpsc::channel(4);
        let (sink, _rx) = LogSink::new(1, LoggerConfig::default(), 4, Metrics::new());
        let mas = Arc::new(MasInfo {
            mas_id: 1,
            name: "grid".into(),
            custom: "{}".into(),
        });
        let ctx = AgentContext::new(
            AgentDescriptor::new(id, "a"),
            mas,
            in_rx,
            out_tx,
            sink,
            AgentServices::default(),
        );
        (ctx, in_tx, out_rx)
    }

    #[tokio::test]
    async fn test_send_stamps_sender() {
        let (ctx, _in, mut out) = context(5);
        ctx.send(AclMessage::new(0, 9, "x")).await.unwrap();
        let msg = out.recv().await.unwrap();
        assert_eq!(msg.sender, 5);
        assert_eq!(msg.receiver, 9);
    }

    #[tokio::test]
    async fn test_recv_timeout_expires() {
        let (mut ctx, _in, _out) = context(5);
        assert!(ctx.recv_timeout(Duration::from_millis(10)).await.is_none());
        assert!(ctx.try_recv().is_none());
        assert_eq!(ctx.mas_name(), "grid");
    }

    #[tokio::test]
    async fn test_state_survives_a_new_context() {
        let (ctx, _in, _out) = context(5);
        assert_eq!(ctx.load_state().await.unwrap(), None);
        ctx.save_state("soc=0.4").await.unwrap();

        let services = ctx.services.clone();
        let (in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, _out_rx) = mpsc::channel(1);
        drop(in_tx);
        let (sink, _rx) = LogSink::new(1, LoggerConfig::default(), 4, Metrics::new());
        let mas = Arc::new(MasInfo {
            mas_id: 1,
            ..MasInfo::default()
        });
        let descriptor = AgentDescriptor::new(5, "a");
        let again = AgentContext::new(descriptor, mas, in_rx, out_tx, sink, services);
        assert_eq!(again.load_state().await.unwrap().as_deref(), Some("soc=0.4"));
    }

    #[tokio::test]
    async fn test_registered_service_carries_agent_id() {
        let (ctx, _in, _out) = context(6);
        let svc = ctx
            .register_service(Service::new("storage").with_node(1))
            .await
            .unwrap();
        assert_eq!(svc.agent_id, 6);
        assert!(!svc.id.is_empty());

        let found = ctx.find_services("storage").await.unwrap();
        assert_eq!(found, vec![svc.clone()]);

        ctx.publish_graph(Graph {
            node: vec![],
            edge: vec![GraphEdge { n1: 1, n2: 2, weight: 3.0 }],
        })
        .await
        .unwrap();
        assert_eq!(ctx.find_local_services("storage", 2, 3.0).await.unwrap().len(), 1);
        assert!(ctx.find_local_services("storage", 2, 1.0).await.unwrap().is_empty());
        assert!(ctx.graph().await.unwrap().is_some());

        ctx.deregister_service(svc.id).await.unwrap();
        assert!(ctx.find_services("storage").await.unwrap().is_empty());
    }
}
