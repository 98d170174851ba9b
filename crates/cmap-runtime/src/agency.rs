use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cmap_config::AgencyConfig;
use cmap_core::{
    AclMessage, AgencyBootstrap, AgencyError, AgencyIdentity, AgencyInfo, AgentDescriptor, AgentId,
    Counter, Event, EventBus, LogSink, LoggerConfig, Metrics, Result, SinkReceivers, Status,
};
use cmap_mesh::{
    AddressResolver, AgentHandle, DeliveryContext, HttpDirectory, HttpTransport, MessageRouter,
    RoutingTable, Transport,
};

use crate::agent::{AgentFactory, AgentSpawner, MasInfo};
use crate::behaviors::BehaviorRegistry;
use crate::host::{AgentHost, ProcessCommand};
use crate::identity;
use crate::services::{AgentServices, ServiceEndpoints};
use crate::logger::{ConsoleLogBackend, HttpLogBackend, LogBackend, LogForwarder, TimeSeriesForwarder};

/// The pluggable collaborators of an agency.
pub struct AgencyParts {
    pub resolver: Arc<dyn AddressResolver>,
    pub transport: Arc<dyn Transport>,
    pub factory: Arc<dyn AgentFactory>,
    pub log_backend: Arc<dyn LogBackend>,
    pub host: AgentHost,
    pub services: AgentServices,
}

impl AgencyParts {
    /// Thread-hosted agents with in-memory services.
    pub fn new(
        resolver: Arc<dyn AddressResolver>,
        transport: Arc<dyn Transport>,
        factory: Arc<dyn AgentFactory>,
        log_backend: Arc<dyn LogBackend>,
    ) -> Self {
        Self {
            resolver,
            transport,
            factory,
            log_backend,
            host: AgentHost::Thread,
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

    /// Production wiring: HTTP directory, HTTP transport, built-in behaviours,
    /// and the central logger or the console depending on `logger.enabled`.
    /// Agents run in child processes unless `agency.isolation` is `thread`.
    pub fn from_config(config: &AgencyConfig) -> Result<Self> {
        let resolver = HttpDirectory::new(
            config.directory.url.clone(),
            Duration::from_secs(config.directory.timeout_secs),
        )?;
        let timeout = Duration::from_secs(config.routing.delivery_timeout_secs);
        let transport = HttpTransport::new(config.routing.remote_port, timeout)?;
        let log_backend: Arc<dyn LogBackend> = if config.logger.enabled {
            Arc::new(HttpLogBackend::new(config.logger.url.clone(), timeout)?)
        } else {
            Arc::new(ConsoleLogBackend)
        };
        let factory = BehaviorRegistry::builtin().with_default(&config.agency.default_behavior);
        let endpoints = ServiceEndpoints::from_config(config);
        let host = match config.agency.isolation.as_str() {
            "thread" => AgentHost::Thread,
            _ => AgentHost::Process(
                ProcessCommand::current_exe()?
                    .with_env("CMAP_DEFAULT_BEHAVIOR", &config.agency.default_behavior)
                    .with_services(endpoints.clone()),
            ),
        };
        Ok(Self::new(
            Arc::new(resolver),
            Arc::new(transport),
            Arc::new(factory),
            log_backend,
        )
        .with_host(host)
        .with_services(endpoints.connect()?))
    }
}

/// Receivers consumed by the background tasks on `start`.
struct Pending {
    outbound: mpsc::Receiver<AclMessage>,
    sink: SinkReceivers,
}

/// One agency process: its identity, its agents and the workers moving
/// messages between them and the rest of the platform.
pub struct Agency {
    identity: AgencyIdentity,
    logger: LoggerConfig,
    roster: Vec<AgentDescriptor>,
    table: Arc<RoutingTable>,
    spawner: AgentSpawner,
    resolver: Arc<dyn AddressResolver>,
    log_backend: Arc<dyn LogBackend>,
    sink: LogSink,
    events: EventBus,
    metrics: Metrics,
    cancel: CancellationToken,
    config: AgencyConfig,
    pending: Mutex<Option<Pending>>,
}

impl Agency {
    /// Work out this agency's ids, fetch its record from the directory and
    /// build the agency. Nothing is started yet.
    pub async fn bootstrap(config: AgencyConfig, parts: AgencyParts) -> Result<Arc<Self>> {
        let (hostname, ids) = identity::resolve(&config.agency)?;
        info!(
            hostname = %hostname,
            mas_id = ids.mas_id,
            instance_id = ids.instance_id,
            agency_id = ids.agency_id,
            "bootstrapping agency"
        );
        let record = parts
            .resolver
            .resolve_agency(ids.mas_id, ids.instance_id, ids.agency_id)
            .await?;
        if record.name.is_empty() {
            return Err(AgencyError::Bootstrap(format!(
                "directory has no agency record for {hostname}"
            )));
        }
        let name = identity::agency_name(&hostname, ids.mas_id);
        if record.name != name {
            warn!(expected = %name, directory = %record.name, "agency name mismatch, using directory name");
        }
        Ok(Self::new(record, config, parts))
    }

    /// Build an agency from a directory record.
    pub fn new(record: AgencyBootstrap, config: AgencyConfig, parts: AgencyParts) -> Arc<Self> {
        let identity = AgencyIdentity {
            mas_id: record.mas_id,
            instance_id: record.instance_id,
            agency_id: record.agency_id,
            name: record.name,
        };
        let events = EventBus::default();
        let metrics = Metrics::new();
        let cancel = CancellationToken::new();

        let (sink, sink_rx) = LogSink::new(
            identity.mas_id,
            record.logger,
            config.logger.queue_capacity,
            metrics.clone(),
        );
        let (outbound_tx, outbound_rx) = mpsc::channel(config.routing.outbound_capacity.max(1));

        let delivery = DeliveryContext::new(
            parts.transport,
            config.routing.remote_queue_capacity,
            cancel.clone(),
        )
        .with_metrics(metrics.clone())
        .with_events(events.clone());
        let table = Arc::new(RoutingTable::new(delivery));

        let mas = Arc::new(MasInfo {
            mas_id: record.mas_id,
            name: record.mas_name,
            custom: record.mas_custom,
        });
        let spawner = AgentSpawner::new(
            table.clone(),
            parts.factory,
            mas,
            outbound_tx,
            sink.clone(),
            events.clone(),
            metrics.clone(),
            config.routing.inbox_capacity,
        )
        .with_host(parts.host)
        .with_services(parts.services);

        Arc::new(Self {
            identity,
            logger: record.logger,
            roster: record.agents,
            table,
            spawner,
            resolver: parts.resolver,
            log_backend: parts.log_backend,
            sink,
            events,
            metrics,
            cancel,
            config,
            pending: Mutex::new(Some(Pending {
                outbound: outbound_rx,
                sink: sink_rx,
            })),
        })
    }

    /// Start the router, the log forwarders and every roster agent.
    ///
    /// Roster agents that fail to start are logged and skipped.
    pub fn start(&self) -> Result<()> {
        let pending = self
            .pending
            .lock()
            .take()
            .ok_or_else(|| AgencyError::Bootstrap("agency already started".into()))?;

        let router = MessageRouter::new(
            self.identity.mas_id,
            self.identity.name.clone(),
            self.table.clone(),
            self.resolver.clone(),
            self.sink.clone(),
        )
        .with_events(self.events.clone())
        .with_metrics(self.metrics.clone());
        tokio::spawn(router.run(pending.outbound, self.cancel.clone()));

        let logs = LogForwarder::new(self.identity.mas_id, self.log_backend.clone());
        tokio::spawn(logs.run(pending.sink.logs, self.cancel.clone()));
        let series = TimeSeriesForwarder::new(
            self.identity.mas_id,
            self.log_backend.clone(),
            Duration::from_secs(self.config.logger.timeseries_flush_secs),
        );
        tokio::spawn(series.run(pending.sink.series, self.cancel.clone()));

        for descriptor in &self.roster {
            if let Err(e) = self.spawner.spawn(descriptor.clone()) {
                error!(agent_id = descriptor.id, error = %e, "failed to start roster agent");
            }
        }
        info!(
            agency = %self.identity.name,
            agents = self.table.local_count(),
            "agency started"
        );
        Ok(())
    }

    // ── Control operations ─────────────────────────────────────

    pub fn info(&self) -> AgencyInfo {
        AgencyInfo {
            identity: self.identity.clone(),
            logger: self.logger,
            agents: self
                .table
                .local_snapshot()
                .iter()
                .map(|h| h.descriptor().clone())
                .collect(),
        }
    }

    pub fn create_agent(&self, descriptor: AgentDescriptor) -> Result<()> {
        self.spawner.spawn(descriptor).map(|_| ())
    }

    /// Hard-stop an agent and remove it from the routing table.
    pub fn delete_agent(&self, id: AgentId) -> Result<()> {
        self.table.unregister_local(id).map(|_| ())
    }

    /// Status of a running agent, or the final status of one that ended
    /// within the last minute.
    pub fn status(&self, id: AgentId) -> Result<Status> {
        self.table
            .local_handle(id)
            .or_else(|| self.table.retired_handle(id))
            .map(|h| h.status())
            .ok_or(AgencyError::AgentNotFound(id))
    }

    /// Hand a control payload to a local agent. Unknown agents are ignored.
    pub async fn inject_custom(&self, id: AgentId, payload: String) {
        let Some(handle) = self.table.local_handle(id) else {
            debug!(agent_id = id, "custom payload for unknown agent ignored");
            return;
        };
        if let Err(e) = handle.deliver(AclMessage::custom(id, payload)).await {
            warn!(agent_id = id, error = %e, "custom payload not delivered");
        }
    }

    /// Push messages received from a peer agency straight into local inboxes.
    /// Returns how many were delivered.
    pub async fn ingest(&self, batch: Vec<AclMessage>) -> usize {
        let mut delivered = 0;
        for msg in batch {
            self.metrics.inc(Counter::Ingested);
            let receiver = msg.receiver;
            match self.table.local_handle(receiver) {
                Some(handle) => match handle.deliver(msg).await {
                    Ok(()) => delivered += 1,
                    Err(e) => warn!(receiver, error = %e, "ingested message not delivered"),
                },
                None => warn!(receiver, "ingested message for unknown agent dropped"),
            }
        }
        delivered
    }

    /// A peer reported a message it could not deliver. Nothing is done with it.
    pub fn report_undeliverable(&self, msg: &AclMessage) {
        debug!(sender = msg.sender, receiver = msg.receiver, "undeliverable message reported");
    }

    /// Kill every agent, then stop all background workers. Queued messages
    /// are not flushed.
    pub fn shutdown(&self) {
        self.stop_all();
    }

    /// Like [`shutdown`](Self::shutdown), then wait up to `grace` for the
    /// agent contexts to be reaped. Returns how many were still running.
    pub async fn shutdown_and_wait(&self, grace: Duration) -> usize {
        let handles = self.stop_all();
        let all = async {
            for handle in &handles {
                handle.stopped().await;
            }
        };
        if tokio::time::timeout(grace, all).await.is_ok() {
            return 0;
        }
        let left = handles.iter().filter(|h| !h.is_terminal()).count();
        warn!(agents = left, "agents still running after shutdown grace period");
        left
    }

    fn stop_all(&self) -> Vec<AgentHandle> {
        if self.cancel.is_cancelled() {
            return Vec::new();
        }
        let handles = self.table.drain_local();
        info!(agents = handles.len(), "shutting down agency");
        for handle in &handles {
            handle.terminate();
        }
        self.events.publish(Event::Shutdown);
        self.cancel.cancel();
        handles
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn identity(&self) -> &AgencyIdentity {
        &self.identity
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &AgencyConfig {
        &self.config
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.config.agency.startup_delay_ms)
    }
}
