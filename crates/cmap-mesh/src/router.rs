use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cmap_core::{
    AclMessage, AgencyError, AgentId, Counter, Event, EventBus, LogSink, LogTopic,
    MasId, Metrics, Result, RouteKind,
};

use crate::directory::AddressResolver;
use crate::handle::AgentHandle;
use crate::table::{Resolution, RoutingTable};

/// Single consumer of the agency's outbound queue.
///
/// Each message goes to a local inbox when the receiver lives here, or to the
/// queue of the remote agency hosting it. Unknown receivers are looked up in
/// the directory once and remembered. Messages that cannot be placed are
/// logged and dropped; the router itself never stops on a bad message.
pub struct MessageRouter {
    mas_id: MasId,
    agency_name: String,
    table: Arc<RoutingTable>,
    resolver: Arc<dyn AddressResolver>,
    sink: LogSink,
    events: EventBus,
    metrics: Metrics,
}

impl MessageRouter {
    pub fn new(
        mas_id: MasId,
        agency_name: impl Into<String>,
        table: Arc<RoutingTable>,
        resolver: Arc<dyn AddressResolver>,
        sink: LogSink,
    ) -> Self {
        Self {
            mas_id,
            agency_name: agency_name.into(),
            table,
            resolver,
            sink,
            events: EventBus::default(),
            metrics: Metrics::new(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Drain `outbound` until it closes or `cancel` fires.
    pub async fn run(self, mut outbound: mpsc::Receiver<AclMessage>, cancel: CancellationToken) {
        info!(agency = %self.agency_name, "message router started");
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                next = outbound.recv() => match next {
                    Some(msg) => msg,
                    None => break,
                },
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.route(msg) => {}
            }
        }
        info!(agency = %self.agency_name, "message router stopped");
    }

    /// Route one message. Returns where it went, or `None` if it was dropped.
    pub async fn route(&self, mut msg: AclMessage) -> Option<RouteKind> {
        msg.agency_sender = self.agency_name.clone();
        let (sender, receiver) = (msg.sender, msg.receiver);
        let mirror = self.sink.topic_enabled(LogTopic::Msg).then(|| msg.clone());

        match self.dispatch(msg).await {
            Ok(kind) => {
                self.metrics.inc(match kind {
                    RouteKind::Local => Counter::RoutedLocal,
                    RouteKind::Remote => Counter::RoutedRemote,
                });
                if let Some(sent) = &mirror {
                    self.sink.message_sent(sent);
                }
                self.events.publish(Event::MessageRouted {
                    sender,
                    receiver,
                    route: kind,
                });
                Some(kind)
            }
            Err(e) => {
                self.drop_message(sender, receiver, &e);
                None
            }
        }
    }

    async fn dispatch(&self, msg: AclMessage) -> Result<RouteKind> {
        let receiver = msg.receiver;
        let route = match self.table.resolve(receiver) {
            Resolution::Local(handle) => return deliver_local(&handle, msg).await,
            Resolution::RemoteKnown(route) => route,
            Resolution::Unknown => match self.discover(receiver).await? {
                Resolution::Local(handle) => return deliver_local(&handle, msg).await,
                Resolution::RemoteKnown(route) => route,
                Resolution::Unknown => return Err(AgencyError::UnresolvedDestination(receiver)),
            },
        };
        route.send(msg).await?;
        Ok(RouteKind::Remote)
    }

    /// Ask the directory where `receiver` lives and record the answer.
    async fn discover(&self, receiver: AgentId) -> Result<Resolution> {
        self.metrics.inc(Counter::AddressLookups);
        let address = match self.resolver.resolve_agent(self.mas_id, receiver).await {
            Ok(address) => address,
            Err(e) => {
                warn!(receiver, error = %e, "directory lookup failed");
                return Err(AgencyError::UnresolvedDestination(receiver));
            }
        };
        if address.is_empty() {
            return Err(AgencyError::UnresolvedDestination(receiver));
        }
        match self.table.learn_remote(receiver, &address) {
            Ok(route) => Ok(Resolution::RemoteKnown(route)),
            // Registered locally while the lookup was in flight.
            Err(AgencyError::AlreadyLocal(_)) => Ok(self.table.resolve(receiver)),
            Err(e) => Err(e),
        }
    }

    fn drop_message(&self, sender: AgentId, receiver: AgentId, reason: &AgencyError) {
        self.metrics.inc(Counter::Dropped);
        match reason {
            AgencyError::UnresolvedDestination(_) => {
                error!(sender, receiver, "invalid agent address, dropping message")
            }
            other => error!(sender, receiver, error = %other, "dropping message"),
        }
        self.sink.log(
            sender,
            LogTopic::Error,
            format!("message to agent {receiver} dropped"),
            reason.to_string(),
        );
        self.events.publish(Event::MessageDropped {
            sender,
            receiver,
            reason: reason.to_string(),
        });
    }
}

async fn deliver_local(handle: &AgentHandle, msg: AclMessage) -> Result<RouteKind> {
    debug!(receiver = handle.id(), "local delivery");
    handle.deliver(msg).await?;
    Ok(RouteKind::Local)
}
