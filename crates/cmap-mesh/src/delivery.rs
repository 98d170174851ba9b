use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use cmap_core::{AclMessage, AgencyAddress, Counter, Event, EventBus, Metrics};

use crate::transport::Transport;

/// Everything a remote delivery worker needs, shared by all workers of one agency.
#[derive(Clone)]
pub struct DeliveryContext {
    pub transport: Arc<dyn Transport>,
    pub queue_capacity: usize,
    pub cancel: CancellationToken,
    pub metrics: Metrics,
    pub events: EventBus,
}

impl DeliveryContext {
    pub fn new(transport: Arc<dyn Transport>, queue_capacity: usize, cancel: CancellationToken) -> Self {
        Self {
            transport,
            queue_capacity: queue_capacity.max(1),
            cancel,
            metrics: Metrics::new(),
            events: EventBus::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Start a worker draining `queue` towards `address`.
    pub fn spawn_worker(
        &self,
        address: AgencyAddress,
        queue: mpsc::Receiver<AclMessage>,
    ) -> JoinHandle<()> {
        let worker = RemoteDeliveryWorker {
            address,
            queue,
            ctx: self.clone(),
        };
        tokio::spawn(worker.run())
    }
}

/// Drains the queue of one remote agency, one POST per message.
///
/// Failures are logged and counted; the message is not retried. Messages
/// for one agency leave in queue order since there is exactly one worker per
/// address.
pub struct RemoteDeliveryWorker {
    address: AgencyAddress,
    queue: mpsc::Receiver<AclMessage>,
    ctx: DeliveryContext,
}

impl RemoteDeliveryWorker {
    pub async fn run(mut self) {
        info!(address = %self.address, "remote delivery worker started");
        loop {
            let msg = tokio::select! {
                _ = self.ctx.cancel.cancelled() => break,
                next = self.queue.recv() => match next {
                    Some(msg) => msg,
                    None => break,
                },
            };
            self.ship(msg).await;
        }
        debug!(address = %self.address, "remote delivery worker stopped");
    }

    async fn ship(&self, mut msg: AclMessage) {
        msg.agency_receiver = self.address.clone();
        let receiver = msg.receiver;
        let batch = [msg];
        let result = tokio::select! {
            _ = self.ctx.cancel.cancelled() => return,
            r = self.ctx.transport.deliver(&self.address, &batch) => r,
        };
        match result {
            Ok(()) => {
                self.ctx.metrics.inc(Counter::DeliveriesOk);
                debug!(address = %self.address, receiver, "remote delivery ok");
            }
            Err(e) => {
                self.ctx.metrics.inc(Counter::DeliveriesFailed);
                error!(address = %self.address, receiver, error = %e, "remote delivery failed");
                self.ctx.events.publish(Event::DeliveryFailed {
                    address: self.address.clone(),
                    receiver,
                    reason: e.to_string(),
                });
            }
        }
    }
}
