use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::mpsc;

use cmap_core::{AclMessage, AgencyError, Result};

/// Ships a batch of messages to the agency at `address`.
///
/// A batch counts as delivered only when the peer acknowledges it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, address: &str, batch: &[AclMessage]) -> Result<()>;
}

/// POSTs batches as a JSON array to the peer's control API.
pub struct HttpTransport {
    client: reqwest::Client,
    port: u16,
}

impl HttpTransport {
    pub fn new(port: u16, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgencyError::Delivery {
                address: String::new(),
                reason: format!("failed to build client: {e}"),
            })?;
        Ok(Self { client, port })
    }

    /// Ingestion URL of a peer. Addresses that already carry a port are used as is.
    pub fn endpoint(&self, address: &str) -> String {
        if address.contains(':') {
            format!("http://{address}/api/agency/msgs")
        } else {
            format!("http://{address}:{}/api/agency/msgs", self.port)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, address: &str, batch: &[AclMessage]) -> Result<()> {
        let url = self.endpoint(address);
        let resp = self
            .client
            .post(&url)
            .json(batch)
            .send()
            .await
            .map_err(|e| AgencyError::Delivery {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        match resp.status() {
            StatusCode::CREATED => Ok(()),
            status => Err(AgencyError::Delivery {
                address: address.to_string(),
                reason: format!("unexpected status {status}"),
            }),
        }
    }
}

/// In-process transport handing batches to a channel, keyed by address.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<(String, Vec<AclMessage>)>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, Vec<AclMessage>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn deliver(&self, address: &str, batch: &[AclMessage]) -> Result<()> {
        self.tx
            .send((address.to_string(), batch.to_vec()))
            .map_err(|_| AgencyError::Delivery {
                address: address.to_string(),
                reason: "receiver dropped".into(),
            })
    }
}
