//! Background senders draining the platform logging sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use cmap_core::{AgencyError, LogMessage, MasId, Result, TimeSeriesPoint};

/// Flush the time-series buffer once it holds this many points.
pub const SERIES_BATCH: usize = 100;

/// Destination of platform log records and time-series samples.
#[async_trait]
pub trait LogBackend: Send + Sync {
    async fn send_logs(&self, mas_id: MasId, batch: &[LogMessage]) -> Result<()>;
    async fn send_series(&self, mas_id: MasId, batch: &[TimeSeriesPoint]) -> Result<()>;
}

// ── Remote logger ──────────────────────────────────────────────

/// Client of the central logger service.
pub struct HttpLogBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpLogBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgencyError::Logger(format!("failed to build client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post<T: serde::Serialize + Sync>(&self, url: String, body: &[T]) -> Result<()> {
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AgencyError::Logger(format!("POST {url}: {e}")))?;
        match resp.status() {
            StatusCode::CREATED => Ok(()),
            status => Err(AgencyError::Logger(format!(
                "POST {url}: unexpected status {status}"
            ))),
        }
    }
}

#[async_trait]
impl LogBackend for HttpLogBackend {
    async fn send_logs(&self, mas_id: MasId, batch: &[LogMessage]) -> Result<()> {
        let url = format!("{}/api/logging/{}/list", self.base_url, mas_id);
        self.post(url, batch).await
    }

    async fn send_series(&self, mas_id: MasId, batch: &[TimeSeriesPoint]) -> Result<()> {
        let url = format!("{}/api/stats/{}/list", self.base_url, mas_id);
        self.post(url, batch).await
    }
}

// ── Console ────────────────────────────────────────────────────

/// Prints records through `tracing` when the central logger is switched off.
pub struct ConsoleLogBackend;

#[async_trait]
impl LogBackend for ConsoleLogBackend {
    async fn send_logs(&self, _mas_id: MasId, batch: &[LogMessage]) -> Result<()> {
        for rec in batch {
            info!(
                target: "cmap::log",
                masid = rec.mas_id,
                agentid = rec.agent_id,
                topic = %rec.topic,
                data = %rec.data,
                "{}",
                rec.message
            );
        }
        Ok(())
    }

    async fn send_series(&self, _mas_id: MasId, batch: &[TimeSeriesPoint]) -> Result<()> {
        for p in batch {
            info!(
                target: "cmap::stats",
                masid = p.mas_id,
                agentid = p.agent_id,
                name = %p.name,
                value = p.value,
                "time series"
            );
        }
        Ok(())
    }
}

// ── Forwarders ─────────────────────────────────────────────────

/// Sends every log record on its own, in queue order.
pub struct LogForwarder {
    mas_id: MasId,
    backend: Arc<dyn LogBackend>,
}

impl LogForwarder {
    pub fn new(mas_id: MasId, backend: Arc<dyn LogBackend>) -> Self {
        Self { mas_id, backend }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<LogMessage>, cancel: CancellationToken) {
        loop {
            let rec = tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(rec) => rec,
                    None => break,
                },
            };
            if let Err(e) = self.backend.send_logs(self.mas_id, &[rec]).await {
                error!(error = %e, "failed to forward log record");
            }
        }
        debug!("log forwarder stopped");
    }
}

/// Buffers time-series samples and flushes them periodically or in batches.
pub struct TimeSeriesForwarder {
    mas_id: MasId,
    backend: Arc<dyn LogBackend>,
    interval: Duration,
}

impl TimeSeriesForwarder {
    pub fn new(mas_id: MasId, backend: Arc<dyn LogBackend>, interval: Duration) -> Self {
        Self {
            mas_id,
            backend,
            interval: interval.max(Duration::from_millis(10)),
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<TimeSeriesPoint>, cancel: CancellationToken) {
        let mut buffer: Vec<TimeSeriesPoint> = Vec::with_capacity(SERIES_BATCH);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.flush(&mut buffer).await,
                next = rx.recv() => match next {
                    Some(point) => {
                        buffer.push(point);
                        if buffer.len() >= SERIES_BATCH {
                            self.flush(&mut buffer).await;
                        }
                    }
                    None => {
                        self.flush(&mut buffer).await;
                        break;
                    }
                },
            }
        }
        debug!("time-series forwarder stopped");
    }

    async fn flush(&self, buffer: &mut Vec<TimeSeriesPoint>) {
        if buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(buffer);
        if let Err(e) = self.backend.send_series(self.mas_id, &batch).await {
            error!(error = %e, points = batch.len(), "failed to forward time series");
        }
    }
}
