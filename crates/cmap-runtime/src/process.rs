//! Frame protocol between the agency and an agent process.
//!
//! Both directions carry one JSON document per line. The agency writes an
//! [`InitFrame`] followed by the agent's inbound [`AclMessage`]s; the agent
//! answers with [`ChildFrame`]s. Closing the agent's stdin ends its inbox.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use cmap_core::{
    AclMessage, AgencyError, AgentDescriptor, LogMessage, LogSink, LoggerConfig, Metrics, Result,
    SinkReceivers, TimeSeriesPoint,
};

use crate::agent::{AgentContext, AgentFactory, MasInfo};
use crate::services::ServiceEndpoints;

/// First line sent to a new agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitFrame {
    pub descriptor: AgentDescriptor,
    pub mas: MasInfo,
    pub logger: LoggerConfig,
    pub services: ServiceEndpoints,
    pub inbox_capacity: usize,
}

/// What an agent process reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum ChildFrame {
    Send(AclMessage),
    Log(LogMessage),
    Record(TimeSeriesPoint),
    /// Last frame of a behaviour that returned an error.
    Failed(String),
}

pub async fn write_frame<W, T>(out: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

/// Agent-process side: read the init frame from `input`, run the selected
/// behaviour and stream its output to `output` until it returns.
pub async fn serve_agent<R, W>(factory: &dyn AgentFactory, input: R, mut output: W) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(input).lines();
    let first = lines
        .next_line()
        .await?
        .ok_or_else(|| AgencyError::Bootstrap("agent process got no init frame".into()))?;
    let init: InitFrame = serde_json::from_str(&first)?;
    let id = init.descriptor.id;
    let services = init.services.connect()?;
    let capacity = init.inbox_capacity.max(1);

    let (inbox_tx, inbox_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    let (sink, sink_rx) = LogSink::new(init.mas.mas_id, init.logger, capacity, Metrics::new());
    let behavior = factory.create(&init.descriptor);
    let ctx = AgentContext::new(
        init.descriptor,
        Arc::new(init.mas),
        inbox_rx,
        out_tx,
        sink,
        services,
    );

    let reader = tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            match serde_json::from_str::<AclMessage>(&line) {
                Ok(msg) => {
                    if inbox_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(agent_id = id, error = %e, "unreadable inbound message"),
            }
        }
    });

    info!(agent_id = id, "agent process running");
    let writer = tokio::spawn(async move {
        pump_frames(&mut output, out_rx, sink_rx).await;
        output
    });
    let result = behavior.run(ctx).await;
    reader.abort();

    // The context is gone, so the writer sees every queue close.
    let mut output = writer
        .await
        .map_err(|e| AgencyError::AgentFailed { id, reason: e.to_string() })?;
    if let Err(e) = &result {
        write_frame(&mut output, &ChildFrame::Failed(e.to_string())).await?;
    }
    output.shutdown().await?;
    result
}

/// Turn the context's queues into frames until all of them close.
async fn pump_frames<W>(
    output: &mut W,
    mut outbound: mpsc::Receiver<AclMessage>,
    mut sink: SinkReceivers,
) where
    W: AsyncWrite + Unpin,
{
    let (mut msgs_open, mut logs_open, mut series_open) = (true, true, true);
    while msgs_open || logs_open || series_open {
        let frame = tokio::select! {
            msg = outbound.recv(), if msgs_open => match msg {
                Some(msg) => ChildFrame::Send(msg),
                None => { msgs_open = false; continue; }
            },
            log = sink.logs.recv(), if logs_open => match log {
                Some(log) => ChildFrame::Log(log),
                None => { logs_open = false; continue; }
            },
            point = sink.series.recv(), if series_open => match point {
                Some(point) => ChildFrame::Record(point),
                None => { series_open = false; continue; }
            },
        };
        if let Err(e) = write_frame(output, &frame).await {
            warn!(error = %e, "agent output closed");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviors::BehaviorRegistry;
    use cmap_core::LogTopic;

    fn init(agent_type: &str) -> InitFrame {
        InitFrame {
            descriptor: AgentDescriptor::new(4, "worker").with_type(agent_type),
            mas: MasInfo {
                mas_id: 2,
                name: "grid".into(),
                custom: String::new(),
            },
            logger: LoggerConfig::default(),
            services: ServiceEndpoints::default(),
            inbox_capacity: 8,
        }
    }

    #[test]
    fn test_child_frame_wire_shape() {
        let frame = ChildFrame::Failed("boom".into());
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["kind"], "failed");
        assert_eq!(json["body"], "boom");
    }

    #[tokio::test]
    async fn test_serve_agent_runs_echo_over_pipes() {
        let (agency_side, agent_side) = tokio::io::duplex(64 * 1024);
        let (agent_in, agent_out) = tokio::io::split(agent_side);
        let registry = BehaviorRegistry::builtin();
        let agent = tokio::spawn(async move { serve_agent(&registry, agent_in, agent_out).await });

        let (from_agent, mut to_agent) = tokio::io::split(agency_side);
        write_frame(&mut to_agent, &init("echo")).await.unwrap();
        write_frame(&mut to_agent, &AclMessage::new(1, 4, "hello")).await.unwrap();

        let mut lines = BufReader::new(from_agent).lines();
        let reply = loop {
            let line = lines.next_line().await.unwrap().unwrap();
            if let ChildFrame::Send(msg) = serde_json::from_str::<ChildFrame>(&line).unwrap() {
                break msg;
            }
        };
        assert_eq!(reply.receiver, 1);
        assert_eq!(reply.sender, 4);
        assert_eq!(reply.content, "hello");

        // Closing stdin ends the inbox, and echo returns.
        to_agent.shutdown().await.unwrap();
        agent.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_agent_forwards_logs() {
        let (agency_side, agent_side) = tokio::io::duplex(64 * 1024);
        let (agent_in, agent_out) = tokio::io::split(agent_side);
        let registry = BehaviorRegistry::builtin();
        let agent = tokio::spawn(async move { serve_agent(&registry, agent_in, agent_out).await });

        let (from_agent, mut to_agent) = tokio::io::split(agency_side);
        write_frame(&mut to_agent, &init("echo")).await.unwrap();
        write_frame(&mut to_agent, &AclMessage::custom(4, "{\"mode\":1}"))
            .await
            .unwrap();
        to_agent.shutdown().await.unwrap();

        let mut lines = BufReader::new(from_agent).lines();
        let mut logged = None;
        while let Some(line) = lines.next_line().await.unwrap() {
            if let ChildFrame::Log(record) = serde_json::from_str::<ChildFrame>(&line).unwrap() {
                logged = Some(record);
            }
        }
        let record = logged.unwrap();
        assert_eq!(record.topic, LogTopic::App);
        assert_eq!(record.data, "{\"mode\":1}");
        agent.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_missing_init_frame_is_error() {
        let (agency_side, agent_side) = tokio::io::duplex(1024);
        let (agent_in, agent_out) = tokio::io::split(agent_side);
        drop(agency_side);
        let registry = BehaviorRegistry::builtin();
        assert!(serve_agent(&registry, agent_in, agent_out).await.is_err());
    }
}
