//! Producer side of the platform logging sink.
//!
//! Agents and the router push log records and time-series samples into two
//! bounded queues. A background forwarder (see `cmap-runtime`) drains them.
//! Pushing never blocks: when a queue is full the record is dropped and counted.

use tokio::sync::mpsc;
use tracing::debug;

use crate::message::{AclMessage, LogMessage, LogTopic, TimeSeriesPoint};
use crate::metrics::{Counter, Metrics};
use crate::types::{AgentId, LoggerConfig, MasId};

/// Consumer ends of the two sink queues.
pub struct SinkReceivers {
    pub logs: mpsc::Receiver<LogMessage>,
    pub series: mpsc::Receiver<TimeSeriesPoint>,
}

/// Cloneable handle for pushing records into the platform logging sink.
#[derive(Clone)]
pub struct LogSink {
    mas_id: MasId,
    config: LoggerConfig,
    logs: mpsc::Sender<LogMessage>,
    series: mpsc::Sender<TimeSeriesPoint>,
    metrics: Metrics,
}

impl LogSink {
    pub fn new(
        mas_id: MasId,
        config: LoggerConfig,
        capacity: usize,
        metrics: Metrics,
    ) -> (Self, SinkReceivers) {
        let (log_tx, log_rx) = mpsc::channel(capacity.max(1));
        let (ts_tx, ts_rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            mas_id,
            config,
            logs: log_tx,
            series: ts_tx,
            metrics,
        };
        (
            sink,
            SinkReceivers {
                logs: log_rx,
                series: ts_rx,
            },
        )
    }

    pub fn mas_id(&self) -> MasId {
        self.mas_id
    }

    pub fn config(&self) -> LoggerConfig {
        self.config
    }

    /// Whether records of `topic` are forwarded under the current logger config.
    pub fn topic_enabled(&self, topic: LogTopic) -> bool {
        match topic {
            LogTopic::Error => true,
            _ if !self.config.active => false,
            LogTopic::Msg => self.config.msg,
            LogTopic::App => self.config.app,
            LogTopic::Status => self.config.status,
            LogTopic::Debug => self.config.debug,
        }
    }

    /// Queue a log record. Filtered topics are skipped silently.
    pub fn push(&self, record: LogMessage) {
        if !self.topic_enabled(record.topic) {
            return;
        }
        if self.logs.try_send(record).is_err() {
            debug!("log sink queue full or closed, dropping record");
            self.metrics.inc(Counter::LogRecordsDropped);
        }
    }

    /// Convenience wrapper building the record from its parts.
    pub fn log(
        &self,
        agent_id: AgentId,
        topic: LogTopic,
        message: impl Into<String>,
        data: impl Into<String>,
    ) {
        self.push(LogMessage::new(self.mas_id, agent_id, topic, message, data));
    }

    /// Mirror a routed message as a "message sent" event.
    pub fn message_sent(&self, msg: &AclMessage) {
        if self.topic_enabled(LogTopic::Msg) {
            self.push(LogMessage::acl_sent(self.mas_id, msg));
        }
    }

    /// Queue a time-series sample.
    pub fn record(&self, agent_id: AgentId, name: impl Into<String>, value: f64) {
        self.push_point(TimeSeriesPoint {
            mas_id: self.mas_id,
            agent_id,
            timestamp: chrono::Utc::now(),
            name: name.into(),
            value,
        });
    }

    /// Queue an already built sample.
    pub fn push_point(&self, point: TimeSeriesPoint) {
        if self.series.try_send(point).is_err() {
            debug!("time-series queue full or closed, dropping sample");
            self.metrics.inc(Counter::LogRecordsDropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(config: LoggerConfig, capacity: usize) -> (LogSink, SinkReceivers, Metrics) {
        let metrics = Metrics::new();
        let (sink, rx) = LogSink::new(7, config, capacity, metrics.clone());
        (sink, rx, metrics)
    }

    #[test]
    fn test_push_respects_topic_filter() {
        let config = LoggerConfig {
            app: false,
            ..LoggerConfig::default()
        };
        let (sink, mut rx, _) = sink(config, 10);
        sink.log(1, LogTopic::App, "hidden", "");
        sink.log(1, LogTopic::Status, "visible", "");
        let rec = rx.logs.try_recv().unwrap();
        assert_eq!(rec.message, "visible");
        assert_eq!(rec.mas_id, 7);
        assert!(rx.logs.try_recv().is_err());
    }

    #[test]
    fn test_errors_pass_inactive_logger() {
        let config = LoggerConfig {
            active: false,
            ..LoggerConfig::default()
        };
        let (sink, mut rx, _) = sink(config, 10);
        sink.log(1, LogTopic::Msg, "nope", "");
        sink.log(1, LogTopic::Error, "boom", "");
        assert_eq!(rx.logs.try_recv().unwrap().topic, LogTopic::Error);
        assert!(rx.logs.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let (sink, _rx, metrics) = sink(LoggerConfig::default(), 1);
        sink.log(1, LogTopic::App, "first", "");
        sink.log(1, LogTopic::App, "second", "");
        assert_eq!(metrics.get(Counter::LogRecordsDropped), 1);
    }

    #[test]
    fn test_message_sent_carries_json() {
        let (sink, mut rx, _) = sink(LoggerConfig::default(), 4);
        let msg = AclMessage::new(3, 4, "hi");
        sink.message_sent(&msg);
        let rec = rx.logs.try_recv().unwrap();
        assert_eq!(rec.agent_id, 3);
        assert_eq!(rec.message, "ACL send");
        assert!(rec.data.contains("\"receiver\":4"));
    }
}
