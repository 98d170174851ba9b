//! # cmap-core
//!
//! Core types and primitives for the cmap agency runtime.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! agent and agency descriptors, the ACL message, the unified error type,
//! lifecycle events, metrics counters and the platform logging sink handle.

pub mod error;
pub mod event;
pub mod logsink;
pub mod message;
pub mod metrics;
pub mod service;
pub mod types;

pub use error::{AgencyError, Result};
pub use event::{Event, EventBus, RouteKind};
pub use logsink::{LogSink, SinkReceivers};
pub use message::{AclMessage, LogMessage, LogTopic, TimeSeriesPoint};
pub use metrics::{Counter, Metrics};
pub use service::{Graph, GraphEdge, GraphNode, Service};
pub use types::*;
