//! # cmap-runtime
//!
//! Runs the agents of one agency and wires them to the mesh.
//!
//! ```text
//!   directory ──► bootstrap ──► Agency ──► roster agents (own thread or process)
//!                                 │            │ send
//!                                 │            ▼
//!                                 │      outbound queue ──► MessageRouter
//!                                 │
//!                                 └──► LogSink ──► LogForwarder / TimeSeriesForwarder
//! ```

pub mod agency;
pub mod agent;
pub mod behaviors;
pub mod host;
pub mod identity;
pub mod logger;
pub mod process;
pub mod registry;
pub mod services;
pub mod store;

pub use agency::{Agency, AgencyParts};
pub use agent::{AgentBehavior, AgentContext, AgentFactory, AgentSpawner, MasInfo};
pub use behaviors::{BehaviorRegistry, EchoBehavior, IdleBehavior, PingPongBehavior};
pub use host::{AgentHost, Outcome, ProcessCommand};
pub use identity::HostIds;
pub use logger::{ConsoleLogBackend, HttpLogBackend, LogBackend, LogForwarder, TimeSeriesForwarder};
pub use process::{ChildFrame, InitFrame, serve_agent};
pub use registry::{HttpServiceRegistry, MemoryServiceRegistry, ServiceRegistry};
pub use services::{AgentServices, ServiceEndpoints};
pub use store::{HttpStateStore, MemoryStateStore, StateStore};
