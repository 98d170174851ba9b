use thiserror::Error;

use crate::types::AgentId;

/// Unified error type for the agency runtime.
#[derive(Error, Debug)]
pub enum AgencyError {
    // ── Agent lifecycle errors ─────────────────────────────────
    #[error("agent {0} already exists in this agency")]
    DuplicateAgent(AgentId),

    #[error("agent {0} not found")]
    AgentNotFound(AgentId),

    #[error("inbox of agent {0} is closed")]
    InboxClosed(AgentId),

    #[error("agent {id} failed: {reason}")]
    AgentFailed { id: AgentId, reason: String },

    // ── Routing errors ─────────────────────────────────────────
    #[error("no address known for agent {0}")]
    UnresolvedDestination(AgentId),

    #[error("agent {0} is hosted locally")]
    AlreadyLocal(AgentId),

    #[error("directory error: {0}")]
    Directory(String),

    #[error("delivery to {address} failed: {reason}")]
    Delivery { address: String, reason: String },

    #[error("logger error: {0}")]
    Logger(String),

    // ── Agent service errors ───────────────────────────────────
    #[error("state store error: {0}")]
    StateStore(String),

    #[error("service registry error: {0}")]
    Registry(String),

    // ── Control surface errors ─────────────────────────────────
    #[error("method not allowed: {0}")]
    Protocol(String),

    // ── Config / bootstrap errors ──────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AgencyError>;
