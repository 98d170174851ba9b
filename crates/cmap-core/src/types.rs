use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an agent, unique within one multi-agent-system instance.
pub type AgentId = i32;

/// Identifier of a multi-agent system.
pub type MasId = i32;

/// Identifier of an image group (instance) inside a MAS.
pub type InstanceId = i32;

/// Identifier of an agency inside an image group.
pub type AgencyId = i32;

/// Network address of an agency, as handed out by the directory (a host name).
pub type AgencyAddress = String;

/// Description of an agent as created by the cluster manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: AgentId,
    #[serde(default)]
    pub name: String,
    /// Behaviour selector; empty means the agency's default behaviour.
    #[serde(rename = "type", default)]
    pub agent_type: String,
    /// Opaque user configuration handed to the agent unchanged.
    #[serde(default)]
    pub custom: String,
}

impl AgentDescriptor {
    pub fn new(id: AgentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            agent_type: String::new(),
            custom: String::new(),
        }
    }

    pub fn with_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = agent_type.into();
        self
    }

    pub fn with_custom(mut self, custom: impl Into<String>) -> Self {
        self.custom = custom.into();
        self
    }
}

/// Which platform log topics are forwarded to the logging sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub active: bool,
    pub msg: bool,
    pub app: bool,
    pub status: bool,
    pub debug: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            active: true,
            msg: true,
            app: true,
            status: true,
            debug: false,
        }
    }
}

/// Identity of this agency. Immutable after bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyIdentity {
    #[serde(rename = "masid")]
    pub mas_id: MasId,
    #[serde(rename = "imid")]
    pub instance_id: InstanceId,
    #[serde(rename = "id")]
    pub agency_id: AgencyId,
    pub name: String,
}

/// Full agency configuration returned by the directory at bootstrap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgencyBootstrap {
    #[serde(rename = "masid", default)]
    pub mas_id: MasId,
    #[serde(rename = "masname", default)]
    pub mas_name: String,
    #[serde(rename = "mascustom", default)]
    pub mas_custom: String,
    #[serde(rename = "imid", default)]
    pub instance_id: InstanceId,
    #[serde(rename = "id", default)]
    pub agency_id: AgencyId,
    /// Empty name signals that the directory had no record for the agency.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub logger: LoggerConfig,
    /// Agents this agency is configured to run, in start order.
    #[serde(default)]
    pub agents: Vec<AgentDescriptor>,
}

/// Response body of `GET /api/agency`: the identity plus a snapshot of live agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgencyInfo {
    #[serde(flatten)]
    pub identity: AgencyIdentity,
    pub logger: LoggerConfig,
    pub agents: Vec<AgentDescriptor>,
}

/// Answer of the directory to an agent address lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentAddress {
    /// Host name of the agency running the agent; empty when unresolved.
    #[serde(default)]
    pub agency: AgencyAddress,
}

/// Lifecycle state of an agent execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Starting,
    Running,
    Terminating,
    Terminated,
    Crashed,
}

impl AgentState {
    /// Numeric status code reported by the control API.
    pub fn code(self) -> i32 {
        match self {
            AgentState::Starting => 0,
            AgentState::Running => 1,
            AgentState::Terminating => 2,
            AgentState::Terminated => 3,
            AgentState::Crashed => 4,
        }
    }

    /// Whether the context can still consume messages.
    pub fn is_alive(self) -> bool {
        matches!(self, AgentState::Starting | AgentState::Running)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Starting => "starting",
            AgentState::Running => "running",
            AgentState::Terminating => "terminating",
            AgentState::Terminated => "terminated",
            AgentState::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Response body of `GET /api/agency/agents/{id}/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub code: i32,
    #[serde(rename = "lastupdate")]
    pub last_update: DateTime<Utc>,
}

impl Status {
    pub fn new(state: AgentState, last_update: DateTime<Utc>) -> Self {
        Self {
            code: state.code(),
            last_update,
        }
    }
}
