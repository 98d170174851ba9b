use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentId, MasId};

/// Sender id used for payloads injected through the control API.
pub const CONTROL_SENDER: AgentId = -1;

/// Protocol tag reserved for payloads injected through the control API.
pub const CUSTOM_PROTOCOL: i32 = -1;

/// An ACL-style message exchanged between agents.
///
/// Routing only reads `receiver` and fills in the two agency fields;
/// the content is never touched on the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclMessage {
    #[serde(rename = "ts", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "perf", default)]
    pub performative: i32,
    pub sender: AgentId,
    /// Name of the agency the sender lives in.
    #[serde(rename = "agencys", default)]
    pub agency_sender: String,
    pub receiver: AgentId,
    /// Address of the agency the message is shipped to.
    #[serde(rename = "agencyr", default)]
    pub agency_receiver: String,
    #[serde(rename = "prot", default)]
    pub protocol: i32,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "convid", default)]
    pub conversation_id: i32,
}

impl AclMessage {
    /// Create a message with the default protocol and performative.
    pub fn new(sender: AgentId, receiver: AgentId, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            performative: 0,
            sender,
            agency_sender: String::new(),
            receiver,
            agency_receiver: String::new(),
            protocol: 0,
            content: content.into(),
            conversation_id: 0,
        }
    }

    /// Wrap an opaque control payload for a local agent.
    pub fn custom(receiver: AgentId, content: impl Into<String>) -> Self {
        Self::new(CONTROL_SENDER, receiver, content).with_protocol(CUSTOM_PROTOCOL)
    }

    pub fn with_protocol(mut self, protocol: i32) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_performative(mut self, performative: i32) -> Self {
        self.performative = performative;
        self
    }

    pub fn with_conversation(mut self, conversation_id: i32) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    /// Whether this message carries a control payload rather than agent traffic.
    pub fn is_custom(&self) -> bool {
        self.protocol == CUSTOM_PROTOCOL && self.sender == CONTROL_SENDER
    }

    /// Build a reply addressed back to the sender, keeping protocol and conversation.
    pub fn reply(&self, content: impl Into<String>) -> Self {
        Self::new(self.receiver, self.sender, content)
            .with_protocol(self.protocol)
            .with_conversation(self.conversation_id)
    }
}

/// Topic of a platform log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTopic {
    Msg,
    App,
    Status,
    Debug,
    Error,
}

impl std::fmt::Display for LogTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogTopic::Msg => "msg",
            LogTopic::App => "app",
            LogTopic::Status => "status",
            LogTopic::Debug => "debug",
            LogTopic::Error => "error",
        };
        f.write_str(s)
    }
}

/// A record destined for the central logger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    #[serde(rename = "masid")]
    pub mas_id: MasId,
    #[serde(rename = "agentid")]
    pub agent_id: AgentId,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub topic: LogTopic,
    #[serde(rename = "msg")]
    pub message: String,
    #[serde(default)]
    pub data: String,
}

impl LogMessage {
    pub fn new(
        mas_id: MasId,
        agent_id: AgentId,
        topic: LogTopic,
        message: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            mas_id,
            agent_id,
            timestamp: Utc::now(),
            topic,
            message: message.into(),
            data: data.into(),
        }
    }

    /// The "message sent" event mirrored for every routed message.
    pub fn acl_sent(mas_id: MasId, msg: &AclMessage) -> Self {
        let data = serde_json::to_string(msg).unwrap_or_default();
        Self::new(mas_id, msg.sender, LogTopic::Msg, "ACL send", data)
    }
}

/// A single time-series sample recorded by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    #[serde(rename = "masid")]
    pub mas_id: MasId,
    #[serde(rename = "agentid")]
    pub agent_id: AgentId,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub value: f64,
}
