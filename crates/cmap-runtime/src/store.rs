//! Persistent agent state, kept by the central logger under
//! `/api/state/{masid}/{agentid}`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cmap_core::{AgencyError, AgentId, MasId, Result};

/// Where agents park state that should survive a restart.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, mas_id: MasId, agent_id: AgentId, state: String) -> Result<()>;
    /// `None` when nothing was stored for the agent yet.
    async fn load(&self, mas_id: MasId, agent_id: AgentId) -> Result<Option<String>>;
}

/// Body exchanged with the logger's state endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredState {
    #[serde(rename = "masid")]
    pub mas_id: MasId,
    #[serde(rename = "agentid")]
    pub agent_id: AgentId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub state: String,
}

pub struct HttpStateStore {
    client: reqwest::Client,
    url: String,
}

impl HttpStateStore {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgencyError::StateStore(format!("failed to build client: {e}")))?;
        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, mas_id: MasId, agent_id: AgentId) -> String {
        format!("{}/api/state/{mas_id}/{agent_id}", self.url)
    }
}

#[async_trait]
impl StateStore for HttpStateStore {
    async fn save(&self, mas_id: MasId, agent_id: AgentId, state: String) -> Result<()> {
        let url = self.endpoint(mas_id, agent_id);
        let body = StoredState {
            mas_id,
            agent_id,
            timestamp: Utc::now(),
            state,
        };
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgencyError::StateStore(e.to_string()))?;
        match resp.status() {
            StatusCode::CREATED => Ok(()),
            status => Err(AgencyError::StateStore(format!("POST {url}: unexpected status {status}"))),
        }
    }

    async fn load(&self, mas_id: MasId, agent_id: AgentId) -> Result<Option<String>> {
        let url = self.endpoint(mas_id, agent_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AgencyError::StateStore(e.to_string()))?;
        match resp.status() {
            StatusCode::OK => {
                let stored: StoredState = resp
                    .json()
                    .await
                    .map_err(|e| AgencyError::StateStore(e.to_string()))?;
                Ok(Some(stored.state))
            }
            StatusCode::NOT_FOUND => {
                debug!(agent_id, "no stored state");
                Ok(None)
            }
            status => Err(AgencyError::StateStore(format!("GET {url}: unexpected status {status}"))),
        }
    }
}

/// Keeps state in process. Used when no logger is configured.
#[derive(Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<(MasId, AgentId), String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, mas_id: MasId, agent_id: AgentId, state: String) -> Result<()> {
        self.states.lock().insert((mas_id, agent_id), state);
        Ok(())
    }

    async fn load(&self, mas_id: MasId, agent_id: AgentId) -> Result<Option<String>> {
        Ok(self.states.lock().get(&(mas_id, agent_id)).cloned())
    }
}
