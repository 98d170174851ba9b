//! Platform services reachable from inside an agent.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cmap_config::AgencyConfig;
use cmap_core::Result;

use crate::registry::{HttpServiceRegistry, MemoryServiceRegistry, ServiceRegistry};
use crate::store::{HttpStateStore, MemoryStateStore, StateStore};

/// State store and service registry handed to every agent context.
#[derive(Clone)]
pub struct AgentServices {
    pub state: Arc<dyn StateStore>,
    pub registry: Arc<dyn ServiceRegistry>,
}

impl Default for AgentServices {
    fn default() -> Self {
        Self {
            state: Arc::new(MemoryStateStore::new()),
            registry: Arc::new(MemoryServiceRegistry::new()),
        }
    }
}

/// Where the services live. `None` selects the in-memory variant.
///
/// Serializable so an agent process can connect to the same services.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    pub state_url: Option<String>,
    pub registry_url: Option<String>,
    pub timeout_secs: u64,
}

impl ServiceEndpoints {
    /// The logger doubles as state store; the DF is the registry.
    pub fn from_config(config: &AgencyConfig) -> Self {
        Self {
            state_url: config.logger.enabled.then(|| config.logger.url.clone()),
            registry_url: config.df.enabled.then(|| config.df.url.clone()),
            timeout_secs: config.df.timeout_secs,
        }
    }

    pub fn connect(&self) -> Result<AgentServices> {
        let timeout = Duration::from_secs(self.timeout_secs.max(1));
        let state: Arc<dyn StateStore> = match &self.state_url {
            Some(url) => Arc::new(HttpStateStore::new(url.clone(), timeout)?),
            None => Arc::new(MemoryStateStore::new()),
        };
        let registry: Arc<dyn ServiceRegistry> = match &self.registry_url {
            Some(url) => Arc::new(HttpServiceRegistry::new(url.clone(), timeout)?),
            None => Arc::new(MemoryServiceRegistry::new()),
        };
        Ok(AgentServices { state, registry })
    }
}
