use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use cmap_core::{
    AgencyAddress, AgencyBootstrap, AgencyError, AgencyId, AgentAddress, AgentId, InstanceId,
    MasId, Result,
};

/// Lookup service mapping agents and agencies to their directory records.
///
/// `resolve_agent` returns an empty address when the directory has no entry
/// for the agent; transport failures are reported as errors.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve_agent(&self, mas_id: MasId, agent_id: AgentId) -> Result<AgencyAddress>;

    async fn resolve_agency(
        &self,
        mas_id: MasId,
        instance_id: InstanceId,
        agency_id: AgencyId,
    ) -> Result<AgencyBootstrap>;
}

// ── HTTP directory ─────────────────────────────────────────────

/// Directory client speaking the agent management service's REST API.
pub struct HttpDirectory {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgencyError::Directory(format!("failed to build client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AgencyError::Directory(format!("GET {url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AgencyError::Directory(format!(
                "GET {url}: unexpected status {status}"
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| AgencyError::Directory(format!("GET {url}: invalid body: {e}")))
    }
}

#[async_trait]
impl AddressResolver for HttpDirectory {
    async fn resolve_agent(&self, mas_id: MasId, agent_id: AgentId) -> Result<AgencyAddress> {
        let url = format!(
            "{}/api/clonemap/mas/{}/agents/{}/address",
            self.base_url, mas_id, agent_id
        );
        let addr: AgentAddress = self.get_json(&url).await?;
        debug!(agent_id, agency = %addr.agency, "resolved agent address");
        Ok(addr.agency)
    }

    async fn resolve_agency(
        &self,
        mas_id: MasId,
        instance_id: InstanceId,
        agency_id: AgencyId,
    ) -> Result<AgencyBootstrap> {
        let url = format!(
            "{}/api/clonemap/mas/{}/imgroup/{}/agency/{}",
            self.base_url, mas_id, instance_id, agency_id
        );
        let boot: AgencyBootstrap = self.get_json(&url).await?;
        if boot.name.is_empty() {
            warn!(mas_id, instance_id, agency_id, "directory returned an empty agency record");
        }
        Ok(boot)
    }
}

// ── In-memory directory ────────────────────────────────────────

/// Directory backed by in-memory tables, for tests and single-host setups.
#[derive(Default)]
pub struct StaticDirectory {
    agents: Mutex<HashMap<AgentId, AgencyAddress>>,
    agencies: Mutex<HashMap<(InstanceId, AgencyId), AgencyBootstrap>>,
    lookups: AtomicU64,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(self, agent_id: AgentId, address: impl Into<String>) -> Self {
        self.set_agent(agent_id, address);
        self
    }

    pub fn with_agency(self, bootstrap: AgencyBootstrap) -> Self {
        self.agencies
            .lock()
            .insert((bootstrap.instance_id, bootstrap.agency_id), bootstrap);
        self
    }

    pub fn set_agent(&self, agent_id: AgentId, address: impl Into<String>) {
        self.agents.lock().insert(agent_id, address.into());
    }

    /// Number of `resolve_agent` calls served so far.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl AddressResolver for StaticDirectory {
    async fn resolve_agent(&self, _mas_id: MasId, agent_id: AgentId) -> Result<AgencyAddress> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.agents.lock().get(&agent_id).cloned().unwrap_or_default())
    }

    async fn resolve_agency(
        &self,
        _mas_id: MasId,
        instance_id: InstanceId,
        agency_id: AgencyId,
    ) -> Result<AgencyBootstrap> {
        Ok(self
            .agencies
            .lock()
            .get(&(instance_id, agency_id))
            .cloned()
            .unwrap_or_default())
    }
}
