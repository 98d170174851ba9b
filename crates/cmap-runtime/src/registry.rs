//! Client side of the directory facilitator (DF), where agents publish and
//! look up services.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use cmap_core::{AgencyError, Graph, MasId, Result, Service};

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Publish a service. The returned copy carries the registry-assigned id.
    async fn register(&self, mas_id: MasId, service: Service) -> Result<Service>;
    async fn search(&self, mas_id: MasId, desc: &str) -> Result<Vec<Service>>;
    /// Services with `desc` no further than `dist` from `node_id` in the MAS graph.
    async fn search_local(
        &self,
        mas_id: MasId,
        desc: &str,
        node_id: i32,
        dist: f64,
    ) -> Result<Vec<Service>>;
    async fn deregister(&self, mas_id: MasId, service_id: &str) -> Result<()>;
    async fn put_graph(&self, mas_id: MasId, graph: Graph) -> Result<()>;
    async fn graph(&self, mas_id: MasId) -> Result<Option<Graph>>;
}

pub struct HttpServiceRegistry {
    client: reqwest::Client,
    url: String,
}

impl HttpServiceRegistry {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgencyError::Registry(format!("failed to build client: {e}")))?;
        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, mas_id: MasId, path: &str) -> String {
        format!("{}/api/df/{mas_id}/{path}", self.url)
    }

    /// GET a JSON list; a `null` body counts as empty.
    async fn get_list(&self, url: &str) -> Result<Vec<Service>> {
        let list: Option<Vec<Service>> = self.get_json(url).await?;
        Ok(list.unwrap_or_default())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AgencyError::Registry(e.to_string()))?;
        if resp.status() != StatusCode::OK {
            return Err(unexpected("GET", url, resp.status()));
        }
        resp.json()
            .await
            .map_err(|e| AgencyError::Registry(format!("GET {url}: {e}")))
    }
}

fn unexpected(method: &str, url: &str, status: StatusCode) -> AgencyError {
    AgencyError::Registry(format!("{method} {url}: unexpected status {status}"))
}

#[async_trait]
impl ServiceRegistry for HttpServiceRegistry {
    async fn register(&self, mas_id: MasId, service: Service) -> Result<Service> {
        let url = self.endpoint(mas_id, "svc");
        let resp = self
            .client
            .post(&url)
            .json(&service)
            .send()
            .await
            .map_err(|e| AgencyError::Registry(e.to_string()))?;
        if resp.status() != StatusCode::CREATED {
            return Err(unexpected("POST", &url, resp.status()));
        }
        resp.json()
            .await
            .map_err(|e| AgencyError::Registry(format!("POST {url}: {e}")))
    }

    async fn search(&self, mas_id: MasId, desc: &str) -> Result<Vec<Service>> {
        self.get_list(&self.endpoint(mas_id, &format!("svc/desc/{desc}")))
            .await
    }

    async fn search_local(
        &self,
        mas_id: MasId,
        desc: &str,
        node_id: i32,
        dist: f64,
    ) -> Result<Vec<Service>> {
        let path = format!("svc/desc/{desc}/node/{node_id}/dist/{dist}");
        self.get_list(&self.endpoint(mas_id, &path)).await
    }

    async fn deregister(&self, mas_id: MasId, service_id: &str) -> Result<()> {
        let url = self.endpoint(mas_id, &format!("svc/id/{service_id}"));
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| AgencyError::Registry(e.to_string()))?;
        match resp.status() {
            StatusCode::OK => Ok(()),
            status => Err(unexpected("DELETE", &url, status)),
        }
    }

    async fn put_graph(&self, mas_id: MasId, graph: Graph) -> Result<()> {
        let url = self.endpoint(mas_id, "graph");
        let resp = self
            .client
            .post(&url)
            .json(&graph)
            .send()
            .await
            .map_err(|e| AgencyError::Registry(e.to_string()))?;
        match resp.status() {
            StatusCode::CREATED => Ok(()),
            status => Err(unexpected("POST", &url, status)),
        }
    }

    async fn graph(&self, mas_id: MasId) -> Result<Option<Graph>> {
        self.get_json(&self.endpoint(mas_id, "graph")).await
    }
}

#[derive(Default)]
struct MasServices {
    services: Vec<Service>,
    graph: Option<Graph>,
}

/// Process-local registry, used when no DF is configured.
#[derive(Default)]
pub struct MemoryServiceRegistry {
    mas: Mutex<HashMap<MasId, MasServices>>,
    next_id: AtomicU64,
}

impl MemoryServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceRegistry for MemoryServiceRegistry {
    async fn register(&self, mas_id: MasId, mut service: Service) -> Result<Service> {
        service.id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        self.mas
            .lock()
            .entry(mas_id)
            .or_default()
            .services
            .push(service.clone());
        Ok(service)
    }

    async fn search(&self, mas_id: MasId, desc: &str) -> Result<Vec<Service>> {
        Ok(self
            .mas
            .lock()
            .get(&mas_id)
            .map(|m| m.services.iter().filter(|s| s.desc == desc).cloned().collect())
            .unwrap_or_default())
    }

    async fn search_local(
        &self,
        mas_id: MasId,
        desc: &str,
        node_id: i32,
        dist: f64,
    ) -> Result<Vec<Service>> {
        let mas = self.mas.lock();
        let Some(m) = mas.get(&mas_id) else {
            return Ok(Vec::new());
        };
        // Without a graph only the node itself is in reach.
        let reach = m
            .graph
            .as_ref()
            .map(|g| g.distances(node_id))
            .unwrap_or_else(|| vec![(node_id, 0.0)]);
        Ok(m.services
            .iter()
            .filter(|s| s.desc == desc)
            .filter_map(|s| {
                let (_, d) = reach.iter().find(|(n, _)| *n == s.node_id)?;
                (*d <= dist).then(|| Service {
                    dist: *d,
                    ..s.clone()
                })
            })
            .collect())
    }

    async fn deregister(&self, mas_id: MasId, service_id: &str) -> Result<()> {
        let mut mas = self.mas.lock();
        let m = mas.entry(mas_id).or_default();
        let before = m.services.len();
        m.services.retain(|s| s.id != service_id);
        if m.services.len() == before {
            return Err(AgencyError::Registry(format!("unknown service {service_id}")));
        }
        Ok(())
    }

    async fn put_graph(&self, mas_id: MasId, graph: Graph) -> Result<()> {
        self.mas.lock().entry(mas_id).or_default().graph = Some(graph);
        Ok(())
    }

    async fn graph(&self, mas_id: MasId) -> Result<Option<Graph>> {
        Ok(self.mas.lock().get(&mas_id).and_then(|m| m.graph.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Path,
        http::StatusCode,
        routing::{delete, get, post},
    };
    use cmap_core::GraphEdge;

    fn line_graph() -> Graph {
        Graph {
            node: vec![],
            edge: vec![
                GraphEdge { n1: 1, n2: 2, weight: 1.0 },
                GraphEdge { n1: 2, n2: 3, weight: 2.0 },
            ],
        }
    }

    #[tokio::test]
    async fn test_memory_register_and_search() {
        let df = MemoryServiceRegistry::new();
        let a = df.register(1, Service::new("battery")).await.unwrap();
        let b = df.register(1, Service::new("battery")).await.unwrap();
        df.register(1, Service::new("pv")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(df.search(1, "battery").await.unwrap().len(), 2);
        assert!(df.search(2, "battery").await.unwrap().is_empty());

        df.deregister(1, &a.id).await.unwrap();
        assert_eq!(df.search(1, "battery").await.unwrap(), vec![b]);
        assert!(df.deregister(1, "nope").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_local_search_uses_graph_distance() {
        let df = MemoryServiceRegistry::new();
        df.register(1, Service::new("pv").with_node(1)).await.unwrap();
        df.register(1, Service::new("pv").with_node(3)).await.unwrap();

        let same_node = df.search_local(1, "pv", 1, 10.0).await.unwrap();
        assert_eq!(same_node.len(), 1);

        df.put_graph(1, line_graph()).await.unwrap();
        let near = df.search_local(1, "pv", 2, 1.0).await.unwrap();
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].node_id, 1);
        let all = df.search_local(1, "pv", 2, 2.0).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(df.graph(1).await.unwrap(), Some(line_graph()));
    }

    async fn serve_df() -> String {
        let app = Router::new()
            .route(
                "/api/df/{mas}/svc",
                post(|Json(mut svc): Json<Service>| async move {
                    svc.id = "svc-1".into();
                    (StatusCode::CREATED, Json(svc))
                }),
            )
            .route(
                "/api/df/{mas}/svc/desc/{desc}",
                get(|Path((_mas, desc)): Path<(MasId, String)>| async move {
                    if desc == "none" {
                        return Json(serde_json::Value::Null);
                    }
                    Json(serde_json::json!([{ "id": "svc-1", "agentid": 2, "desc": desc }]))
                }),
            )
            .route(
                "/api/df/{mas}/svc/desc/{desc}/node/{node}/dist/{dist}",
                get(|Path((_m, desc, node, dist)): Path<(MasId, String, i32, f64)>| async move {
                    Json(vec![Service {
                        id: "near".into(),
                        node_id: node,
                        dist,
                        ..Service::new(desc)
                    }])
                }),
            )
            .route("/api/df/{mas}/svc/id/{id}", delete(|| async { StatusCode::OK }))
            .route(
                "/api/df/{mas}/graph",
                post(|| async { StatusCode::CREATED }).get(|| async { Json(line_graph()) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_http_registry_speaks_df_api() {
        let df = HttpServiceRegistry::new(serve_df().await, Duration::from_secs(2)).unwrap();

        let svc = df.register(0, Service::new("battery")).await.unwrap();
        assert_eq!(svc.id, "svc-1");
        assert_eq!(svc.desc, "battery");

        let found = df.search(0, "battery").await.unwrap();
        assert_eq!(found[0].agent_id, 2);
        assert!(df.search(0, "none").await.unwrap().is_empty());

        let near = df.search_local(0, "pv", 4, 1.5).await.unwrap();
        assert_eq!(near[0].node_id, 4);
        assert_eq!(near[0].dist, 1.5);

        df.deregister(0, "svc-1").await.unwrap();
        df.put_graph(0, line_graph()).await.unwrap();
        assert_eq!(df.graph(0).await.unwrap(), Some(line_graph()));
    }

    #[tokio::test]
    async fn test_http_registry_rejects_wrong_status() {
        let app = Router::new().route("/api/df/{mas}/svc", post(|| async { StatusCode::OK }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let df = HttpServiceRegistry::new(format!("http://{addr}"), Duration::from_secs(2)).unwrap();
        let err = df.register(0, Service::new("x")).await.unwrap_err();
        assert!(matches!(err, AgencyError::Registry(_)));
    }
}
