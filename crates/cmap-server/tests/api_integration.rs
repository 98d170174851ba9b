//! Control API integration tests: drive the router in-process and, for the
//! inter-agency path, two agencies talking over real sockets.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tower::ServiceExt;

use cmap_config::AgencyConfig;
use cmap_core::{AclMessage, AgencyBootstrap, AgentDescriptor, AgentId, Result};
use cmap_mesh::{ChannelTransport, HttpTransport, StaticDirectory, Transport};
use cmap_runtime::{
    Agency, AgencyParts, AgentBehavior, AgentContext, BehaviorRegistry, ConsoleLogBackend,
};

const NAME: &str = "mas-2-im-0-agency-1.mas2agencies";

/// Forwards everything it receives to the test.
struct Collector(mpsc::UnboundedSender<AclMessage>);

#[async_trait]
impl AgentBehavior for Collector {
    async fn run(&self, mut ctx: AgentContext) -> Result<()> {
        while let Some(msg) = ctx.recv().await {
            let _ = self.0.send(msg);
        }
        Ok(())
    }
}

struct Setup {
    agency: Arc<Agency>,
    app: axum::Router,
    collected: mpsc::UnboundedReceiver<AclMessage>,
    wire: mpsc::UnboundedReceiver<(String, Vec<AclMessage>)>,
}

fn descriptor(id: AgentId, agent_type: &str) -> AgentDescriptor {
    AgentDescriptor::new(id, format!("agent-{id}")).with_type(agent_type)
}

fn agency_with(
    agents: Vec<AgentDescriptor>,
    directory: StaticDirectory,
    transport: Arc<dyn Transport>,
) -> (Arc<Agency>, mpsc::UnboundedReceiver<AclMessage>) {
    let (tx, collected) = mpsc::unbounded_channel();
    let mut registry = BehaviorRegistry::builtin();
    registry.register("collector", Arc::new(Collector(tx)));
    let record = AgencyBootstrap {
        mas_id: 2,
        agency_id: 1,
        name: NAME.into(),
        agents,
        ..AgencyBootstrap::default()
    };
    let parts = AgencyParts::new(
        directory.into_shared(),
        transport,
        Arc::new(registry),
        Arc::new(ConsoleLogBackend),
    );
    let agency = Agency::new(record, AgencyConfig::default(), parts);
    agency.start().unwrap();
    (agency, collected)
}

fn setup(agents: Vec<AgentDescriptor>, directory: StaticDirectory) -> Setup {
    let (transport, wire) = ChannelTransport::new();
    let (agency, collected) = agency_with(agents, directory, Arc::new(transport));
    Setup {
        app: cmap_server::build_router(agency.clone()),
        agency,
        collected,
        wire,
    }
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, String) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    (status, body_string(resp).await)
}

fn json_request(method: &str, uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

// ── Agency info ────────────────────────────────────────────────

#[tokio::test]
async fn test_get_agency_info() {
    let s = setup(vec![descriptor(1, "collector")], StaticDirectory::new());
    let req = Request::get("/api/agency").body(Body::empty()).unwrap();
    let (status, body) = send(&s.app, req).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["name"], NAME);
    assert_eq!(json["masid"], 2);
    assert_eq!(json["id"], 1);
    assert_eq!(json["agents"][0]["id"], 1);
}

#[tokio::test]
async fn test_created_agent_shows_in_info() {
    let s = setup(vec![descriptor(1, "collector")], StaticDirectory::new());
    let body = serde_json::to_string(&descriptor(2, "idle")).unwrap();
    let (status, text) = send(&s.app, json_request("POST", "/api/agency/agents", body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(text, "Resource Created");

    let req = Request::get("/api/agency").body(Body::empty()).unwrap();
    let (_, body) = send(&s.app, req).await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let ids: Vec<i64> = json["agents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2]);
}

// ── Agent lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn test_duplicate_create_conflicts() {
    let s = setup(vec![descriptor(1, "collector")], StaticDirectory::new());
    let body = serde_json::to_string(&descriptor(1, "idle")).unwrap();
    let (status, _) = send(&s.app, json_request("POST", "/api/agency/agents", body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(s.agency.table().local_count(), 1);
}

#[tokio::test]
async fn test_malformed_descriptor_is_bad_request() {
    let s = setup(vec![], StaticDirectory::new());
    let (status, _) = send(
        &s.app,
        json_request("POST", "/api/agency/agents", "{\"id\": ".into()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_reports_liveness() {
    let s = setup(vec![descriptor(1, "collector")], StaticDirectory::new());

    let req = Request::get("/api/agency/agents/1/status").body(Body::empty()).unwrap();
    let (status, body) = send(&s.app, req).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["code"], 1);
    assert!(json["lastupdate"].is_string());

    let req = Request::get("/api/agency/agents/7/status").body(Body::empty()).unwrap();
    assert_eq!(send(&s.app, req).await.0, StatusCode::NOT_FOUND);

    let req = Request::get("/api/agency/agents/abc/status").body(Body::empty()).unwrap();
    assert_eq!(send(&s.app, req).await.0, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_delete_unknown_agent_is_not_found() {
    let s = setup(vec![descriptor(1, "collector")], StaticDirectory::new());
    let req = Request::delete("/api/agency/agents/9").body(Body::empty()).unwrap();
    let (status, body) = send(&s.app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "Resource not found");
    assert_eq!(s.agency.table().local_count(), 1);
    assert!(s.agency.table().is_local(1));
}

#[tokio::test]
async fn test_delete_agent() {
    let s = setup(vec![descriptor(1, "collector")], StaticDirectory::new());
    let req = Request::delete("/api/agency/agents/1").body(Body::empty()).unwrap();
    let (status, body) = send(&s.app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Resource deleted");
    assert_eq!(s.agency.table().local_count(), 0);

    // The ended agent still reports a terminating or terminated status.
    let req = Request::get("/api/agency/agents/1/status").body(Body::empty()).unwrap();
    let (status, body) = send(&s.app, req).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let code = json["code"].as_i64().unwrap();
    assert!(code == 2 || code == 3, "unexpected code {code}");
}

#[tokio::test]
async fn test_put_custom_reaches_agent() {
    let mut s = setup(vec![descriptor(1, "collector")], StaticDirectory::new());
    let req = Request::put("/api/agency/agents/1/custom")
        .body(Body::from("{\"setpoint\": 3}"))
        .unwrap();
    let (status, _) = send(&s.app, req).await;
    assert_eq!(status, StatusCode::OK);
    let msg = s.collected.recv().await.unwrap();
    assert!(msg.is_custom());
    assert_eq!(msg.content, "{\"setpoint\": 3}");

    let req = Request::put("/api/agency/agents/5/custom")
        .body(Body::from("ignored"))
        .unwrap();
    assert_eq!(send(&s.app, req).await.0, StatusCode::OK);
}

// ── Messages ───────────────────────────────────────────────────

#[tokio::test]
async fn test_post_msgs_delivers_locally() {
    let mut s = setup(vec![descriptor(1, "collector")], StaticDirectory::new());
    let batch = vec![AclMessage::new(40, 1, "from a peer")];
    let (status, _) = send(
        &s.app,
        json_request("POST", "/api/agency/msgs", serde_json::to_string(&batch).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(s.collected.recv().await.unwrap().content, "from a peer");
}

#[tokio::test]
async fn test_ingested_message_answered_through_router() {
    let mut s = setup(
        vec![descriptor(1, "echo")],
        StaticDirectory::new().with_agent(40, "peer-b"),
    );
    let batch = vec![AclMessage::new(40, 1, "ping")];
    send(
        &s.app,
        json_request("POST", "/api/agency/msgs", serde_json::to_string(&batch).unwrap()),
    )
    .await;

    let (address, sent) = tokio::time::timeout(Duration::from_secs(2), s.wire.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(address, "peer-b");
    assert_eq!(sent[0].receiver, 40);
    assert_eq!(sent[0].sender, 1);
    assert_eq!(sent[0].content, "ping");
    assert_eq!(sent[0].agency_sender, NAME);
}

#[tokio::test]
async fn test_msgundeliv_is_accepted() {
    let s = setup(vec![], StaticDirectory::new());
    let body = serde_json::to_string(&AclMessage::new(1, 2, "x")).unwrap();
    let (status, _) = send(&s.app, json_request("POST", "/api/agency/msgundeliv", body)).await;
    assert_eq!(status, StatusCode::CREATED);
}

// ── Protocol errors ────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_path_is_method_not_allowed() {
    let s = setup(vec![], StaticDirectory::new());
    let req = Request::get("/api/agency/unknown/thing").body(Body::empty()).unwrap();
    let (status, body) = send(&s.app, req).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body, "Method Not Allowed");
}

#[tokio::test]
async fn test_wrong_method_is_method_not_allowed() {
    let s = setup(vec![], StaticDirectory::new());
    let req = Request::get("/api/agency/msgs").body(Body::empty()).unwrap();
    let (status, body) = send(&s.app, req).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body, "Method Not Allowed");
}

#[tokio::test]
async fn test_metrics_endpoint_counts_requests() {
    let s = setup(vec![], StaticDirectory::new());
    let req = Request::get("/api/agency").body(Body::empty()).unwrap();
    send(&s.app, req).await;
    let req = Request::get("/metrics").body(Body::empty()).unwrap();
    let (status, body) = send(&s.app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("cmap_http_requests_total"));
    assert!(body.contains("cmap_agents_started_total"));
}

// ── Two agencies ───────────────────────────────────────────────

#[tokio::test]
async fn test_message_crosses_agencies_over_http() {
    // Agency B hosts collector 99 behind a real listener.
    let (agency_b, mut collected_b) = agency_with(
        vec![descriptor(99, "collector")],
        StaticDirectory::new(),
        Arc::new(ChannelTransport::new().0),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_b = listener.local_addr().unwrap();
    tokio::spawn(cmap_server::serve(listener, agency_b.clone()));

    // Agency A runs echo agent 1 and learns from the directory where 99 lives.
    let transport = HttpTransport::new(10000, Duration::from_secs(2)).unwrap();
    let (agency_a, _) = agency_with(
        vec![descriptor(1, "echo")],
        StaticDirectory::new().with_agent(99, addr_b.to_string()),
        Arc::new(transport),
    );
    agency_a.ingest(vec![AclMessage::new(99, 1, "round trip")]).await;

    let msg = tokio::time::timeout(Duration::from_secs(5), collected_b.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.content, "round trip");
    assert_eq!(msg.sender, 1);
    assert_eq!(msg.agency_receiver, addr_b.to_string());

    agency_a.shutdown();
    agency_b.shutdown();
}
