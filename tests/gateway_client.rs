//! Integration tests for the gateway client
//!
//! Each test runs a stub gateway on localhost and drives the client
//! through the capability traits.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use fleetroll::cloud::{
    AutoscalingApi, CloudError, GatewayClient, IdentityApi, LoadBalancingApi,
};
use fleetroll::fleet::{BalancerKind, Capacity};

#[derive(Clone, Default)]
struct Stub {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Stub {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

async fn list_fleets(
    Path(region): Path<String>,
    Query(query): Query<std::collections::HashMap<String, String>>,
) -> Json<Value> {
    let fleet = |name: &str| {
        json!({
            "name": name,
            "region": region,
            "capacity": {"min": 1, "desired": 2, "max": 4},
            "tags": {"app": "gateway"}
        })
    };
    match query.get("nextToken").map(String::as_str) {
        None => Json(json!({"fleets": [fleet("a")], "nextToken": "p2"})),
        Some(_) => Json(json!({"fleets": [fleet("b")]})),
    }
}

async fn update_capacity(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Path((region, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> StatusCode {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer secret") {
        return StatusCode::UNAUTHORIZED;
    }
    if name == "ghost" {
        return StatusCode::NOT_FOUND;
    }
    if name == "broken" {
        return StatusCode::BAD_REQUEST;
    }
    stub.record(format!("capacity {} {} {}", region, name, body));
    StatusCode::NO_CONTENT
}

async fn suspend(
    State(stub): State<Stub>,
    Path((_region, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> StatusCode {
    stub.record(format!("suspend {} {}", name, body["processes"]));
    StatusCode::OK
}

async fn balancers(
    Path((_region, _name)): Path<(String, String)>,
    Query(query): Query<std::collections::HashMap<String, String>>,
) -> Json<Value> {
    let kind = query.get("kind").cloned().unwrap_or_default();
    Json(json!({"balancers": [format!("{}-lb", kind)]}))
}

async fn target_health(Path((_region, id)): Path<(String, String)>) -> Json<Value> {
    Json(json!({"endpoints": [
        {"id": "10.0.0.1", "state": "healthy"},
        {"id": id, "state": "initial"}
    ]}))
}

async fn identity() -> Json<Value> {
    Json(json!({"accountId": "111122223333"}))
}

async fn spawn_gateway() -> (String, Stub) {
    let stub = Stub::default();
    let app = Router::new()
        .route("/v1/regions/{region}/fleets", get(list_fleets))
        .route(
            "/v1/regions/{region}/fleets/{name}/capacity",
            put(update_capacity),
        )
        .route(
            "/v1/regions/{region}/fleets/{name}/processes/suspend",
            post(suspend),
        )
        .route("/v1/regions/{region}/fleets/{name}/balancers", get(balancers))
        .route(
            "/v1/regions/{region}/target-groups/{id}/target-health",
            get(target_health),
        )
        .route("/v1/identity", get(identity))
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stub gateway");
    let addr = listener.local_addr().expect("Failed to get local address");

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), stub)
}

#[tokio::test]
async fn test_list_fleets_pages() {
    let (url, _stub) = spawn_gateway().await;
    let client = GatewayClient::new(&url, None).unwrap();

    let first = client.list_fleets("us-east-1", None).await.unwrap();
    assert_eq!(first.fleets.len(), 1);
    assert_eq!(first.fleets[0].name, "a");
    assert_eq!(first.fleets[0].capacity, Capacity::new(1, 2, 4).unwrap());
    assert_eq!(first.next_token.as_deref(), Some("p2"));

    let second = client.list_fleets("us-east-1", Some("p2")).await.unwrap();
    assert_eq!(second.fleets[0].name, "b");
    assert_eq!(second.next_token, None);
}

#[tokio::test]
async fn test_update_capacity_sends_bearer_token() {
    let (url, stub) = spawn_gateway().await;
    let client = GatewayClient::new(&url, Some("secret".to_string())).unwrap();

    client
        .update_capacity("web", "us-east-1", Capacity::new(1, 3, 6).unwrap())
        .await
        .unwrap();

    let calls = stub.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with("capacity us-east-1 web"));
    assert!(calls[0].contains("\"desired\":3"));
}

#[tokio::test]
async fn test_error_statuses() {
    let (url, _stub) = spawn_gateway().await;

    let anonymous = GatewayClient::new(&url, None).unwrap();
    let err = anonymous
        .update_capacity("web", "us-east-1", Capacity::pinned(1))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::Api { status: 401, .. }));

    let client = GatewayClient::new(&url, Some("secret".to_string())).unwrap();
    let err = client
        .update_capacity("ghost", "us-east-1", Capacity::pinned(1))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CloudError::FleetNotFound {
            name: "ghost".to_string(),
            region: "us-east-1".to_string()
        }
    );

    let err = client
        .update_capacity("broken", "us-east-1", Capacity::pinned(1))
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::Api { status: 400, .. }));
}

#[tokio::test]
async fn test_suspend_processes_body() {
    let (url, stub) = spawn_gateway().await;
    let client = GatewayClient::new(&url, None).unwrap();

    client
        .suspend_processes("web", "us-east-1", &["AZRebalance".to_string()])
        .await
        .unwrap();
    assert_eq!(stub.calls(), vec![r#"suspend web ["AZRebalance"]"#.to_string()]);
}

#[tokio::test]
async fn test_balancers_and_health() {
    let (url, _stub) = spawn_gateway().await;
    let client = GatewayClient::new(&url, None).unwrap();

    let balancers = client
        .attached_balancers("web", "us-east-1", BalancerKind::TargetGroup)
        .await
        .unwrap();
    assert_eq!(balancers, vec!["target-group-lb".to_string()]);

    let arn = "arn:aws:elasticloadbalancing:us-east-1:1:targetgroup/web/abc";
    let endpoints = client.target_group_health(arn, "us-east-1").await.unwrap();
    assert_eq!(endpoints.len(), 2);
    assert_eq!(endpoints[0].state, "healthy");
    assert_eq!(endpoints[1].id, arn);
}

#[tokio::test]
async fn test_identity_and_missing_route() {
    let (url, _stub) = spawn_gateway().await;
    let client = GatewayClient::new(&url, None).unwrap();

    assert_eq!(client.account_id().await.unwrap(), "111122223333");

    let err = client
        .classic_instance_health("lb-1", "us-east-1")
        .await
        .unwrap_err();
    assert_eq!(err, CloudError::BalancerNotFound("lb-1".to_string()));
}
