//! API regression tests.
//!
//! Drives the full router: creates a deployment, pushes health samples,
//! ticks it through a rollback, and checks the status codes and envelopes
//! the daemon serves.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bluegreen_api::build_router;
use bluegreen_core::{
    ControllerConfig, DriverError, InstanceHandle, PoolId, PoolSpec, Provisioner, WeightSetter,
};
use bluegreen_rollout::DeploymentController;
use bluegreen_state::StateStore;
use serde_json::{Value, json};
use tower::ServiceExt;

struct NoopDriver;

impl WeightSetter for NoopDriver {
    fn set_weights(&self, _: &PoolId, _: u32, _: &PoolId, _: u32) -> Result<(), DriverError> {
        Ok(())
    }
}

impl Provisioner for NoopDriver {
    fn provision(&self, spec: &PoolSpec) -> Result<Vec<InstanceHandle>, DriverError> {
        Ok((0..spec.desired_count)
            .map(|i| format!("{}#{i}", spec.revision))
            .collect())
    }

    fn terminate_instances(&self, _: &[InstanceHandle]) -> Result<(), DriverError> {
        Ok(())
    }
}

fn test_router() -> Router {
    let driver = Arc::new(NoopDriver);
    let store = StateStore::open_in_memory().unwrap();
    let controller = DeploymentController::new(&ControllerConfig::default(), driver.clone(), driver)
        .with_store(store)
        .unwrap();
    build_router(Arc::new(controller))
}

fn create_body(app: &str) -> Value {
    json!({
        "application": app,
        "plan": { "type": "linear", "percent": 20, "interval_secs": 60 },
        "pools": {
            "blue": { "revision": format!("{app}:1"), "desired_count": 2 },
            "green": { "revision": format!("{app}:2"), "desired_count": 2 }
        },
        "now": 0
    })
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };
    let resp = router.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn list_deployments_empty() {
    let router = test_router();
    let (status, body) = send(&router, "GET", "/api/v1/deployments", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn create_and_get_deployment() {
    let router = test_router();
    let (status, body) = send(&router, "POST", "/api/v1/deployments", Some(create_body("web"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["id"], "web-000001");

    let (status, body) = send(&router, "GET", "/api/v1/deployments/web-000001", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "shifting");
    assert_eq!(body["data"]["blue_weight"], 100);
    assert_eq!(body["data"]["green_weight"], 0);
}

#[tokio::test]
async fn conflicting_create_rejected() {
    let router = test_router();
    send(&router, "POST", "/api/v1/deployments", Some(create_body("web"))).await;
    let (status, body) = send(&router, "POST", "/api/v1/deployments", Some(create_body("web"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("web-000001"));
}

#[tokio::test]
async fn decreasing_targets_rejected() {
    let router = test_router();
    let mut body = create_body("web");
    body["plan"] = json!({ "type": "targets", "targets": [[50, 60], [30, 60], [100, 60]] });
    let (status, body) = send(&router, "POST", "/api/v1/deployments", Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn unknown_deployment_not_found() {
    let router = test_router();
    let (status, _) = send(&router, "GET", "/api/v1/deployments/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&router, "POST", "/api/v1/deployments/nope/tick?now=5", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unhealthy_samples_roll_back_on_tick() {
    let router = test_router();
    send(&router, "POST", "/api/v1/deployments", Some(create_body("web"))).await;

    let (status, body) = send(&router, "POST", "/api/v1/deployments/web-000001/tick?now=0", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["green_weight"], 20);

    for ts in [30, 40] {
        let sample = json!({
            "pool_id": "web-000001-green",
            "timestamp": ts,
            "unhealthy_hosts": 2,
            "http_5xx": 0
        });
        let (status, _) = send(&router, "POST", "/api/v1/samples", Some(sample)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&router, "POST", "/api/v1/deployments/web-000001/tick?now=60", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "rolled_back");
    assert_eq!(body["data"]["blue_weight"], 100);
    assert_eq!(body["data"]["rollback"]["trigger"], "alarm");

    let (status, body) = send(&router, "GET", "/api/v1/deployments/web-000001/history", None).await;
    assert_eq!(status, StatusCode::OK);
    let states: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["to"].as_str().unwrap())
        .collect();
    assert_eq!(states, ["provisioning", "shifting", "rolling_back", "rolled_back"]);
}

#[tokio::test]
async fn operator_rollback() {
    let router = test_router();
    send(&router, "POST", "/api/v1/deployments", Some(create_body("web"))).await;

    let req = json!({ "reason": "bad config", "now": 10 });
    let (status, body) = send(&router, "POST", "/api/v1/deployments/web-000001/rollback", Some(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "rolled_back");
    assert_eq!(body["data"]["rollback"]["reason"], "bad config");
    assert_eq!(body["data"]["rollback"]["trigger"], "request");
}

#[tokio::test]
async fn alarm_definitions_endpoint() {
    let router = test_router();
    let (status, body) = send(&router, "GET", "/api/v1/applications/web/alarms", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        [
            "webblueUnhealthyHostAlarm",
            "webblue5xxAlarm",
            "webgreenUnhealthyHostAlarm",
            "webgreen5xxAlarm"
        ]
    );
}

#[tokio::test]
async fn pool_observation_round_trip() {
    let router = test_router();
    send(&router, "POST", "/api/v1/deployments", Some(create_body("web"))).await;

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/pools/web-000001-green/observed",
        Some(json!({ "running": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["observed_count"], 1);
    assert_eq!(body["data"]["desired_count"], 2);

    let (status, body) = send(&router, "GET", "/api/v1/pools/web-000001-blue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"]["status"], "active");
    assert_eq!(body["data"]["weight"], 100);

    let (status, _) = send(&router, "GET", "/api/v1/pools/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn archived_deployment_served_from_store_then_purged() {
    let router = test_router();
    send(&router, "POST", "/api/v1/deployments", Some(create_body("web"))).await;

    let (status, _) = send(&router, "DELETE", "/api/v1/deployments/web-000001", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let req = json!({ "reason": "bad config", "now": 10 });
    send(&router, "POST", "/api/v1/deployments/web-000001/rollback", Some(req)).await;

    let (status, body) = send(&router, "GET", "/api/v1/deployments/web-000001", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["archived"], true);

    let req = json!({ "reason": "again", "now": 20 });
    let (status, _) = send(&router, "POST", "/api/v1/deployments/web-000001/rollback", Some(req)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&router, "DELETE", "/api/v1/deployments/web-000001", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _) = send(&router, "GET", "/api/v1/deployments/web-000001/history", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
