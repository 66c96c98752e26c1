//! Axum route handlers for the litegix driver API.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use litegix_core::{Capabilities, DriverHandle, PluginInfo, TaskConfig, TaskId};
use litegix_driver::LitegixDriver;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::GatewayError;

// ── Shared state ─────────────────────────────────────────────────────────────

type Driver = Arc<LitegixDriver>;

/// Stop timeout used when the request names none.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

// ── Request / response types ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PluginResponse {
    pub info: PluginInfo,
    pub capabilities: Capabilities,
}

#[derive(Debug, Deserialize)]
pub struct StopBody {
    #[serde(default = "default_stop_timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub signal: Option<String>,
}

fn default_stop_timeout() -> u64 {
    DEFAULT_STOP_TIMEOUT_MS
}

#[derive(Debug, Deserialize)]
pub struct SignalBody {
    pub signal: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecBody {
    pub command: Vec<String>,
    #[serde(default)]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct DestroyQuery {
    #[serde(default)]
    pub force: bool,
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Build the application router around `driver`.
pub fn create_router(driver: Driver) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/plugin", get(plugin))
        .route("/v1/tasks", post(start_task))
        .route("/v1/tasks/recover", post(recover_task))
        .route("/v1/tasks/{id}", get(inspect_task).delete(destroy_task))
        .route("/v1/tasks/{id}/stop", post(stop_task))
        .route("/v1/tasks/{id}/wait", post(wait_task))
        .route("/v1/tasks/{id}/signal", post(signal_task))
        .route("/v1/tasks/{id}/exec", post(exec_task))
        .with_state(driver)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// `GET /health`: liveness probe.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

/// `GET /v1/plugin`: plugin identity and capabilities.
pub async fn plugin(State(driver): State<Driver>) -> impl IntoResponse {
    Json(PluginResponse {
        info: driver.plugin_info(),
        capabilities: driver.capabilities(),
    })
}

/// `POST /v1/tasks`: start a task and return its handle.
///
/// # Errors
/// Propagates [`DriverError`](litegix_driver::DriverError) from the driver.
pub async fn start_task(
    State(driver): State<Driver>,
    Json(config): Json<TaskConfig>,
) -> Result<impl IntoResponse, GatewayError> {
    let handle = driver.start_task(config).await?;
    Ok((StatusCode::CREATED, Json(handle)))
}

/// `POST /v1/tasks/recover`: re-register a task from its handle.
///
/// # Errors
/// Returns a 400 if the handle carries no decodable snapshot.
pub async fn recover_task(
    State(driver): State<Driver>,
    Json(handle): Json<DriverHandle>,
) -> Result<impl IntoResponse, GatewayError> {
    driver.recover_task(&handle)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /v1/tasks/{id}`: task status.
///
/// # Errors
/// Returns a 404 for unknown tasks.
pub async fn inspect_task(
    State(driver): State<Driver>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(driver.inspect_task(&TaskId::new(id))?))
}

/// `POST /v1/tasks/{id}/stop`: stop the task's VM.
///
/// # Errors
/// Returns a 404 for unknown tasks and a 409 for tasks without a VM.
pub async fn stop_task(
    State(driver): State<Driver>,
    Path(id): Path<String>,
    Json(body): Json<StopBody>,
) -> Result<impl IntoResponse, GatewayError> {
    let signal = body.signal.as_deref().unwrap_or("SIGTERM");
    driver
        .stop_task(&TaskId::new(id), Duration::from_millis(body.timeout_ms), signal)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /v1/tasks/{id}/wait`: block until the task finishes.
///
/// # Errors
/// Returns a 404 for unknown tasks and a 503 if the driver shuts down first.
pub async fn wait_task(
    State(driver): State<Driver>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let waiter = driver.wait_task(&TaskId::new(id))?;
    let exit = waiter
        .await
        .map_err(|_| GatewayError::Unavailable("driver shut down while waiting".to_owned()))?;
    Ok(Json(exit))
}

/// `POST /v1/tasks/{id}/signal`: signal the task's VM process.
///
/// # Errors
/// Returns a 404 for unknown tasks and a 409 for tasks without a VM.
pub async fn signal_task(
    State(driver): State<Driver>,
    Path(id): Path<String>,
    Json(body): Json<SignalBody>,
) -> Result<impl IntoResponse, GatewayError> {
    driver.signal_task(&TaskId::new(id), &body.signal)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /v1/tasks/{id}/exec`: run a command in the task. Always 501.
///
/// # Errors
/// Always fails; exec is not supported.
pub async fn exec_task(
    State(driver): State<Driver>,
    Path(id): Path<String>,
    Json(body): Json<ExecBody>,
) -> Result<impl IntoResponse, GatewayError> {
    if body.command.is_empty() {
        return Err(GatewayError::InvalidRequest("command must not be empty".to_owned()));
    }
    let exit = driver.exec_task(
        &TaskId::new(id),
        &body.command,
        Duration::from_millis(body.timeout_ms),
    )?;
    Ok(Json(exit))
}

/// `DELETE /v1/tasks/{id}?force=bool`: tear the task down.
///
/// # Errors
/// Returns a 404 for unknown tasks and a 409 for running tasks without `force`.
pub async fn destroy_task(
    State(driver): State<Driver>,
    Path(id): Path<String>,
    Query(query): Query<DestroyQuery>,
) -> Result<impl IntoResponse, GatewayError> {
    driver.destroy_task(&TaskId::new(id), query.force).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        response::Response,
    };
    use litegix_core::{DriverConfig, TaskSpec};
    use litegix_executor::{ExecutorError, VmLifecycle, VmRecord, VmStatus};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    struct StaticVms;

    #[async_trait]
    impl VmLifecycle for StaticVms {
        async fn create_and_start(
            &self,
            _spec: &TaskSpec,
            task_id: &TaskId,
        ) -> Result<VmRecord, ExecutorError> {
            let workspace = PathBuf::from("/nonexistent/litegix").join(task_id.workspace_name());
            Ok(VmRecord::new(
                task_id.clone(),
                None,
                workspace.clone(),
                workspace.join("firecracker.sock"),
                workspace.join("rootfs.ext4"),
                4242,
            ))
        }

        async fn stop(&self, _record: &VmRecord, _timeout: Duration) -> Result<(), ExecutorError> {
            Ok(())
        }

        async fn destroy(&self, _record: &VmRecord) -> Result<(), ExecutorError> {
            Ok(())
        }

        async fn status(&self, _record: &VmRecord) -> Result<VmStatus, ExecutorError> {
            Ok(VmStatus::running(std::process::id()))
        }

        async fn remove_workspace(&self, _task_id: &TaskId) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    fn test_app() -> Router {
        let config = DriverConfig::new(
            PathBuf::from("/boot/vmlinux"),
            PathBuf::from("/nonexistent/litegix"),
        );
        create_router(Arc::new(LitegixDriver::with_lifecycle(config, Arc::new(StaticVms))))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let req = match builder.body(body) {
            Ok(r) => r,
            Err(e) => panic!("failed to build request: {e}"),
        };
        match app.clone().oneshot(req).await {
            Ok(r) => r,
            Err(e) => panic!("handler error: {e}"),
        }
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = match axum::body::to_bytes(resp.into_body(), 64 * 1024).await {
            Ok(b) => b,
            Err(e) => panic!("failed to read body: {e}"),
        };
        match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => panic!("invalid JSON: {e}"),
        }
    }

    fn task_body(id: &str) -> Value {
        json!({
            "id": id,
            "name": "web",
            "alloc_id": "alloc-1",
            "driver_config": {"image": "alpine:3.20", "vpu_count": 1, "mem_size": 128}
        })
    }

    #[tokio::test]
    async fn health_response_format_returns_ok_with_status_field() {
        let app = test_app();
        let resp = send(&app, Method::GET, "/health", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn plugin_reports_name_and_capabilities() {
        let app = test_app();
        let resp = send(&app, Method::GET, "/v1/plugin", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["info"]["name"], "litegix-fc-driver");
        assert_eq!(body["capabilities"]["send_signals"], true);
        assert_eq!(body["capabilities"]["exec"], false);
    }

    #[tokio::test]
    async fn start_inspect_destroy_round() {
        let app = test_app();

        let resp = send(&app, Method::POST, "/v1/tasks", Some(task_body("t1"))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let handle = json_body(resp).await;
        assert_eq!(handle["version"], 1);
        assert_eq!(handle["driver_state"]["container_name"], "web-alloc-1");

        let resp = send(&app, Method::POST, "/v1/tasks", Some(task_body("t1"))).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT, "duplicate start must conflict");

        let resp = send(&app, Method::GET, "/v1/tasks/t1", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let status = json_body(resp).await;
        assert_eq!(status["state"], "running");
        assert_eq!(status["driver_attributes"]["pid"], "4242");

        let resp = send(&app, Method::DELETE, "/v1/tasks/t1", None).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT, "running task needs force");

        let resp = send(&app, Method::DELETE, "/v1/tasks/t1?force=true", None).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = send(&app, Method::GET, "/v1/tasks/t1", None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_spec_is_bad_request() {
        let app = test_app();
        let body = json!({
            "id": "t1",
            "name": "web",
            "alloc_id": "alloc-1",
            "driver_config": {"vcpu_count": 1, "memory_mib": 128}
        });
        let resp = send(&app, Method::POST, "/v1/tasks", Some(body)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn stop_of_running_task_is_no_content() {
        let app = test_app();
        send(&app, Method::POST, "/v1/tasks", Some(task_body("t1"))).await;

        let resp = send(
            &app,
            Method::POST,
            "/v1/tasks/t1/stop",
            Some(json!({"timeout_ms": 0, "signal": "SIGTERM"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn exec_is_not_implemented() {
        let app = test_app();
        send(&app, Method::POST, "/v1/tasks", Some(task_body("t1"))).await;

        let resp = send(&app, Method::POST, "/v1/tasks/t1/exec", Some(json!({"command": ["ls"]}))).await;
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn unknown_task_operations_are_not_found() {
        let app = test_app();
        let cases = [
            (Method::POST, "/v1/tasks/ghost/stop", Some(json!({}))),
            (Method::POST, "/v1/tasks/ghost/wait", None),
            (Method::POST, "/v1/tasks/ghost/signal", Some(json!({"signal": "SIGTERM"}))),
            (Method::DELETE, "/v1/tasks/ghost?force=true", None),
        ];
        for (method, uri, body) in cases {
            let resp = send(&app, method, uri, body).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn recover_without_snapshot_is_bad_request() {
        let app = test_app();
        let body = json!({
            "version": 1,
            "config": task_body("t9"),
            "driver_state": null
        });
        let resp = send(&app, Method::POST, "/v1/tasks/recover", Some(body)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn recovered_task_reports_unknown_and_rejects_signals() {
        let app = test_app();
        let resp = send(&app, Method::POST, "/v1/tasks", Some(task_body("t3"))).await;
        let handle = json_body(resp).await;
        send(&app, Method::DELETE, "/v1/tasks/t3?force=true", None).await;

        let resp = send(&app, Method::POST, "/v1/tasks/recover", Some(handle)).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = send(&app, Method::GET, "/v1/tasks/t3", None).await;
        assert_eq!(json_body(resp).await["state"], "unknown");

        let resp = send(&app, Method::POST, "/v1/tasks/t3/signal", Some(json!({"signal": "SIGHUP"}))).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
