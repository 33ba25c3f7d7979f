//! HTTP region API and metrics endpoint
//!
//! Routes:
//! - `GET /health`
//! - `GET /regions`, `POST /regions`
//! - `GET /regions/{id}`, `PUT /regions/{id}`, `DELETE /regions/{id}`
//! - `GET /status`
//! - `POST /fixes` (single fix or array, same payload as MQTT)
//! - `GET /metrics` (Prometheus text format)
//!
//! Every region call goes through the engine queue, so mutations are ordered
//! with fixes from the other sources.

use crate::domain::error::GeofenceError;
use crate::domain::types::RegionSpec;
use crate::infra::metrics::Metrics;
use crate::io::fix_payload::parse_fix_payload;
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::engine::EngineHandle;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Request bodies above this size are rejected
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Shared state for request handlers
pub struct ApiState {
    pub engine: EngineHandle,
    pub metrics: Arc<Metrics>,
    pub site_id: String,
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => {
            error!(error = %e, "api_serialize_failed");
            respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "serialization failed")
        }
    }
}

fn error_body(status: StatusCode, code: &str, message: String) -> Response<Full<Bytes>> {
    json(status, &serde_json::json!({ "error": code, "message": message }))
}

fn engine_error(err: GeofenceError) -> Response<Full<Bytes>> {
    let status = match err {
        GeofenceError::DuplicateId { .. } => StatusCode::CONFLICT,
        GeofenceError::NotFound { .. } => StatusCode::NOT_FOUND,
        GeofenceError::EngineClosed => StatusCode::SERVICE_UNAVAILABLE,
        GeofenceError::StaleFix { .. }
        | GeofenceError::InvalidRegion { .. }
        | GeofenceError::InvalidFix { .. }
        | GeofenceError::InaccurateFix { .. } => StatusCode::BAD_REQUEST,
    };
    error_body(status, err.as_str(), err.to_string())
}

fn bad_request(message: String) -> Response<Full<Bytes>> {
    error_body(StatusCode::BAD_REQUEST, "bad_request", message)
}

/// Parse an update body, taking the region id from the path
fn spec_with_id(body: &[u8], id: &str) -> Result<RegionSpec, serde_json::Error> {
    let mut value: serde_json::Value = serde_json::from_slice(body)?;
    if let Some(object) = value.as_object_mut() {
        object.insert("id".to_string(), serde_json::Value::String(id.to_string()));
    }
    serde_json::from_value(value)
}

/// Dispatch a request that has already been read into memory
pub async fn route(state: &ApiState, method: &Method, path: &str, body: Bytes) -> Response<Full<Bytes>> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    match (method, segments.as_slice()) {
        (&Method::GET, ["health"]) => json(StatusCode::OK, &serde_json::json!({ "ok": true })),

        (&Method::GET, ["metrics"]) => respond(
            StatusCode::OK,
            "text/plain; version=0.0.4",
            format_prometheus_metrics(&state.metrics, &state.site_id),
        ),

        (&Method::GET, ["status"]) => match state.engine.status().await {
            Ok(status) => json(StatusCode::OK, &status),
            Err(e) => engine_error(e),
        },

        (&Method::GET, ["regions"]) => match state.engine.list().await {
            Ok(regions) => json(StatusCode::OK, &regions),
            Err(e) => engine_error(e),
        },

        (&Method::POST, ["regions"]) => {
            let spec: RegionSpec = match serde_json::from_slice(&body) {
                Ok(spec) => spec,
                Err(e) => return bad_request(e.to_string()),
            };
            match state.engine.register(spec).await {
                Ok(region) => json(StatusCode::CREATED, &region),
                Err(e) => engine_error(e),
            }
        }

        (&Method::GET, ["regions", id]) => match state.engine.get(id).await {
            Ok(Some(region)) => json(StatusCode::OK, &region),
            Ok(None) => engine_error(GeofenceError::NotFound { id: id.to_string() }),
            Err(e) => engine_error(e),
        },

        (&Method::PUT, ["regions", id]) => {
            let spec = match spec_with_id(&body, id) {
                Ok(spec) => spec,
                Err(e) => return bad_request(e.to_string()),
            };
            match state.engine.update(spec).await {
                Ok(region) => json(StatusCode::OK, &region),
                Err(e) => engine_error(e),
            }
        }

        (&Method::DELETE, ["regions", id]) => match state.engine.unregister(id).await {
            Ok(region) => json(StatusCode::OK, &region),
            Err(e) => engine_error(e),
        },

        (&Method::POST, ["fixes"]) => {
            let text = match std::str::from_utf8(&body) {
                Ok(text) => text,
                Err(e) => return bad_request(e.to_string()),
            };
            match parse_fix_payload(text, state.engine.now_ms()) {
                Ok(fixes) => {
                    let received = fixes.len();
                    let accepted = fixes.into_iter().filter(|fix| state.engine.submit_fix(*fix, "http")).count();
                    json(StatusCode::ACCEPTED, &serde_json::json!({ "received": received, "accepted": accepted }))
                }
                Err(e) => bad_request(e.to_string()),
            }
        }

        (_, ["health" | "metrics" | "status" | "regions" | "fixes"]) | (_, ["regions", _]) => {
            error_body(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", format!("{method} {path}"))
        }

        _ => error_body(StatusCode::NOT_FOUND, "not_found", format!("no route for {path}")),
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(path = %path, error = %e, "api_body_read_failed");
            return Ok(error_body(StatusCode::PAYLOAD_TOO_LARGE, "body_rejected", e.to_string()));
        }
    };

    let response = route(&state, &method, &path, body).await;
    debug!(method = %method, path = %path, status = %response.status().as_u16(), "api_request");
    Ok(response)
}

/// Bind the API port and serve until shutdown
pub async fn start_api_server(
    port: u16,
    state: Arc<ApiState>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!(port = %port, "api_server_started");
    serve(listener, state, shutdown).await;
    Ok(())
}

/// Accept loop on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<ApiState>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("api_server_shutdown");
                    return;
                }
            }
            result = listener.accept() => {
                let (stream, _) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "api_accept_failed");
                        continue;
                    }
                };
                let state = state.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| handle_request(req, state.clone()));
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        debug!(error = %e, "api_connection_error");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::clock::{Clock, ManualClock};
    use crate::infra::config::Config;
    use crate::io::notify_channel::create_notify_channel;
    use crate::services::engine::{engine_channel, GeofenceEngine};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;

    const HOME: &str = r#"{"id":"home","lat":46.0,"lon":14.5,"radiusMeters":200,"transitions":["ENTER"]}"#;

    struct Harness {
        state: ApiState,
        shutdown_tx: watch::Sender<bool>,
        _notify_rx: mpsc::Receiver<crate::domain::types::TransitionEvent>,
    }

    fn start() -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000));
        let metrics = Arc::new(Metrics::new());
        let (notify_tx, notify_rx) = create_notify_channel(16);
        let (engine, command_rx) = engine_channel(16, clock.clone(), metrics.clone());
        let mut core = GeofenceEngine::new(&Config::default(), clock, notify_tx, metrics.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move { core.run(command_rx, shutdown_rx).await });
        Harness {
            state: ApiState { engine, metrics, site_id: "test".to_string() },
            shutdown_tx,
            _notify_rx: notify_rx,
        }
    }

    async fn call(h: &Harness, method: Method, path: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let response = route(&h.state, &method, path, Bytes::from(body.to_string())).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_region_crud() {
        let h = start();

        let (status, body) = call(&h, Method::POST, "/regions", HOME).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], "home");
        assert_eq!(body["radiusMeters"], 200.0);

        let (status, body) = call(&h, Method::POST, "/regions", HOME).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "duplicate_id");

        let (status, body) = call(&h, Method::GET, "/regions/home", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transitions"], serde_json::json!(["enter"]));

        // Path id wins over the body id
        let update = r#"{"id":"other","lat":46.0,"lon":14.5,"radiusMeters":350,"transitions":["ENTER","EXIT"]}"#;
        let (status, body) = call(&h, Method::PUT, "/regions/home", update).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "home");
        assert_eq!(body["radiusMeters"], 350.0);

        let (status, body) = call(&h, Method::GET, "/regions", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));

        let (status, _) = call(&h, Method::DELETE, "/regions/home", "").await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&h, Method::DELETE, "/regions/home", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
        let (status, _) = call(&h, Method::GET, "/regions/home", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        h.shutdown_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let h = start();

        let (status, body) = call(&h, Method::POST, "/regions", "{").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");

        let negative = r#"{"id":"bad","lat":46.0,"lon":14.5,"radiusMeters":-1,"transitions":["ENTER"]}"#;
        let (status, body) = call(&h, Method::POST, "/regions", negative).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_region");

        let (status, _) = call(&h, Method::PUT, "/regions/missing", HOME).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&h, Method::PATCH, "/regions/home", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        let (status, _) = call(&h, Method::GET, "/nowhere", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        h.shutdown_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_fixes_and_status() {
        let h = start();
        call(&h, Method::POST, "/regions", HOME).await;

        let (status, body) =
            call(&h, Method::POST, "/fixes", r#"[{"lat":46.0,"lon":14.5,"ts":2000},{"lat":46.0,"lon":14.5,"ts":3000}]"#)
                .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["received"], 2);
        assert_eq!(body["accepted"], 2);

        // Status is queued behind the fixes
        let (status, body) = call(&h, Method::GET, "/status", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lastFixMs"], 3000);
        assert_eq!(body["regions"][0]["inside"], true);

        let (status, _) = call(&h, Method::POST, "/fixes", "nope").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        h.shutdown_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_health_and_metrics_over_http() {
        let h = start();
        let Harness { state, shutdown_tx, _notify_rx } = h;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, Arc::new(state), shutdown_tx.subscribe()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("geofence_fixes_total{site=\"test\"}"));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.ends_with("{\"ok\":true}"));

        shutdown_tx.send(true).unwrap();
        server.await.unwrap();
    }
}
