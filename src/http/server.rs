//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create the Axum router with the cluster admin endpoints and a
//!   catch-all handler for the configured routes
//! - Wire up middleware (tracing, timeout, request ID)
//! - Resolve each request's owner, serve it locally or forward it
//! - Report load (in-flight / ceiling) and flush the sticky cache at
//!   request end
//!
//! # Data Flow
//! 1. Match the request path against the configured route prefixes
//! 2. Buffer the body and fold query/form pairs into one parameter map
//! 3. Resolve the owner on the blocking pool (the store is synchronous)
//! 4. Local owner: handle here, then flush claims and load write-back
//! 5. Remote owner: relay through the forwarder, transport errors map to
//!    502 and capacity exhaustion to 503

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::cluster::{bind_routes, Coordinator, NodeStatus, RouteBinding, RouteError};
use crate::config::NodeConfig;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::proxy::ProxyForwarder;

/// Bodies are buffered for parameter extraction and replay on forward.
const MAX_BUFFERED_BODY: usize = 1024 * 1024;

/// One configured route, bound to its minted endpoint identity.
struct BoundRoute {
    path_prefix: String,
    binding: RouteBinding,
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Absent when clustering is disabled; every request is then local.
    pub coordinator: Option<Arc<Coordinator>>,
    pub forwarder: ProxyForwarder,
    routes: Arc<Vec<BoundRoute>>,
    in_flight: Arc<AtomicUsize>,
    max_concurrent: usize,
    advertise_address: String,
}

impl AppState {
    /// Longest-prefix match over the configured routes.
    fn match_route(&self, path: &str) -> Option<&BoundRoute> {
        self.routes
            .iter()
            .filter(|r| path.starts_with(&r.path_prefix))
            .max_by_key(|r| r.path_prefix.len())
    }

    /// Load as a percentage of the concurrency ceiling.
    fn current_load(&self) -> f64 {
        let in_flight = self.in_flight.load(Ordering::Relaxed);
        (in_flight as f64 / self.max_concurrent as f64) * 100.0
    }
}

/// Decrements the in-flight counter when the request finishes, even on
/// early returns.
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// HTTP server for a cluster node.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server over an already-joined coordinator.
    pub fn new(config: &NodeConfig, coordinator: Option<Arc<Coordinator>>) -> Self {
        let bindings = bind_routes(
            config
                .routes
                .iter()
                .map(|r| (r.name.clone(), r.sticky.clone()))
                .collect(),
        );
        let mut routes = Vec::with_capacity(config.routes.len());
        for route in &config.routes {
            if let Some(binding) = bindings.get(&route.name) {
                routes.push(BoundRoute {
                    path_prefix: route.path_prefix.clone(),
                    binding: binding.clone(),
                });
            }
        }

        let state = AppState {
            coordinator,
            forwarder: ProxyForwarder::new(),
            routes: Arc::new(routes),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_concurrent: config.listener.max_concurrent.max(1),
            advertise_address: config.advertise_address().to_string(),
        };

        let router = Router::new()
            .route("/cluster/status", get(status_handler))
            .route("/cluster/release", post(release_handler))
            .route("/cluster/release_all", post(release_all_handler))
            .route("/{*path}", any(route_handler))
            .route("/", any(route_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.timeouts.request_secs,
            )))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http());

        Self { router }
    }

    /// Run the server until the shutdown signal fires; in-flight requests
    /// drain before this returns.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut rx = shutdown.subscribe();
        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Catch-all handler: resolve ownership, then serve locally or forward.
async fn route_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let _guard = InFlightGuard::enter(state.in_flight.clone());

    let path = request.uri().path().to_string();
    let Some(route) = state.match_route(&path) else {
        return (StatusCode::NOT_FOUND, "no matching route").into_response();
    };
    let binding = route.binding.clone();

    let (parts, body) = request.into_parts();
    let body_bytes = match axum::body::to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "request body rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };
    let params = crate::http::params::extract_params(&parts, &body_bytes);

    let Some(coordinator) = state.coordinator.clone() else {
        // Standalone mode: no store, no stickiness.
        return local_response(&state.advertise_address, &binding, &[]);
    };

    let resolve_binding = binding.clone();
    let resolve_params = params.clone();
    let resolved = tokio::task::spawn_blocking(move || {
        coordinator.resolve_route(&resolve_binding, &resolve_params)
    })
    .await;

    let decision = match resolved {
        Ok(Ok(decision)) => decision,
        Ok(Err(RouteError::NoCapacity { server_type })) => {
            tracing::warn!(server_type = %server_type, "no server with spare capacity");
            metrics::record_resolve("no_capacity");
            return (StatusCode::SERVICE_UNAVAILABLE, "cluster at capacity").into_response();
        }
        Ok(Err(RouteError::Store(err))) => {
            tracing::error!(error = %err, "owner resolution failed");
            metrics::record_resolve("error");
            return (StatusCode::INTERNAL_SERVER_ERROR, "owner resolution failed")
                .into_response();
        }
        Err(err) => {
            tracing::error!(error = %err, "resolution task failed");
            metrics::record_resolve("error");
            return (StatusCode::INTERNAL_SERVER_ERROR, "owner resolution failed")
                .into_response();
        }
    };

    let response = if decision.is_local {
        metrics::record_resolve("local");
        local_response(&state.advertise_address, &binding, &decision.sticky_values)
    } else {
        metrics::record_resolve("proxied");
        let owner = decision.owner.clone();
        let req = Request::from_parts(parts, Body::from(body_bytes));
        match state.forwarder.forward(&owner, req).await {
            Ok(resp) => {
                metrics::record_proxy(resp.status().as_u16());
                resp.into_response()
            }
            Err(err) => {
                tracing::error!(owner = %owner, error = %err, "forward to owner failed");
                metrics::record_proxy(StatusCode::BAD_GATEWAY.as_u16());
                (StatusCode::BAD_GATEWAY, "owner unreachable").into_response()
            }
        }
    };

    // Write back load and any claims queued during this request.
    let cache = decision.cache;
    cache.set_load(state.current_load());
    let flushed = cache.pending_writes().len();
    let flush = tokio::task::spawn_blocking(move || cache.flush()).await;
    match flush {
        Ok(Ok(())) => metrics::record_flush(flushed),
        Ok(Err(err)) => tracing::warn!(error = %err, "sticky cache flush failed"),
        Err(err) => tracing::warn!(error = %err, "flush task failed"),
    }

    response
}

fn local_response(address: &str, binding: &RouteBinding, sticky_values: &[String]) -> Response {
    Json(serde_json::json!({
        "node": address,
        "endpoint": binding.endpoint.name,
        "sticky_values": sticky_values,
    }))
    .into_response()
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    node: NodeStatus,
    in_flight: usize,
}

async fn status_handler(State(state): State<AppState>) -> Response {
    let Some(coordinator) = state.coordinator.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "clustering disabled").into_response();
    };
    match tokio::task::spawn_blocking(move || coordinator.status()).await {
        Ok(Ok(node)) => Json(StatusResponse {
            node,
            in_flight: state.in_flight.load(Ordering::Relaxed),
        })
        .into_response(),
        Ok(Err(err)) => {
            tracing::error!(error = %err, "status query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "status query failed").into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "status task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "status query failed").into_response()
        }
    }
}

#[derive(Deserialize)]
struct ReleaseRequest {
    values: Vec<String>,
}

#[derive(Serialize)]
struct ReleaseResponse {
    removed: usize,
}

/// Explicit stickiness release (session end).
async fn release_handler(
    State(state): State<AppState>,
    Json(request): Json<ReleaseRequest>,
) -> Response {
    let Some(coordinator) = state.coordinator.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "clustering disabled").into_response();
    };
    match tokio::task::spawn_blocking(move || coordinator.release(&request.values)).await {
        Ok(Ok(removed)) => Json(ReleaseResponse { removed }).into_response(),
        Ok(Err(err)) => {
            tracing::error!(error = %err, "sticky release failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "sticky release failed").into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "release task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "sticky release failed").into_response()
        }
    }
}

/// Drop every sticky value this node holds.
async fn release_all_handler(State(state): State<AppState>) -> Response {
    let Some(coordinator) = state.coordinator.clone() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "clustering disabled").into_response();
    };
    match tokio::task::spawn_blocking(move || coordinator.release_all()).await {
        Ok(Ok(removed)) => Json(ReleaseResponse { removed }).into_response(),
        Ok(Err(err)) => {
            tracing::error!(error = %err, "sticky release failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "sticky release failed").into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "release task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "sticky release failed").into_response()
        }
    }
}
