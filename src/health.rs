// Copyright 2025 The Kubernetes Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Health check endpoint.
//!
//! Serves `/healthz` (liveness), `/readyz` and `/readyz/verbose` on the
//! manager's health address.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::controller::Controller;

/// Boxed future for health checks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Health check status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The component is healthy.
    Healthy,
    /// The component is unhealthy.
    Unhealthy,
}

impl From<bool> for HealthStatus {
    fn from(healthy: bool) -> Self {
        if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}

/// Result of running every registered check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// The overall health status.
    pub status: HealthStatus,

    /// Individual checker results, by name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, HealthStatus>,
}

/// A named readiness check.
pub trait HealthChecker: Send + Sync + 'static {
    /// Returns `true` if the component is healthy.
    fn check(&self) -> BoxFuture<'_, bool>;

    /// Returns the name of this checker.
    fn name(&self) -> &str;
}

/// Adapter for implementing [`HealthChecker`] with a function.
pub struct FunctionHealthChecker<F, Fut>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    name: String,
    check_fn: F,
}

impl<F, Fut> FunctionHealthChecker<F, Fut>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    /// Creates a new function-based health checker.
    pub fn new(name: impl Into<String>, check_fn: F) -> Self {
        Self {
            name: name.into(),
            check_fn,
        }
    }
}

impl<F, Fut> HealthChecker for FunctionHealthChecker<F, Fut>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    fn check(&self) -> BoxFuture<'_, bool> {
        Box::pin((self.check_fn)())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Exposes a hosted controller's [`Controller::health_check`] as a checker.
pub(crate) struct ControllerHealthChecker(pub(crate) Arc<dyn Controller>);

impl HealthChecker for ControllerHealthChecker {
    fn check(&self) -> BoxFuture<'_, bool> {
        self.0.health_check()
    }

    fn name(&self) -> &str {
        self.0.name()
    }
}

/// Health check registry.
#[derive(Clone, Default)]
pub struct HealthRegistry {
    checkers: Arc<RwLock<Vec<Arc<dyn HealthChecker>>>>,
}

impl HealthRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a health checker.
    ///
    /// Names are unique: a checker whose name is already registered is
    /// ignored and `false` is returned.
    pub async fn register(&self, checker: Arc<dyn HealthChecker>) -> bool {
        let mut checkers = self.checkers.write().await;
        if checkers.iter().any(|c| c.name() == checker.name()) {
            return false;
        }
        checkers.push(checker);
        true
    }

    /// Runs all health checks and returns the results.
    pub async fn check_all(&self) -> HealthReport {
        let checkers = self.checkers.read().await;
        let mut checks = BTreeMap::new();
        let mut overall_healthy = true;

        for checker in checkers.iter() {
            let healthy = checker.check().await;
            overall_healthy &= healthy;
            checks.insert(checker.name().to_string(), HealthStatus::from(healthy));
        }

        HealthReport {
            status: HealthStatus::from(overall_healthy),
            checks,
        }
    }

    /// Returns the number of registered checkers.
    pub async fn len(&self) -> usize {
        self.checkers.read().await.len()
    }

    /// Returns true if there are no registered checkers.
    pub async fn is_empty(&self) -> bool {
        self.checkers.read().await.is_empty()
    }
}

/// Parses a bind address, accepting the `:port` shorthand for all interfaces.
pub fn parse_bind_address(addr: &str) -> Result<SocketAddr, std::net::AddrParseError> {
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}").parse(),
        None => addr.parse(),
    }
}

/// Health check server bound to a listening socket.
pub struct HealthServer {
    registry: HealthRegistry,
    listener: TcpListener,
}

impl HealthServer {
    /// Binds the server to `addr`.
    pub async fn bind(addr: SocketAddr, registry: HealthRegistry) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { registry, listener })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves requests until `cancel` is triggered.
    pub async fn serve(self, cancel: CancellationToken) -> std::io::Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(%addr, "health server listening");
        }

        loop {
            let (stream, _) = tokio::select! {
                accepted = self.listener.accept() => accepted?,
                _ = cancel.cancelled() => {
                    tracing::debug!("health server stopped");
                    return Ok(());
                }
            };

            let registry = self.registry.clone();
            let io = TokioIo::new(stream);

            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    handle_request(req, registry.clone())
                });

                if let Err(error) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    tracing::debug!(%error, "health connection closed with error");
                }
            });
        }
    }
}

fn handle_request<B>(
    req: Request<B>,
    registry: HealthRegistry,
) -> impl Future<Output = Result<Response<Full<Bytes>>, hyper::Error>> + Send {
    let path = req.uri().path().to_owned();
    async move { Ok(route(&path, &registry).await) }
}

async fn route(path: &str, registry: &HealthRegistry) -> Response<Full<Bytes>> {
    match path {
        "/healthz" => respond(StatusCode::OK, "text/plain", "ok"),
        "/readyz" => {
            let report = registry.check_all().await;
            if report.status == HealthStatus::Healthy {
                respond(StatusCode::OK, "text/plain", "ok")
            } else {
                respond(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "not ready")
            }
        }
        "/readyz/verbose" => {
            let report = registry.check_all().await;
            let status = match report.status {
                HealthStatus::Healthy => StatusCode::OK,
                HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            };
            let json = serde_json::to_string(&report).unwrap_or_default();
            respond(status, "application/json", json)
        }
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
    }
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
