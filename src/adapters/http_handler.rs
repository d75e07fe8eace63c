use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use arc_swap::ArcSwap;
use axum::{
    Router,
    body::Body as AxumBody,
    http::{StatusCode, header},
    routing::any,
};
use eyre::{Result, WrapErr};
use hyper::{Request, Response};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::{
    config::models::ServiceSet,
    core::registry::{Registries, RegistryError},
    ports::Service,
    tracing_setup::create_request_span,
    utils::clean_path,
};

/// A service envelope in the set could not be turned into a service.
#[derive(Error, Debug)]
#[error("service at {path:?}: {source}")]
pub struct BuildError {
    pub path: String,
    #[source]
    pub source: RegistryError,
}

/// Immutable path -> service table built from one `ServiceSet`.
///
/// Keys are cleaned paths without a leading slash, and lookups clean the
/// request path the same way, so `/csgo`, `csgo/` and `/a/../csgo` all reach
/// the service configured under `csgo`. Only exact matches dispatch.
pub struct ServiceRouter {
    services: HashMap<String, Arc<dyn Service>>,
}

impl ServiceRouter {
    /// Build every service in `set`. Fails on the first envelope that does
    /// not resolve; nothing is started here.
    pub fn build(set: &ServiceSet, registries: &Registries) -> Result<Self, BuildError> {
        let mut services = HashMap::with_capacity(set.len());
        for (key, envelope) in set {
            let path = clean_path(key);
            let service = registries
                .new_service(envelope)
                .map_err(|source| BuildError {
                    path: path.clone(),
                    source,
                })?;
            tracing::info!("Mounted {} service at /{}", envelope.kind, path);
            services.insert(path, service);
        }
        Ok(Self { services })
    }

    /// A router with no services; every request is a 404.
    pub fn empty() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&Arc<dyn Service>> {
        self.services.get(&clean_path(path))
    }

    /// Mounted paths, sorted.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.services.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Start every service. If one fails, the ones already started are
    /// stopped again and the error is returned.
    pub async fn start_all(&self) -> Result<()> {
        let mut started: Vec<&Arc<dyn Service>> = Vec::with_capacity(self.services.len());
        for path in self.paths() {
            let service = &self.services[path];
            if let Err(e) = service.start().await {
                for service in started {
                    service.stop().await;
                }
                return Err(e).wrap_err_with(|| format!("Failed to start service at /{path}"));
            }
            started.push(service);
        }
        tracing::info!("Started {} service(s)", self.services.len());
        Ok(())
    }

    pub async fn stop_all(&self) {
        for path in self.paths() {
            tracing::debug!("Stopping service at /{}", path);
            self.services[path].stop().await;
        }
        tracing::info!("Stopped {} service(s)", self.services.len());
    }

    /// Route `req` to the service mounted at its path.
    pub async fn dispatch(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>> {
        let path = clean_path(req.uri().path());
        let Some(service) = self.services.get(&path) else {
            return Response::builder()
                .status(StatusCode::NOT_FOUND)
                .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(AxumBody::from("404 page not found\n"))
                .wrap_err("Failed to build not found response");
        };

        match service.serve(req).await {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::error!("Service at /{} failed: {}", path, e);
                let body = serde_json::json!({ "status": e.to_string() });
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(AxumBody::from(body.to_string()))
                    .wrap_err("Failed to build error response")
            }
        }
    }
}

/// HTTP entry point holding the live router. Reloads swap the router
/// atomically; requests already in flight finish on the router they started
/// with.
pub struct HttpHandler {
    router: ArcSwap<ServiceRouter>,
    next_request_id: AtomicU64,
}

impl HttpHandler {
    pub fn new(router: Arc<ServiceRouter>) -> Self {
        Self {
            router: ArcSwap::new(router),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn current(&self) -> Arc<ServiceRouter> {
        self.router.load_full()
    }

    /// Install `router` and hand back the one it replaced.
    pub fn replace(&self, router: Arc<ServiceRouter>) -> Arc<ServiceRouter> {
        self.router.swap(router)
    }

    pub async fn handle_request(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed).to_string();
        let span = create_request_span(req.method().as_str(), req.uri().path(), &request_id);
        let router = self.current();

        let response = router.dispatch(req).instrument(span.clone()).await?;
        span.record("http.status_code", response.status().as_u16());
        Ok(response)
    }

    /// Axum app sending every path, the root included, through `handler`.
    pub fn into_router(self: Arc<Self>) -> Router {
        let route = |handler: Arc<HttpHandler>| {
            any(move |req: Request<AxumBody>| {
                let handler = handler.clone();
                async move {
                    match handler.handle_request(req).await {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::error!("Request handling error: {:?}", e);
                            let mut response =
                                Response::new(AxumBody::from("Internal Server Error"));
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            response
                        }
                    }
                }
            })
        };

        Router::new()
            .route("/", route(self.clone()))
            .route("/{*path}", route(self))
            .layer(TraceLayer::new_for_http())
    }
}
