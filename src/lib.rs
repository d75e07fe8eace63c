//! uniapi - a config-driven gateway exposing status and control endpoints for
//! game servers and other backends behind one HTTP listener.
//!
//! Every endpoint is a [`Service`](ports::Service) mounted at a path. Services
//! are built from `{type, config}` envelopes through type-tagged registries,
//! and an envelope may nest further envelopes: a `csgo` service is built from
//! a commander (`rcon`, or `stream` over a `tcp` streamer), a `token-protected`
//! service wraps any other service.
//!
//! # Features
//! - Capability registries for services, commanders and streamers
//! - Live CS:GO session tracking from UDP, streamed or POSTed log lines
//! - Memoized `status` queries merged with the tracked session state
//! - Online/offline webhook notifications with bounded retries
//! - Hot reload of the service set on config change or SIGHUP
//! - Structured tracing via `tracing` and graceful shutdown
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use uniapi::{HttpHandler, Registries, ServiceRouter};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = uniapi::config::loader::load_config("uniapi.yml").await?;
//! let registries = Registries::with_builtins();
//! let router = ServiceRouter::build(&cfg.services, &registries)?;
//! router.start_all().await?;
//! let handler = Arc::new(HttpHandler::new(Arc::new(router)));
//! // Wire `handler` into an axum router (see the binary crate)
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! Ports (traits) live in `ports`, their implementations in `adapters`, and
//! the registry plus the CS:GO session machinery in `core`.
//!
//! # Error Handling
//! Library code returns `thiserror` enums; the binary and the config loader
//! use `eyre::Result<T>` with `WrapErr` context.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{FileConfigProvider, HttpClientAdapter, HttpHandler, ServiceRouter},
    core::{CsgoMonitor, Registries, SessionTracker, StatusCache},
    ports::{Commander, Service, Streamer, http_client::HttpClient},
    utils::GracefulShutdown,
};
