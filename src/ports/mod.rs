//! Ports: the capability interfaces collaborators implement or consume.
pub mod commander;
pub mod config_provider;
pub mod http_client;
pub mod service;
pub mod streamer;

pub use commander::{CommandError, CommandResult, Commander};
pub use service::{HandlerError, Service};
pub use streamer::{AsyncStream, BoxedStream, StreamError, StreamResult, Streamer};
