use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Error type for service request handling
///
/// Anything a service returns as `Err` is turned into a 500 response with a
/// small JSON body by the dispatcher.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Internal server error: {0}")]
    InternalError(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Service handles HTTP requests for the path it is mounted at
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Handle an incoming HTTP request
    async fn serve(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>, HandlerError>;

    /// Start background work (log listeners, workers). Called once after the
    /// service set is built.
    async fn start(&self) -> eyre::Result<()> {
        Ok(())
    }

    /// Stop background work. Called when the service set is replaced or the
    /// process shuts down.
    async fn stop(&self) {}
}
