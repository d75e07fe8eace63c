use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response, StatusCode, header};

use crate::ports::{HandlerError, Service};

const ROBOTS_TXT: &str = "User-Agent: *\nDisallow: /\n";

/// Serves a robots.txt that keeps crawlers off the whole host.
#[derive(Debug, Default, Clone, Copy)]
pub struct RobotsTxtService;

#[async_trait]
impl Service for RobotsTxtService {
    async fn serve(&self, _req: Request<AxumBody>) -> Result<Response<AxumBody>, HandlerError> {
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(AxumBody::from(ROBOTS_TXT))
            .map_err(|e| HandlerError::InternalError(e.to_string()))
    }
}
