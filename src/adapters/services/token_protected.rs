//! Bearer-token gate in front of another service.
//!
//! Only requests that arrived through the Cloudflare edge (they carry
//! `CF-Connecting-IP`) are checked; direct requests from the local network
//! pass straight through.
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{HeaderMap, Request, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    core::registry::{ConstructError, Resolver, parse_config},
    ports::{HandlerError, Service},
};

const EDGE_CLIENT_HEADER: &str = "cf-connecting-ip";

#[derive(Debug, Clone, Deserialize)]
pub struct TokenProtectedConfig {
    #[serde(default)]
    pub tokens: Vec<String>,
    /// Nested `{type, config}` service envelope
    pub service: Value,
}

/// Accepts `Bearer <t>`, `Token <t>` (scheme case-insensitive) or a bare `<t>`.
pub fn validate_token(header: &str, tokens: &[String]) -> bool {
    let parts: Vec<&str> = header.split_whitespace().collect();
    let token = match parts.as_slice() {
        [token] => *token,
        [scheme, token]
            if scheme.eq_ignore_ascii_case("bearer") || scheme.eq_ignore_ascii_case("token") =>
        {
            *token
        }
        _ => return false,
    };
    tokens.iter().any(|t| t == token)
}

pub struct TokenProtectedService {
    next: Arc<dyn Service>,
    tokens: Vec<String>,
}

impl TokenProtectedService {
    pub fn new(next: Arc<dyn Service>, tokens: Vec<String>) -> Self {
        Self { next, tokens }
    }

    pub fn from_config(config: &Value, resolver: &Resolver<'_>) -> Result<Self, ConstructError> {
        let config: TokenProtectedConfig = parse_config(config)?;
        let next = resolver.service(&config.service)?;
        Ok(Self::new(next, config.tokens))
    }

    fn is_allowed(&self, headers: &HeaderMap) -> bool {
        if !headers.contains_key(EDGE_CLIENT_HEADER) {
            return true;
        }
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| validate_token(value, &self.tokens))
    }
}

#[async_trait]
impl Service for TokenProtectedService {
    async fn serve(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>, HandlerError> {
        if !self.is_allowed(req.headers()) {
            tracing::info!(path = %req.uri().path(), "Rejected request without a valid token");
            return Response::builder()
                .status(StatusCode::FORBIDDEN)
                .body(AxumBody::empty())
                .map_err(|e| HandlerError::InternalError(e.to_string()));
        }
        self.next.serve(req).await
    }

    async fn start(&self) -> eyre::Result<()> {
        self.next.start().await
    }

    async fn stop(&self) {
        self.next.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::services::RobotsTxtService;

    fn tokens() -> Vec<String> {
        vec!["s3cret".to_string(), "other".to_string()]
    }

    #[test]
    fn token_forms() {
        assert!(validate_token("Bearer s3cret", &tokens()));
        assert!(validate_token("token other", &tokens()));
        assert!(validate_token("s3cret", &tokens()));
        assert!(!validate_token("Bearer nope", &tokens()));
        assert!(!validate_token("Bearer", &tokens()));
        assert!(!validate_token("Basic s3cret", &tokens()));
        assert!(!validate_token("", &tokens()));
        assert!(!validate_token("Bearer s3cret extra", &tokens()));
    }

    fn service() -> TokenProtectedService {
        TokenProtectedService::new(Arc::new(RobotsTxtService), tokens())
    }

    fn request(headers: &[(&str, &str)]) -> Request<AxumBody> {
        let mut builder = Request::builder().uri("/robots.txt");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(AxumBody::empty()).unwrap()
    }

    #[tokio::test]
    async fn direct_requests_pass() {
        let response = service().serve(request(&[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn edge_requests_need_a_token() {
        let response = service()
            .serve(request(&[("CF-Connecting-IP", "198.51.100.4")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = service()
            .serve(request(&[
                ("CF-Connecting-IP", "198.51.100.4"),
                ("Authorization", "Bearer s3cret"),
            ]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
