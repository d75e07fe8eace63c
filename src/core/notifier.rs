//! Online/offline webhook notifications.
//!
//! Edges are derived from the fresh player count right after a connect or
//! disconnect. Delivery is at-most-once from the caller's point of view: it
//! runs on its own task, retries transport failures a bounded number of
//! times and then gives up with an error log.
use std::{path::PathBuf, sync::Arc};

use axum::body::Body as AxumBody;
use http_body_util::BodyExt;
use hyper::{Method, Request, StatusCode, header};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{
    core::retry::RetryPolicy,
    ports::http_client::{HttpClient, HttpClientError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeAction {
    GoOnline,
    GoOffline,
}

/// Webhook payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationEdge {
    pub action: EdgeAction,
    pub name: String,
    pub count: u32,
}

/// A player joining a server that now has one or two humans brings it online.
pub fn online_edge(name: &str, player_count: u32) -> Option<NotificationEdge> {
    (1..=2).contains(&player_count).then(|| NotificationEdge {
        action: EdgeAction::GoOnline,
        name: name.to_string(),
        count: player_count,
    })
}

/// The last human leaving takes the server offline.
pub fn offline_edge(name: &str, player_count: u32) -> Option<NotificationEdge> {
    (player_count == 0).then(|| NotificationEdge {
        action: EdgeAction::GoOffline,
        name: name.to_string(),
        count: 0,
    })
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to deliver notification: {0}")]
    Request(#[from] HttpClientError),

    #[error("Webhook answered with status {0}")]
    Rejected(StatusCode),
}

/// Outcome of a delivery attempt that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Suppressed,
}

pub struct Notifier {
    client: Arc<dyn HttpClient>,
    url: String,
    disable_file: Option<PathBuf>,
    retry: RetryPolicy,
}

impl Notifier {
    pub fn new(client: Arc<dyn HttpClient>, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            disable_file: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Notifications are dropped while `path` exists.
    pub fn with_disable_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.disable_file = Some(path.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_suppressed(&self) -> bool {
        self.disable_file
            .as_ref()
            .is_some_and(|path| path.exists())
    }

    /// Deliver `edge` on a background task.
    pub fn notify(self: &Arc<Self>, edge: NotificationEdge) -> JoinHandle<()> {
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            match notifier.deliver(&edge).await {
                Ok(Delivery::Sent) => {
                    tracing::info!(action = ?edge.action, count = edge.count, "Sent notification for {}", edge.name);
                }
                Ok(Delivery::Suppressed) => {
                    tracing::debug!(action = ?edge.action, "Notification suppressed for {}", edge.name);
                }
                Err(e) => {
                    tracing::error!(action = ?edge.action, "Dropping notification for {}: {}", edge.name, e);
                }
            }
        })
    }

    /// POST `edge` to the webhook, retrying transport errors.
    pub async fn deliver(&self, edge: &NotificationEdge) -> Result<Delivery, NotifyError> {
        if self.is_suppressed() {
            return Ok(Delivery::Suppressed);
        }

        let payload = serde_json::to_vec(edge)?;
        let response = self
            .retry
            .run(
                "webhook delivery",
                || {
                    let payload = payload.clone();
                    async move {
                        let request = Request::builder()
                            .method(Method::POST)
                            .uri(&self.url)
                            .header(header::CONTENT_TYPE, "application/json")
                            .header("X-GitHub-Event", "ping")
                            .body(AxumBody::from(payload))
                            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
                        self.client.send_request(request).await
                    }
                },
                HttpClientError::is_transient,
            )
            .await?;

        let status = response.status();
        // Drain the body so the connection can be reused.
        let _ = response.into_body().collect().await;

        if status.is_success() {
            Ok(Delivery::Sent)
        } else {
            Err(NotifyError::Rejected(status))
        }
    }
}
