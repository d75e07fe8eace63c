//! Per-server glue between the log stream, the session tracker, the status
//! cache and the notifier.
use std::sync::Arc;

use crate::core::{
    events::{LogEvent, parse_log_line},
    notifier::{NotificationEdge, Notifier, offline_edge, online_edge},
    session::SessionTracker,
    status::StatusCache,
};

pub struct CsgoMonitor {
    session: Arc<SessionTracker>,
    status: StatusCache,
    notifier: Option<Arc<Notifier>>,
}

impl CsgoMonitor {
    pub fn new(
        session: Arc<SessionTracker>,
        status: StatusCache,
        notifier: Option<Arc<Notifier>>,
    ) -> Self {
        Self {
            session,
            status,
            notifier,
        }
    }

    pub fn session(&self) -> &SessionTracker {
        &self.session
    }

    pub fn status(&self) -> &StatusCache {
        &self.status
    }

    /// Process one log line (prefix already stripped). Must only be called
    /// from the server's single worker so events apply in arrival order.
    ///
    /// Returns the notification edge that was detected, if any. Delivery of
    /// that edge has been handed off to a background task.
    pub async fn handle_line(&self, line: &str) -> Option<NotificationEdge> {
        let event = parse_log_line(line)?;
        tracing::debug!(?event, "Parsed log event");

        let edge = match &event {
            LogEvent::PlayerConnected { name } => {
                tracing::info!("{} connected", name);
                let count = self.fresh_player_count().await?;
                online_edge(name, count)
            }
            LogEvent::PlayerDisconnected { name } => {
                tracing::info!("{} disconnected", name);
                self.session.apply(&event);
                let count = self.fresh_player_count().await?;
                offline_edge(name, count)
            }
            _ => {
                self.session.apply(&event);
                None
            }
        }?;

        match &self.notifier {
            Some(notifier) => {
                notifier.notify(edge.clone());
            }
            None => tracing::debug!(action = ?edge.action, "No webhook configured, dropping edge"),
        }
        Some(edge)
    }

    async fn fresh_player_count(&self) -> Option<u32> {
        match self.status.get_status(false).await {
            Ok(status) => Some(status.player_count),
            Err(e) => {
                tracing::warn!("Could not refresh status after player change: {}", e);
                None
            }
        }
    }
}
