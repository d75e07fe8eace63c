pub mod commanders;
pub mod config_providers;
pub mod http_client;
pub mod http_handler;
pub mod services;
pub mod streamers;

use std::sync::Arc;

/// Re-export commonly used types from adapters
pub use commanders::{RconCommander, StreamCommander};
pub use config_providers::FileConfigProvider;
pub use http_client::HttpClientAdapter;
pub use http_handler::{HttpHandler, ServiceRouter};
pub use services::{CsgoService, RobotsTxtService, TokenProtectedService};
pub use streamers::TcpStreamer;

use crate::{core::registry::Registries, ports::http_client::HttpClient};

impl Registries {
    /// Registries holding every capability shipped with the crate.
    pub fn with_builtins() -> Self {
        Self::with_builtins_using(None)
    }

    /// Like [`Registries::with_builtins`], with webhook traffic of `csgo`
    /// services going through `http_client` instead of a per-service client.
    pub fn with_builtins_using(http_client: Option<Arc<dyn HttpClient>>) -> Self {
        let mut registries = Self::new();

        registries.services.register("csgo", move |config, resolver| {
            Ok(Arc::new(CsgoService::from_config(
                config,
                resolver,
                http_client.clone(),
            )?))
        });
        registries
            .services
            .register("token-protected", |config, resolver| {
                Ok(Arc::new(TokenProtectedService::from_config(config, resolver)?))
            });
        registries
            .services
            .register("robotstxt", |_config, _resolver| Ok(Arc::new(RobotsTxtService)));

        registries.commanders.register("rcon", |config, _resolver| {
            Ok(Arc::new(RconCommander::from_config(config)?))
        });
        registries.commanders.register("stream", |config, resolver| {
            Ok(Arc::new(StreamCommander::from_config(config, resolver)?))
        });

        registries.streamers.register("tcp", |config, _resolver| {
            Ok(Arc::new(TcpStreamer::from_config(config)?))
        });

        registries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_every_kind() {
        let registries = Registries::with_builtins();
        assert_eq!(
            registries.services.tags(),
            vec!["csgo", "robotstxt", "token-protected"]
        );
        assert_eq!(registries.commanders.tags(), vec!["rcon", "stream"]);
        assert_eq!(registries.streamers.tags(), vec!["tcp"]);
    }
}
