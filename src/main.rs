use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use uniapi::{
    adapters::{FileConfigProvider, HttpClientAdapter, HttpHandler, ServiceRouter},
    config::{ServerConfig, ServerConfigValidator, loader::default_config_path},
    core::Registries,
    ports::{config_provider::ConfigProvider, http_client::HttpClient},
    tracing_setup,
    utils::GracefulShutdown,
};

const FALLBACK_CONFIG_PATH: &str = "uniapi.yml";

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file (default: ~/.config/uniapi.yml)
    #[clap(short, long, global = true)]
    config: Option<String>,

    /// Listen address, overriding `listen_addr` from the config file
    #[clap(short, long, global = true)]
    listen: Option<String>,

    /// Log filter directive, e.g. `debug` or `uniapi=trace` (default: RUST_LOG or info)
    #[clap(long, global = true)]
    log_level: Option<String>,

    /// Human-readable log output instead of JSON
    #[clap(long, global = true)]
    pretty: bool,
}

impl Args {
    fn logging(&self) -> Logging {
        Logging {
            level: self.log_level.clone(),
            pretty: self.pretty,
        }
    }
}

/// Log output chosen on the command line.
struct Logging {
    level: Option<String>,
    pretty: bool,
}

impl Logging {
    fn init(&self) -> Result<()> {
        match (&self.level, self.pretty) {
            (None, false) => tracing_setup::init_tracing(),
            (level, pretty) => {
                tracing_setup::init_tracing_with_config(level.as_deref().unwrap_or("info"), !pretty)
            }
        }
    }
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate,
    /// Initialize a new configuration file
    Init,
    /// Start the server (default)
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(|| {
        default_config_path()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| FALLBACK_CONFIG_PATH.to_string())
    });

    let logging = args.logging();

    match args.command {
        Some(Commands::Validate) => validate_config_command(&config_path, args.listen).await,
        Some(Commands::Init) => init_config_command(&config_path).await,
        Some(Commands::Serve) | None => serve(&config_path, args.listen, &logging).await,
    }
}

/// Load, override and validate the configuration.
async fn load_checked(
    provider: &dyn ConfigProvider,
    listen_override: Option<&str>,
) -> Result<ServerConfig> {
    let mut config = provider.load_config().await?;
    if let Some(listen) = listen_override {
        config.listen_addr = listen.to_string();
    }
    ServerConfigValidator::validate(&config).wrap_err("Invalid configuration")?;
    Ok(config)
}

async fn serve(
    config_path: &str,
    listen_override: Option<String>,
    logging: &Logging,
) -> Result<()> {
    logging
        .init()
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    tracing::info!("Loading initial configuration from {config_path}");

    let config_provider: Arc<dyn ConfigProvider> = Arc::new(
        FileConfigProvider::new(config_path).context("Failed to create config provider")?,
    );
    let initial_config = load_checked(config_provider.as_ref(), listen_override.as_deref())
        .await
        .with_context(|| format!("Failed to load initial config from {config_path}"))?;

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("Failed to create HTTP client adapter")?);
    let registries = Arc::new(Registries::with_builtins_using(Some(http_client)));

    let router = ServiceRouter::build(&initial_config.services, &registries)
        .context("Failed to build services")?;
    router
        .start_all()
        .await
        .context("Failed to start services")?;
    let http_handler = Arc::new(HttpHandler::new(Arc::new(router)));

    spawn_reload_on_sighup(config_provider.reload_trigger());
    spawn_config_watcher(
        config_provider.clone(),
        registries.clone(),
        http_handler.clone(),
        ListenAddr {
            active: initial_config.listen_addr.clone(),
            overridden: listen_override,
        },
    );

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let addr: SocketAddr = initial_config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    {
        let router = http_handler.current();
        for path in router.paths() {
            tracing::info!("Serving /{}", path);
        }
    }
    tracing::info!("uniapi listening on {}", addr);
    println!("uniapi listening on {addr}");

    let app = http_handler.clone().into_router();
    let server_shutdown = graceful_shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = server_shutdown.wait_for_shutdown_signal().await;
            tracing::info!("Shutdown signal received: {:?}", reason);
        })
        .await
        .context("Server error")?;

    let router = http_handler.current();
    graceful_shutdown
        .drain("Stopping services", router.stop_all())
        .await;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

/// The address the listener is bound to, and the `--listen` override that
/// keeps winning over the file on reload.
struct ListenAddr {
    active: String,
    overridden: Option<String>,
}

/// Forward SIGHUP to the config provider as a reload request.
fn spawn_reload_on_sighup(trigger: tokio::sync::mpsc::Sender<()>) {
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                tracing::error!("Failed to register SIGHUP handler: {}", e);
                return;
            }
        };
        while hangup.recv().await.is_some() {
            tracing::info!("Received SIGHUP, scheduling configuration reload");
            let _ = trigger.try_send(());
        }
    });

    #[cfg(not(unix))]
    drop(trigger);
}

fn spawn_config_watcher(
    config_provider: Arc<dyn ConfigProvider>,
    registries: Arc<Registries>,
    http_handler: Arc<HttpHandler>,
    listen: ListenAddr,
) {
    let debounce_duration = Duration::from_secs(1);
    let mut notify_rx = config_provider.watch();

    tokio::spawn(async move {
        tracing::info!("Config watcher task started.");

        while notify_rx.recv().await.is_some() {
            // Editors emit several events per save; let them settle.
            tokio::time::sleep(debounce_duration).await;
            while notify_rx.try_recv().is_ok() {}

            tracing::info!("Attempting to reload configuration");
            let reloaded =
                reload(config_provider.as_ref(), &registries, &http_handler, &listen).await;
            if let Err(e) = reloaded {
                tracing::error!("Failed to reload configuration: {:?}. Keeping old services.", e);
            }
        }
        tracing::info!("Config watcher task is shutting down.");
    });
}

/// Build the new service set, then hand over: the old set is stopped before
/// the new one starts since both may want the same log sockets. If the new
/// set fails to start, the old one is started again and stays live.
async fn reload(
    config_provider: &dyn ConfigProvider,
    registries: &Registries,
    http_handler: &HttpHandler,
    listen: &ListenAddr,
) -> Result<()> {
    let config = load_checked(config_provider, listen.overridden.as_deref()).await?;
    let router = ServiceRouter::build(&config.services, registries)
        .context("Failed to build services")?;

    let old = http_handler.current();
    old.stop_all().await;
    if let Err(e) = router.start_all().await {
        if let Err(restart) = old.start_all().await {
            tracing::error!("Failed to restart previous services: {:?}", restart);
        }
        return Err(e).context("Failed to start services");
    }

    let services = router.len();
    http_handler.replace(Arc::new(router));

    if config.listen_addr != listen.active {
        tracing::warn!(
            "listen_addr changed to {}, still serving on {} until restart",
            config.listen_addr,
            listen.active
        );
    }
    tracing::info!(services, "Configuration reloaded");
    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str, listen_override: Option<String>) -> Result<()> {
    use uniapi::config::loader::load_config;

    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let mut config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };
    if let Some(listen) = listen_override {
        config.listen_addr = listen;
    }

    if let Err(e) = ServerConfigValidator::validate(&config) {
        eprintln!("❌ Configuration validation failed:");
        eprintln!("{e}");
        std::process::exit(1);
    }
    println!("✅ Configuration validation: OK");

    // Building resolves every type tag and nested envelope without starting
    // any listener or worker.
    let registries = Registries::with_builtins();
    match ServiceRouter::build(&config.services, &registries) {
        Ok(router) => {
            println!("✅ Service construction: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            for path in router.paths() {
                println!("   • /{path}");
            }
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Service construction failed:");
            eprintln!("   {e}");
            println!();
            println!("💡 Known service types: {}", registries.services.tags().join(", "));
            println!("💡 Known commander types: {}", registries.commanders.tags().join(", "));
            println!("💡 Known streamer types: {}", registries.streamers.tags().join(", "));
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# uniapi configuration

# The address to listen on
listen_addr: "127.0.0.1:8000"

services:
  robots.txt:
    type: robotstxt

  # CS:GO status endpoint with session tracking and webhook notifications
  # csgo:
  #   type: token-protected
  #   config:
  #     tokens: ["change-me"]
  #     service:
  #       type: csgo
  #       config:
  #         commander:
  #           type: rcon
  #           config:
  #             address: "127.0.0.1:27015"
  #             password: "rcon-password"
  #             timeout: 1s
  #         api: "https://example.com/hooks/csgo"
  #         disable-file: /tmp/csgo.disabled
  #         log_listen: "0.0.0.0:27500"
  #         log_source: "127.0.0.1:27015"
"#;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create config directory")?;
    }
    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'uniapi serve --config {config_path}' to start the server");
    Ok(())
}
