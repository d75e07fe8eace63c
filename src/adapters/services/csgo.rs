//! CS:GO server service: status endpoint plus live session tracking.
//!
//! `GET` returns the cached status document. Log lines reach the tracker
//! from up to three sources (UDP log packets, a streamer that tails the
//! server log, and `POST` bodies) which all feed one bounded queue drained
//! by a single worker, so events are applied in arrival order.
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::WrapErr;
use hyper::{Method, Request, Response, StatusCode, header};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::UdpSocket,
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    adapters::http_client::HttpClientAdapter,
    config::models::parse_duration_or,
    core::{
        events::strip_log_prefix,
        monitor::CsgoMonitor,
        notifier::Notifier,
        registry::{ConstructError, Resolver, parse_config},
        session::SessionTracker,
        status::{DEFAULT_CACHE_TTL, DEFAULT_COMMAND_TIMEOUT, StatusCache},
    },
    ports::{HandlerError, Service, Streamer, http_client::HttpClient},
};

/// Lines buffered between the log sources and the worker.
pub const QUEUE_DEPTH: usize = 64;
const MAX_LOG_BODY: usize = 1024 * 1024;
const UDP_BUFFER: usize = 4096;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize)]
pub struct CsgoConfig {
    /// Nested `{type, config}` commander envelope used for status queries
    pub commander: Value,
    /// Webhook URL for online/offline notifications
    #[serde(default, alias = "webhook")]
    pub api: Option<String>,
    #[serde(default, alias = "disable-file")]
    pub disable_file: Option<String>,
    /// UDP address to receive `logaddress_add` packets on
    #[serde(default)]
    pub log_listen: Option<String>,
    /// Only packets from this `ip:port` are accepted
    #[serde(default)]
    pub log_source: Option<String>,
    /// Nested streamer envelope whose output is the server log
    #[serde(default)]
    pub log_streamer: Option<Value>,
    #[serde(default)]
    pub cache_ttl: Option<String>,
    #[serde(default)]
    pub command_timeout: Option<String>,
}

/// Where log lines come from besides `POST` requests.
#[derive(Default)]
pub struct LogSources {
    pub udp_listen: Option<String>,
    pub udp_source: Option<SocketAddr>,
    pub streamer: Option<Arc<dyn Streamer>>,
}

pub struct CsgoService {
    monitor: Arc<CsgoMonitor>,
    sources: LogSources,
    queue: mpsc::Sender<String>,
    /// Queue receiver while no worker owns it
    pending: Mutex<Option<mpsc::Receiver<String>>>,
    /// Cancels the current run; `None` while stopped
    running: Mutex<Option<CancellationToken>>,
    worker: Mutex<Option<JoinHandle<mpsc::Receiver<String>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    udp_addr: Mutex<Option<SocketAddr>>,
}

impl CsgoService {
    pub fn new(monitor: CsgoMonitor, sources: LogSources) -> Self {
        let (queue, receiver) = mpsc::channel(QUEUE_DEPTH);
        Self {
            monitor: Arc::new(monitor),
            sources,
            queue,
            pending: Mutex::new(Some(receiver)),
            running: Mutex::new(None),
            worker: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            udp_addr: Mutex::new(None),
        }
    }

    /// Build from config. `http_client` is used for webhooks when given;
    /// otherwise a client is created on demand.
    pub fn from_config(
        config: &Value,
        resolver: &Resolver<'_>,
        http_client: Option<Arc<dyn HttpClient>>,
    ) -> Result<Self, ConstructError> {
        let config: CsgoConfig = parse_config(config)?;

        let commander = resolver.commander(&config.commander)?;
        let session = Arc::new(SessionTracker::new());
        let status = StatusCache::new(commander, session.clone())
            .with_ttl(parse_duration_or(config.cache_ttl.as_deref(), DEFAULT_CACHE_TTL))
            .with_command_timeout(parse_duration_or(
                config.command_timeout.as_deref(),
                DEFAULT_COMMAND_TIMEOUT,
            ));

        let notifier = match config.api.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(url) => {
                let client = match http_client {
                    Some(client) => client,
                    None => Arc::new(
                        HttpClientAdapter::new()
                            .map_err(|e| ConstructError::invalid(format!("webhook client: {e}")))?,
                    ),
                };
                let mut notifier = Notifier::new(client, url);
                if let Some(path) = config.disable_file.as_deref().filter(|p| !p.is_empty()) {
                    notifier = notifier.with_disable_file(PathBuf::from(path));
                }
                Some(Arc::new(notifier))
            }
        };

        let udp_source = config
            .log_source
            .as_deref()
            .map(|s| {
                s.trim().parse::<SocketAddr>().map_err(|e| {
                    ConstructError::invalid(format!("log_source {s:?} is not ip:port: {e}"))
                })
            })
            .transpose()?;
        let streamer = config
            .log_streamer
            .as_ref()
            .map(|blob| resolver.streamer(blob))
            .transpose()?;

        let sources = LogSources {
            udp_listen: config.log_listen.filter(|s| !s.trim().is_empty()),
            udp_source,
            streamer,
        };

        Ok(Self::new(CsgoMonitor::new(session, status, notifier), sources))
    }

    pub fn monitor(&self) -> &CsgoMonitor {
        &self.monitor
    }

    /// Address the UDP log listener is bound to, once started.
    pub fn udp_local_addr(&self) -> Option<SocketAddr> {
        *self.udp_addr.lock()
    }

    /// Queue one log line for the worker. Waits while the queue is full,
    /// and fails if the service is stopped or stops while waiting.
    pub async fn enqueue(&self, line: String) -> Result<(), HandlerError> {
        let not_running = || HandlerError::InternalError("log worker is not running".to_string());
        let Some(cancel) = self.running.lock().clone() else {
            return Err(not_running());
        };
        tokio::select! {
            sent = self.queue.send(line) => sent.map_err(|_| not_running()),
            _ = cancel.cancelled() => Err(not_running()),
        }
    }

    async fn serve_status(&self) -> Result<Response<AxumBody>, HandlerError> {
        let status = self
            .monitor
            .status()
            .get_status(true)
            .await
            .map_err(|e| HandlerError::Backend(e.to_string()))?;
        let body =
            serde_json::to_vec(&status).map_err(|e| HandlerError::InternalError(e.to_string()))?;

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CACHE_CONTROL, "public, max-age=5")
            .body(AxumBody::from(body))
            .map_err(|e| HandlerError::InternalError(e.to_string()))
    }

    async fn ingest_body(&self, body: AxumBody) -> Result<Response<AxumBody>, HandlerError> {
        let bytes = axum::body::to_bytes(body, MAX_LOG_BODY)
            .await
            .map_err(|e| HandlerError::BadRequest(format!("unreadable log body: {e}")))?;
        let text = String::from_utf8_lossy(&bytes);

        let mut accepted = 0usize;
        for line in text.lines() {
            if let Some(message) = posted_message(line) {
                self.enqueue(message.to_string()).await?;
                accepted += 1;
            }
        }
        tracing::debug!(accepted, "Queued posted log lines");

        Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(AxumBody::empty())
            .map_err(|e| HandlerError::InternalError(e.to_string()))
    }
}

/// Posted lines may or may not carry the engine timestamp.
fn posted_message(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.starts_with("L ") || line.starts_with("RL ") {
        return strip_log_prefix(line);
    }
    Some(line)
}

/// Drain the queue until cancelled, then hand the receiver back so a later
/// `start` can resume with the lines still queued.
async fn run_worker(
    monitor: Arc<CsgoMonitor>,
    mut lines: mpsc::Receiver<String>,
    cancel: CancellationToken,
) -> mpsc::Receiver<String> {
    tracing::debug!("Log worker started");
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.recv() => line,
        };
        match line {
            Some(line) => {
                monitor.handle_line(&line).await;
            }
            None => break,
        }
    }
    tracing::debug!("Log worker stopped");
    lines
}

async fn run_udp_listener(
    socket: UdpSocket,
    source: Option<SocketAddr>,
    queue: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; UDP_BUFFER];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };
        let (n, from) = match received {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!("UDP log receive failed: {}", e);
                continue;
            }
        };
        if source.is_some_and(|expected| expected != from) {
            tracing::warn!("Dropping log packet from unexpected address {}", from);
            continue;
        }

        let text = String::from_utf8_lossy(&buf[..n]);
        let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        let Some(message) = strip_log_prefix(text) else {
            continue;
        };
        if queue.send(message.to_string()).await.is_err() {
            break;
        }
    }
}

async fn follow_log_stream(
    streamer: Arc<dyn Streamer>,
    queue: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    loop {
        match streamer.connect().await {
            Ok(stream) => {
                tracing::info!("Following server log stream");
                let mut lines = BufReader::new(stream).lines();
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => return,
                        next = lines.next_line() => next,
                    };
                    match next {
                        Ok(Some(line)) => {
                            if let Some(message) = strip_log_prefix(&line) {
                                if queue.send(message.to_string()).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Ok(None) => {
                            tracing::warn!("Server log stream ended");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!("Server log stream failed: {}", e);
                            break;
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("Could not open server log stream: {}", e),
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

#[async_trait]
impl Service for CsgoService {
    async fn serve(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>, HandlerError> {
        match *req.method() {
            Method::GET | Method::HEAD => self.serve_status().await,
            Method::POST => self.ingest_body(req.into_body()).await,
            _ => Response::builder()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .header(header::ALLOW, "GET, HEAD, POST")
                .body(AxumBody::empty())
                .map_err(|e| HandlerError::InternalError(e.to_string())),
        }
    }

    async fn start(&self) -> eyre::Result<()> {
        if self.pending.lock().is_none() {
            tracing::warn!("CS:GO service already started");
            return Ok(());
        }

        // Bind before taking the receiver so a failed bind leaves us restartable.
        let socket = match &self.sources.udp_listen {
            Some(addr) => {
                let socket = UdpSocket::bind(addr)
                    .await
                    .wrap_err_with(|| format!("Failed to bind UDP log listener on {addr}"))?;
                let local = socket.local_addr()?;
                tracing::info!("Listening for CS:GO log packets on {}", local);
                if self.sources.udp_source.is_none() {
                    tracing::warn!("No log_source configured, accepting log packets from anyone");
                }
                *self.udp_addr.lock() = Some(local);
                Some(socket)
            }
            None => None,
        };

        let Some(receiver) = self.pending.lock().take() else {
            tracing::warn!("CS:GO service already started");
            return Ok(());
        };

        let cancel = CancellationToken::new();
        *self.worker.lock() = Some(tokio::spawn(run_worker(
            self.monitor.clone(),
            receiver,
            cancel.clone(),
        )));

        let mut tasks = Vec::new();
        if let Some(socket) = socket {
            tasks.push(tokio::spawn(run_udp_listener(
                socket,
                self.sources.udp_source,
                self.queue.clone(),
                cancel.clone(),
            )));
        }
        if let Some(streamer) = &self.sources.streamer {
            tasks.push(tokio::spawn(follow_log_stream(
                streamer.clone(),
                self.queue.clone(),
                cancel.clone(),
            )));
        }

        self.tasks.lock().extend(tasks);
        *self.running.lock() = Some(cancel);
        Ok(())
    }

    async fn stop(&self) {
        let Some(cancel) = self.running.lock().take() else {
            return;
        };
        cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("CS:GO background task ended abnormally: {}", e);
            }
        }
        *self.udp_addr.lock() = None;

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            match worker.await {
                Ok(receiver) => *self.pending.lock() = Some(receiver),
                Err(e) => tracing::error!("CS:GO log worker ended abnormally: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http_body_util::BodyExt;

    use super::*;
    use crate::{
        core::retry::RetryPolicy,
        ports::{CommandResult, Commander},
    };

    struct FixedReply {
        reply: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Commander for FixedReply {
        async fn execute(&self, _command: &str) -> CommandResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.to_string())
        }
    }

    fn service(sources: LogSources) -> CsgoService {
        let commander = Arc::new(FixedReply {
            reply: "map : de_dust2\nplayers : 1 humans, 0 bots\n",
            calls: AtomicUsize::new(0),
        });
        let session = Arc::new(SessionTracker::new());
        let status = StatusCache::new(commander, session.clone())
            .with_retry(RetryPolicy::new(1, Duration::ZERO));
        CsgoService::new(CsgoMonitor::new(session, status, None), sources)
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn posted_lines_with_and_without_prefix() {
        assert_eq!(
            posted_message("L 10/18/2026 - 20:14:03: Log file closed"),
            Some("Log file closed")
        );
        assert_eq!(posted_message("Log file closed"), Some("Log file closed"));
        assert_eq!(posted_message("   "), None);
    }

    #[tokio::test]
    async fn get_returns_status_document() {
        let service = service(LogSources::default());
        let response = service
            .serve(Request::get("/csgo").body(AxumBody::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "public, max-age=5");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["map"], "de_dust2");
        assert_eq!(json["player_count"], 1);
        assert_eq!(json["local_state"]["game_ongoing"], false);
    }

    #[tokio::test]
    async fn posted_log_lines_reach_the_tracker() {
        let service = service(LogSources::default());
        service.start().await.unwrap();

        let body = concat!(
            "L 10/18/2026 - 20:14:03: \"Alice<2><STEAM_1:0:1>\" switched from team <Unassigned> to <CT>\n",
            "MatchStatus: Score: 3:5 on map \"de_dust2\" RoundsPlayed: 8\n",
        );
        let response = service
            .serve(Request::post("/csgo").body(AxumBody::from(body)).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        eventually(|| service.monitor().session().snapshot().game_ongoing()).await;
        let state = service.monitor().session().snapshot();
        assert!(state.ct.players.contains("Alice"));
        assert_eq!(state.rounds_played(), 8);

        service.stop().await;
    }

    #[tokio::test]
    async fn other_methods_are_rejected() {
        let service = service(LogSources::default());
        let response = service
            .serve(Request::delete("/csgo").body(AxumBody::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn udp_packets_only_from_the_game_server() {
        let game_server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let service = service(LogSources {
            udp_listen: Some("127.0.0.1:0".to_string()),
            udp_source: Some(game_server.local_addr().unwrap()),
            streamer: None,
        });
        service.start().await.unwrap();
        let target = service.udp_local_addr().unwrap();

        stranger
            .send_to(
                b"\xff\xff\xff\xffRL 10/18/2026 - 20:14:03: \"Mallory<3><STEAM_1:0:9>\" switched from team <Unassigned> to <TERRORIST>\n\0",
                target,
            )
            .await
            .unwrap();
        game_server
            .send_to(
                b"\xff\xff\xff\xffRL 10/18/2026 - 20:14:04: \"Alice<2><STEAM_1:0:1>\" switched from team <Unassigned> to <CT>\n\0",
                target,
            )
            .await
            .unwrap();

        eventually(|| !service.monitor().session().snapshot().ct.players.is_empty()).await;
        let state = service.monitor().session().snapshot();
        assert!(state.ct.players.contains("Alice"));
        assert!(state.t.players.is_empty());

        service.stop().await;
    }

    #[tokio::test]
    async fn second_start_is_a_no_op() {
        let service = service(LogSources::default());
        service.start().await.unwrap();
        service.start().await.unwrap();
        assert!(service.worker.lock().is_some());
        assert!(service.tasks.lock().is_empty());
        service.stop().await;
    }

    #[tokio::test]
    async fn restarts_after_stop_with_state_kept() {
        let service = service(LogSources::default());
        service.start().await.unwrap();
        service
            .enqueue("\"Alice<2><STEAM_1:0:1>\" switched from team <Unassigned> to <CT>".into())
            .await
            .unwrap();
        eventually(|| !service.monitor().session().snapshot().ct.players.is_empty()).await;
        service.stop().await;
        assert!(service.pending.lock().is_some());

        service.start().await.unwrap();
        service
            .enqueue("\"Bob<3><STEAM_1:0:2>\" switched from team <Unassigned> to <TERRORIST>".into())
            .await
            .unwrap();
        eventually(|| !service.monitor().session().snapshot().t.players.is_empty()).await;
        assert!(service.monitor().session().snapshot().ct.players.contains("Alice"));
        service.stop().await;
    }

    fn log_body(lines: usize) -> String {
        (0..lines)
            .map(|i| format!("\"P{i}<{i}><STEAM_1:0:{i}>\" switched from team <Unassigned> to <CT>\n"))
            .collect()
    }

    #[tokio::test]
    async fn posting_to_a_stopped_service_fails_fast() {
        let service = service(LogSources::default());
        service.start().await.unwrap();
        service.stop().await;

        let post = service.serve(
            Request::post("/csgo")
                .body(AxumBody::from(log_body(QUEUE_DEPTH + 1)))
                .unwrap(),
        );
        let outcome = tokio::time::timeout(Duration::from_secs(3), post)
            .await
            .expect("post to a stopped service hung");
        assert!(matches!(outcome, Err(HandlerError::InternalError(_))));
    }

    #[tokio::test]
    async fn posting_before_start_fails_fast() {
        let service = service(LogSources::default());
        let err = service.enqueue("Log file closed".into()).await.unwrap_err();
        assert!(matches!(err, HandlerError::InternalError(_)));
        assert!(service.pending.lock().is_some());
    }

    #[tokio::test]
    async fn more_than_a_queue_of_lines_is_drained_while_running() {
        let service = service(LogSources::default());
        service.start().await.unwrap();

        let response = service
            .serve(
                Request::post("/csgo")
                    .body(AxumBody::from(log_body(QUEUE_DEPTH * 2)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        eventually(|| service.monitor().session().snapshot().ct.players.len() == QUEUE_DEPTH * 2)
            .await;
        service.stop().await;
    }
}
