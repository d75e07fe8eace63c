//! Server status snapshots and their TTL cache.
//!
//! A status is the parsed reply of one `status; cvarlist game_` query merged
//! with the session tracker's local state. The cache hands out the last
//! snapshot while it is fresh and otherwise asks the commander again.
use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, SubsecRound, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tokio::{sync::Mutex as AsyncMutex, time::Instant};

use crate::{
    core::{
        retry::RetryPolicy,
        session::{SessionState, SessionTracker},
    },
    ports::{CommandError, Commander},
};

/// Console command whose reply feeds [`parse_status_reply`].
pub const STATUS_COMMAND: &str = "status; cvarlist game_";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

static RE_PLAYERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+) humans?, (\d+) bots?").expect("invalid regex"));

/// `game_type * 100 + game_mode` to a display name.
static GAME_MODES: Lazy<HashMap<i64, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (0, "casual"),
        (1, "competitive"),
        (2, "scrim competitive"),
        (3, "5v5 scrim competitive"),
        (100, "arms race"),
        (101, "demolition"),
        (102, "deathmatch"),
        (200, "training"),
        (300, "custom"),
        (400, "cooperative"),
        (500, "skirmish"),
        (600, "danger zone"),
    ])
});

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("Status query failed: {0}")]
    Backend(#[from] CommandError),

    #[error("Unexpected status reply: {0}")]
    ParseMismatch(String),
}

pub fn game_mode_name(game_type: i64, game_mode: i64) -> &'static str {
    GAME_MODES
        .get(&(game_type * 100 + game_mode))
        .copied()
        .unwrap_or("unknown")
}

/// What the game server itself reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerReport {
    pub map: String,
    pub game_mode: String,
    pub player_count: u32,
    pub bot_count: u32,
    pub players: Vec<String>,
}

/// Parse a `status; cvarlist game_` reply.
///
/// Handles both the CS:GO `map : name` line and the CS2 `loaded spawngroup`
/// line for the map. A reply without a `players` line is rejected.
pub fn parse_status_reply(reply: &str) -> Result<ServerReport, StatusError> {
    let mut report = ServerReport::default();
    let mut counts: Option<(u32, u32)> = None;
    let mut game_mode = 0i64;
    let mut game_type = 0i64;

    for line in reply.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with('#') {
            let parts: Vec<&str> = line.splitn(3, '"').collect();
            if parts.len() != 3 {
                continue;
            }
            if parts[2].trim().split(' ').next() == Some("BOT") {
                continue;
            }
            report.players.push(parts[1].to_string());
            continue;
        }

        if line.starts_with("loaded spawngroup") {
            if let Some((_, rest)) = line.split_once("[1:") {
                if let Some(map) = rest.split('|').next() {
                    report.map = map.trim().to_string();
                }
            }
            continue;
        }

        let items: Vec<&str> = line.splitn(3, ": ").collect();
        if items.len() < 2 {
            continue;
        }
        let value = items[1].trim();
        match items[0].trim() {
            "map" => report.map = value.to_string(),
            "players" => {
                let caps = RE_PLAYERS.captures(value).ok_or_else(|| {
                    StatusError::ParseMismatch(format!("unrecognised players line {value:?}"))
                })?;
                let humans = caps[1]
                    .parse()
                    .map_err(|_| StatusError::ParseMismatch(format!("bad human count {value:?}")))?;
                let bots = caps[2]
                    .parse()
                    .map_err(|_| StatusError::ParseMismatch(format!("bad bot count {value:?}")))?;
                counts = Some((humans, bots));
            }
            "game_mode" => game_mode = value.parse().unwrap_or(0),
            "game_type" => game_type = value.parse().unwrap_or(0),
            _ => {}
        }
    }

    let (player_count, bot_count) = counts
        .ok_or_else(|| StatusError::ParseMismatch("reply has no players line".to_string()))?;
    report.player_count = player_count;
    report.bot_count = bot_count;
    report.game_mode = game_mode_name(game_type, game_mode).to_string();
    Ok(report)
}

/// Status document served to clients.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub time: DateTime<Utc>,
    pub map: String,
    pub game_mode: String,
    pub player_count: u32,
    pub bot_count: u32,
    pub players: Vec<String>,
    pub local_state: SessionState,
}

impl Status {
    pub fn new(report: ServerReport, local_state: SessionState) -> Self {
        Self {
            time: Utc::now().trunc_subsecs(0),
            map: report.map,
            game_mode: report.game_mode,
            player_count: report.player_count,
            bot_count: report.bot_count,
            players: report.players,
            local_state,
        }
    }
}

struct CachedStatus {
    snapshot: Status,
    fetched_at: Instant,
}

/// TTL cache in front of a commander-backed status query.
pub struct StatusCache {
    commander: Arc<dyn Commander>,
    session: Arc<SessionTracker>,
    cached: ArcSwapOption<CachedStatus>,
    /// Held while a query is in flight so concurrent misses share one query
    refreshing: AsyncMutex<()>,
    ttl: Duration,
    command_timeout: Duration,
    retry: RetryPolicy,
}

impl StatusCache {
    pub fn new(commander: Arc<dyn Commander>, session: Arc<SessionTracker>) -> Self {
        Self {
            commander,
            session,
            cached: ArcSwapOption::empty(),
            refreshing: AsyncMutex::new(()),
            ttl: DEFAULT_CACHE_TTL,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached snapshot when `use_cache` is set and it is younger
    /// than the TTL; otherwise query the server and refresh the cache.
    ///
    /// Queries never overlap. Cached callers that missed wait for the query
    /// in flight and take its result instead of sending their own.
    pub async fn get_status(&self, use_cache: bool) -> Result<Status, StatusError> {
        if use_cache {
            if let Some(status) = self.fresh_snapshot() {
                return Ok(status);
            }
        }

        let _refreshing = self.refreshing.lock().await;
        if use_cache {
            if let Some(status) = self.fresh_snapshot() {
                return Ok(status);
            }
        }
        self.refresh().await
    }

    fn fresh_snapshot(&self) -> Option<Status> {
        let cached = self.cached.load_full()?;
        (cached.fetched_at.elapsed() < self.ttl).then(|| cached.snapshot.clone())
    }

    async fn refresh(&self) -> Result<Status, StatusError> {
        let reply = self
            .retry
            .run("status query", || self.query(), CommandError::is_transient)
            .await?;
        let report = parse_status_reply(&reply)?;

        let status = Status::new(report, self.session.snapshot());
        self.cached.store(Some(Arc::new(CachedStatus {
            snapshot: status.clone(),
            fetched_at: Instant::now(),
        })));
        tracing::debug!(
            players = status.player_count,
            bots = status.bot_count,
            "Refreshed status for map {:?}",
            status.map
        );
        Ok(status)
    }

    async fn query(&self) -> Result<String, CommandError> {
        tokio::time::timeout(self.command_timeout, self.commander.execute(STATUS_COMMAND))
            .await
            .map_err(|_| CommandError::Timeout(self.command_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::ports::CommandResult;

    const CSGO_REPLY: &str = r#"hostname: Friday Night Frags
version : 1.38.8.1/13881 1575/8853 secure  [G:1:3794458]
udp/ip  : 0.0.0.0:27015  (public ip: 203.0.113.7)
os      :  Linux
type    :  community dedicated
map     : de_dust2
players : 2 humans, 1 bot (12/0 max) (not hibernating)

# userid name uniqueid connected ping loss state rate adr
#  2 1 "Alice" STEAM_1:0:123456 05:12 40 0 active 196608 203.0.113.8:27005
#  3 2 "Bob" STEAM_1:1:654321 02:01 55 0 active 196608 203.0.113.9:27005
#  4 "Bot Ivan" BOT active 64
#end
cvar list
--------------
game_mode                                : 1        : , "sv", "rep", "cl"  : Current game mode
game_type                                : 0        : , "sv", "rep", "cl"  : Current game type
--------------
  2 convars/concommands for [game_]
"#;

    const CS2_REPLY: &str = r#"Server:  Running [0.0.0.0:27015]
players  : 1 humans, 0 bots (0 max) (not hibernating) (unreserved)
loaded spawngroup(  1)  : SV:  [1: de_inferno | main lump | mapload]
---------players--------
  id     time ping loss      state   rate adr name
#end
game_mode                                : 2        : , "sv", "rep", "cl"  : Current game mode
game_type                                : 1        : , "sv", "rep", "cl"  : Current game type
"#;

    #[test]
    fn parses_csgo_reply() {
        let report = parse_status_reply(CSGO_REPLY).unwrap();
        assert_eq!(report.map, "de_dust2");
        assert_eq!(report.player_count, 2);
        assert_eq!(report.bot_count, 1);
        assert_eq!(report.players, vec!["Alice", "Bob"]);
        assert_eq!(report.game_mode, "competitive");
    }

    #[test]
    fn parses_cs2_spawngroup_map() {
        let report = parse_status_reply(CS2_REPLY).unwrap();
        assert_eq!(report.map, "de_inferno");
        assert_eq!(report.player_count, 1);
        assert_eq!(report.game_mode, "deathmatch");
    }

    #[test]
    fn missing_players_line_is_a_mismatch() {
        let err = parse_status_reply("map : de_dust2\n").unwrap_err();
        assert!(matches!(err, StatusError::ParseMismatch(_)));
    }

    #[test]
    fn garbled_players_line_is_a_mismatch() {
        let err = parse_status_reply("players : lots\n").unwrap_err();
        assert!(matches!(err, StatusError::ParseMismatch(_)));
    }

    #[test]
    fn unknown_game_mode() {
        assert_eq!(game_mode_name(0, 0), "casual");
        assert_eq!(game_mode_name(6, 0), "danger zone");
        assert_eq!(game_mode_name(7, 3), "unknown");
    }

    struct CountingCommander {
        calls: AtomicUsize,
        failures_left: Mutex<usize>,
        reply: String,
    }

    impl CountingCommander {
        fn new(reply: &str, failures: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures_left: Mutex::new(failures),
                reply: reply.to_string(),
            }
        }
    }

    #[async_trait]
    impl Commander for CountingCommander {
        async fn execute(&self, command: &str) -> CommandResult<String> {
            assert_eq!(command, STATUS_COMMAND);
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(CommandError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                )));
            }
            Ok(self.reply.clone())
        }
    }

    struct SlowCommander {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Commander for SlowCommander {
        async fn execute(&self, _command: &str) -> CommandResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(CSGO_REPLY.to_string())
        }
    }

    fn cache(commander: Arc<CountingCommander>) -> StatusCache {
        StatusCache::new(commander, Arc::new(SessionTracker::new()))
            .with_retry(RetryPolicy::new(3, Duration::ZERO))
    }

    #[tokio::test]
    async fn cached_calls_within_ttl_query_once() {
        let commander = Arc::new(CountingCommander::new(CSGO_REPLY, 0));
        let cache = cache(commander.clone());

        let first = cache.get_status(true).await.unwrap();
        let second = cache.get_status(true).await.unwrap();

        assert_eq!(commander.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.time, second.time);
    }

    #[tokio::test]
    async fn bypassing_cache_always_queries() {
        let commander = Arc::new(CountingCommander::new(CSGO_REPLY, 0));
        let cache = cache(commander.clone());

        cache.get_status(true).await.unwrap();
        cache.get_status(false).await.unwrap();

        assert_eq!(commander.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entry_is_refreshed() {
        let commander = Arc::new(CountingCommander::new(CSGO_REPLY, 0));
        let cache = cache(commander.clone()).with_ttl(Duration::ZERO);

        cache.get_status(true).await.unwrap();
        cache.get_status(true).await.unwrap();

        assert_eq!(commander.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let commander = Arc::new(CountingCommander::new(CSGO_REPLY, 2));
        let cache = cache(commander.clone());

        let status = cache.get_status(false).await.unwrap();
        assert_eq!(status.player_count, 2);
        assert_eq!(commander.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let commander = Arc::new(CountingCommander::new(CSGO_REPLY, 10));
        let cache = cache(commander.clone());

        let err = cache.get_status(false).await.unwrap_err();
        assert!(matches!(err, StatusError::Backend(CommandError::Io(_))));
        assert_eq!(commander.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn status_time_has_whole_seconds() {
        let commander = Arc::new(CountingCommander::new(CSGO_REPLY, 0));
        let status = cache(commander).get_status(false).await.unwrap();
        assert_eq!(status.time.timestamp_subsec_nanos(), 0);
    }

    #[tokio::test]
    async fn status_json_shape() {
        let commander = Arc::new(CountingCommander::new(CSGO_REPLY, 0));
        let status = cache(commander).get_status(false).await.unwrap();
        let json = serde_json::to_value(&status).unwrap();

        for key in ["time", "map", "game_mode", "player_count", "bot_count", "players"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["local_state"]["rounds_played"], -1);
        assert_eq!(json["local_state"]["game_ongoing"], false);
        assert!(json["local_state"]["ct"]["players"].is_array());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_misses_share_one_query() {
        let commander = Arc::new(SlowCommander {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(StatusCache::new(
            commander.clone(),
            Arc::new(SessionTracker::new()),
        ));

        let lookups: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_status(true).await })
            })
            .collect();
        for lookup in lookups {
            assert_eq!(lookup.await.unwrap().unwrap().map, "de_dust2");
        }
        assert_eq!(commander.calls.load(Ordering::SeqCst), 1);

        cache.get_status(false).await.unwrap();
        assert_eq!(commander.calls.load(Ordering::SeqCst), 2);
    }
}
