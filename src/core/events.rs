//! Classification of CS:GO engine log lines into typed events.
//!
//! Parsing is pure: one trimmed line in, at most one event out. Patterns are
//! tried in a fixed precedence order and the first match wins. Lines that
//! match nothing are expected (the engine logs far more than we track) and
//! simply yield `None`.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::session::Team;

/// Steam id the engine prints for bots.
pub const BOT_STEAM_ID: &str = "BOT";

static RE_CONNECTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^"([^<]+)<(\d+)><([^>]+)><([^>]*)>" connected,"#).expect("invalid regex")
});
static RE_DISCONNECTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^"([^<]+)<(\d+)><([^>]+)><([^>]*)>" disconnected \("#).expect("invalid regex")
});
static RE_SWITCHED_TEAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^"([^<]+)<(\d+)><([^>]+)>" switched from team <(\w+)> to <(\w+)>"#)
        .expect("invalid regex")
});
static RE_MATCH_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^MatchStatus: Score: (\d+):(\d+) on map "(\w+)" RoundsPlayed: (-?\d+)"#)
        .expect("invalid regex")
});
static RE_GAME_OVER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Game Over:").expect("invalid regex"));
static RE_LOG_CLOSED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Log file closed").expect("invalid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    PlayerConnected {
        name: String,
    },
    PlayerDisconnected {
        name: String,
    },
    PlayerSwitchedTeam {
        player: String,
        old_team: Team,
        new_team: Team,
        is_bot: bool,
    },
    MatchStatus {
        ct_score: u32,
        t_score: u32,
        map: String,
        rounds_played: i64,
    },
    GameOver,
    LogClosed,
}

/// Classify one log line. Returns `None` for anything we do not track.
pub fn parse_log_line(line: &str) -> Option<LogEvent> {
    let line = line.trim();

    if let Some(caps) = RE_CONNECTED.captures(line) {
        if &caps[3] != BOT_STEAM_ID {
            return Some(LogEvent::PlayerConnected {
                name: caps[1].to_string(),
            });
        }
    }

    if let Some(caps) = RE_DISCONNECTED.captures(line) {
        if &caps[3] != BOT_STEAM_ID {
            return Some(LogEvent::PlayerDisconnected {
                name: caps[1].to_string(),
            });
        }
    }

    if let Some(caps) = RE_SWITCHED_TEAM.captures(line) {
        return Some(LogEvent::PlayerSwitchedTeam {
            player: caps[1].to_string(),
            old_team: Team::from_log(&caps[4]),
            new_team: Team::from_log(&caps[5]),
            is_bot: &caps[3] == BOT_STEAM_ID,
        });
    }

    if let Some(caps) = RE_MATCH_STATUS.captures(line) {
        // The numeric groups only fail to parse on overflow, which we treat
        // like any other unrecognised line.
        return Some(LogEvent::MatchStatus {
            ct_score: caps[1].parse().ok()?,
            t_score: caps[2].parse().ok()?,
            map: caps[3].to_string(),
            rounds_played: caps[4].parse().ok()?,
        });
    }

    if RE_GAME_OVER.is_match(line) {
        return Some(LogEvent::GameOver);
    }

    if RE_LOG_CLOSED.is_match(line) {
        return Some(LogEvent::LogClosed);
    }

    None
}

/// Strip the engine's `L MM/DD/YYYY - HH:MM:SS: ` prefix (or the `RL` variant
/// used for UDP log packets) from a raw log line.
///
/// Returns `None` when the line has no prefix separator at all, which is how
/// the engine's unprefixed console chatter looks.
pub fn strip_log_prefix(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    raw.split_once(": ").map(|(_, message)| message.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connected() {
        let event = parse_log_line(
            r#""Alice<1><STEAM_1:0:123456><>" connected, address "203.0.113.7:27005""#,
        );
        assert_eq!(
            event,
            Some(LogEvent::PlayerConnected {
                name: "Alice".to_string()
            })
        );
    }

    #[test]
    fn bot_connect_is_ignored() {
        assert_eq!(
            parse_log_line(r#""Bot Vitaliy<3><BOT><>" connected, address """#),
            None
        );
    }

    #[test]
    fn parses_disconnected() {
        let event = parse_log_line(
            r#""Alice<1><STEAM_1:0:123456><CT>" disconnected (reason "Disconnect")"#,
        );
        assert_eq!(
            event,
            Some(LogEvent::PlayerDisconnected {
                name: "Alice".to_string()
            })
        );
    }

    #[test]
    fn parses_team_switch() {
        let event = parse_log_line(
            r#""Alice<1><STEAM_1:0:123456>" switched from team <Unassigned> to <CT>"#,
        );
        assert_eq!(
            event,
            Some(LogEvent::PlayerSwitchedTeam {
                player: "Alice".to_string(),
                old_team: Team::Unassigned,
                new_team: Team::CounterTerrorist,
                is_bot: false,
            })
        );
    }

    #[test]
    fn parses_bot_team_switch() {
        let event = parse_log_line(r#""Bot Ivan<4><BOT>" switched from team <CT> to <TERRORIST>"#);
        assert_eq!(
            event,
            Some(LogEvent::PlayerSwitchedTeam {
                player: "Bot Ivan".to_string(),
                old_team: Team::CounterTerrorist,
                new_team: Team::Terrorist,
                is_bot: true,
            })
        );
    }

    #[test]
    fn parses_match_status() {
        let event = parse_log_line(r#"MatchStatus: Score: 3:5 on map "de_dust2" RoundsPlayed: 8"#);
        assert_eq!(
            event,
            Some(LogEvent::MatchStatus {
                ct_score: 3,
                t_score: 5,
                map: "de_dust2".to_string(),
                rounds_played: 8,
            })
        );
    }

    #[test]
    fn parses_warmup_match_status() {
        let event =
            parse_log_line(r#"MatchStatus: Score: 0:0 on map "de_inferno" RoundsPlayed: -1"#);
        assert!(matches!(
            event,
            Some(LogEvent::MatchStatus {
                rounds_played: -1,
                ..
            })
        ));
    }

    #[test]
    fn parses_game_over_and_log_closed() {
        assert_eq!(
            parse_log_line("Game Over: competitive mg_active de_dust2 score 16:10 after 35 min"),
            Some(LogEvent::GameOver)
        );
        assert_eq!(parse_log_line("Log file closed"), Some(LogEvent::LogClosed));
    }

    #[test]
    fn unrecognised_lines_yield_nothing() {
        assert_eq!(parse_log_line(""), None);
        assert_eq!(parse_log_line(r#"server_cvar: "sv_cheats" "0""#), None);
        assert_eq!(parse_log_line("  Game Over was not at the start"), None);
        assert_eq!(
            parse_log_line(r#"World triggered "Round_Start""#),
            None
        );
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(parse_log_line("  Log file closed\n"), Some(LogEvent::LogClosed));
    }

    #[test]
    fn strips_engine_prefix() {
        assert_eq!(
            strip_log_prefix(r#"L 10/18/2026 - 20:14:03: "Alice<1><STEAM_1:0:1><>" connected, address "x""#),
            Some(r#""Alice<1><STEAM_1:0:1><>" connected, address "x""#)
        );
        assert_eq!(
            strip_log_prefix("RL 10/18/2026 - 20:14:03: Log file closed\n"),
            Some("Log file closed")
        );
        assert_eq!(strip_log_prefix("no separator here"), None);
    }
}
