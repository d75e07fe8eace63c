//! Live match / team / player state for one CS:GO server.
//!
//! State is mutated exclusively by parsed log events, all under one mutex.
//! Readers copy the state out under the same mutex so a status response never
//! observes a half-applied event.
use std::collections::BTreeSet;

use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use crate::core::events::LogEvent;

/// Player name used to address the bot counters instead of the rosters.
pub const BOT_PLAYER: &str = "BOT";

/// Team designations as printed in engine logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Team {
    CounterTerrorist,
    Terrorist,
    Spectator,
    Unassigned,
    Other(String),
}

impl Team {
    pub fn from_log(name: &str) -> Self {
        match name {
            "CT" => Team::CounterTerrorist,
            "TERRORIST" => Team::Terrorist,
            "SPECTATOR" => Team::Spectator,
            "Unassigned" => Team::Unassigned,
            other => Team::Other(other.to_string()),
        }
    }

    /// Whether this team has a roster (spectators and unassigned players don't).
    pub fn is_playing(&self) -> bool {
        matches!(self, Team::CounterTerrorist | Team::Terrorist)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeamStatus {
    pub score: u32,
    pub players: BTreeSet<String>,
    pub bots: u32,
}

/// Where the match is at. Replaces the raw `game_ongoing` / `rounds_played`
/// pair so that "ongoing with unknown rounds" cannot be represented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchPhase {
    /// No match information seen yet.
    #[default]
    Idle,
    InMatch {
        rounds_played: u32,
    },
    /// Match ended; scores are retained until the next status line.
    GameOver {
        rounds_played: u32,
    },
}

impl MatchPhase {
    /// Rounds played, or `-1` when unknown.
    pub fn rounds_played(&self) -> i64 {
        match self {
            MatchPhase::Idle => -1,
            MatchPhase::InMatch { rounds_played } | MatchPhase::GameOver { rounds_played } => {
                i64::from(*rounds_played)
            }
        }
    }

    pub fn game_ongoing(&self) -> bool {
        matches!(self, MatchPhase::InMatch { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub ct: TeamStatus,
    pub t: TeamStatus,
    pub map_name: String,
    pub phase: MatchPhase,
}

impl SessionState {
    pub fn rounds_played(&self) -> i64 {
        self.phase.rounds_played()
    }

    pub fn game_ongoing(&self) -> bool {
        self.phase.game_ongoing()
    }

    fn team_mut(&mut self, team: &Team) -> Option<&mut TeamStatus> {
        match team {
            Team::CounterTerrorist => Some(&mut self.ct),
            Team::Terrorist => Some(&mut self.t),
            _ => None,
        }
    }

    /// Move `player` from `old_team` to `new_team`.
    ///
    /// Bots are tracked as counters only. For named players, removing an
    /// absent player or re-adding a present one is a no-op, and joining a
    /// team also evicts the player from the opposite roster.
    pub fn join_team(&mut self, player: &str, old_team: &Team, new_team: &Team) {
        if player == BOT_PLAYER {
            if let Some(team) = self.team_mut(old_team) {
                team.bots = team.bots.saturating_sub(1);
            }
            if let Some(team) = self.team_mut(new_team) {
                team.bots += 1;
            }
            return;
        }

        if let Some(team) = self.team_mut(old_team) {
            team.players.remove(player);
        }

        if new_team.is_playing() {
            self.ct.players.remove(player);
            self.t.players.remove(player);
            if let Some(team) = self.team_mut(new_team) {
                team.players.insert(player.to_string());
            }
        }
    }

    /// Remove `player` from both rosters.
    pub fn remove_player(&mut self, player: &str) {
        self.join_team(player, &Team::CounterTerrorist, &Team::Unassigned);
        self.join_team(player, &Team::Terrorist, &Team::Unassigned);
    }

    /// Clear rosters and bot counters; scores, map and phase are kept.
    pub fn unset_teams(&mut self) {
        self.ct.players.clear();
        self.ct.bots = 0;
        self.t.players.clear();
        self.t.bots = 0;
    }

    /// Apply one parsed log event.
    pub fn apply(&mut self, event: &LogEvent) {
        match event {
            LogEvent::PlayerConnected { .. } => {}
            LogEvent::PlayerDisconnected { name } => self.remove_player(name),
            LogEvent::PlayerSwitchedTeam {
                player,
                old_team,
                new_team,
                is_bot,
            } => {
                let who = if *is_bot { BOT_PLAYER } else { player.as_str() };
                self.join_team(who, old_team, new_team);
            }
            LogEvent::MatchStatus {
                ct_score,
                t_score,
                map,
                rounds_played,
            } => {
                self.ct.score = *ct_score;
                self.t.score = *t_score;
                self.map_name = map.clone();
                self.phase = match u32::try_from(*rounds_played) {
                    Ok(rounds_played) => MatchPhase::InMatch { rounds_played },
                    Err(_) => MatchPhase::Idle,
                };
            }
            LogEvent::GameOver => {
                if let MatchPhase::InMatch { rounds_played } = self.phase {
                    self.phase = MatchPhase::GameOver { rounds_played };
                }
            }
            LogEvent::LogClosed => self.unset_teams(),
        }
    }
}

/// JSON shape of `local_state` in the status document. The map is reported
/// at the top level of the status, so it is left out here.
impl Serialize for SessionState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct LocalState<'a> {
            ct: &'a TeamStatus,
            t: &'a TeamStatus,
            rounds_played: i64,
            game_ongoing: bool,
        }

        LocalState {
            ct: &self.ct,
            t: &self.t,
            rounds_played: self.rounds_played(),
            game_ongoing: self.game_ongoing(),
        }
        .serialize(serializer)
    }
}

/// Owns the session state of one tracked server.
#[derive(Debug, Default)]
pub struct SessionTracker {
    state: Mutex<SessionState>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, event: &LogEvent) {
        self.state.lock().apply(event);
    }

    pub fn join_team(&self, player: &str, old_team: &Team, new_team: &Team) {
        self.state.lock().join_team(player, old_team, new_team);
    }

    pub fn remove_player(&self, player: &str) {
        self.state.lock().remove_player(player);
    }

    pub fn unset_teams(&self) {
        self.state.lock().unset_teams();
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.state.lock().clone()
    }
}
