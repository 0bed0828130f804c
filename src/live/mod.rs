//! Live scoring: a versioned per-match state that admins push updates into and
//! viewers poll with the last version they saw.

pub mod feed;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::bracket::{
    series::{self, MapResult, MapStatus, PlayerLine, SeriesError, SeriesScore},
    BestOf, Slot,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LiveError {
    #[error("map {0} is outside of this series")]
    MapOutOfRange(usize),
    #[error("the match is already completed")]
    AlreadyCompleted,
    #[error("the series is already decided, only stat corrections are accepted")]
    SeriesDecided,
    #[error("the series can't be completed before one team has enough map wins")]
    NotDecided,
    #[error("the match is not open for live scoring")]
    NotLive,
    #[error("another update for this match is in progress, try again")]
    Busy,
    #[error(transparent)]
    Series(#[from] SeriesError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LiveStatus {
    #[default]
    Upcoming,
    Live,
    Paused,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdate {
    /// 1-based map number.
    pub map: usize,
    pub team1_score: i32,
    pub team2_score: i32,
    #[serde(default)]
    pub map_status: Option<MapStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeroUpdate {
    pub map: usize,
    pub team: Slot,
    pub player_id: i32,
    pub hero: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatsUpdate {
    pub map: usize,
    pub team: Slot,
    pub player_id: i32,
    #[serde(default)]
    pub eliminations: i32,
    #[serde(default)]
    pub deaths: i32,
    #[serde(default)]
    pub assists: i32,
    #[serde(default)]
    pub damage: i32,
    #[serde(default)]
    pub healing: i32,
    #[serde(default)]
    pub damage_blocked: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MapUpdate {
    pub map: usize,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub status: Option<MapStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusUpdate {
    pub status: LiveStatus,
}

/// One change pushed by a scorer, sent as `{"type": "score-update", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum LiveUpdate {
    ScoreUpdate(ScoreUpdate),
    HeroUpdate(HeroUpdate),
    StatsUpdate(StatsUpdate),
    MapUpdate(MapUpdate),
    StatusUpdate(StatusUpdate),
}

impl LiveUpdate {
    const fn corrects_stats(&self) -> bool {
        matches!(self, Self::HeroUpdate(_) | Self::StatsUpdate(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveEvent {
    pub version: u64,
    pub update: LiveUpdate,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveMatchState {
    pub match_id: i32,
    /// Bumped by every accepted update.
    pub version: u64,
    pub status: LiveStatus,
    pub best_of: BestOf,
    /// 1-based, 0 before the first map starts.
    pub current_map: usize,
    pub team1_score: i32,
    pub team2_score: i32,
    pub maps: Vec<MapResult>,
    /// Most recent events, oldest first.
    pub events: Vec<LiveEvent>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl LiveMatchState {
    /// Starting state built from what the match row already holds.
    #[must_use]
    pub fn from_match(
        match_id: i32,
        best_of: BestOf,
        status: LiveStatus,
        maps: Vec<MapResult>,
        now: OffsetDateTime,
    ) -> Self {
        let score = series::tally(&maps, best_of).unwrap_or_default();
        let current_map = maps
            .iter()
            .rposition(|map| map.status != MapStatus::Upcoming)
            .map_or(0, |idx| idx + 1);
        Self {
            match_id,
            version: 0,
            status,
            best_of,
            current_map,
            team1_score: score.team1,
            team2_score: score.team2,
            maps,
            events: Vec::new(),
            updated_at: now,
        }
    }

    #[must_use]
    pub const fn series_score(&self) -> SeriesScore {
        SeriesScore {
            team1: self.team1_score,
            team2: self.team2_score,
        }
    }

    #[must_use]
    pub const fn winner(&self) -> Option<Slot> {
        self.series_score().winner(self.best_of)
    }

    /// Validates and applies an update, returning the new version.
    ///
    /// Nothing is changed when an error is returned.
    ///
    /// # Errors
    /// Rejects updates after completion, maps outside the series, score changes once
    /// the series is decided, tied or surplus completed maps, and completing an
    /// undecided series.
    pub fn apply(
        &mut self,
        update: LiveUpdate,
        backlog: usize,
        now: OffsetDateTime,
    ) -> Result<u64, LiveError> {
        if self.status == LiveStatus::Completed {
            return Err(LiveError::AlreadyCompleted);
        }
        if self.winner().is_some()
            && !update.corrects_stats()
            && !matches!(update, LiveUpdate::StatusUpdate(_))
        {
            return Err(LiveError::SeriesDecided);
        }

        let mut maps = self.maps.clone();
        let mut status = self.status;
        let mut current_map = self.current_map;
        match &update {
            LiveUpdate::ScoreUpdate(score) => {
                let map = map_mut(&mut maps, score.map, self.best_of)?;
                if score.team1_score < 0 || score.team2_score < 0 {
                    return Err(SeriesError::NegativeScore.into());
                }
                map.team1_score = score.team1_score;
                map.team2_score = score.team2_score;
                map.status = score.map_status.unwrap_or(MapStatus::Live);
                current_map = score.map;
            }
            LiveUpdate::HeroUpdate(hero) => {
                let map = map_mut(&mut maps, hero.map, self.best_of)?;
                let line = line_mut(map.composition_mut(hero.team), hero.player_id);
                line.hero = Some(hero.hero.clone());
                if hero.role.is_some() {
                    line.role.clone_from(&hero.role);
                }
            }
            LiveUpdate::StatsUpdate(stats) => {
                let map = map_mut(&mut maps, stats.map, self.best_of)?;
                let line = line_mut(map.composition_mut(stats.team), stats.player_id);
                line.eliminations = stats.eliminations;
                line.deaths = stats.deaths;
                line.assists = stats.assists;
                line.damage = stats.damage;
                line.healing = stats.healing;
                line.damage_blocked = stats.damage_blocked;
            }
            LiveUpdate::MapUpdate(change) => {
                let map = map_mut(&mut maps, change.map, self.best_of)?;
                if let Some(name) = &change.name {
                    map.name.clone_from(name);
                }
                if change.mode.is_some() {
                    map.mode.clone_from(&change.mode);
                }
                if let Some(map_status) = change.status {
                    map.status = map_status;
                }
                current_map = change.map;
            }
            LiveUpdate::StatusUpdate(change) => status = change.status,
        }

        let score = series::tally(&maps, self.best_of)?;
        if status == LiveStatus::Completed && score.winner(self.best_of).is_none() {
            return Err(LiveError::NotDecided);
        }
        if status == LiveStatus::Upcoming && current_map > 0 {
            status = LiveStatus::Live;
        }

        self.maps = maps;
        self.status = status;
        self.current_map = current_map;
        self.team1_score = score.team1;
        self.team2_score = score.team2;
        self.version += 1;
        self.updated_at = now;
        self.events.push(LiveEvent {
            version: self.version,
            update,
            at: now,
        });
        if self.events.len() > backlog {
            let excess = self.events.len() - backlog;
            self.events.drain(..excess);
        }
        Ok(self.version)
    }

    /// Events newer than `since`.
    ///
    /// Returns `None` when the backlog no longer reaches back to `since`, in which
    /// case the caller has to refetch the whole state.
    #[must_use]
    pub fn events_since(&self, since: u64) -> Option<Vec<&LiveEvent>> {
        if since >= self.version {
            return Some(Vec::new());
        }
        let oldest = self.events.first().map_or(self.version + 1, |e| e.version);
        if since + 1 < oldest {
            return None;
        }
        Some(self.events.iter().filter(|e| e.version > since).collect())
    }
}

fn map_mut(maps: &mut Vec<MapResult>, map: usize, best_of: BestOf) -> Result<&mut MapResult, LiveError> {
    if map == 0 || map > best_of.max_maps() {
        return Err(LiveError::MapOutOfRange(map));
    }
    while maps.len() < map {
        maps.push(MapResult::placeholder(maps.len()));
    }
    Ok(&mut maps[map - 1])
}

fn line_mut(composition: &mut Vec<PlayerLine>, player_id: i32) -> &mut PlayerLine {
    let idx = if let Some(idx) = composition.iter().position(|l| l.player_id == player_id) {
        idx
    } else {
        composition.push(PlayerLine {
            player_id,
            ..PlayerLine::default()
        });
        composition.len() - 1
    };
    &mut composition[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKLOG: usize = 50;

    fn state() -> LiveMatchState {
        LiveMatchState::from_match(
            7,
            BestOf::THREE,
            LiveStatus::Upcoming,
            Vec::new(),
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    fn score(map: usize, team1_score: i32, team2_score: i32, done: bool) -> LiveUpdate {
        LiveUpdate::ScoreUpdate(ScoreUpdate {
            map,
            team1_score,
            team2_score,
            map_status: done.then_some(MapStatus::Completed),
        })
    }

    fn apply(state: &mut LiveMatchState, update: LiveUpdate) -> Result<u64, LiveError> {
        state.apply(update, BACKLOG, OffsetDateTime::UNIX_EPOCH)
    }

    #[test]
    fn updates_parse_from_tagged_json() {
        let update: LiveUpdate = serde_json::from_str(
            r#"{"type":"hero-update","data":{"map":1,"team":"team2","playerId":4,"hero":"Storm"}}"#,
        )
        .unwrap();
        assert_eq!(
            update,
            LiveUpdate::HeroUpdate(HeroUpdate {
                map: 1,
                team: Slot::Team2,
                player_id: 4,
                hero: "Storm".to_owned(),
                role: None,
            })
        );
        let json = serde_json::to_value(LiveUpdate::StatusUpdate(StatusUpdate {
            status: LiveStatus::Paused,
        }))
        .unwrap();
        assert_eq!(json["type"], "status-update");
        assert_eq!(json["data"]["status"], "paused");
    }

    #[test]
    fn score_updates_bump_version_and_go_live() {
        let mut state = state();
        assert_eq!(apply(&mut state, score(1, 1, 0, false)), Ok(1));
        assert_eq!(state.status, LiveStatus::Live);
        assert_eq!(state.current_map, 1);
        assert_eq!(state.maps[0].status, MapStatus::Live);
        assert_eq!(state.series_score(), SeriesScore::default());

        assert_eq!(apply(&mut state, score(1, 2, 0, true)), Ok(2));
        assert_eq!(state.team1_score, 1);
    }

    #[test]
    fn later_maps_get_placeholders() {
        let mut state = state();
        apply(&mut state, score(2, 0, 1, false)).unwrap();
        assert_eq!(state.maps.len(), 2);
        assert_eq!(state.maps[0].name, "Map 1");
        assert_eq!(
            apply(&mut state, score(4, 1, 0, false)),
            Err(LiveError::MapOutOfRange(4))
        );
    }

    #[test]
    fn rejected_updates_leave_state_untouched() {
        let mut state = state();
        apply(&mut state, score(1, 1, 0, false)).unwrap();
        let before = state.clone();
        assert_eq!(
            apply(&mut state, score(1, 1, 1, true)),
            Err(LiveError::Series(SeriesError::TiedMap(1)))
        );
        assert_eq!(state, before);
    }

    #[test]
    fn decided_series_accepts_only_stats_and_status() {
        let mut state = state();
        apply(&mut state, score(1, 2, 0, true)).unwrap();
        apply(&mut state, score(2, 2, 1, true)).unwrap();
        assert_eq!(state.winner(), Some(Slot::Team1));
        assert_eq!(
            apply(&mut state, score(3, 1, 0, false)),
            Err(LiveError::SeriesDecided)
        );
        let stats = LiveUpdate::StatsUpdate(StatsUpdate {
            map: 2,
            team: Slot::Team1,
            player_id: 11,
            eliminations: 20,
            deaths: 3,
            assists: 9,
            damage: 15_000,
            healing: 0,
            damage_blocked: 2_000,
        });
        apply(&mut state, stats).unwrap();
        assert_eq!(state.maps[1].team1_composition[0].eliminations, 20);

        let complete = LiveUpdate::StatusUpdate(StatusUpdate {
            status: LiveStatus::Completed,
        });
        apply(&mut state, complete).unwrap();
        assert_eq!(
            apply(&mut state, score(2, 3, 1, true)),
            Err(LiveError::AlreadyCompleted)
        );
    }

    #[test]
    fn completing_requires_a_winner() {
        let mut state = state();
        apply(&mut state, score(1, 2, 0, true)).unwrap();
        let complete = LiveUpdate::StatusUpdate(StatusUpdate {
            status: LiveStatus::Completed,
        });
        assert_eq!(apply(&mut state, complete), Err(LiveError::NotDecided));
    }

    #[test]
    fn hero_updates_fill_compositions() {
        let mut state = state();
        let pick = |player_id, hero: &str| {
            LiveUpdate::HeroUpdate(HeroUpdate {
                map: 1,
                team: Slot::Team2,
                player_id,
                hero: hero.to_owned(),
                role: Some("duelist".to_owned()),
            })
        };
        apply(&mut state, pick(3, "Psylocke")).unwrap();
        apply(&mut state, pick(3, "Black Panther")).unwrap();
        apply(&mut state, pick(5, "Hela")).unwrap();
        let lineup = &state.maps[0].team2_composition;
        assert_eq!(lineup.len(), 2);
        assert_eq!(lineup[0].hero.as_deref(), Some("Black Panther"));
        // Hero picks alone don't start the match.
        assert_eq!(state.status, LiveStatus::Upcoming);
    }

    #[test]
    fn events_since_follows_backlog() {
        let mut state = state();
        for round in 0..5 {
            state
                .apply(score(1, round, 0, false), 3, OffsetDateTime::UNIX_EPOCH)
                .unwrap();
        }
        assert_eq!(state.events.len(), 3);
        assert_eq!(state.events_since(5).map(|e| e.len()), Some(0));
        let recent: Vec<u64> = state
            .events_since(3)
            .unwrap()
            .iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(recent, vec![4, 5]);
        assert!(state.events_since(2).is_some());
        assert!(state.events_since(1).is_none());
    }

    #[test]
    fn from_match_picks_up_stored_maps() {
        let maps = vec![
            MapResult {
                team1_score: 3,
                team2_score: 2,
                status: MapStatus::Completed,
                ..MapResult::placeholder(0)
            },
            MapResult::placeholder(1),
        ];
        let state = LiveMatchState::from_match(
            1,
            BestOf::THREE,
            LiveStatus::Live,
            maps,
            OffsetDateTime::UNIX_EPOCH,
        );
        assert_eq!(state.current_map, 1);
        assert_eq!(state.series_score(), SeriesScore { team1: 1, team2: 0 });
    }
}
