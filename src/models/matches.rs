use diesel::{
    deserialize::FromSqlRow, expression::AsExpression, prelude::*, sql_types::SmallInt,
};
use diesel_async::{scoped_futures::ScopedFutureExt, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, instrument};
use utoipa::ToSchema;

use super::{brackets, maps::MapsData, players, rating_history, ModelError};
use crate::{
    bracket::{
        series::{self, MapResult, MapStatus, SeriesError, SeriesScore},
        BestOf, Slot,
    },
    live::{LiveMatchState, LiveStatus},
    schema::{matches, teams},
    util::{elo, sql_enum::smallint_enum},
};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    TryFromPrimitive,
    AsExpression,
    FromSqlRow,
)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum MatchStatus {
    Upcoming = 0,
    Live = 1,
    Completed = 2,
    Cancelled = 3,
}

smallint_enum!(MatchStatus);

impl MatchStatus {
    #[must_use]
    pub const fn live_status(self) -> LiveStatus {
        match self {
            Self::Upcoming => LiveStatus::Upcoming,
            Self::Live => LiveStatus::Live,
            Self::Completed | Self::Cancelled => LiveStatus::Completed,
        }
    }

    /// Row status while a match is scored live. Closing the row is left to
    /// [`complete_match`].
    #[must_use]
    pub const fn from_live(status: LiveStatus) -> Self {
        match status {
            LiveStatus::Upcoming => Self::Upcoming,
            LiveStatus::Live | LiveStatus::Paused | LiveStatus::Completed => Self::Live,
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[diesel(table_name = matches, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: i32,
    pub team1_id: i32,
    pub team2_id: i32,
    pub team1_score: i32,
    pub team2_score: i32,
    #[schema(value_type = i16)]
    pub best_of: BestOf,
    pub status: MatchStatus,
    #[schema(value_type = Vec<MapResult>)]
    pub maps_data: MapsData,
    pub winner_id: Option<i32>,
    pub stage_id: Option<i32>,
    pub bracket_code: Option<String>,
    #[serde(serialize_with = "time::serde::iso8601::option::serialize")]
    pub scheduled_at: Option<OffsetDateTime>,
    #[serde(serialize_with = "time::serde::iso8601::option::serialize")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub created_at: OffsetDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = matches)]
pub struct NewMatch {
    pub team1_id: i32,
    pub team2_id: i32,
    pub best_of: BestOf,
    pub maps_data: MapsData,
    pub stage_id: Option<i32>,
    pub bracket_code: Option<String>,
    pub scheduled_at: Option<OffsetDateTime>,
}

impl NewMatch {
    #[must_use]
    pub fn new(team1_id: i32, team2_id: i32, best_of: BestOf) -> Self {
        Self {
            team1_id,
            team2_id,
            best_of,
            maps_data: MapsData::default(),
            stage_id: None,
            bracket_code: None,
            scheduled_at: None,
        }
    }

    /// Inserts the match.
    ///
    /// # Errors
    /// Fails with [`ModelError::SameTeam`] if both sides are the same team, or if
    /// the insert fails.
    pub async fn create(&self, conn: &mut AsyncPgConnection) -> anyhow::Result<Match> {
        if self.team1_id == self.team2_id {
            return Err(ModelError::SameTeam.into());
        }
        Ok(diesel::insert_into(matches::table)
            .values(self)
            .returning(Match::as_returning())
            .get_result(conn)
            .await?)
    }
}

/// How a match result is reported.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum Outcome {
    /// Map-by-map results, the series score is derived from them.
    Maps { maps: Vec<MapResult> },
    /// Final series score only.
    #[serde(rename_all = "camelCase")]
    Scores { team1_score: i32, team2_score: i32 },
}

/// A validated final result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decided {
    pub score: SeriesScore,
    pub winner: Slot,
    pub maps: Vec<MapResult>,
}

impl Match {
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.status, MatchStatus::Completed | MatchStatus::Cancelled)
    }

    #[must_use]
    pub const fn team(&self, slot: Slot) -> i32 {
        match slot {
            Slot::Team1 => self.team1_id,
            Slot::Team2 => self.team2_id,
        }
    }

    /// Checks that an outcome decides this match's series.
    ///
    /// # Errors
    /// Fails if the scores or maps don't make a finished best-of series.
    pub fn decide(&self, outcome: Outcome) -> Result<Decided, SeriesError> {
        match outcome {
            Outcome::Scores {
                team1_score,
                team2_score,
            } => {
                let winner = self.best_of.decide(team1_score, team2_score)?;
                let score = SeriesScore {
                    team1: team1_score,
                    team2: team2_score,
                };
                // Recorded maps are kept only if they add up to the reported score.
                let maps = match series::tally(&self.maps_data.0, self.best_of) {
                    Ok(recorded) if recorded == score => self.maps_data.0.clone(),
                    _ => Vec::new(),
                };
                Ok(Decided {
                    score,
                    winner,
                    maps,
                })
            }
            Outcome::Maps { maps } => {
                let score = series::tally(&maps, self.best_of)?;
                let winner = self.best_of.decide(score.team1, score.team2)?;
                Ok(Decided { score, winner, maps })
            }
        }
    }

    /// Replaces the per-map results of an open match and updates the series score.
    ///
    /// Any map in progress or finished moves an upcoming match to live. Completion
    /// is a separate step.
    ///
    /// # Errors
    /// Fails if the match is closed, the maps don't add up, or the update fails.
    pub async fn set_maps(
        &self,
        conn: &mut AsyncPgConnection,
        maps: Vec<MapResult>,
    ) -> anyhow::Result<Self> {
        if self.is_closed() {
            return Err(ModelError::MatchClosed(self.id).into());
        }
        let score = series::tally(&maps, self.best_of)?;
        let started = maps.iter().any(|map| map.status != MapStatus::Upcoming);
        let status = if started {
            MatchStatus::Live
        } else {
            self.status
        };
        Ok(diesel::update(self)
            .set((
                matches::maps_data.eq(MapsData(maps)),
                matches::team1_score.eq(score.team1),
                matches::team2_score.eq(score.team2),
                matches::status.eq(status),
            ))
            .returning(Self::as_returning())
            .get_result(conn)
            .await?)
    }

    /// Copies live scoring state into the match row.
    ///
    /// # Errors
    /// Fails if the match is closed or the update fails.
    pub async fn mirror_live(
        conn: &mut AsyncPgConnection,
        state: &LiveMatchState,
    ) -> anyhow::Result<Self> {
        let updated = diesel::update(
            matches::table
                .find(state.match_id)
                .filter(matches::status.eq_any([MatchStatus::Upcoming, MatchStatus::Live])),
        )
        .set((
            matches::maps_data.eq(MapsData(state.maps.clone())),
            matches::team1_score.eq(state.team1_score),
            matches::team2_score.eq(state.team2_score),
            matches::status.eq(MatchStatus::from_live(state.status)),
        ))
        .returning(Self::as_returning())
        .get_result(conn)
        .await
        .optional()?;
        updated.ok_or_else(|| ModelError::MatchClosed(state.match_id).into())
    }
}

/// Finishes a match in one transaction.
///
/// Stores the result, moves both team ratings and logs the change, moves the
/// ratings of both rosters, and when the match belongs to a bracket stage
/// reports it there so the next matches open up.
///
/// # Errors
/// Fails if the match is missing or closed, the outcome doesn't decide the
/// series, the bracket rejects the result, or any write fails. Nothing is
/// written in that case.
#[instrument(skip(conn, outcome), err(Debug))]
pub async fn complete_match(
    conn: &mut AsyncPgConnection,
    match_id: i32,
    outcome: Outcome,
    k_factor: f64,
) -> anyhow::Result<Match> {
    conn.transaction::<_, anyhow::Error, _>(|conn| {
        async move { complete_in_transaction(conn, match_id, outcome, k_factor).await }
            .scope_boxed()
    })
    .await
}

async fn complete_in_transaction(
    conn: &mut AsyncPgConnection,
    match_id: i32,
    outcome: Outcome,
    k_factor: f64,
) -> anyhow::Result<Match> {
    // Stage before match, the same order bracket resets lock in.
    let stage_id: Option<i32> = matches::table
        .find(match_id)
        .select(matches::stage_id)
        .first(conn)
        .await?;
    if let Some(stage_id) = stage_id {
        brackets::lock_stage(conn, stage_id).await?;
    }
    let current: Match = matches::table
        .find(match_id)
        .select(Match::as_select())
        .for_update()
        .first(conn)
        .await?;
    if current.is_closed() {
        return Err(ModelError::MatchClosed(match_id).into());
    }
    let decided = current.decide(outcome)?;
    let winner_id = current.team(decided.winner);
    let loser_id = current.team(decided.winner.other());

    let finished: Match = diesel::update(&current)
        .set((
            matches::team1_score.eq(decided.score.team1),
            matches::team2_score.eq(decided.score.team2),
            matches::maps_data.eq(MapsData(decided.maps)),
            matches::winner_id.eq(winner_id),
            matches::status.eq(MatchStatus::Completed),
            matches::completed_at.eq(OffsetDateTime::now_utc()),
        ))
        .returning(Match::as_returning())
        .get_result(conn)
        .await?;

    let (winner_rating, loser_rating) = lock_ratings(conn, winner_id, loser_id).await?;
    let changes = rating_history::changes_for(
        match_id,
        (winner_id, winner_rating),
        (loser_id, loser_rating),
        decided.score.map_difference(),
        k_factor,
    );
    rating_history::record(conn, &changes).await?;
    players::apply_result(conn, winner_id, loser_id).await?;

    if let (Some(stage_id), Some(code)) = (finished.stage_id, finished.bracket_code.as_deref()) {
        brackets::record_result(
            conn,
            stage_id,
            code,
            finished.team1_score,
            finished.team2_score,
        )
        .await?;
    }

    info!(
        match_id,
        winner_id,
        score = %format!("{}-{}", finished.team1_score, finished.team2_score),
        "Match completed"
    );
    Ok(finished)
}

async fn team_rating(conn: &mut AsyncPgConnection, team_id: i32) -> QueryResult<i32> {
    teams::table
        .find(team_id)
        .select(teams::rating)
        .for_update()
        .first(conn)
        .await
}

/// Lowest team id first.
const fn lock_order(a: i32, b: i32) -> [i32; 2] {
    if a <= b {
        [a, b]
    } else {
        [b, a]
    }
}

/// Locks both teams in id order and returns their ratings as `(a, b)`.
async fn lock_ratings(conn: &mut AsyncPgConnection, a: i32, b: i32) -> QueryResult<(i32, i32)> {
    let [first, second] = lock_order(a, b);
    let first_rating = team_rating(conn, first).await?;
    let second_rating = team_rating(conn, second).await?;
    Ok(if first == a {
        (first_rating, second_rating)
    } else {
        (second_rating, first_rating)
    })
}

/// Rebuilds every team and player rating by replaying completed matches in the
/// order they finished. Players are credited to the team they are on now.
///
/// Returns the number of matches replayed.
///
/// # Errors
/// Fails if any query fails. The whole rebuild is rolled back in that case.
pub async fn recalculate_ratings(
    conn: &mut AsyncPgConnection,
    default_rating: i32,
    k_factor: f64,
) -> anyhow::Result<usize> {
    use std::collections::HashMap;

    use crate::schema::{players as player_rows, team_rating_history};

    conn.transaction::<_, anyhow::Error, _>(|conn| {
        async move {
            diesel::delete(team_rating_history::table)
                .execute(conn)
                .await?;
            let played: Vec<Match> = matches::table
                .filter(matches::status.eq(MatchStatus::Completed))
                .filter(matches::winner_id.is_not_null())
                .order((matches::completed_at.asc(), matches::id.asc()))
                .select(Match::as_select())
                .load(conn)
                .await?;

            let rosters: Vec<(i32, i32)> = player_rows::table
                .filter(player_rows::team_id.is_not_null())
                .select((player_rows::id, player_rows::team_id.assume_not_null()))
                .load(conn)
                .await?;
            let mut player_ratings: HashMap<i32, i32> = HashMap::new();

            let mut ratings: HashMap<i32, i32> = HashMap::new();
            let mut log = Vec::with_capacity(played.len() * 2);
            for finished in &played {
                let Some(winner_id) = finished.winner_id else {
                    continue;
                };
                let loser_id = if winner_id == finished.team1_id {
                    finished.team2_id
                } else {
                    finished.team1_id
                };
                let winner_rating = *ratings.get(&winner_id).unwrap_or(&default_rating);
                let loser_rating = *ratings.get(&loser_id).unwrap_or(&default_rating);
                let score = SeriesScore {
                    team1: finished.team1_score,
                    team2: finished.team2_score,
                };
                let changes = rating_history::changes_for(
                    finished.id,
                    (winner_id, winner_rating),
                    (loser_id, loser_rating),
                    score.map_difference(),
                    k_factor,
                );
                for change in &changes {
                    ratings.insert(change.team_id, change.new_rating);
                }
                log.extend(changes);

                for &(player_id, team_id) in &rosters {
                    if team_id != winner_id && team_id != loser_id {
                        continue;
                    }
                    let rating = player_ratings
                        .entry(player_id)
                        .or_insert(elo::PLAYER_RATING_FLOOR);
                    *rating = elo::player_rating(*rating, team_id == winner_id);
                }
            }

            diesel::update(teams::table)
                .set(teams::rating.eq(default_rating))
                .execute(conn)
                .await?;
            for (&team_id, &rating) in &ratings {
                diesel::update(teams::table.find(team_id))
                    .set(teams::rating.eq(rating))
                    .execute(conn)
                    .await?;
            }
            diesel::update(player_rows::table)
                .set(player_rows::rating.eq(elo::PLAYER_RATING_FLOOR))
                .execute(conn)
                .await?;
            for (&player_id, &rating) in &player_ratings {
                diesel::update(player_rows::table.find(player_id))
                    .set(player_rows::rating.eq(rating))
                    .execute(conn)
                    .await?;
            }
            for chunk in log.chunks(1000) {
                diesel::insert_into(team_rating_history::table)
                    .values(chunk)
                    .execute(conn)
                    .await?;
            }
            Ok(played.len())
        }
        .scope_boxed()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_match(best_of: BestOf) -> Match {
        Match {
            id: 1,
            team1_id: 10,
            team2_id: 20,
            team1_score: 0,
            team2_score: 0,
            best_of,
            status: MatchStatus::Live,
            maps_data: MapsData::default(),
            winner_id: None,
            stage_id: None,
            bracket_code: None,
            scheduled_at: None,
            completed_at: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn map(team1_score: i32, team2_score: i32) -> MapResult {
        MapResult {
            team1_score,
            team2_score,
            status: MapStatus::Completed,
            ..MapResult::default()
        }
    }

    #[test]
    fn outcome_accepts_either_shape() {
        let outcome: Outcome = serde_json::from_str(r#"{"team1Score": 2, "team2Score": 1}"#).unwrap();
        assert_eq!(
            outcome,
            Outcome::Scores {
                team1_score: 2,
                team2_score: 1
            }
        );
        let outcome: Outcome = serde_json::from_str(r#"{"maps": []}"#).unwrap();
        assert_eq!(outcome, Outcome::Maps { maps: vec![] });
    }

    #[test]
    fn decide_from_scores() {
        let decided = open_match(BestOf::THREE)
            .decide(Outcome::Scores {
                team1_score: 0,
                team2_score: 2,
            })
            .unwrap();
        assert_eq!(decided.winner, Slot::Team2);
        assert_eq!(open_match(BestOf::THREE).team(decided.winner), 20);
    }

    #[test]
    fn decide_from_maps() {
        let decided = open_match(BestOf::FIVE)
            .decide(Outcome::Maps {
                maps: vec![map(3, 1), map(0, 2), map(2, 1), map(3, 2)],
            })
            .unwrap();
        assert_eq!(decided.score, SeriesScore { team1: 3, team2: 1 });
        assert_eq!(decided.winner, Slot::Team1);
        assert_eq!(decided.maps.len(), 4);
    }

    #[test]
    fn undecided_maps_are_rejected() {
        let err = open_match(BestOf::THREE)
            .decide(Outcome::Maps {
                maps: vec![map(3, 1)],
            })
            .unwrap_err();
        assert_eq!(
            err,
            SeriesError::Undecided {
                team1: 1,
                team2: 0,
                best_of: 3
            }
        );
    }

    #[test]
    fn closed_matches() {
        let mut finished = open_match(BestOf::ONE);
        assert!(!finished.is_closed());
        finished.status = MatchStatus::Cancelled;
        assert!(finished.is_closed());
        assert_eq!(MatchStatus::Cancelled.live_status(), LiveStatus::Completed);
    }

    #[test]
    fn reported_scores_drop_maps_that_disagree() {
        let mut game = open_match(BestOf::THREE);
        game.maps_data = MapsData(vec![map(3, 1)]);
        let decided = game
            .decide(Outcome::Scores {
                team1_score: 0,
                team2_score: 2,
            })
            .unwrap();
        assert!(decided.maps.is_empty());

        game.maps_data = MapsData(vec![map(3, 1), map(2, 3), map(3, 0)]);
        let decided = game
            .decide(Outcome::Scores {
                team1_score: 2,
                team2_score: 1,
            })
            .unwrap();
        assert_eq!(decided.maps.len(), 3);
    }

    #[test]
    fn live_scoring_never_closes_the_row() {
        assert_eq!(MatchStatus::from_live(LiveStatus::Upcoming), MatchStatus::Upcoming);
        assert_eq!(MatchStatus::from_live(LiveStatus::Live), MatchStatus::Live);
        assert_eq!(MatchStatus::from_live(LiveStatus::Paused), MatchStatus::Live);
        assert_eq!(MatchStatus::from_live(LiveStatus::Completed), MatchStatus::Live);
    }

    #[test]
    fn team_locks_follow_id_order() {
        assert_eq!(lock_order(20, 10), [10, 20]);
        assert_eq!(lock_order(10, 20), [10, 20]);
    }
}
