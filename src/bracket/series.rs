//! Best-of-N series scoring across maps.

use diesel::{
    backend::Backend,
    deserialize::{self, FromSql, FromSqlRow},
    expression::AsExpression,
    pg::Pg,
    serialize::{self, Output, ToSql},
    sql_types::SmallInt,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::Slot;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeriesError {
    #[error("best-of must be an odd number between 1 and 7, got {0}")]
    InvalidBestOf(i16),
    #[error("scores cannot be negative")]
    NegativeScore,
    #[error("{team1}-{team2} does not decide a best-of-{best_of} series")]
    Undecided { team1: i32, team2: i32, best_of: i16 },
    #[error("map {0} is marked completed but has no winner")]
    TiedMap(usize),
    #[error("{maps} maps recorded for a best-of-{best_of} series")]
    TooManyMaps { maps: usize, best_of: i16 },
    #[error("map {0} was completed after the series was already decided")]
    PlayedAfterDecided(usize),
}

/// Series length. Always odd so a series can't end in a draw.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = SmallInt)]
#[serde(try_from = "i16", into = "i16")]
pub struct BestOf(i16);

impl BestOf {
    pub const ONE: Self = Self(1);
    pub const THREE: Self = Self(3);
    pub const FIVE: Self = Self(5);

    /// # Errors
    /// Fails for even numbers and anything outside 1..=7.
    pub const fn new(maps: i16) -> Result<Self, SeriesError> {
        if maps >= 1 && maps <= 7 && maps % 2 == 1 {
            Ok(Self(maps))
        } else {
            Err(SeriesError::InvalidBestOf(maps))
        }
    }

    #[must_use]
    pub const fn get(self) -> i16 {
        self.0
    }

    #[must_use]
    pub const fn wins_needed(self) -> i32 {
        self.0 as i32 / 2 + 1
    }

    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn max_maps(self) -> usize {
        self.0 as usize
    }

    /// Works out which side won from a final series score.
    ///
    /// # Errors
    /// Fails unless exactly one side reached the required map wins and the other stayed below.
    pub const fn decide(self, team1: i32, team2: i32) -> Result<Slot, SeriesError> {
        if team1 < 0 || team2 < 0 {
            return Err(SeriesError::NegativeScore);
        }
        let needed = self.wins_needed();
        if team1 == needed && team2 < needed {
            Ok(Slot::Team1)
        } else if team2 == needed && team1 < needed {
            Ok(Slot::Team2)
        } else {
            Err(SeriesError::Undecided {
                team1,
                team2,
                best_of: self.0,
            })
        }
    }
}

impl Default for BestOf {
    fn default() -> Self {
        Self::THREE
    }
}

impl TryFrom<i16> for BestOf {
    type Error = SeriesError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BestOf> for i16 {
    fn from(value: BestOf) -> Self {
        value.0
    }
}

impl ToSql<SmallInt, Pg> for BestOf
where
    i16: ToSql<SmallInt, Pg>,
{
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        <i16 as ToSql<SmallInt, Pg>>::to_sql(&self.0, out)
    }
}

impl<DB> FromSql<SmallInt, DB> for BestOf
where
    DB: Backend,
    i16: FromSql<SmallInt, DB>,
{
    fn from_sql(bytes: DB::RawValue<'_>) -> deserialize::Result<Self> {
        let maps = i16::from_sql(bytes)?;
        Ok(Self::new(maps)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MapStatus {
    #[default]
    Upcoming,
    Live,
    Completed,
}

/// One player's line on a map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerLine {
    pub player_id: i32,
    pub hero: Option<String>,
    pub role: Option<String>,
    pub eliminations: i32,
    pub deaths: i32,
    pub assists: i32,
    pub damage: i32,
    pub healing: i32,
    pub damage_blocked: i32,
}

/// A single map of a series as stored in `matches.maps_data`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct MapResult {
    pub name: String,
    pub mode: Option<String>,
    pub team1_score: i32,
    pub team2_score: i32,
    pub status: MapStatus,
    pub team1_composition: Vec<PlayerLine>,
    pub team2_composition: Vec<PlayerLine>,
}

impl MapResult {
    /// Map that hasn't been named yet, `index` is zero-based.
    #[must_use]
    pub fn placeholder(index: usize) -> Self {
        Self {
            name: format!("Map {}", index + 1),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn winner(&self) -> Option<Slot> {
        if self.team1_score > self.team2_score {
            Some(Slot::Team1)
        } else if self.team2_score > self.team1_score {
            Some(Slot::Team2)
        } else {
            None
        }
    }

    pub fn composition_mut(&mut self, slot: Slot) -> &mut Vec<PlayerLine> {
        match slot {
            Slot::Team1 => &mut self.team1_composition,
            Slot::Team2 => &mut self.team2_composition,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SeriesScore {
    pub team1: i32,
    pub team2: i32,
}

impl SeriesScore {
    #[must_use]
    pub const fn winner(self, best_of: BestOf) -> Option<Slot> {
        let needed = best_of.wins_needed();
        if self.team1 >= needed {
            Some(Slot::Team1)
        } else if self.team2 >= needed {
            Some(Slot::Team2)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn map_difference(self) -> i32 {
        (self.team1 - self.team2).abs()
    }
}

/// Adds up the completed maps of a series.
///
/// # Errors
/// Fails on tied completed maps, on more maps than the series allows, and on maps
/// completed after one side already had enough wins.
pub fn tally(maps: &[MapResult], best_of: BestOf) -> Result<SeriesScore, SeriesError> {
    if maps.len() > best_of.max_maps() {
        return Err(SeriesError::TooManyMaps {
            maps: maps.len(),
            best_of: best_of.get(),
        });
    }
    let mut score = SeriesScore::default();
    for (idx, map) in maps.iter().enumerate() {
        if map.status != MapStatus::Completed {
            continue;
        }
        if score.winner(best_of).is_some() {
            return Err(SeriesError::PlayedAfterDecided(idx + 1));
        }
        match map.winner() {
            Some(Slot::Team1) => score.team1 += 1,
            Some(Slot::Team2) => score.team2 += 1,
            None => return Err(SeriesError::TiedMap(idx + 1)),
        }
    }
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(team1_score: i32, team2_score: i32) -> MapResult {
        MapResult {
            team1_score,
            team2_score,
            status: MapStatus::Completed,
            ..MapResult::placeholder(0)
        }
    }

    #[test]
    fn best_of_must_be_odd() {
        assert!(BestOf::new(3).is_ok());
        assert_eq!(BestOf::new(4), Err(SeriesError::InvalidBestOf(4)));
        assert_eq!(BestOf::new(0), Err(SeriesError::InvalidBestOf(0)));
        assert_eq!(BestOf::new(9), Err(SeriesError::InvalidBestOf(9)));
    }

    #[test]
    fn wins_needed_is_majority() {
        assert_eq!(BestOf::ONE.wins_needed(), 1);
        assert_eq!(BestOf::THREE.wins_needed(), 2);
        assert_eq!(BestOf::FIVE.wins_needed(), 3);
    }

    #[test]
    fn decide_accepts_only_final_scores() {
        assert_eq!(BestOf::THREE.decide(2, 1), Ok(Slot::Team1));
        assert_eq!(BestOf::THREE.decide(0, 2), Ok(Slot::Team2));
        assert!(BestOf::THREE.decide(1, 1).is_err());
        assert!(BestOf::THREE.decide(3, 0).is_err());
        assert!(BestOf::THREE.decide(2, 2).is_err());
        assert_eq!(
            BestOf::THREE.decide(-1, 2),
            Err(SeriesError::NegativeScore)
        );
    }

    #[test]
    fn best_of_deserializes_from_number() {
        let parsed: BestOf = serde_json::from_str("5").unwrap();
        assert_eq!(parsed, BestOf::FIVE);
        assert!(serde_json::from_str::<BestOf>("2").is_err());
    }

    #[test]
    fn tally_counts_completed_maps_only() {
        let live = MapResult {
            team1_score: 1,
            status: MapStatus::Live,
            ..MapResult::placeholder(2)
        };
        let maps = vec![completed(3, 1), completed(0, 2), live];
        assert_eq!(
            tally(&maps, BestOf::FIVE),
            Ok(SeriesScore { team1: 1, team2: 1 })
        );
    }

    #[test]
    fn tally_rejects_maps_after_decision() {
        let maps = vec![completed(2, 0), completed(2, 1), completed(0, 2)];
        assert_eq!(
            tally(&maps, BestOf::THREE),
            Err(SeriesError::PlayedAfterDecided(3))
        );
    }

    #[test]
    fn tally_rejects_ties_and_overflow() {
        assert_eq!(
            tally(&[completed(1, 1)], BestOf::THREE),
            Err(SeriesError::TiedMap(1))
        );
        let maps = vec![MapResult::default(); 4];
        assert!(matches!(
            tally(&maps, BestOf::THREE),
            Err(SeriesError::TooManyMaps { maps: 4, .. })
        ));
    }

    #[test]
    fn map_results_read_partial_json() {
        let map: MapResult =
            serde_json::from_str(r#"{"name":"Yggsgard","team1Score":2,"status":"completed"}"#)
                .unwrap();
        assert_eq!(map.team2_score, 0);
        assert_eq!(map.winner(), Some(Slot::Team1));
        assert!(map.team1_composition.is_empty());
    }
}
