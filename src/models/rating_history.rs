use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use super::teams::Team;
use crate::{schema::team_rating_history, util::elo};

#[derive(Queryable, Selectable, Identifiable, Associations, Debug, Serialize, ToSchema)]
#[diesel(belongs_to(Team))]
#[diesel(table_name = team_rating_history, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct RatingChange {
    pub id: i32,
    pub team_id: i32,
    pub match_id: i32,
    pub old_rating: i32,
    pub new_rating: i32,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub created_at: OffsetDateTime,
}

#[derive(Insertable, Debug, Clone, Copy, PartialEq, Eq)]
#[diesel(table_name = team_rating_history)]
pub struct NewRatingChange {
    pub team_id: i32,
    pub match_id: i32,
    pub old_rating: i32,
    pub new_rating: i32,
}

/// Works out both rating changes for a finished series.
#[must_use]
pub fn changes_for(
    match_id: i32,
    winner: (i32, i32),
    loser: (i32, i32),
    map_difference: i32,
    k_factor: f64,
) -> [NewRatingChange; 2] {
    let (winner_id, winner_rating) = winner;
    let (loser_id, loser_rating) = loser;
    let (winner_new, loser_new) = elo::rate(winner_rating, loser_rating, map_difference, k_factor);
    [
        NewRatingChange {
            team_id: winner_id,
            match_id,
            old_rating: winner_rating,
            new_rating: winner_new,
        },
        NewRatingChange {
            team_id: loser_id,
            match_id,
            old_rating: loser_rating,
            new_rating: loser_new,
        },
    ]
}

/// Writes new team ratings and logs them.
///
/// # Errors
/// Fails if any of the writes fail.
pub async fn record(
    conn: &mut AsyncPgConnection,
    changes: &[NewRatingChange],
) -> QueryResult<()> {
    use crate::schema::teams;

    for change in changes {
        diesel::update(teams::table.find(change.team_id))
            .set(teams::rating.eq(change.new_rating))
            .execute(conn)
            .await?;
    }
    diesel::insert_into(team_rating_history::table)
        .values(changes)
        .execute(conn)
        .await?;
    Ok(())
}

impl RatingChange {
    /// Latest rating changes of a team, newest first.
    ///
    /// # Errors
    /// Fails if the query fails.
    pub async fn for_team(
        conn: &mut AsyncPgConnection,
        team: &Team,
        limit: i64,
    ) -> QueryResult<Vec<Self>> {
        Self::belonging_to(team)
            .order((
                team_rating_history::created_at.desc(),
                team_rating_history::id.desc(),
            ))
            .limit(limit)
            .select(Self::as_select())
            .load(conn)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changes_cover_both_teams() {
        let [winner, loser] = changes_for(9, (1, 1000), (2, 1000), 0, 32.0);
        assert_eq!(winner.team_id, 1);
        assert_eq!(winner.new_rating, 1016);
        assert_eq!(loser.team_id, 2);
        assert_eq!(loser.old_rating, 1000);
        assert_eq!(loser.new_rating, 984);
        assert_eq!(winner.match_id, 9);
    }
}
