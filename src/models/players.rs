use diesel::{
    deserialize::FromSqlRow,
    dsl,
    expression::AsExpression,
    prelude::*,
    sql_types::{Integer, SmallInt},
};
use diesel_async::{scoped_futures::ScopedFutureExt, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use validator::Validate;

use super::{teams::Team, ModelError};
use crate::{
    schema::{players, teams},
    util::{elo, sql_enum::smallint_enum},
};

diesel::define_sql_function!(fn greatest(a: Integer, b: Integer) -> Integer);

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
pub enum PlayerRole {
    Vanguard = 0,
    Duelist = 1,
    Strategist = 2,
    Flex = 3,
}

smallint_enum!(PlayerRole);

#[derive(
    Queryable, Selectable, Identifiable, Associations, Debug, Clone, PartialEq, Eq, Serialize, ToSchema,
)]
#[diesel(belongs_to(Team))]
#[diesel(table_name = players, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: i32,
    pub username: String,
    pub real_name: Option<String>,
    pub role: PlayerRole,
    pub rating: i32,
    pub team_id: Option<i32>,
    pub country: Option<String>,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub created_at: OffsetDateTime,
}

#[derive(Insertable, Deserialize, Validate, ToSchema)]
#[diesel(table_name = players)]
#[serde(rename_all = "camelCase")]
pub struct NewPlayer {
    #[validate(length(min = 1, max = 32))]
    pub username: String,
    #[validate(length(max = 128))]
    pub real_name: Option<String>,
    pub role: PlayerRole,
    pub team_id: Option<i32>,
    #[validate(length(min = 2, max = 64))]
    pub country: Option<String>,
}

/// Partial update. `teamId: null` moves the player out of their team.
#[derive(AsChangeset, Deserialize, Validate, ToSchema, Default)]
#[diesel(table_name = players)]
#[serde(rename_all = "camelCase")]
pub struct PlayerChangeset {
    #[validate(length(min = 1, max = 32))]
    pub username: Option<String>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    #[schema(value_type = Option<String>)]
    pub real_name: Option<Option<String>>,
    pub role: Option<PlayerRole>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    #[schema(value_type = Option<i32>)]
    pub team_id: Option<Option<i32>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    #[schema(value_type = Option<String>)]
    pub country: Option<Option<String>>,
}

type LockedTeam = dsl::ForUpdate<dsl::Select<dsl::Find<teams::table, i32>, teams::id>>;

fn locked_team(team_id: i32) -> LockedTeam {
    teams::table.find(team_id).select(teams::id).for_update()
}

/// Fails with [`ModelError::RosterFull`] if `team_id` already holds `limit` players.
///
/// Locks the team row first, so the count stays true until the caller's
/// transaction ends. `moving` is left out of the count so a player already on
/// the team can be updated without tripping the check.
///
/// # Errors
/// Also fails if the count query fails.
async fn ensure_roster_space(
    conn: &mut AsyncPgConnection,
    team_id: i32,
    limit: i64,
    moving: Option<i32>,
) -> anyhow::Result<()> {
    // An unknown team is left to the foreign key on write.
    if locked_team(team_id).first::<i32>(conn).await.optional()?.is_none() {
        return Ok(());
    }
    let mut query = players::table
        .filter(players::team_id.eq(team_id))
        .into_boxed();
    if let Some(player_id) = moving {
        query = query.filter(players::id.ne(player_id));
    }
    let current: i64 = query.count().get_result(conn).await?;
    if current >= limit {
        return Err(ModelError::RosterFull { team_id, limit }.into());
    }
    Ok(())
}

impl NewPlayer {
    /// Inserts the player after checking the roster limit of their team.
    ///
    /// # Errors
    /// Fails if the team is full, doesn't exist or the insert fails.
    pub async fn create(
        &self,
        conn: &mut AsyncPgConnection,
        roster_size: i64,
    ) -> anyhow::Result<Player> {
        conn.transaction::<_, anyhow::Error, _>(|conn| {
            async move {
                if let Some(team_id) = self.team_id {
                    ensure_roster_space(conn, team_id, roster_size, None).await?;
                }
                Ok(diesel::insert_into(players::table)
                    .values(self)
                    .returning(Player::as_returning())
                    .get_result(conn)
                    .await?)
            }
            .scope_boxed()
        })
        .await
    }
}

impl Player {
    /// Applies a partial update, checking the roster limit when the player changes team.
    ///
    /// # Errors
    /// Fails if the new team is full or the update fails.
    pub async fn update(
        &self,
        conn: &mut AsyncPgConnection,
        changes: &PlayerChangeset,
        roster_size: i64,
    ) -> anyhow::Result<Self> {
        if changes.username.is_none()
            && changes.real_name.is_none()
            && changes.role.is_none()
            && changes.team_id.is_none()
            && changes.country.is_none()
        {
            return Ok(self.clone());
        }
        conn.transaction::<_, anyhow::Error, _>(|conn| {
            async move {
                if let Some(Some(team_id)) = changes.team_id {
                    if self.team_id != Some(team_id) {
                        ensure_roster_space(conn, team_id, roster_size, Some(self.id)).await?;
                    }
                }
                Ok(diesel::update(self)
                    .set(changes)
                    .returning(Self::as_returning())
                    .get_result(conn)
                    .await?)
            }
            .scope_boxed()
        })
        .await
    }
}

/// Moves every player of both teams by [`elo::PLAYER_RATING_STEP`], never below
/// [`elo::PLAYER_RATING_FLOOR`].
///
/// # Errors
/// Fails if an update fails.
pub async fn apply_result(
    conn: &mut AsyncPgConnection,
    winner_team: i32,
    loser_team: i32,
) -> QueryResult<()> {
    diesel::update(players::table.filter(players::team_id.eq(winner_team)))
        .set(players::rating.eq(greatest(
            players::rating + elo::PLAYER_RATING_STEP,
            elo::PLAYER_RATING_FLOOR,
        )))
        .execute(conn)
        .await?;
    diesel::update(players::table.filter(players::team_id.eq(loser_team)))
        .set(players::rating.eq(greatest(
            players::rating - elo::PLAYER_RATING_STEP,
            elo::PLAYER_RATING_FLOOR,
        )))
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changeset_tells_null_from_missing() {
        let changes: PlayerChangeset = serde_json::from_str(r#"{"teamId": null}"#).unwrap();
        assert_eq!(changes.team_id, Some(None));
        assert_eq!(changes.country, None);

        let changes: PlayerChangeset = serde_json::from_str(r#"{"teamId": 4}"#).unwrap();
        assert_eq!(changes.team_id, Some(Some(4)));
    }

    #[test]
    fn new_player_validation() {
        let player: NewPlayer =
            serde_json::from_str(r#"{"username": "", "role": "duelist"}"#).unwrap();
        assert!(player.validate().is_err());

        let player: NewPlayer =
            serde_json::from_str(r#"{"username": "Sypeh", "role": "strategist", "teamId": 3}"#)
                .unwrap();
        assert!(player.validate().is_ok());
        assert_eq!(player.role, PlayerRole::Strategist);
    }

    #[test]
    fn roster_checks_lock_the_team() {
        let sql = diesel::debug_query::<diesel::pg::Pg, _>(&locked_team(3)).to_string();
        assert!(sql.contains(r#""teams"."id" = $1"#), "{sql}");
        assert!(sql.contains("FOR UPDATE"), "{sql}");
    }
}
