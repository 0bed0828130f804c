use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use validator::Validate;

use super::players::Player;
use crate::{
    schema::{players, teams},
    util::elo::RankTier,
};

diesel::define_sql_function!(fn lower(x: diesel::sql_types::Text) -> diesel::sql_types::Text);

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[diesel(table_name = teams, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: i32,
    pub name: String,
    pub short_name: String,
    pub region: String,
    pub rating: i32,
    /// Prize money in whole US dollars.
    pub earnings: i64,
    pub logo_url: Option<String>,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub created_at: OffsetDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = teams)]
pub struct NewTeam<'a> {
    pub name: &'a str,
    pub short_name: &'a str,
    pub region: &'a str,
    pub rating: i32,
    pub earnings: i64,
    pub logo_url: Option<&'a str>,
}

impl NewTeam<'_> {
    /// Inserts the team.
    ///
    /// # Errors
    /// Fails if the name is taken or the insert fails.
    pub async fn create(&self, conn: &mut AsyncPgConnection) -> QueryResult<Team> {
        diesel::insert_into(teams::table)
            .values(self)
            .returning(Team::as_returning())
            .get_result(conn)
            .await
    }
}

#[derive(AsChangeset, Deserialize, Validate, ToSchema, Default)]
#[diesel(table_name = teams)]
#[serde(rename_all = "camelCase")]
pub struct TeamChangeset {
    #[validate(length(min = 1, max = 64))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 16))]
    pub short_name: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub region: Option<String>,
    #[validate(range(min = 0))]
    pub earnings: Option<i64>,
    #[validate(url)]
    pub logo_url: Option<String>,
}

impl TeamChangeset {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.short_name.is_none()
            && self.region.is_none()
            && self.earnings.is_none()
            && self.logo_url.is_none()
    }
}

/// A team with its standing in the global rating list.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TeamRanking {
    pub rank: i64,
    pub tier: RankTier,
    #[serde(flatten)]
    pub team: Team,
}

impl Team {
    #[must_use]
    pub fn tier(&self) -> RankTier {
        RankTier::for_rating(self.rating)
    }

    /// Current players of the team.
    ///
    /// # Errors
    /// Fails if the query fails.
    pub async fn roster(&self, conn: &mut AsyncPgConnection) -> QueryResult<Vec<Player>> {
        Player::belonging_to(self)
            .select(Player::as_select())
            .order(players::username.asc())
            .load(conn)
            .await
    }

    /// # Errors
    /// Fails if the update fails.
    pub async fn update(
        &self,
        conn: &mut AsyncPgConnection,
        changes: &TeamChangeset,
    ) -> QueryResult<Self> {
        if changes.is_empty() {
            return Ok(self.clone());
        }
        diesel::update(self)
            .set(changes)
            .returning(Self::as_returning())
            .get_result(conn)
            .await
    }

    /// Teams ordered by rating, highest first, with their 1-based rank.
    ///
    /// # Errors
    /// Fails if the query fails.
    pub async fn rankings(
        conn: &mut AsyncPgConnection,
        region: Option<&str>,
        page: i64,
        page_size: i64,
    ) -> QueryResult<Vec<TeamRanking>> {
        let mut query = teams::table.into_boxed();
        if let Some(region) = region {
            query = query.filter(teams::region.eq(region.to_owned()));
        }
        let offset = (page - 1) * page_size;
        let rows: Vec<Self> = query
            .order((teams::rating.desc(), teams::id.asc()))
            .offset(offset)
            .limit(page_size)
            .select(Self::as_select())
            .load(conn)
            .await?;

        Ok(rows
            .into_iter()
            .zip(offset + 1..)
            .map(|(team, rank)| TeamRanking {
                rank,
                tier: team.tier(),
                team,
            })
            .collect())
    }

    /// Finds a team by short name, or by full name with `_` standing in for spaces.
    ///
    /// # Errors
    /// Fails if the query fails.
    pub async fn find_by_mention(
        conn: &mut AsyncPgConnection,
        name: &str,
    ) -> QueryResult<Option<Self>> {
        let (plain, spaced) = crate::util::mentions::team_name_variants(name);
        teams::table
            .filter(
                lower(teams::short_name)
                    .eq(plain.clone())
                    .or(lower(teams::name).eq(plain))
                    .or(lower(teams::name).eq(spaced)),
            )
            .order(teams::id.asc())
            .select(Self::as_select())
            .first(conn)
            .await
            .optional()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team(rating: i32) -> Team {
        Team {
            id: 7,
            name: "Sentinels".to_owned(),
            short_name: "SEN".to_owned(),
            region: "NA".to_owned(),
            rating,
            earnings: 250_000,
            logo_url: None,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn tier_follows_rating() {
        assert_eq!(team(1000).tier(), RankTier::Platinum);
        assert_eq!(team(650).tier(), RankTier::Silver);
    }

    #[test]
    fn ranking_flattens_team_fields() {
        let json = serde_json::to_value(TeamRanking {
            rank: 3,
            tier: RankTier::Diamond,
            team: team(2000),
        })
        .unwrap();
        assert_eq!(json["rank"], 3);
        assert_eq!(json["shortName"], "SEN");
        assert_eq!(json["tier"], "diamond");
    }

    #[test]
    fn changeset_rejects_bad_values() {
        let changes: TeamChangeset =
            serde_json::from_str(r#"{"earnings": -5, "logoUrl": "not a url"}"#).unwrap();
        let errors = changes.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("earnings"));
        assert!(errors.field_errors().contains_key("logo_url"));
        assert!(TeamChangeset::default().is_empty());
    }
}
