use axum::{
    extract::{Path, Query, State},
    Json,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

use crate::{
    models::{
        players::Player,
        rating_history::RatingChange,
        teams::{NewTeam, Team, TeamChangeset, TeamRanking},
    },
    util::{
        elo::{Prediction, RankTier},
        errors::{RouteError, SimpleRouteErrorOutput},
        jwt::Claims,
        query::{Paged, Pagination},
        validator::{ValidatedJson, ValidatedQuery},
    },
    AppState,
};

const HISTORY_LIMIT: i64 = 20;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_teams, create_team))
        .routes(routes!(get_rankings))
        .routes(routes!(get_team, update_team, delete_team))
        .routes(routes!(predict_match))
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct RegionFilter {
    /// Only teams from this region
    region: Option<String>,
}

/// List teams
#[utoipa::path(
    method(get),
    path = "",
    params(Pagination, RegionFilter),
    responses(
        (status = OK, description = "Success", body = Paged<Team>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn list_teams(
    State(state): State<AppState>,
    ValidatedQuery(pagination): ValidatedQuery<Pagination>,
    Query(filter): Query<RegionFilter>,
) -> Result<Json<Paged<Team>>, RouteError> {
    use crate::schema::teams;

    let mut conn = state.db.get().await?;

    let mut query = teams::table.into_boxed();
    let mut count_query = teams::table.into_boxed();
    if let Some(region) = &filter.region {
        query = query.filter(teams::region.eq(region.clone()));
        count_query = count_query.filter(teams::region.eq(region.clone()));
    }

    let items: Vec<Team> = query
        .order(teams::name.asc())
        .offset(pagination.offset())
        .limit(pagination.page_size)
        .select(Team::as_select())
        .load(&mut conn)
        .await?;
    let total: i64 = count_query.count().get_result(&mut conn).await?;

    Ok(Json(Paged::new(items, total, &pagination)))
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct CreateTeamRequest {
    #[validate(length(min = 1, max = 64))]
    name: String,
    #[validate(length(min = 1, max = 16))]
    short_name: String,
    #[validate(length(min = 1, max = 32))]
    region: String,
    #[validate(range(min = 0))]
    #[serde(default)]
    earnings: i64,
    #[validate(url)]
    logo_url: Option<String>,
}

/// Create a team
#[utoipa::path(
    method(post),
    path = "",
    request_body = CreateTeamRequest,
    responses(
        (status = OK, description = "Success", body = Team, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = CONFLICT, description = "Team name taken", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), fields(name = %payload.name), err(Debug))]
async fn create_team(
    State(state): State<AppState>,
    claims: Claims,
    ValidatedJson(payload): ValidatedJson<CreateTeamRequest>,
) -> Result<Json<Team>, RouteError> {
    claims.require_moderator()?;
    let mut conn = state.db.get().await?;

    let team = NewTeam {
        name: &payload.name,
        short_name: &payload.short_name,
        region: &payload.region,
        rating: state.config.tournament.default_rating,
        earnings: payload.earnings,
        logo_url: payload.logo_url.as_deref(),
    }
    .create(&mut conn)
    .await?;
    info!(team_id = team.id, "Team created");

    Ok(Json(team))
}

/// Get global team rankings
#[utoipa::path(
    method(get),
    path = "/rankings",
    params(Pagination, RegionFilter),
    responses(
        (status = OK, description = "Success", body = Paged<TeamRanking>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn get_rankings(
    State(state): State<AppState>,
    ValidatedQuery(pagination): ValidatedQuery<Pagination>,
    Query(filter): Query<RegionFilter>,
) -> Result<Json<Paged<TeamRanking>>, RouteError> {
    use crate::schema::teams;

    let mut conn = state.db.get().await?;

    let items = Team::rankings(
        &mut conn,
        filter.region.as_deref(),
        pagination.page,
        pagination.page_size,
    )
    .await?;

    let mut count_query = teams::table.into_boxed();
    if let Some(region) = filter.region {
        count_query = count_query.filter(teams::region.eq(region));
    }
    let total: i64 = count_query.count().get_result(&mut conn).await?;

    Ok(Json(Paged::new(items, total, &pagination)))
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct TeamResponse {
    #[serde(flatten)]
    team: Team,
    tier: RankTier,
    roster: Vec<Player>,
    /// Latest rating changes, newest first
    rating_history: Vec<RatingChange>,
}

/// Get a team with its roster and recent rating changes
#[utoipa::path(
    method(get),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of team to get"),
    ),
    responses(
        (status = OK, description = "Success", body = TeamResponse, content_type = "application/json"),
        (status = NOT_FOUND, description = "Team not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn get_team(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<TeamResponse>, RouteError> {
    let mut conn = state.db.get().await?;

    let team = find_team(&mut conn, id).await?;
    let roster = team.roster(&mut conn).await?;
    let rating_history = RatingChange::for_team(&mut conn, &team, HISTORY_LIMIT).await?;

    Ok(Json(TeamResponse {
        tier: team.tier(),
        team,
        roster,
        rating_history,
    }))
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct PredictionResponse {
    team: Team,
    opponent: Team,
    #[serde(flatten)]
    prediction: Prediction,
}

/// Predict a series between two teams from their ratings
#[utoipa::path(
    method(get),
    path = "/{id}/predict/{opponent_id}",
    params(
        ("id" = i32, Path, description = "ID of the team"),
        ("opponent_id" = i32, Path, description = "ID of the opposing team"),
    ),
    responses(
        (status = OK, description = "Success", body = PredictionResponse, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Both IDs name the same team", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Team not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn predict_match(
    State(state): State<AppState>,
    Path((id, opponent_id)): Path<(i32, i32)>,
) -> Result<Json<PredictionResponse>, RouteError> {
    if id == opponent_id {
        return Err(RouteError::new_bad_request()
            .set_public_error_message("A team can't play itself"));
    }
    let mut conn = state.db.get().await?;

    let team = find_team(&mut conn, id).await?;
    let opponent = find_team(&mut conn, opponent_id).await?;

    Ok(Json(PredictionResponse {
        prediction: Prediction::new(team.rating, opponent.rating),
        team,
        opponent,
    }))
}

/// Update a team
#[utoipa::path(
    method(patch),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of team to update"),
    ),
    request_body = TeamChangeset,
    responses(
        (status = OK, description = "Success", body = Team, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Team not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, changes), err(Debug))]
async fn update_team(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
    ValidatedJson(changes): ValidatedJson<TeamChangeset>,
) -> Result<Json<Team>, RouteError> {
    claims.require_moderator()?;
    let mut conn = state.db.get().await?;

    let team = find_team(&mut conn, id).await?;
    Ok(Json(team.update(&mut conn, &changes).await?))
}

/// Delete a team
///
/// Players of the team become free agents.
#[utoipa::path(
    method(delete),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of team to delete"),
    ),
    responses(
        (status = OK, description = "Success", content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Team not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), err(Debug))]
async fn delete_team(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
) -> Result<(), RouteError> {
    use crate::schema::teams;

    claims.require_moderator()?;
    let mut conn = state.db.get().await?;

    let deleted = diesel::delete(teams::table.find(id))
        .execute(&mut conn)
        .await?;
    if deleted == 0 {
        return Err(RouteError::new_not_found());
    }
    info!("Team deleted");

    Ok(())
}

async fn find_team(
    conn: &mut diesel_async::AsyncPgConnection,
    id: i32,
) -> Result<Team, RouteError> {
    use crate::schema::teams;

    Ok(teams::table
        .find(id)
        .select(Team::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(RouteError::new_not_found)?)
}
