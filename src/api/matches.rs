use axum::{
    extract::{Path, Query, State},
    Json,
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

use crate::{
    bracket::{series::MapResult, BestOf},
    live::feed::LiveFeed,
    models::{
        matches::{complete_match, Match, MatchStatus, NewMatch, Outcome},
        teams::Team,
    },
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        jwt::Claims,
        query::{Paged, Pagination},
        validator::{ValidatedJson, ValidatedQuery},
    },
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_matches, create_match))
        .routes(routes!(get_match))
        .routes(routes!(set_maps))
        .routes(routes!(finish_match))
}

#[derive(Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
struct MatchFilter {
    status: Option<MatchStatus>,
    /// Matches where this team plays on either side
    team_id: Option<i32>,
    stage_id: Option<i32>,
}

/// List matches, most recently scheduled first
#[utoipa::path(
    method(get),
    path = "",
    params(Pagination, MatchFilter),
    responses(
        (status = OK, description = "Success", body = Paged<Match>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn list_matches(
    State(state): State<AppState>,
    ValidatedQuery(pagination): ValidatedQuery<Pagination>,
    Query(filter): Query<MatchFilter>,
) -> Result<Json<Paged<Match>>, RouteError> {
    use crate::schema::matches;

    let mut conn = state.db.get().await?;

    let filtered = || {
        let mut query = matches::table.into_boxed();
        if let Some(status) = filter.status {
            query = query.filter(matches::status.eq(status));
        }
        if let Some(team_id) = filter.team_id {
            query = query.filter(
                matches::team1_id
                    .eq(team_id)
                    .or(matches::team2_id.eq(team_id)),
            );
        }
        if let Some(stage_id) = filter.stage_id {
            query = query.filter(matches::stage_id.eq(stage_id));
        }
        query
    };

    let items: Vec<Match> = filtered()
        .order((
            matches::scheduled_at.desc().nulls_last(),
            matches::id.desc(),
        ))
        .offset(pagination.offset())
        .limit(pagination.page_size)
        .select(Match::as_select())
        .load(&mut conn)
        .await?;
    let total: i64 = filtered().count().get_result(&mut conn).await?;

    Ok(Json(Paged::new(items, total, &pagination)))
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct CreateMatchRequest {
    team1_id: i32,
    team2_id: i32,
    /// Odd number of maps, 1 to 7
    #[schema(value_type = i16)]
    best_of: BestOf,
    #[serde(default, with = "time::serde::iso8601::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    scheduled_at: Option<OffsetDateTime>,
}

/// Schedule a match outside of any bracket
#[utoipa::path(
    method(post),
    path = "",
    request_body = CreateMatchRequest,
    responses(
        (status = OK, description = "Success", body = Match, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), err(Debug))]
async fn create_match(
    State(state): State<AppState>,
    claims: Claims,
    ValidatedJson(payload): ValidatedJson<CreateMatchRequest>,
) -> Result<Json<Match>, RouteError> {
    claims.require_moderator()?;
    let mut conn = state.db.get().await?;

    let mut new_match = NewMatch::new(payload.team1_id, payload.team2_id, payload.best_of);
    new_match.scheduled_at = payload.scheduled_at;
    let created = new_match.create(&mut conn).await?;
    info!(match_id = created.id, "Match scheduled");

    Ok(Json(created))
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct MatchResponse {
    #[serde(flatten)]
    game: Match,
    team1: Team,
    team2: Team,
}

/// Get a match with both teams
#[utoipa::path(
    method(get),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of match to get"),
    ),
    responses(
        (status = OK, description = "Success", body = MatchResponse, content_type = "application/json"),
        (status = NOT_FOUND, description = "Match not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn get_match(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<MatchResponse>, RouteError> {
    use crate::schema::teams;

    let mut conn = state.db.get().await?;

    let game = find_match(&mut conn, id).await?;
    let team1: Team = teams::table
        .find(game.team1_id)
        .select(Team::as_select())
        .first(&mut conn)
        .await?;
    let team2: Team = teams::table
        .find(game.team2_id)
        .select(Team::as_select())
        .first(&mut conn)
        .await?;

    Ok(Json(MatchResponse { game, team1, team2 }))
}

#[derive(Deserialize, Validate, ToSchema)]
struct MapsRequest {
    #[validate(length(max = 7))]
    maps: Vec<MapResult>,
}

/// Replace the per-map results of an open match
#[utoipa::path(
    method(put),
    path = "/{id}/maps",
    params(
        ("id" = i32, Path, description = "ID of match to update"),
    ),
    request_body = MapsRequest,
    responses(
        (status = OK, description = "Success", body = Match, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Maps don't add up to a valid series", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Match not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = CONFLICT, description = "Match is already closed", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), err(Debug))]
async fn set_maps(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
    ValidatedJson(payload): ValidatedJson<MapsRequest>,
) -> Result<Json<Match>, RouteError> {
    claims.require_moderator()?;
    let mut conn = state.db.get().await?;

    let game = find_match(&mut conn, id).await?;
    let game = game.set_maps(&mut conn, payload.maps).await?;
    drop_live_snapshot(&state, id).await;

    Ok(Json(game))
}

/// Complete a match
///
/// Takes either the final series score or the map results. Ratings are updated
/// and, for bracket matches, the winner advances.
#[utoipa::path(
    method(post),
    path = "/{id}/complete",
    params(
        ("id" = i32, Path, description = "ID of match to complete"),
    ),
    request_body = Outcome,
    responses(
        (status = OK, description = "Success", body = Match, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Result doesn't decide the series", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Match not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = CONFLICT, description = "Match is already closed", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, outcome), err(Debug))]
async fn finish_match(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
    Json(outcome): Json<Outcome>,
) -> Result<Json<Match>, RouteError> {
    claims.require_moderator()?;
    let mut conn = state.db.get().await?;

    let finished =
        complete_match(&mut conn, id, outcome, state.config.tournament.elo_k_factor).await?;
    drop_live_snapshot(&state, id).await;
    info!(winner_id = ?finished.winner_id, "Match completed");

    Ok(Json(finished))
}

async fn find_match(conn: &mut AsyncPgConnection, id: i32) -> Result<Match, RouteError> {
    use crate::schema::matches;

    Ok(matches::table
        .find(id)
        .select(Match::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(RouteError::new_not_found)?)
}

/// The row changed outside live scoring, so a cached snapshot would be stale.
async fn drop_live_snapshot(state: &AppState, match_id: i32) {
    let feed = LiveFeed::new(&state.redis, &state.config.live);
    if let Err(e) = feed.evict(match_id).await {
        warn!(match_id, "Failed to drop live snapshot: {e:#}");
    }
}
