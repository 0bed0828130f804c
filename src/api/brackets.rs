use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    Json,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

use crate::{
    bracket::{
        seeding::{SeedCandidate, SeedingMethod},
        standings::{self, Placement, StandingRow},
        BestOf, Format, NodeStatus,
    },
    live::feed::LiveFeed,
    models::brackets::{self, NodeView, StageDetail, StagePlan},
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        jwt::Claims,
        validator::ValidatedJson,
    },
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(create_bracket))
        .routes(routes!(get_bracket, delete_bracket))
        .routes(routes!(get_standings))
        .routes(routes!(get_ready))
        .routes(routes!(report_result))
        .routes(routes!(reset_bracket))
        .routes(routes!(next_round))
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct Entrant {
    team_id: i32,
    /// Only used with manual seeding
    seed: Option<u32>,
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct CreateBracketRequest {
    #[validate(length(min = 1, max = 128))]
    name: String,
    format: Format,
    /// Odd number of maps, 1 to 7
    #[schema(value_type = i16)]
    best_of: BestOf,
    #[serde(default)]
    seeding: SeedingMethod,
    #[validate(length(min = 2, max = 256))]
    teams: Vec<Entrant>,
    /// Swiss only, defaults to enough rounds to find a single unbeaten team
    swiss_rounds: Option<u32>,
    /// Round robin only
    #[serde(default)]
    double_round_robin: bool,
}

/// Create a bracket stage
///
/// Seeds the teams, generates the opening matches and schedules those that can be
/// played right away.
#[utoipa::path(
    method(post),
    path = "",
    request_body = CreateBracketRequest,
    responses(
        (status = OK, description = "Success", body = StageDetail, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), fields(name = %payload.name), err(Debug))]
async fn create_bracket(
    State(state): State<AppState>,
    claims: Claims,
    ValidatedJson(payload): ValidatedJson<CreateBracketRequest>,
) -> Result<Json<StageDetail>, RouteError> {
    use crate::schema::teams;

    claims.require_moderator()?;
    let mut conn = state.db.get().await?;

    let ids: Vec<i32> = payload.teams.iter().map(|entrant| entrant.team_id).collect();
    let ratings: HashMap<i32, i32> = teams::table
        .filter(teams::id.eq_any(&ids))
        .select((teams::id, teams::rating))
        .load::<(i32, i32)>(&mut conn)
        .await?
        .into_iter()
        .collect();

    let mut entrants = Vec::with_capacity(payload.teams.len());
    for entrant in &payload.teams {
        let Some(&rating) = ratings.get(&entrant.team_id) else {
            return Err(RouteError::new_bad_request()
                .set_public_error_message(&format!("Team {} does not exist", entrant.team_id)));
        };
        entrants.push(SeedCandidate {
            team_id: entrant.team_id,
            rating,
            seed: entrant.seed,
        });
    }

    let detail = brackets::create_stage(
        &mut conn,
        &StagePlan {
            name: &payload.name,
            format: payload.format,
            best_of: payload.best_of,
            seeding: payload.seeding,
            entrants: &entrants,
            swiss_rounds: payload.swiss_rounds,
            double_round_robin: payload.double_round_robin,
        },
    )
    .await?;
    info!(stage_id = detail.stage.id, "Bracket stage created");

    Ok(Json(detail))
}

/// Get a bracket stage with all of its matches
#[utoipa::path(
    method(get),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of the bracket stage"),
    ),
    responses(
        (status = OK, description = "Success", body = StageDetail, content_type = "application/json"),
        (status = NOT_FOUND, description = "Stage not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn get_bracket(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<StageDetail>, RouteError> {
    let mut conn = state.db.get().await?;

    Ok(Json(brackets::detail(&mut conn, id).await?))
}

/// Delete a bracket stage and its matches
#[utoipa::path(
    method(delete),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of the bracket stage"),
    ),
    responses(
        (status = OK, description = "Success", content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Stage not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), err(Debug))]
async fn delete_bracket(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
) -> Result<(), RouteError> {
    claims.require_moderator()?;
    let mut conn = state.db.get().await?;

    if brackets::delete(&mut conn, id).await? == 0 {
        return Err(RouteError::new_not_found());
    }
    info!("Bracket stage deleted");

    Ok(())
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct StandingsResponse {
    format: Format,
    /// Group table, for round robin and Swiss stages
    table: Vec<StandingRow>,
    /// Final places, for elimination stages
    placements: Vec<Placement>,
}

/// Get the current standings of a stage
#[utoipa::path(
    method(get),
    path = "/{id}/standings",
    params(
        ("id" = i32, Path, description = "ID of the bracket stage"),
    ),
    responses(
        (status = OK, description = "Success", body = StandingsResponse, content_type = "application/json"),
        (status = NOT_FOUND, description = "Stage not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn get_standings(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<StandingsResponse>, RouteError> {
    let mut conn = state.db.get().await?;

    let (stage, bracket) = brackets::load(&mut conn, id).await?;
    let (table, placements) = if stage.format.is_elimination() {
        (Vec::new(), standings::placements(&bracket))
    } else {
        (standings::table(&bracket), Vec::new())
    };

    Ok(Json(StandingsResponse {
        format: stage.format,
        table,
        placements,
    }))
}

/// Get the matches that can be played right now
#[utoipa::path(
    method(get),
    path = "/{id}/ready",
    params(
        ("id" = i32, Path, description = "ID of the bracket stage"),
    ),
    responses(
        (status = OK, description = "Success", body = [NodeView], content_type = "application/json"),
        (status = NOT_FOUND, description = "Stage not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn get_ready(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<NodeView>>, RouteError> {
    let mut conn = state.db.get().await?;

    let detail = brackets::detail(&mut conn, id).await?;
    let mut ready: Vec<NodeView> = detail
        .matches
        .into_iter()
        .filter(|view| view.node.status == NodeStatus::Pending)
        .collect();
    ready.sort_by_key(|view| (view.node.round, view.node.side as i16, view.node.position));

    Ok(Json(ready))
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct ResultRequest {
    #[validate(range(min = 0))]
    team1_score: i32,
    #[validate(range(min = 0))]
    team2_score: i32,
}

/// Report the series score of a bracket match by its code
#[utoipa::path(
    method(post),
    path = "/{id}/matches/{code}/result",
    params(
        ("id" = i32, Path, description = "ID of the bracket stage"),
        ("code" = String, Path, description = "Bracket code of the match, e.g. UB_R1_M2"),
    ),
    request_body = ResultRequest,
    responses(
        (status = OK, description = "Success", body = StageDetail, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Score doesn't decide the series", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Stage or match not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = CONFLICT, description = "Match is not playable", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), err(Debug))]
async fn report_result(
    State(state): State<AppState>,
    claims: Claims,
    Path((id, code)): Path<(i32, String)>,
    ValidatedJson(payload): ValidatedJson<ResultRequest>,
) -> Result<Json<StageDetail>, RouteError> {
    claims.require_moderator()?;
    let mut conn = state.db.get().await?;

    let detail = brackets::report(
        &mut conn,
        id,
        &code,
        payload.team1_score,
        payload.team2_score,
        state.config.tournament.elo_k_factor,
    )
    .await?;

    let match_id = detail
        .matches
        .iter()
        .find(|view| view.node.code == code)
        .and_then(|view| view.match_id);
    if let Some(match_id) = match_id {
        let feed = LiveFeed::new(&state.redis, &state.config.live);
        if let Err(e) = feed.evict(match_id).await {
            warn!(match_id, "Failed to drop live snapshot: {e:#}");
        }
    }

    Ok(Json(detail))
}

/// Clear every result of a stage
///
/// Team ratings earned in the stage are kept until ratings are recalculated.
#[utoipa::path(
    method(post),
    path = "/{id}/reset",
    params(
        ("id" = i32, Path, description = "ID of the bracket stage"),
    ),
    responses(
        (status = OK, description = "Success", body = StageDetail, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Stage not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), err(Debug))]
async fn reset_bracket(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
) -> Result<Json<StageDetail>, RouteError> {
    claims.require_moderator()?;
    let mut conn = state.db.get().await?;

    Ok(Json(brackets::reset(&mut conn, id).await?))
}

/// Pair the next Swiss round
#[utoipa::path(
    method(post),
    path = "/{id}/next-round",
    params(
        ("id" = i32, Path, description = "ID of the bracket stage"),
    ),
    responses(
        (status = OK, description = "Success", body = StageDetail, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Not a Swiss stage", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Stage not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = CONFLICT, description = "Round still in progress or no rounds left", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), err(Debug))]
async fn next_round(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
) -> Result<Json<StageDetail>, RouteError> {
    claims.require_moderator()?;
    let mut conn = state.db.get().await?;

    Ok(Json(brackets::next_round(&mut conn, id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(teams: &str) -> CreateBracketRequest {
        serde_json::from_str(&format!(
            r#"{{"name": "Playoffs", "format": "single_elimination", "bestOf": 3, "teams": {teams}}}"#
        ))
        .unwrap()
    }

    #[test]
    fn entrant_list_is_validated() {
        assert!(request(r#"[{"teamId": 1}]"#).validate().is_err());

        let valid = request(r#"[{"teamId": 1, "seed": 2}, {"teamId": 2, "seed": 1}]"#);
        assert!(valid.validate().is_ok());
        assert_eq!(valid.seeding, SeedingMethod::Rating);
        assert_eq!(valid.teams[1].seed, Some(1));
    }
}
