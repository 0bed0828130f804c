use axum::{
    extract::{Path, Query, State},
    Json,
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::{
    models::{
        players::{NewPlayer, Player, PlayerChangeset, PlayerRole},
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
        .routes(routes!(list_players, create_player))
        .routes(routes!(get_rankings))
        .routes(routes!(get_player, update_player, delete_player))
}

#[derive(Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
struct PlayerFilter {
    team_id: Option<i32>,
    role: Option<PlayerRole>,
    /// Only players without a team
    #[serde(default)]
    free_agents: bool,
}

/// List players
#[utoipa::path(
    method(get),
    path = "",
    params(Pagination, PlayerFilter),
    responses(
        (status = OK, description = "Success", body = Paged<Player>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn list_players(
    State(state): State<AppState>,
    ValidatedQuery(pagination): ValidatedQuery<Pagination>,
    Query(filter): Query<PlayerFilter>,
) -> Result<Json<Paged<Player>>, RouteError> {
    use crate::schema::players;

    let mut conn = state.db.get().await?;

    let filtered = || {
        let mut query = players::table.into_boxed();
        if let Some(team_id) = filter.team_id {
            query = query.filter(players::team_id.eq(team_id));
        }
        if filter.free_agents {
            query = query.filter(players::team_id.is_null());
        }
        if let Some(role) = filter.role {
            query = query.filter(players::role.eq(role));
        }
        query
    };

    let items: Vec<Player> = filtered()
        .order((players::rating.desc(), players::id.asc()))
        .offset(pagination.offset())
        .limit(pagination.page_size)
        .select(Player::as_select())
        .load(&mut conn)
        .await?;
    let total: i64 = filtered().count().get_result(&mut conn).await?;

    Ok(Json(Paged::new(items, total, &pagination)))
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct RoleFilter {
    role: Option<PlayerRole>,
}

/// Get player rankings, optionally for one role
///
/// Only players signed to a team are ranked.
#[utoipa::path(
    method(get),
    path = "/rankings",
    params(Pagination, RoleFilter),
    responses(
        (status = OK, description = "Success", body = Paged<Player>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn get_rankings(
    State(state): State<AppState>,
    ValidatedQuery(pagination): ValidatedQuery<Pagination>,
    Query(filter): Query<RoleFilter>,
) -> Result<Json<Paged<Player>>, RouteError> {
    use crate::schema::players;

    let mut conn = state.db.get().await?;

    let ranked = || {
        let mut query = players::table
            .filter(players::team_id.is_not_null())
            .into_boxed();
        if let Some(role) = filter.role {
            query = query.filter(players::role.eq(role));
        }
        query
    };

    let items: Vec<Player> = ranked()
        .order((players::rating.desc(), players::id.asc()))
        .offset(pagination.offset())
        .limit(pagination.page_size)
        .select(Player::as_select())
        .load(&mut conn)
        .await?;
    let total: i64 = ranked().count().get_result(&mut conn).await?;

    Ok(Json(Paged::new(items, total, &pagination)))
}

/// Create a player
#[utoipa::path(
    method(post),
    path = "",
    request_body = NewPlayer,
    responses(
        (status = OK, description = "Success", body = Player, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = CONFLICT, description = "Roster is full", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, player), fields(username = %player.username), err(Debug))]
async fn create_player(
    State(state): State<AppState>,
    claims: Claims,
    ValidatedJson(player): ValidatedJson<NewPlayer>,
) -> Result<Json<Player>, RouteError> {
    claims.require_moderator()?;
    let mut conn = state.db.get().await?;

    let player = player
        .create(&mut conn, state.config.tournament.roster_size)
        .await?;
    info!(player_id = player.id, "Player created");

    Ok(Json(player))
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
    #[serde(flatten)]
    player: Player,
    team: Option<Team>,
}

/// Get a player and their team
#[utoipa::path(
    method(get),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of player to get"),
    ),
    responses(
        (status = OK, description = "Success", body = PlayerResponse, content_type = "application/json"),
        (status = NOT_FOUND, description = "Player not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn get_player(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<PlayerResponse>, RouteError> {
    use crate::schema::teams;

    let mut conn = state.db.get().await?;

    let player = find_player(&mut conn, id).await?;
    let team = match player.team_id {
        Some(team_id) => teams::table
            .find(team_id)
            .select(Team::as_select())
            .first(&mut conn)
            .await
            .optional()?,
        None => None,
    };

    Ok(Json(PlayerResponse { player, team }))
}

/// Update a player
///
/// Send `teamId: null` to release the player from their team.
#[utoipa::path(
    method(patch),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of player to update"),
    ),
    request_body = PlayerChangeset,
    responses(
        (status = OK, description = "Success", body = Player, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Player not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = CONFLICT, description = "Roster is full", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, changes), err(Debug))]
async fn update_player(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
    ValidatedJson(changes): ValidatedJson<PlayerChangeset>,
) -> Result<Json<Player>, RouteError> {
    claims.require_moderator()?;
    let mut conn = state.db.get().await?;

    let player = find_player(&mut conn, id).await?;
    let player = player
        .update(&mut conn, &changes, state.config.tournament.roster_size)
        .await?;

    Ok(Json(player))
}

/// Delete a player
#[utoipa::path(
    method(delete),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of player to delete"),
    ),
    responses(
        (status = OK, description = "Success", content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Player not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), err(Debug))]
async fn delete_player(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
) -> Result<(), RouteError> {
    use crate::schema::players;

    claims.require_moderator()?;
    let mut conn = state.db.get().await?;

    let deleted = diesel::delete(players::table.find(id))
        .execute(&mut conn)
        .await?;
    if deleted == 0 {
        return Err(RouteError::new_not_found());
    }

    Ok(())
}

async fn find_player(conn: &mut AsyncPgConnection, id: i32) -> Result<Player, RouteError> {
    use crate::schema::players;

    Ok(players::table
        .find(id)
        .select(Player::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(RouteError::new_not_found)?)
}
