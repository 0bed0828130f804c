use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use tracing::{debug, instrument};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

use crate::{
    models::mentions::{self, Mention, MentionKind, ResolvedMention, SourceType},
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
        .routes(routes!(preview_mentions))
        .routes(routes!(sync_mentions))
        .routes(routes!(get_by_source))
        .routes(routes!(get_by_target))
}

#[derive(Deserialize, Validate, ToSchema)]
struct PreviewRequest {
    #[validate(length(max = 65536))]
    content: String,
}

/// Show which mentions a text contains and what they point at
#[utoipa::path(
    method(post),
    path = "/preview",
    request_body = PreviewRequest,
    responses(
        (status = OK, description = "Success", body = [ResolvedMention], content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn preview_mentions(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<PreviewRequest>,
) -> Result<Json<Vec<ResolvedMention>>, RouteError> {
    let mut conn = state.db.get().await?;

    Ok(Json(mentions::preview(&mut conn, &payload.content).await?))
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct SyncRequest {
    source_type: SourceType,
    source_id: i32,
    #[validate(length(max = 65536))]
    content: String,
}

/// Replace the stored mentions of a piece of content
///
/// Mentions that don't match a user, team or player are dropped.
#[utoipa::path(
    method(post),
    path = "/sync",
    request_body = SyncRequest,
    responses(
        (status = OK, description = "Success", body = [Mention], content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), fields(source_type = ?payload.source_type, source_id = payload.source_id, user = claims.sub), err(Debug))]
async fn sync_mentions(
    State(state): State<AppState>,
    claims: Claims,
    ValidatedJson(payload): ValidatedJson<SyncRequest>,
) -> Result<Json<Vec<Mention>>, RouteError> {
    let mut conn = state.db.get().await?;

    let stored = mentions::sync(
        &mut conn,
        payload.source_type,
        payload.source_id,
        &payload.content,
    )
    .await?;
    debug!(count = stored.len(), "Mentions synced");

    Ok(Json(stored))
}

/// Get the mentions stored for a piece of content
#[utoipa::path(
    method(get),
    path = "/source/{source_type}/{id}",
    params(
        ("source_type" = SourceType, Path, description = "Kind of content"),
        ("id" = i32, Path, description = "ID of the content"),
    ),
    responses(
        (status = OK, description = "Success", body = [Mention], content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn get_by_source(
    State(state): State<AppState>,
    Path((source_type, id)): Path<(SourceType, i32)>,
) -> Result<Json<Vec<Mention>>, RouteError> {
    let mut conn = state.db.get().await?;

    Ok(Json(mentions::for_source(&mut conn, source_type, id).await?))
}

/// Get where a user, team or player was mentioned, newest first
#[utoipa::path(
    method(get),
    path = "/target/{kind}/{id}",
    params(
        ("kind" = MentionKind, Path, description = "Kind of mentioned entity"),
        ("id" = i32, Path, description = "ID of the mentioned entity"),
        Pagination
    ),
    responses(
        (status = OK, description = "Success", body = Paged<Mention>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn get_by_target(
    State(state): State<AppState>,
    Path((kind, id)): Path<(MentionKind, i32)>,
    ValidatedQuery(pagination): ValidatedQuery<Pagination>,
) -> Result<Json<Paged<Mention>>, RouteError> {
    let mut conn = state.db.get().await?;

    let (items, total) =
        mentions::for_target(&mut conn, kind, id, pagination.page, pagination.page_size).await?;

    Ok(Json(Paged::new(items, total, &pagination)))
}
