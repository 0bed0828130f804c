use axum::{
    extract::{Path, State},
    Json,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use tracing::{info, instrument};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::{
    models::users::{User, UserChangeset},
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        jwt::Claims,
        query::{Paged, Pagination},
        validator::ValidatedQuery,
    },
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_users))
        .routes(routes!(update_user))
}

/// List accounts
#[utoipa::path(
    method(get),
    path = "",
    params(Pagination),
    responses(
        (status = OK, description = "Success", body = Paged<User>, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not an admin", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
async fn list_users(
    State(state): State<AppState>,
    claims: Claims,
    ValidatedQuery(pagination): ValidatedQuery<Pagination>,
) -> Result<Json<Paged<User>>, RouteError> {
    use crate::schema::users;

    claims.require_admin()?;
    let mut conn = state.db.get().await?;

    let items: Vec<User> = users::table
        .order(users::id.asc())
        .offset(pagination.offset())
        .limit(pagination.page_size)
        .select(User::as_select())
        .load(&mut conn)
        .await?;
    let total: i64 = users::table.count().get_result(&mut conn).await?;

    Ok(Json(Paged::new(items, total, &pagination)))
}

/// Change the role or status of an account
#[utoipa::path(
    method(patch),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of the user"),
    ),
    request_body = UserChangeset,
    responses(
        (status = OK, description = "Success", body = User, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Can't change own account", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not an admin", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "User not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, changes), fields(admin = claims.sub), err(Debug))]
async fn update_user(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
    Json(changes): Json<UserChangeset>,
) -> Result<Json<User>, RouteError> {
    use crate::schema::users;

    claims.require_admin()?;
    if id == claims.sub {
        return Err(RouteError::new_bad_request()
            .set_public_error_message("Admins can't change their own role or status"));
    }
    let mut conn = state.db.get().await?;

    let user: User = if changes.role.is_none() && changes.status.is_none() {
        users::table
            .find(id)
            .select(User::as_select())
            .first(&mut conn)
            .await?
    } else {
        diesel::update(users::table.find(id))
            .set(&changes)
            .returning(User::as_returning())
            .get_result(&mut conn)
            .await?
    };
    info!(user_id = user.id, role = ?user.role, status = ?user.status, "Account updated");

    Ok(Json(user))
}
