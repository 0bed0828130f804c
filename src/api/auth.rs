use axum::{extract::State, Json};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use time::Duration;
use tracing::{info, instrument};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

use crate::{
    models::users::{NewUser, User, UserRole},
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        jwt::{AuthBody, Claims},
        validator::ValidatedJson,
    },
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(register))
        .routes(routes!(login))
        .routes(routes!(get_self))
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    #[validate(length(min = 3, max = 32))]
    username: String,
    #[validate(email)]
    email: String,
    #[validate(length(min = 8, max = 128))]
    password: String,
}

/// Create an account
#[utoipa::path(
    method(post),
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = OK, description = "Success", body = AuthBody, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = CONFLICT, description = "Username or e-mail taken", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip_all, fields(username = %payload.username), err(Debug))]
async fn register(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RegisterRequest>,
) -> Result<Json<AuthBody>, RouteError> {
    let mut conn = state.db.get().await?;

    let user = NewUser::new(
        &payload.username,
        &payload.email,
        &payload.password,
        UserRole::User,
    )?
    .create(&mut conn)
    .await?;
    info!(user_id = user.id, "Account registered");

    Ok(Json(Claims::issue(
        &user,
        Duration::hours(state.config.auth.token_hours),
        &state.jwt_keys,
    )?))
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    /// Username or e-mail
    #[validate(length(min = 1))]
    login: String,
    #[validate(length(min = 1))]
    password: String,
}

/// Log in and receive a bearer token
#[utoipa::path(
    method(post),
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = OK, description = "Success", body = AuthBody, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Wrong credentials", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Account banned", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn login(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<LoginRequest>,
) -> Result<Json<AuthBody>, RouteError> {
    let mut conn = state.db.get().await?;

    let user = User::authenticate(&mut conn, &payload.login, &payload.password).await?;

    Ok(Json(Claims::issue(
        &user,
        Duration::hours(state.config.auth.token_hours),
        &state.jwt_keys,
    )?))
}

/// Get own account
#[utoipa::path(
    method(get),
    path = "/self",
    responses(
        (status = OK, description = "Success", body = User, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
async fn get_self(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<User>, RouteError> {
    use crate::schema::users;

    let mut conn = state.db.get().await?;

    let user: User = users::table
        .find(claims.sub)
        .select(User::as_select())
        .first(&mut conn)
        .await?;

    Ok(Json(user))
}
