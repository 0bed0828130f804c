use axum::{extract::State, Json, Router};
use serde::Serialize;
use utoipa::{
    openapi::{
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
        OpenApi,
    },
    Modify, OpenApi as OpenApiTrait, ToSchema,
};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::{util::errors::RouteError, AppState};

mod auth;
mod brackets;
mod live;
mod matches;
mod mentions;
mod players;
mod teams;
mod users;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "token_jwt",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApiTrait)]
#[openapi(
    info(title = "MRVL Arena API"),
    servers((url = "/api")),
    modifiers(&BearerAuth),
    security(
        (),
        ("token_jwt" = [])
    )
)]
pub struct ApiDoc;

pub fn routes() -> (Router<AppState>, OpenApi) {
    OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(routes!(health_check))
        .nest("/auth", auth::routes())
        .nest("/teams", teams::routes())
        .nest("/players", players::routes())
        .nest("/matches", matches::routes())
        .nest("/brackets", brackets::routes())
        .nest("/live", live::routes())
        .nest("/mentions", mentions::routes())
        .nest("/users", users::routes())
        .split_for_parts()
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct HealthCheck {
    status: &'static str,
    database: &'static str,
}

/// Get health of the API.
#[utoipa::path(
    method(get),
    path = "/healthCheck",
    responses(
        (status = OK, description = "Success", body = HealthCheck, content_type = "application/json")
    )
)]
async fn health_check(State(state): State<AppState>) -> Result<Json<HealthCheck>, RouteError> {
    let database = if state.db.get().await.is_ok() {
        "ok"
    } else {
        "unreachable"
    };

    Ok(Json(HealthCheck {
        status: "ok",
        database,
    }))
}
