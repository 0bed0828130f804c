#![warn(
    clippy::correctness,
    clippy::style,
    clippy::perf,
    clippy::complexity,
    clippy::cognitive_complexity,
    clippy::double_parens,
    clippy::len_zero,
    clippy::question_mark,
    clippy::suspicious,
    clippy::todo
)]

mod api;
pub mod bracket;
pub mod live;
mod manager;
pub mod models;
pub mod schema;
mod util;

use std::{io::stdout, sync::Arc};

use anyhow::Context;
use axum::Router;
use clap::Parser;
use diesel::pg::Pg;
use diesel_async::{
    async_connection_wrapper::AsyncConnectionWrapper,
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager},
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use fred::{clients::Pool as RedisPool, prelude::*, types::config::Config as RedisConfig};
use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::writer::MakeWriterExt, layer::SubscriberExt, util::SubscriberInitExt,
};
use utoipa_scalar::{Scalar, Servable};

use crate::util::jwt::Keys;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

#[derive(Deserialize, Clone)]
pub struct Config {
    main: Main,
    auth: Auth,
    #[serde(default)]
    live: Live,
    #[serde(default)]
    tournament: Tournament,
}

#[derive(Deserialize, Clone)]
pub struct Main {
    address: String,
    database: String,
    redis: String,
}

#[serde_inline_default]
#[derive(Deserialize, Clone)]
pub struct Auth {
    jwt_secret: String,
    #[serde_inline_default(24 * 7)]
    token_hours: i64,
}

#[serde_inline_default]
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Live {
    #[serde_inline_default(60 * 60 * 6)]
    snapshot_ttl_secs: i64,
    /// Events kept per match for pollers to catch up from.
    #[serde_inline_default(200)]
    backlog: usize,
    /// How long a writer waits for the match lock.
    #[serde_inline_default(2000)]
    lock_timeout_ms: u64,
    /// How long a taken lock lives. Has to outlast the slowest update,
    /// completion included.
    #[serde_inline_default(30_000)]
    lock_ttl_ms: u64,
}

#[serde_inline_default]
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Tournament {
    #[serde_inline_default(6)]
    roster_size: i64,
    #[serde_inline_default(1000)]
    default_rating: i32,
    #[serde_inline_default(32.0)]
    elo_k_factor: f64,
}

impl Default for Live {
    fn default() -> Self {
        Self {
            snapshot_ttl_secs: 60 * 60 * 6,
            backlog: 200,
            lock_timeout_ms: 2000,
            lock_ttl_ms: 30_000,
        }
    }
}

impl Default for Tournament {
    fn default() -> Self {
        Self {
            roster_size: 6,
            default_rating: 1000,
            elo_k_factor: 32.0,
        }
    }
}

fn load_config(figment: Figment) -> anyhow::Result<Config> {
    figment
        .merge(Env::prefixed("MRVL_").split("__"))
        .extract()
        .context("Config should be valid!")
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    db: Pool<diesel_async::AsyncPgConnection>,
    redis: Arc<RedisPool>,
    jwt_keys: Keys,
}

fn run_migrations(
    connection: &mut impl MigrationHarness<Pg>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    connection.run_pending_migrations(MIGRATIONS)?;

    Ok(())
}

/// Reads the config and connects to Postgres and Redis.
///
/// # Returns
/// An `AppState` struct with all the necessary members
///
/// # Errors
/// This function can fail if migrations fail or the connection to Postgres or Redis fails
async fn init_state(config: Config) -> anyhow::Result<AppState> {
    let diesel_manager =
        AsyncDieselConnectionManager::<diesel_async::AsyncPgConnection>::new(&config.main.database);
    let pool = Pool::builder(diesel_manager)
        .build()
        .context("Failed to build DB pool!")?;

    let pg_url = config.main.database.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        use diesel::prelude::Connection;
        use diesel_async::pg::AsyncPgConnection;
        let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&pg_url)
            .context("Failed to establish DB connection for migrations!")?;

        run_migrations(&mut conn).map_err(|e| anyhow::anyhow!("Failed to run migrations: {e}"))
    })
    .await??;

    let redis_cfg = RedisConfig::from_url(&config.main.redis)?;
    let redis_builder = Builder::from_config(redis_cfg);

    let redis_pool = redis_builder
        .build_pool(3)
        .context("Failed to build Redis pool!")?;

    redis_pool
        .init()
        .await
        .context("Clients failed to connect to Redis!")?;

    Ok(AppState {
        jwt_keys: Keys::new(config.auth.jwt_secret.as_bytes()),
        db: pool,
        redis: Arc::new(redis_pool),
        config: Arc::new(config),
    })
}

fn make_router(state: AppState) -> Router {
    let (api_router, openapi) = api::routes();

    Router::new()
        .nest("/api", api_router)
        .merge(Scalar::with_url("/api/docs", openapi))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn main() -> anyhow::Result<()> {
    let config = load_config(Figment::new().merge(Toml::file("Mrvl.toml")))?;

    let file_appender = RollingFileAppender::builder()
        .filename_suffix("mrvl-arena.log")
        .rotation(Rotation::DAILY)
        .build("./logs")
        .context("Initializing logging failed")?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // axum logs rejections from built-in extractors with the `axum::rejection`
                // target, at `TRACE` level. `axum::rejection=trace` enables showing those events
                "mrvl_arena=info,tower_http=error,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(stdout.and(non_blocking)))
        .init();

    debug!("Start init");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            let state = init_state(config).await?;

            // Parse CLI arguments
            // and if we have a management command, don't spin up a server
            let args = manager::Args::parse();
            if let Some(command) = &args.command {
                return manager::parse_command(command, state).await;
            }

            info!("MRVL arena starting...");

            let listener = tokio::net::TcpListener::bind(&state.config.main.address)
                .await
                .context("Listener should always be able to listen!")?;
            info!("Listening on {}", &state.config.main.address);

            let app = make_router(state);

            axum::serve(listener, app.into_make_service())
                .await
                .context("Server should be able to... well, serve!")
        })
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use figment::Jail;
    use tower::ServiceExt;

    use super::*;

    const MINIMAL: &str = r#"
        [main]
        address = "127.0.0.1:8080"
        database = "postgres://localhost/mrvl"
        redis = "redis://localhost"

        [auth]
        jwt_secret = "changeme"
    "#;

    #[test]
    fn optional_sections_fall_back_to_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("Mrvl.toml", MINIMAL)?;
            let config = load_config(Figment::new().merge(Toml::file("Mrvl.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.auth.token_hours, 168);
            assert_eq!(config.live, Live::default());
            assert!(config.live.lock_ttl_ms > config.live.lock_timeout_ms);
            assert_eq!(config.tournament, Tournament::default());
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_nested_keys() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "Mrvl.toml",
                &format!("{MINIMAL}\n[tournament]\nroster_size = 8\n"),
            )?;
            jail.set_env("MRVL_TOURNAMENT__ELO_K_FACTOR", "24.0");
            jail.set_env("MRVL_LIVE__BACKLOG", "50");
            jail.set_env("MRVL_LIVE__LOCK_TTL_MS", "60000");
            let config = load_config(Figment::new().merge(Toml::file("Mrvl.toml")))
                .map_err(|e| e.to_string())?;
            assert_eq!(config.tournament.roster_size, 8);
            assert_eq!(config.tournament.default_rating, 1000);
            assert!((config.tournament.elo_k_factor - 24.0).abs() < f64::EPSILON);
            assert_eq!(config.live.backlog, 50);
            assert_eq!(config.live.lock_ttl_ms, 60_000);
            Ok(())
        });
    }

    /// State whose pools are built but never connected.
    fn offline_state() -> AppState {
        let config: Config = Figment::from(Toml::string(MINIMAL)).extract().unwrap();
        let manager = AsyncDieselConnectionManager::<diesel_async::AsyncPgConnection>::new(
            &config.main.database,
        );
        let redis = Builder::from_config(RedisConfig::from_url(&config.main.redis).unwrap())
            .build_pool(1)
            .unwrap();
        AppState {
            jwt_keys: Keys::new(config.auth.jwt_secret.as_bytes()),
            db: Pool::builder(manager).build().unwrap(),
            redis: Arc::new(redis),
            config: Arc::new(config),
        }
    }

    async fn status_of(request: Request<Body>) -> StatusCode {
        make_router(offline_state())
            .oneshot(request)
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn writes_need_a_token() {
        let request = Request::post("/api/teams")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"Sentinels","shortName":"SEN","region":"NA"}"#))
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::UNAUTHORIZED);

        let request = Request::post("/api/live/4")
            .header("authorization", "Bearer not-a-jwt")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"type":"status-update","data":{"status":"live"}}"#))
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn oversized_pages_are_rejected() {
        let request = Request::get("/api/teams?pageSize=500")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn teams_are_not_predicted_against_themselves() {
        let request = Request::get("/api/teams/3/predict/3")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let request = Request::get("/api/heroes/1").body(Body::empty()).unwrap();
        assert_eq!(status_of(request).await, StatusCode::NOT_FOUND);
    }
}
