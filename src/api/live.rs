use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::{
    live::{feed::LiveFeed, LiveEvent, LiveMatchState, LiveStatus, LiveUpdate},
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        jwt::Claims,
    },
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(poll_match, push_update))
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct PollParams {
    /// Last version the client has seen
    since: Option<u64>,
}

/// Answer to a viewer poll.
///
/// `state` is only sent when the client can't catch up from `events`, either on
/// its first poll or after falling too far behind.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct LivePoll {
    match_id: i32,
    version: u64,
    status: LiveStatus,
    team1_score: i32,
    team2_score: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<LiveMatchState>,
    events: Vec<LiveEvent>,
}

impl LivePoll {
    fn new(state: LiveMatchState, since: Option<u64>) -> Self {
        let events: Option<Vec<LiveEvent>> = match since {
            // A cursor ahead of us means the snapshot expired and versions restarted.
            Some(since) if since <= state.version => state
                .events_since(since)
                .map(|events| events.into_iter().cloned().collect()),
            _ => None,
        };

        let mut poll = Self {
            match_id: state.match_id,
            version: state.version,
            status: state.status,
            team1_score: state.team1_score,
            team2_score: state.team2_score,
            state: None,
            events: Vec::new(),
        };
        match events {
            Some(events) => poll.events = events,
            None => poll.state = Some(state),
        }
        poll
    }
}

/// Poll the live state of a match
#[utoipa::path(
    method(get),
    path = "/{match_id}",
    params(
        ("match_id" = i32, Path, description = "ID of the match"),
        PollParams
    ),
    responses(
        (status = OK, description = "Success", body = LivePoll, content_type = "application/json"),
        (status = NOT_FOUND, description = "Match not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
async fn poll_match(
    State(state): State<AppState>,
    Path(match_id): Path<i32>,
    Query(params): Query<PollParams>,
) -> Result<Json<LivePoll>, RouteError> {
    let mut conn = state.db.get().await?;

    let feed = LiveFeed::new(&state.redis, &state.config.live);
    let live = feed.state(&mut conn, match_id).await?;

    Ok(Json(LivePoll::new(live, params.since)))
}

/// Push a live scoring update
///
/// A `status-update` to `completed` completes the match like `POST /matches/{id}/complete`.
#[utoipa::path(
    method(post),
    path = "/{match_id}",
    params(
        ("match_id" = i32, Path, description = "ID of the match"),
    ),
    request_body = LiveUpdate,
    responses(
        (status = OK, description = "Success", body = LiveMatchState, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Update rejected", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Match not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = CONFLICT, description = "Match closed or busy", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, update), err(Debug))]
async fn push_update(
    State(state): State<AppState>,
    claims: Claims,
    Path(match_id): Path<i32>,
    Json(update): Json<LiveUpdate>,
) -> Result<Json<LiveMatchState>, RouteError> {
    claims.require_moderator()?;
    let mut conn = state.db.get().await?;

    let feed = LiveFeed::new(&state.redis, &state.config.live);
    let live = feed
        .publish(
            &mut conn,
            match_id,
            update,
            state.config.tournament.elo_k_factor,
        )
        .await?;

    Ok(Json(live))
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::{
        bracket::{series::MapStatus, BestOf},
        live::ScoreUpdate,
    };

    fn scored(updates: usize, backlog: usize) -> LiveMatchState {
        let mut state = LiveMatchState::from_match(
            3,
            BestOf::FIVE,
            LiveStatus::Upcoming,
            Vec::new(),
            OffsetDateTime::UNIX_EPOCH,
        );
        for points in 0..updates {
            let update = LiveUpdate::ScoreUpdate(ScoreUpdate {
                map: 1,
                team1_score: i32::try_from(points).unwrap(),
                team2_score: 0,
                map_status: Some(MapStatus::Live),
            });
            state
                .apply(update, backlog, OffsetDateTime::UNIX_EPOCH)
                .unwrap();
        }
        state
    }

    #[test]
    fn first_poll_gets_the_whole_state() {
        let poll = LivePoll::new(scored(3, 10), None);
        assert_eq!(poll.version, 3);
        assert!(poll.state.is_some());
        assert!(poll.events.is_empty());
    }

    #[test]
    fn caught_up_clients_get_only_new_events() {
        let poll = LivePoll::new(scored(5, 10), Some(3));
        assert!(poll.state.is_none());
        let versions: Vec<u64> = poll.events.iter().map(|e| e.version).collect();
        assert_eq!(versions, [4, 5]);

        let poll = LivePoll::new(scored(5, 10), Some(5));
        assert!(poll.state.is_none());
        assert!(poll.events.is_empty());
        assert_eq!(poll.status, LiveStatus::Live);
    }

    #[test]
    fn lagging_or_stale_cursors_get_the_whole_state() {
        // Only the last two events are kept.
        let poll = LivePoll::new(scored(6, 2), Some(1));
        assert!(poll.state.is_some());

        let poll = LivePoll::new(scored(2, 10), Some(9));
        assert!(poll.state.is_some());
        assert_eq!(poll.version, 2);
    }
}
