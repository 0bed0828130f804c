pub mod brackets;
pub mod maps;
pub mod matches;
pub mod mentions;
pub mod players;
pub mod rating_history;
pub mod teams;
pub mod users;

use axum::http::StatusCode;
use thiserror::Error;

/// Rule violations raised by the model layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("team {team_id} already has the maximum of {limit} players")]
    RosterFull { team_id: i32, limit: i64 },
    #[error("a team can't play against itself")]
    SameTeam,
    #[error("match {0} is already completed or cancelled")]
    MatchClosed(i32),
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("this account is banned")]
    Banned,
}

impl ModelError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::RosterFull { .. } | Self::MatchClosed(_) => StatusCode::CONFLICT,
            Self::SameTeam => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Banned => StatusCode::FORBIDDEN,
        }
    }
}
