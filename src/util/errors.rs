use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Serialize;
use tracing::{debug, error};
use utoipa::ToSchema;

use crate::{
    bracket::{series::SeriesError, BracketError},
    live::LiveError,
    models::ModelError,
};

/// Body of every error response.
#[derive(Serialize, ToSchema)]
pub struct SimpleRouteErrorOutput {
    error: String,
}

/// Error returned by route handlers.
///
/// Carries the status, an optional message safe to show to clients and the
/// underlying error, which is only ever logged.
#[derive(Debug)]
pub struct RouteError {
    status: StatusCode,
    public_message: Option<String>,
    source: Option<anyhow::Error>,
}

impl RouteError {
    #[must_use]
    pub const fn new(status: StatusCode) -> Self {
        Self {
            status,
            public_message: None,
            source: None,
        }
    }

    #[must_use]
    pub const fn new_bad_request() -> Self {
        Self::new(StatusCode::BAD_REQUEST)
    }

    #[must_use]
    pub const fn new_unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED)
    }

    #[must_use]
    pub const fn new_forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN)
    }

    #[must_use]
    pub const fn new_not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    #[must_use]
    pub fn set_public_error_message(mut self, message: &str) -> Self {
        self.public_message = Some(message.to_owned());
        self
    }

    #[must_use]
    pub fn set_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn public_message(&self) -> Option<&str> {
        self.public_message.as_deref()
    }

    /// Picks a status for errors the client can do something about.
    fn classify(err: anyhow::Error) -> Self {
        let (status, message) = if let Some(db_err) = err.downcast_ref::<DieselError>() {
            match db_err {
                DieselError::NotFound => (StatusCode::NOT_FOUND, None),
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => (
                    StatusCode::CONFLICT,
                    Some("A record with these values already exists".to_owned()),
                ),
                DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => (
                    StatusCode::BAD_REQUEST,
                    Some("Referenced record does not exist".to_owned()),
                ),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, None),
            }
        } else if let Some(bracket_err) = err.downcast_ref::<BracketError>() {
            let status = match bracket_err {
                BracketError::UnknownMatch(_) => StatusCode::NOT_FOUND,
                BracketError::NotReady(_)
                | BracketError::AlreadyDecided(_)
                | BracketError::RoundInProgress
                | BracketError::NoRoundsLeft(_) => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, Some(bracket_err.to_string()))
        } else if let Some(series_err) = err.downcast_ref::<SeriesError>() {
            (StatusCode::BAD_REQUEST, Some(series_err.to_string()))
        } else if let Some(live_err) = err.downcast_ref::<LiveError>() {
            let status = match live_err {
                LiveError::AlreadyCompleted
                | LiveError::SeriesDecided
                | LiveError::NotLive
                | LiveError::Busy => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, Some(live_err.to_string()))
        } else if let Some(model_err) = err.downcast_ref::<ModelError>() {
            (model_err.status(), Some(model_err.to_string()))
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, None)
        };

        Self {
            status,
            public_message: message,
            source: Some(err),
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, source = ?self.source, "Request failed");
        } else if let Some(source) = &self.source {
            debug!(status = %self.status, "Request rejected: {source:#}");
        }

        let error = self.public_message.unwrap_or_else(|| {
            self.status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_owned()
        });
        (self.status, Json(SimpleRouteErrorOutput { error })).into_response()
    }
}

impl<E> From<E> for RouteError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::classify(err.into())
    }
}

pub trait IntoRouteError<T> {
    /// Replaces the error with one carrying `status` and a public message.
    ///
    /// # Errors
    /// Returns the mapped error if `self` is an error.
    fn http_error(self, message: &str, status: StatusCode) -> Result<T, RouteError>;

    /// Replaces the error with one carrying `status` and the default message.
    ///
    /// # Errors
    /// Returns the mapped error if `self` is an error.
    fn http_status_error(self, status: StatusCode) -> Result<T, RouteError>;
}

impl<T, E> IntoRouteError<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn http_error(self, message: &str, status: StatusCode) -> Result<T, RouteError> {
        self.map_err(|e| {
            RouteError::new(status)
                .set_public_error_message(message)
                .set_source(e.into())
        })
    }

    fn http_status_error(self, status: StatusCode) -> Result<T, RouteError> {
        self.map_err(|e| RouteError::new(status).set_source(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diesel_not_found_is_404() {
        let err = RouteError::from(DieselError::NotFound);
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.public_message(), None);
    }

    #[test]
    fn bracket_errors_keep_their_message() {
        let err = RouteError::from(BracketError::NotReady("UB_R2_M1".to_owned()));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(
            err.public_message(),
            Some("bracket match UB_R2_M1 is not ready to be played")
        );
        let err = RouteError::from(BracketError::TooFewTeams(2));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn wrapped_domain_errors_are_still_found() {
        use anyhow::Context;
        let err: anyhow::Result<()> = Err(LiveError::Busy).context("publishing update");
        let err = RouteError::from(err.unwrap_err());
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn unknown_errors_are_internal() {
        let err = RouteError::from(anyhow::anyhow!("connection reset"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), None);
    }

    #[test]
    fn http_error_sets_message() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("nope"));
        let err = result
            .http_error("Invalid token", StatusCode::UNAUTHORIZED)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.public_message(), Some("Invalid token"));
    }
}
