use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, Query, Request,
    },
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

use super::errors::RouteError;

fn rejected(kind: &str, errors: &ValidationErrors) -> RouteError {
    let message = format!("{kind} validation error: [{errors}]").replace('\n', ", ");
    RouteError::new_bad_request().set_public_error_message(&message)
}

/// JSON body that has passed its `validator` rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = RouteError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            RouteError::new_bad_request()
                .set_public_error_message(&e.body_text())
                .set_source(e.into())
        })?;
        value.validate().map_err(|e| rejected("Body", &e))?;
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
{
    type Rejection = RouteError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| {
                RouteError::new_bad_request()
                    .set_public_error_message(&e.body_text())
                    .set_source(e.into())
            })?;
        value.validate().map_err(|e| rejected("Query", &e))?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, Validate)]
    struct Body {
        #[validate(length(min = 3))]
        name: String,
    }

    #[tokio::test]
    async fn invalid_bodies_are_bad_requests() {
        let req = Request::builder()
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"name": "ab"}"#))
            .unwrap();
        let err = ValidatedJson::<Body>::from_request(req, &()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.public_message().unwrap().starts_with("Body validation error"));
    }

    #[tokio::test]
    async fn valid_bodies_pass_through() {
        let req = Request::builder()
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"name": "Luna"}"#))
            .unwrap();
        let ValidatedJson(body) = ValidatedJson::<Body>::from_request(req, &()).await.unwrap();
        assert_eq!(body.name, "Luna");
    }

    #[tokio::test]
    async fn malformed_json_keeps_axum_message() {
        let req = Request::builder()
            .header("content-type", "application/json")
            .body(axum::body::Body::from("{"))
            .unwrap();
        let err = ValidatedJson::<Body>::from_request(req, &()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
