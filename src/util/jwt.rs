use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    RequestPartsExt,
};
use axum_extra::{
    extract::CookieJar,
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;

use super::errors::{IntoRouteError, RouteError};
use crate::{
    models::users::{User, UserRole, UserStatus},
    AppState,
};

#[derive(Clone)]
pub struct Keys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
}

impl Keys {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthBody {
    access_token: String,
    token_type: String,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    expires_at: OffsetDateTime,
}

impl AuthBody {
    pub fn new(access_token: String, expires_at: OffsetDateTime) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_at,
        }
    }
}

/// Identity carried by a bearer token.
///
/// Extracting it also loads the account, so banned users and demoted roles take
/// effect before the token expires.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: i32,
    pub username: String,
    pub role: UserRole,
    pub exp: i64,
}

impl Claims {
    #[must_use]
    pub fn for_user(user: &User, lifetime: Duration) -> (Self, OffsetDateTime) {
        let expires_at = OffsetDateTime::now_utc() + lifetime;
        (
            Self {
                sub: user.id,
                username: user.username.clone(),
                role: user.role,
                exp: expires_at.unix_timestamp(),
            },
            expires_at,
        )
    }

    /// Signs a token for `user`.
    ///
    /// # Errors
    /// Fails if encoding fails.
    pub fn issue(user: &User, lifetime: Duration, keys: &Keys) -> anyhow::Result<AuthBody> {
        let (claims, expires_at) = Self::for_user(user, lifetime);
        let token = encode(&Header::default(), &claims, &keys.encoding)?;
        Ok(AuthBody::new(token, expires_at))
    }

    /// # Errors
    /// Fails with 403 unless the user is a moderator or admin.
    pub fn require_moderator(&self) -> Result<(), RouteError> {
        if self.role.can_moderate() {
            Ok(())
        } else {
            Err(RouteError::new_forbidden()
                .set_public_error_message("Moderator permissions required"))
        }
    }

    /// # Errors
    /// Fails with 403 unless the user is an admin.
    pub fn require_admin(&self) -> Result<(), RouteError> {
        if self.role == UserRole::Admin {
            Ok(())
        } else {
            Err(RouteError::new_forbidden().set_public_error_message("Admin permissions required"))
        }
    }
}

impl<S> FromRequestParts<S> for Claims
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = RouteError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        use crate::schema::users;

        let state = AppState::from_ref(state);

        // Extract the token from the authorization header, if it's not there, try the cookie
        let token = match parts.extract::<TypedHeader<Authorization<Bearer>>>().await {
            Ok(bearer) => bearer.token().to_owned(),
            Err(_) => {
                let jar = parts
                    .extract::<CookieJar>()
                    .await
                    .http_status_error(StatusCode::UNAUTHORIZED)?;

                jar.get("authorization")
                    .map(|cookie| cookie.value().trim_start_matches("Bearer ").to_owned())
                    .ok_or_else(|| anyhow::anyhow!("No token found"))
                    .http_error("No token found", StatusCode::UNAUTHORIZED)?
            }
        };

        let mut claims = decode::<Self>(&token, &state.jwt_keys.decoding, &Validation::default())
            .http_error("Invalid token", StatusCode::UNAUTHORIZED)?
            .claims;

        let mut conn = state.db.get().await?;
        let (role, status): (UserRole, UserStatus) = users::table
            .find(claims.sub)
            .select((users::role, users::status))
            .first(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| {
                RouteError::new_unauthorized().set_public_error_message("Account no longer exists")
            })?;
        if status == UserStatus::Banned {
            return Err(RouteError::new_forbidden().set_public_error_message("This account is banned"));
        }
        claims.role = role;

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: UserRole) -> User {
        User {
            id: 12,
            username: "caster".to_owned(),
            email: "caster@mrvl.gg".to_owned(),
            password_hash: String::new(),
            role,
            status: UserStatus::Active,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn issued_tokens_decode_with_the_same_secret() {
        let keys = Keys::new(b"test-secret");
        let body = Claims::issue(&user(UserRole::Moderator), Duration::hours(1), &keys).unwrap();
        let claims = decode::<Claims>(&body.access_token, &keys.decoding, &Validation::default())
            .unwrap()
            .claims;
        assert_eq!(claims.sub, 12);
        assert_eq!(claims.role, UserRole::Moderator);

        let other = Keys::new(b"another-secret");
        assert!(decode::<Claims>(&body.access_token, &other.decoding, &Validation::default()).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let keys = Keys::new(b"test-secret");
        let body = Claims::issue(&user(UserRole::User), Duration::hours(-2), &keys).unwrap();
        assert!(decode::<Claims>(&body.access_token, &keys.decoding, &Validation::default()).is_err());
    }

    #[test]
    fn role_guards() {
        let (moderator, _) = Claims::for_user(&user(UserRole::Moderator), Duration::hours(1));
        assert!(moderator.require_moderator().is_ok());
        assert_eq!(
            moderator.require_admin().unwrap_err().status(),
            StatusCode::FORBIDDEN
        );
        let (admin, _) = Claims::for_user(&user(UserRole::Admin), Duration::hours(1));
        assert!(admin.require_admin().is_ok());
    }
}
