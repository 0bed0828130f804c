use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use diesel::{
    deserialize::FromSqlRow, expression::AsExpression, prelude::*, sql_types::SmallInt,
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use super::ModelError;
use crate::{schema::users, util::sql_enum::smallint_enum};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    ToSchema,
    TryFromPrimitive,
    AsExpression,
    FromSqlRow,
)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum UserRole {
    User = 0,
    Moderator = 1,
    Admin = 2,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    TryFromPrimitive,
    AsExpression,
    FromSqlRow,
)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum UserStatus {
    Active = 0,
    Banned = 1,
}

smallint_enum!(UserRole, UserStatus);

impl UserRole {
    /// Moderators and admins manage tournament data.
    #[must_use]
    pub fn can_moderate(self) -> bool {
        self >= Self::Moderator
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, Serialize, ToSchema)]
#[diesel(table_name = users, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    #[schema(ignore)]
    pub password_hash: String,
    pub role: UserRole,
    pub status: UserStatus,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub created_at: OffsetDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: String,
    pub role: UserRole,
}

/// Hashes a password with Argon2id and a random salt.
///
/// # Errors
/// Fails if hashing fails, which only happens with unusable Argon2 parameters.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("Failed to hash password: {e}"))
}

impl<'a> NewUser<'a> {
    /// Prepares a user with a freshly hashed password.
    ///
    /// # Errors
    /// Fails if the password can't be hashed.
    pub fn new(
        username: &'a str,
        email: &'a str,
        password: &str,
        role: UserRole,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            username,
            email,
            password_hash: hash_password(password)?,
            role,
        })
    }

    /// Inserts the user.
    ///
    /// # Errors
    /// Fails on a taken username or e-mail, or if the query fails.
    pub async fn create(&self, conn: &mut AsyncPgConnection) -> QueryResult<User> {
        diesel::insert_into(users::table)
            .values(self)
            .returning(User::as_returning())
            .get_result(conn)
            .await
    }
}

impl User {
    #[must_use]
    pub fn verify_password(&self, password: &str) -> bool {
        PasswordHash::new(&self.password_hash).is_ok_and(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
    }

    /// Looks a user up by username or e-mail and checks their password.
    ///
    /// # Errors
    /// Fails with [`ModelError::InvalidCredentials`] for unknown users and wrong
    /// passwords, and with [`ModelError::Banned`] for banned accounts.
    pub async fn authenticate(
        conn: &mut AsyncPgConnection,
        login: &str,
        password: &str,
    ) -> anyhow::Result<Self> {
        let user = users::table
            .filter(users::username.eq(login).or(users::email.eq(login)))
            .select(Self::as_select())
            .first(conn)
            .await
            .optional()?
            .ok_or(ModelError::InvalidCredentials)?;

        if !user.verify_password(password) {
            return Err(ModelError::InvalidCredentials.into());
        }
        if !user.is_active() {
            return Err(ModelError::Banned.into());
        }
        Ok(user)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// Admin-only changes to an account.
#[derive(AsChangeset, Deserialize, ToSchema, Default)]
#[diesel(table_name = users)]
#[serde(rename_all = "camelCase")]
pub struct UserChangeset {
    pub role: Option<UserRole>,
    pub status: Option<UserStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(password: &str) -> User {
        User {
            id: 1,
            username: "scorer".to_owned(),
            email: "scorer@mrvl.gg".to_owned(),
            password_hash: hash_password(password).unwrap(),
            role: UserRole::Moderator,
            status: UserStatus::Active,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn password_round_trip() {
        let user = user("hunter22");
        assert!(user.password_hash.starts_with("$argon2"));
        assert!(user.verify_password("hunter22"));
        assert!(!user.verify_password("hunter23"));
    }

    #[test]
    fn roles_are_ordered() {
        assert!(UserRole::Admin.can_moderate());
        assert!(UserRole::Moderator.can_moderate());
        assert!(!UserRole::User.can_moderate());
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let json = serde_json::to_value(user("secret-pass")).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["role"], "moderator");
    }
}
