use diesel::{
    deserialize::FromSqlRow, expression::AsExpression, prelude::*, sql_types::SmallInt,
};
use diesel_async::{scoped_futures::ScopedFutureExt, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use super::{teams::Team, users::UserStatus};
use crate::{
    schema::{mentions, players, users},
    util::{
        mentions::{extract, ExtractedMention},
        sql_enum::smallint_enum,
    },
};

/// Width of `mentions.mention_text`.
const MAX_MENTION_TEXT: usize = 64;

diesel::define_sql_function!(fn lower(x: diesel::sql_types::Text) -> diesel::sql_types::Text);

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
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
pub enum MentionKind {
    User = 0,
    Team = 1,
    Player = 2,
}

/// Kind of content a mention was written in.
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
pub enum SourceType {
    News = 0,
    NewsComment = 1,
    ForumThread = 2,
    ForumPost = 3,
    Match = 4,
    MatchComment = 5,
}

smallint_enum!(MentionKind, SourceType);

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, Serialize, ToSchema)]
#[diesel(table_name = mentions, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    pub id: i32,
    pub source_type: SourceType,
    pub source_id: i32,
    pub mentioned_type: MentionKind,
    pub mentioned_id: i32,
    pub mention_text: String,
    pub position: i32,
    pub context: String,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub created_at: OffsetDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = mentions)]
struct NewMention<'a> {
    source_type: SourceType,
    source_id: i32,
    mentioned_type: MentionKind,
    mentioned_id: i32,
    mention_text: &'a str,
    position: i32,
    context: &'a str,
}

/// An extracted mention and the entity it points at, if any.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMention {
    #[serde(flatten)]
    pub mention: ExtractedMention,
    pub mentioned_id: Option<i32>,
}

/// Looks up what a mention refers to.
///
/// Users must be active. Player and user names match case-insensitively, teams
/// as described in [`Team::find_by_mention`].
///
/// # Errors
/// Fails if the query fails.
pub async fn resolve(
    conn: &mut AsyncPgConnection,
    mention: &ExtractedMention,
) -> QueryResult<Option<i32>> {
    let name = mention.name.to_lowercase();
    match mention.kind {
        MentionKind::User => {
            users::table
                .filter(lower(users::username).eq(name))
                .filter(users::status.eq(UserStatus::Active))
                .select(users::id)
                .first(conn)
                .await
                .optional()
        }
        MentionKind::Player => {
            players::table
                .filter(lower(players::username).eq(name))
                .select(players::id)
                .first(conn)
                .await
                .optional()
        }
        MentionKind::Team => Ok(Team::find_by_mention(conn, &mention.name)
            .await?
            .map(|team| team.id)),
    }
}

/// Extracts and resolves every mention in `content` without storing anything.
///
/// # Errors
/// Fails if a lookup fails.
pub async fn preview(
    conn: &mut AsyncPgConnection,
    content: &str,
) -> QueryResult<Vec<ResolvedMention>> {
    let mut resolved = Vec::new();
    for mention in extract(content) {
        let mentioned_id = resolve(conn, &mention).await?;
        resolved.push(ResolvedMention {
            mention,
            mentioned_id,
        });
    }
    Ok(resolved)
}

/// Replaces the stored mentions of a piece of content with those in `content`.
///
/// Mentions that don't resolve are dropped.
///
/// # Errors
/// Fails if a lookup or write fails, in which case the old mentions are kept.
pub async fn sync(
    conn: &mut AsyncPgConnection,
    source_type: SourceType,
    source_id: i32,
    content: &str,
) -> anyhow::Result<Vec<Mention>> {
    let resolved = preview(conn, content).await?;
    conn.transaction::<_, anyhow::Error, _>(|conn| {
        async move {
            diesel::delete(
                mentions::table
                    .filter(mentions::source_type.eq(source_type))
                    .filter(mentions::source_id.eq(source_id)),
            )
            .execute(conn)
            .await?;

            let mut rows = Vec::with_capacity(resolved.len());
            for found in &resolved {
                let Some(mentioned_id) = found.mentioned_id else {
                    continue;
                };
                if found.mention.text.len() > MAX_MENTION_TEXT {
                    continue;
                }
                rows.push(NewMention {
                    source_type,
                    source_id,
                    mentioned_type: found.mention.kind,
                    mentioned_id,
                    mention_text: &found.mention.text,
                    position: i32::try_from(found.mention.position)?,
                    context: &found.mention.context,
                });
            }
            if rows.is_empty() {
                return Ok(Vec::new());
            }
            Ok(diesel::insert_into(mentions::table)
                .values(&rows)
                .returning(Mention::as_returning())
                .get_results(conn)
                .await?)
        }
        .scope_boxed()
    })
    .await
}

/// Mentions stored for one piece of content, in text order.
///
/// # Errors
/// Fails if the query fails.
pub async fn for_source(
    conn: &mut AsyncPgConnection,
    source_type: SourceType,
    source_id: i32,
) -> QueryResult<Vec<Mention>> {
    mentions::table
        .filter(mentions::source_type.eq(source_type))
        .filter(mentions::source_id.eq(source_id))
        .order(mentions::position.asc())
        .select(Mention::as_select())
        .load(conn)
        .await
}

/// Mentions of one user, team or player, newest first, with the total count.
///
/// # Errors
/// Fails if the query fails.
pub async fn for_target(
    conn: &mut AsyncPgConnection,
    kind: MentionKind,
    mentioned_id: i32,
    page: i64,
    page_size: i64,
) -> QueryResult<(Vec<Mention>, i64)> {
    let items = mentions::table
        .filter(mentions::mentioned_type.eq(kind))
        .filter(mentions::mentioned_id.eq(mentioned_id))
        .order((mentions::created_at.desc(), mentions::id.desc()))
        .offset((page - 1) * page_size)
        .limit(page_size)
        .select(Mention::as_select())
        .load(conn)
        .await?;
    let total = mentions::table
        .filter(mentions::mentioned_type.eq(kind))
        .filter(mentions::mentioned_id.eq(mentioned_id))
        .count()
        .get_result(conn)
        .await?;
    Ok((items, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_as_path_segments() {
        assert_eq!(serde_json::to_value(MentionKind::Player).unwrap(), "player");
        let source: SourceType = serde_json::from_str("\"forum_post\"").unwrap();
        assert_eq!(source, SourceType::ForumPost);
        assert_eq!(SourceType::try_from(5).unwrap(), SourceType::MatchComment);
    }

    #[test]
    fn resolved_mentions_flatten() {
        let mention = extract("gg @team:SEN").remove(0);
        let json = serde_json::to_value(ResolvedMention {
            mention,
            mentioned_id: None,
        })
        .unwrap();
        assert_eq!(json["kind"], "team");
        assert_eq!(json["text"], "@team:SEN");
        assert!(json["mentionedId"].is_null());
    }
}
