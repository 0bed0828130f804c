//! Persistence for bracket stages.
//!
//! A stage is stored as its entrants plus one `bracket_matches` row per node.
//! Every operation loads the rows into a [`Bracket`], runs the engine, and writes
//! back only the nodes the engine reports as changed. Nodes that become playable
//! get a `matches` row so they can be scored like any other match.

use std::collections::HashMap;

use diesel::{
    deserialize::FromSqlRow, dsl, expression::AsExpression, pg::Pg, prelude::*,
    sql_types::SmallInt,
};
use diesel_async::{scoped_futures::ScopedFutureExt, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

use super::matches::{self, NewMatch, Outcome};
use crate::{
    bracket::{
        elimination::{self, round_name},
        round_robin,
        seeding::{self, SeedCandidate, SeedingMethod},
        swiss, BestOf, Bracket, BracketError, BracketSide, Changes, Format, Link, Node,
        NodeStatus, Slot, TeamId,
    },
    schema::{bracket_entries, bracket_matches, bracket_stages},
    util::sql_enum::smallint_enum,
};

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
pub enum StageStatus {
    Active = 0,
    Completed = 1,
}

smallint_enum!(StageStatus);

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, Serialize, ToSchema)]
#[diesel(table_name = bracket_stages, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct BracketStage {
    pub id: i32,
    pub name: String,
    pub format: Format,
    #[schema(value_type = i16)]
    pub best_of: BestOf,
    pub status: StageStatus,
    pub swiss_rounds: Option<i32>,
    pub champion_id: Option<i32>,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub created_at: OffsetDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = bracket_stages)]
struct NewStage<'a> {
    name: &'a str,
    format: Format,
    best_of: BestOf,
    swiss_rounds: Option<i32>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, Copy, Serialize, ToSchema)]
#[diesel(table_name = bracket_entries, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct BracketEntry {
    pub stage_id: i32,
    pub team_id: i32,
    pub seed: i32,
}

/// A stored bracket node.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = bracket_matches, check_for_backend(diesel::pg::Pg))]
pub struct BracketMatch {
    pub id: i32,
    pub stage_id: i32,
    pub code: String,
    pub side: BracketSide,
    pub round: i32,
    pub position: i32,
    pub team1_id: Option<i32>,
    pub team2_id: Option<i32>,
    pub team1_score: i32,
    pub team2_score: i32,
    pub winner_id: Option<i32>,
    pub status: NodeStatus,
    pub winner_to: Option<String>,
    pub winner_to_slot: Option<Slot>,
    pub loser_to: Option<String>,
    pub loser_to_slot: Option<Slot>,
    pub match_id: Option<i32>,
}

fn link(code: Option<String>, slot: Option<Slot>) -> Option<Link> {
    Some(Link::new(code?, slot?))
}

impl From<BracketMatch> for Node {
    fn from(row: BracketMatch) -> Self {
        Self {
            code: row.code,
            side: row.side,
            round: row.round,
            position: row.position,
            team1: row.team1_id,
            team2: row.team2_id,
            team1_score: row.team1_score,
            team2_score: row.team2_score,
            winner: row.winner_id,
            status: row.status,
            winner_to: link(row.winner_to, row.winner_to_slot),
            loser_to: link(row.loser_to, row.loser_to_slot),
        }
    }
}

/// Everything of a node except its match link, which is only ever set by
/// [`spawn_matches`].
#[derive(Insertable, AsChangeset)]
#[diesel(table_name = bracket_matches, treat_none_as_null = true)]
struct NodeRow<'a> {
    stage_id: i32,
    code: &'a str,
    side: BracketSide,
    round: i32,
    position: i32,
    team1_id: Option<i32>,
    team2_id: Option<i32>,
    team1_score: i32,
    team2_score: i32,
    winner_id: Option<i32>,
    status: NodeStatus,
    winner_to: Option<&'a str>,
    winner_to_slot: Option<Slot>,
    loser_to: Option<&'a str>,
    loser_to_slot: Option<Slot>,
}

impl<'a> NodeRow<'a> {
    fn new(stage_id: i32, node: &'a Node) -> Self {
        Self {
            stage_id,
            code: &node.code,
            side: node.side,
            round: node.round,
            position: node.position,
            team1_id: node.team1,
            team2_id: node.team2,
            team1_score: node.team1_score,
            team2_score: node.team2_score,
            winner_id: node.winner,
            status: node.status,
            winner_to: node.winner_to.as_ref().map(|l| l.code.as_str()),
            winner_to_slot: node.winner_to.as_ref().map(|l| l.slot),
            loser_to: node.loser_to.as_ref().map(|l| l.code.as_str()),
            loser_to_slot: node.loser_to.as_ref().map(|l| l.slot),
        }
    }
}

/// What a new stage is made of.
#[derive(Debug, Clone)]
pub struct StagePlan<'a> {
    pub name: &'a str,
    pub format: Format,
    pub best_of: BestOf,
    pub seeding: SeedingMethod,
    pub entrants: &'a [SeedCandidate],
    pub swiss_rounds: Option<u32>,
    /// Round robin only: play every pairing twice with sides swapped.
    pub double_round_robin: bool,
}

impl StagePlan<'_> {
    /// Seeds the entrants and generates the opening bracket.
    ///
    /// # Errors
    /// Fails if the entrants can't make a bracket of this format.
    pub fn build(&self) -> Result<Bracket, BracketError> {
        let seeds = seeding::seed(self.entrants, self.seeding);
        match self.format {
            Format::SingleElimination => elimination::single_elimination(&seeds, self.best_of),
            Format::DoubleElimination => elimination::double_elimination(&seeds, self.best_of),
            Format::RoundRobin => {
                round_robin::round_robin(&seeds, self.best_of, self.double_round_robin)
            }
            Format::Swiss => swiss::swiss(&seeds, self.best_of, self.swiss_rounds),
        }
    }
}

/// One node as shown to clients.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    #[serde(flatten)]
    pub node: Node,
    pub round_name: String,
    pub match_id: Option<i32>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StageDetail {
    #[serde(flatten)]
    pub stage: BracketStage,
    pub entries: Vec<BracketEntry>,
    pub matches: Vec<NodeView>,
}

/// Names every node's round, counting rounds per bracket side.
#[must_use]
pub fn node_views(format: Format, rows: Vec<BracketMatch>) -> Vec<NodeView> {
    let mut totals: HashMap<BracketSide, i32> = HashMap::new();
    for row in &rows {
        let total = totals.entry(row.side).or_default();
        *total = (*total).max(row.round);
    }
    rows.into_iter()
        .map(|row| {
            let total = totals.get(&row.side).copied().unwrap_or(row.round);
            let round_name = round_name(format, row.side, row.round, total);
            let match_id = row.match_id;
            NodeView {
                node: row.into(),
                round_name,
                match_id,
            }
        })
        .collect()
}

/// Creates a stage with its entrants and opening matches.
///
/// # Errors
/// Fails if the bracket can't be built or any insert fails.
#[instrument(skip(conn, plan), fields(name = plan.name, format = ?plan.format), err(Debug))]
pub async fn create_stage(
    conn: &mut AsyncPgConnection,
    plan: &StagePlan<'_>,
) -> anyhow::Result<StageDetail> {
    let bracket = plan.build()?;
    let swiss_rounds = bracket
        .swiss_rounds
        .map(i32::try_from)
        .transpose()?;

    conn.transaction::<_, anyhow::Error, _>(|conn| {
        async move {
            let stage: BracketStage = diesel::insert_into(bracket_stages::table)
                .values(NewStage {
                    name: plan.name,
                    format: bracket.format,
                    best_of: bracket.best_of,
                    swiss_rounds,
                })
                .returning(BracketStage::as_returning())
                .get_result(conn)
                .await?;

            let entries = bracket
                .seeds
                .iter()
                .zip(1..)
                .map(|(&team_id, seed)| BracketEntry {
                    stage_id: stage.id,
                    team_id,
                    seed,
                })
                .collect::<Vec<_>>();
            diesel::insert_into(bracket_entries::table)
                .values(&entries)
                .execute(conn)
                .await?;

            let rows: Vec<NodeRow> = bracket
                .nodes
                .iter()
                .map(|node| NodeRow::new(stage.id, node))
                .collect();
            diesel::insert_into(bracket_matches::table)
                .values(&rows)
                .execute(conn)
                .await?;

            let spawned = spawn_matches(conn, &stage).await?;
            info!(stage_id = stage.id, nodes = rows.len(), spawned, "Bracket stage created");
            detail(conn, stage.id).await
        }
        .scope_boxed()
    })
    .await
}

type LockedStage = dsl::ForUpdate<
    dsl::Select<dsl::Find<bracket_stages::table, i32>, dsl::AsSelect<BracketStage, Pg>>,
>;

/// The stage row, locked until the surrounding transaction ends.
fn locked_stage(stage_id: i32) -> LockedStage {
    bracket_stages::table
        .find(stage_id)
        .select(BracketStage::as_select())
        .for_update()
}

/// Takes the write lock of a stage.
///
/// Every write to a stage's nodes happens under this lock, so two results for
/// the same stage are applied one after the other.
///
/// # Errors
/// Fails with [`diesel::result::Error::NotFound`] for unknown stages.
pub async fn lock_stage(conn: &mut AsyncPgConnection, stage_id: i32) -> QueryResult<BracketStage> {
    locked_stage(stage_id).first(conn).await
}

/// The stage row plus its bracket, rebuilt from storage.
///
/// # Errors
/// Fails with [`diesel::result::Error::NotFound`] for unknown stages.
pub async fn load(
    conn: &mut AsyncPgConnection,
    stage_id: i32,
) -> anyhow::Result<(BracketStage, Bracket)> {
    let stage: BracketStage = bracket_stages::table
        .find(stage_id)
        .select(BracketStage::as_select())
        .first(conn)
        .await?;
    rebuild(conn, stage).await
}

/// Like [`load`], holding the stage lock. Only valid inside a transaction.
async fn load_for_update(
    conn: &mut AsyncPgConnection,
    stage_id: i32,
) -> anyhow::Result<(BracketStage, Bracket)> {
    let stage = lock_stage(conn, stage_id).await?;
    rebuild(conn, stage).await
}

async fn rebuild(
    conn: &mut AsyncPgConnection,
    stage: BracketStage,
) -> anyhow::Result<(BracketStage, Bracket)> {
    let seeds: Vec<TeamId> = bracket_entries::table
        .filter(bracket_entries::stage_id.eq(stage.id))
        .order(bracket_entries::seed.asc())
        .select(bracket_entries::team_id)
        .load(conn)
        .await?;
    let rows = node_rows(conn, stage.id).await?;

    let mut bracket = Bracket::new(
        stage.format,
        stage.best_of,
        seeds,
        rows.into_iter().map(Node::from).collect(),
    );
    bracket.swiss_rounds = stage
        .swiss_rounds
        .map(u32::try_from)
        .transpose()?;
    Ok((stage, bracket))
}

async fn node_rows(conn: &mut AsyncPgConnection, stage_id: i32) -> QueryResult<Vec<BracketMatch>> {
    bracket_matches::table
        .filter(bracket_matches::stage_id.eq(stage_id))
        .order(bracket_matches::id.asc())
        .select(BracketMatch::as_select())
        .load(conn)
        .await
}

/// Stage, entrants and every node with its round name and match link.
///
/// # Errors
/// Fails with [`diesel::result::Error::NotFound`] for unknown stages.
pub async fn detail(conn: &mut AsyncPgConnection, stage_id: i32) -> anyhow::Result<StageDetail> {
    let stage: BracketStage = bracket_stages::table
        .find(stage_id)
        .select(BracketStage::as_select())
        .first(conn)
        .await?;
    let entries: Vec<BracketEntry> = bracket_entries::table
        .filter(bracket_entries::stage_id.eq(stage_id))
        .order(bracket_entries::seed.asc())
        .select(BracketEntry::as_select())
        .load(conn)
        .await?;
    let rows = node_rows(conn, stage_id).await?;
    Ok(StageDetail {
        matches: node_views(stage.format, rows),
        stage,
        entries,
    })
}

/// Writes the nodes an engine operation changed.
async fn persist(
    conn: &mut AsyncPgConnection,
    stage_id: i32,
    bracket: &Bracket,
    changes: &Changes,
) -> QueryResult<()> {
    if !changes.removed.is_empty() {
        diesel::delete(
            bracket_matches::table
                .filter(bracket_matches::stage_id.eq(stage_id))
                .filter(bracket_matches::code.eq_any(&changes.removed)),
        )
        .execute(conn)
        .await?;
    }
    for code in &changes.touched {
        let Some(node) = bracket.node(code) else {
            continue;
        };
        let row = NodeRow::new(stage_id, node);
        diesel::insert_into(bracket_matches::table)
            .values(&row)
            .on_conflict((bracket_matches::stage_id, bracket_matches::code))
            .do_update()
            .set(&row)
            .execute(conn)
            .await?;
    }
    debug!(
        stage_id,
        touched = changes.touched.len(),
        removed = changes.removed.len(),
        "Bracket nodes persisted"
    );
    Ok(())
}

/// Creates a `matches` row for every playable node that doesn't have one yet.
///
/// Returns how many were created.
async fn spawn_matches(conn: &mut AsyncPgConnection, stage: &BracketStage) -> anyhow::Result<usize> {
    let pending: Vec<BracketMatch> = bracket_matches::table
        .filter(bracket_matches::stage_id.eq(stage.id))
        .filter(bracket_matches::status.eq(NodeStatus::Pending))
        .filter(bracket_matches::match_id.is_null())
        .order(bracket_matches::id.asc())
        .select(BracketMatch::as_select())
        .load(conn)
        .await?;

    let mut spawned = 0;
    for node in pending {
        let (Some(team1), Some(team2)) = (node.team1_id, node.team2_id) else {
            continue;
        };
        let created = NewMatch {
            stage_id: Some(stage.id),
            bracket_code: Some(node.code.clone()),
            ..NewMatch::new(team1, team2, stage.best_of)
        }
        .create(conn)
        .await?;
        diesel::update(&node)
            .set(bracket_matches::match_id.eq(created.id))
            .execute(conn)
            .await?;
        spawned += 1;
    }
    Ok(spawned)
}

/// Marks the stage completed with its champion once the bracket is finished,
/// and active again otherwise.
async fn settle_stage(
    conn: &mut AsyncPgConnection,
    stage_id: i32,
    bracket: &Bracket,
) -> QueryResult<()> {
    let (status, champion) = if bracket.is_complete() {
        (StageStatus::Completed, bracket.champion())
    } else {
        (StageStatus::Active, None)
    };
    diesel::update(bracket_stages::table.find(stage_id))
        .set((
            bracket_stages::status.eq(status),
            bracket_stages::champion_id.eq(champion),
        ))
        .execute(conn)
        .await?;
    if status == StageStatus::Completed {
        info!(stage_id, champion, "Bracket stage completed");
    }
    Ok(())
}

/// Feeds a series result into the bracket and opens whatever it unlocks.
///
/// Runs inside the caller's transaction and holds the stage lock until it ends.
///
/// # Errors
/// Fails if the node can't take this result or any write fails.
pub async fn record_result(
    conn: &mut AsyncPgConnection,
    stage_id: i32,
    code: &str,
    team1_score: i32,
    team2_score: i32,
) -> anyhow::Result<Changes> {
    let (stage, mut bracket) = load_for_update(conn, stage_id).await?;
    let changes = bracket.report(code, team1_score, team2_score)?;
    persist(conn, stage_id, &bracket, &changes).await?;
    spawn_matches(conn, &stage).await?;
    settle_stage(conn, stage_id, &bracket).await?;
    Ok(changes)
}

/// Reports a result by bracket code.
///
/// Nodes with a match go through [`matches::complete_match`] so ratings move
/// exactly as they do for a match completed directly.
///
/// # Errors
/// Fails if the node is unknown or not playable, or if completion fails.
pub async fn report(
    conn: &mut AsyncPgConnection,
    stage_id: i32,
    code: &str,
    team1_score: i32,
    team2_score: i32,
    k_factor: f64,
) -> anyhow::Result<StageDetail> {
    let node: BracketMatch = bracket_matches::table
        .filter(bracket_matches::stage_id.eq(stage_id))
        .filter(bracket_matches::code.eq(code))
        .select(BracketMatch::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| BracketError::UnknownMatch(code.to_owned()))?;

    let outcome = Outcome::Scores {
        team1_score,
        team2_score,
    };
    match node.match_id {
        Some(match_id) if node.status == NodeStatus::Pending => {
            matches::complete_match(conn, match_id, outcome, k_factor).await?;
        }
        _ => {
            conn.transaction::<_, anyhow::Error, _>(|conn| {
                async move {
                    record_result(conn, stage_id, code, team1_score, team2_score).await
                }
                .scope_boxed()
            })
            .await?;
        }
    }
    detail(conn, stage_id).await
}

/// Clears every result of a stage.
///
/// Matches spawned by the stage are deleted along with their rating history.
/// Team ratings are left as they are; `recalculate-ratings` rebuilds them.
///
/// # Errors
/// Fails for unknown stages or if any write fails.
#[instrument(skip(conn), err(Debug))]
pub async fn reset(conn: &mut AsyncPgConnection, stage_id: i32) -> anyhow::Result<StageDetail> {
    use crate::schema::matches;

    conn.transaction::<_, anyhow::Error, _>(|conn| {
        async move {
            let (stage, mut bracket) = load_for_update(conn, stage_id).await?;
            let changes = bracket.reset()?;
            diesel::delete(matches::table.filter(matches::stage_id.eq(stage_id)))
                .execute(conn)
                .await?;
            persist(conn, stage_id, &bracket, &changes).await?;
            spawn_matches(conn, &stage).await?;
            settle_stage(conn, stage_id, &bracket).await?;
            info!(stage_id, "Bracket stage reset");
            detail(conn, stage_id).await
        }
        .scope_boxed()
    })
    .await
}

/// Pairs the next Swiss round.
///
/// # Errors
/// Fails for non-Swiss stages, unfinished rounds, or when no rounds are left.
#[instrument(skip(conn), err(Debug))]
pub async fn next_round(conn: &mut AsyncPgConnection, stage_id: i32) -> anyhow::Result<StageDetail> {
    conn.transaction::<_, anyhow::Error, _>(|conn| {
        async move {
            let (stage, mut bracket) = load_for_update(conn, stage_id).await?;
            let changes = swiss::next_round(&mut bracket)?;
            persist(conn, stage_id, &bracket, &changes).await?;
            spawn_matches(conn, &stage).await?;
            settle_stage(conn, stage_id, &bracket).await?;
            detail(conn, stage_id).await
        }
        .scope_boxed()
    })
    .await
}

/// Deletes a stage with its nodes, entrants and matches.
///
/// # Errors
/// Fails if the delete fails.
pub async fn delete(conn: &mut AsyncPgConnection, stage_id: i32) -> QueryResult<usize> {
    diesel::delete(bracket_stages::table.find(stage_id))
        .execute(conn)
        .await
}
