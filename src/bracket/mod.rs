//! Tournament bracket engine.
//!
//! Brackets are built from an ordered seed list and then driven forward by
//! reporting results. Nothing in here touches the database; callers persist
//! whatever [`Changes`] an operation reports.

pub mod elimination;
pub mod round_robin;
pub mod seeding;
pub mod series;
pub mod standings;
pub mod swiss;

use std::collections::HashSet;

use diesel::{deserialize::FromSqlRow, expression::AsExpression, sql_types::SmallInt};
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

pub use series::BestOf;

use crate::util::sql_enum::smallint_enum;

pub type TeamId = i32;

pub const GRAND_FINAL: &str = "GF_M1";
pub const GRAND_FINAL_RESET: &str = "GF_M2";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BracketError {
    #[error("at least {0} teams are required for this format")]
    TooFewTeams(usize),
    #[error("team {0} is entered more than once")]
    DuplicateTeam(TeamId),
    #[error("bracket match {0} does not exist")]
    UnknownMatch(String),
    #[error("bracket match {0} is not ready to be played")]
    NotReady(String),
    #[error("bracket match {0} already has a result")]
    AlreadyDecided(String),
    #[error("the current round is not finished yet")]
    RoundInProgress,
    #[error("all {0} rounds have already been generated")]
    NoRoundsLeft(u32),
    #[error("operation is not supported for {0:?} brackets")]
    UnsupportedFormat(Format),
    #[error(transparent)]
    Series(#[from] series::SeriesError),
}

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
pub enum Format {
    SingleElimination = 0,
    DoubleElimination = 1,
    RoundRobin = 2,
    Swiss = 3,
}

impl Format {
    #[must_use]
    pub const fn is_elimination(self) -> bool {
        matches!(self, Self::SingleElimination | Self::DoubleElimination)
    }
}

/// Which part of the bracket a node belongs to.
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
pub enum BracketSide {
    Upper = 0,
    Lower = 1,
    GrandFinal = 2,
    GrandFinalReset = 3,
    Group = 4,
    Swiss = 5,
}

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
pub enum NodeStatus {
    /// At least one side is still waiting on an earlier match.
    Waiting = 0,
    /// Both teams are known and the match can be played.
    Pending = 1,
    Completed = 2,
    /// Only one team could ever reach this match, it advanced unplayed.
    Bye = 3,
    /// Nobody can reach this match, or it turned out not to be needed.
    Void = 4,
}

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
pub enum Slot {
    Team1 = 1,
    Team2 = 2,
}

smallint_enum!(Format, BracketSide, NodeStatus, Slot);

impl Slot {
    /// Odd positions feed the upper slot of the next match, even positions the lower one.
    #[must_use]
    pub const fn from_position(position: i32) -> Self {
        if position % 2 == 1 {
            Self::Team1
        } else {
            Self::Team2
        }
    }

    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Team1 => Self::Team2,
            Self::Team2 => Self::Team1,
        }
    }
}

/// Where a team goes after a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Link {
    pub code: String,
    pub slot: Slot,
}

impl Link {
    #[must_use]
    pub fn new(code: impl Into<String>, slot: Slot) -> Self {
        Self {
            code: code.into(),
            slot,
        }
    }
}

/// One match of a bracket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub code: String,
    pub side: BracketSide,
    pub round: i32,
    pub position: i32,
    pub team1: Option<TeamId>,
    pub team2: Option<TeamId>,
    pub team1_score: i32,
    pub team2_score: i32,
    pub winner: Option<TeamId>,
    pub status: NodeStatus,
    pub winner_to: Option<Link>,
    pub loser_to: Option<Link>,
}

impl Node {
    #[must_use]
    pub fn new(code: impl Into<String>, side: BracketSide, round: i32, position: i32) -> Self {
        Self {
            code: code.into(),
            side,
            round,
            position,
            team1: None,
            team2: None,
            team1_score: 0,
            team2_score: 0,
            winner: None,
            status: NodeStatus::Waiting,
            winner_to: None,
            loser_to: None,
        }
    }

    #[must_use]
    pub const fn team(&self, slot: Slot) -> Option<TeamId> {
        match slot {
            Slot::Team1 => self.team1,
            Slot::Team2 => self.team2,
        }
    }

    pub fn set_team(&mut self, slot: Slot, team: Option<TeamId>) {
        match slot {
            Slot::Team1 => self.team1 = team,
            Slot::Team2 => self.team2 = team,
        }
    }

    /// The team that lost a played match.
    #[must_use]
    pub fn loser(&self) -> Option<TeamId> {
        if self.status != NodeStatus::Completed {
            return None;
        }
        match self.winner {
            Some(winner) if self.team1 == Some(winner) => self.team2,
            Some(_) => self.team1,
            None => None,
        }
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(
            self.status,
            NodeStatus::Completed | NodeStatus::Bye | NodeStatus::Void
        )
    }

    fn feeds(&self, code: &str, slot: Slot) -> bool {
        let targets = |link: &Option<Link>| {
            link.as_ref()
                .is_some_and(|link| link.code == code && link.slot == slot)
        };
        targets(&self.winner_to) || targets(&self.loser_to)
    }
}

/// What an operation did to the node list, keyed by node code.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Changes {
    /// Nodes that were modified or created.
    pub touched: Vec<String>,
    /// Nodes that no longer exist.
    pub removed: Vec<String>,
}

impl Changes {
    fn between(before: &[Node], after: &[Node]) -> Self {
        let touched = after
            .iter()
            .filter(|node| !before.contains(node))
            .map(|node| node.code.clone())
            .collect();
        let remaining: HashSet<&str> = after.iter().map(|node| node.code.as_str()).collect();
        let removed = before
            .iter()
            .filter(|node| !remaining.contains(node.code.as_str()))
            .map(|node| node.code.clone())
            .collect();
        Self { touched, removed }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.touched.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Filled,
    Open,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Bracket {
    pub format: Format,
    pub best_of: BestOf,
    /// Entrants in seed order, `seeds[0]` is the first seed.
    pub seeds: Vec<TeamId>,
    pub swiss_rounds: Option<u32>,
    pub nodes: Vec<Node>,
}

impl Bracket {
    #[must_use]
    pub fn new(format: Format, best_of: BestOf, seeds: Vec<TeamId>, nodes: Vec<Node>) -> Self {
        Self {
            format,
            best_of,
            seeds,
            swiss_rounds: None,
            nodes,
        }
    }

    #[must_use]
    pub fn node(&self, code: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.code == code)
    }

    fn index_of(&self, code: &str) -> Result<usize, BracketError> {
        self.nodes
            .iter()
            .position(|node| node.code == code)
            .ok_or_else(|| BracketError::UnknownMatch(code.to_owned()))
    }

    /// Records the series score of a pending match and moves both teams on.
    ///
    /// # Errors
    /// Fails if the match is unknown, not pending, or the score doesn't decide the series.
    pub fn report(
        &mut self,
        code: &str,
        team1_score: i32,
        team2_score: i32,
    ) -> Result<Changes, BracketError> {
        let idx = self.index_of(code)?;
        match self.nodes[idx].status {
            NodeStatus::Pending => {}
            NodeStatus::Waiting => return Err(BracketError::NotReady(code.to_owned())),
            _ => return Err(BracketError::AlreadyDecided(code.to_owned())),
        }
        let winner_slot = self.best_of.decide(team1_score, team2_score)?;
        let before = self.nodes.clone();

        let node = &mut self.nodes[idx];
        node.team1_score = team1_score;
        node.team2_score = team2_score;
        node.winner = node.team(winner_slot);
        node.status = NodeStatus::Completed;
        let winner = node.winner;
        let loser = node.team(winner_slot.other());
        let winner_to = node.winner_to.clone();
        let loser_to = node.loser_to.clone();
        let side = node.side;

        if let Some(link) = winner_to {
            self.place(&link, winner);
        }
        if let Some(link) = loser_to {
            self.place(&link, loser);
        }
        if side == BracketSide::GrandFinal {
            self.settle_grand_final(winner_slot);
        }
        self.resolve();

        Ok(Changes::between(&before, &self.nodes))
    }

    fn place(&mut self, link: &Link, team: Option<TeamId>) {
        if let Some(target) = self.nodes.iter_mut().find(|node| node.code == link.code) {
            target.set_team(link.slot, team);
        }
    }

    /// The upper-bracket finalist sits in slot one of the grand final. If they lose,
    /// both teams have one loss and the reset match decides it.
    fn settle_grand_final(&mut self, winner_slot: Slot) {
        let Some(final_idx) = self.nodes.iter().position(|n| n.code == GRAND_FINAL) else {
            return;
        };
        let (team1, team2) = (self.nodes[final_idx].team1, self.nodes[final_idx].team2);
        if let Some(reset) = self
            .nodes
            .iter_mut()
            .find(|node| node.code == GRAND_FINAL_RESET)
        {
            if winner_slot == Slot::Team1 {
                reset.status = NodeStatus::Void;
            } else {
                reset.team1 = team1;
                reset.team2 = team2;
                reset.status = NodeStatus::Pending;
            }
        }
    }

    fn slot_state(&self, idx: usize, slot: Slot) -> SlotState {
        let node = &self.nodes[idx];
        if node.team(slot).is_some() {
            return SlotState::Filled;
        }
        let mut feeders = self
            .nodes
            .iter()
            .filter(|feeder| feeder.feeds(&node.code, slot))
            .peekable();
        if feeders.peek().is_none() {
            return SlotState::Empty;
        }
        if feeders.all(Node::is_finished) {
            SlotState::Empty
        } else {
            SlotState::Open
        }
    }

    /// Promotes waiting matches whose teams are known and pushes teams through byes
    /// until nothing changes.
    pub(crate) fn resolve(&mut self) {
        loop {
            let mut changed = false;
            for idx in 0..self.nodes.len() {
                let node = &self.nodes[idx];
                if node.status != NodeStatus::Waiting || node.side == BracketSide::GrandFinalReset {
                    continue;
                }
                let first = self.slot_state(idx, Slot::Team1);
                let second = self.slot_state(idx, Slot::Team2);
                let status = match (first, second) {
                    (SlotState::Filled, SlotState::Filled) => NodeStatus::Pending,
                    (SlotState::Filled, SlotState::Empty) | (SlotState::Empty, SlotState::Filled) => {
                        NodeStatus::Bye
                    }
                    (SlotState::Empty, SlotState::Empty) => NodeStatus::Void,
                    _ => continue,
                };

                changed = true;
                let node = &mut self.nodes[idx];
                node.status = status;
                if status == NodeStatus::Pending {
                    continue;
                }
                node.winner = node.team1.or(node.team2);
                let winner = node.winner;
                let winner_to = node.winner_to.clone();
                let side = node.side;
                if let Some(link) = winner_to {
                    self.place(&link, winner);
                }
                if side == BracketSide::GrandFinal {
                    self.settle_grand_final(Slot::Team1);
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Matches that can be played right now.
    #[must_use]
    pub fn ready(&self) -> Vec<&Node> {
        let mut ready: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|node| node.status == NodeStatus::Pending)
            .collect();
        ready.sort_by_key(|node| (node.round, node.side as i16, node.position));
        ready
    }

    /// Highest round generated so far.
    #[must_use]
    pub fn current_round(&self) -> i32 {
        self.nodes.iter().map(|node| node.round).max().unwrap_or(0)
    }

    #[must_use]
    pub fn champion(&self) -> Option<TeamId> {
        match self.format {
            Format::SingleElimination => self
                .nodes
                .iter()
                .find(|node| node.winner_to.is_none() && node.is_finished())
                .and_then(|node| node.winner),
            Format::DoubleElimination => {
                let final_match = self.node(GRAND_FINAL)?;
                let reset = self.node(GRAND_FINAL_RESET)?;
                match reset.status {
                    NodeStatus::Completed => reset.winner,
                    NodeStatus::Void if final_match.is_finished() => final_match.winner,
                    _ => None,
                }
            }
            Format::RoundRobin | Format::Swiss => {
                if self.is_complete() {
                    standings::table(self).first().map(|row| row.team_id)
                } else {
                    None
                }
            }
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        match self.format {
            Format::SingleElimination | Format::DoubleElimination => self.champion().is_some(),
            Format::RoundRobin => self.nodes.iter().all(Node::is_finished),
            Format::Swiss => {
                let total = self
                    .swiss_rounds
                    .unwrap_or_else(|| swiss::default_rounds(self.seeds.len()));
                u32::try_from(self.current_round()).is_ok_and(|round| round >= total)
                    && self.nodes.iter().all(Node::is_finished)
            }
        }
    }

    /// Clears every result and rebuilds the starting state.
    ///
    /// # Errors
    /// Only fails if the stored seed list could no longer build a bracket.
    pub fn reset(&mut self) -> Result<Changes, BracketError> {
        let rebuilt = match self.format {
            Format::SingleElimination => {
                elimination::single_elimination(&self.seeds, self.best_of)?.nodes
            }
            Format::DoubleElimination => {
                elimination::double_elimination(&self.seeds, self.best_of)?.nodes
            }
            Format::RoundRobin => self
                .nodes
                .iter()
                .cloned()
                .map(|mut node| {
                    node.team1_score = 0;
                    node.team2_score = 0;
                    node.winner = None;
                    node.status = NodeStatus::Pending;
                    node
                })
                .collect(),
            Format::Swiss => swiss::swiss(&self.seeds, self.best_of, self.swiss_rounds)?.nodes,
        };
        let before = std::mem::replace(&mut self.nodes, rebuilt);
        Ok(Changes::between(&before, &self.nodes))
    }
}

/// Rejects seed lists that are too short or enter a team twice.
pub(crate) fn validate_entrants(seeds: &[TeamId], minimum: usize) -> Result<(), BracketError> {
    if seeds.len() < minimum {
        return Err(BracketError::TooFewTeams(minimum));
    }
    let mut seen = HashSet::with_capacity(seeds.len());
    for &team in seeds {
        if !seen.insert(team) {
            return Err(BracketError::DuplicateTeam(team));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::TeamId;

    /// Team ids 101, 102, ... so ids never collide with seed numbers in assertions.
    pub fn teams(count: i32) -> Vec<TeamId> {
        (1..=count).map(|seed| 100 + seed).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_from_position_alternates() {
        assert_eq!(Slot::from_position(1), Slot::Team1);
        assert_eq!(Slot::from_position(2), Slot::Team2);
        assert_eq!(Slot::from_position(7), Slot::Team1);
    }

    #[test]
    fn validate_entrants_rejects_duplicates() {
        assert_eq!(
            validate_entrants(&[1, 2, 1], 2),
            Err(BracketError::DuplicateTeam(1))
        );
        assert_eq!(validate_entrants(&[1], 2), Err(BracketError::TooFewTeams(2)));
        assert!(validate_entrants(&[1, 2], 2).is_ok());
    }

    #[test]
    fn changes_reports_new_and_removed_nodes() {
        let a = Node::new("A", BracketSide::Swiss, 1, 1);
        let b = Node::new("B", BracketSide::Swiss, 1, 2);
        let mut a_played = a.clone();
        a_played.status = NodeStatus::Completed;
        let c = Node::new("C", BracketSide::Swiss, 2, 1);

        let changes = Changes::between(&[a, b], &[a_played, c]);
        assert_eq!(changes.touched, vec!["A".to_owned(), "C".to_owned()]);
        assert_eq!(changes.removed, vec!["B".to_owned()]);
    }
}
