//! League tables for round robin and Swiss, final placements for elimination.

use std::collections::HashMap;

use serde::Serialize;
use utoipa::ToSchema;

use super::{Bracket, BracketSide, Format, NodeStatus, TeamId};

pub const POINTS_PER_WIN: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StandingRow {
    pub rank: u32,
    pub team_id: TeamId,
    pub seed: u32,
    pub played: i32,
    pub wins: i32,
    pub losses: i32,
    pub map_wins: i32,
    pub map_losses: i32,
    pub points: i32,
    /// Sum of the wins of every opponent faced. Swiss only.
    pub buchholz: i32,
}

impl StandingRow {
    #[must_use]
    pub const fn map_difference(&self) -> i32 {
        self.map_wins - self.map_losses
    }

    const fn tied_with(&self, other: &Self) -> bool {
        self.points == other.points
            && self.map_difference() == other.map_difference()
            && self.map_wins == other.map_wins
    }
}

/// Ranks every entrant.
///
/// Round robin sorts by points, map difference, map wins, head-to-head between
/// exactly two tied teams, then seed. Swiss puts Buchholz right after points and
/// counts a bye as a win.
#[must_use]
pub fn table(bracket: &Bracket) -> Vec<StandingRow> {
    let mut rows: Vec<StandingRow> = bracket
        .seeds
        .iter()
        .zip(1..)
        .map(|(&team_id, seed)| StandingRow {
            rank: 0,
            team_id,
            seed,
            played: 0,
            wins: 0,
            losses: 0,
            map_wins: 0,
            map_losses: 0,
            points: 0,
            buchholz: 0,
        })
        .collect();
    let index: HashMap<TeamId, usize> = rows
        .iter()
        .enumerate()
        .map(|(idx, row)| (row.team_id, idx))
        .collect();
    let mut opponents: HashMap<TeamId, Vec<TeamId>> = HashMap::new();

    for node in &bracket.nodes {
        match node.status {
            NodeStatus::Completed => {
                let (Some(team1), Some(team2)) = (node.team1, node.team2) else {
                    continue;
                };
                let sides = [
                    (team1, team2, node.team1_score, node.team2_score),
                    (team2, team1, node.team2_score, node.team1_score),
                ];
                for (team, opponent, own, against) in sides {
                    let Some(&idx) = index.get(&team) else {
                        continue;
                    };
                    let row = &mut rows[idx];
                    row.played += 1;
                    row.map_wins += own;
                    row.map_losses += against;
                    if node.winner == Some(team) {
                        row.wins += 1;
                    } else {
                        row.losses += 1;
                    }
                    opponents.entry(team).or_default().push(opponent);
                }
            }
            NodeStatus::Bye if bracket.format == Format::Swiss => {
                if let Some(idx) = node.winner.and_then(|team| index.get(&team)) {
                    rows[*idx].wins += 1;
                }
            }
            _ => {}
        }
    }

    let wins: HashMap<TeamId, i32> = rows.iter().map(|row| (row.team_id, row.wins)).collect();
    for row in &mut rows {
        row.points = row.wins * POINTS_PER_WIN;
        if bracket.format == Format::Swiss {
            row.buchholz = opponents
                .get(&row.team_id)
                .map_or(0, |faced| faced.iter().filter_map(|t| wins.get(t)).sum());
        }
    }

    if bracket.format == Format::Swiss {
        rows.sort_by(|a, b| {
            b.points
                .cmp(&a.points)
                .then(b.buchholz.cmp(&a.buchholz))
                .then(b.map_difference().cmp(&a.map_difference()))
                .then(b.map_wins.cmp(&a.map_wins))
                .then(a.seed.cmp(&b.seed))
        });
    } else {
        rows.sort_by(|a, b| {
            b.points
                .cmp(&a.points)
                .then(b.map_difference().cmp(&a.map_difference()))
                .then(b.map_wins.cmp(&a.map_wins))
                .then(a.seed.cmp(&b.seed))
        });
        apply_head_to_head(bracket, &mut rows);
    }

    for (row, rank) in rows.iter_mut().zip(1..) {
        row.rank = rank;
    }
    rows
}

/// Swaps two-way ties when the lower-seeded team won the direct meetings.
fn apply_head_to_head(bracket: &Bracket, rows: &mut [StandingRow]) {
    let mut idx = 0;
    while idx + 1 < rows.len() {
        let pair_tied = rows[idx].tied_with(&rows[idx + 1]);
        let group_of_two = (idx == 0 || !rows[idx - 1].tied_with(&rows[idx]))
            && rows
                .get(idx + 2)
                .is_none_or(|next| !next.tied_with(&rows[idx + 1]));
        if pair_tied && group_of_two {
            if head_to_head(bracket, rows[idx + 1].team_id, rows[idx].team_id) > 0 {
                rows.swap(idx, idx + 1);
            }
            idx += 2;
        } else {
            idx += 1;
        }
    }
}

/// Direct wins of `team` over `other` minus the reverse.
fn head_to_head(bracket: &Bracket, team: TeamId, other: TeamId) -> i32 {
    bracket
        .nodes
        .iter()
        .filter(|node| node.status == NodeStatus::Completed)
        .filter(|node| {
            (node.team1 == Some(team) && node.team2 == Some(other))
                || (node.team1 == Some(other) && node.team2 == Some(team))
        })
        .map(|node| match node.winner {
            Some(winner) if winner == team => 1,
            Some(_) => -1,
            None => 0,
        })
        .sum()
}

/// A finishing position, shared by every team knocked out at the same stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub team_id: TeamId,
    pub place: u32,
    /// Last place of a shared range, e.g. 8 for "5th-8th".
    pub place_to: u32,
}

/// Finishing positions known so far.
///
/// Elimination brackets group teams by the round they went out in, filling
/// places from the bottom, so placements of teams already out stay correct while
/// the bracket is still running. League formats take the table rank once the
/// stage is over.
#[must_use]
pub fn placements(bracket: &Bracket) -> Vec<Placement> {
    if !bracket.format.is_elimination() {
        if !bracket.is_complete() {
            return Vec::new();
        }
        return table(bracket)
            .into_iter()
            .map(|row| Placement {
                team_id: row.team_id,
                place: row.rank,
                place_to: row.rank,
            })
            .collect();
    }

    let lower_rounds = bracket
        .nodes
        .iter()
        .filter(|node| node.side == BracketSide::Lower)
        .map(|node| node.round)
        .max()
        .unwrap_or(0);
    let mut out: Vec<(i32, TeamId)> = Vec::new();
    for node in &bracket.nodes {
        let Some(loser) = node.loser() else {
            continue;
        };
        let stage = match (bracket.format, node.side) {
            (Format::SingleElimination, _) => node.round,
            (_, BracketSide::Lower) => node.round,
            // Only the lower-bracket finalist is out after losing the first final.
            (_, BracketSide::GrandFinal) if node.team2 == Some(loser) => lower_rounds + 1,
            (_, BracketSide::GrandFinalReset) => lower_rounds + 2,
            _ => continue,
        };
        out.push((stage, loser));
    }
    out.sort_unstable();

    let mut placements = Vec::with_capacity(out.len() + 1);
    let mut next_last = u32::try_from(bracket.seeds.len()).unwrap_or(u32::MAX);
    for group in out.chunk_by(|a, b| a.0 == b.0) {
        let size = u32::try_from(group.len()).unwrap_or(u32::MAX);
        let first = next_last.saturating_sub(size) + 1;
        placements.extend(group.iter().map(|&(_, team_id)| Placement {
            team_id,
            place: first,
            place_to: next_last,
        }));
        next_last = first.saturating_sub(1);
    }
    if let Some(champion) = bracket.champion() {
        placements.push(Placement {
            team_id: champion,
            place: 1,
            place_to: 1,
        });
    }
    placements.sort_by_key(|p| (p.place, p.team_id));
    placements
}
