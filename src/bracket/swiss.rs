//! Swiss system: fixed number of rounds, each paired from the current table.

use std::collections::HashSet;

use super::{
    elimination::code, standings, validate_entrants, BestOf, Bracket, BracketError, BracketSide,
    Changes, Format, Node, NodeStatus, TeamId,
};

/// Upper bound on pairing attempts before settling for rematches.
const SEARCH_BUDGET: usize = 20_000;

/// ⌈log2 n⌉ + 1 rounds, never more than everyone-plays-everyone.
#[must_use]
pub fn default_rounds(teams: usize) -> u32 {
    let rounds = teams.next_power_of_two().trailing_zeros() + 1;
    let cap = u32::try_from(teams.saturating_sub(1)).unwrap_or(u32::MAX);
    rounds.min(cap).max(1)
}

/// Builds the first Swiss round: the top half of the seed list meets the bottom half.
///
/// # Errors
/// Fails with fewer than two teams or a team entered twice.
pub fn swiss(
    seeds: &[TeamId],
    best_of: BestOf,
    rounds: Option<u32>,
) -> Result<Bracket, BracketError> {
    validate_entrants(seeds, 2)?;
    let cap = u32::try_from(seeds.len() - 1).unwrap_or(u32::MAX);
    let total = rounds
        .unwrap_or_else(|| default_rounds(seeds.len()))
        .clamp(1, cap);

    let half = seeds.len() / 2;
    let pairs: Vec<(TeamId, TeamId)> = (0..half).map(|idx| (seeds[idx], seeds[half + idx])).collect();
    let bye = (seeds.len() % 2 == 1).then(|| seeds[seeds.len() - 1]);

    let mut bracket = Bracket::new(
        Format::Swiss,
        best_of,
        seeds.to_vec(),
        round_nodes(1, &pairs, bye),
    );
    bracket.swiss_rounds = Some(total);
    Ok(bracket)
}

/// Pairs the next round once every match of the current one is finished.
///
/// # Errors
/// Fails for non-Swiss brackets, while matches are outstanding, or when every
/// round has been played.
pub fn next_round(bracket: &mut Bracket) -> Result<Changes, BracketError> {
    if bracket.format != Format::Swiss {
        return Err(BracketError::UnsupportedFormat(bracket.format));
    }
    if !bracket.nodes.iter().all(Node::is_finished) {
        return Err(BracketError::RoundInProgress);
    }
    let total = bracket
        .swiss_rounds
        .unwrap_or_else(|| default_rounds(bracket.seeds.len()));
    let round = bracket.current_round() + 1;
    if u32::try_from(round).is_ok_and(|round| round > total) {
        return Err(BracketError::NoRoundsLeft(total));
    }

    let mut ranked: Vec<TeamId> = standings::table(bracket)
        .into_iter()
        .map(|row| row.team_id)
        .collect();
    let had_bye: HashSet<TeamId> = bracket
        .nodes
        .iter()
        .filter(|node| node.status == NodeStatus::Bye)
        .filter_map(|node| node.winner)
        .collect();
    let bye = if ranked.len() % 2 == 1 {
        let idx = ranked
            .iter()
            .rposition(|team| !had_bye.contains(team))
            .unwrap_or(ranked.len() - 1);
        Some(ranked.remove(idx))
    } else {
        None
    };

    let met: HashSet<(TeamId, TeamId)> = bracket
        .nodes
        .iter()
        .filter_map(|node| Some(matchup(node.team1?, node.team2?)))
        .collect();
    let mut budget = SEARCH_BUDGET;
    let pairs = pair_without_rematches(&ranked, &met, &mut budget).unwrap_or_else(|| {
        tracing::debug!(round, "no rematch-free pairing found, pairing by record");
        pair_by_record(&ranked, &met)
    });

    let before = bracket.nodes.clone();
    bracket.nodes.extend(round_nodes(round, &pairs, bye));
    Ok(Changes::between(&before, &bracket.nodes))
}

fn matchup(a: TeamId, b: TeamId) -> (TeamId, TeamId) {
    (a.min(b), a.max(b))
}

/// Depth-first search pairing the highest-ranked open team with the nearest
/// opponent it hasn't played yet.
fn pair_without_rematches(
    pool: &[TeamId],
    met: &HashSet<(TeamId, TeamId)>,
    budget: &mut usize,
) -> Option<Vec<(TeamId, TeamId)>> {
    let Some((&first, rest)) = pool.split_first() else {
        return Some(Vec::new());
    };
    for (idx, &opponent) in rest.iter().enumerate() {
        if *budget == 0 {
            return None;
        }
        *budget -= 1;
        if met.contains(&matchup(first, opponent)) {
            continue;
        }
        let remaining: Vec<TeamId> = rest
            .iter()
            .enumerate()
            .filter(|&(other, _)| other != idx)
            .map(|(_, &team)| team)
            .collect();
        if let Some(mut pairs) = pair_without_rematches(&remaining, met, budget) {
            pairs.insert(0, (first, opponent));
            return Some(pairs);
        }
    }
    None
}

/// Top-down pairing that avoids rematches where it can and accepts them where it can't.
fn pair_by_record(pool: &[TeamId], met: &HashSet<(TeamId, TeamId)>) -> Vec<(TeamId, TeamId)> {
    let mut remaining = pool.to_vec();
    let mut pairs = Vec::with_capacity(pool.len() / 2);
    while remaining.len() >= 2 {
        let first = remaining.remove(0);
        let idx = remaining
            .iter()
            .position(|&team| !met.contains(&matchup(first, team)))
            .unwrap_or(0);
        pairs.push((first, remaining.remove(idx)));
    }
    pairs
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn round_nodes(round: i32, pairs: &[(TeamId, TeamId)], bye: Option<TeamId>) -> Vec<Node> {
    let mut nodes: Vec<Node> = pairs
        .iter()
        .zip(1..)
        .map(|(&(team1, team2), position)| {
            let mut node = Node::new(code("SW", round, position), BracketSide::Swiss, round, position);
            node.team1 = Some(team1);
            node.team2 = Some(team2);
            node.status = NodeStatus::Pending;
            node
        })
        .collect();
    if let Some(team) = bye {
        let mut node = Node::new(
            format!("SW_R{round}_BYE"),
            BracketSide::Swiss,
            round,
            pairs.len() as i32 + 1,
        );
        node.team1 = Some(team);
        node.winner = Some(team);
        node.status = NodeStatus::Bye;
        nodes.push(node);
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bracket::test_support::teams;

    fn play_round(bracket: &mut Bracket, round: i32) {
        let codes: Vec<String> = bracket
            .nodes
            .iter()
            .filter(|n| n.round == round && n.status == NodeStatus::Pending)
            .map(|n| n.code.clone())
            .collect();
        for code in codes {
            bracket.report(&code, 1, 0).unwrap();
        }
    }

    fn round_pairs(bracket: &Bracket, round: i32) -> Vec<(TeamId, TeamId)> {
        bracket
            .nodes
            .iter()
            .filter(|n| n.round == round && n.status != NodeStatus::Bye)
            .map(|n| (n.team1.unwrap(), n.team2.unwrap()))
            .collect()
    }

    #[test]
    fn default_round_counts() {
        assert_eq!(default_rounds(2), 1);
        assert_eq!(default_rounds(4), 3);
        assert_eq!(default_rounds(8), 4);
        assert_eq!(default_rounds(16), 5);
        assert_eq!(default_rounds(5), 4);
    }

    #[test]
    fn first_round_folds_seed_list() {
        let bracket = swiss(&teams(8), BestOf::ONE, None).unwrap();
        assert_eq!(bracket.swiss_rounds, Some(4));
        assert_eq!(
            round_pairs(&bracket, 1),
            vec![(101, 105), (102, 106), (103, 107), (104, 108)]
        );
    }

    #[test]
    fn odd_field_gives_lowest_seed_a_bye() {
        let bracket = swiss(&teams(5), BestOf::ONE, Some(3)).unwrap();
        let bye = bracket.node("SW_R1_BYE").unwrap();
        assert_eq!(bye.status, NodeStatus::Bye);
        assert_eq!(bye.winner, Some(105));
        assert_eq!(bracket.ready().len(), 2);
    }

    #[test]
    fn next_round_waits_for_current_round() {
        let mut bracket = swiss(&teams(4), BestOf::ONE, None).unwrap();
        assert_eq!(next_round(&mut bracket), Err(BracketError::RoundInProgress));
        let mut league = crate::bracket::round_robin::round_robin(&teams(4), BestOf::ONE, false)
            .unwrap();
        assert_eq!(
            next_round(&mut league),
            Err(BracketError::UnsupportedFormat(Format::RoundRobin))
        );
    }

    #[test]
    fn second_round_pairs_by_record() {
        let mut bracket = swiss(&teams(8), BestOf::ONE, None).unwrap();
        play_round(&mut bracket, 1);
        let changes = next_round(&mut bracket).unwrap();
        assert_eq!(changes.touched.len(), 4);
        assert_eq!(
            round_pairs(&bracket, 2),
            vec![(101, 102), (103, 104), (105, 106), (107, 108)]
        );
    }

    #[test]
    fn pairing_avoids_rematches_until_last_round() {
        let mut bracket = swiss(&teams(4), BestOf::ONE, None).unwrap();
        for round in 1..=3 {
            if round > 1 {
                next_round(&mut bracket).unwrap();
            }
            play_round(&mut bracket, round);
        }
        let mut seen = HashSet::new();
        for round in 1..=3 {
            for (a, b) in round_pairs(&bracket, round) {
                assert!(seen.insert(matchup(a, b)), "rematch {a} vs {b}");
            }
        }
        assert_eq!(round_pairs(&bracket, 3), vec![(101, 104), (102, 103)]);
        assert!(bracket.is_complete());
        assert_eq!(next_round(&mut bracket), Err(BracketError::NoRoundsLeft(3)));
        assert_eq!(bracket.champion(), Some(101));
    }

    #[test]
    fn bye_rotates_to_teams_without_one() {
        let mut bracket = swiss(&teams(3), BestOf::ONE, None).unwrap();
        assert_eq!(bracket.node("SW_R1_BYE").unwrap().team1, Some(103));
        play_round(&mut bracket, 1);
        next_round(&mut bracket).unwrap();
        assert_eq!(bracket.node("SW_R2_BYE").unwrap().team1, Some(102));
        assert_eq!(round_pairs(&bracket, 2), vec![(101, 103)]);
    }

    #[test]
    fn forced_rematch_falls_back_to_record() {
        let met: HashSet<_> = [matchup(1, 2), matchup(1, 3), matchup(1, 4)].into();
        let mut budget = SEARCH_BUDGET;
        assert_eq!(pair_without_rematches(&[1, 2, 3, 4], &met, &mut budget), None);
        assert_eq!(pair_by_record(&[1, 2, 3, 4], &met), vec![(1, 2), (3, 4)]);
    }

    #[test]
    fn reset_drops_later_rounds() {
        let mut bracket = swiss(&teams(4), BestOf::ONE, None).unwrap();
        let fresh = bracket.clone();
        play_round(&mut bracket, 1);
        next_round(&mut bracket).unwrap();
        let changes = bracket.reset().unwrap();
        assert_eq!(bracket, fresh);
        assert_eq!(changes.removed, vec!["SW_R2_M1".to_owned(), "SW_R2_M2".to_owned()]);
    }
}
