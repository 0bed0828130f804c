use super::{
    elimination::code, validate_entrants, BestOf, Bracket, BracketError, BracketSide, Format,
    Node, NodeStatus, TeamId,
};

/// Every team plays every other team once, or twice with `double`.
///
/// Uses the circle method: the first entrant stays put while the rest rotate.
/// Odd fields get a phantom entrant and whoever draws it sits the round out.
///
/// # Errors
/// Fails with fewer than two teams or a team entered twice.
pub fn round_robin(
    seeds: &[TeamId],
    best_of: BestOf,
    double: bool,
) -> Result<Bracket, BracketError> {
    validate_entrants(seeds, 2)?;
    let mut lineup: Vec<Option<TeamId>> = seeds.iter().copied().map(Some).collect();
    if lineup.len() % 2 == 1 {
        lineup.push(None);
    }
    let size = lineup.len();
    let rounds_per_leg = size - 1;
    let legs = if double { 2 } else { 1 };
    let mut nodes = Vec::with_capacity(legs * rounds_per_leg * size / 2);

    for leg in 0..legs {
        let mut order = lineup.clone();
        for leg_round in 0..rounds_per_leg {
            let round = round_number(leg * rounds_per_leg + leg_round + 1);
            let mut position = 0;
            for idx in 0..size / 2 {
                let (mut home, mut away) = (order[idx], order[size - 1 - idx]);
                // The fixed entrant would otherwise be at home every round.
                if idx == 0 && leg_round % 2 == 1 {
                    std::mem::swap(&mut home, &mut away);
                }
                if leg == 1 {
                    std::mem::swap(&mut home, &mut away);
                }
                let (Some(home), Some(away)) = (home, away) else {
                    continue;
                };
                position += 1;
                let mut node = Node::new(code("RR", round, position), BracketSide::Group, round, position);
                node.team1 = Some(home);
                node.team2 = Some(away);
                node.status = NodeStatus::Pending;
                nodes.push(node);
            }
            order[1..].rotate_right(1);
        }
    }

    Ok(Bracket::new(Format::RoundRobin, best_of, seeds.to_vec(), nodes))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
const fn round_number(round: usize) -> i32 {
    round as i32
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::bracket::test_support::teams;

    fn pairings(bracket: &Bracket) -> Vec<(TeamId, TeamId)> {
        bracket
            .nodes
            .iter()
            .map(|n| (n.team1.unwrap(), n.team2.unwrap()))
            .collect()
    }

    #[test]
    fn every_pair_meets_once() {
        let bracket = round_robin(&teams(6), BestOf::ONE, false).unwrap();
        assert_eq!(bracket.nodes.len(), 15);
        assert_eq!(bracket.current_round(), 5);
        let unique: HashSet<_> = pairings(&bracket)
            .into_iter()
            .map(|(a, b)| (a.min(b), a.max(b)))
            .collect();
        assert_eq!(unique.len(), 15);
        assert!(bracket.nodes.iter().all(|n| n.status == NodeStatus::Pending));
    }

    #[test]
    fn odd_fields_sit_one_team_out_per_round() {
        let bracket = round_robin(&teams(5), BestOf::ONE, false).unwrap();
        assert_eq!(bracket.current_round(), 5);
        assert_eq!(bracket.nodes.len(), 10);
        for round in 1..=5 {
            let playing: HashSet<_> = bracket
                .nodes
                .iter()
                .filter(|n| n.round == round)
                .flat_map(|n| [n.team1, n.team2])
                .collect();
            assert_eq!(playing.len(), 4);
        }
    }

    #[test]
    fn double_round_robin_swaps_sides() {
        let bracket = round_robin(&teams(4), BestOf::THREE, true).unwrap();
        assert_eq!(bracket.nodes.len(), 12);
        let fixtures = pairings(&bracket);
        let (first_leg, second_leg) = fixtures.split_at(6);
        for (home, away) in first_leg {
            assert!(second_leg.contains(&(*away, *home)));
        }
        assert_eq!(bracket.node("RR_R4_M1").map(|n| n.round), Some(4));
    }

    #[test]
    fn home_games_alternate_for_fixed_entrant() {
        let bracket = round_robin(&teams(4), BestOf::ONE, false).unwrap();
        let first_seed_home: Vec<bool> = (1..=3)
            .map(|round| {
                bracket
                    .nodes
                    .iter()
                    .find(|n| n.round == round && (n.team1 == Some(101) || n.team2 == Some(101)))
                    .is_some_and(|n| n.team1 == Some(101))
            })
            .collect();
        assert_eq!(first_seed_home, vec![true, false, true]);
    }

    #[test]
    fn reset_keeps_fixtures() {
        let mut bracket = round_robin(&teams(4), BestOf::ONE, false).unwrap();
        let fresh = bracket.clone();
        bracket.report("RR_R1_M1", 1, 0).unwrap();
        assert!(bracket.report("RR_R1_M1", 1, 0).is_err());
        bracket.reset().unwrap();
        assert_eq!(bracket, fresh);
    }
}
