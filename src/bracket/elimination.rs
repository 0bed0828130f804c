//! Single and double elimination trees.

use super::{
    seeding, validate_entrants, BestOf, Bracket, BracketError, BracketSide, Format, Link, Node,
    Slot, TeamId, GRAND_FINAL, GRAND_FINAL_RESET,
};

/// Node code such as `UB_R2_M1`.
#[must_use]
pub fn code(prefix: &str, round: i32, position: i32) -> String {
    format!("{prefix}_R{round}_M{position}")
}

/// Builds a single elimination bracket. Seeds beyond the team count are byes.
///
/// # Errors
/// Fails with fewer than two teams or a team entered twice.
pub fn single_elimination(seeds: &[TeamId], best_of: BestOf) -> Result<Bracket, BracketError> {
    validate_entrants(seeds, 2)?;
    let nodes = upper_tree("SE", BracketSide::Upper, seeds);
    let mut bracket = Bracket::new(Format::SingleElimination, best_of, seeds.to_vec(), nodes);
    bracket.resolve();
    Ok(bracket)
}

/// Builds a double elimination bracket: upper tree, lower tree, grand final and reset.
///
/// # Errors
/// Fails with fewer than two teams or a team entered twice.
pub fn double_elimination(seeds: &[TeamId], best_of: BestOf) -> Result<Bracket, BracketError> {
    validate_entrants(seeds, 2)?;
    let mut nodes = upper_tree("UB", BracketSide::Upper, seeds);
    let upper_rounds = upper_round_count(seeds.len());
    let lower_rounds = 2 * (upper_rounds - 1);

    for node in &mut nodes {
        node.loser_to = Some(upper_drop(node.round, node.position, lower_rounds));
        if node.round == upper_rounds {
            node.winner_to = Some(Link::new(GRAND_FINAL, Slot::Team1));
        }
    }

    let size = seeds.len().next_power_of_two();
    for round in 1..=lower_rounds {
        for position in 1..=lower_round_size(size, round) {
            let mut node = Node::new(code("LB", round, position), BracketSide::Lower, round, position);
            node.winner_to = Some(if round == lower_rounds {
                Link::new(GRAND_FINAL, Slot::Team2)
            } else if round % 2 == 1 {
                // Odd rounds keep their size, the next round brings in upper dropouts.
                Link::new(code("LB", round + 1, position), Slot::Team1)
            } else {
                Link::new(
                    code("LB", round + 1, (position + 1) / 2),
                    Slot::from_position(position),
                )
            });
            nodes.push(node);
        }
    }

    nodes.push(Node::new(GRAND_FINAL, BracketSide::GrandFinal, 1, 1));
    nodes.push(Node::new(GRAND_FINAL_RESET, BracketSide::GrandFinalReset, 2, 1));

    let mut bracket = Bracket::new(Format::DoubleElimination, best_of, seeds.to_vec(), nodes);
    bracket.resolve();
    Ok(bracket)
}

#[allow(clippy::cast_possible_wrap)]
fn upper_round_count(teams: usize) -> i32 {
    teams.next_power_of_two().trailing_zeros() as i32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn lower_round_size(size: usize, round: i32) -> i32 {
    (size >> ((round + 1) / 2 + 1)) as i32
}

/// Where the loser of an upper bracket match drops to.
fn upper_drop(round: i32, position: i32, lower_rounds: i32) -> Link {
    if lower_rounds == 0 {
        Link::new(GRAND_FINAL, Slot::Team2)
    } else if round == 1 {
        Link::new(code("LB", 1, (position + 1) / 2), Slot::from_position(position))
    } else {
        Link::new(code("LB", 2 * (round - 1), position), Slot::Team2)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn upper_tree(prefix: &str, side: BracketSide, seeds: &[TeamId]) -> Vec<Node> {
    let size = seeds.len().next_power_of_two();
    let rounds = upper_round_count(seeds.len());
    let order = seeding::bracket_order(size);
    let mut nodes = Vec::with_capacity(size - 1);

    for round in 1..=rounds {
        for position in 1..=(size >> round) as i32 {
            let mut node = Node::new(code(prefix, round, position), side, round, position);
            if round == 1 {
                let line = (position as usize - 1) * 2;
                node.team1 = seeds.get(order[line] - 1).copied();
                node.team2 = seeds.get(order[line + 1] - 1).copied();
            }
            if round < rounds {
                node.winner_to = Some(Link::new(
                    code(prefix, round + 1, (position + 1) / 2),
                    Slot::from_position(position),
                ));
            }
            nodes.push(node);
        }
    }
    nodes
}

/// Display name for a round, `total` being the number of rounds on that side.
#[must_use]
pub fn round_name(format: Format, side: BracketSide, round: i32, total: i32) -> String {
    match side {
        BracketSide::Upper if format == Format::DoubleElimination => match total - round {
            0 => "Upper Finals".to_owned(),
            1 => "Upper Semifinals".to_owned(),
            _ => format!("Upper Round {round}"),
        },
        BracketSide::Upper => match total - round {
            0 => "Finals".to_owned(),
            1 => "Semifinals".to_owned(),
            2 => "Quarterfinals".to_owned(),
            left => format!("Round of {}", 1_i64 << (left + 1).clamp(1, 62)),
        },
        BracketSide::Lower if round == total => "Lower Finals".to_owned(),
        BracketSide::Lower => format!("Lower Round {round}"),
        BracketSide::GrandFinal => "Grand Final".to_owned(),
        BracketSide::GrandFinalReset => "Grand Final Reset".to_owned(),
        BracketSide::Group => format!("Matchday {round}"),
        BracketSide::Swiss => format!("Swiss Round {round}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bracket::{test_support::teams, NodeStatus};

    fn node<'a>(bracket: &'a Bracket, code: &str) -> &'a Node {
        bracket.node(code).unwrap()
    }

    #[test]
    fn single_elimination_of_eight_pairs_by_seed() {
        let bracket = single_elimination(&teams(8), BestOf::THREE).unwrap();
        assert_eq!(bracket.nodes.len(), 7);
        let first = node(&bracket, "SE_R1_M1");
        assert_eq!((first.team1, first.team2), (Some(101), Some(108)));
        let fourth = node(&bracket, "SE_R1_M4");
        assert_eq!((fourth.team1, fourth.team2), (Some(103), Some(106)));
        assert_eq!(
            first.winner_to,
            Some(Link::new("SE_R2_M1", Slot::Team1))
        );
        assert_eq!(
            node(&bracket, "SE_R1_M2").winner_to,
            Some(Link::new("SE_R2_M1", Slot::Team2))
        );
        assert!(node(&bracket, "SE_R3_M1").winner_to.is_none());
        assert_eq!(bracket.ready().len(), 4);
    }

    #[test]
    fn single_elimination_gives_byes_to_top_seeds() {
        let bracket = single_elimination(&teams(6), BestOf::ONE).unwrap();
        let top = node(&bracket, "SE_R1_M1");
        assert_eq!(top.status, NodeStatus::Bye);
        assert_eq!(top.winner, Some(101));
        assert_eq!(node(&bracket, "SE_R2_M1").team1, Some(101));
        // Seed 2 also has a bye.
        assert_eq!(node(&bracket, "SE_R2_M2").team1, Some(102));
        assert_eq!(bracket.ready().len(), 2);
    }

    #[test]
    fn single_elimination_runs_to_a_champion() {
        let mut bracket = single_elimination(&teams(4), BestOf::THREE).unwrap();
        bracket.report("SE_R1_M1", 2, 0).unwrap();
        bracket.report("SE_R1_M2", 1, 2).unwrap();
        let finals = node(&bracket, "SE_R2_M1");
        assert_eq!((finals.team1, finals.team2), (Some(101), Some(103)));
        assert_eq!(finals.status, NodeStatus::Pending);
        assert!(!bracket.is_complete());

        let changes = bracket.report("SE_R2_M1", 0, 2).unwrap();
        assert_eq!(changes.touched, vec!["SE_R2_M1".to_owned()]);
        assert_eq!(bracket.champion(), Some(103));
        assert!(bracket.is_complete());
    }

    #[test]
    fn report_rejects_waiting_and_played_matches() {
        let mut bracket = single_elimination(&teams(4), BestOf::THREE).unwrap();
        assert_eq!(
            bracket.report("SE_R2_M1", 2, 0),
            Err(BracketError::NotReady("SE_R2_M1".to_owned()))
        );
        bracket.report("SE_R1_M1", 2, 1).unwrap();
        assert_eq!(
            bracket.report("SE_R1_M1", 2, 1),
            Err(BracketError::AlreadyDecided("SE_R1_M1".to_owned()))
        );
        assert!(matches!(
            bracket.report("SE_R1_M2", 1, 1),
            Err(BracketError::Series(_))
        ));
        assert_eq!(
            bracket.report("SE_R9_M1", 2, 0),
            Err(BracketError::UnknownMatch("SE_R9_M1".to_owned()))
        );
    }

    #[test]
    fn double_elimination_shape() {
        let bracket = double_elimination(&teams(8), BestOf::THREE).unwrap();
        let count = |side| bracket.nodes.iter().filter(|n| n.side == side).count();
        assert_eq!(count(BracketSide::Upper), 7);
        assert_eq!(count(BracketSide::Lower), 6);
        assert!(bracket.node(GRAND_FINAL).is_some());
        assert!(bracket.node(GRAND_FINAL_RESET).is_some());

        assert_eq!(
            node(&bracket, "UB_R1_M3").loser_to,
            Some(Link::new("LB_R1_M2", Slot::Team1))
        );
        assert_eq!(
            node(&bracket, "UB_R2_M2").loser_to,
            Some(Link::new("LB_R2_M2", Slot::Team2))
        );
        assert_eq!(
            node(&bracket, "UB_R3_M1").loser_to,
            Some(Link::new("LB_R4_M1", Slot::Team2))
        );
        assert_eq!(
            node(&bracket, "LB_R2_M2").winner_to,
            Some(Link::new("LB_R3_M1", Slot::Team2))
        );
        assert_eq!(
            node(&bracket, "LB_R4_M1").winner_to,
            Some(Link::new(GRAND_FINAL, Slot::Team2))
        );
    }

    fn play_four_team_double(final_score: (i32, i32)) -> Bracket {
        let mut bracket = double_elimination(&teams(4), BestOf::ONE).unwrap();
        bracket.report("UB_R1_M1", 1, 0).unwrap(); // 101 beats 104
        bracket.report("UB_R1_M2", 1, 0).unwrap(); // 102 beats 103
        bracket.report("LB_R1_M1", 0, 1).unwrap(); // 103 beats 104
        bracket.report("UB_R2_M1", 1, 0).unwrap(); // 101 beats 102
        let lower_final = node(&bracket, "LB_R2_M1");
        assert_eq!((lower_final.team1, lower_final.team2), (Some(103), Some(102)));
        bracket.report("LB_R2_M1", 0, 1).unwrap(); // 102 beats 103
        bracket
            .report(GRAND_FINAL, final_score.0, final_score.1)
            .unwrap();
        bracket
    }

    #[test]
    fn grand_final_won_by_upper_finalist_voids_reset() {
        let bracket = play_four_team_double((1, 0));
        assert_eq!(node(&bracket, GRAND_FINAL_RESET).status, NodeStatus::Void);
        assert_eq!(bracket.champion(), Some(101));
        assert!(bracket.is_complete());
    }

    #[test]
    fn grand_final_lost_by_upper_finalist_forces_reset() {
        let mut bracket = play_four_team_double((0, 1));
        let reset = node(&bracket, GRAND_FINAL_RESET);
        assert_eq!(reset.status, NodeStatus::Pending);
        assert_eq!((reset.team1, reset.team2), (Some(101), Some(102)));
        assert_eq!(bracket.champion(), None);

        bracket.report(GRAND_FINAL_RESET, 0, 1).unwrap();
        assert_eq!(bracket.champion(), Some(102));
    }

    #[test]
    fn double_elimination_byes_flow_into_lower_bracket() {
        let mut bracket = double_elimination(&teams(3), BestOf::ONE).unwrap();
        assert_eq!(node(&bracket, "UB_R1_M1").status, NodeStatus::Bye);
        assert_eq!(node(&bracket, "LB_R1_M1").status, NodeStatus::Waiting);

        bracket.report("UB_R1_M2", 1, 0).unwrap(); // 102 beats 103
        let lower = node(&bracket, "LB_R1_M1");
        assert_eq!(lower.status, NodeStatus::Bye);
        assert_eq!(lower.winner, Some(103));
        assert_eq!(node(&bracket, "LB_R2_M1").team1, Some(103));
    }

    #[test]
    fn two_team_double_elimination_goes_straight_to_grand_final() {
        let mut bracket = double_elimination(&teams(2), BestOf::ONE).unwrap();
        assert!(bracket.nodes.iter().all(|n| n.side != BracketSide::Lower));
        bracket.report("UB_R1_M1", 0, 1).unwrap();
        let grand_final = node(&bracket, GRAND_FINAL);
        assert_eq!((grand_final.team1, grand_final.team2), (Some(102), Some(101)));
    }

    #[test]
    fn reset_restores_first_round() {
        let mut bracket = single_elimination(&teams(4), BestOf::ONE).unwrap();
        let fresh = bracket.clone();
        bracket.report("SE_R1_M1", 1, 0).unwrap();
        let changes = bracket.reset().unwrap();
        assert_eq!(bracket, fresh);
        assert_eq!(changes.touched.len(), 2);
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn round_names() {
        let se = Format::SingleElimination;
        assert_eq!(round_name(se, BracketSide::Upper, 4, 4), "Finals");
        assert_eq!(round_name(se, BracketSide::Upper, 3, 4), "Semifinals");
        assert_eq!(round_name(se, BracketSide::Upper, 2, 4), "Quarterfinals");
        assert_eq!(round_name(se, BracketSide::Upper, 1, 4), "Round of 16");
        let de = Format::DoubleElimination;
        assert_eq!(round_name(de, BracketSide::Upper, 3, 3), "Upper Finals");
        assert_eq!(round_name(de, BracketSide::Lower, 3, 4), "Lower Round 3");
        assert_eq!(round_name(de, BracketSide::Lower, 4, 4), "Lower Finals");
    }
}
