use rand::seq::SliceRandom;
use serde::Deserialize;
use utoipa::ToSchema;

use super::TeamId;

/// How entrants get their seed numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SeedingMethod {
    /// Highest rating first.
    #[default]
    Rating,
    /// Seeds supplied by the organiser.
    Manual,
    Random,
    /// Rating tiers spread over the four quarters of the bracket.
    Balanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedCandidate {
    pub team_id: TeamId,
    pub rating: i32,
    pub seed: Option<u32>,
}

/// Orders entrants by seed, first seed first.
#[must_use]
pub fn seed(candidates: &[SeedCandidate], method: SeedingMethod) -> Vec<TeamId> {
    let mut ordered = candidates.to_vec();
    match method {
        SeedingMethod::Rating => by_rating(&mut ordered),
        SeedingMethod::Manual => {
            ordered.sort_by_key(|c| (c.seed.is_none(), c.seed, c.team_id));
        }
        SeedingMethod::Random => ordered.shuffle(&mut rand::rng()),
        SeedingMethod::Balanced => {
            by_rating(&mut ordered);
            ordered = balance(&ordered);
        }
    }
    ordered.into_iter().map(|c| c.team_id).collect()
}

fn by_rating(candidates: &mut [SeedCandidate]) {
    candidates.sort_by(|a, b| b.rating.cmp(&a.rating).then(a.team_id.cmp(&b.team_id)));
}

/// Splits a rating-sorted list into four tiers and deals them out round-robin,
/// so each run of four seeds holds one team from every tier.
fn balance(sorted: &[SeedCandidate]) -> Vec<SeedCandidate> {
    const TIERS: usize = 4;
    if sorted.len() < TIERS {
        return sorted.to_vec();
    }
    let tier_size = sorted.len().div_ceil(TIERS);
    let tiers: Vec<&[SeedCandidate]> = sorted.chunks(tier_size).collect();
    let mut out = Vec::with_capacity(sorted.len());
    for idx in 0..tier_size {
        out.extend(tiers.iter().filter_map(|tier| tier.get(idx)).copied());
    }
    out
}

/// Seed numbers (1-based) in bracket line order for a power-of-two `size`.
///
/// Adjacent pairs are first-round matches: `[1, 8, 4, 5, 2, 7, 3, 6]` for 8.
#[must_use]
pub fn bracket_order(size: usize) -> Vec<usize> {
    let mut order = vec![1];
    while order.len() < size {
        let total = order.len() * 2 + 1;
        order = order.iter().flat_map(|&s| [s, total - s]).collect();
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(team_id: TeamId, rating: i32, seed: Option<u32>) -> SeedCandidate {
        SeedCandidate {
            team_id,
            rating,
            seed,
        }
    }

    #[test]
    fn bracket_order_matches_classic_layout() {
        assert_eq!(bracket_order(1), vec![1]);
        assert_eq!(bracket_order(2), vec![1, 2]);
        assert_eq!(bracket_order(4), vec![1, 4, 2, 3]);
        assert_eq!(bracket_order(8), vec![1, 8, 4, 5, 2, 7, 3, 6]);
        assert_eq!(bracket_order(16).len(), 16);
        assert_eq!(bracket_order(16)[..4], [1, 16, 8, 9]);
    }

    #[test]
    fn rating_seeding_breaks_ties_by_id() {
        let teams = [
            candidate(3, 1200, None),
            candidate(1, 1500, None),
            candidate(2, 1200, None),
        ];
        assert_eq!(seed(&teams, SeedingMethod::Rating), vec![1, 2, 3]);
    }

    #[test]
    fn manual_seeding_puts_unseeded_last() {
        let teams = [
            candidate(1, 0, None),
            candidate(2, 0, Some(2)),
            candidate(3, 0, Some(1)),
        ];
        assert_eq!(seed(&teams, SeedingMethod::Manual), vec![3, 2, 1]);
    }

    #[test]
    fn random_seeding_keeps_everyone() {
        let teams: Vec<_> = (1..=10).map(|id| candidate(id, 1000, None)).collect();
        let mut seeded = seed(&teams, SeedingMethod::Random);
        seeded.sort_unstable();
        assert_eq!(seeded, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn balanced_seeding_interleaves_tiers() {
        let teams: Vec<_> = (1..=8).map(|id| candidate(id, 2000 - id * 10, None)).collect();
        assert_eq!(
            seed(&teams, SeedingMethod::Balanced),
            vec![1, 3, 5, 7, 2, 4, 6, 8]
        );
    }

    #[test]
    fn balanced_seeding_keeps_uneven_remainder() {
        let teams: Vec<_> = (1..=6).map(|id| candidate(id, 2000 - id * 10, None)).collect();
        let seeded = seed(&teams, SeedingMethod::Balanced);
        assert_eq!(seeded, vec![1, 3, 5, 2, 4, 6]);
    }
}
