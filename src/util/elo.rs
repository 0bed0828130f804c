//! Team and player ratings.

use serde::Serialize;
use utoipa::ToSchema;

/// Probability that a team rated `rating` beats one rated `opponent`.
#[must_use]
pub fn expected_score(rating: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - rating) / 400.0))
}

/// New ratings for winner and loser of a series.
///
/// Wider map margins move ratings further: the K factor is scaled by
/// `1 + 0.1 * map_difference`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn rate(winner: i32, loser: i32, map_difference: i32, k_factor: f64) -> (i32, i32) {
    let k = k_factor * (1.0 + 0.1 * f64::from(map_difference.max(0)));
    let winner_gain = k * (1.0 - expected_score(winner, loser));
    let loser_loss = k * expected_score(loser, winner);
    (
        (f64::from(winner) + winner_gain).round() as i32,
        (f64::from(loser) - loser_loss).round() as i32,
    )
}

/// Players never drop below the rating they start with.
pub const PLAYER_RATING_FLOOR: i32 = 1000;
/// Flat amount a player gains or loses per series.
pub const PLAYER_RATING_STEP: i32 = 10;

/// A player's rating after their team won or lost a series.
#[must_use]
pub fn player_rating(current: i32, won: bool) -> i32 {
    let moved = if won {
        current + PLAYER_RATING_STEP
    } else {
        current - PLAYER_RATING_STEP
    };
    moved.max(PLAYER_RATING_FLOOR)
}

/// Win chances of two teams, in percent with one decimal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub team_win_probability: f64,
    pub opponent_win_probability: f64,
}

impl Prediction {
    #[must_use]
    pub fn new(rating: i32, opponent: i32) -> Self {
        let chance = expected_score(rating, opponent);
        let percent = |p: f64| (p * 1000.0).round() / 10.0;
        Self {
            team_win_probability: percent(chance),
            opponent_win_probability: percent(1.0 - chance),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RankTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
    Grandmaster,
    Celestial,
    Eternity,
    OneAboveAll,
}

impl RankTier {
    const THRESHOLDS: [(i32, Self); 9] = [
        (5000, Self::OneAboveAll),
        (4600, Self::Eternity),
        (3700, Self::Celestial),
        (2800, Self::Grandmaster),
        (1900, Self::Diamond),
        (1000, Self::Platinum),
        (700, Self::Gold),
        (400, Self::Silver),
        (0, Self::Bronze),
    ];

    #[must_use]
    pub fn for_rating(rating: i32) -> Self {
        Self::THRESHOLDS
            .iter()
            .find(|(min, _)| rating >= *min)
            .map_or(Self::Bronze, |&(_, tier)| tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ratings_are_a_coin_flip() {
        assert!((expected_score(1000, 1000) - 0.5).abs() < f64::EPSILON);
        assert!(expected_score(1400, 1000) > 0.9);
    }

    #[test]
    fn even_match_moves_half_k() {
        assert_eq!(rate(1000, 1000, 0, 32.0), (1016, 984));
    }

    #[test]
    fn margin_scales_the_swing() {
        // 3-0 sweep: K = 32 * 1.3 = 41.6, half of it is 20.8.
        assert_eq!(rate(1000, 1000, 3, 32.0), (1021, 979));
    }

    #[test]
    fn upsets_move_more_than_expected_wins() {
        let (favourite, _) = rate(1400, 1000, 1, 32.0);
        let (underdog, _) = rate(1000, 1400, 1, 32.0);
        assert!(underdog - 1000 > favourite - 1400);
    }

    #[test]
    fn tiers_follow_thresholds() {
        assert_eq!(RankTier::for_rating(-20), RankTier::Bronze);
        assert_eq!(RankTier::for_rating(399), RankTier::Bronze);
        assert_eq!(RankTier::for_rating(400), RankTier::Silver);
        assert_eq!(RankTier::for_rating(1000), RankTier::Platinum);
        assert_eq!(RankTier::for_rating(2800), RankTier::Grandmaster);
        assert_eq!(RankTier::for_rating(5200), RankTier::OneAboveAll);
    }

    #[test]
    fn player_ratings_move_flat_and_stop_at_the_floor() {
        assert_eq!(player_rating(1000, true), 1010);
        assert_eq!(player_rating(1030, false), 1020);
        assert_eq!(player_rating(1005, false), PLAYER_RATING_FLOOR);
        assert_eq!(player_rating(PLAYER_RATING_FLOOR, false), PLAYER_RATING_FLOOR);
    }

    #[test]
    fn predictions_are_complementary_percentages() {
        let even = Prediction::new(1200, 1200);
        assert!((even.team_win_probability - 50.0).abs() < f64::EPSILON);
        assert!((even.opponent_win_probability - 50.0).abs() < f64::EPSILON);

        // 400 points ahead: 10 / 11 = 90.909..%
        let favourite = Prediction::new(1400, 1000);
        assert!((favourite.team_win_probability - 90.9).abs() < 1e-9);
        assert!((favourite.opponent_win_probability - 9.1).abs() < 1e-9);
    }
}
