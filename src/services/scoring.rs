use chrono::{DateTime, Utc};

/// Weighting constants. Passed explicitly so tests can override individual
/// knobs; every value is env-overridable through `Config::from_env`.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Minutes of playtime at which a linked player stops being discounted.
    pub active_playtime_cap_minutes: f64,
    /// Minutes after post creation during which a vote still affects score.
    pub vote_window_minutes: f64,
    /// Divisor base for repeat votes from one address on one post.
    pub same_ip_factor: f64,
    /// Additive smoothing for the voter/author bias ratio.
    pub target_bias_smoothing: f64,
    /// Trailing window the bias ratio is computed over.
    pub target_bias_window_days: i64,
    /// Rows per backfill commit.
    pub backfill_batch_size: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            active_playtime_cap_minutes: 48000.0,
            vote_window_minutes: 4320.0,
            same_ip_factor: 50.0,
            target_bias_smoothing: 5.0,
            target_bias_window_days: 7,
            backfill_batch_size: 100,
        }
    }
}

/// Snapshot of the database state a weight is computed from. Gathered by the
/// vote service inside the casting transaction, so the weight is
/// deterministic given this struct and the config.
#[derive(Debug, Clone)]
pub struct VoteSignals {
    /// The voter's current reputation.
    pub voter_score: f64,
    /// Total minutes the voter's linked player has spent on the game
    /// servers; None when the account has no linked player.
    pub playtime_minutes: Option<f64>,
    /// Minutes between post creation and this vote.
    pub vote_age_minutes: f64,
    /// Other voters' rows on this post from the same address, within the
    /// vote window.
    pub same_ip_votes: i64,
    /// Recent votes by this voter on this author's other posts.
    pub same_author_votes: i64,
    /// Recent votes by this voter on everyone else's posts.
    pub other_author_votes: i64,
}

/// Weight in (0, 1] from the voter's own standing. Negative reputation
/// shrinks it hyperbolically; a linked player below the playtime cap scales
/// it down proportionally.
pub fn reputation_weight(
    config: &ScoringConfig,
    voter_score: f64,
    playtime_minutes: Option<f64>,
) -> f64 {
    let mut weight = if voter_score < 0.0 {
        1.0 / (-voter_score + 1.0)
    } else {
        1.0
    };

    if let Some(minutes) = playtime_minutes {
        weight *= (minutes / config.active_playtime_cap_minutes).min(1.0);
    }

    weight
}

/// Linear decay from 1.0 at post creation to 0.0 at the window edge. Votes
/// beyond the window never affect score.
pub fn recency_weight(config: &ScoringConfig, vote_age_minutes: f64) -> f64 {
    1.0 - (vote_age_minutes / config.vote_window_minutes).clamp(0.0, 1.0)
}

/// Ballot-stuffing suppression: each additional vote on the post from the
/// same address divides the weight further.
pub fn same_ip_penalty(config: &ScoringConfig, same_ip_votes: i64) -> f64 {
    if same_ip_votes > 0 {
        1.0 / (config.same_ip_factor * same_ip_votes as f64)
    } else {
        1.0
    }
}

/// Suppresses a voter fixating on one author. The smoothing constant keeps
/// the ratio defined and lets a handful of votes through unpenalized.
pub fn target_bias_penalty(
    config: &ScoringConfig,
    same_author_votes: i64,
    other_author_votes: i64,
) -> f64 {
    let c = config.target_bias_smoothing;
    ((other_author_votes as f64 + c) / (same_author_votes as f64 + c)).min(1.0)
}

/// Product of all four factors, clamped to [0, 1]. This is the value frozen
/// into `computed_weight`.
pub fn compose(config: &ScoringConfig, signals: &VoteSignals) -> f64 {
    let weight = reputation_weight(config, signals.voter_score, signals.playtime_minutes)
        * recency_weight(config, signals.vote_age_minutes)
        * same_ip_penalty(config, signals.same_ip_votes)
        * target_bias_penalty(config, signals.same_author_votes, signals.other_author_votes);

    weight.clamp(0.0, 1.0)
}

/// Score delta for a value change on an already-weighted vote. The weight is
/// frozen at cast time, so a flip or retraction scales it rather than
/// re-evaluating anti-abuse state that has since moved on.
pub fn change_delta(computed_weight: f64, old_value: i16, new_value: i16) -> f64 {
    computed_weight * f64::from(new_value - old_value)
}

pub fn vote_age_minutes(vote_created: DateTime<Utc>, post_created: DateTime<Utc>) -> f64 {
    (vote_created - post_created).num_seconds() as f64 / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cfg() -> ScoringConfig {
        ScoringConfig::default()
    }

    fn neutral_signals() -> VoteSignals {
        VoteSignals {
            voter_score: 0.0,
            playtime_minutes: None,
            vote_age_minutes: 0.0,
            same_ip_votes: 0,
            same_author_votes: 0,
            other_author_votes: 0,
        }
    }

    #[test]
    fn reputation_weight_is_one_for_non_negative_score() {
        assert_eq!(reputation_weight(&cfg(), 0.0, None), 1.0);
        assert_eq!(reputation_weight(&cfg(), 12.5, None), 1.0);
    }

    #[test]
    fn negative_reputation_weighs_strictly_less() {
        let negative = reputation_weight(&cfg(), -3.0, None);
        let positive = reputation_weight(&cfg(), 3.0, None);
        assert!(negative < positive);
        assert_eq!(negative, 1.0 / 4.0);
    }

    #[test]
    fn deeper_negative_reputation_weighs_even_less() {
        assert!(reputation_weight(&cfg(), -10.0, None) < reputation_weight(&cfg(), -1.0, None));
    }

    #[test]
    fn playtime_scales_linked_players_up_to_the_cap() {
        let config = cfg();
        assert_eq!(
            reputation_weight(&config, 0.0, Some(24000.0)),
            0.5
        );
        // At or beyond the cap the factor saturates at 1.0
        assert_eq!(reputation_weight(&config, 0.0, Some(48000.0)), 1.0);
        assert_eq!(reputation_weight(&config, 0.0, Some(96000.0)), 1.0);
    }

    #[test]
    fn unlinked_players_take_no_playtime_penalty() {
        assert_eq!(reputation_weight(&cfg(), 0.0, None), 1.0);
    }

    #[test]
    fn recency_weight_bounds() {
        let config = cfg();
        assert_eq!(recency_weight(&config, 0.0), 1.0);
        assert_eq!(recency_weight(&config, config.vote_window_minutes), 0.0);
        assert_eq!(recency_weight(&config, config.vote_window_minutes * 2.0), 0.0);
    }

    #[test]
    fn recency_weight_is_monotonically_non_increasing() {
        let config = cfg();
        let mut previous = f64::INFINITY;
        for step in 0..=20 {
            let age = config.vote_window_minutes * step as f64 / 10.0;
            let weight = recency_weight(&config, age);
            assert!(weight <= previous, "increased at age {age}");
            previous = weight;
        }
    }

    #[test]
    fn same_ip_penalty_is_neutral_without_overlap() {
        assert_eq!(same_ip_penalty(&cfg(), 0), 1.0);
    }

    #[test]
    fn same_ip_penalty_shrinks_with_each_overlapping_vote() {
        let config = cfg();
        // Second vote from an address sees one prior vote, third sees two;
        // each successive vote is suppressed strictly harder.
        let second = same_ip_penalty(&config, 1);
        let third = same_ip_penalty(&config, 2);
        assert_eq!(second, 1.0 / 50.0);
        assert_eq!(third, 1.0 / 100.0);
        assert!(third < second);
        assert!(second < same_ip_penalty(&config, 0));
    }

    #[test]
    fn target_bias_penalty_is_capped_at_one() {
        // Voting widely never earns a bonus
        assert_eq!(target_bias_penalty(&cfg(), 0, 100), 1.0);
    }

    #[test]
    fn target_bias_penalty_shrinks_with_fixation() {
        let config = cfg();
        let balanced = target_bias_penalty(&config, 2, 2);
        let fixated = target_bias_penalty(&config, 20, 2);
        assert_eq!(balanced, 1.0);
        assert_eq!(fixated, 7.0 / 25.0);
        assert!(fixated < balanced);
    }

    #[test]
    fn compose_is_one_for_a_fresh_unremarkable_vote() {
        // score 0, no linked player, vote at post creation, no IP overlap,
        // no bias history
        assert_eq!(compose(&cfg(), &neutral_signals()), 1.0);
    }

    #[test]
    fn compose_multiplies_all_factors() {
        let config = cfg();
        let signals = VoteSignals {
            voter_score: -1.0,                                    // 0.5
            playtime_minutes: Some(24000.0),                      // 0.5
            vote_age_minutes: config.vote_window_minutes / 2.0,   // 0.5
            same_ip_votes: 1,                                     // 1/50
            same_author_votes: 0,
            other_author_votes: 0, // 1.0
        };
        let expected = 0.5 * 0.5 * 0.5 * (1.0 / 50.0);
        assert!((compose(&config, &signals) - expected).abs() < 1e-12);
    }

    #[test]
    fn compose_stays_within_unit_interval() {
        let signals = VoteSignals {
            voter_score: 1000.0,
            playtime_minutes: Some(1_000_000.0),
            ..neutral_signals()
        };
        let weight = compose(&cfg(), &signals);
        assert!((0.0..=1.0).contains(&weight));
    }

    #[test]
    fn expired_votes_compose_to_zero() {
        let config = cfg();
        let signals = VoteSignals {
            vote_age_minutes: config.vote_window_minutes + 1.0,
            ..neutral_signals()
        };
        assert_eq!(compose(&config, &signals), 0.0);
    }

    #[test]
    fn change_delta_scales_the_frozen_weight() {
        // +1 cast at weight 1.0, then flipped to -1
        assert_eq!(change_delta(1.0, 1, -1), -2.0);
        // retraction
        assert_eq!(change_delta(0.5, 1, 0), -0.5);
        // a zero weight contributes nothing regardless of the flip
        assert_eq!(change_delta(0.0, -1, 1), 0.0);
    }

    #[test]
    fn vote_age_is_measured_in_minutes_from_post_creation() {
        let post_created = Utc::now();
        let vote_created = post_created + Duration::minutes(90);
        assert_eq!(vote_age_minutes(vote_created, post_created), 90.0);
        assert_eq!(vote_age_minutes(post_created, post_created), 0.0);
    }

    #[test]
    fn incremental_deltas_converge_on_the_weighted_sum() {
        // Each voter's history: frozen weight, first cast, then value
        // changes applied through change_delta. The running score must land
        // on the closed-form sum of final_value * weight per voter.
        let histories: &[(f64, &[i16])] = &[
            (1.0, &[1, -1]),     // cast up, flip down
            (0.25, &[1, 0]),     // cast up, retract
            (0.02, &[-1]),       // cast down, never touched
            (0.8, &[1, -1, 1]),  // cast up, flip down, flip back
            (0.0, &[-1, 1]),     // zero weight contributes nothing
        ];

        let mut score = 0.0;
        for &(weight, values) in histories {
            let mut current = values[0];
            score += weight * f64::from(current); // fresh cast
            for &next in &values[1..] {
                score += change_delta(weight, current, next);
                current = next;
            }
        }

        let closed_form: f64 = histories
            .iter()
            .map(|&(weight, values)| weight * f64::from(*values.last().unwrap()))
            .sum();

        assert!((score - closed_form).abs() < 1e-9);
        // Concretely: -1.0 + 0.0 - 0.02 + 0.8 + 0.0
        assert!((score - (-0.22)).abs() < 1e-9);
    }
}
