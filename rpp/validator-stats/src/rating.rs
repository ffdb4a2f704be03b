use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::{ShardId, METACHAIN_SHARD_ID};

/// Rating arithmetic consumed by the statistics processor.
///
/// Every operation is pure and clamps its result into the configured
/// `[min_rating, max_rating]` range. Increases never lower a rating and
/// decreases never raise one.
pub trait RatingModel: Send + Sync {
    /// Selection chance (percent) of a validator holding `rating`.
    fn get_chance(&self, rating: u32) -> u32;

    fn start_rating(&self) -> u32;

    fn signed_blocks_threshold(&self) -> f32;

    fn compute_increase_proposer(&self, shard_id: ShardId, rating: u32) -> u32;

    /// Decrease applied to a proposer that already missed
    /// `consecutive_misses` blocks in a row; the step grows with the streak.
    fn compute_decrease_proposer(
        &self,
        shard_id: ShardId,
        rating: u32,
        consecutive_misses: u32,
    ) -> u32;

    /// Undo `times` validator increases, used when a validator signed too
    /// few blocks over an epoch.
    fn revert_increase_validator(&self, shard_id: ShardId, rating: u32, times: u32) -> u32;

    fn compute_increase_validator(&self, shard_id: ShardId, rating: u32) -> u32;

    fn compute_decrease_validator(&self, shard_id: ShardId, rating: u32) -> u32;
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectionChance {
    pub max_threshold: u32,
    pub chance_percent: u32,
}

/// Rating steps of one chain (shards or metachain).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingStepConfig {
    pub proposer_increase_rating_step: i32,
    pub proposer_decrease_rating_step: i32,
    pub validator_increase_rating_step: i32,
    pub validator_decrease_rating_step: i32,
    pub consecutive_missed_blocks_penalty: f32,
}

impl Default for RatingStepConfig {
    fn default() -> Self {
        Self {
            proposer_increase_rating_step: 1_929,
            proposer_decrease_rating_step: -3_858,
            validator_increase_rating_step: 31,
            validator_decrease_rating_step: -4,
            consecutive_missed_blocks_penalty: 1.5,
        }
    }
}

impl RatingStepConfig {
    fn validate(&self, chain: &str) -> Result<(), ConfigError> {
        if self.proposer_increase_rating_step <= 0 || self.validator_increase_rating_step <= 0 {
            return Err(ConfigError::invalid(format!(
                "ratings.{chain}: increase steps must be positive"
            )));
        }
        if self.proposer_decrease_rating_step >= 0 || self.validator_decrease_rating_step >= 0 {
            return Err(ConfigError::invalid(format!(
                "ratings.{chain}: decrease steps must be negative"
            )));
        }
        if !self.consecutive_missed_blocks_penalty.is_finite()
            || self.consecutive_missed_blocks_penalty < 1.0
        {
            return Err(ConfigError::invalid(format!(
                "ratings.{chain}: consecutive_missed_blocks_penalty must be at least 1"
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingsConfig {
    pub start_rating: u32,
    pub min_rating: u32,
    pub max_rating: u32,
    pub signed_blocks_threshold: f32,
    pub selection_chances: Vec<SelectionChance>,
    pub shard_chain: RatingStepConfig,
    pub metachain: RatingStepConfig,
}

impl Default for RatingsConfig {
    fn default() -> Self {
        Self {
            start_rating: 5_000_001,
            min_rating: 1,
            max_rating: 10_000_000,
            signed_blocks_threshold: 0.01,
            selection_chances: vec![
                SelectionChance { max_threshold: 0, chance_percent: 5 },
                SelectionChance { max_threshold: 1_000_000, chance_percent: 0 },
                SelectionChance { max_threshold: 2_000_000, chance_percent: 16 },
                SelectionChance { max_threshold: 3_000_000, chance_percent: 17 },
                SelectionChance { max_threshold: 4_000_000, chance_percent: 18 },
                SelectionChance { max_threshold: 5_000_000, chance_percent: 19 },
                SelectionChance { max_threshold: 6_000_000, chance_percent: 20 },
                SelectionChance { max_threshold: 7_000_000, chance_percent: 21 },
                SelectionChance { max_threshold: 8_000_000, chance_percent: 22 },
                SelectionChance { max_threshold: 9_000_000, chance_percent: 23 },
                SelectionChance { max_threshold: 10_000_000, chance_percent: 24 },
            ],
            shard_chain: RatingStepConfig::default(),
            metachain: RatingStepConfig {
                proposer_increase_rating_step: 1_500,
                proposer_decrease_rating_step: -3_000,
                validator_increase_rating_step: 100,
                validator_decrease_rating_step: -4,
                consecutive_missed_blocks_penalty: 1.5,
            },
        }
    }
}

impl RatingsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_rating == 0 {
            return Err(ConfigError::invalid("ratings.min_rating must be at least 1"));
        }
        if self.min_rating > self.max_rating {
            return Err(ConfigError::invalid(
                "ratings.min_rating must not exceed ratings.max_rating",
            ));
        }
        if self.start_rating < self.min_rating || self.start_rating > self.max_rating {
            return Err(ConfigError::invalid(
                "ratings.start_rating must lie within [min_rating, max_rating]",
            ));
        }
        if !(0.0..=1.0).contains(&self.signed_blocks_threshold) {
            return Err(ConfigError::invalid(
                "ratings.signed_blocks_threshold must lie within [0, 1]",
            ));
        }
        let chances = sorted_chances(&self.selection_chances);
        match chances.last() {
            None => return Err(ConfigError::invalid("ratings.selection_chances is empty")),
            Some(last) if last.max_threshold != self.max_rating => {
                return Err(ConfigError::invalid(
                    "ratings.selection_chances must end at max_rating",
                ))
            }
            Some(_) => {}
        }
        if chances
            .windows(2)
            .any(|pair| pair[0].max_threshold == pair[1].max_threshold)
        {
            return Err(ConfigError::invalid(
                "ratings.selection_chances thresholds must be distinct",
            ));
        }
        if chance_for(&chances, self.start_rating) == 0 {
            return Err(ConfigError::invalid(
                "ratings.start_rating must map to a non-zero selection chance",
            ));
        }
        self.shard_chain.validate("shard_chain")?;
        self.metachain.validate("metachain")?;
        Ok(())
    }
}

fn sorted_chances(chances: &[SelectionChance]) -> Vec<SelectionChance> {
    let mut sorted = chances.to_vec();
    sorted.sort_by_key(|chance| chance.max_threshold);
    sorted
}

fn chance_for(sorted: &[SelectionChance], rating: u32) -> u32 {
    sorted
        .iter()
        .find(|chance| chance.max_threshold >= rating)
        .or_else(|| sorted.last())
        .map(|chance| chance.chance_percent)
        .unwrap_or_default()
}

/// Multiply `base` by `penalty` once per consecutive miss, saturating at
/// `i32::MIN`.
fn accelerated_decrease(base: i32, penalty: f32, consecutive_misses: u32) -> i64 {
    let floor = f64::from(i32::MIN);
    let mut step = f64::from(base);
    if penalty > 1.0 {
        let penalty = f64::from(penalty);
        for _ in 0..consecutive_misses {
            step *= penalty;
            if step <= floor {
                return i64::from(i32::MIN);
            }
        }
    }
    step as i64
}

/// Step-based rater. Shard and metachain validators use separate step tables.
#[derive(Clone, Debug)]
pub struct BlockSigningRater {
    start_rating: u32,
    min_rating: u32,
    max_rating: u32,
    signed_blocks_threshold: f32,
    shard_chain: RatingStepConfig,
    metachain: RatingStepConfig,
    chances: Vec<SelectionChance>,
}

impl BlockSigningRater {
    pub fn new(config: &RatingsConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            start_rating: config.start_rating,
            min_rating: config.min_rating,
            max_rating: config.max_rating,
            signed_blocks_threshold: config.signed_blocks_threshold,
            shard_chain: config.shard_chain,
            metachain: config.metachain,
            chances: sorted_chances(&config.selection_chances),
        })
    }

    pub fn min_rating(&self) -> u32 {
        self.min_rating
    }

    pub fn max_rating(&self) -> u32 {
        self.max_rating
    }

    fn steps(&self, shard_id: ShardId) -> &RatingStepConfig {
        if shard_id == METACHAIN_SHARD_ID {
            &self.metachain
        } else {
            &self.shard_chain
        }
    }

    fn compute_rating(&self, rating: u32, step: i64) -> u32 {
        let next = i64::from(rating).saturating_add(step);
        next.clamp(i64::from(self.min_rating), i64::from(self.max_rating)) as u32
    }
}

impl RatingModel for BlockSigningRater {
    fn get_chance(&self, rating: u32) -> u32 {
        chance_for(&self.chances, rating)
    }

    fn start_rating(&self) -> u32 {
        self.start_rating
    }

    fn signed_blocks_threshold(&self) -> f32 {
        self.signed_blocks_threshold
    }

    fn compute_increase_proposer(&self, shard_id: ShardId, rating: u32) -> u32 {
        let step = self.steps(shard_id).proposer_increase_rating_step;
        self.compute_rating(rating, i64::from(step))
    }

    fn compute_decrease_proposer(
        &self,
        shard_id: ShardId,
        rating: u32,
        consecutive_misses: u32,
    ) -> u32 {
        let steps = self.steps(shard_id);
        let step = accelerated_decrease(
            steps.proposer_decrease_rating_step,
            steps.consecutive_missed_blocks_penalty,
            consecutive_misses,
        );
        self.compute_rating(rating, step)
    }

    fn revert_increase_validator(&self, shard_id: ShardId, rating: u32, times: u32) -> u32 {
        if times == 0 {
            return rating;
        }
        let step = i64::from(self.steps(shard_id).validator_increase_rating_step)
            .saturating_mul(i64::from(times));
        self.compute_rating(rating, -step)
    }

    fn compute_increase_validator(&self, shard_id: ShardId, rating: u32) -> u32 {
        let step = self.steps(shard_id).validator_increase_rating_step;
        self.compute_rating(rating, i64::from(step))
    }

    fn compute_decrease_validator(&self, shard_id: ShardId, rating: u32) -> u32 {
        let step = self.steps(shard_id).validator_decrease_rating_step;
        self.compute_rating(rating, i64::from(step))
    }
}
