use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::Epoch;

pub trait RewardsHandler: Send + Sync {
    /// Share of a block's fees credited to its leader in `epoch`, in `[0, 1]`.
    fn leader_percentage_in_epoch(&self, epoch: Epoch) -> f64;
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaderPercentageConfig {
    pub epoch_enable: Epoch,
    pub leader_percentage: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    pub leader_percentages: Vec<LeaderPercentageConfig>,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            leader_percentages: vec![LeaderPercentageConfig {
                epoch_enable: 0,
                leader_percentage: 0.1,
            }],
        }
    }
}

impl RewardsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self
            .leader_percentages
            .iter()
            .any(|entry| entry.epoch_enable == 0)
        {
            return Err(ConfigError::invalid(
                "rewards.leader_percentages must contain an entry for epoch 0",
            ));
        }
        if self
            .leader_percentages
            .iter()
            .any(|entry| !(0.0..=1.0).contains(&entry.leader_percentage))
        {
            return Err(ConfigError::invalid(
                "rewards.leader_percentage values must lie within [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Leader fee share that changes at configured activation epochs.
#[derive(Clone, Debug)]
pub struct LeaderPercentageSchedule {
    entries: Vec<LeaderPercentageConfig>,
}

impl LeaderPercentageSchedule {
    pub fn new(config: &RewardsConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut entries = config.leader_percentages.clone();
        entries.sort_by_key(|entry| entry.epoch_enable);
        Ok(Self { entries })
    }
}

impl RewardsHandler for LeaderPercentageSchedule {
    fn leader_percentage_in_epoch(&self, epoch: Epoch) -> f64 {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.epoch_enable <= epoch)
            .map(|entry| entry.leader_percentage)
            .unwrap_or_default()
    }
}

/// `value * floor(percentage * 100) / 100` in integer arithmetic.
pub fn trimmed_percentage(value: u128, percentage: f64) -> u128 {
    let basis_points = (percentage * 100.0).floor().max(0.0) as u128;
    (value / 100)
        .saturating_mul(basis_points)
        .saturating_add((value % 100).saturating_mul(basis_points) / 100)
}

/// `floor(value * percentage)` through floating point.
pub fn approximate_percentage(value: u128, percentage: f64) -> u128 {
    (value as f64 * percentage).max(0.0) as u128
}
