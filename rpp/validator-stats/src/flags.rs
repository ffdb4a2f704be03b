use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Epoch;

/// Behaviour switches gated by activation epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnableEpochFlag {
    /// Inactive validators with a low rating are jailed and the stored list
    /// is reported as is.
    SwitchJailWaiting,
    /// Active strictly after its configured epoch. Enables trimmed fee
    /// percentages and rates validators that left from the eligible list.
    StakingV2AfterEpoch,
    /// Count signed blocks instead of failures when reverting ratings below
    /// the signed-blocks threshold.
    BelowSignedThreshold,
    /// List changes remember the previous list and index.
    StakingV4Started,
    /// Shuffled-out validators move to the auction list.
    StakingV4Step2,
    /// Long stretches of missed rounds no longer decrease ratings.
    StopDecreasingValidatorRatingWhenStuck,
    /// Every group member signs; bitmaps are synthesized as fully set.
    FullConsensus,
}

impl EnableEpochFlag {
    pub const ALL: [EnableEpochFlag; 7] = [
        EnableEpochFlag::SwitchJailWaiting,
        EnableEpochFlag::StakingV2AfterEpoch,
        EnableEpochFlag::BelowSignedThreshold,
        EnableEpochFlag::StakingV4Started,
        EnableEpochFlag::StakingV4Step2,
        EnableEpochFlag::StopDecreasingValidatorRatingWhenStuck,
        EnableEpochFlag::FullConsensus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EnableEpochFlag::SwitchJailWaiting => "switch_jail_waiting",
            EnableEpochFlag::StakingV2AfterEpoch => "staking_v2_after_epoch",
            EnableEpochFlag::BelowSignedThreshold => "below_signed_threshold",
            EnableEpochFlag::StakingV4Started => "staking_v4_started",
            EnableEpochFlag::StakingV4Step2 => "staking_v4_step2",
            EnableEpochFlag::StopDecreasingValidatorRatingWhenStuck => {
                "stop_decreasing_validator_rating_when_stuck"
            }
            EnableEpochFlag::FullConsensus => "full_consensus",
        }
    }
}

impl fmt::Display for EnableEpochFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait EnableEpochsHandler: Send + Sync {
    /// Whether `flag` is active in the currently confirmed epoch.
    fn is_flag_enabled(&self, flag: EnableEpochFlag) -> bool;

    fn is_flag_enabled_in_epoch(&self, flag: EnableEpochFlag, epoch: Epoch) -> bool;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnableEpochsConfig {
    pub switch_jail_waiting_enable_epoch: Epoch,
    pub staking_v2_enable_epoch: Epoch,
    pub below_signed_threshold_enable_epoch: Epoch,
    pub staking_v4_step1_enable_epoch: Epoch,
    pub staking_v4_step2_enable_epoch: Epoch,
    pub stop_decreasing_validator_rating_when_stuck_enable_epoch: Epoch,
    pub full_consensus_enable_epoch: Epoch,
}

impl Default for EnableEpochsConfig {
    fn default() -> Self {
        Self {
            switch_jail_waiting_enable_epoch: 0,
            staking_v2_enable_epoch: 0,
            below_signed_threshold_enable_epoch: 0,
            staking_v4_step1_enable_epoch: Epoch::MAX,
            staking_v4_step2_enable_epoch: Epoch::MAX,
            stop_decreasing_validator_rating_when_stuck_enable_epoch: 0,
            full_consensus_enable_epoch: Epoch::MAX,
        }
    }
}

impl EnableEpochsConfig {
    /// Every flag active from genesis.
    pub fn all_enabled() -> Self {
        Self {
            switch_jail_waiting_enable_epoch: 0,
            staking_v2_enable_epoch: 0,
            below_signed_threshold_enable_epoch: 0,
            staking_v4_step1_enable_epoch: 0,
            staking_v4_step2_enable_epoch: 0,
            stop_decreasing_validator_rating_when_stuck_enable_epoch: 0,
            full_consensus_enable_epoch: 0,
        }
    }

    /// Every flag disabled.
    pub fn all_disabled() -> Self {
        Self {
            switch_jail_waiting_enable_epoch: Epoch::MAX,
            staking_v2_enable_epoch: Epoch::MAX,
            below_signed_threshold_enable_epoch: Epoch::MAX,
            staking_v4_step1_enable_epoch: Epoch::MAX,
            staking_v4_step2_enable_epoch: Epoch::MAX,
            stop_decreasing_validator_rating_when_stuck_enable_epoch: Epoch::MAX,
            full_consensus_enable_epoch: Epoch::MAX,
        }
    }

    pub fn activation_epoch(&self, flag: EnableEpochFlag) -> Epoch {
        match flag {
            EnableEpochFlag::SwitchJailWaiting => self.switch_jail_waiting_enable_epoch,
            EnableEpochFlag::StakingV2AfterEpoch => self.staking_v2_enable_epoch,
            EnableEpochFlag::BelowSignedThreshold => self.below_signed_threshold_enable_epoch,
            EnableEpochFlag::StakingV4Started => self.staking_v4_step1_enable_epoch,
            EnableEpochFlag::StakingV4Step2 => self.staking_v4_step2_enable_epoch,
            EnableEpochFlag::StopDecreasingValidatorRatingWhenStuck => {
                self.stop_decreasing_validator_rating_when_stuck_enable_epoch
            }
            EnableEpochFlag::FullConsensus => self.full_consensus_enable_epoch,
        }
    }
}

/// Epoch-gated flags driven by the epoch confirmed through
/// [`EnableEpochs::epoch_confirmed`].
#[derive(Debug)]
pub struct EnableEpochs {
    config: EnableEpochsConfig,
    current_epoch: RwLock<Epoch>,
}

impl EnableEpochs {
    pub fn new(config: EnableEpochsConfig) -> Self {
        Self {
            config,
            current_epoch: RwLock::new(0),
        }
    }

    pub fn config(&self) -> &EnableEpochsConfig {
        &self.config
    }

    pub fn epoch_confirmed(&self, epoch: Epoch) {
        let mut current = self.current_epoch.write();
        if *current != epoch {
            debug!(epoch, "enable epochs handler confirmed epoch");
        }
        *current = epoch;
    }

    pub fn current_epoch(&self) -> Epoch {
        *self.current_epoch.read()
    }
}

impl EnableEpochsHandler for EnableEpochs {
    fn is_flag_enabled(&self, flag: EnableEpochFlag) -> bool {
        self.is_flag_enabled_in_epoch(flag, self.current_epoch())
    }

    fn is_flag_enabled_in_epoch(&self, flag: EnableEpochFlag, epoch: Epoch) -> bool {
        let activation = self.config.activation_epoch(flag);
        match flag {
            EnableEpochFlag::StakingV2AfterEpoch => epoch > activation,
            _ => epoch >= activation,
        }
    }
}
