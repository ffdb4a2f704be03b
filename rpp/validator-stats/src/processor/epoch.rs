use tracing::{debug, error, info};

use super::ValidatorStatisticsProcessor;
use crate::account::ListStatus;
use crate::coordinator::ValidatorsMap;
use crate::error::{ValidatorStatsError, ValidatorStatsResult};
use crate::flags::EnableEpochFlag;
use crate::store::AccountStore;
use crate::validator_info::{ShardValidatorsInfoMap, ValidatorInfo};
use crate::{Epoch, ShardId};

impl<S: AccountStore> ValidatorStatisticsProcessor<S> {
    /// Mirror the nodes coordinator lists of `epoch` into the peer accounts.
    ///
    /// Returns `true` when a validator that had been marked leaving shows up
    /// again in the eligible or waiting list, which forces the caller to
    /// rebuild its view of the shards.
    pub fn save_nodes_coordinator_updates(&mut self, epoch: Epoch) -> ValidatorStatsResult<bool> {
        self.status.record_epoch(epoch);
        match self.save_nodes_coordinator_lists(epoch) {
            Ok(forced) => {
                info!(epoch, forced, "saved nodes coordinator updates");
                Ok(forced)
            }
            Err(err) => {
                error!(epoch, %err, "could not update info from nodes coordinator");
                Err(err)
            }
        }
    }

    fn save_nodes_coordinator_lists(&mut self, epoch: Epoch) -> ValidatorStatsResult<bool> {
        let mut forced = false;

        let eligible = self.nodes_coordinator.eligible_validators(epoch)?;
        forced |= self.save_updates_for_nodes_map(&eligible, ListStatus::Eligible)?;

        let waiting = self.nodes_coordinator.waiting_validators(epoch)?;
        forced |= self.save_updates_for_nodes_map(&waiting, ListStatus::Waiting)?;

        let leaving = self.nodes_coordinator.leaving_validators(epoch)?;
        forced |= self.save_updates_for_nodes_map(&leaving, ListStatus::Inactive)?;

        if self.is_enabled(EnableEpochFlag::StakingV4Step2) {
            let auction = self
                .nodes_coordinator
                .shuffled_out_to_auction_validators(epoch)?;
            forced |= self.save_updates_for_nodes_map(&auction, ListStatus::Auction)?;
        }

        Ok(forced)
    }

    fn save_updates_for_nodes_map(
        &mut self,
        map: &ValidatorsMap,
        peer_type: ListStatus,
    ) -> ValidatorStatsResult<bool> {
        let mut forced = false;
        for shard_id in self.shard_order() {
            if let Some(pub_keys) = map.get(&shard_id) {
                forced |= self.save_updates_for_list(pub_keys, shard_id, peer_type)?;
            }
        }
        Ok(forced)
    }

    fn save_updates_for_list(
        &mut self,
        pub_keys: &[Vec<u8>],
        shard_id: ShardId,
        peer_type: ListStatus,
    ) -> ValidatorStatsResult<bool> {
        let mut forced = false;
        let staking_v4 = self.is_enabled(EnableEpochFlag::StakingV4Started);
        let switch_jail = self.is_enabled(EnableEpochFlag::SwitchJailWaiting);

        for (index, pub_key) in pub_keys.iter().enumerate() {
            let index = index as u32;
            let mut account = self.store.load_account(pub_key)?;

            let is_node_leaving = matches!(peer_type, ListStatus::Eligible | ListStatus::Waiting)
                && account.list() == ListStatus::Leaving;
            let is_jailed = switch_jail
                && peer_type == ListStatus::Inactive
                && self.jailer().is_low_rating(&account);

            if is_jailed {
                account.set_list_and_index(shard_id, ListStatus::Jailed, index, staking_v4);
            } else if is_node_leaving {
                account.set_list_and_index(shard_id, ListStatus::Leaving, index, staking_v4);
                if staking_v4 {
                    account.set_previous_list(peer_type);
                }
            } else {
                account.set_list_and_index(shard_id, peer_type, index, staking_v4);
            }
            self.store.save_account(&account)?;

            if is_node_leaving {
                debug!(
                    pub_key = %hex::encode(pub_key),
                    shard = shard_id,
                    list = %peer_type,
                    "leaving validator still listed by nodes coordinator"
                );
            }
            forced |= is_node_leaving;
        }
        Ok(forced)
    }

    /// Clear per-epoch counters of every validator in `infos` and carry over
    /// jailed statuses. Applying the same snapshot twice changes nothing.
    pub fn reset_validator_statistics_at_new_epoch(
        &mut self,
        infos: &ShardValidatorsInfoMap,
    ) -> ValidatorStatsResult<()> {
        for info in infos.all() {
            let mut account = self.store.load_account(&info.public_key)?;
            account.reset_at_new_epoch();
            self.jailer().set_to_jailed_if_needed(&mut account, info);
            self.store.save_account(&account)?;
        }
        debug!(validators = infos.len(), "reset validator statistics for new epoch");
        Ok(())
    }

    /// Penalize validators that signed too small a share of the blocks they
    /// were selected for during the epoch ending before `epoch`. Temp ratings
    /// in `infos` are updated alongside the accounts.
    pub fn process_ratings_end_of_epoch(
        &mut self,
        infos: &mut ShardValidatorsInfoMap,
        epoch: Epoch,
    ) -> ValidatorStatsResult<()> {
        if infos.is_empty() {
            return Err(ValidatorStatsError::EmptyValidatorSnapshot);
        }
        let epoch = epoch.saturating_sub(1);
        if epoch < self.rating_enable_epoch {
            return Ok(());
        }
        if self.is_enabled_in_epoch(EnableEpochFlag::FullConsensus, epoch) {
            return Ok(());
        }

        let staking_v2 = self.is_enabled(EnableEpochFlag::StakingV2AfterEpoch);
        let threshold = self.rater.signed_blocks_threshold();
        for (shard_id, validators) in infos.shards_mut() {
            for info in validators.iter_mut() {
                let rated = info.list == ListStatus::Eligible
                    || (staking_v2 && info.was_leaving_eligible_in_current_epoch());
                if !rated {
                    continue;
                }
                self.verify_signatures_below_signed_threshold(info, threshold, shard_id)?;
            }
        }
        Ok(())
    }

    fn verify_signatures_below_signed_threshold(
        &mut self,
        info: &mut ValidatorInfo,
        threshold: f32,
        shard_id: ShardId,
    ) -> ValidatorStatsResult<()> {
        let success = u64::from(info.validator_success);
        let failure = u64::from(info.validator_failure);
        let ignored = u64::from(info.validator_ignored_signatures);
        let occurrences = (success + failure + ignored).max(1);
        let signed_fraction = success as f32 / occurrences as f32;
        if signed_fraction > threshold {
            return Ok(());
        }

        let times = if self.is_enabled(EnableEpochFlag::BelowSignedThreshold) {
            info.validator_success
                .saturating_add(info.validator_ignored_signatures)
        } else {
            info.validator_failure
        };
        let rating = self
            .rater
            .revert_increase_validator(shard_id, info.temp_rating, times);

        let mut account = self.store.load_account(&info.public_key)?;
        account.set_temp_rating(rating);
        self.jailer().jail_if_bad_rating_and_inactive(&mut account);
        self.store.save_account(&account)?;

        debug!(
            pub_key = %hex::encode(&info.public_key),
            signed_fraction,
            threshold,
            times,
            previous_rating = info.temp_rating,
            rating,
            "validator signed below threshold"
        );
        info.temp_rating = rating;
        Ok(())
    }
}
