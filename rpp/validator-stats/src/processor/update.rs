use tracing::{debug, trace, warn};

use super::{ValidatorStatisticsProcessor, FAILURES_METRIC, MISSED_ROUNDS_METRIC};
use crate::coordinator::ConsensusGroup;
use crate::error::{ValidatorStatsError, ValidatorStatsResult};
use crate::flags::EnableEpochFlag;
use crate::header::{
    compute_epoch, Header, HeaderCache, HeaderHandler, MetaHeader, ShardData, ShardHeader,
};
use crate::rewards::{approximate_percentage, trimmed_percentage};
use crate::store::{AccountStore, RootHash};
use crate::{Epoch, ShardId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SigningAction {
    LeaderSuccess,
    LeaderFail,
    ValidatorSuccess,
    ValidatorIgnoredSignature,
}

impl SigningAction {
    fn classify(is_leader: bool, signed: bool) -> Self {
        match (is_leader, signed) {
            (true, true) => SigningAction::LeaderSuccess,
            (true, false) => SigningAction::LeaderFail,
            (false, true) => SigningAction::ValidatorSuccess,
            (false, false) => SigningAction::ValidatorIgnoredSignature,
        }
    }
}

/// Bit `index` of a signature bitmap; bits past the end read as unsigned.
fn is_signed(bitmap: &[u8], index: usize) -> bool {
    bitmap
        .get(index / 8)
        .map_or(false, |byte| byte & (1 << (index % 8)) != 0)
}

/// Bitmap with the first `size` bits set.
fn full_consensus_bitmap(size: usize) -> Vec<u8> {
    let mut bitmap = vec![0u8; size / 8 + 1];
    for index in 0..size {
        bitmap[index / 8] |= 1 << (index % 8);
    }
    bitmap
}

/// Shard block being credited, borrowed from either a notarized
/// [`ShardData`] or a standalone [`ShardHeader`].
struct ShardBlock<'a> {
    shard_id: ShardId,
    nonce: u64,
    round: u64,
    epoch: Epoch,
    prev_hash: &'a [u8],
    prev_rand_seed: &'a [u8],
    pub_keys_bitmap: &'a [u8],
    fees: u128,
}

impl<'a> From<&'a ShardData> for ShardBlock<'a> {
    fn from(data: &'a ShardData) -> Self {
        Self {
            shard_id: data.shard_id,
            nonce: data.nonce,
            round: data.round,
            epoch: data.epoch,
            prev_hash: &data.prev_hash,
            prev_rand_seed: &data.prev_rand_seed,
            pub_keys_bitmap: &data.pub_keys_bitmap,
            fees: data.accumulated_fees.saturating_sub(data.developer_fees),
        }
    }
}

impl<'a> From<&'a ShardHeader> for ShardBlock<'a> {
    fn from(header: &'a ShardHeader) -> Self {
        Self {
            shard_id: header.shard_id,
            nonce: header.nonce,
            round: header.round,
            epoch: header.epoch,
            prev_hash: &header.prev_hash,
            prev_rand_seed: &header.prev_rand_seed,
            pub_keys_bitmap: &header.pub_keys_bitmap,
            fees: header.accumulated_fees.saturating_sub(header.developer_fees),
        }
    }
}

fn lookup_header<'c>(
    cache: &'c HeaderCache,
    hash: &[u8],
    round: u64,
    nonce: u64,
) -> ValidatorStatsResult<&'c Header> {
    cache
        .get(hash)
        .ok_or_else(|| ValidatorStatsError::MissingAncestorHeader {
            hash: hex::encode(hash),
            round,
            nonce,
        })
}

impl<S: AccountStore> ValidatorStatisticsProcessor<S> {
    /// Apply `header` to the peer accounts and return the resulting root.
    ///
    /// On error every mutation made by the call is rolled back and the root
    /// is left as it was before the call.
    pub fn update_peer_state(
        &mut self,
        header: &Header,
        cache: &HeaderCache,
    ) -> ValidatorStatsResult<RootHash> {
        if header.nonce() == self.genesis_nonce {
            return self.root_hash();
        }
        self.missed_blocks_counters.reset();
        let snapshot = self.store.journal_len();

        let result = match header {
            Header::Meta(meta) => self.update_meta_peer_state(meta, cache),
            Header::Shard(shard) => self.update_shard_peer_state(shard, cache),
        };
        match result {
            Ok(()) => {
                self.status.record_processed_header();
                let root = self.root_hash()?;
                debug!(
                    nonce = header.nonce(),
                    round = header.round(),
                    shard = header.shard_id(),
                    root = %hex::encode(root),
                    "updated peer state"
                );
                Ok(root)
            }
            Err(err) => {
                self.missed_blocks_counters.reset();
                metrics::counter!(FAILURES_METRIC, "reason" => err.reason()).increment(1);
                warn!(
                    nonce = header.nonce(),
                    round = header.round(),
                    %err,
                    "peer state update rejected"
                );
                self.store.revert_to_snapshot(snapshot)?;
                Err(err)
            }
        }
    }

    fn update_meta_peer_state(
        &mut self,
        header: &MetaHeader,
        cache: &HeaderCache,
    ) -> ValidatorStatsResult<()> {
        let previous = lookup_header(cache, &header.prev_hash, header.round, header.nonce)?;

        self.check_for_missed_blocks(
            header.round,
            previous.round(),
            previous.rand_seed(),
            previous.shard_id(),
            compute_epoch(header),
        )?;

        for shard_data in &header.shard_info {
            if shard_data.nonce == self.genesis_nonce {
                continue;
            }
            let current = lookup_header(
                cache,
                &shard_data.header_hash,
                shard_data.round,
                shard_data.nonce,
            )?;
            self.update_shard_block(
                &ShardBlock::from(shard_data),
                compute_epoch(current),
                current.epoch(),
                cache,
            )?;
        }
        self.update_missed_blocks_counters()?;

        if header.nonce == self.genesis_nonce + 1 {
            return Ok(());
        }

        // The previous metachain block is credited once its successor
        // confirms it.
        let group = self.nodes_coordinator.compute_consensus_group(
            previous.prev_rand_seed(),
            previous.round(),
            previous.shard_id(),
            compute_epoch(previous),
        )?;
        let bitmap = self.signature_bitmap(
            previous.pub_keys_bitmap(),
            previous.shard_id(),
            previous.epoch(),
        );
        self.update_validator_info_on_successful_block(
            &group,
            &bitmap,
            previous
                .accumulated_fees()
                .saturating_sub(previous.developer_fees()),
            previous.shard_id(),
            previous.epoch(),
        )
    }

    fn update_shard_peer_state(
        &mut self,
        header: &ShardHeader,
        cache: &HeaderCache,
    ) -> ValidatorStatsResult<()> {
        self.update_shard_block(
            &ShardBlock::from(header),
            compute_epoch(header),
            header.epoch,
            cache,
        )?;
        self.update_missed_blocks_counters()
    }

    /// Credit the group of `block` and collect the misses since its
    /// predecessor. `epoch` selects the group, `fee_epoch` the leader share.
    fn update_shard_block(
        &mut self,
        block: &ShardBlock<'_>,
        epoch: Epoch,
        fee_epoch: Epoch,
        cache: &HeaderCache,
    ) -> ValidatorStatsResult<()> {
        let group = self.nodes_coordinator.compute_consensus_group(
            block.prev_rand_seed,
            block.round,
            block.shard_id,
            epoch,
        )?;
        let bitmap = self.signature_bitmap(block.pub_keys_bitmap, block.shard_id, block.epoch);
        self.update_validator_info_on_successful_block(
            &group,
            &bitmap,
            block.fees,
            block.shard_id,
            fee_epoch,
        )?;

        if block.nonce == self.genesis_nonce + 1 {
            return Ok(());
        }
        let previous = lookup_header(cache, block.prev_hash, block.round, block.nonce)?;
        let Some(previous) = previous.as_shard() else {
            return Err(ValidatorStatsError::InvalidHeaderShape(format!(
                "predecessor {} of shard {} block at nonce {} is not a shard header",
                hex::encode(block.prev_hash),
                block.shard_id,
                block.nonce
            )));
        };
        self.check_for_missed_blocks(
            block.round,
            previous.round,
            &previous.rand_seed,
            block.shard_id,
            epoch,
        )
    }

    fn signature_bitmap(&self, bitmap: &[u8], shard_id: ShardId, epoch: Epoch) -> Vec<u8> {
        if !self.is_enabled_in_epoch(EnableEpochFlag::FullConsensus, epoch) {
            return bitmap.to_vec();
        }
        full_consensus_bitmap(self.nodes_coordinator.consensus_group_size(shard_id, epoch))
    }

    fn update_validator_info_on_successful_block(
        &mut self,
        group: &ConsensusGroup,
        bitmap: &[u8],
        fees: u128,
        shard_id: ShardId,
        epoch: Epoch,
    ) -> ValidatorStatsResult<()> {
        if bitmap.is_empty() {
            return Err(ValidatorStatsError::NilSignatureBitmap);
        }
        for (index, member) in group.members.iter().enumerate() {
            let mut account = self.store.load_account(member.pub_key())?;
            account.increase_num_selected_in_success_blocks();

            let action = SigningAction::classify(group.is_leader(member), is_signed(bitmap, index));
            let rating = match action {
                SigningAction::LeaderSuccess => {
                    account.increase_leader_success_rate(1);
                    account.set_consecutive_proposer_misses(0);
                    account.add_to_accumulated_fees(self.leader_fee_share(fees, epoch));
                    self.rater
                        .compute_increase_proposer(shard_id, account.temp_rating())
                }
                SigningAction::ValidatorSuccess => {
                    account.increase_validator_success_rate(1);
                    self.rater
                        .compute_increase_validator(shard_id, account.temp_rating())
                }
                SigningAction::ValidatorIgnoredSignature => {
                    account.increase_validator_ignored_signatures_rate(1);
                    self.rater
                        .compute_increase_validator(shard_id, account.temp_rating())
                }
                SigningAction::LeaderFail => account.rating(),
            };
            account.set_temp_rating(rating);
            trace!(
                pub_key = %hex::encode(member.pub_key()),
                ?action,
                temp_rating = rating,
                "credited consensus group member"
            );
            self.store.save_account(&account)?;
        }
        Ok(())
    }

    fn leader_fee_share(&self, fees: u128, epoch: Epoch) -> u128 {
        let percentage = self.rewards_handler.leader_percentage_in_epoch(epoch);
        if self.is_enabled_in_epoch(EnableEpochFlag::StakingV2AfterEpoch, epoch) {
            trimmed_percentage(fees, percentage)
        } else {
            approximate_percentage(fees, percentage)
        }
    }

    fn check_for_missed_blocks(
        &mut self,
        current_round: u64,
        previous_round: u64,
        previous_rand_seed: &[u8],
        shard_id: ShardId,
        epoch: Epoch,
    ) -> ValidatorStatsResult<()> {
        let gap = current_round.saturating_sub(previous_round);
        if gap <= 1 {
            return Ok(());
        }
        let missed_rounds = gap - 1;
        self.status.record_missed_rounds(missed_rounds);

        if self.is_enabled(EnableEpochFlag::StopDecreasingValidatorRatingWhenStuck)
            && missed_rounds > self.max_consecutive_rounds_of_rating_decrease
        {
            metrics::counter!(MISSED_ROUNDS_METRIC, "path" => "skipped").increment(missed_rounds);
            debug!(
                missed_rounds,
                shard = shard_id,
                limit = self.max_consecutive_rounds_of_rating_decrease,
                "chain stuck, ratings left unchanged"
            );
            return Ok(());
        }

        if missed_rounds <= self.max_computable_rounds {
            metrics::counter!(MISSED_ROUNDS_METRIC, "path" => "exact").increment(missed_rounds);
            self.compute_decrease(previous_round, current_round, previous_rand_seed, shard_id, epoch)
        } else {
            metrics::counter!(MISSED_ROUNDS_METRIC, "path" => "bulk").increment(missed_rounds);
            self.decrease_all(shard_id, missed_rounds, epoch)
        }
    }

    /// Recompute the group of every skipped round and count one leader miss
    /// and one validator miss per other member.
    fn compute_decrease(
        &mut self,
        previous_round: u64,
        current_round: u64,
        previous_rand_seed: &[u8],
        shard_id: ShardId,
        epoch: Epoch,
    ) -> ValidatorStatsResult<()> {
        if epoch < self.rating_enable_epoch {
            return Ok(());
        }
        for round in previous_round + 1..current_round {
            let group = self.nodes_coordinator.compute_consensus_group(
                previous_rand_seed,
                round,
                shard_id,
                epoch,
            )?;
            self.missed_blocks_counters
                .decrease_leader(group.leader.pub_key(), shard_id);
            for member in group.members.iter().filter(|member| !group.is_leader(member)) {
                self.missed_blocks_counters
                    .decrease_validator(member.pub_key(), shard_id);
            }
        }
        Ok(())
    }

    /// Spread `missed_rounds` over every eligible validator of the shard when
    /// recomputing each group would be too expensive.
    fn decrease_all(
        &mut self,
        shard_id: ShardId,
        missed_rounds: u64,
        epoch: Epoch,
    ) -> ValidatorStatsResult<()> {
        if epoch < self.rating_enable_epoch {
            return Ok(());
        }
        let eligible = self.nodes_coordinator.eligible_validators(epoch)?;
        let validators = eligible.get(&shard_id).map(Vec::as_slice).unwrap_or_default();
        if validators.is_empty() {
            warn!(shard = shard_id, epoch, "no eligible validators to decrease");
            return Ok(());
        }
        let group_size = self.nodes_coordinator.consensus_group_size(shard_id, epoch);
        let share = missed_rounds as f64 / validators.len() as f64;
        let leader_appearances = share.ceil() as u32;
        let group_appearances = (group_size as f64 * share).ceil() as u32;

        let mut rating_difference = 0i64;
        for (position, pub_key) in validators.iter().enumerate() {
            let mut account = self.store.load_account(pub_key)?;
            account.decrease_leader_success_rate(leader_appearances);
            account.decrease_validator_success_rate(group_appearances);

            let before = account.temp_rating();
            let mut rating = before;
            for _ in 0..leader_appearances {
                rating = self.rater.compute_decrease_proposer(shard_id, rating, 0);
            }
            for _ in 0..group_appearances {
                rating = self.rater.compute_decrease_validator(shard_id, rating);
            }
            if position == 0 {
                rating_difference = i64::from(rating) - i64::from(before);
            }
            account.set_temp_rating(rating);
            self.jailer().jail_if_bad_rating_and_inactive(&mut account);
            self.store.save_account(&account)?;
        }
        trace!(
            shard = shard_id,
            missed_rounds,
            leader_appearances,
            group_appearances,
            rating_difference,
            "decreased all eligible validators"
        );
        Ok(())
    }

    /// Apply the misses collected for the current header in ascending key
    /// order and clear the counters.
    fn update_missed_blocks_counters(&mut self) -> ValidatorStatsResult<()> {
        for (pub_key, counters) in self.missed_blocks_counters.drain_sorted() {
            let mut account = self.store.load_account(&pub_key)?;
            let shard_id = counters.shard_id;

            let mut rating = account.temp_rating();
            for _ in 0..counters.leader_decrease_count {
                rating = self.rater.compute_decrease_proposer(
                    shard_id,
                    rating,
                    account.consecutive_proposer_misses(),
                );
                account.set_consecutive_proposer_misses(
                    account.consecutive_proposer_misses().saturating_add(1),
                );
            }
            for _ in 0..counters.validator_decrease_count {
                rating = self.rater.compute_decrease_validator(shard_id, rating);
            }
            account.set_temp_rating(rating);
            if counters.leader_decrease_count > 0 {
                account.decrease_leader_success_rate(counters.leader_decrease_count);
            }
            if counters.validator_decrease_count > 0 {
                account.decrease_validator_success_rate(counters.validator_decrease_count);
            }
            self.jailer().jail_if_bad_rating_and_inactive(&mut account);
            self.store.save_account(&account)?;
        }
        Ok(())
    }
}
