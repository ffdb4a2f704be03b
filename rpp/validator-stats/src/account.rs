use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Epoch, ShardId};

/// Sentinel stored in [`PeerAccount::unstaked_epoch`] while the node is staked.
pub const DEFAULT_UNSTAKED_EPOCH: Epoch = Epoch::MAX;

/// Role a validator currently plays in the nodes coordinator lists.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ListStatus {
    #[default]
    New,
    Eligible,
    Waiting,
    Leaving,
    Inactive,
    Jailed,
    Auction,
}

impl ListStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ListStatus::New => "new",
            ListStatus::Eligible => "eligible",
            ListStatus::Waiting => "waiting",
            ListStatus::Leaving => "leaving",
            ListStatus::Inactive => "inactive",
            ListStatus::Jailed => "jailed",
            ListStatus::Auction => "auction",
        }
    }
}

impl fmt::Display for ListStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRate {
    pub num_success: u32,
    pub num_failure: u32,
}

impl SignRate {
    fn record_success(&mut self, count: u32) {
        self.num_success = self.num_success.saturating_add(count);
    }

    fn record_failure(&mut self, count: u32) {
        self.num_failure = self.num_failure.saturating_add(count);
    }
}

/// Persistent per-validator record kept in the peer accounts trie.
///
/// Per-epoch counters are cleared by [`PeerAccount::reset_at_new_epoch`];
/// the `total_*` counters, both ratings and list membership survive it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAccount {
    pub_key: Vec<u8>,
    reward_address: Vec<u8>,
    shard_id: ShardId,
    rating: u32,
    temp_rating: u32,
    leader_success_rate: SignRate,
    validator_success_rate: SignRate,
    validator_ignored_signatures: u32,
    total_leader_success_rate: SignRate,
    total_validator_success_rate: SignRate,
    total_validator_ignored_signatures: u32,
    consecutive_proposer_misses: u32,
    num_selected_in_success_blocks: u32,
    list: ListStatus,
    previous_list: ListStatus,
    index_in_list: u32,
    previous_index_in_list: u32,
    unstaked_epoch: Epoch,
    accumulated_fees: u128,
}

impl PeerAccount {
    pub fn new(pub_key: impl Into<Vec<u8>>) -> Self {
        Self {
            pub_key: pub_key.into(),
            reward_address: Vec::new(),
            shard_id: 0,
            rating: 0,
            temp_rating: 0,
            leader_success_rate: SignRate::default(),
            validator_success_rate: SignRate::default(),
            validator_ignored_signatures: 0,
            total_leader_success_rate: SignRate::default(),
            total_validator_success_rate: SignRate::default(),
            total_validator_ignored_signatures: 0,
            consecutive_proposer_misses: 0,
            num_selected_in_success_blocks: 0,
            list: ListStatus::New,
            previous_list: ListStatus::New,
            index_in_list: 0,
            previous_index_in_list: 0,
            unstaked_epoch: DEFAULT_UNSTAKED_EPOCH,
            accumulated_fees: 0,
        }
    }

    pub fn pub_key(&self) -> &[u8] {
        &self.pub_key
    }

    pub fn reward_address(&self) -> &[u8] {
        &self.reward_address
    }

    pub fn set_reward_address(&mut self, address: impl Into<Vec<u8>>) {
        self.reward_address = address.into();
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn rating(&self) -> u32 {
        self.rating
    }

    pub fn set_rating(&mut self, rating: u32) {
        self.rating = rating;
    }

    pub fn temp_rating(&self) -> u32 {
        self.temp_rating
    }

    pub fn set_temp_rating(&mut self, rating: u32) {
        self.temp_rating = rating;
    }

    pub fn leader_success_rate(&self) -> SignRate {
        self.leader_success_rate
    }

    pub fn validator_success_rate(&self) -> SignRate {
        self.validator_success_rate
    }

    pub fn validator_ignored_signatures(&self) -> u32 {
        self.validator_ignored_signatures
    }

    pub fn total_leader_success_rate(&self) -> SignRate {
        self.total_leader_success_rate
    }

    pub fn total_validator_success_rate(&self) -> SignRate {
        self.total_validator_success_rate
    }

    pub fn total_validator_ignored_signatures(&self) -> u32 {
        self.total_validator_ignored_signatures
    }

    pub fn consecutive_proposer_misses(&self) -> u32 {
        self.consecutive_proposer_misses
    }

    pub fn set_consecutive_proposer_misses(&mut self, misses: u32) {
        self.consecutive_proposer_misses = misses;
    }

    pub fn num_selected_in_success_blocks(&self) -> u32 {
        self.num_selected_in_success_blocks
    }

    pub fn list(&self) -> ListStatus {
        self.list
    }

    pub fn previous_list(&self) -> ListStatus {
        self.previous_list
    }

    pub fn index_in_list(&self) -> u32 {
        self.index_in_list
    }

    pub fn previous_index_in_list(&self) -> u32 {
        self.previous_index_in_list
    }

    pub fn unstaked_epoch(&self) -> Epoch {
        self.unstaked_epoch
    }

    pub fn set_unstaked_epoch(&mut self, epoch: Epoch) {
        self.unstaked_epoch = epoch;
    }

    pub fn accumulated_fees(&self) -> u128 {
        self.accumulated_fees
    }

    pub fn add_to_accumulated_fees(&mut self, fees: u128) {
        self.accumulated_fees = self.accumulated_fees.saturating_add(fees);
    }

    pub fn increase_leader_success_rate(&mut self, count: u32) {
        self.leader_success_rate.record_success(count);
        self.total_leader_success_rate.record_success(count);
    }

    pub fn decrease_leader_success_rate(&mut self, count: u32) {
        self.leader_success_rate.record_failure(count);
        self.total_leader_success_rate.record_failure(count);
    }

    pub fn increase_validator_success_rate(&mut self, count: u32) {
        self.validator_success_rate.record_success(count);
        self.total_validator_success_rate.record_success(count);
    }

    pub fn decrease_validator_success_rate(&mut self, count: u32) {
        self.validator_success_rate.record_failure(count);
        self.total_validator_success_rate.record_failure(count);
    }

    pub fn increase_validator_ignored_signatures_rate(&mut self, count: u32) {
        self.validator_ignored_signatures = self.validator_ignored_signatures.saturating_add(count);
        self.total_validator_ignored_signatures = self
            .total_validator_ignored_signatures
            .saturating_add(count);
    }

    pub fn increase_num_selected_in_success_blocks(&mut self) {
        self.num_selected_in_success_blocks = self.num_selected_in_success_blocks.saturating_add(1);
    }

    /// Clear the per-epoch counters and the per-epoch fee accumulator.
    pub fn reset_at_new_epoch(&mut self) {
        self.leader_success_rate = SignRate::default();
        self.validator_success_rate = SignRate::default();
        self.validator_ignored_signatures = 0;
        self.num_selected_in_success_blocks = 0;
        self.accumulated_fees = 0;
    }

    /// Move the account to `list` at position `index`. When `update_previous`
    /// is set the former list and index are remembered.
    pub fn set_list_and_index(
        &mut self,
        shard_id: ShardId,
        list: ListStatus,
        index: u32,
        update_previous: bool,
    ) {
        if update_previous {
            self.previous_list = self.list;
            self.previous_index_in_list = self.index_in_list;
        }
        self.shard_id = shard_id;
        self.list = list;
        self.index_in_list = index;
    }

    pub(crate) fn set_previous_list(&mut self, list: ListStatus) {
        self.previous_list = list;
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
