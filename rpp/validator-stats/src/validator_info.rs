use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::account::ListStatus;
use crate::{Epoch, ShardId};

/// Read-only projection of a peer account handed to epoch-start consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub public_key: Vec<u8>,
    pub shard_id: ShardId,
    pub list: ListStatus,
    pub previous_list: ListStatus,
    pub index: u32,
    pub previous_index: u32,
    pub temp_rating: u32,
    pub rating: u32,
    pub rating_modifier: f32,
    pub reward_address: Vec<u8>,
    pub leader_success: u32,
    pub leader_failure: u32,
    pub validator_success: u32,
    pub validator_failure: u32,
    pub validator_ignored_signatures: u32,
    pub num_selected_in_success_blocks: u32,
    pub accumulated_fees: u128,
    pub total_leader_success: u32,
    pub total_leader_failure: u32,
    pub total_validator_success: u32,
    pub total_validator_failure: u32,
    pub total_validator_ignored_signatures: u32,
    pub unstaked_epoch: Epoch,
}

impl ValidatorInfo {
    /// An empty record for `public_key`, mostly useful when building snapshots by hand.
    pub fn new(public_key: impl Into<Vec<u8>>, shard_id: ShardId, list: ListStatus) -> Self {
        Self {
            public_key: public_key.into(),
            shard_id,
            list,
            previous_list: ListStatus::New,
            index: 0,
            previous_index: 0,
            temp_rating: 0,
            rating: 0,
            rating_modifier: 0.0,
            reward_address: Vec::new(),
            leader_success: 0,
            leader_failure: 0,
            validator_success: 0,
            validator_failure: 0,
            validator_ignored_signatures: 0,
            num_selected_in_success_blocks: 0,
            accumulated_fees: 0,
            total_leader_success: 0,
            total_leader_failure: 0,
            total_validator_success: 0,
            total_validator_failure: 0,
            total_validator_ignored_signatures: 0,
            unstaked_epoch: Epoch::MAX,
        }
    }

    pub fn was_leaving_eligible_in_current_epoch(&self) -> bool {
        self.list == ListStatus::Leaving && self.previous_list == ListStatus::Eligible
    }
}

/// Validator snapshot grouped by shard. Shards iterate in ascending order and
/// validators keep their insertion order within a shard.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShardValidatorsInfoMap {
    shards: BTreeMap<ShardId, Vec<ValidatorInfo>>,
}

impl ShardValidatorsInfoMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, info: ValidatorInfo) {
        self.shards.entry(info.shard_id).or_default().push(info);
    }

    pub fn shard(&self, shard_id: ShardId) -> &[ValidatorInfo] {
        self.shards
            .get(&shard_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn shards(&self) -> impl Iterator<Item = (ShardId, &[ValidatorInfo])> {
        self.shards
            .iter()
            .map(|(shard, validators)| (*shard, validators.as_slice()))
    }

    pub fn shards_mut(&mut self) -> impl Iterator<Item = (ShardId, &mut Vec<ValidatorInfo>)> {
        self.shards
            .iter_mut()
            .map(|(shard, validators)| (*shard, validators))
    }

    pub fn all(&self) -> impl Iterator<Item = &ValidatorInfo> {
        self.shards.values().flatten()
    }

    pub fn get(&self, public_key: &[u8]) -> Option<&ValidatorInfo> {
        self.all().find(|info| info.public_key == public_key)
    }

    pub fn len(&self) -> usize {
        self.shards.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<ValidatorInfo> for ShardValidatorsInfoMap {
    fn from_iter<I: IntoIterator<Item = ValidatorInfo>>(iter: I) -> Self {
        let mut map = Self::new();
        for info in iter {
            map.add(info);
        }
        map
    }
}

/// Externally verified per-validator record applied by the end-of-epoch
/// [`process`](crate::processor::ValidatorStatisticsProcessor::process) step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardValidatorInfo {
    pub public_key: Vec<u8>,
    pub shard_id: ShardId,
    pub list: ListStatus,
    pub index: u32,
    pub temp_rating: u32,
}

impl From<&ValidatorInfo> for ShardValidatorInfo {
    fn from(info: &ValidatorInfo) -> Self {
        Self {
            public_key: info.public_key.clone(),
            shard_id: info.shard_id,
            list: info.list,
            index: info.index,
            temp_rating: info.temp_rating,
        }
    }
}
