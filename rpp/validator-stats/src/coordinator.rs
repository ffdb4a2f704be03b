use std::collections::BTreeMap;

use thiserror::Error;

use crate::{Epoch, ShardId};

/// Public keys per shard, in list order.
pub type ValidatorsMap = BTreeMap<ShardId, Vec<Vec<u8>>>;

#[derive(Debug, Error)]
pub enum ConsensusGroupError {
    #[error("epoch {0} is not known to the nodes coordinator")]
    EpochNotFound(Epoch),
    #[error("shard {0} has no eligible validators")]
    EmptyShard(ShardId),
    #[error("invalid consensus group request: {0}")]
    InvalidRequest(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Validator {
    pub_key: Vec<u8>,
}

impl Validator {
    pub fn new(pub_key: impl Into<Vec<u8>>) -> Self {
        Self {
            pub_key: pub_key.into(),
        }
    }

    pub fn pub_key(&self) -> &[u8] {
        &self.pub_key
    }
}

/// Ordered consensus group of a round. Bit `i` of a header's signature
/// bitmap refers to `members[i]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsensusGroup {
    pub leader: Validator,
    pub members: Vec<Validator>,
}

impl ConsensusGroup {
    /// Build a group whose first member leads the round.
    pub fn led_by_first(members: Vec<Validator>) -> Option<Self> {
        let leader = members.first()?.clone();
        Some(Self { leader, members })
    }

    pub fn is_leader(&self, validator: &Validator) -> bool {
        self.leader.pub_key == validator.pub_key
    }
}

/// Deterministic view of validator lists and consensus group selection.
pub trait NodesCoordinator: Send + Sync {
    fn compute_consensus_group(
        &self,
        randomness: &[u8],
        round: u64,
        shard_id: ShardId,
        epoch: Epoch,
    ) -> Result<ConsensusGroup, ConsensusGroupError>;

    fn eligible_validators(&self, epoch: Epoch) -> Result<ValidatorsMap, ConsensusGroupError>;

    fn waiting_validators(&self, epoch: Epoch) -> Result<ValidatorsMap, ConsensusGroupError>;

    fn leaving_validators(&self, epoch: Epoch) -> Result<ValidatorsMap, ConsensusGroupError>;

    fn shuffled_out_to_auction_validators(
        &self,
        epoch: Epoch,
    ) -> Result<ValidatorsMap, ConsensusGroupError>;

    fn consensus_group_size(&self, shard_id: ShardId, epoch: Epoch) -> usize;
}
