#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use proptest::prelude::ProptestConfig;
use rpp_validator_stats::coordinator::ValidatorsMap;
use rpp_validator_stats::rating::{RatingStepConfig, SelectionChance};
use rpp_validator_stats::{
    AccountStore, ArgValidatorStatisticsProcessor, BlockSigningRater, ConsensusGroup,
    ConsensusGroupError, EnableEpochs, EnableEpochsConfig, Epoch, GenesisNodeInfo,
    GenesisNodesSetup, LeaderPercentageSchedule, NodesCoordinator, PeerAccount, PeerAccountsDb,
    RatingsConfig, ShardHeader, ShardId, Validator, ValidatorStatisticsProcessor,
};

pub const START_RATING: u32 = 50;
pub const MAX_RATING: u32 = 100;

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(32);
    ProptestConfig {
        cases,
        ..ProptestConfig::default()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

pub fn pub_key(shard_id: ShardId, index: usize) -> Vec<u8> {
    if shard_id == rpp_validator_stats::METACHAIN_SHARD_ID {
        format!("meta-v{index}").into_bytes()
    } else {
        format!("s{shard_id}-v{index}").into_bytes()
    }
}

pub fn waiting_key(shard_id: ShardId, index: usize) -> Vec<u8> {
    format!("s{shard_id}-w{index}").into_bytes()
}

/// Chances: rating 0 maps to 5%, ratings up to 10 to 0%, the rest to 10%.
/// Ratings in `1..=10` are therefore low enough to jail.
pub fn ratings_config() -> RatingsConfig {
    RatingsConfig {
        start_rating: START_RATING,
        min_rating: 1,
        max_rating: MAX_RATING,
        signed_blocks_threshold: 0.5,
        selection_chances: vec![
            SelectionChance {
                max_threshold: 0,
                chance_percent: 5,
            },
            SelectionChance {
                max_threshold: 10,
                chance_percent: 0,
            },
            SelectionChance {
                max_threshold: MAX_RATING,
                chance_percent: 10,
            },
        ],
        shard_chain: RatingStepConfig {
            proposer_increase_rating_step: 4,
            proposer_decrease_rating_step: -8,
            validator_increase_rating_step: 2,
            validator_decrease_rating_step: -1,
            consecutive_missed_blocks_penalty: 2.0,
        },
        metachain: RatingStepConfig {
            proposer_increase_rating_step: 6,
            proposer_decrease_rating_step: -12,
            validator_increase_rating_step: 3,
            validator_decrease_rating_step: -2,
            consecutive_missed_blocks_penalty: 1.5,
        },
    }
}

/// Request recorded by [`StaticNodesCoordinator::compute_consensus_group`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupRequest {
    pub round: u64,
    pub shard_id: ShardId,
    pub epoch: Epoch,
}

/// Coordinator with fixed lists for every epoch. The group of a round is a
/// window of `group_size` eligible validators starting at
/// `(round + randomness[0]) % len`; its first member leads.
pub struct StaticNodesCoordinator {
    eligible: RwLock<ValidatorsMap>,
    waiting: RwLock<ValidatorsMap>,
    leaving: RwLock<ValidatorsMap>,
    auction: RwLock<ValidatorsMap>,
    group_size: usize,
    requests: Mutex<Vec<GroupRequest>>,
}

impl StaticNodesCoordinator {
    pub fn new(eligible: ValidatorsMap, waiting: ValidatorsMap, group_size: usize) -> Self {
        Self {
            eligible: RwLock::new(eligible),
            waiting: RwLock::new(waiting),
            leaving: RwLock::new(ValidatorsMap::new()),
            auction: RwLock::new(ValidatorsMap::new()),
            group_size,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_eligible(&self, shard_id: ShardId, keys: Vec<Vec<u8>>) {
        self.eligible.write().insert(shard_id, keys);
    }

    pub fn set_waiting(&self, shard_id: ShardId, keys: Vec<Vec<u8>>) {
        self.waiting.write().insert(shard_id, keys);
    }

    pub fn set_leaving(&self, shard_id: ShardId, keys: Vec<Vec<u8>>) {
        self.leaving.write().insert(shard_id, keys);
    }

    pub fn set_auction(&self, shard_id: ShardId, keys: Vec<Vec<u8>>) {
        self.auction.write().insert(shard_id, keys);
    }

    pub fn requests(&self) -> Vec<GroupRequest> {
        self.requests.lock().clone()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    /// The group `compute_consensus_group` returns, without recording it.
    pub fn group_for(&self, randomness: &[u8], round: u64, shard_id: ShardId) -> ConsensusGroup {
        self.select(randomness, round, shard_id)
            .expect("shard has eligible validators")
    }

    fn select(
        &self,
        randomness: &[u8],
        round: u64,
        shard_id: ShardId,
    ) -> Result<ConsensusGroup, ConsensusGroupError> {
        let eligible = self.eligible.read();
        let keys = eligible
            .get(&shard_id)
            .filter(|keys| !keys.is_empty())
            .ok_or(ConsensusGroupError::EmptyShard(shard_id))?;
        let len = keys.len();
        let offset = randomness.first().copied().unwrap_or_default() as u64;
        let start = (round.wrapping_add(offset) % len as u64) as usize;
        let members = (0..self.group_size.min(len))
            .map(|i| Validator::new(keys[(start + i) % len].clone()))
            .collect();
        ConsensusGroup::led_by_first(members).ok_or(ConsensusGroupError::EmptyShard(shard_id))
    }
}

impl NodesCoordinator for StaticNodesCoordinator {
    fn compute_consensus_group(
        &self,
        randomness: &[u8],
        round: u64,
        shard_id: ShardId,
        epoch: Epoch,
    ) -> Result<ConsensusGroup, ConsensusGroupError> {
        self.requests.lock().push(GroupRequest {
            round,
            shard_id,
            epoch,
        });
        self.select(randomness, round, shard_id)
    }

    fn eligible_validators(&self, _epoch: Epoch) -> Result<ValidatorsMap, ConsensusGroupError> {
        Ok(self.eligible.read().clone())
    }

    fn waiting_validators(&self, _epoch: Epoch) -> Result<ValidatorsMap, ConsensusGroupError> {
        Ok(self.waiting.read().clone())
    }

    fn leaving_validators(&self, _epoch: Epoch) -> Result<ValidatorsMap, ConsensusGroupError> {
        Ok(self.leaving.read().clone())
    }

    fn shuffled_out_to_auction_validators(
        &self,
        _epoch: Epoch,
    ) -> Result<ValidatorsMap, ConsensusGroupError> {
        Ok(self.auction.read().clone())
    }

    fn consensus_group_size(&self, shard_id: ShardId, _epoch: Epoch) -> usize {
        let len = self
            .eligible
            .read()
            .get(&shard_id)
            .map(Vec::len)
            .unwrap_or_default();
        self.group_size.min(len)
    }
}

/// Knobs of a [`Harness`].
#[derive(Clone, Debug)]
pub struct HarnessConfig {
    /// Eligible validators per shard, keyed by shard id.
    pub eligible: BTreeMap<ShardId, usize>,
    pub waiting: BTreeMap<ShardId, usize>,
    pub group_size: usize,
    pub num_shards: u32,
    pub max_computable_rounds: u64,
    pub max_consecutive_rounds_of_rating_decrease: u64,
    pub rating_enable_epoch: Epoch,
    pub enable_epochs: EnableEpochsConfig,
    pub leader_percentage: f64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            eligible: BTreeMap::from([(0, 4)]),
            waiting: BTreeMap::from([(0, 2)]),
            group_size: 3,
            num_shards: 1,
            max_computable_rounds: 100,
            max_consecutive_rounds_of_rating_decrease: 1_000,
            rating_enable_epoch: 0,
            enable_epochs: EnableEpochsConfig::default(),
            leader_percentage: 0.1,
        }
    }
}

pub struct Harness {
    pub processor: ValidatorStatisticsProcessor<PeerAccountsDb>,
    pub coordinator: Arc<StaticNodesCoordinator>,
    pub flags: Arc<EnableEpochs>,
}

fn keys_map(
    counts: &BTreeMap<ShardId, usize>,
    key: impl Fn(ShardId, usize) -> Vec<u8>,
) -> ValidatorsMap {
    counts
        .iter()
        .map(|(shard_id, count)| (*shard_id, (0..*count).map(|i| key(*shard_id, i)).collect()))
        .collect()
}

fn genesis_nodes(map: &ValidatorsMap) -> BTreeMap<ShardId, Vec<GenesisNodeInfo>> {
    map.iter()
        .map(|(shard_id, keys)| {
            let nodes = keys
                .iter()
                .map(|key| GenesisNodeInfo {
                    pub_key: key.clone(),
                    reward_address: [b"reward-".as_slice(), key.as_slice()].concat(),
                    initial_rating: START_RATING,
                })
                .collect();
            (*shard_id, nodes)
        })
        .collect()
}

pub fn processor_args(
    config: &HarnessConfig,
    coordinator: Arc<StaticNodesCoordinator>,
    flags: Arc<EnableEpochs>,
) -> ArgValidatorStatisticsProcessor<PeerAccountsDb> {
    let eligible = coordinator.eligible_validators(0).expect("eligible");
    let waiting = coordinator.waiting_validators(0).expect("waiting");
    ArgValidatorStatisticsProcessor {
        store: PeerAccountsDb::in_memory(),
        nodes_coordinator: coordinator,
        rater: Arc::new(BlockSigningRater::new(&ratings_config()).expect("rater")),
        rewards_handler: Arc::new(
            LeaderPercentageSchedule::new(&rpp_validator_stats::rewards::RewardsConfig {
                leader_percentages: vec![rpp_validator_stats::rewards::LeaderPercentageConfig {
                    epoch_enable: 0,
                    leader_percentage: config.leader_percentage,
                }],
            })
            .expect("rewards schedule"),
        ),
        enable_epochs_handler: flags,
        genesis: GenesisNodesSetup {
            eligible: genesis_nodes(&eligible),
            waiting: genesis_nodes(&waiting),
        },
        genesis_nonce: 0,
        num_shards: config.num_shards,
        max_computable_rounds: config.max_computable_rounds,
        max_consecutive_rounds_of_rating_decrease: config
            .max_consecutive_rounds_of_rating_decrease,
        rating_enable_epoch: config.rating_enable_epoch,
    }
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        Self::build(config, |_| {})
    }

    /// Like [`Harness::new`], letting `prepare` adjust the arguments (for
    /// instance seed the store) before genesis is written.
    pub fn build(
        config: HarnessConfig,
        prepare: impl FnOnce(&mut ArgValidatorStatisticsProcessor<PeerAccountsDb>),
    ) -> Self {
        init_tracing();
        let coordinator = Arc::new(StaticNodesCoordinator::new(
            keys_map(&config.eligible, pub_key),
            keys_map(&config.waiting, waiting_key),
            config.group_size,
        ));
        let flags = Arc::new(EnableEpochs::new(config.enable_epochs.clone()));
        let mut args = processor_args(&config, coordinator.clone(), flags.clone());
        prepare(&mut args);
        let processor = ValidatorStatisticsProcessor::new(args).expect("processor");
        Self {
            processor,
            coordinator,
            flags,
        }
    }

    pub fn account(&self, pub_key: &[u8]) -> PeerAccount {
        self.processor
            .store()
            .existing_account(pub_key)
            .expect("store lookup")
            .expect("account present")
    }

    pub fn temp_ratings(&self, keys: &[Vec<u8>]) -> Vec<u32> {
        keys.iter().map(|key| self.account(key).temp_rating()).collect()
    }
}

/// Shard header with the given chain position. Hashes are derived from the
/// nonce so consecutive headers link up.
pub fn shard_header(shard_id: ShardId, nonce: u64, round: u64, bitmap: Vec<u8>) -> ShardHeader {
    ShardHeader {
        nonce,
        round,
        epoch: 0,
        shard_id,
        prev_hash: header_hash(shard_id, nonce.saturating_sub(1)),
        prev_rand_seed: Vec::new(),
        rand_seed: Vec::new(),
        pub_keys_bitmap: bitmap,
        accumulated_fees: 0,
        developer_fees: 0,
        epoch_start: false,
    }
}

pub fn header_hash(shard_id: ShardId, nonce: u64) -> Vec<u8> {
    format!("hdr-{shard_id}-{nonce}").into_bytes()
}

pub const ALL_SIGNED: u8 = 0xFF;
