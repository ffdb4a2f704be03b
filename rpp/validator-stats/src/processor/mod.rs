use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, trace};

use crate::account::{ListStatus, PeerAccount, DEFAULT_UNSTAKED_EPOCH};
use crate::config::ValidatorStatsConfig;
use crate::coordinator::NodesCoordinator;
use crate::counters::MissedBlocksCounters;
use crate::error::{ValidatorStatsError, ValidatorStatsResult};
use crate::flags::{EnableEpochFlag, EnableEpochs, EnableEpochsHandler};
use crate::header::MetaHeader;
use crate::jail::Jailer;
use crate::rating::{BlockSigningRater, RatingModel};
use crate::rewards::{LeaderPercentageSchedule, RewardsHandler};
use crate::status::StatisticsStatus;
use crate::store::{AccountStore, RootHash};
use crate::validator_info::{ShardValidatorInfo, ShardValidatorsInfoMap, ValidatorInfo};
use crate::{Epoch, ShardId, METACHAIN_SHARD_ID};

mod epoch;
mod update;

const MISSED_ROUNDS_METRIC: &str = "validator_stats.missed_rounds";
const MISSED_ROUNDS_DESC: &str = "missed rounds observed between consecutive headers";
const FAILURES_METRIC: &str = "validator_stats.update_peer_state.failures";
const FAILURES_DESC: &str = "count of rejected peer state updates";

/// Node registered in the genesis setup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenesisNodeInfo {
    pub pub_key: Vec<u8>,
    pub reward_address: Vec<u8>,
    pub initial_rating: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenesisNodesSetup {
    pub eligible: BTreeMap<ShardId, Vec<GenesisNodeInfo>>,
    pub waiting: BTreeMap<ShardId, Vec<GenesisNodeInfo>>,
}

/// Construction arguments of [`ValidatorStatisticsProcessor`].
pub struct ArgValidatorStatisticsProcessor<S> {
    pub store: S,
    pub nodes_coordinator: Arc<dyn NodesCoordinator>,
    pub rater: Arc<dyn RatingModel>,
    pub rewards_handler: Arc<dyn RewardsHandler>,
    pub enable_epochs_handler: Arc<dyn EnableEpochsHandler>,
    pub genesis: GenesisNodesSetup,
    pub genesis_nonce: u64,
    pub num_shards: u32,
    pub max_computable_rounds: u64,
    pub max_consecutive_rounds_of_rating_decrease: u64,
    pub rating_enable_epoch: Epoch,
}

impl<S> ArgValidatorStatisticsProcessor<S> {
    /// Arguments wired from a validated configuration, with the rater, the
    /// leader fee schedule and the epoch flags built from it. The flags
    /// handler is returned so the caller can confirm new epochs.
    pub fn from_config(
        config: &ValidatorStatsConfig,
        store: S,
        nodes_coordinator: Arc<dyn NodesCoordinator>,
        genesis: GenesisNodesSetup,
    ) -> ValidatorStatsResult<(Self, Arc<EnableEpochs>)> {
        config.validate()?;
        let flags = Arc::new(EnableEpochs::new(config.enable_epochs.clone()));
        let args = Self {
            store,
            nodes_coordinator,
            rater: Arc::new(BlockSigningRater::new(&config.ratings)?),
            rewards_handler: Arc::new(LeaderPercentageSchedule::new(&config.rewards)?),
            enable_epochs_handler: flags.clone(),
            genesis,
            genesis_nonce: config.genesis_nonce,
            num_shards: config.num_shards,
            max_computable_rounds: config.max_computable_rounds,
            max_consecutive_rounds_of_rating_decrease: config
                .max_consecutive_rounds_of_rating_decrease,
            rating_enable_epoch: config.rating_enable_epoch,
        };
        Ok((args, flags))
    }
}

/// Keeps the peer accounts trie in step with finalized headers and epoch
/// transitions.
///
/// Mutating operations take `&mut self`; callers serialize header processing.
/// The [`StatisticsStatus`] handle may be read concurrently.
pub struct ValidatorStatisticsProcessor<S: AccountStore> {
    store: S,
    nodes_coordinator: Arc<dyn NodesCoordinator>,
    rater: Arc<dyn RatingModel>,
    rewards_handler: Arc<dyn RewardsHandler>,
    enable_epochs_handler: Arc<dyn EnableEpochsHandler>,
    genesis_nonce: u64,
    num_shards: u32,
    max_computable_rounds: u64,
    max_consecutive_rounds_of_rating_decrease: u64,
    rating_enable_epoch: Epoch,
    missed_blocks_counters: MissedBlocksCounters,
    status: StatisticsStatus,
}

impl<S: AccountStore> ValidatorStatisticsProcessor<S> {
    /// Validate the arguments, write the genesis accounts and commit them.
    pub fn new(args: ArgValidatorStatisticsProcessor<S>) -> ValidatorStatsResult<Self> {
        if args.max_computable_rounds == 0 {
            return Err(ValidatorStatsError::ZeroMaxComputableRounds);
        }
        if args.max_consecutive_rounds_of_rating_decrease == 0 {
            return Err(ValidatorStatsError::ZeroMaxConsecutiveRoundsOfRatingDecrease);
        }
        metrics::describe_counter!(MISSED_ROUNDS_METRIC, MISSED_ROUNDS_DESC);
        metrics::describe_counter!(FAILURES_METRIC, FAILURES_DESC);

        let mut processor = Self {
            store: args.store,
            nodes_coordinator: args.nodes_coordinator,
            rater: args.rater,
            rewards_handler: args.rewards_handler,
            enable_epochs_handler: args.enable_epochs_handler,
            genesis_nonce: args.genesis_nonce,
            num_shards: args.num_shards,
            max_computable_rounds: args.max_computable_rounds,
            max_consecutive_rounds_of_rating_decrease: args
                .max_consecutive_rounds_of_rating_decrease,
            rating_enable_epoch: args.rating_enable_epoch,
            missed_blocks_counters: MissedBlocksCounters::new(),
            status: StatisticsStatus::default(),
        };
        processor.save_initial_state(&args.genesis)?;
        Ok(processor)
    }

    fn save_initial_state(&mut self, genesis: &GenesisNodesSetup) -> ValidatorStatsResult<()> {
        if genesis.eligible.is_empty() && genesis.waiting.is_empty() {
            return Ok(());
        }
        self.save_initial_value_for_map(&genesis.eligible, ListStatus::Eligible)?;
        self.save_initial_value_for_map(&genesis.waiting, ListStatus::Waiting)?;
        let root = self.store.commit()?;
        info!(
            root = %hex::encode(root),
            eligible = genesis.eligible.values().map(Vec::len).sum::<usize>(),
            waiting = genesis.waiting.values().map(Vec::len).sum::<usize>(),
            "committed genesis validator statistics"
        );
        Ok(())
    }

    fn save_initial_value_for_map(
        &mut self,
        nodes: &BTreeMap<ShardId, Vec<GenesisNodeInfo>>,
        list: ListStatus,
    ) -> ValidatorStatsResult<()> {
        for shard_id in self.shard_order() {
            let Some(shard_nodes) = nodes.get(&shard_id) else {
                continue;
            };
            for (index, node) in shard_nodes.iter().enumerate() {
                let mut account = self.store.load_account(&node.pub_key)?;
                account.set_reward_address(node.reward_address.clone());
                account.set_rating(node.initial_rating);
                account.set_temp_rating(node.initial_rating);
                account.set_list_and_index(
                    shard_id,
                    list,
                    index as u32,
                    self.is_enabled(EnableEpochFlag::StakingV4Started),
                );
                self.store.save_account(&account)?;
            }
        }
        Ok(())
    }

    /// Shards in processing order: regular shards ascending, then the metachain.
    fn shard_order(&self) -> impl Iterator<Item = ShardId> {
        (0..self.num_shards).chain(std::iter::once(METACHAIN_SHARD_ID))
    }

    fn is_enabled(&self, flag: EnableEpochFlag) -> bool {
        self.enable_epochs_handler.is_flag_enabled(flag)
    }

    fn is_enabled_in_epoch(&self, flag: EnableEpochFlag, epoch: Epoch) -> bool {
        self.enable_epochs_handler.is_flag_enabled_in_epoch(flag, epoch)
    }

    fn jailer(&self) -> Jailer<'_> {
        Jailer::new(self.rater.as_ref(), self.enable_epochs_handler.as_ref())
    }

    pub fn status(&self) -> StatisticsStatus {
        self.status.clone()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Missed-round entries not yet applied to accounts. Zero between calls.
    pub fn pending_missed_blocks(&self) -> usize {
        self.missed_blocks_counters.len()
    }

    pub fn commit(&mut self) -> ValidatorStatsResult<RootHash> {
        Ok(self.store.commit()?)
    }

    pub fn root_hash(&mut self) -> ValidatorStatsResult<RootHash> {
        Ok(self.store.root_hash()?)
    }

    /// Restore the trie to the statistics root recorded in `header`.
    pub fn revert_peer_state(&mut self, header: &MetaHeader) -> ValidatorStatsResult<()> {
        self.store.recreate_trie(&header.validator_stats_root_hash)?;
        debug!(
            nonce = header.nonce,
            root = %hex::encode(header.validator_stats_root_hash),
            "reverted peer state"
        );
        Ok(())
    }

    pub fn set_last_finalized_root_hash(&self, root: &[u8]) {
        self.status.set_last_finalized_root_hash(root);
    }

    pub fn last_finalized_root_hash(&self) -> Option<RootHash> {
        self.status.last_finalized_root_hash()
    }

    /// Project every account of the trie revision `root` into a snapshot.
    pub fn validator_info_for_root_hash(
        &mut self,
        root: &RootHash,
    ) -> ValidatorStatsResult<ShardValidatorsInfoMap> {
        let started = Instant::now();
        let mut infos = ShardValidatorsInfoMap::new();
        for account in self.store.all_leaves(root)? {
            let account = account?;
            infos.add(self.peer_account_to_validator_info(&account));
        }
        debug!(
            root = %hex::encode(root),
            validators = infos.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded validator info for root hash"
        );
        Ok(infos)
    }

    /// Make `record.temp_rating` the account's durable rating.
    pub fn process(&mut self, record: &ShardValidatorInfo) -> ValidatorStatsResult<()> {
        let mut account = self.store.load_account(&record.public_key)?;
        account.set_rating(record.temp_rating);
        self.store.save_account(&account)?;
        Ok(())
    }

    pub fn peer_account_to_validator_info(&self, account: &PeerAccount) -> ValidatorInfo {
        let chance = self.rater.get_chance(account.rating());
        let start_chance = self.rater.get_chance(self.rater.start_rating()).max(1);
        let rating_modifier = chance as f32 / start_chance as f32;

        let list = if self.is_enabled(EnableEpochFlag::SwitchJailWaiting) {
            account.list()
        } else {
            actual_list(account)
        };
        let leader = account.leader_success_rate();
        let validator = account.validator_success_rate();
        let total_leader = account.total_leader_success_rate();
        let total_validator = account.total_validator_success_rate();

        ValidatorInfo {
            public_key: account.pub_key().to_vec(),
            shard_id: account.shard_id(),
            list,
            previous_list: account.previous_list(),
            index: account.index_in_list(),
            previous_index: account.previous_index_in_list(),
            temp_rating: account.temp_rating(),
            rating: account.rating(),
            rating_modifier,
            reward_address: account.reward_address().to_vec(),
            leader_success: leader.num_success,
            leader_failure: leader.num_failure,
            validator_success: validator.num_success,
            validator_failure: validator.num_failure,
            validator_ignored_signatures: account.validator_ignored_signatures(),
            num_selected_in_success_blocks: account.num_selected_in_success_blocks(),
            accumulated_fees: account.accumulated_fees(),
            total_leader_success: total_leader.num_success,
            total_leader_failure: total_leader.num_failure,
            total_validator_success: total_validator.num_success,
            total_validator_failure: total_validator.num_failure,
            total_validator_ignored_signatures: account.total_validator_ignored_signatures(),
            unstaked_epoch: account.unstaked_epoch(),
        }
    }

    /// Whether the stored account behind `pub_key` has a low rating. Unknown
    /// or unreadable accounts report `false`.
    pub fn is_low_rating(&self, pub_key: &[u8]) -> bool {
        match self.store.existing_account(pub_key) {
            Ok(Some(account)) => self.jailer().is_low_rating(&account),
            Ok(None) => false,
            Err(err) => {
                debug!(pub_key = %hex::encode(pub_key), %err, "low rating lookup failed");
                false
            }
        }
    }

    /// Trace the temp rating of every eligible validator of `epoch`.
    pub fn display_ratings(&self, epoch: Epoch) {
        let eligible = match self.nodes_coordinator.eligible_validators(epoch) {
            Ok(eligible) => eligible,
            Err(err) => {
                debug!(epoch, %err, "could not load eligible validators for rating display");
                return;
            }
        };
        for (shard_id, validators) in eligible {
            for pub_key in validators {
                let rating = match self.store.existing_account(&pub_key) {
                    Ok(Some(account)) => account.temp_rating(),
                    _ => self.rater.start_rating(),
                };
                trace!(
                    epoch,
                    shard = shard_id,
                    pub_key = %hex::encode(&pub_key),
                    temp_rating = rating,
                    "validator rating"
                );
            }
        }
    }
}

/// List reported before inactive validators are stored as jailed: a staked
/// inactive validator is reported as jailed, an unstaked one as leaving
/// unless it is already inactive.
fn actual_list(account: &PeerAccount) -> ListStatus {
    let list = account.list();
    if account.unstaked_epoch() == DEFAULT_UNSTAKED_EPOCH {
        if list == ListStatus::Inactive {
            return ListStatus::Jailed;
        }
        return list;
    }
    if list == ListStatus::Inactive {
        return list;
    }
    ListStatus::Leaving
}
