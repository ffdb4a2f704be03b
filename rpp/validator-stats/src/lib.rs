//! Validator performance accounting for a sharded chain.
//!
//! The [`processor::ValidatorStatisticsProcessor`] consumes finalized block
//! headers and keeps one [`account::PeerAccount`] per validator inside a
//! merkleized [`store::AccountStore`]. Every header credits the members of its
//! consensus group, penalizes the groups of skipped rounds and moves the
//! provisional ("temp") ratings accordingly. At epoch boundaries the processor
//! reconciles list membership with the [`coordinator::NodesCoordinator`],
//! applies the signed-blocks threshold and jails validators whose rating has
//! fallen too low.

pub mod account;
pub mod config;
pub mod coordinator;
pub mod counters;
pub mod error;
pub mod flags;
pub mod header;
pub mod jail;
pub mod processor;
pub mod rating;
pub mod rewards;
pub mod status;
pub mod store;
pub mod validator_info;

pub use account::{ListStatus, PeerAccount, SignRate};
pub use config::{ConfigError, ConfigValidation, ValidatorStatsConfig};
pub use coordinator::{ConsensusGroup, ConsensusGroupError, NodesCoordinator, Validator};
pub use error::{ValidatorStatsError, ValidatorStatsResult};
pub use flags::{EnableEpochFlag, EnableEpochs, EnableEpochsConfig, EnableEpochsHandler};
pub use header::{Header, HeaderCache, HeaderHandler, MetaHeader, ShardData, ShardHeader};
pub use processor::{
    ArgValidatorStatisticsProcessor, GenesisNodeInfo, GenesisNodesSetup,
    ValidatorStatisticsProcessor,
};
pub use rating::{BlockSigningRater, RatingModel, RatingsConfig};
pub use rewards::{LeaderPercentageSchedule, RewardsHandler};
pub use status::{StatisticsSnapshot, StatisticsStatus};
pub use store::{AccountStore, AccountStoreError, PeerAccountsDb, RootHash};
pub use validator_info::{ShardValidatorInfo, ShardValidatorsInfoMap, ValidatorInfo};

/// Identifier of a shard. The metachain uses [`METACHAIN_SHARD_ID`].
pub type ShardId = u32;

/// Epoch number as carried by block headers.
pub type Epoch = u32;

pub const METACHAIN_SHARD_ID: ShardId = u32::MAX;
