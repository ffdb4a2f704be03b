use thiserror::Error;

use crate::config::ConfigError;
use crate::coordinator::ConsensusGroupError;
use crate::store::AccountStoreError;

pub type ValidatorStatsResult<T> = Result<T, ValidatorStatsError>;

#[derive(Debug, Error)]
pub enum ValidatorStatsError {
    #[error("missing ancestor header {hash} referenced at round {round} nonce {nonce}")]
    MissingAncestorHeader { hash: String, round: u64, nonce: u64 },
    #[error("invalid header shape: {0}")]
    InvalidHeaderShape(String),
    #[error("nil public keys bitmap for consensus group")]
    NilSignatureBitmap,
    #[error("account store failure: {0}")]
    AccountStore(#[from] AccountStoreError),
    #[error("validator snapshot is empty")]
    EmptyValidatorSnapshot,
    #[error("consensus group selection failed: {0}")]
    ConsensusGroup(#[from] ConsensusGroupError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("max computable rounds must be greater than zero")]
    ZeroMaxComputableRounds,
    #[error("max consecutive rounds of rating decrease must be greater than zero")]
    ZeroMaxConsecutiveRoundsOfRatingDecrease,
}

impl ValidatorStatsError {
    /// Short label used when reporting failures as metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidatorStatsError::MissingAncestorHeader { .. } => "missing_ancestor",
            ValidatorStatsError::InvalidHeaderShape(_) => "invalid_header",
            ValidatorStatsError::NilSignatureBitmap => "nil_bitmap",
            ValidatorStatsError::AccountStore(_) => "account_store",
            ValidatorStatsError::EmptyValidatorSnapshot => "empty_snapshot",
            ValidatorStatsError::ConsensusGroup(_) => "consensus_group",
            ValidatorStatsError::Config(_) => "config",
            ValidatorStatsError::ZeroMaxComputableRounds
            | ValidatorStatsError::ZeroMaxConsecutiveRoundsOfRatingDecrease => "invalid_argument",
        }
    }
}
