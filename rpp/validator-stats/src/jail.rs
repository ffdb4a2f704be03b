use tracing::{debug, info};

use crate::account::{ListStatus, PeerAccount};
use crate::flags::{EnableEpochFlag, EnableEpochsHandler};
use crate::rating::RatingModel;
use crate::validator_info::ValidatorInfo;
use crate::ShardId;

const JAILED_METRIC: &str = "validator_stats.jailed";
const JAILED_DESC: &str = "count of peer accounts moved to the jailed list";

/// Jailing rules shared by every processor step that touches ratings.
pub struct Jailer<'a> {
    rater: &'a dyn RatingModel,
    flags: &'a dyn EnableEpochsHandler,
}

impl<'a> Jailer<'a> {
    pub fn new(rater: &'a dyn RatingModel, flags: &'a dyn EnableEpochsHandler) -> Self {
        Self { rater, flags }
    }

    /// Low rating means a selection chance below the chance of rating zero.
    pub fn is_low_rating(&self, account: &PeerAccount) -> bool {
        self.rater.get_chance(account.temp_rating()) < self.rater.get_chance(0)
    }

    /// Jail an inactive account whose rating dropped too low. Returns whether
    /// the account was jailed.
    pub fn jail_if_bad_rating_and_inactive(&self, account: &mut PeerAccount) -> bool {
        if !self.flags.is_flag_enabled(EnableEpochFlag::SwitchJailWaiting) {
            return false;
        }
        if account.list() != ListStatus::Inactive || !self.is_low_rating(account) {
            return false;
        }
        let (shard_id, index) = (account.shard_id(), account.index_in_list());
        self.jail(account, shard_id, index);
        true
    }

    /// Carry a jailed status from the epoch-start snapshot into the account,
    /// or jail it now for a low rating. Returns whether the account was jailed.
    pub fn set_to_jailed_if_needed(&self, account: &mut PeerAccount, info: &ValidatorInfo) -> bool {
        if !self.flags.is_flag_enabled(EnableEpochFlag::SwitchJailWaiting) {
            return false;
        }
        if matches!(info.list, ListStatus::Waiting | ListStatus::Eligible) {
            return false;
        }
        if account.list() == ListStatus::Jailed {
            return false;
        }
        if info.list == ListStatus::Jailed || self.is_low_rating(account) {
            self.jail(account, info.shard_id, info.index);
            return true;
        }
        false
    }

    fn jail(&self, account: &mut PeerAccount, shard_id: ShardId, index: u32) {
        let staking_v4 = self.flags.is_flag_enabled(EnableEpochFlag::StakingV4Started);
        account.set_list_and_index(shard_id, ListStatus::Jailed, index, staking_v4);

        metrics::describe_counter!(JAILED_METRIC, JAILED_DESC);
        metrics::counter!(JAILED_METRIC).increment(1);
        info!(
            pub_key = %hex::encode(account.pub_key()),
            temp_rating = account.temp_rating(),
            shard = account.shard_id(),
            "validator jailed"
        );
        debug!(index, previous_list = %account.previous_list(), "jailed list position");
    }
}
