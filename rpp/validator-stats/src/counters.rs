use std::collections::HashMap;

use crate::ShardId;

/// Misses accumulated for one validator while processing a single header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoundCounters {
    pub shard_id: ShardId,
    pub leader_decrease_count: u32,
    pub validator_decrease_count: u32,
}

/// Per-call accumulator of missed-round penalties, keyed by public key.
///
/// The map is scratch state: it is filled while a header is processed and
/// drained in ascending key order before the call returns, so the hash order
/// never reaches the account store.
#[derive(Debug, Default)]
pub struct MissedBlocksCounters {
    counters: HashMap<Vec<u8>, RoundCounters>,
}

impl MissedBlocksCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, pub_key: &[u8], shard_id: ShardId) -> &mut RoundCounters {
        let entry = self
            .counters
            .entry(pub_key.to_vec())
            .or_insert_with(|| RoundCounters {
                shard_id,
                ..RoundCounters::default()
            });
        entry.shard_id = shard_id;
        entry
    }

    pub fn decrease_leader(&mut self, pub_key: &[u8], shard_id: ShardId) {
        let entry = self.entry(pub_key, shard_id);
        entry.leader_decrease_count = entry.leader_decrease_count.saturating_add(1);
    }

    pub fn decrease_validator(&mut self, pub_key: &[u8], shard_id: ShardId) {
        let entry = self.entry(pub_key, shard_id);
        entry.validator_decrease_count = entry.validator_decrease_count.saturating_add(1);
    }

    pub fn get(&self, pub_key: &[u8]) -> Option<RoundCounters> {
        self.counters.get(pub_key).copied()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn reset(&mut self) {
        self.counters.clear();
    }

    /// Remove every entry, returning them sorted by public key.
    pub fn drain_sorted(&mut self) -> Vec<(Vec<u8>, RoundCounters)> {
        let mut entries: Vec<_> = self.counters.drain().collect();
        entries.sort_by(|(left, _), (right, _)| left.cmp(right));
        entries
    }
}
