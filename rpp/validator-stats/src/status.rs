use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::store::RootHash;
use crate::Epoch;

/// Point-in-time view of the processor's introspection fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub last_finalized_root_hash: Option<RootHash>,
    pub current_epoch: Epoch,
    pub last_missed_rounds: u64,
    pub processed_headers: u64,
}

/// Cloneable handle onto the processor's status, readable from other
/// threads while the processor keeps running.
#[derive(Clone, Debug, Default)]
pub struct StatisticsStatus {
    inner: Arc<RwLock<StatisticsSnapshot>>,
}

impl StatisticsStatus {
    pub fn snapshot(&self) -> StatisticsSnapshot {
        self.inner.read().clone()
    }

    pub fn last_finalized_root_hash(&self) -> Option<RootHash> {
        self.inner.read().last_finalized_root_hash
    }

    /// Record the root of the last finalized block. Empty input is ignored.
    pub fn set_last_finalized_root_hash(&self, root: &[u8]) {
        if root.is_empty() {
            return;
        }
        match RootHash::try_from(root) {
            Ok(root) => self.inner.write().last_finalized_root_hash = Some(root),
            Err(_) => warn!(
                len = root.len(),
                "ignoring last finalized root hash with unexpected length"
            ),
        }
    }

    pub(crate) fn record_epoch(&self, epoch: Epoch) {
        self.inner.write().current_epoch = epoch;
    }

    pub(crate) fn record_missed_rounds(&self, missed: u64) {
        self.inner.write().last_missed_rounds = missed;
    }

    pub(crate) fn record_processed_header(&self) {
        let mut inner = self.inner.write();
        inner.processed_headers = inner.processed_headers.saturating_add(1);
    }
}
