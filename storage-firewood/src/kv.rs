use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::tree::merkle_root;
use crate::wal::{FileWal, SequenceNumber, WalError, WriteAheadLog};

/// 32-byte hash output used when sealing commits.
pub type Hash = [u8; 32];

/// Immutable key/value image of one committed revision.
pub type Revision = Arc<BTreeMap<Vec<u8>, Vec<u8>>>;

/// Binary log record encoded into the WAL.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum LogRecord {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    Commit { root: Hash },
}

/// Error type reported by the Firewood KV engine.
#[derive(Debug, Error)]
pub enum KvError {
    /// Failure caused by the underlying WAL subsystem.
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    /// Persistence layer failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A log record could not be encoded or decoded.
    #[error("log record codec error: {0}")]
    Codec(#[from] bincode::Error),
    /// Attempted to commit without any staged mutations.
    #[error("no pending mutations to commit")]
    EmptyCommit,
}

/// Firewood key-value engine that stores all data inside a single append-only
/// log. The engine keeps the latest committed image in memory while the log
/// provides a durable history that can be replayed to recover it, together
/// with the most recent `retain` committed revisions.
#[derive(Debug)]
pub struct FirewoodKv {
    directory: PathBuf,
    wal: FileWal,
    state: BTreeMap<Vec<u8>, Vec<u8>>,
    pending: Vec<LogRecord>,
    commit_boundaries: VecDeque<(SequenceNumber, Hash)>,
    revisions: VecDeque<(Hash, Revision)>,
    retain: usize,
}

impl FirewoodKv {
    /// Open (or create) a Firewood key-value store located at `directory`.
    pub fn open<P: AsRef<Path>>(directory: P, retain: usize) -> Result<Self, KvError> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory)?;
        let wal = FileWal::open(directory)?;

        let mut kv = FirewoodKv {
            directory: directory.to_path_buf(),
            wal,
            state: BTreeMap::new(),
            pending: Vec::new(),
            commit_boundaries: VecDeque::new(),
            revisions: VecDeque::new(),
            retain: retain.max(1),
        };

        for (seq, record) in kv.replay()? {
            kv.apply_record(seq, record);
        }
        // Mutations after the last commit marker were never sealed.
        if let Some((_, revision)) = kv.revisions.back() {
            kv.state = revision.as_ref().clone();
        } else {
            kv.state.clear();
        }
        debug!(
            directory = %kv.directory.display(),
            revisions = kv.revisions.len(),
            leaves = kv.state.len(),
            "replayed firewood wal"
        );
        Ok(kv)
    }

    pub fn base_dir(&self) -> &Path {
        &self.directory
    }

    fn replay(&self) -> Result<Vec<(SequenceNumber, LogRecord)>, KvError> {
        let records = self.wal.replay_from(0)?;
        let mut decoded = Vec::with_capacity(records.len());
        for (seq, raw) in records {
            let record = bincode::deserialize(&raw).map_err(|_| WalError::Corrupt(seq))?;
            decoded.push((seq, record));
        }
        Ok(decoded)
    }

    fn apply_record(&mut self, sequence: SequenceNumber, record: LogRecord) {
        match record {
            LogRecord::Put { key, value } => {
                self.state.insert(key, value);
            }
            LogRecord::Delete { key } => {
                self.state.remove(&key);
            }
            LogRecord::Commit { root } => {
                self.commit_boundaries.push_back((sequence, root));
                self.push_revision(root);
            }
        }
    }

    fn push_revision(&mut self, root: Hash) {
        if self.revisions.back().map(|(last, _)| *last) == Some(root) {
            return;
        }
        self.revisions
            .push_back((root, Arc::new(self.state.clone())));
        while self.revisions.len() > self.retain {
            self.revisions.pop_front();
        }
    }

    fn hash_state(&self) -> Hash {
        merkle_root(
            self.state
                .iter()
                .map(|(key, value)| (key.as_slice(), value.as_slice())),
        )
    }

    fn revision(&self, root: &Hash) -> Option<Revision> {
        self.revisions
            .iter()
            .find(|(candidate, _)| candidate == root)
            .map(|(_, image)| Arc::clone(image))
    }

    /// Fold every commit older than the retention window into one full image
    /// so that replay reproduces exactly the retained revisions.
    fn retain_recent(&mut self) -> Result<(), KvError> {
        if self.commit_boundaries.len() <= self.retain {
            return Ok(());
        }
        let keep_from = self.commit_boundaries.len() - self.retain;
        let Some(&(sequence, root)) = self.commit_boundaries.get(keep_from) else {
            return Ok(());
        };
        let Some(image) = self.revision(&root) else {
            return Ok(());
        };

        let tail = self.wal.replay_from(sequence + 1)?;
        let mut records = Vec::with_capacity(image.len() + 1 + tail.len());
        for (key, value) in image.iter() {
            records.push(bincode::serialize(&LogRecord::Put {
                key: key.clone(),
                value: value.clone(),
            })?);
        }
        records.push(bincode::serialize(&LogRecord::Commit { root })?);
        let image_commit = records.len() - 1;
        records.extend(tail.into_iter().map(|(_, raw)| raw));

        let sequences = self.wal.rewrite(&records)?;
        let mut boundaries = VecDeque::new();
        for (position, (seq, raw)) in sequences.iter().zip(&records).enumerate() {
            if position == image_commit {
                boundaries.push_back((*seq, root));
            } else if position > image_commit {
                if let LogRecord::Commit { root } = bincode::deserialize(raw)? {
                    boundaries.push_back((*seq, root));
                }
            }
        }
        debug!(
            directory = %self.directory.display(),
            records = records.len(),
            commits = boundaries.len(),
            "compacted firewood wal"
        );
        self.commit_boundaries = boundaries;
        Ok(())
    }

    /// Stage a put mutation.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.state.insert(key.clone(), value.clone());
        self.pending.push(LogRecord::Put { key, value });
    }

    /// Fetch a value by key from the latest image.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.state.get(key).cloned()
    }

    /// Stage a delete mutation.
    pub fn delete(&mut self, key: &[u8]) {
        self.state.remove(key);
        self.pending.push(LogRecord::Delete { key: key.to_vec() });
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Flush staged mutations to the WAL and return the resulting commit hash.
    pub fn commit(&mut self) -> Result<Hash, KvError> {
        if self.pending.is_empty() {
            return Err(KvError::EmptyCommit);
        }

        let root = self.hash_state();
        self.pending.push(LogRecord::Commit { root });

        let pending = std::mem::take(&mut self.pending);
        for record in pending {
            let raw = bincode::serialize(&record)?;
            let seq = self.wal.append(&raw)?;
            if let LogRecord::Commit { root } = record {
                self.commit_boundaries.push_back((seq, root));
            }
        }

        self.wal.sync()?;
        self.push_revision(root);
        self.retain_recent()?;
        Ok(root)
    }

    /// Latest committed image.
    pub fn state(&self) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        &self.state
    }

    /// Committed revisions recovered from the log, oldest first.
    pub fn revisions(&self) -> impl Iterator<Item = &(Hash, Revision)> {
        self.revisions.iter()
    }

    /// Iterate over the in-memory state for a specific prefix.
    pub fn scan_prefix<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a {
        let start = prefix.to_vec();
        self.state
            .range(start..)
            .take_while(move |(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
    }
}
