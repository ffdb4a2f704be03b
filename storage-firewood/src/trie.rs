use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::kv::{FirewoodKv, Hash, KvError, Revision};
use crate::tree::merkle_root;

const COMMIT_METRIC: &str = "firewood.trie.commits";
const COMMIT_DESC: &str = "count of firewood trie commits";
const LEAVES_METRIC: &str = "firewood.trie.leaves";

/// Error type reported by [`FirewoodTrie`].
#[derive(Debug, Error)]
pub enum TrieError {
    #[error("kv error: {0}")]
    Kv(#[from] KvError),
    #[error("root {} is not a retained revision", hex::encode(.0))]
    UnknownRoot(Hash),
    #[error("journal snapshot {requested} is beyond journal length {len}")]
    SnapshotOutOfRange { requested: usize, len: usize },
}

#[derive(Clone, Debug)]
struct JournalEntry {
    key: Vec<u8>,
    previous: Option<Vec<u8>>,
}

/// One `(key, value)` pair yielded while scanning a revision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrieLeaf {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Ordered iterator over the leaves of a single revision. The iterator owns a
/// reference to the immutable image, so the trie may keep changing while a
/// scan is in progress.
pub struct Leaves {
    image: Revision,
    cursor: Option<Vec<u8>>,
    started: bool,
}

impl Iterator for Leaves {
    type Item = TrieLeaf;

    fn next(&mut self) -> Option<TrieLeaf> {
        use std::ops::Bound::{Excluded, Unbounded};

        let next = if !self.started {
            self.started = true;
            self.image.iter().next()
        } else {
            let cursor = self.cursor.as_ref()?;
            self.image
                .range::<Vec<u8>, _>((Excluded(cursor), Unbounded))
                .next()
        };
        match next {
            Some((key, value)) => {
                self.cursor = Some(key.clone());
                Some(TrieLeaf {
                    key: key.clone(),
                    value: value.clone(),
                })
            }
            None => {
                self.cursor = None;
                None
            }
        }
    }
}

/// Merkleized key/value trie with an undo journal and a bounded window of
/// committed revisions.
///
/// Mutations land in a working image and are journaled so that callers can
/// roll back to any earlier journal length. [`FirewoodTrie::commit`] seals the
/// working image as a revision (and appends it to the WAL when the trie is
/// file backed); [`FirewoodTrie::recreate`] switches the working image to any
/// retained revision.
pub struct FirewoodTrie {
    working: BTreeMap<Vec<u8>, Vec<u8>>,
    journal: Vec<JournalEntry>,
    revisions: VecDeque<(Hash, Revision)>,
    retain: usize,
    backend: Option<FirewoodKv>,
    cached_root: Option<Hash>,
}

impl FirewoodTrie {
    pub const DEFAULT_RETAINED_REVISIONS: usize = 16;

    /// Trie kept entirely in memory.
    pub fn in_memory(retain: usize) -> Self {
        let mut trie = FirewoodTrie {
            working: BTreeMap::new(),
            journal: Vec::new(),
            revisions: VecDeque::new(),
            retain: retain.max(1),
            backend: None,
            cached_root: None,
        };
        let root = trie.root_hash();
        trie.push_revision(root);
        trie
    }

    /// Trie persisted through a WAL in `directory`. Revisions still present in
    /// the log are restored.
    pub fn open<P: AsRef<Path>>(directory: P, retain: usize) -> Result<Self, TrieError> {
        let kv = FirewoodKv::open(directory, retain)?;
        let mut trie = FirewoodTrie {
            working: kv.state().clone(),
            journal: Vec::new(),
            revisions: kv.revisions().cloned().collect(),
            retain: retain.max(1),
            backend: Some(kv),
            cached_root: None,
        };
        if trie.revisions.is_empty() {
            let root = trie.root_hash();
            trie.push_revision(root);
        }
        debug!(
            revisions = trie.revisions.len(),
            leaves = trie.working.len(),
            root = %hex::encode(trie.root_hash()),
            "opened firewood trie"
        );
        Ok(trie)
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.working.get(key).map(Vec::as_slice)
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let previous = self.working.insert(key.clone(), value);
        self.journal.push(JournalEntry { key, previous });
        self.cached_root = None;
    }

    pub fn delete(&mut self, key: &[u8]) {
        let previous = self.working.remove(key);
        if previous.is_some() {
            self.journal.push(JournalEntry {
                key: key.to_vec(),
                previous,
            });
            self.cached_root = None;
        }
    }

    pub fn len(&self) -> usize {
        self.working.len()
    }

    pub fn is_empty(&self) -> bool {
        self.working.is_empty()
    }

    /// Root of the working image, committed or not.
    pub fn root_hash(&mut self) -> Hash {
        if let Some(root) = self.cached_root {
            return root;
        }
        let root = merkle_root(
            self.working
                .iter()
                .map(|(key, value)| (key.as_slice(), value.as_slice())),
        );
        self.cached_root = Some(root);
        root
    }

    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// Undo every mutation recorded after journal position `snapshot`.
    pub fn revert_to_snapshot(&mut self, snapshot: usize) -> Result<(), TrieError> {
        if snapshot > self.journal.len() {
            return Err(TrieError::SnapshotOutOfRange {
                requested: snapshot,
                len: self.journal.len(),
            });
        }
        while self.journal.len() > snapshot {
            let Some(entry) = self.journal.pop() else {
                break;
            };
            match entry.previous {
                Some(value) => {
                    self.working.insert(entry.key, value);
                }
                None => {
                    self.working.remove(&entry.key);
                }
            }
        }
        self.cached_root = None;
        trace!(snapshot, "reverted firewood trie journal");
        Ok(())
    }

    /// Seal the working image as a revision and return its root.
    pub fn commit(&mut self) -> Result<Hash, TrieError> {
        let root = self.root_hash();
        if let Some(kv) = self.backend.as_mut() {
            stage_diff(kv, &self.working);
            if kv.has_pending() {
                let persisted = kv.commit()?;
                debug_assert_eq!(persisted, root);
            }
        }
        self.journal.clear();
        self.push_revision(root);

        metrics::describe_counter!(COMMIT_METRIC, COMMIT_DESC);
        metrics::counter!(COMMIT_METRIC).increment(1);
        metrics::gauge!(LEAVES_METRIC).set(self.working.len() as f64);
        debug!(root = %hex::encode(root), leaves = self.working.len(), "committed firewood trie");
        Ok(root)
    }

    /// Replace the working image with the retained revision `root`. Pending
    /// mutations are discarded.
    pub fn recreate(&mut self, root: &Hash) -> Result<(), TrieError> {
        if self.root_hash() == *root {
            self.journal.clear();
            return Ok(());
        }
        let image = self.revision(root).ok_or(TrieError::UnknownRoot(*root))?;
        self.working = image.as_ref().clone();
        self.journal.clear();
        self.cached_root = Some(*root);
        debug!(root = %hex::encode(root), "recreated firewood trie");
        Ok(())
    }

    /// Scan the leaves of `root`, which may be the working image or any
    /// retained revision.
    pub fn leaves(&mut self, root: &Hash) -> Result<Leaves, TrieError> {
        let image = if self.root_hash() == *root {
            Arc::new(self.working.clone())
        } else {
            self.revision(root).ok_or(TrieError::UnknownRoot(*root))?
        };
        Ok(Leaves {
            image,
            cursor: None,
            started: false,
        })
    }

    /// Roots of the retained revisions, oldest first.
    pub fn retained_roots(&self) -> Vec<Hash> {
        self.revisions.iter().map(|(root, _)| *root).collect()
    }

    fn revision(&self, root: &Hash) -> Option<Revision> {
        self.revisions
            .iter()
            .rev()
            .find(|(candidate, _)| candidate == root)
            .map(|(_, image)| Arc::clone(image))
    }

    fn push_revision(&mut self, root: Hash) {
        if self.revisions.back().map(|(last, _)| *last) == Some(root) {
            return;
        }
        self.revisions
            .push_back((root, Arc::new(self.working.clone())));
        while self.revisions.len() > self.retain {
            self.revisions.pop_front();
        }
    }
}

/// Stage the difference between the last durable image and `working`.
fn stage_diff(kv: &mut FirewoodKv, working: &BTreeMap<Vec<u8>, Vec<u8>>) {
    let removed: Vec<Vec<u8>> = kv
        .state()
        .keys()
        .filter(|key| !working.contains_key(*key))
        .cloned()
        .collect();
    for key in removed {
        kv.delete(&key);
    }
    let changed: Vec<(Vec<u8>, Vec<u8>)> = working
        .iter()
        .filter(|(key, value)| kv.state().get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    for (key, value) in changed {
        kv.put(key, value);
    }
}
