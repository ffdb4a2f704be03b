use std::path::Path;

use storage_firewood::{FirewoodTrie, Hash, TrieError};
use thiserror::Error;

use crate::account::PeerAccount;

/// Root commitment of the peer accounts trie.
pub type RootHash = Hash;

#[derive(Debug, Error)]
pub enum AccountStoreError {
    #[error("trie error: {0}")]
    Trie(#[from] TrieError),
    #[error("peer account {pub_key} could not be decoded: {source}")]
    Decode {
        pub_key: String,
        #[source]
        source: bincode::Error,
    },
    #[error("peer account {pub_key} could not be encoded: {source}")]
    Encode {
        pub_key: String,
        #[source]
        source: bincode::Error,
    },
}

/// Leaves of one trie revision decoded into peer accounts.
pub type AccountLeaves = Box<dyn Iterator<Item = Result<PeerAccount, AccountStoreError>>>;

/// Authenticated key/value store of peer accounts keyed by public key.
///
/// Mutations are journaled; [`AccountStore::revert_to_snapshot`] undoes every
/// mutation made after [`AccountStore::journal_len`] returned the snapshot.
pub trait AccountStore {
    /// The stored account, or a fresh one when `pub_key` is unknown.
    fn load_account(&mut self, pub_key: &[u8]) -> Result<PeerAccount, AccountStoreError>;

    fn existing_account(&self, pub_key: &[u8]) -> Result<Option<PeerAccount>, AccountStoreError>;

    fn save_account(&mut self, account: &PeerAccount) -> Result<(), AccountStoreError>;

    fn commit(&mut self) -> Result<RootHash, AccountStoreError>;

    /// Root of the current working state, committed or not.
    fn root_hash(&mut self) -> Result<RootHash, AccountStoreError>;

    fn recreate_trie(&mut self, root: &RootHash) -> Result<(), AccountStoreError>;

    fn all_leaves(&mut self, root: &RootHash) -> Result<AccountLeaves, AccountStoreError>;

    fn journal_len(&self) -> usize;

    fn revert_to_snapshot(&mut self, snapshot: usize) -> Result<(), AccountStoreError>;
}

/// [`AccountStore`] over a [`FirewoodTrie`] with bincode encoded accounts.
pub struct PeerAccountsDb {
    trie: FirewoodTrie,
}

impl PeerAccountsDb {
    pub fn in_memory() -> Self {
        Self {
            trie: FirewoodTrie::in_memory(FirewoodTrie::DEFAULT_RETAINED_REVISIONS),
        }
    }

    pub fn open<P: AsRef<Path>>(directory: P, retain: usize) -> Result<Self, AccountStoreError> {
        Ok(Self {
            trie: FirewoodTrie::open(directory, retain)?,
        })
    }

    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    pub fn retained_roots(&self) -> Vec<RootHash> {
        self.trie.retained_roots()
    }
}

fn decode(pub_key: &[u8], bytes: &[u8]) -> Result<PeerAccount, AccountStoreError> {
    PeerAccount::from_bytes(bytes).map_err(|source| AccountStoreError::Decode {
        pub_key: hex::encode(pub_key),
        source,
    })
}

impl AccountStore for PeerAccountsDb {
    fn load_account(&mut self, pub_key: &[u8]) -> Result<PeerAccount, AccountStoreError> {
        Ok(self
            .existing_account(pub_key)?
            .unwrap_or_else(|| PeerAccount::new(pub_key)))
    }

    fn existing_account(&self, pub_key: &[u8]) -> Result<Option<PeerAccount>, AccountStoreError> {
        self.trie
            .get(pub_key)
            .map(|bytes| decode(pub_key, bytes))
            .transpose()
    }

    fn save_account(&mut self, account: &PeerAccount) -> Result<(), AccountStoreError> {
        let bytes = account
            .to_bytes()
            .map_err(|source| AccountStoreError::Encode {
                pub_key: hex::encode(account.pub_key()),
                source,
            })?;
        if self.trie.get(account.pub_key()) == Some(bytes.as_slice()) {
            return Ok(());
        }
        self.trie.put(account.pub_key().to_vec(), bytes);
        Ok(())
    }

    fn commit(&mut self) -> Result<RootHash, AccountStoreError> {
        Ok(self.trie.commit()?)
    }

    fn root_hash(&mut self) -> Result<RootHash, AccountStoreError> {
        Ok(self.trie.root_hash())
    }

    fn recreate_trie(&mut self, root: &RootHash) -> Result<(), AccountStoreError> {
        Ok(self.trie.recreate(root)?)
    }

    fn all_leaves(&mut self, root: &RootHash) -> Result<AccountLeaves, AccountStoreError> {
        let leaves = self.trie.leaves(root)?;
        Ok(Box::new(
            leaves.map(|leaf| decode(&leaf.key, &leaf.value)),
        ))
    }

    fn journal_len(&self) -> usize {
        self.trie.journal_len()
    }

    fn revert_to_snapshot(&mut self, snapshot: usize) -> Result<(), AccountStoreError> {
        Ok(self.trie.revert_to_snapshot(snapshot)?)
    }
}
