//! Firewood storage: an append-only WAL, a key/value engine replayed from it,
//! and a merkleized trie with an undo journal and retained revisions.

pub mod kv;
pub mod tree;
pub mod trie;
pub mod wal;

pub use crate::kv::{FirewoodKv, Hash, KvError};
pub use crate::tree::{empty_root, merkle_root};
pub use crate::trie::{FirewoodTrie, Leaves, TrieError, TrieLeaf};
pub use crate::wal::{FileWal, WalError, WriteAheadLog};
