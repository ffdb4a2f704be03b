use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::RootHash;
use crate::{Epoch, ShardId, METACHAIN_SHARD_ID};

pub type HeaderHash = Vec<u8>;

/// Headers the processor may need while walking back from the current one,
/// keyed by header hash.
pub type HeaderCache = HashMap<HeaderHash, Header>;

/// Accessors shared by shard and metachain headers.
pub trait HeaderHandler {
    fn nonce(&self) -> u64;
    fn round(&self) -> u64;
    fn epoch(&self) -> Epoch;
    fn shard_id(&self) -> ShardId;
    fn prev_hash(&self) -> &[u8];
    fn prev_rand_seed(&self) -> &[u8];
    fn rand_seed(&self) -> &[u8];
    fn pub_keys_bitmap(&self) -> &[u8];
    fn accumulated_fees(&self) -> u128;
    fn developer_fees(&self) -> u128;
    fn is_start_of_epoch_block(&self) -> bool;
}

/// Epoch whose consensus group produced `header`. The first block of an epoch
/// is still signed by the previous epoch's group.
pub fn compute_epoch<H: HeaderHandler + ?Sized>(header: &H) -> Epoch {
    let epoch = header.epoch();
    if header.is_start_of_epoch_block() && epoch > 0 {
        epoch - 1
    } else {
        epoch
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardHeader {
    pub nonce: u64,
    pub round: u64,
    pub epoch: Epoch,
    pub shard_id: ShardId,
    pub prev_hash: HeaderHash,
    pub prev_rand_seed: Vec<u8>,
    pub rand_seed: Vec<u8>,
    pub pub_keys_bitmap: Vec<u8>,
    pub accumulated_fees: u128,
    pub developer_fees: u128,
    pub epoch_start: bool,
}

/// Summary of a finalized shard block as notarized by a metachain header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardData {
    pub header_hash: HeaderHash,
    pub shard_id: ShardId,
    pub nonce: u64,
    pub round: u64,
    pub epoch: Epoch,
    pub prev_hash: HeaderHash,
    pub prev_rand_seed: Vec<u8>,
    pub pub_keys_bitmap: Vec<u8>,
    pub accumulated_fees: u128,
    pub developer_fees: u128,
}

impl ShardData {
    pub fn from_header(header_hash: impl Into<HeaderHash>, header: &ShardHeader) -> Self {
        Self {
            header_hash: header_hash.into(),
            shard_id: header.shard_id,
            nonce: header.nonce,
            round: header.round,
            epoch: header.epoch,
            prev_hash: header.prev_hash.clone(),
            prev_rand_seed: header.prev_rand_seed.clone(),
            pub_keys_bitmap: header.pub_keys_bitmap.clone(),
            accumulated_fees: header.accumulated_fees,
            developer_fees: header.developer_fees,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaHeader {
    pub nonce: u64,
    pub round: u64,
    pub epoch: Epoch,
    pub prev_hash: HeaderHash,
    pub prev_rand_seed: Vec<u8>,
    pub rand_seed: Vec<u8>,
    pub pub_keys_bitmap: Vec<u8>,
    pub accumulated_fees: u128,
    pub developer_fees: u128,
    pub epoch_start: bool,
    pub shard_info: Vec<ShardData>,
    pub validator_stats_root_hash: RootHash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Header {
    Shard(ShardHeader),
    Meta(MetaHeader),
}

impl Header {
    pub fn as_shard(&self) -> Option<&ShardHeader> {
        match self {
            Header::Shard(header) => Some(header),
            Header::Meta(_) => None,
        }
    }

    pub fn as_meta(&self) -> Option<&MetaHeader> {
        match self {
            Header::Meta(header) => Some(header),
            Header::Shard(_) => None,
        }
    }
}

impl From<ShardHeader> for Header {
    fn from(header: ShardHeader) -> Self {
        Header::Shard(header)
    }
}

impl From<MetaHeader> for Header {
    fn from(header: MetaHeader) -> Self {
        Header::Meta(header)
    }
}

impl HeaderHandler for ShardHeader {
    fn nonce(&self) -> u64 {
        self.nonce
    }
    fn round(&self) -> u64 {
        self.round
    }
    fn epoch(&self) -> Epoch {
        self.epoch
    }
    fn shard_id(&self) -> ShardId {
        self.shard_id
    }
    fn prev_hash(&self) -> &[u8] {
        &self.prev_hash
    }
    fn prev_rand_seed(&self) -> &[u8] {
        &self.prev_rand_seed
    }
    fn rand_seed(&self) -> &[u8] {
        &self.rand_seed
    }
    fn pub_keys_bitmap(&self) -> &[u8] {
        &self.pub_keys_bitmap
    }
    fn accumulated_fees(&self) -> u128 {
        self.accumulated_fees
    }
    fn developer_fees(&self) -> u128 {
        self.developer_fees
    }
    fn is_start_of_epoch_block(&self) -> bool {
        self.epoch_start
    }
}

impl HeaderHandler for MetaHeader {
    fn nonce(&self) -> u64 {
        self.nonce
    }
    fn round(&self) -> u64 {
        self.round
    }
    fn epoch(&self) -> Epoch {
        self.epoch
    }
    fn shard_id(&self) -> ShardId {
        METACHAIN_SHARD_ID
    }
    fn prev_hash(&self) -> &[u8] {
        &self.prev_hash
    }
    fn prev_rand_seed(&self) -> &[u8] {
        &self.prev_rand_seed
    }
    fn rand_seed(&self) -> &[u8] {
        &self.rand_seed
    }
    fn pub_keys_bitmap(&self) -> &[u8] {
        &self.pub_keys_bitmap
    }
    fn accumulated_fees(&self) -> u128 {
        self.accumulated_fees
    }
    fn developer_fees(&self) -> u128 {
        self.developer_fees
    }
    fn is_start_of_epoch_block(&self) -> bool {
        self.epoch_start
    }
}

macro_rules! delegate {
    ($self:ident, $method:ident) => {
        match $self {
            Header::Shard(header) => header.$method(),
            Header::Meta(header) => header.$method(),
        }
    };
}

impl HeaderHandler for Header {
    fn nonce(&self) -> u64 {
        delegate!(self, nonce)
    }
    fn round(&self) -> u64 {
        delegate!(self, round)
    }
    fn epoch(&self) -> Epoch {
        delegate!(self, epoch)
    }
    fn shard_id(&self) -> ShardId {
        delegate!(self, shard_id)
    }
    fn prev_hash(&self) -> &[u8] {
        delegate!(self, prev_hash)
    }
    fn prev_rand_seed(&self) -> &[u8] {
        delegate!(self, prev_rand_seed)
    }
    fn rand_seed(&self) -> &[u8] {
        delegate!(self, rand_seed)
    }
    fn pub_keys_bitmap(&self) -> &[u8] {
        delegate!(self, pub_keys_bitmap)
    }
    fn accumulated_fees(&self) -> u128 {
        delegate!(self, accumulated_fees)
    }
    fn developer_fees(&self) -> u128 {
        delegate!(self, developer_fees)
    }
    fn is_start_of_epoch_block(&self) -> bool {
        delegate!(self, is_start_of_epoch_block)
    }
}
