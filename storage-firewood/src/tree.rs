use crate::kv::Hash;

const EMPTY_DOMAIN: &[u8] = b"firewood-empty";
const LEAF_DOMAIN: &[u8] = b"firewood-leaf";
const NODE_DOMAIN: &[u8] = b"firewood-node";

/// Hash a single `(key, value)` leaf with length framing so that key/value
/// boundaries cannot be shifted between leaves.
pub fn leaf_hash(key: &[u8], value: &[u8]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(LEAF_DOMAIN);
    hasher.update(&(key.len() as u32).to_le_bytes());
    hasher.update(key);
    hasher.update(&(value.len() as u32).to_le_bytes());
    hasher.update(value);
    hasher.finalize().into()
}

/// Root of a trie holding no leaves.
pub fn empty_root() -> Hash {
    blake3::hash(EMPTY_DOMAIN).into()
}

/// Compute a binary merkle root over leaves supplied in ascending key order.
///
/// Callers iterate a `BTreeMap`, so the ordering is canonical and independent
/// of insertion history. An odd node at any level is paired with itself.
pub fn merkle_root<'a, I>(leaves: I) -> Hash
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    let mut level: Vec<Hash> = leaves
        .into_iter()
        .map(|(key, value)| leaf_hash(key, value))
        .collect();
    if level.is_empty() {
        return empty_root();
    }
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for chunk in level.chunks(2) {
            let left = chunk[0];
            let right = if chunk.len() == 2 { chunk[1] } else { chunk[0] };
            let mut hasher = blake3::Hasher::new();
            hasher.update(NODE_DOMAIN);
            hasher.update(&left);
            hasher.update(&right);
            next.push(hasher.finalize().into());
        }
        level = next;
    }
    level[0]
}
