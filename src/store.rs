//! Embedded key-value store boundary (spec.md §6.3).
//!
//! The store itself is an external collaborator (an opaque byte-blob KV
//! engine); this module only fixes the prefix layout and exposes the
//! injectable `createDB` seam design note 1 asks for, as a `StoreFactory`
//! closure rather than a monkey-patched global constructor.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::types::Hash256;

pub const KEY_DATABASE_VERSION: &[u8] = b"DatabaseVersion";
pub const KEY_LAST_HEADER: &[u8] = b"LastHeader";
pub const KEY_LAST_BLOCK: &[u8] = b"LastBlock";
pub const KEY_LAST_FAST: &[u8] = b"LastFast";
pub const KEY_RB_COMMITTING: &[u8] = b"rbCommitting";

fn prefixed(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + suffix.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(suffix);
    key
}

pub fn header_key(hash: &Hash256) -> Vec<u8> {
    prefixed(b"h", &hash.0)
}

pub fn root_height_key(height: u64) -> Vec<u8> {
    prefixed(b"rn", &height.to_be_bytes())
}

pub fn minor_height_key(height: u64) -> Vec<u8> {
    prefixed(b"mn", &height.to_be_bytes())
}

pub fn height_by_hash_key(hash: &Hash256) -> Vec<u8> {
    prefixed(b"H", &hash.0)
}

pub fn body_key(hash: &Hash256) -> Vec<u8> {
    prefixed(b"b", &hash.0)
}

pub fn receipts_key(hash: &Hash256) -> Vec<u8> {
    prefixed(b"r", &hash.0)
}

pub fn tx_location_key(tx_hash: &Hash256) -> Vec<u8> {
    prefixed(b"l", &tx_hash.0)
}

pub fn latest_minor_headers_key(root_hash: &Hash256) -> Vec<u8> {
    prefixed(b"lmh", &root_hash.0)
}

pub fn last_confirmed_minor_header_key(root_hash: &Hash256) -> Vec<u8> {
    prefixed(b"rLM", &root_hash.0)
}

pub fn minor_block_count_key(full_shard_id: u32, height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + 4 + 4);
    key.extend_from_slice(b"cntM");
    key.extend_from_slice(&full_shard_id.to_be_bytes());
    key.extend_from_slice(&(height as u32).to_be_bytes());
    key
}

pub fn minor_coinbase_key(minor_hash: &Hash256) -> Vec<u8> {
    prefixed(b"mhC", &minor_hash.0)
}

pub fn confirming_root_hash_key(minor_block_id: &[u8]) -> Vec<u8> {
    prefixed(b"mr", minor_block_id)
}

/// Opaque byte-blob key-value store, as described in spec.md §6.3.
pub trait Store: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn put(&self, key: &[u8], value: &[u8]);
    fn delete(&self, key: &[u8]);
}

/// In-memory `Store` used by tests and by [`crate::store::StoreFactory`]'s
/// default, mirroring the Go test harness's `service.NewQkcMemoryDB`.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl Store for MemoryStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.read().get(key).cloned()
    }

    fn put(&self, key: &[u8], value: &[u8]) {
        self.inner.write().insert(key.to_vec(), value.to_vec());
    }

    fn delete(&self, key: &[u8]) {
        self.inner.write().remove(key);
    }
}

/// Injectable store constructor (design note 1's `createDB` seam).
pub type StoreFactory = Arc<dyn Fn() -> Arc<dyn Store> + Send + Sync>;

pub fn memory_store_factory() -> StoreFactory {
    Arc::new(|| Arc::new(MemoryStore::default()) as Arc<dyn Store>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrips() {
        let store = MemoryStore::default();
        let hash = Hash256([7u8; 32]);
        store.put(&header_key(&hash), b"header-bytes");
        assert_eq!(store.get(&header_key(&hash)), Some(b"header-bytes".to_vec()));
        store.delete(&header_key(&hash));
        assert_eq!(store.get(&header_key(&hash)), None);
    }
}
