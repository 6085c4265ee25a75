//! Shard-status cache (spec.md §4.E): latest known tip per shard, updated by
//! gossip from slaves and by successful `AddRootBlock` broadcasts.
//! Read-mostly workload; writes are monotone per shard.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::MasterError;
use crate::types::{Branch, FullShardId, ShardStatus};

#[derive(Default)]
pub struct ShardStatusCache {
    tips: RwLock<HashMap<FullShardId, ShardStatus>>,
}

impl ShardStatusCache {
    pub fn new() -> Self {
        ShardStatusCache::default()
    }

    /// Overwrites the cached tip only if `status` is strictly newer, or
    /// equal height with greater total difficulty (spec.md §3 invariant).
    pub fn update(&self, status: ShardStatus) {
        let mut tips = self.tips.write();
        let replace = match tips.get(&status.branch.full_shard_id()) {
            Some(existing) => existing.should_replace_with(&status),
            None => true,
        };
        if replace {
            tips.insert(status.branch.full_shard_id(), status);
        }
    }

    pub fn get(&self, branch: Branch) -> Option<ShardStatus> {
        self.tips.read().get(&branch.full_shard_id()).copied()
    }

    /// Translates `latest` into a concrete height before dispatch; fails
    /// with [`MasterError::UnknownShard`] if the shard has never reported.
    pub fn resolve_latest_height(&self, branch: Branch) -> Result<u64, MasterError> {
        self.get(branch).map(|s| s.height).ok_or(MasterError::UnknownShard(branch.full_shard_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hash256;

    fn status(branch: u32, height: u64, difficulty: u128) -> ShardStatus {
        ShardStatus { branch: Branch(branch), height, hash: Hash256::ZERO, total_difficulty: difficulty, timestamp: 0 }
    }

    #[test]
    fn routes_after_update_and_rejects_unknown_shard() {
        let cache = ShardStatusCache::new();
        cache.update(status(2, 0, 10));
        assert_eq!(cache.resolve_latest_height(Branch(2)).unwrap(), 0);
        assert!(cache.resolve_latest_height(Branch(2222)).is_err());
    }

    #[test]
    fn ignores_stale_updates() {
        let cache = ShardStatusCache::new();
        cache.update(status(2, 10, 100));
        cache.update(status(2, 5, 999));
        assert_eq!(cache.get(Branch(2)).unwrap().height, 10);

        cache.update(status(2, 10, 50));
        assert_eq!(cache.get(Branch(2)).unwrap().total_difficulty, 100);

        cache.update(status(2, 10, 150));
        assert_eq!(cache.get(Branch(2)).unwrap().total_difficulty, 150);
    }
}
