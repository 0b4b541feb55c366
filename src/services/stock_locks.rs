use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

/// Registry of per-warehouse read/write locks.
///
/// Publish and void hold read locks on the warehouses they touch, so
/// movements against disjoint warehouses proceed in parallel (row-level
/// serialization is handled by the stock position version column).
/// Recalculation holds the write lock, excluding every publish/void on that
/// warehouse for its duration. Locks are always acquired in sorted id order.
#[derive(Debug, Default)]
pub struct WarehouseLocks {
    locks: DashMap<Uuid, Arc<RwLock<()>>>,
}

impl WarehouseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, warehouse_id: Uuid) -> Arc<RwLock<()>> {
        self.locks
            .entry(warehouse_id)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Shared access for publish/void over the given warehouses
    pub async fn read_many(&self, warehouse_ids: &[Uuid]) -> Vec<OwnedRwLockReadGuard<()>> {
        let mut ids: Vec<Uuid> = warehouse_ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock_for(id).read_owned().await);
        }
        guards
    }

    /// Exclusive access for recalculation over the given warehouses
    pub async fn write_many(&self, warehouse_ids: &[Uuid]) -> Vec<OwnedRwLockWriteGuard<()>> {
        let mut ids: Vec<Uuid> = warehouse_ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock_for(id).write_owned().await);
        }
        guards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disjoint_warehouses_do_not_block() {
        let locks = WarehouseLocks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let _write_a = locks.write_many(&[a]).await;
        // A write lock on warehouse A must not block readers of warehouse B
        let read_b =
            tokio::time::timeout(std::time::Duration::from_millis(50), locks.read_many(&[b]))
                .await;
        assert!(read_b.is_ok());
    }

    #[tokio::test]
    async fn recalculation_excludes_publish_on_same_warehouse() {
        let locks = Arc::new(WarehouseLocks::new());
        let warehouse = Uuid::new_v4();

        let write_guard = locks.write_many(&[warehouse]).await;
        let contender = {
            let locks = locks.clone();
            tokio::time::timeout(std::time::Duration::from_millis(50), async move {
                locks.read_many(&[warehouse]).await
            })
        };
        assert!(contender.await.is_err());
        drop(write_guard);

        let unblocked =
            tokio::time::timeout(std::time::Duration::from_millis(50), locks.read_many(&[warehouse]))
                .await;
        assert!(unblocked.is_ok());
    }

    #[tokio::test]
    async fn duplicate_ids_are_collapsed() {
        let locks = WarehouseLocks::new();
        let warehouse = Uuid::new_v4();
        let guards = locks.read_many(&[warehouse, warehouse]).await;
        assert_eq!(guards.len(), 1);
    }
}
