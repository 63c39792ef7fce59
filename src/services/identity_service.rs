use std::sync::Arc;

use tracing::debug;

use crate::errors::StoreError;
use crate::models::GlobalId;
use crate::store::{JobStore, StoreTx};

/// Issues globally unique ids for any record type.
///
/// Numbers come from the store's atomic sequence; the ledger row is written on
/// the caller's transaction so it commits or rolls back with the entity it names.
#[derive(Clone)]
pub struct IdentityAllocator {
    store: Arc<dyn JobStore>,
}

impl IdentityAllocator {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Allocates inside an already open transaction.
    pub async fn allocate_in(
        tx: &mut dyn StoreTx,
        owning_table: &str,
        owning_class: &str,
    ) -> Result<GlobalId, StoreError> {
        let gid = tx.allocate_id(owning_table, owning_class).await?;
        debug!("Allocated global id {} for {} ({})", gid.id, owning_table, owning_class);
        Ok(gid)
    }

    /// Allocates in a transaction of its own, for ids not tied to a pending insert.
    pub async fn allocate(&self, owning_table: &str, owning_class: &str) -> Result<GlobalId, StoreError> {
        let mut tx = self.store.begin().await?;
        let gid = Self::allocate_in(tx.as_mut(), owning_table, owning_class).await?;
        tx.commit().await?;
        Ok(gid)
    }

    pub async fn lookup(&self, id: i64) -> Result<Option<GlobalId>, StoreError> {
        self.store.find_global_id(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryJobStore;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_allocations_record_owning_table() {
        let allocator = IdentityAllocator::new(Arc::new(MemoryJobStore::new()));

        let tables = ["ticker", "sma", "ticker"];
        let mut ids = Vec::new();
        for table in tables {
            ids.push(allocator.allocate(table, "Scenario").await.unwrap());
        }

        let distinct: HashSet<i64> = ids.iter().map(|g| g.id).collect();
        assert_eq!(distinct.len(), 3);

        for (gid, table) in ids.iter().zip(tables) {
            let recorded = allocator.lookup(gid.id).await.unwrap().unwrap();
            assert_eq!(recorded.table_name, table);
            assert!(recorded.claimed);
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_get_distinct_ids() {
        let store = MemoryJobStore::new();
        let allocator = IdentityAllocator::new(Arc::new(store.clone()));

        let mut handles = Vec::new();
        for i in 0..100 {
            let allocator = allocator.clone();
            handles.push(tokio::spawn(async move {
                let table = if i % 3 == 0 { "job_unit" } else { "core_ticker" };
                allocator.allocate(table, "Concurrent").await.unwrap().id
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap()), "duplicate id issued");
        }
        assert_eq!(ids.len(), 100);
        assert_eq!(store.global_ids().len(), 100);
    }

    #[tokio::test]
    async fn test_rolled_back_allocation_leaves_no_ledger_row() {
        let store = MemoryJobStore::new();
        let allocator = IdentityAllocator::new(Arc::new(store.clone()));

        let abandoned = {
            let mut tx = store.begin().await.unwrap();
            IdentityAllocator::allocate_in(tx.as_mut(), "job_unit", "seed_sma").await.unwrap()
        };

        assert!(allocator.lookup(abandoned.id).await.unwrap().is_none());
        let next = allocator.allocate("job_unit", "seed_sma").await.unwrap();
        assert_ne!(next.id, abandoned.id);
    }
}
