use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{StoreError, VoteRecord, VoteStore};
use crate::model::{election::ElectionId, nullifier::Nullifier};

const SHARDS: usize = 64;

type Shard = HashMap<Nullifier, BTreeMap<ElectionId, VoteRecord>>;

/// An in-process vote store. Nothing survives a restart.
///
/// Records are spread over mutex-protected shards selected by nullifier, so
/// the check-then-insert for a key locks only the shard owning that key.
#[derive(Debug)]
pub struct MemoryStore {
    shards: Vec<Mutex<Shard>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::default()).collect(),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, nullifier: &Nullifier) -> MutexGuard<'_, Shard> {
        let index = usize::from(nullifier.as_bytes()[0]) % SHARDS;
        // Every critical section leaves the shard consistent, so poisoning is ignored.
        self.shards[index].lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Overwrite a stored record in place, bypassing the ledger.
    #[cfg(test)]
    pub(crate) fn tamper(
        &self,
        nullifier: &Nullifier,
        election_id: &str,
        edit: impl FnOnce(&mut VoteRecord),
    ) {
        if let Some(record) = self
            .shard(nullifier)
            .get_mut(nullifier)
            .and_then(|votes| votes.get_mut(election_id))
        {
            edit(record);
        }
    }
}

#[rocket::async_trait]
impl VoteStore for MemoryStore {
    async fn insert_unique(&self, record: VoteRecord) -> Result<(), StoreError> {
        let mut shard = self.shard(&record.nullifier);
        let votes = shard.entry(record.nullifier).or_default();
        if votes.contains_key(&record.election_id) {
            return Err(StoreError::Duplicate);
        }
        votes.insert(record.election_id.clone(), record);
        Ok(())
    }

    async fn find(
        &self,
        nullifier: &Nullifier,
        election_id: &str,
    ) -> Result<Option<VoteRecord>, StoreError> {
        Ok(self
            .shard(nullifier)
            .get(nullifier)
            .and_then(|votes| votes.get(election_id))
            .cloned())
    }

    async fn find_by_nullifier(
        &self,
        nullifier: &Nullifier,
    ) -> Result<Option<VoteRecord>, StoreError> {
        Ok(self
            .shard(nullifier)
            .get(nullifier)
            .and_then(|votes| votes.values().next())
            .cloned())
    }

    async fn records_for(&self, election_id: &str) -> Result<Vec<VoteRecord>, StoreError> {
        let mut records = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock().unwrap_or_else(|e| e.into_inner());
            records.extend(
                shard
                    .values()
                    .filter_map(|votes| votes.get(election_id))
                    .cloned(),
            );
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::model::nullifier::NullifierDeriver;
    use crate::proof::NullifierSeed;

    fn record(seed: u8, election_id: &str) -> VoteRecord {
        VoteRecord {
            nullifier: NullifierDeriver::derive(&NullifierSeed::from_bytes([seed; 32]), election_id),
            election_id: election_id.to_string(),
            candidate_id: "A".to_string(),
            committed_at: Utc::now(),
            integrity_tag: String::new(),
        }
    }

    #[rocket::async_test]
    async fn insert_is_unique_per_key() {
        let store = MemoryStore::new();
        store.insert_unique(record(1, "E1")).await.unwrap();
        assert_eq!(
            store.insert_unique(record(1, "E1")).await,
            Err(StoreError::Duplicate)
        );
        store.insert_unique(record(1, "E2")).await.unwrap();
        store.insert_unique(record(2, "E1")).await.unwrap();
        assert_eq!(store.records_for("E1").await.unwrap().len(), 2);
        assert_eq!(store.records_for("E3").await.unwrap().len(), 0);
    }

    #[rocket::async_test]
    async fn lookups() {
        let store = MemoryStore::new();
        let stored = record(1, "E1");
        store.insert_unique(stored.clone()).await.unwrap();
        assert_eq!(
            store.find(&stored.nullifier, "E1").await.unwrap(),
            Some(stored.clone())
        );
        assert_eq!(store.find(&stored.nullifier, "E2").await.unwrap(), None);
        assert_eq!(
            store.find_by_nullifier(&stored.nullifier).await.unwrap(),
            Some(stored)
        );
        assert_eq!(
            store.find_by_nullifier(&record(2, "E1").nullifier).await.unwrap(),
            None
        );
    }

    #[test]
    fn concurrent_inserts_of_one_key_commit_once() {
        let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .build()
            .unwrap();
        runtime.block_on(async {
            let store = Arc::new(MemoryStore::new());
            let tasks: Vec<_> = (0..64)
                .map(|_| {
                    let store = store.clone();
                    rocket::tokio::spawn(async move { store.insert_unique(record(9, "E1")).await })
                })
                .collect();
            let mut committed = 0;
            let mut duplicates = 0;
            for task in tasks {
                match task.await.unwrap() {
                    Ok(()) => committed += 1,
                    Err(StoreError::Duplicate) => duplicates += 1,
                    Err(e) => panic!("unexpected {e}"),
                }
            }
            assert_eq!((committed, duplicates), (1, 63));
        });
    }
}
