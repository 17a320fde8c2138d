use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use log::info;
use thiserror::Error;

use super::election::{Candidate, Election, ElectionError, ElectionId, ElectionSpec, ElectionState};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("election `{0}` not found")]
    NotFound(ElectionId),
    #[error("election `{0}` already exists")]
    AlreadyExists(ElectionId),
    #[error("election `{0}` has already opened")]
    ElectionAlreadyOpen(ElectionId),
    #[error(transparent)]
    Invalid(#[from] ElectionError),
}

/// Holds election definitions. Read-mostly: lookups share the lock, and a
/// lookup hands out an `Arc` so no lock is held while a caller uses the election.
#[derive(Debug, Default)]
pub struct ElectionRegistry {
    elections: RwLock<HashMap<ElectionId, Arc<Election>>>,
}

impl ElectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new election.
    pub fn create(&self, spec: ElectionSpec) -> Result<Arc<Election>, RegistryError> {
        let election = Arc::new(Election::try_from(spec)?);
        let mut elections = self.write();
        if elections.contains_key(election.id()) {
            return Err(RegistryError::AlreadyExists(election.id().to_string()));
        }
        elections.insert(election.id().to_string(), election.clone());
        info!("Registered election {}", election.id());
        Ok(election)
    }

    pub fn get(&self, election_id: &str) -> Result<Arc<Election>, RegistryError> {
        self.read()
            .get(election_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(election_id.to_string()))
    }

    /// Is the election open at `now`? Computed from the window on every call.
    pub fn is_open(&self, election_id: &str, now: DateTime<Utc>) -> Result<bool, RegistryError> {
        Ok(self.get(election_id)?.is_open(now))
    }

    /// Replace the candidate list of an election that has not yet opened.
    pub fn replace_candidates(
        &self,
        election_id: &str,
        candidates: Vec<Candidate>,
        now: DateTime<Utc>,
    ) -> Result<Arc<Election>, RegistryError> {
        let mut elections = self.write();
        let current = elections
            .get(election_id)
            .ok_or_else(|| RegistryError::NotFound(election_id.to_string()))?;
        if current.state(now) != ElectionState::Pending {
            return Err(RegistryError::ElectionAlreadyOpen(election_id.to_string()));
        }
        let updated = Arc::new(current.with_candidates(candidates)?);
        elections.insert(election_id.to_string(), updated.clone());
        Ok(updated)
    }

    /// All elections, ordered by start time and then ID.
    pub fn list(&self) -> Vec<Arc<Election>> {
        let mut elections: Vec<_> = self.read().values().cloned().collect();
        elections.sort_by(|a, b| {
            a.start_time()
                .cmp(&b.start_time())
                .then_with(|| a.id().cmp(b.id()))
        });
        elections
    }

    // The maps are never left half-updated, so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ElectionId, Arc<Election>>> {
        self.elections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ElectionId, Arc<Election>>> {
        self.elections.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::model::election::examples::*;

    #[test]
    fn create_and_get() {
        let registry = ElectionRegistry::new();
        registry.create(spec("E1")).unwrap();
        assert_eq!(registry.get("E1").unwrap().id(), "E1");
        assert_eq!(
            registry.get("E2").unwrap_err(),
            RegistryError::NotFound("E2".to_string())
        );
        assert_eq!(
            registry.create(spec("E1")).unwrap_err(),
            RegistryError::AlreadyExists("E1".to_string())
        );
    }

    #[test]
    fn is_open_is_computed_per_call() {
        let registry = ElectionRegistry::new();
        registry.create(spec("E1")).unwrap();
        assert!(!registry.is_open("E1", t0() - Duration::seconds(1)).unwrap());
        assert!(registry.is_open("E1", t0()).unwrap());
        assert!(!registry.is_open("E1", t1()).unwrap());
        assert!(registry.is_open("E2", t0()).is_err());
    }

    #[test]
    fn candidates_are_frozen_once_open() {
        let registry = ElectionRegistry::new();
        registry.create(spec("E1")).unwrap();

        let before = t0() - Duration::hours(1);
        let updated = registry
            .replace_candidates("E1", vec![candidate("A"), candidate("C")], before)
            .unwrap();
        assert!(updated.has_candidate("C"));
        assert!(registry.get("E1").unwrap().has_candidate("C"));

        assert_eq!(
            registry
                .replace_candidates("E1", vec![candidate("D")], t0())
                .unwrap_err(),
            RegistryError::ElectionAlreadyOpen("E1".to_string())
        );
        assert_eq!(
            registry
                .replace_candidates("E1", vec![], before)
                .unwrap_err(),
            RegistryError::Invalid(ElectionError::NoCandidates)
        );
    }

    #[test]
    fn list_is_ordered() {
        let registry = ElectionRegistry::new();
        let mut early = spec("Z");
        early.start_time = t0() - Duration::days(1);
        registry.create(spec("B")).unwrap();
        registry.create(spec("A")).unwrap();
        registry.create(early).unwrap();
        let ids: Vec<_> = registry.list().iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, ["Z", "A", "B"]);
    }
}
