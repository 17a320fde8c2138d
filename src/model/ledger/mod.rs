//! The vote ledger: append-only storage of cast votes, keyed by nullifier.
//!
//! Uniqueness of `(nullifier, election_id)` is enforced by the [`VoteStore`]
//! in a single atomic step. The ledger adds integrity tags, receipts, tallies
//! and audits on top of whichever store is in use.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use log::{debug, error};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::{
    election::{CandidateId, Election, ElectionId},
    nullifier::Nullifier,
};

mod memory;
mod mongo;

pub use self::memory::MemoryStore;
pub use self::mongo::{ensure_indexes_exist, MongoStore};

pub type HmacSha256 = Hmac<Sha256>;

/// A cast vote, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub nullifier: Nullifier,
    pub election_id: ElectionId,
    pub candidate_id: CandidateId,
    /// Commit time, truncated to whole seconds.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub committed_at: DateTime<Utc>,
    /// HMAC over the other fields, lowercase hex.
    pub integrity_tag: String,
}

/// Proof of a committed vote, handed back to the voter. Carries no candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub nullifier_digest: Nullifier,
    pub election_id: ElectionId,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub committed_at: DateTime<Utc>,
    /// HMAC over the other fields, lowercase hex.
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateTotal {
    pub candidate_id: CandidateId,
    pub votes: u64,
}

/// Per-candidate vote counts in the election's candidate order.
pub type Tally = Vec<CandidateTotal>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A record with the same `(nullifier, election_id)` already exists.
    #[error("duplicate vote record")]
    Duplicate,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage for vote records.
///
/// `insert_unique` must check for an existing `(nullifier, election_id)` pair
/// and insert in one linearizable step. There is no update or delete.
#[rocket::async_trait]
pub trait VoteStore: Send + Sync {
    async fn insert_unique(&self, record: VoteRecord) -> Result<(), StoreError>;

    async fn find(
        &self,
        nullifier: &Nullifier,
        election_id: &str,
    ) -> Result<Option<VoteRecord>, StoreError>;

    async fn find_by_nullifier(&self, nullifier: &Nullifier)
        -> Result<Option<VoteRecord>, StoreError>;

    async fn records_for(&self, election_id: &str) -> Result<Vec<VoteRecord>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    #[error("a vote has already been cast with this nullifier")]
    AlreadyVoted,
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Summary of a successful audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub election_id: ElectionId,
    pub records: usize,
    pub totals: Tally,
    /// SHA-256 over every integrity tag, ordered by nullifier. Lowercase hex.
    pub ledger_digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("record {0} does not match its integrity tag")]
    Tampered(Nullifier),
    #[error("nullifier {0} appears more than once")]
    DuplicateNullifier(Nullifier),
    #[error("record {nullifier} is for unknown candidate `{candidate_id}`")]
    UnknownCandidate {
        nullifier: Nullifier,
        candidate_id: CandidateId,
    },
    #[error("record {0} was committed outside the election window")]
    OutsideWindow(Nullifier),
}

/// The single authority over vote records.
pub struct VoteLedger {
    store: Arc<dyn VoteStore>,
    mac: HmacSha256,
}

impl VoteLedger {
    pub fn new(store: Arc<dyn VoteStore>, hmac_secret: &[u8]) -> Self {
        let mac = HmacSha256::new_from_slice(hmac_secret).expect("HMAC can take key of any size");
        Self { store, mac }
    }

    /// Record a vote, unless one already exists for `(nullifier, election_id)`.
    ///
    /// The caller is responsible for checking that the election is open at
    /// `committed_at`; the ledger only stores what it is given.
    pub async fn try_commit(
        &self,
        nullifier: Nullifier,
        election_id: &str,
        candidate_id: &str,
        committed_at: DateTime<Utc>,
    ) -> Result<Receipt, CommitError> {
        let committed_at = committed_at.trunc_subsecs(0);
        let record = VoteRecord {
            nullifier,
            election_id: election_id.to_string(),
            candidate_id: candidate_id.to_string(),
            committed_at,
            integrity_tag: self.record_tag(&nullifier, election_id, candidate_id, committed_at),
        };

        match self.store.insert_unique(record).await {
            Ok(()) => {
                debug!("Committed vote in election {election_id}");
                Ok(Receipt {
                    nullifier_digest: nullifier,
                    election_id: election_id.to_string(),
                    committed_at,
                    signature: self.receipt_signature(&nullifier, election_id, committed_at),
                })
            }
            Err(StoreError::Duplicate) => Err(CommitError::AlreadyVoted),
            Err(StoreError::Unavailable(e)) => {
                error!("Vote store unavailable during commit in election {election_id}: {e}");
                Err(CommitError::StorageUnavailable(e))
            }
        }
    }

    pub async fn exists(&self, nullifier: &Nullifier, election_id: &str) -> Result<bool, StoreError> {
        Ok(self.store.find(nullifier, election_id).await?.is_some())
    }

    /// The record for a nullifier digest, as used by the public vote lookup.
    pub async fn get(&self, nullifier: &Nullifier) -> Result<Option<VoteRecord>, StoreError> {
        self.store.find_by_nullifier(nullifier).await
    }

    /// Aggregate the committed votes of an election.
    pub async fn tally(&self, election: &Election) -> Result<Tally, StoreError> {
        let records = self.store.records_for(election.id()).await?;
        Ok(count(election, &records))
    }

    /// Re-check every record of an election and summarise the ledger.
    pub async fn audit(&self, election: &Election) -> Result<AuditReport, AuditError> {
        let mut records = self.store.records_for(election.id()).await?;
        records.sort_by(|a, b| a.nullifier.cmp(&b.nullifier));

        let mut seen = HashSet::with_capacity(records.len());
        let mut digest = Sha256::new();
        for record in &records {
            let expected = self.record_tag(
                &record.nullifier,
                &record.election_id,
                &record.candidate_id,
                record.committed_at,
            );
            if !constant_time_eq(expected.as_bytes(), record.integrity_tag.as_bytes()) {
                return Err(AuditError::Tampered(record.nullifier));
            }
            if !seen.insert(record.nullifier) {
                return Err(AuditError::DuplicateNullifier(record.nullifier));
            }
            if !election.has_candidate(&record.candidate_id) {
                return Err(AuditError::UnknownCandidate {
                    nullifier: record.nullifier,
                    candidate_id: record.candidate_id.clone(),
                });
            }
            if !election.is_open(record.committed_at) {
                return Err(AuditError::OutsideWindow(record.nullifier));
            }
            digest.update(record.integrity_tag.as_bytes());
        }

        Ok(AuditReport {
            election_id: election.id().to_string(),
            records: records.len(),
            totals: count(election, &records),
            ledger_digest: HEXLOWER.encode(&digest.finalize()),
        })
    }

    /// Check that a receipt was issued by this ledger.
    pub fn verify_receipt(&self, receipt: &Receipt) -> bool {
        let mut mac = self.mac.clone();
        receipt_input(&mut mac, &receipt.nullifier_digest, &receipt.election_id, receipt.committed_at);
        HEXLOWER
            .decode(receipt.signature.as_bytes())
            .map(|signature| mac.verify_slice(&signature).is_ok())
            .unwrap_or(false)
    }

    fn record_tag(
        &self,
        nullifier: &Nullifier,
        election_id: &str,
        candidate_id: &str,
        committed_at: DateTime<Utc>,
    ) -> String {
        let mut mac = self.mac.clone();
        mac.update(b"anonvote/record/v1");
        mac.update(nullifier.as_bytes());
        update_prefixed(&mut mac, election_id.as_bytes());
        update_prefixed(&mut mac, candidate_id.as_bytes());
        mac.update(&committed_at.timestamp().to_le_bytes());
        HEXLOWER.encode(&mac.finalize().into_bytes())
    }

    fn receipt_signature(
        &self,
        nullifier: &Nullifier,
        election_id: &str,
        committed_at: DateTime<Utc>,
    ) -> String {
        let mut mac = self.mac.clone();
        receipt_input(&mut mac, nullifier, election_id, committed_at);
        HEXLOWER.encode(&mac.finalize().into_bytes())
    }
}

fn receipt_input(
    mac: &mut HmacSha256,
    nullifier: &Nullifier,
    election_id: &str,
    committed_at: DateTime<Utc>,
) {
    mac.update(b"anonvote/receipt/v1");
    mac.update(nullifier.as_bytes());
    update_prefixed(mac, election_id.as_bytes());
    mac.update(&committed_at.timestamp().to_le_bytes());
}

fn update_prefixed(mac: &mut HmacSha256, bytes: &[u8]) {
    mac.update(&(bytes.len() as u64).to_le_bytes());
    mac.update(bytes);
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn count(election: &Election, records: &[VoteRecord]) -> Tally {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for record in records {
        *counts.entry(record.candidate_id.as_str()).or_default() += 1;
    }
    election
        .candidates()
        .iter()
        .map(|candidate| CandidateTotal {
            candidate_id: candidate.id.clone(),
            votes: counts.get(candidate.id.as_str()).copied().unwrap_or(0),
        })
        .collect()
}
