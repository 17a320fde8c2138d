//! [`VotingCoordinator`]: the end-to-end flow of one vote submission.
//!
//! ```text
//! Received -> ProofVerified -> NullifierDerived -> ElectionOpenChecked -> [Committed]
//!      \______________\__________________\_____________________\______> [Rejected]
//! ```

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::available_parallelism;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use log::{error, info, warn};
use rocket::serde::json::Value;
use rocket::tokio::{
    sync::Semaphore,
    task::{spawn_blocking, JoinError},
    time::timeout,
};
use serde::Serialize;
use thiserror::Error;

use super::{
    clock::Clock,
    election::{CandidateId, Election, ElectionId},
    ledger::{CommitError, Receipt, VoteLedger},
    nullifier::NullifierDeriver,
    registry::ElectionRegistry,
};
use crate::proof::{self, InvalidReason, Predicate, ProofContext, ProofVerifier, VerifiedClaim};

/// A vote as submitted.
#[derive(Debug, Clone)]
pub struct Submission {
    pub election_id: ElectionId,
    pub candidate_id: CandidateId,
    /// The presentation proof, not yet parsed.
    pub proof: Value,
}

/// Why a submission was not committed. Every variant has a stable [`code`](Rejection::code).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("malformed proof: {0}")]
    MalformedProof(String),
    #[error("invalid proof: {0}")]
    InvalidProof(InvalidReason),
    #[error("required predicate `{0}` is not satisfied")]
    PredicateNotSatisfied(Predicate),
    #[error("election `{0}` not found")]
    ElectionNotFound(ElectionId),
    #[error("election `{0}` is not open")]
    ElectionNotOpen(ElectionId),
    #[error("candidate `{0}` is not standing in this election")]
    UnknownCandidate(CandidateId),
    #[error("a vote has already been cast with this credential in this election")]
    AlreadyVoted,
    #[error("vote storage is unavailable, try again later")]
    StorageUnavailable,
    #[error("proof verification took too long, try again later")]
    VerificationTimeout,
    #[error("proof verification failed unexpectedly")]
    VerifierFault,
}

impl From<proof::Rejection> for Rejection {
    fn from(rejection: proof::Rejection) -> Self {
        match rejection {
            proof::Rejection::MalformedProof(reason) => Self::MalformedProof(reason),
            proof::Rejection::InvalidProof(reason) => Self::InvalidProof(reason),
            proof::Rejection::PredicateNotSatisfied(p) => Self::PredicateNotSatisfied(p),
        }
    }
}

impl Rejection {
    /// Stable, machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedProof(_) => "malformed_proof",
            Self::InvalidProof(_) => "invalid_proof",
            Self::PredicateNotSatisfied(_) => "predicate_not_satisfied",
            Self::ElectionNotFound(_) => "election_not_found",
            Self::ElectionNotOpen(_) => "election_not_open",
            Self::UnknownCandidate(_) => "unknown_candidate",
            Self::AlreadyVoted => "already_voted",
            Self::StorageUnavailable => "storage_unavailable",
            Self::VerificationTimeout => "verification_timeout",
            Self::VerifierFault => "internal_error",
        }
    }

    /// Can the same submission succeed later?
    /// An election that is not open may still open; infrastructure faults are transient.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::ElectionNotOpen(_) | Self::StorageUnavailable | Self::VerificationTimeout
        )
    }
}

/// Result of an eligibility check. Nothing is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    /// The proof is acceptable and the election is open right now.
    pub eligible: bool,
    pub predicates: BTreeMap<Predicate, bool>,
}

/// Bounds on the two steps that can take unbounded time.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub verification: Duration,
    pub commit: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            verification: Duration::from_secs(2),
            commit: Duration::from_secs(5),
        }
    }
}

/// One verification slot per available core.
pub fn default_verification_slots() -> usize {
    available_parallelism().map(NonZeroUsize::get).unwrap_or(1)
}

/// Orchestrates verification, nullifier derivation, election checks and the
/// ledger commit. Cheap to share: every collaborator is behind an `Arc`.
pub struct VotingCoordinator {
    verifier: Arc<ProofVerifier>,
    registry: Arc<ElectionRegistry>,
    ledger: Arc<VoteLedger>,
    clock: Arc<dyn Clock>,
    timeouts: Timeouts,
    /// Caps how many proofs are verified at once.
    verification_slots: Arc<Semaphore>,
}

impl VotingCoordinator {
    pub fn new(
        verifier: Arc<ProofVerifier>,
        registry: Arc<ElectionRegistry>,
        ledger: Arc<VoteLedger>,
        clock: Arc<dyn Clock>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            verifier,
            registry,
            ledger,
            clock,
            timeouts,
            verification_slots: Arc::new(Semaphore::new(default_verification_slots())),
        }
    }

    /// Share `slots` as the cap on concurrent verifications.
    pub fn with_verification_slots(mut self, slots: Arc<Semaphore>) -> Self {
        self.verification_slots = slots;
        self
    }

    pub fn registry(&self) -> &ElectionRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &VoteLedger {
        &self.ledger
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run one submission to a terminal state.
    pub async fn submit(&self, submission: Submission) -> Result<Receipt, Rejection> {
        let election_id = submission.election_id.clone();
        let result = self.process(submission).await;
        match &result {
            Ok(_) => info!("Vote committed in election {election_id}"),
            Err(e @ (Rejection::StorageUnavailable | Rejection::VerificationTimeout)) => {
                warn!("Vote in election {election_id} failed: {}", e.code())
            }
            Err(e @ Rejection::VerifierFault) => {
                error!("Vote in election {election_id} failed: {}", e.code())
            }
            Err(e) => info!("Vote in election {election_id} rejected: {}", e.code()),
        }
        result
    }

    async fn process(&self, submission: Submission) -> Result<Receipt, Rejection> {
        let Submission {
            election_id,
            candidate_id,
            proof,
        } = submission;

        // Proof first, so nothing about the election or the ledger leaks to invalid proofs.
        let context = ProofContext::Vote {
            election_id: election_id.clone(),
            candidate_id: candidate_id.clone(),
        };
        let claim = self.verify(proof, context).await?;
        let nullifier = NullifierDeriver::derive(claim.nullifier_seed(), &election_id);
        drop(claim);

        let election = self.election(&election_id)?;
        if !election.is_open(self.clock.now()) {
            return Err(Rejection::ElectionNotOpen(election_id));
        }
        if !election.has_candidate(&candidate_id) {
            return Err(Rejection::UnknownCandidate(candidate_id));
        }

        // The election may have closed while the proof was being verified.
        let committed_at = self.clock.now().trunc_subsecs(0);
        if !election.is_open(committed_at) {
            return Err(Rejection::ElectionNotOpen(election_id));
        }

        let commit = self
            .ledger
            .try_commit(nullifier, &election_id, &candidate_id, committed_at);
        match timeout(self.timeouts.commit, commit).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(CommitError::AlreadyVoted)) => Err(Rejection::AlreadyVoted),
            Ok(Err(CommitError::StorageUnavailable(_))) => Err(Rejection::StorageUnavailable),
            Err(_) => {
                error!("Vote commit in election {election_id} timed out");
                Err(Rejection::StorageUnavailable)
            }
        }
    }

    /// Verify a proof for an election without voting.
    pub async fn check_eligibility(
        &self,
        election_id: &str,
        proof: Value,
    ) -> Result<Eligibility, Rejection> {
        let context = ProofContext::Eligibility {
            election_id: election_id.to_string(),
        };
        let claim = self.verify(proof, context).await?;
        let election = self.election(election_id)?;
        Ok(Eligibility {
            eligible: election.is_open(self.clock.now()),
            predicates: claim.predicate_results().clone(),
        })
    }

    fn election(&self, election_id: &str) -> Result<Arc<Election>, Rejection> {
        self.registry
            .get(election_id)
            .map_err(|_| Rejection::ElectionNotFound(election_id.to_string()))
    }

    /// Verify on the blocking pool once a verification slot is free.
    /// The timeout starts with the verification itself, not with the wait for a slot.
    async fn verify(&self, proof: Value, context: ProofContext) -> Result<VerifiedClaim, Rejection> {
        let permit = self
            .verification_slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Rejection::VerifierFault)?;
        let verifier = self.verifier.clone();
        let now = self.clock.now();
        // The slot stays taken until the work is done, even after a timeout.
        let task = spawn_blocking(move || {
            let _permit = permit;
            verifier.verify_value(&proof, &context, now)
        });
        match timeout(self.timeouts.verification, task).await {
            Ok(joined) => verification_outcome(joined),
            Err(_) => {
                warn!(
                    "Proof verification exceeded {} ms",
                    self.timeouts.verification.as_millis()
                );
                Err(Rejection::VerificationTimeout)
            }
        }
    }
}

/// A verifier that panicked is a bug, not a transient fault.
fn verification_outcome(
    joined: Result<Result<VerifiedClaim, proof::Rejection>, JoinError>,
) -> Result<VerifiedClaim, Rejection> {
    match joined {
        Ok(result) => result.map_err(Rejection::from),
        Err(e) => {
            error!("Proof verification task failed, this is a bug: {e}");
            Err(Rejection::VerifierFault)
        }
    }
}
