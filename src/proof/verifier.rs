//! [`ProofVerifier`]: checks a presentation proof and extracts the verified claim.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use curve25519_dalek::ristretto::RistrettoPoint;
use merlin::Transcript;
use rocket::serde::json::Value;

use super::{
    credential::{days_scalar, Credential},
    envelope::{CredentialProof, ParsedProof},
    generator, InvalidReason, IssuerParams, Predicate, ProofContext, Rejection, TranscriptExt,
};

/// The opaque value bound to the credential holder's secret, `N = [s]B`.
///
/// This is the closest artifact to the voter's identity: it has no `Display`
/// or `Serialize`, and its `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct NullifierSeed([u8; 32]);

impl NullifierSeed {
    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for NullifierSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NullifierSeed(<redacted>)")
    }
}

/// Result of a successful verification. Transient: consumed by nullifier
/// derivation and then dropped, never logged or stored.
#[derive(Debug)]
pub struct VerifiedClaim {
    nullifier_seed: NullifierSeed,
    predicate_results: BTreeMap<Predicate, bool>,
}

impl VerifiedClaim {
    pub fn nullifier_seed(&self) -> &NullifierSeed {
        &self.nullifier_seed
    }

    /// Every predicate the proof established, plus every required one.
    pub fn predicate_results(&self) -> &BTreeMap<Predicate, bool> {
        &self.predicate_results
    }

    pub fn into_nullifier_seed(self) -> NullifierSeed {
        self.nullifier_seed
    }
}

/// What a proof must establish, and the explicit time tolerances it is checked with.
#[derive(Debug, Clone)]
pub struct Requirements {
    /// Predicates that must be proven true.
    pub predicates: BTreeSet<Predicate>,
    /// Oldest accepted proof, measured from its `createdAt` to the verification time.
    pub max_proof_age: Duration,
    /// How far in the future a proof's `createdAt` may be.
    pub clock_skew: Duration,
}

impl Requirements {
    pub fn new(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Self {
            predicates: predicates.into_iter().collect(),
            max_proof_age: Duration::minutes(10),
            clock_skew: Duration::seconds(30),
        }
    }
}

/// Verify `proof` for `context` at time `now`.
///
/// Checks run in order: structure (`MalformedProof`), cryptography and explicit
/// time bounds (`InvalidProof`), required predicates (`PredicateNotSatisfied`).
/// `now` is the only notion of time used.
pub fn verify(
    proof: &CredentialProof,
    issuers: &IssuerParams,
    requirements: &Requirements,
    context: &ProofContext,
    now: DateTime<Utc>,
) -> Result<VerifiedClaim, Rejection> {
    let parsed = proof.parse()?;
    let credential = &parsed.credential;

    // Credential.
    let issuer = issuers
        .find(&credential.issuer)
        .ok_or(Rejection::InvalidProof(InvalidReason::UntrustedIssuer))?;
    if !credential.verify_signature(issuer) {
        return Err(Rejection::InvalidProof(InvalidReason::IssuerSignature));
    }

    // Time bounds.
    let created_at = check_freshness(&parsed, requirements, now)?;

    // Ownership of the credential and of the nullifier seed.
    let mut transcript =
        presentation_transcript(context, parsed.created_at.timestamp(), credential);
    if !parsed
        .ownership
        .verify(&credential.holder_key, &parsed.nullifier_seed, &mut transcript)
    {
        return Err(Rejection::InvalidProof(InvalidReason::Ownership));
    }

    // Disclosed predicates.
    let mut predicate_results = BTreeMap::new();
    for disclosed in &parsed.predicates {
        let days_apart = (disclosed.as_of - created_at.date_naive()).num_days().abs();
        if days_apart > 1 {
            return Err(Rejection::InvalidProof(InvalidReason::ReferenceDate));
        }
        let commitment = predicate_commitment(disclosed.cutoff, credential);
        append_predicate(&mut transcript, disclosed.predicate, disclosed.as_of);
        if !disclosed.range.verify(&commitment, &mut transcript) {
            return Err(Rejection::InvalidProof(InvalidReason::PredicateProof(
                disclosed.predicate,
            )));
        }
        predicate_results.insert(disclosed.predicate, true);
    }

    // Required predicates.
    for required in &requirements.predicates {
        if !*predicate_results.entry(*required).or_insert(false) {
            return Err(Rejection::PredicateNotSatisfied(*required));
        }
    }

    Ok(VerifiedClaim {
        nullifier_seed: NullifierSeed(parsed.nullifier_seed.compress().to_bytes()),
        predicate_results,
    })
}

fn check_freshness(
    parsed: &ParsedProof,
    requirements: &Requirements,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, Rejection> {
    if parsed.credential.expires_at <= now.timestamp() {
        return Err(Rejection::InvalidProof(InvalidReason::CredentialExpired));
    }
    let created_at = parsed.created_at;
    if created_at > now + requirements.clock_skew {
        return Err(Rejection::InvalidProof(InvalidReason::FromTheFuture));
    }
    if now - created_at > requirements.max_proof_age {
        return Err(Rejection::InvalidProof(InvalidReason::Stale));
    }
    Ok(created_at)
}

/// The transcript every presentation proof starts from.
pub(crate) fn presentation_transcript(
    context: &ProofContext,
    created_at: i64,
    credential: &Credential,
) -> Transcript {
    let mut transcript = context.transcript();
    transcript.append_i64(b"created_at", created_at);
    credential.append_to(&mut transcript);
    transcript
}

pub(crate) fn append_predicate(transcript: &mut Transcript, predicate: Predicate, as_of: NaiveDate) {
    transcript.start_proof(b"predicate");
    transcript.append_message(b"name", predicate.to_string().as_bytes());
    transcript.append_message(b"as_of", as_of.format("%Y-%m-%d").to_string().as_bytes());
}

/// The last birth date satisfying `predicate` on `as_of`.
pub(crate) fn predicate_cutoff(predicate: Predicate, as_of: NaiveDate) -> Option<NaiveDate> {
    match predicate {
        Predicate::AgeAbove(years) => as_of.checked_sub_months(Months::new(12 * u32::from(years))),
    }
}

/// Commitment to `cutoff - birth date`, which is in range iff the predicate holds:
/// `[cutoff]G - C = [cutoff - d]G - [r]H`.
fn predicate_commitment(cutoff: NaiveDate, credential: &Credential) -> RistrettoPoint {
    generator() * days_scalar(cutoff) - credential.dob_commitment
}

/// Verifies proofs against a fixed issuer set and fixed requirements.
#[derive(Debug, Clone)]
pub struct ProofVerifier {
    issuers: IssuerParams,
    requirements: Requirements,
}

impl ProofVerifier {
    pub fn new(issuers: IssuerParams, requirements: Requirements) -> Self {
        Self {
            issuers,
            requirements,
        }
    }

    pub fn requirements(&self) -> &Requirements {
        &self.requirements
    }

    /// Verify a proof that arrived as untyped JSON.
    pub fn verify_value(
        &self,
        proof: &Value,
        context: &ProofContext,
        now: DateTime<Utc>,
    ) -> Result<VerifiedClaim, Rejection> {
        let proof = CredentialProof::from_value(proof)?;
        verify(&proof, &self.issuers, &self.requirements, context, now)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use curve25519_dalek::scalar::Scalar;

    use super::*;
    use crate::proof::{HolderSecret, HolderWallet, IssuerKeypair};

    const AGE18: Predicate = Predicate::AgeAbove(18);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
    }

    fn vote_context() -> ProofContext {
        ProofContext::Vote {
            election_id: "general-2026".to_string(),
            candidate_id: "A".to_string(),
        }
    }

    fn setup(birth_date: NaiveDate) -> (IssuerKeypair, HolderWallet) {
        let mut rng = rand::thread_rng();
        let issuer = IssuerKeypair::generate(&mut rng);
        let secret = HolderSecret::generate(&mut rng);
        let issued = issuer.issue(
            &secret.public_key(),
            birth_date,
            now() + Duration::days(365),
            &mut rng,
        );
        (issuer, HolderWallet::new(secret, issued).unwrap())
    }

    fn adult() -> NaiveDate {
        NaiveDate::from_ymd_opt(1990, 3, 4).unwrap()
    }

    fn check(
        issuer: &IssuerKeypair,
        proof: &CredentialProof,
        context: &ProofContext,
        at: DateTime<Utc>,
    ) -> Result<VerifiedClaim, Rejection> {
        verify(
            proof,
            &IssuerParams::new([*issuer.public()]),
            &Requirements::new([AGE18]),
            context,
            at,
        )
    }

    #[test]
    fn valid_proof_yields_claim() {
        let (issuer, wallet) = setup(adult());
        let proof = wallet
            .prove(&vote_context(), &[AGE18], now(), &mut rand::thread_rng())
            .unwrap();
        let claim = check(&issuer, &proof, &vote_context(), now()).unwrap();
        assert_eq!(claim.predicate_results().get(&AGE18), Some(&true));
    }

    #[test]
    fn same_holder_yields_same_seed() {
        let (issuer, wallet) = setup(adult());
        let mut rng = rand::thread_rng();
        let first = wallet.prove(&vote_context(), &[AGE18], now(), &mut rng).unwrap();
        let second = wallet.prove(&vote_context(), &[AGE18], now(), &mut rng).unwrap();
        // Fresh randomness, same seed.
        assert_ne!(first, second);
        assert_eq!(
            check(&issuer, &first, &vote_context(), now()).unwrap().nullifier_seed(),
            check(&issuer, &second, &vote_context(), now()).unwrap().nullifier_seed(),
        );
    }

    #[test]
    fn birthday_boundary() {
        // Turns 18 exactly on the reference date.
        let (issuer, wallet) = setup(NaiveDate::from_ymd_opt(2008, 10, 17).unwrap());
        let proof = wallet
            .prove(&vote_context(), &[AGE18], now(), &mut rand::thread_rng())
            .unwrap();
        assert!(check(&issuer, &proof, &vote_context(), now()).is_ok());

        // One day short.
        let (_, minor) = setup(NaiveDate::from_ymd_opt(2008, 10, 18).unwrap());
        assert!(matches!(
            minor.prove(&vote_context(), &[AGE18], now(), &mut rand::thread_rng()),
            Err(crate::proof::HolderError::Unprovable(AGE18, _))
        ));
    }

    #[test]
    fn missing_predicate_is_not_satisfied() {
        let (issuer, wallet) = setup(adult());
        let proof = wallet
            .prove(&vote_context(), &[], now(), &mut rand::thread_rng())
            .unwrap();
        assert_eq!(
            check(&issuer, &proof, &vote_context(), now()).unwrap_err(),
            Rejection::PredicateNotSatisfied(AGE18)
        );
    }

    #[test]
    fn untrusted_issuer_is_invalid() {
        let (_, wallet) = setup(adult());
        let other = IssuerKeypair::generate(&mut rand::thread_rng());
        let proof = wallet
            .prove(&vote_context(), &[AGE18], now(), &mut rand::thread_rng())
            .unwrap();
        assert_eq!(
            check(&other, &proof, &vote_context(), now()).unwrap_err(),
            Rejection::InvalidProof(InvalidReason::UntrustedIssuer)
        );
    }

    #[test]
    fn proof_is_bound_to_context() {
        let (issuer, wallet) = setup(adult());
        let proof = wallet
            .prove(&vote_context(), &[AGE18], now(), &mut rand::thread_rng())
            .unwrap();
        let other_candidate = ProofContext::Vote {
            election_id: "general-2026".to_string(),
            candidate_id: "B".to_string(),
        };
        assert_eq!(
            check(&issuer, &proof, &other_candidate, now()).unwrap_err(),
            Rejection::InvalidProof(InvalidReason::Ownership)
        );
    }

    #[test]
    fn time_bounds_are_explicit() {
        let (issuer, wallet) = setup(adult());
        let proof = wallet
            .prove(&vote_context(), &[AGE18], now(), &mut rand::thread_rng())
            .unwrap();

        let later = now() + Duration::hours(1);
        assert_eq!(
            check(&issuer, &proof, &vote_context(), later).unwrap_err(),
            Rejection::InvalidProof(InvalidReason::Stale)
        );
        let earlier = now() - Duration::hours(1);
        assert_eq!(
            check(&issuer, &proof, &vote_context(), earlier).unwrap_err(),
            Rejection::InvalidProof(InvalidReason::FromTheFuture)
        );
        let after_expiry = now() + Duration::days(400);
        assert_eq!(
            check(&issuer, &proof, &vote_context(), after_expiry).unwrap_err(),
            Rejection::InvalidProof(InvalidReason::CredentialExpired)
        );
    }

    #[test]
    fn tampered_fields_are_invalid() {
        let (issuer, wallet) = setup(adult());
        let proof = wallet
            .prove(&vote_context(), &[AGE18], now(), &mut rand::thread_rng())
            .unwrap();

        let mut reseeded = proof.clone();
        let seed = RistrettoPoint::mul_base(&Scalar::random(&mut rand::thread_rng()));
        reseeded.nullifier_seed = crate::proof::encode(seed.compress().as_bytes());
        assert_eq!(
            check(&issuer, &reseeded, &vote_context(), now()).unwrap_err(),
            Rejection::InvalidProof(InvalidReason::Ownership)
        );

        let mut extended = proof.clone();
        extended.credential.expires_at += 86_400;
        assert_eq!(
            check(&issuer, &extended, &vote_context(), now()).unwrap_err(),
            Rejection::InvalidProof(InvalidReason::IssuerSignature)
        );

        let mut backdated = proof;
        backdated.predicates[0].as_of = "2026-10-16".to_string();
        assert_eq!(
            check(&issuer, &backdated, &vote_context(), now()).unwrap_err(),
            Rejection::InvalidProof(InvalidReason::PredicateProof(AGE18))
        );
    }

    #[test]
    fn malformed_proofs_are_reported_first() {
        let (issuer, wallet) = setup(adult());
        let mut proof = wallet
            .prove(&vote_context(), &[AGE18], now(), &mut rand::thread_rng())
            .unwrap();
        proof.predicates[0].bits.pop();
        // Even against an untrusted issuer, structure is checked first.
        let other = IssuerKeypair::generate(&mut rand::thread_rng());
        assert!(matches!(
            check(&other, &proof, &vote_context(), now()),
            Err(Rejection::MalformedProof(_))
        ));
        assert!(matches!(
            check(&issuer, &proof, &vote_context(), now()),
            Err(Rejection::MalformedProof(_))
        ));
    }

    #[test]
    fn out_of_range_creation_time_is_malformed() {
        let (_, wallet) = setup(adult());
        let mut proof = wallet
            .prove(&vote_context(), &[AGE18], now(), &mut rand::thread_rng())
            .unwrap();
        proof.created_at = i64::MAX;
        let other = IssuerKeypair::generate(&mut rand::thread_rng());
        assert!(matches!(
            check(&other, &proof, &vote_context(), now()),
            Err(Rejection::MalformedProof(reason)) if reason.contains("createdAt")
        ));
    }

    #[test]
    fn renamed_predicate_is_malformed() {
        let (issuer, wallet) = setup(adult());
        let mut proof = wallet
            .prove(&vote_context(), &[AGE18], now(), &mut rand::thread_rng())
            .unwrap();
        proof.predicates[0].name = "ageAbove018".to_string();
        assert!(matches!(
            check(&issuer, &proof, &vote_context(), now()),
            Err(Rejection::MalformedProof(_))
        ));
    }

    #[test]
    fn seed_is_redacted_in_debug_output() {
        let (issuer, wallet) = setup(adult());
        let proof = wallet
            .prove(&vote_context(), &[AGE18], now(), &mut rand::thread_rng())
            .unwrap();
        let claim = check(&issuer, &proof, &vote_context(), now()).unwrap();
        let debug = format!("{claim:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&proof.nullifier_seed));
    }
}
