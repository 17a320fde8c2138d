//! The holder side: producing presentation proofs from an issued credential.
//!
//! The server never runs this in production. It exists so that the proof
//! format has a reference prover, and so the server can be tested end to end.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar};
use rand::{CryptoRng, RngCore};
use thiserror::Error;

use super::{
    credential::IssuedCredential,
    envelope::{CredentialProof, ParsedPredicate},
    nullifier_base,
    ownership::OwnershipProof,
    range::RangeProof,
    verifier::{append_predicate, predicate_cutoff, presentation_transcript},
    Predicate, ProofContext,
};

#[derive(Debug, Error)]
pub enum HolderError {
    #[error("credential was not issued to this holder key")]
    ForeignCredential,
    #[error("`{0}` does not hold on {1}")]
    Unprovable(Predicate, NaiveDate),
}

/// The holder's long-term secret `s`.
pub struct HolderSecret(Scalar);

impl fmt::Debug for HolderSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HolderSecret(<redacted>)")
    }
}

impl HolderSecret {
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        Self(Scalar::random(rng))
    }

    /// The holder key `P = [s]G` the issuer signs over.
    pub fn public_key(&self) -> RistrettoPoint {
        RistrettoPoint::mul_base(&self.0)
    }
}

/// A holder secret together with a credential issued to it.
#[derive(Debug)]
pub struct HolderWallet {
    secret: HolderSecret,
    issued: IssuedCredential,
}

impl HolderWallet {
    pub fn new(secret: HolderSecret, issued: IssuedCredential) -> Result<Self, HolderError> {
        if issued.credential.holder_key != secret.public_key() {
            return Err(HolderError::ForeignCredential);
        }
        Ok(Self { secret, issued })
    }

    pub fn credential(&self) -> &IssuedCredential {
        &self.issued
    }

    /// Produce a proof for `context`, disclosing `predicates` as of the date of `created_at`.
    ///
    /// Each call uses fresh randomness, so two proofs from the same wallet are
    /// unlinkable except through the nullifier seed.
    pub fn prove<R: CryptoRng + RngCore>(
        &self,
        context: &ProofContext,
        predicates: &[Predicate],
        created_at: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<CredentialProof, HolderError> {
        let credential = &self.issued.credential;
        let created_at_secs = created_at.timestamp();
        let as_of = created_at.date_naive();
        let seed = nullifier_base() * self.secret.0;

        let mut transcript = presentation_transcript(context, created_at_secs, credential);
        let ownership = OwnershipProof::new(
            &self.secret.0,
            &credential.holder_key,
            &seed,
            &mut transcript,
            rng,
        );

        let mut disclosed = Vec::with_capacity(predicates.len());
        for &predicate in predicates {
            let unprovable = || HolderError::Unprovable(predicate, as_of);
            let cutoff = predicate_cutoff(predicate, as_of).ok_or_else(unprovable)?;
            let margin = (cutoff - self.issued.birth_date).num_days();
            let value = u64::try_from(margin).map_err(|_| unprovable())?;

            append_predicate(&mut transcript, predicate, as_of);
            // The verifier's commitment is `[cutoff]G - C`, blinded by `-r`.
            let range = RangeProof::new(value, -self.issued.dob_blinding, &mut transcript, rng)
                .ok_or_else(unprovable)?;
            disclosed.push(ParsedPredicate {
                predicate,
                as_of,
                cutoff,
                range,
            });
        }

        Ok(CredentialProof::from_parts(
            credential,
            &seed,
            &ownership,
            created_at_secs,
            &disclosed,
        ))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::proof::IssuerKeypair;

    #[test]
    fn wallet_rejects_foreign_credential() {
        let mut rng = rand::thread_rng();
        let issuer = IssuerKeypair::generate(&mut rng);
        let holder = HolderSecret::generate(&mut rng);
        let someone_else = HolderSecret::generate(&mut rng);
        let issued = issuer.issue(
            &someone_else.public_key(),
            NaiveDate::from_ymd_opt(1980, 1, 1).unwrap(),
            Utc::now() + Duration::days(30),
            &mut rng,
        );
        assert!(matches!(
            HolderWallet::new(holder, issued),
            Err(HolderError::ForeignCredential)
        ));
    }

    #[test]
    fn proof_wire_shape() {
        let mut rng = rand::thread_rng();
        let issuer = IssuerKeypair::generate(&mut rng);
        let secret = HolderSecret::generate(&mut rng);
        let created_at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let issued = issuer.issue(
            &secret.public_key(),
            NaiveDate::from_ymd_opt(1980, 1, 1).unwrap(),
            created_at + Duration::days(30),
            &mut rng,
        );
        let wallet = HolderWallet::new(secret, issued).unwrap();
        let context = ProofContext::Eligibility {
            election_id: "e".to_string(),
        };
        let proof = wallet
            .prove(&context, &[Predicate::AgeAbove(21)], created_at, &mut rng)
            .unwrap();

        let value = proof.to_value();
        assert_eq!(value["version"], 1);
        assert_eq!(value["createdAt"], created_at.timestamp());
        assert_eq!(value["predicates"][0]["name"], "ageAbove21");
        assert_eq!(value["predicates"][0]["asOf"], "2026-03-01");
        assert_eq!(CredentialProof::from_value(&value).unwrap(), proof);
    }

    #[test]
    fn secret_is_redacted() {
        let secret = HolderSecret::generate(&mut rand::thread_rng());
        assert_eq!(format!("{secret:?}"), "HolderSecret(<redacted>)");
    }
}
