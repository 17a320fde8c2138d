//! Anonymous eligibility proofs.
//!
//! A voter holds a credential from a trusted issuer: a Schnorr signature over
//! their holder key `P = [s]G` and a Pedersen commitment to their birth date.
//! To vote they present a [`CredentialProof`] that
//!
//! - carries the issuer-signed credential,
//! - reveals the nullifier seed `N = [s]B` together with a Chaum–Pedersen proof
//!   that `log_G P = log_B N`,
//! - proves every disclosed [`Predicate`] (e.g. `ageAbove18`) by a bitwise range
//!   proof over the committed birth date.
//!
//! All sub-proofs share one [`merlin`] transcript which first absorbs the
//! [`ProofContext`], so a proof is bound to the ballot it was made for.
//!
//! The group is ristretto255 from [`curve25519_dalek`].

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::OnceLock;

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT,
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
};
use data_encoding::BASE64URL_NOPAD;
use merlin::Transcript;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use thiserror::Error;

mod credential;
mod envelope;
mod holder;
mod ownership;
mod range;
mod verifier;

pub use credential::{Credential, IssuedCredential, IssuerKeypair, IssuerParams, IssuerPublicKey};
pub use envelope::CredentialProof;
pub use holder::{HolderError, HolderSecret, HolderWallet};
pub use verifier::{verify, NullifierSeed, ProofVerifier, Requirements, VerifiedClaim};

/// Version tag carried by every [`CredentialProof`].
pub const PROOF_VERSION: u8 = 1;

/// Number of bits in an age range proof. `2^16` days is roughly 179 years.
pub(crate) const RANGE_BITS: usize = 16;

/// Base point for values and secrets.
pub(crate) fn generator() -> RistrettoPoint {
    RISTRETTO_BASEPOINT_POINT
}

/// Blinding base for Pedersen commitments, with no known discrete log to `G`.
pub(crate) fn blinding_generator() -> RistrettoPoint {
    static H: OnceLock<RistrettoPoint> = OnceLock::new();
    *H.get_or_init(|| RistrettoPoint::hash_from_bytes::<Sha512>(b"anonvote/pedersen-blinding"))
}

/// Base for nullifier seeds, with no known discrete log to `G` or `H`.
pub(crate) fn nullifier_base() -> RistrettoPoint {
    static B: OnceLock<RistrettoPoint> = OnceLock::new();
    *B.get_or_init(|| RistrettoPoint::hash_from_bytes::<Sha512>(b"anonvote/nullifier-base"))
}

/// Extension trait for Merlin transcripts used in constructing our proofs.
pub(crate) trait TranscriptExt {
    fn start_proof(&mut self, proof_label: &'static [u8]);

    fn append_point(&mut self, label: &'static [u8], point: &CompressedRistretto);

    fn append_i64(&mut self, label: &'static [u8], value: i64);

    fn challenge_scalar(&mut self, label: &'static [u8]) -> Scalar;
}

impl TranscriptExt for Transcript {
    fn start_proof(&mut self, proof_label: &'static [u8]) {
        self.append_message(b"dom-sep", proof_label);
    }

    fn append_point(&mut self, label: &'static [u8], point: &CompressedRistretto) {
        self.append_message(label, point.as_bytes());
    }

    fn append_i64(&mut self, label: &'static [u8], value: i64) {
        self.append_message(label, &value.to_le_bytes());
    }

    fn challenge_scalar(&mut self, label: &'static [u8]) -> Scalar {
        let mut bytes = [0_u8; 64];
        self.challenge_bytes(label, &mut bytes);
        Scalar::from_bytes_mod_order_wide(&bytes)
    }
}

/// What a proof is being presented for. Absorbed into the transcript before
/// anything else, so a proof cannot be moved to another ballot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofContext {
    /// Casting a vote for `candidate_id` in `election_id`.
    Vote {
        election_id: String,
        candidate_id: String,
    },
    /// Checking eligibility for `election_id` without voting.
    Eligibility { election_id: String },
}

impl ProofContext {
    fn append_to(&self, transcript: &mut Transcript) {
        match self {
            Self::Vote {
                election_id,
                candidate_id,
            } => {
                transcript.append_message(b"context", b"vote");
                transcript.append_message(b"election", election_id.as_bytes());
                transcript.append_message(b"candidate", candidate_id.as_bytes());
            }
            Self::Eligibility { election_id } => {
                transcript.append_message(b"context", b"eligibility");
                transcript.append_message(b"election", election_id.as_bytes());
            }
        }
    }

    pub(crate) fn transcript(&self) -> Transcript {
        let mut transcript = Transcript::new(b"anonvote.presentation.v1");
        self.append_to(&mut transcript);
        transcript
    }
}

/// A boolean claim about the credential holder that a proof can establish
/// without revealing the underlying attribute.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Predicate {
    /// The holder is at least this many years old on the proof's reference date.
    AgeAbove(u8),
}

impl Predicate {
    const AGE_ABOVE: &'static str = "ageAbove";
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::AgeAbove(years) => write!(f, "{}{years}", Self::AGE_ABOVE),
        }
    }
}

impl FromStr for Predicate {
    type Err = UnknownPredicate;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Only the canonical spelling is accepted, since proofs commit to the rendered name.
        s.strip_prefix(Self::AGE_ABOVE)
            .and_then(|years| years.parse::<u8>().ok())
            .filter(|years| *years > 0)
            .map(Self::AgeAbove)
            .filter(|predicate| predicate.to_string() == s)
            .ok_or_else(|| UnknownPredicate(s.to_string()))
    }
}

impl TryFrom<String> for Predicate {
    type Error = UnknownPredicate;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Predicate> for String {
    fn from(predicate: Predicate) -> Self {
        predicate.to_string()
    }
}

/// A predicate name that this server does not understand.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown predicate `{0}`")]
pub struct UnknownPredicate(pub String);

/// Why a proof was rejected. These are client faults and will not succeed
/// if retried with the same input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The proof does not parse against the expected scheme.
    #[error("malformed proof: {0}")]
    MalformedProof(String),
    /// The proof parses but does not verify.
    #[error("invalid proof: {0}")]
    InvalidProof(InvalidReason),
    /// A required predicate is not established by the proof.
    #[error("required predicate `{0}` is not satisfied")]
    PredicateNotSatisfied(Predicate),
}

impl Rejection {
    pub(crate) fn malformed(field: &str, reason: impl Display) -> Self {
        Self::MalformedProof(format!("{field}: {reason}"))
    }
}

/// The specific check an invalid proof failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidReason {
    #[error("credential issuer is not trusted")]
    UntrustedIssuer,
    #[error("issuer signature does not verify")]
    IssuerSignature,
    #[error("credential has expired")]
    CredentialExpired,
    #[error("ownership proof does not verify")]
    Ownership,
    #[error("proof for `{0}` does not verify")]
    PredicateProof(Predicate),
    #[error("proof is older than the accepted age")]
    Stale,
    #[error("proof is dated in the future")]
    FromTheFuture,
    #[error("predicate reference date does not match the proof date")]
    ReferenceDate,
}

/// Encode bytes the way every proof field is encoded.
pub(crate) fn encode(bytes: &[u8]) -> String {
    BASE64URL_NOPAD.encode(bytes)
}

pub(crate) fn decode_array(field: &str, encoded: &str) -> Result<[u8; 32], Rejection> {
    let bytes = BASE64URL_NOPAD
        .decode(encoded.as_bytes())
        .map_err(|e| Rejection::malformed(field, e))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| Rejection::malformed(field, format!("expected 32 bytes, got {}", bytes.len())))
}

pub(crate) fn decode_point(field: &str, encoded: &str) -> Result<RistrettoPoint, Rejection> {
    CompressedRistretto(decode_array(field, encoded)?)
        .decompress()
        .ok_or_else(|| Rejection::malformed(field, "not a valid group element"))
}

pub(crate) fn decode_scalar(field: &str, encoded: &str) -> Result<Scalar, Rejection> {
    Option::from(Scalar::from_canonical_bytes(decode_array(field, encoded)?))
        .ok_or_else(|| Rejection::malformed(field, "not a canonical scalar"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_names() {
        assert_eq!(Predicate::AgeAbove(18).to_string(), "ageAbove18");
        assert_eq!("ageAbove21".parse::<Predicate>(), Ok(Predicate::AgeAbove(21)));
        assert!("ageAbove0".parse::<Predicate>().is_err());
        assert!("ageAbove".parse::<Predicate>().is_err());
        assert!("gender".parse::<Predicate>().is_err());
    }

    #[test]
    fn only_canonical_predicate_names_parse() {
        for alias in ["ageAbove018", "ageAbove+18", "ageAbove 18", "ageAbove18 "] {
            assert_eq!(
                alias.parse::<Predicate>(),
                Err(UnknownPredicate(alias.to_string()))
            );
        }
    }

    #[test]
    fn generators_are_distinct() {
        assert_ne!(generator(), blinding_generator());
        assert_ne!(generator(), nullifier_base());
        assert_ne!(blinding_generator(), nullifier_base());
    }

    #[test]
    fn decoding_rejects_bad_fields() {
        assert!(matches!(
            decode_array("x", "not base64!"),
            Err(Rejection::MalformedProof(_))
        ));
        assert!(matches!(
            decode_array("x", &encode(&[1, 2, 3])),
            Err(Rejection::MalformedProof(_))
        ));
        // All-ones is not a canonical scalar.
        assert!(decode_scalar("x", &encode(&[0xff; 32])).is_err());
        let point = generator().compress();
        assert_eq!(decode_point("x", &encode(point.as_bytes())).unwrap(), generator());
    }
}
