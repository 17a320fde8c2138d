//! Issuer keys and signed credentials.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use curve25519_dalek::{
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use super::{blinding_generator, decode_point, encode, generator, Rejection, TranscriptExt};

/// Public key of a trusted credential issuer, `Y = [y]G`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IssuerPublicKey {
    point: RistrettoPoint,
    compressed: CompressedRistretto,
}

impl IssuerPublicKey {
    fn from_point(point: RistrettoPoint) -> Self {
        Self {
            point,
            compressed: point.compress(),
        }
    }

    pub(crate) fn as_point(&self) -> &RistrettoPoint {
        &self.point
    }

    pub(crate) fn as_compressed(&self) -> &CompressedRistretto {
        &self.compressed
    }
}

impl Display for IssuerPublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(self.compressed.as_bytes()))
    }
}

impl FromStr for IssuerPublicKey {
    type Err = Rejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_point("issuer key", s).map(Self::from_point)
    }
}

impl TryFrom<String> for IssuerPublicKey {
    type Error = Rejection;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IssuerPublicKey> for String {
    fn from(key: IssuerPublicKey) -> Self {
        key.to_string()
    }
}

/// The public parameters of the trusted credential issuers.
/// Rotation happens out of band by adding the new key and later removing the old one.
#[derive(Debug, Clone, Default)]
pub struct IssuerParams {
    trusted: Vec<IssuerPublicKey>,
}

impl IssuerParams {
    pub fn new(trusted: impl IntoIterator<Item = IssuerPublicKey>) -> Self {
        Self {
            trusted: trusted.into_iter().collect(),
        }
    }

    /// Find the trusted key with the given encoding, if any.
    pub(crate) fn find(&self, compressed: &CompressedRistretto) -> Option<&IssuerPublicKey> {
        self.trusted.iter().find(|key| key.as_compressed() == compressed)
    }

    pub fn is_empty(&self) -> bool {
        self.trusted.is_empty()
    }
}

/// Issuer Schnorr signature `(R, z)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Signature {
    pub(crate) r: CompressedRistretto,
    pub(crate) z: Scalar,
}

/// The public part of a credential: what the issuer signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub(crate) issuer: CompressedRistretto,
    /// `P = [s]G`.
    pub(crate) holder_key: RistrettoPoint,
    /// `C = [d]G + [r]H` where `d` is the birth date in days.
    pub(crate) dob_commitment: RistrettoPoint,
    /// Unix seconds after which the credential is no longer accepted.
    pub(crate) expires_at: i64,
    pub(crate) signature: Signature,
}

impl Credential {
    fn signing_transcript(
        issuer: &CompressedRistretto,
        holder_key: &CompressedRistretto,
        dob_commitment: &CompressedRistretto,
        expires_at: i64,
    ) -> Transcript {
        let mut transcript = Transcript::new(b"anonvote.credential.v1");
        transcript.start_proof(b"issuer_signature");
        transcript.append_point(b"Y", issuer);
        transcript.append_point(b"P", holder_key);
        transcript.append_point(b"C", dob_commitment);
        transcript.append_i64(b"expires_at", expires_at);
        transcript
    }

    /// Check the issuer signature against `issuer`.
    pub(crate) fn verify_signature(&self, issuer: &IssuerPublicKey) -> bool {
        let Some(r) = self.signature.r.decompress() else {
            return false;
        };
        let mut transcript = Self::signing_transcript(
            issuer.as_compressed(),
            &self.holder_key.compress(),
            &self.dob_commitment.compress(),
            self.expires_at,
        );
        transcript.append_point(b"R", &self.signature.r);
        let challenge = transcript.challenge_scalar(b"c");

        // [z]G - [c]Y should restore R.
        let restored = RistrettoPoint::vartime_double_scalar_mul_basepoint(
            &-challenge,
            issuer.as_point(),
            &self.signature.z,
        );
        restored == r
    }

    /// Absorb the signed fields into a presentation transcript.
    pub(crate) fn append_to(&self, transcript: &mut Transcript) {
        transcript.start_proof(b"credential");
        transcript.append_point(b"Y", &self.issuer);
        transcript.append_point(b"P", &self.holder_key.compress());
        transcript.append_point(b"C", &self.dob_commitment.compress());
        transcript.append_i64(b"expires_at", self.expires_at);
        transcript.append_point(b"R", &self.signature.r);
    }

    /// Unix seconds after which the credential is no longer accepted.
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

/// An issued credential together with the opening of its birth date commitment.
/// Handed to the holder; the opening never leaves the holder's wallet.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub credential: Credential,
    pub birth_date: NaiveDate,
    pub(crate) dob_blinding: Scalar,
}

/// Birth date as a scalar, counted in days from the common era.
pub(crate) fn days_scalar(date: NaiveDate) -> Scalar {
    Scalar::from(u64::try_from(date.num_days_from_ce()).unwrap_or_default())
}

/// A credential issuer's signing key.
pub struct IssuerKeypair {
    secret: Scalar,
    public: IssuerPublicKey,
}

impl fmt::Debug for IssuerKeypair {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerKeypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl IssuerKeypair {
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let secret = Scalar::random(rng);
        Self {
            secret,
            public: IssuerPublicKey::from_point(RistrettoPoint::mul_base(&secret)),
        }
    }

    pub fn public(&self) -> &IssuerPublicKey {
        &self.public
    }

    /// Sign a credential binding `holder_key` to a commitment to `birth_date`.
    pub fn issue<R: CryptoRng + RngCore>(
        &self,
        holder_key: &RistrettoPoint,
        birth_date: NaiveDate,
        expires_at: DateTime<Utc>,
        rng: &mut R,
    ) -> IssuedCredential {
        let dob_blinding = Scalar::random(rng);
        let dob_commitment = generator() * days_scalar(birth_date) + blinding_generator() * dob_blinding;
        let expires_at = expires_at.timestamp();

        let mut transcript = Credential::signing_transcript(
            self.public.as_compressed(),
            &holder_key.compress(),
            &dob_commitment.compress(),
            expires_at,
        );
        let nonce = Scalar::random(rng);
        let r = RistrettoPoint::mul_base(&nonce).compress();
        transcript.append_point(b"R", &r);
        let challenge = transcript.challenge_scalar(b"c");
        let z = nonce + challenge * self.secret;

        IssuedCredential {
            credential: Credential {
                issuer: *self.public.as_compressed(),
                holder_key: *holder_key,
                dob_commitment,
                expires_at,
                signature: Signature { r, z },
            },
            birth_date,
            dob_blinding,
        }
    }
}
