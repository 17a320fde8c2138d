//! [`OwnershipProof`]: the holder key and the nullifier seed share one secret.

use curve25519_dalek::{
    ristretto::RistrettoPoint, scalar::Scalar, traits::VartimeMultiscalarMul,
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};

use super::{nullifier_base, TranscriptExt};

/// Chaum–Pedersen proof that `log_G P = log_B N`, where `P` is the credential's
/// holder key and `N` the revealed nullifier seed.
///
/// Serialized as `(c, s)`; the verifier restores the commitments
/// `[s]G - [c]P` and `[s]B - [c]N` and re-derives the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OwnershipProof {
    pub(crate) challenge: Scalar,
    pub(crate) response: Scalar,
}

impl OwnershipProof {
    pub(crate) fn new<R: CryptoRng + RngCore>(
        secret: &Scalar,
        holder_key: &RistrettoPoint,
        seed: &RistrettoPoint,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Self {
        let nonce = Scalar::random(rng);
        Self::append_statement(transcript, holder_key, seed);
        transcript.append_point(b"[x]G", &RistrettoPoint::mul_base(&nonce).compress());
        transcript.append_point(b"[x]B", &(nullifier_base() * nonce).compress());
        let challenge = transcript.challenge_scalar(b"c");

        Self {
            challenge,
            response: nonce + challenge * secret,
        }
    }

    pub(crate) fn verify(
        &self,
        holder_key: &RistrettoPoint,
        seed: &RistrettoPoint,
        transcript: &mut Transcript,
    ) -> bool {
        let commitment_g = RistrettoPoint::vartime_double_scalar_mul_basepoint(
            &-self.challenge,
            holder_key,
            &self.response,
        );
        let commitment_b = RistrettoPoint::vartime_multiscalar_mul(
            [-self.challenge, self.response],
            [*seed, nullifier_base()],
        );

        Self::append_statement(transcript, holder_key, seed);
        transcript.append_point(b"[x]G", &commitment_g.compress());
        transcript.append_point(b"[x]B", &commitment_b.compress());
        transcript.challenge_scalar(b"c") == self.challenge
    }

    fn append_statement(
        transcript: &mut Transcript,
        holder_key: &RistrettoPoint,
        seed: &RistrettoPoint,
    ) {
        transcript.start_proof(b"ownership");
        transcript.append_point(b"P", &holder_key.compress());
        transcript.append_point(b"N", &seed.compress());
    }
}
