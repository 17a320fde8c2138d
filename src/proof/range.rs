//! Range proofs over Pedersen commitments, used for age predicates.

use curve25519_dalek::{
    ristretto::RistrettoPoint, scalar::Scalar, traits::VartimeMultiscalarMul,
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};

use super::{blinding_generator, generator, TranscriptExt, RANGE_BITS};

/// Proof that a commitment `C = [b]G + [r]H` opens to a bit `b ∈ {0, 1}`.
///
/// This is a Cramer–Damgård–Schoenmakers OR-proof of knowledge of `log_H C`
/// or of `log_H (C - G)`. The branch not taken is simulated; the verifier only
/// learns that the two partial challenges sum to the transcript challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BitProof {
    pub(crate) commitment: RistrettoPoint,
    pub(crate) a0: RistrettoPoint,
    pub(crate) a1: RistrettoPoint,
    pub(crate) c0: Scalar,
    pub(crate) z0: Scalar,
    pub(crate) z1: Scalar,
}

impl BitProof {
    fn new<R: CryptoRng + RngCore>(
        bit: bool,
        blinding: Scalar,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Self {
        let g = generator();
        let h = blinding_generator();
        let commitment = if bit { g + h * blinding } else { h * blinding };
        // Statements: branch 0 is `C = [r]H`, branch 1 is `C - G = [r]H`.
        let targets = [commitment, commitment - g];
        let real = usize::from(bit);
        let fake = 1 - real;

        let fake_challenge = Scalar::random(rng);
        let fake_response = Scalar::random(rng);
        let nonce = Scalar::random(rng);

        let mut a = [RistrettoPoint::default(); 2];
        a[real] = h * nonce;
        a[fake] = h * fake_response - targets[fake] * fake_challenge;

        Self::append_statement(transcript, &commitment, &a[0], &a[1]);
        let challenge = transcript.challenge_scalar(b"c");
        let real_challenge = challenge - fake_challenge;

        let mut z = [Scalar::ZERO; 2];
        z[real] = nonce + real_challenge * blinding;
        z[fake] = fake_response;
        let c0 = if bit { fake_challenge } else { real_challenge };

        Self {
            commitment,
            a0: a[0],
            a1: a[1],
            c0,
            z0: z[0],
            z1: z[1],
        }
    }

    fn verify(&self, transcript: &mut Transcript) -> bool {
        let h = blinding_generator();
        Self::append_statement(transcript, &self.commitment, &self.a0, &self.a1);
        let challenge = transcript.challenge_scalar(b"c");
        let c1 = challenge - self.c0;

        // [z0]H == A0 + [c0]C
        let check0 = RistrettoPoint::vartime_multiscalar_mul(
            [self.z0, -self.c0],
            [h, self.commitment],
        );
        // [z1]H == A1 + [c1](C - G)
        let check1 = RistrettoPoint::vartime_multiscalar_mul(
            [self.z1, -c1],
            [h, self.commitment - generator()],
        );
        check0 == self.a0 && check1 == self.a1
    }

    fn append_statement(
        transcript: &mut Transcript,
        commitment: &RistrettoPoint,
        a0: &RistrettoPoint,
        a1: &RistrettoPoint,
    ) {
        transcript.append_point(b"C", &commitment.compress());
        transcript.append_point(b"A0", &a0.compress());
        transcript.append_point(b"A1", &a1.compress());
    }
}

/// Proof that a commitment `V = [v]G + [ρ]H` opens to `v ∈ [0, 2^RANGE_BITS)`.
///
/// `v` is decomposed into bits with individually committed values; the bit
/// blindings are chosen so that `Σ 2^i C_i = V`, which the verifier checks
/// homomorphically before checking each [`BitProof`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RangeProof {
    pub(crate) bits: Vec<BitProof>,
}

impl RangeProof {
    /// Prove that `value` (committed with `blinding`) is in range.
    /// Returns `None` if `value` does not fit in `RANGE_BITS` bits.
    pub(crate) fn new<R: CryptoRng + RngCore>(
        value: u64,
        blinding: Scalar,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Option<Self> {
        if value >> RANGE_BITS != 0 {
            return None;
        }

        // Random blindings for all bits but the last, which absorbs the remainder.
        let mut blindings: Vec<Scalar> = (0..RANGE_BITS - 1).map(|_| Scalar::random(rng)).collect();
        let partial = blindings
            .iter()
            .enumerate()
            .fold(Scalar::ZERO, |acc, (i, r)| acc + power_of_two(i) * r);
        let last = (blinding - partial) * power_of_two(RANGE_BITS - 1).invert();
        blindings.push(last);

        transcript.start_proof(b"range");
        let bits = blindings
            .into_iter()
            .enumerate()
            .map(|(i, r)| BitProof::new((value >> i) & 1 == 1, r, transcript, rng))
            .collect();
        Some(Self { bits })
    }

    /// Verify against the commitment `V`.
    pub(crate) fn verify(&self, commitment: &RistrettoPoint, transcript: &mut Transcript) -> bool {
        if self.bits.len() != RANGE_BITS {
            return false;
        }

        let recombined = RistrettoPoint::vartime_multiscalar_mul(
            (0..RANGE_BITS).map(power_of_two),
            self.bits.iter().map(|bit| bit.commitment),
        );
        if recombined != *commitment {
            return false;
        }

        transcript.start_proof(b"range");
        self.bits.iter().all(|bit| bit.verify(transcript))
    }
}

fn power_of_two(exponent: usize) -> Scalar {
    Scalar::from(1_u64 << exponent)
}
