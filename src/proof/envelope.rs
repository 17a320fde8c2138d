//! The wire form of a presentation proof, and its parsing into group elements.

use chrono::{DateTime, NaiveDate, Utc};
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use rocket::serde::json::{serde_json, Value};
use serde::{Deserialize, Serialize};

use super::{
    credential::{Credential, Signature},
    decode_array, decode_point, decode_scalar, encode,
    ownership::OwnershipProof,
    range::{BitProof, RangeProof},
    verifier::predicate_cutoff,
    Predicate, Rejection, PROOF_VERSION, RANGE_BITS,
};

/// A presentation proof as submitted by a voter.
///
/// Every byte field is base64url without padding. The structure is checked
/// only when parsed; a value of this type may still be malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CredentialProof {
    pub version: u8,
    pub credential: CredentialWire,
    pub nullifier_seed: String,
    pub ownership: OwnershipWire,
    /// Unix seconds at which the holder produced the proof.
    pub created_at: i64,
    #[serde(default)]
    pub predicates: Vec<PredicateWire>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CredentialWire {
    pub issuer: String,
    pub holder_key: String,
    pub dob_commitment: String,
    pub expires_at: i64,
    pub signature: SignatureWire,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignatureWire {
    pub r: String,
    pub z: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OwnershipWire {
    pub challenge: String,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PredicateWire {
    /// Predicate name, such as `ageAbove18`.
    pub name: String,
    /// Reference date the predicate was evaluated on, `YYYY-MM-DD`.
    pub as_of: String,
    pub bits: Vec<BitWire>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BitWire {
    pub commitment: String,
    pub a0: String,
    pub a1: String,
    pub c0: String,
    pub z0: String,
    pub z1: String,
}

/// A proof whose structure has been checked and whose group elements have been decoded.
#[derive(Debug, Clone)]
pub(crate) struct ParsedProof {
    pub(crate) credential: Credential,
    pub(crate) nullifier_seed: RistrettoPoint,
    pub(crate) ownership: OwnershipProof,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) predicates: Vec<ParsedPredicate>,
}

#[derive(Debug, Clone)]
pub(crate) struct ParsedPredicate {
    pub(crate) predicate: Predicate,
    pub(crate) as_of: NaiveDate,
    /// The last birth date for which `predicate` holds on `as_of`.
    pub(crate) cutoff: NaiveDate,
    pub(crate) range: RangeProof,
}

impl CredentialProof {
    /// Interpret an arbitrary JSON value as a proof. Shape errors are
    /// reported as a malformed proof rather than a transport error.
    pub fn from_value(value: &Value) -> Result<Self, Rejection> {
        serde_json::from_value(value.clone()).map_err(|e| Rejection::malformed("proof", e))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub(crate) fn parse(&self) -> Result<ParsedProof, Rejection> {
        if self.version != PROOF_VERSION {
            return Err(Rejection::malformed(
                "version",
                format!("unsupported version {}", self.version),
            ));
        }

        let credential = self.credential.parse()?;
        let created_at = DateTime::<Utc>::from_timestamp(self.created_at, 0)
            .ok_or_else(|| Rejection::malformed("createdAt", "timestamp out of range"))?;
        let nullifier_seed = decode_point("nullifierSeed", &self.nullifier_seed)?;
        let ownership = OwnershipProof {
            challenge: decode_scalar("ownership.challenge", &self.ownership.challenge)?,
            response: decode_scalar("ownership.response", &self.ownership.response)?,
        };

        let mut predicates = Vec::with_capacity(self.predicates.len());
        for wire in &self.predicates {
            let parsed = wire.parse()?;
            if predicates
                .iter()
                .any(|p: &ParsedPredicate| p.predicate == parsed.predicate)
            {
                return Err(Rejection::malformed(
                    "predicates",
                    format!("`{}` appears more than once", parsed.predicate),
                ));
            }
            predicates.push(parsed);
        }

        Ok(ParsedProof {
            credential,
            nullifier_seed,
            ownership,
            created_at,
            predicates,
        })
    }

    pub(crate) fn from_parts(
        credential: &Credential,
        nullifier_seed: &RistrettoPoint,
        ownership: &OwnershipProof,
        created_at: i64,
        predicates: &[ParsedPredicate],
    ) -> Self {
        Self {
            version: PROOF_VERSION,
            credential: CredentialWire {
                issuer: encode(credential.issuer.as_bytes()),
                holder_key: encode_point(&credential.holder_key),
                dob_commitment: encode_point(&credential.dob_commitment),
                expires_at: credential.expires_at,
                signature: SignatureWire {
                    r: encode(credential.signature.r.as_bytes()),
                    z: encode(credential.signature.z.as_bytes()),
                },
            },
            nullifier_seed: encode_point(nullifier_seed),
            ownership: OwnershipWire {
                challenge: encode(ownership.challenge.as_bytes()),
                response: encode(ownership.response.as_bytes()),
            },
            created_at,
            predicates: predicates.iter().map(PredicateWire::from_parsed).collect(),
        }
    }
}

impl CredentialWire {
    fn parse(&self) -> Result<Credential, Rejection> {
        // The issuer is compared by encoding, so only the length is checked here.
        let issuer = decode_array("credential.issuer", &self.issuer)?;
        Ok(Credential {
            issuer: CompressedRistretto(issuer),
            holder_key: decode_point("credential.holderKey", &self.holder_key)?,
            dob_commitment: decode_point("credential.dobCommitment", &self.dob_commitment)?,
            expires_at: self.expires_at,
            signature: Signature {
                r: CompressedRistretto(decode_array(
                    "credential.signature.r",
                    &self.signature.r,
                )?),
                z: decode_scalar("credential.signature.z", &self.signature.z)?,
            },
        })
    }
}

impl PredicateWire {
    fn parse(&self) -> Result<ParsedPredicate, Rejection> {
        let predicate = self
            .name
            .parse::<Predicate>()
            .map_err(|e| Rejection::malformed("predicates.name", e))?;
        let as_of = NaiveDate::parse_from_str(&self.as_of, "%Y-%m-%d")
            .map_err(|e| Rejection::malformed("predicates.asOf", e))?;
        let cutoff = predicate_cutoff(predicate, as_of)
            .ok_or_else(|| Rejection::malformed("predicates.asOf", "date out of range"))?;
        if self.bits.len() != RANGE_BITS {
            return Err(Rejection::malformed(
                "predicates.bits",
                format!("expected {RANGE_BITS} bits, got {}", self.bits.len()),
            ));
        }
        let bits = self
            .bits
            .iter()
            .map(BitWire::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ParsedPredicate {
            predicate,
            as_of,
            cutoff,
            range: RangeProof { bits },
        })
    }

    fn from_parsed(parsed: &ParsedPredicate) -> Self {
        Self {
            name: parsed.predicate.to_string(),
            as_of: parsed.as_of.format("%Y-%m-%d").to_string(),
            bits: parsed.range.bits.iter().map(BitWire::from_parsed).collect(),
        }
    }
}

impl BitWire {
    fn parse(&self) -> Result<BitProof, Rejection> {
        Ok(BitProof {
            commitment: decode_point("bits.commitment", &self.commitment)?,
            a0: decode_point("bits.a0", &self.a0)?,
            a1: decode_point("bits.a1", &self.a1)?,
            c0: decode_scalar("bits.c0", &self.c0)?,
            z0: decode_scalar("bits.z0", &self.z0)?,
            z1: decode_scalar("bits.z1", &self.z1)?,
        })
    }

    fn from_parsed(bit: &BitProof) -> Self {
        Self {
            commitment: encode_point(&bit.commitment),
            a0: encode_point(&bit.a0),
            a1: encode_point(&bit.a1),
            c0: encode(bit.c0.as_bytes()),
            z0: encode(bit.z0.as_bytes()),
            z1: encode(bit.z1.as_bytes()),
        }
    }
}

fn encode_point(point: &RistrettoPoint) -> String {
    encode(point.compress().as_bytes())
}
