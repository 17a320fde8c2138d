use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use data_encoding::HEXLOWER;
use rocket::request::FromParam;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::proof::NullifierSeed;

/// Domain separation prefix for nullifier derivation.
const NULLIFIER_DOMAIN: &[u8] = b"anonvote/nullifier/v1";

/// Per-election pseudonym of a voter: a SHA-256 digest of the nullifier seed
/// and the election ID. Public; rendered as lowercase hex.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Nullifier([u8; 32]);

impl Nullifier {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Display for Nullifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&HEXLOWER.encode(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a nullifier digest: expected 64 lowercase hex characters")]
pub struct NullifierParseError;

impl FromStr for Nullifier {
    type Err = NullifierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = HEXLOWER
            .decode(s.as_bytes())
            .map_err(|_| NullifierParseError)?;
        <[u8; 32]>::try_from(bytes.as_slice())
            .map(Self)
            .map_err(|_| NullifierParseError)
    }
}

impl TryFrom<String> for Nullifier {
    type Error = NullifierParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Nullifier> for String {
    fn from(nullifier: Nullifier) -> Self {
        nullifier.to_string()
    }
}

impl<'a> FromParam<'a> for Nullifier {
    type Error = NullifierParseError;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        param.parse()
    }
}

/// Derives nullifiers. Stateless and deterministic.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullifierDeriver;

impl NullifierDeriver {
    /// `SHA-256(domain ‖ len(election_id) as u64 LE ‖ election_id ‖ seed)`.
    ///
    /// The length prefix keeps `(election_id, seed)` pairs from colliding by
    /// shifting bytes between the two fields.
    pub fn derive(seed: &NullifierSeed, election_id: &str) -> Nullifier {
        let mut hasher = Sha256::new();
        hasher.update(NULLIFIER_DOMAIN);
        hasher.update((election_id.len() as u64).to_le_bytes());
        hasher.update(election_id.as_bytes());
        hasher.update(seed.as_bytes());
        Nullifier(hasher.finalize().into())
    }
}
