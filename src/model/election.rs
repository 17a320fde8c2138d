use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ElectionId = String;
pub type CandidateId = String;

/// A candidate standing in an election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// Unique within the parent election.
    pub id: CandidateId,
    pub display_name: String,
}

/// States in the election lifecycle. Derived from the time window, never stored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionState {
    /// Before `start_time`.
    Pending,
    /// Within `[start_time, end_time)`.
    Open,
    /// At or after `end_time`.
    Closed,
}

/// An election definition, as configured or submitted for creation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ElectionSpec {
    pub id: ElectionId,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElectionError {
    #[error("election ID must not be empty")]
    EmptyId,
    #[error("start time must be before end time")]
    InvalidWindow,
    #[error("election must have at least one candidate")]
    NoCandidates,
    #[error("candidate ID `{0}` appears more than once")]
    DuplicateCandidate(CandidateId),
}

/// A validated election.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Election {
    id: ElectionId,
    title: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    candidates: Vec<Candidate>,
}

impl TryFrom<ElectionSpec> for Election {
    type Error = ElectionError;

    fn try_from(spec: ElectionSpec) -> Result<Self, Self::Error> {
        if spec.id.is_empty() {
            return Err(ElectionError::EmptyId);
        }
        if spec.start_time >= spec.end_time {
            return Err(ElectionError::InvalidWindow);
        }
        check_candidates(&spec.candidates)?;
        Ok(Self {
            id: spec.id,
            title: spec.title,
            start_time: spec.start_time,
            end_time: spec.end_time,
            candidates: spec.candidates,
        })
    }
}

pub(crate) fn check_candidates(candidates: &[Candidate]) -> Result<(), ElectionError> {
    if candidates.is_empty() {
        return Err(ElectionError::NoCandidates);
    }
    let mut seen = HashSet::new();
    for candidate in candidates {
        if !seen.insert(candidate.id.as_str()) {
            return Err(ElectionError::DuplicateCandidate(candidate.id.clone()));
        }
    }
    Ok(())
}

impl Election {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn has_candidate(&self, candidate_id: &str) -> bool {
        self.candidates.iter().any(|c| c.id == candidate_id)
    }

    /// The lifecycle state at `now`.
    pub fn state(&self, now: DateTime<Utc>) -> ElectionState {
        if now < self.start_time {
            ElectionState::Pending
        } else if now < self.end_time {
            ElectionState::Open
        } else {
            ElectionState::Closed
        }
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == ElectionState::Open
    }

    /// A copy of this election with a different candidate list.
    pub(crate) fn with_candidates(&self, candidates: Vec<Candidate>) -> Result<Self, ElectionError> {
        check_candidates(&candidates)?;
        Ok(Self {
            candidates,
            ..self.clone()
        })
    }
}

#[cfg(test)]
pub(crate) mod examples {
    use chrono::TimeZone;

    use super::*;

    pub fn candidate(id: &str) -> Candidate {
        Candidate {
            id: id.to_string(),
            display_name: format!("Candidate {id}"),
        }
    }

    /// `[t0, t1)` is 2026-11-03, 07:00 to 22:00 UTC.
    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 11, 3, 7, 0, 0).unwrap()
    }

    pub fn t1() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 11, 3, 22, 0, 0).unwrap()
    }

    pub fn spec(id: &str) -> ElectionSpec {
        ElectionSpec {
            id: id.to_string(),
            title: "General Election".to_string(),
            start_time: t0(),
            end_time: t1(),
            candidates: vec![candidate("A"), candidate("B")],
        }
    }
}
