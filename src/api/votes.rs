use chrono::{DateTime, Utc};
use rocket::{
    serde::json::{self, Json, Value},
    Route, State,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    coordinator::{Submission, VotingCoordinator},
    election::CandidateId,
    ledger::Receipt,
    nullifier::{Nullifier, NullifierParseError},
};

pub fn routes() -> Vec<Route> {
    routes![cast_vote, lookup_vote]
}

#[post("/elections/<election_id>/votes", data = "<request>", format = "json")]
async fn cast_vote(
    election_id: &str,
    request: std::result::Result<Json<VoteRequest>, json::Error<'_>>,
    coordinator: &State<VotingCoordinator>,
) -> Result<Json<Receipt>> {
    let VoteRequest {
        candidate_id,
        proof,
    } = request
        .map_err(|e| Error::BadRequest(e.to_string()))?
        .into_inner();

    let receipt = coordinator
        .submit(Submission {
            election_id: election_id.to_string(),
            candidate_id,
            proof,
        })
        .await?;
    Ok(Json(receipt))
}

/// Lets a voter confirm their vote landed, e.g. after a timeout. Never reveals the candidate.
#[get("/votes/<nullifier>")]
async fn lookup_vote(
    nullifier: std::result::Result<Nullifier, NullifierParseError>,
    coordinator: &State<VotingCoordinator>,
) -> Result<Json<VoteStatus>> {
    let nullifier = nullifier.map_err(|e| Error::BadRequest(e.to_string()))?;
    let record = coordinator.ledger().get(&nullifier).await?;
    Ok(Json(VoteStatus {
        recorded: record.is_some(),
        committed_at: record.map(|r| r.committed_at),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub candidate_id: CandidateId,
    pub proof: Value,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct VoteStatus {
    pub recorded: bool,
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub committed_at: Option<DateTime<Utc>>,
}
