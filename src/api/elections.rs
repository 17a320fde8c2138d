use chrono::{DateTime, Utc};
use rocket::{
    serde::json::{self, Json, Value},
    Route, State,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    coordinator::{Eligibility, Rejection, VotingCoordinator},
    election::{Candidate, Election, ElectionId, ElectionState},
    ledger::Tally,
};

pub fn routes() -> Vec<Route> {
    routes![list_elections, get_election, get_totals, check_eligibility]
}

#[get("/elections")]
async fn list_elections(coordinator: &State<VotingCoordinator>) -> Json<Vec<ElectionView>> {
    let now = coordinator.now();
    let elections = coordinator
        .registry()
        .list()
        .iter()
        .map(|election| ElectionView::new(election, now))
        .collect();
    Json(elections)
}

#[get("/elections/<election_id>")]
async fn get_election(
    election_id: &str,
    coordinator: &State<VotingCoordinator>,
) -> Result<Json<ElectionView>> {
    let election = election_by_id(election_id, coordinator)?;
    Ok(Json(ElectionView::new(&election, coordinator.now())))
}

/// Results are only published once the election has closed.
#[get("/elections/<election_id>/totals")]
async fn get_totals(
    election_id: &str,
    coordinator: &State<VotingCoordinator>,
) -> Result<Json<TotalsView>> {
    let election = election_by_id(election_id, coordinator)?;
    if election.state(coordinator.now()) != ElectionState::Closed {
        return Err(Error::NotFound(format!(
            "Results for election `{election_id}` are not published yet"
        )));
    }
    let totals = coordinator.ledger().tally(&election).await?;
    Ok(Json(TotalsView {
        election_id: election.id().to_string(),
        totals,
    }))
}

#[post("/elections/<election_id>/eligibility", data = "<request>", format = "json")]
async fn check_eligibility(
    election_id: &str,
    request: std::result::Result<Json<EligibilityRequest>, json::Error<'_>>,
    coordinator: &State<VotingCoordinator>,
) -> Result<Json<Eligibility>> {
    let request = request.map_err(|e| Error::BadRequest(e.to_string()))?;
    let eligibility = coordinator
        .check_eligibility(election_id, request.into_inner().proof)
        .await?;
    Ok(Json(eligibility))
}

fn election_by_id(election_id: &str, coordinator: &VotingCoordinator) -> Result<std::sync::Arc<Election>> {
    coordinator
        .registry()
        .get(election_id)
        .map_err(|_| Rejection::ElectionNotFound(election_id.to_string()).into())
}

/// An election as shown to voters.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct ElectionView {
    pub id: ElectionId,
    pub title: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub end_time: DateTime<Utc>,
    pub state: ElectionState,
    pub candidates: Vec<Candidate>,
}

impl ElectionView {
    fn new(election: &Election, now: DateTime<Utc>) -> Self {
        Self {
            id: election.id().to_string(),
            title: election.title().to_string(),
            start_time: election.start_time(),
            end_time: election.end_time(),
            state: election.state(now),
            candidates: election.candidates().to_vec(),
        }
    }
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct TotalsView {
    pub election_id: ElectionId,
    pub totals: Tally,
}

#[derive(Debug, Deserialize)]
pub struct EligibilityRequest {
    pub proof: Value,
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::{json, serde_json},
    };

    use crate::error::ErrorBody;
    use crate::model::election::examples::t1;
    use crate::proof::ProofContext;
    use crate::testing::Fixture;

    use super::*;

    #[backend_test]
    async fn list_all_elections(client: Client, _fixture: Fixture) {
        let response = client
            .get(uri!("/api", list_elections))
            .dispatch()
            .await;

        assert_eq!(Status::Ok, response.status());
        let raw_response = response.into_string().await.unwrap();
        let elections = serde_json::from_str::<Vec<ElectionView>>(&raw_response).unwrap();

        let summary = elections
            .iter()
            .map(|e| (e.id.as_str(), e.state))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![("E0", ElectionState::Closed), ("E1", ElectionState::Open)]
        );
        assert_eq!(elections[1].candidates.len(), 2);
    }

    #[backend_test]
    async fn times_are_unix_seconds(client: Client, _fixture: Fixture) {
        let response = client
            .get(uri!("/api", get_election("E1")))
            .dispatch()
            .await;

        assert_eq!(Status::Ok, response.status());
        let raw: serde_json::Value =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(raw["startTime"], json!(1_793_689_200));
        assert_eq!(raw["endTime"], json!(1_793_743_200));
        assert_eq!(raw["state"], json!("open"));
    }

    #[backend_test]
    async fn unknown_election_is_not_found(client: Client, _fixture: Fixture) {
        let response = client
            .get(uri!("/api", get_election("nope")))
            .dispatch()
            .await;

        assert_eq!(Status::NotFound, response.status());
        let body = response.into_json::<ErrorBody>().await.unwrap();
        assert_eq!(body.code, "election_not_found");
    }

    #[backend_test]
    async fn totals_hidden_until_closed(client: Client, fixture: Fixture) {
        let response = client
            .get(uri!("/api", get_totals("E1")))
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());

        fixture.clock.set(t1());
        let response = client
            .get(uri!("/api", get_totals("E1")))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let totals = response.into_json::<TotalsView>().await.unwrap();
        assert_eq!(totals.election_id, "E1");
        assert!(totals.totals.iter().all(|t| t.votes == 0));
        assert_eq!(totals.totals.len(), 2);
    }

    #[backend_test]
    async fn adult_is_eligible(client: Client, fixture: Fixture) {
        let voter = fixture.voter();
        let proof = fixture.eligibility_proof(&voter, "E1");

        let response = client
            .post(uri!("/api", check_eligibility("E1")))
            .header(ContentType::JSON)
            .body(json!({ "proof": proof }).to_string())
            .dispatch()
            .await;

        assert_eq!(Status::Ok, response.status());
        let raw: serde_json::Value =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(raw["eligible"], json!(true));
        assert_eq!(raw["predicates"]["ageAbove18"], json!(true));
    }

    #[backend_test]
    async fn minor_is_not_eligible(client: Client, fixture: Fixture) {
        let minor = fixture.minor();
        // The age proof cannot be constructed, so none is disclosed.
        let context = ProofContext::Eligibility {
            election_id: "E1".to_string(),
        };
        let proof = fixture.proof_with(&minor, context, &[]);

        let response = client
            .post(uri!("/api", check_eligibility("E1")))
            .header(ContentType::JSON)
            .body(json!({ "proof": proof }).to_string())
            .dispatch()
            .await;

        assert_eq!(Status::Forbidden, response.status());
        let body = response.into_json::<ErrorBody>().await.unwrap();
        assert_eq!(body.code, "predicate_not_satisfied");
    }

    #[backend_test]
    async fn unparsable_body_is_bad_request(client: Client, _fixture: Fixture) {
        let response = client
            .post(uri!("/api", check_eligibility("E1")))
            .header(ContentType::JSON)
            .body("{ not json")
            .dispatch()
            .await;

        assert_eq!(Status::BadRequest, response.status());
        let body = response.into_json::<ErrorBody>().await.unwrap();
        assert_eq!(body.code, "bad_request");
    }
}
