//! Shared test fixtures: a trusted issuer, voter wallets, example elections
//! and a manual clock.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rocket::figment::{
    providers::{Format, Toml},
    Figment,
};
use rocket::{serde::json::Value, Build, Rocket};

use crate::model::{
    clock::{Clock, ManualClock},
    coordinator::{Timeouts, VotingCoordinator},
    election::{
        examples::{spec, t0},
        ElectionSpec,
    },
    ledger::{MemoryStore, VoteLedger, VoteStore},
    registry::ElectionRegistry,
};
use crate::proof::{
    HolderSecret, HolderWallet, IssuerKeypair, IssuerParams, Predicate, ProofContext,
    ProofVerifier, Requirements,
};

pub const HMAC_SECRET: &str = "test-only ledger secret";

pub struct Fixture {
    pub issuer: IssuerKeypair,
    pub clock: Arc<ManualClock>,
}

impl Fixture {
    /// The clock starts one second into `E1`.
    pub fn new() -> Self {
        Self {
            issuer: IssuerKeypair::generate(&mut rand::thread_rng()),
            clock: Arc::new(ManualClock::new(t0() + Duration::seconds(1))),
        }
    }

    /// `E1` runs over `[t0, t1)` with candidates `A` and `B`; `E0` closed the day before.
    pub fn elections() -> Vec<ElectionSpec> {
        let mut past = spec("E0");
        past.start_time = t0() - Duration::days(2);
        past.end_time = t0() - Duration::days(1);
        vec![past, spec("E1")]
    }

    pub fn requirements() -> Requirements {
        Requirements::new([Predicate::AgeAbove(18)])
    }

    pub fn registry() -> ElectionRegistry {
        let registry = ElectionRegistry::new();
        for election in Self::elections() {
            registry.create(election).unwrap();
        }
        registry
    }

    pub fn verifier(&self) -> ProofVerifier {
        ProofVerifier::new(IssuerParams::new([*self.issuer.public()]), Self::requirements())
    }

    /// Verification is given a budget no test host should exceed.
    pub fn timeouts() -> Timeouts {
        Timeouts {
            verification: StdDuration::from_secs(60),
            ..Timeouts::default()
        }
    }

    pub fn coordinator(&self) -> VotingCoordinator {
        self.coordinator_with(Arc::new(MemoryStore::new()), Self::timeouts())
    }

    pub fn coordinator_with(&self, store: Arc<dyn VoteStore>, timeouts: Timeouts) -> VotingCoordinator {
        VotingCoordinator::new(
            Arc::new(self.verifier()),
            Arc::new(Self::registry()),
            Arc::new(VoteLedger::new(store, HMAC_SECRET.as_bytes())),
            self.clock.clone(),
            timeouts,
        )
    }

    /// An adult voter with a fresh identity.
    pub fn voter(&self) -> HolderWallet {
        self.wallet(NaiveDate::from_ymd_opt(1990, 3, 4).unwrap())
    }

    /// A voter who turns 18 only after `E1` has closed.
    pub fn minor(&self) -> HolderWallet {
        self.wallet(NaiveDate::from_ymd_opt(2009, 1, 15).unwrap())
    }

    fn wallet(&self, birth_date: NaiveDate) -> HolderWallet {
        let mut rng = rand::thread_rng();
        let secret = HolderSecret::generate(&mut rng);
        let expires_at: DateTime<Utc> = t0() + Duration::days(365);
        let issued = self
            .issuer
            .issue(&secret.public_key(), birth_date, expires_at, &mut rng);
        HolderWallet::new(secret, issued).unwrap()
    }

    /// A proof for voting for `candidate_id`, made now.
    pub fn vote_proof(&self, wallet: &HolderWallet, election_id: &str, candidate_id: &str) -> Value {
        let context = ProofContext::Vote {
            election_id: election_id.to_string(),
            candidate_id: candidate_id.to_string(),
        };
        self.proof_with(wallet, context, &[Predicate::AgeAbove(18)])
    }

    /// A proof for an eligibility check, made now.
    pub fn eligibility_proof(&self, wallet: &HolderWallet, election_id: &str) -> Value {
        let context = ProofContext::Eligibility {
            election_id: election_id.to_string(),
        };
        self.proof_with(wallet, context, &[Predicate::AgeAbove(18)])
    }

    pub fn proof_with(
        &self,
        wallet: &HolderWallet,
        context: ProofContext,
        predicates: &[Predicate],
    ) -> Value {
        wallet
            .prove(&context, predicates, self.clock.now(), &mut rand::thread_rng())
            .unwrap()
            .to_value()
    }

    /// Server configuration trusting this fixture's issuer.
    pub fn figment(&self) -> Figment {
        let toml = format!(
            r#"
            issuer_keys = ["{issuer}"]
            required_predicates = ["ageAbove18"]
            max_proof_age = 600
            clock_skew = 30
            verification_timeout_ms = 60000
            commit_timeout_ms = 5000
            hmac_secret = "{HMAC_SECRET}"
            "#,
            issuer = self.issuer.public(),
        );
        rocket::Config::figment()
            .merge(Toml::string(&toml))
            .merge(("elections", Self::elections()))
            .merge(("log_level", "off"))
    }

    /// A server over an in-memory store, driven by this fixture's clock.
    pub fn rocket(&self) -> Rocket<Build> {
        let store: Arc<dyn VoteStore> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = self.clock.clone();
        crate::rocket_with(self.figment(), store, clock)
    }
}

/// An empty database on the MongoDB server at `ROCKET_DB_URI`, or a local one.
/// Only for `#[ignore]`d tests, which are run with `cargo test -- --ignored`.
pub async fn live_database(name: &str) -> mongodb::Database {
    let db_uri = std::env::var("ROCKET_DB_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
    let db = crate::config::open_database(&db_uri, &format!("anonvote_test_{name}"))
        .await
        .unwrap();
    db.drop(None).await.unwrap();
    db
}
