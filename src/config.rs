use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use log::{error, info, warn};
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio::sync::Semaphore,
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::{
    clock::Clock,
    coordinator::{default_verification_slots, Timeouts, VotingCoordinator},
    election::ElectionSpec,
    ledger::{ensure_indexes_exist, MemoryStore, MongoStore, VoteLedger, VoteStore},
    registry::{ElectionRegistry, RegistryError},
};
use crate::proof::{IssuerParams, IssuerPublicKey, Predicate, ProofVerifier, Requirements};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    issuer_keys: Vec<IssuerPublicKey>,
    required_predicates: Vec<Predicate>,
    max_proof_age: u32,
    clock_skew: u32,
    verification_timeout_ms: u64,
    commit_timeout_ms: u64,
    #[serde(default)]
    verification_slots: Option<usize>,
    #[serde(default)]
    elections: Vec<ElectionSpec>,
    // secrets
    hmac_secret: String,
}

impl Config {
    /// Public keys of the trusted credential issuers.
    /// Rotate by adding the new key, then removing the old one once its credentials have expired.
    pub fn issuer_params(&self) -> IssuerParams {
        IssuerParams::new(self.issuer_keys.iter().copied())
    }

    /// Predicates every proof must establish, with the accepted proof age and clock skew.
    pub fn requirements(&self) -> Requirements {
        Requirements {
            predicates: self.required_predicates.iter().copied().collect(),
            max_proof_age: Duration::seconds(self.max_proof_age.into()),
            clock_skew: Duration::seconds(self.clock_skew.into()),
        }
    }

    /// Bounds on proof verification and on the ledger commit.
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            verification: StdDuration::from_millis(self.verification_timeout_ms),
            commit: StdDuration::from_millis(self.commit_timeout_ms),
        }
    }

    /// How many proofs may be verified at once. Defaults to one per core.
    pub fn verification_slots(&self) -> usize {
        self.verification_slots
            .filter(|&slots| slots > 0)
            .unwrap_or_else(default_verification_slots)
    }

    /// Elections to register at launch.
    pub fn elections(&self) -> &[ElectionSpec] {
        &self.elections
    }

    /// Secret key used to tag vote records and sign receipts.
    pub fn hmac_secret(&self) -> &[u8] {
        self.hmac_secret.as_bytes()
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if config.issuer_keys.is_empty() {
            error!("No trusted credential issuers configured, every proof would be rejected");
            return Err(rocket);
        }
        if config.hmac_secret.is_empty() {
            error!("`hmac_secret` must not be empty");
            return Err(rocket);
        }

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // non-secrets
    #[serde(default = "default_database_name")]
    db_name: String,
    // secrets
    db_uri: Option<String>,
}

fn default_database_name() -> String {
    "anonvote".to_string()
}

/// A fairing that picks the vote store. With `db_uri` set it connects to
/// MongoDB and ensures the required indexes exist; without, votes are kept in
/// memory. Either way an `Arc<dyn VoteStore>` is placed into managed state.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "Vote store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let store: Arc<dyn VoteStore> = match config.db_uri {
            Some(db_uri) => {
                info!("Loaded database config, connecting...");
                let db = match connect(&db_uri, &config.db_name).await {
                    Ok(db) => db,
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                };
                info!("...database connection online!");
                Arc::new(MongoStore::new(&db))
            }
            None => {
                warn!("No `db_uri` configured, votes will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        // Manage the state.
        rocket = rocket.manage(store);
        Ok(rocket)
    }
}

/// Connect to the database and ensure the required indexes exist.
pub async fn connect(db_uri: &str, db_name: &str) -> Result<mongodb::Database, mongodb::error::Error> {
    let db = open_database(db_uri, db_name).await?;
    ensure_indexes_exist(&db).await?;
    Ok(db)
}

/// Connect to the database without writing anything to it.
pub async fn open_database(
    db_uri: &str,
    db_name: &str,
) -> Result<mongodb::Database, mongodb::error::Error> {
    let client = MongoClient::with_uri_str(db_uri).await?;
    Ok(client.database(db_name))
}

/// A fairing that assembles the election registry, vote ledger and proof
/// verifier into a [`VotingCoordinator`] and places it into managed state.
///
/// Must be attached after [`ConfigFairing`] and after the vote store and
/// clock are managed.
pub struct CoordinatorFairing;

#[rocket::async_trait]
impl Fairing for CoordinatorFairing {
    fn info(&self) -> Info {
        Info {
            name: "Voting coordinator",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let coordinator = match (
            rocket.state::<Config>(),
            rocket.state::<Arc<dyn VoteStore>>(),
            rocket.state::<Arc<dyn Clock>>(),
        ) {
            (Some(config), Some(store), Some(clock)) => {
                assemble(config, store.clone(), clock.clone())
            }
            _ => {
                error!("Config, vote store and clock must be managed before the coordinator");
                return Err(rocket);
            }
        };

        match coordinator {
            Ok(coordinator) => Ok(rocket.manage(coordinator)),
            Err(e) => {
                error!("Invalid election in config: {e}");
                Err(rocket)
            }
        }
    }
}

fn assemble(
    config: &Config,
    store: Arc<dyn VoteStore>,
    clock: Arc<dyn Clock>,
) -> Result<VotingCoordinator, RegistryError> {
    // Seed the registry.
    let registry = ElectionRegistry::new();
    for spec in config.elections() {
        registry.create(spec.clone())?;
    }

    let verifier = ProofVerifier::new(config.issuer_params(), config.requirements());
    let ledger = VoteLedger::new(store, config.hmac_secret());
    info!(
        "Voting coordinator ready with {} election(s), verifying up to {} proof(s) at once",
        config.elections().len(),
        config.verification_slots()
    );
    Ok(VotingCoordinator::new(
        Arc::new(verifier),
        Arc::new(registry),
        Arc::new(ledger),
        clock,
        config.timeouts(),
    )
    .with_verification_slots(Arc::new(Semaphore::new(config.verification_slots()))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn verification_slots_default_to_one_per_core() {
        let figment = Fixture::new().figment();
        let config = figment.extract::<Config>().unwrap();
        assert_eq!(config.verification_slots(), default_verification_slots());
        assert!(config.verification_slots() >= 1);

        let config = figment
            .clone()
            .merge(("verification_slots", 3))
            .extract::<Config>()
            .unwrap();
        assert_eq!(config.verification_slots(), 3);

        let config = figment
            .merge(("verification_slots", 0))
            .extract::<Config>()
            .unwrap();
        assert_eq!(config.verification_slots(), default_verification_slots());
    }
}
