//! A CLI tool for auditing the vote ledger of one election.
//! This loads the same configuration as the server and uses the server's own
//! ledger implementation, so it checks exactly what the server wrote.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use clap::{Arg, ArgAction, ArgMatches, Command};
use rocket::figment::{
    providers::{Env, Format, Toml},
    Figment, Profile,
};
use serde::Deserialize;

use anonvote_backend::{
    config::open_database,
    model::{
        election::{Election, ElectionSpec},
        ledger::{AuditError, AuditReport, MongoStore, VoteLedger, VoteStore},
    },
};

const PROGRAM_NAME: &str = "ledger-audit";

const ABOUT_TEXT: &str = "Audit the vote ledger of one election.

Every record's integrity tag is recomputed, and every record is checked for a
unique nullifier, a standing candidate and a commit time inside the voting
window.

EXIT CODES:
     0: Audit succeeded.
   255: Ran successfully, but the audit failed.
 Other: Error.";

const ELECTION_ID: &str = "ELECTION_ID";

const ELECTION_ID_HELP: &str = "The ID of the election to audit, as configured in `elections`";

const CONFIG: &str = "config";

const CONFIG_HELP: &str = "Path to the server config file.\n\
Defaults to `Rocket.toml`, or `ROCKET_CONFIG` if set";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .arg(
            Arg::new(ELECTION_ID)
                .help(ELECTION_ID_HELP)
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new(CONFIG)
                .long(CONFIG)
                .short('c')
                .help(CONFIG_HELP)
                .action(ArgAction::Set),
        )
}

/// Errors that this program may produce.
#[derive(Debug, Eq, PartialEq)]
enum Error {
    /// The config could not be loaded, or is incomplete.
    Config(String),
    /// The election is not in the config.
    UnknownElection(String),
    /// The database could not be reached.
    Database(String),
    /// The audit ran, and failed for the contained reason.
    Audit(AuditError),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Bad config: {msg}"),
            Self::UnknownElection(id) => write!(f, "Election `{id}` is not configured"),
            Self::Database(msg) => write!(f, "Database error: {msg}"),
            Self::Audit(err) => write!(f, "{err}"),
        }
    }
}

/// The part of the server config this tool needs.
#[derive(Deserialize)]
struct AuditConfig {
    #[serde(default)]
    elections: Vec<ElectionSpec>,
    hmac_secret: String,
    db_uri: Option<String>,
    #[serde(default = "default_database_name")]
    db_name: String,
}

fn default_database_name() -> String {
    "anonvote".to_string()
}

impl AuditConfig {
    fn load(config_path: Option<&str>) -> Result<Self, Error> {
        let figment = match config_path {
            Some(path) => Figment::from(rocket::Config::default())
                .merge(Toml::file(path).nested())
                .merge(Env::prefixed("ROCKET_").ignore(&["PROFILE"]).global())
                .select(Profile::from_env_or(
                    "ROCKET_PROFILE",
                    rocket::Config::DEFAULT_PROFILE,
                )),
            None => rocket::Config::figment(),
        };
        figment
            .extract::<Self>()
            .map_err(|e| Error::Config(e.to_string()))
    }

    fn election(&self, election_id: &str) -> Result<Election, Error> {
        let spec = self
            .elections
            .iter()
            .find(|spec| spec.id == election_id)
            .ok_or_else(|| Error::UnknownElection(election_id.to_string()))?;
        Election::try_from(spec.clone()).map_err(|e| Error::Config(e.to_string()))
    }
}

/// A printable summary of an audit.
struct Summary(AuditReport);

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let report = &self.0;
        writeln!(
            f,
            "Election {}: {} record{}",
            report.election_id,
            report.records,
            if report.records != 1 { "s" } else { "" }
        )?;
        for total in &report.totals {
            writeln!(
                f,
                "  {}: {} vote{}",
                total.candidate_id,
                total.votes,
                if total.votes != 1 { "s" } else { "" }
            )?;
        }
        write!(f, "Ledger digest: {}", report.ledger_digest)
    }
}

/// Audit one election over the given store.
async fn audit_store(
    store: Arc<dyn VoteStore>,
    config: &AuditConfig,
    election_id: &str,
) -> Result<AuditReport, Error> {
    let election = config.election(election_id)?;
    let ledger = VoteLedger::new(store, config.hmac_secret.as_bytes());
    ledger.audit(&election).await.map_err(Error::Audit)
}

/// Load the config, connect to the database and audit one election.
/// Auditing only reads: no collection or index is created.
async fn audit(config_path: Option<&str>, election_id: &str) -> Result<AuditReport, Error> {
    let config = AuditConfig::load(config_path)?;
    let db_uri = config
        .db_uri
        .as_deref()
        .ok_or_else(|| Error::Config("`db_uri` is not set, there is no ledger to audit".into()))?;
    let db = open_database(db_uri, &config.db_name)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
    audit_store(Arc::new(MongoStore::new(&db)), &config, election_id).await
}

/// Run the program with the given arguments, returning the exit code.
fn run(args: &ArgMatches) -> u8 {
    let election_id = args
        .get_one::<String>(ELECTION_ID)
        .expect("ELECTION_ID is required");
    let config_path = args.get_one::<String>(CONFIG).map(String::as_str);

    let runtime = match rocket::tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {e}");
            return 1;
        }
    };

    match runtime.block_on(audit(config_path, election_id)) {
        Ok(report) => {
            println!("{}", Summary(report));
            println!("Audit succeeded.");
            0
        }
        Err(Error::Audit(AuditError::Store(e))) => {
            eprintln!("Database error: {e}");
            1
        }
        Err(err @ Error::Audit(_)) => {
            println!("Audit failed: {err}");
            255
        }
        Err(err) => {
            eprintln!("{err}");
            1
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}
