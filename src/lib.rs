#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use std::sync::Arc;

use rocket::{figment::Figment, Build, Rocket};

use crate::config::{ConfigFairing, CoordinatorFairing, DatabaseFairing};
use crate::logging::LoggerFairing;
use crate::model::{
    clock::{Clock, SystemClock},
    ledger::VoteStore,
};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod proof;

#[cfg(test)]
mod testing;

/// Build the server from `Rocket.toml` and the environment, on the system clock.
pub fn build() -> Rocket<Build> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    rocket::build()
        .mount("/api", api::routes())
        .register("/api", api::catchers())
        .manage(clock)
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(CoordinatorFairing)
}

/// Build the server from the given figment, over an existing store and clock.
pub fn rocket_with(
    figment: Figment,
    store: Arc<dyn VoteStore>,
    clock: Arc<dyn Clock>,
) -> Rocket<Build> {
    rocket::custom(figment)
        .mount("/api", api::routes())
        .register("/api", api::catchers())
        .manage(store)
        .manage(clock)
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(CoordinatorFairing)
}
