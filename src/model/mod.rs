pub mod clock;
pub mod coordinator;
pub mod election;
pub mod ledger;
pub mod nullifier;
pub mod registry;
