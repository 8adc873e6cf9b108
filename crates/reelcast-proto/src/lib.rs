pub mod config;
pub mod ledger;
pub mod messages;
pub mod platform;
pub mod protocol;
