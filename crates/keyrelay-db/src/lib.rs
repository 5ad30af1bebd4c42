//! `SQLite` persistence for the channel-script catalogue.
#![deny(unsafe_code)]

pub mod factory;
pub mod repositories;
pub mod setup;

pub use factory::CoreFactory;
pub use repositories::SqliteScriptRepository;
pub use setup::{setup_database, setup_test_database};
