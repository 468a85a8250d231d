pub mod api;
pub mod auth;
pub mod cli;
pub mod clinic;
pub mod config;
pub mod db;
pub mod engine;

pub use db::{ClinicStore, DbPool};

use config::Config;

pub struct AppState {
    pub config: Config,
    pub store: ClinicStore,
}

impl AppState {
    pub fn new(config: Config, store: ClinicStore) -> Self {
        Self { config, store }
    }
}
