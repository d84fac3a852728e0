pub mod api;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod startup;

pub use config::{get_settings, setup_logger, Settings};
pub use domain::{
    Battles, Bet, EventStreamer, Lottery, PaymentTracker, StoreError, Stores, Winner,
};
pub use infra::db::DBConnection;
pub use infra::lightning::{Ln, LnClient};
pub use startup::Application;
